//! Core message types for log replication

use crate::error::ProtocolError;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical position of a message in the replicated log
pub type Version = u64;

/// A unit of replicated application data
///
/// The payload is opaque to the protocol. Two messages are the same message
/// only if both the version and the payload bytes match.
#[derive(
    Clone, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct VersionedMessage {
    /// Version stamped by the originating peer
    pub version: Version,
    /// Application payload
    pub payload: Vec<u8>,
}

impl VersionedMessage {
    pub fn new(version: Version, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            version,
            payload: payload.into(),
        }
    }
}

impl fmt::Debug for VersionedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedMessage")
            .field("version", &self.version)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Message types exchanged on the multicast group
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum Message {
    /// Replicated application data
    Versioned(VersionedMessage),

    /// Request for specific missing versions
    GetSome { versions: Vec<Version> },

    /// Request for the sender's entire log
    GetAll,
}

impl Message {
    /// Serialize for network transmission
    ///
    /// Borsh output is canonical, so equal messages always produce identical
    /// bytes on every peer.
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("Message serialization should not fail")
    }

    /// Deserialize from network
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(borsh::from_slice(data)?)
    }

    /// Version carried by this message, if it is a versioned one
    pub fn version(&self) -> Option<Version> {
        match self {
            Message::Versioned(msg) => Some(msg.version),
            Message::GetSome { .. } | Message::GetAll => None,
        }
    }

    /// Short variant name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Versioned(_) => "versioned",
            Message::GetSome { .. } => "get_some",
            Message::GetAll => "get_all",
        }
    }
}

impl From<VersionedMessage> for Message {
    fn from(msg: VersionedMessage) -> Self {
        Message::Versioned(msg)
    }
}
