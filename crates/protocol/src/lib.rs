//! Multicast Protocol - messages exchanged between peers
//!
//! Every datagram on the group carries exactly one [`Message`]:
//! - `Versioned` carries replicated application data
//! - `GetSome` asks peers to retransmit specific versions
//! - `GetAll` asks peers to replay their whole log (bootstrap)

pub mod error;
pub mod message;

pub use error::ProtocolError;
pub use message::{Message, Version, VersionedMessage};
