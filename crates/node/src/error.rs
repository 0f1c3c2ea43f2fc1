//! Node and transport errors

use std::io;
use thiserror::Error;

/// Socket and interface faults
///
/// None of these are fatal: activities log them and move on to the next
/// iteration.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Socket error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to join group on interface {interface}: {source}")]
    Join {
        interface: String,
        #[source]
        source: io::Error,
    },

    #[error("Datagram of {len} bytes exceeds the {max} byte limit")]
    Oversized { len: usize, max: usize },

    #[error("Transport closed")]
    Closed,
}

/// Node lifecycle errors
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Node already started")]
    AlreadyStarted,

    #[error("Node must be started inside a tokio runtime")]
    NoRuntime,

    #[error(transparent)]
    Transport(#[from] TransportError),
}
