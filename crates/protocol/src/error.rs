//! Protocol Errors

use thiserror::Error;

/// Errors raised while decoding a datagram
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Bytes do not match any known message shape
    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] borsh::io::Error),
}
