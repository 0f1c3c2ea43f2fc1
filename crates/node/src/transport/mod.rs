//! Datagram transports for the multicast group
//!
//! [`MulticastTransport`] is the real UDP binding. [`MemoryTransport`] runs a
//! whole group inside one process for simulations and tests.

mod memory;
mod multicast;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use multicast::MulticastTransport;

use crate::error::TransportError;
use async_trait::async_trait;

/// A best-effort, unordered, connectionless datagram channel to every peer
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Join the group on every usable local interface.
    ///
    /// Per-interface failures are logged and skipped. Returns the number of
    /// interfaces joined.
    fn join_all_interfaces(&self) -> usize;

    /// Broadcast one datagram to the group
    async fn send(&self, datagram: &[u8]) -> Result<(), TransportError>;

    /// Wait for the next datagram from the group
    async fn recv(&self) -> Result<Vec<u8>, TransportError>;
}
