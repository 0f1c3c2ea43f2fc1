//! Multicast Node - coordinator-free log replication
//!
//! Architecture:
//! - Every peer joins one multicast group on all local interfaces
//! - Versioned messages are admitted into a local [`Board`] once each
//! - A send-pump paces outgoing datagrams from a deduplicating queue
//! - A gap-repair pass periodically asks the group for missing versions
//! - New peers bootstrap by asking the group for its whole log

pub mod config;
pub mod error;
pub mod node;
pub mod queue;
pub mod transport;


pub use config::NodeConfig;
pub use error::{NodeError, TransportError};
pub use node::{Node, NodeBuilder, NodeHandle, NodeState, NodeStats, VersionedCallback};
pub use queue::SendQueue;
pub use transport::{MemoryNetwork, MemoryTransport, MulticastTransport, Transport};

pub use mcast_board::Board;
pub use mcast_protocol::{Message, ProtocolError, Version, VersionedMessage};
