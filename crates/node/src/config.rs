//! Node Configuration

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

/// Default multicast group
pub const DEFAULT_GROUP: Ipv4Addr = Ipv4Addr::new(230, 1, 1, 1);

/// Default UDP port shared by every peer
pub const DEFAULT_PORT: u16 = 12345;

/// Send-pump pacing in milliseconds
pub const SEND_INTERVAL_MS: u64 = 5;

/// Gap-repair period in milliseconds
pub const REPAIR_INTERVAL_MS: u64 = 1000;

/// Largest datagram a peer sends or receives.
///
/// Anything larger is truncated by the socket and then fails to decode.
pub const MAX_DATAGRAM_SIZE: usize = 65536;

/// Maximum number of versions asked for in one repair request
pub const MAX_REPAIR_BATCH: usize = 512;

/// Configuration for a replicating node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Multicast group address
    pub group: Ipv4Addr,
    /// UDP port of the group
    pub port: u16,
    /// Delay between send-pump iterations
    pub send_interval_ms: u64,
    /// Delay between gap-repair passes
    pub repair_interval_ms: u64,
    /// Receive buffer size and outgoing datagram limit
    pub max_datagram_size: usize,
    /// Cap on versions per `GetSome` request
    pub max_repair_batch: usize,
    /// Deliver our own datagrams back to sockets on this host
    pub multicast_loop: bool,
}

impl NodeConfig {
    /// Group address and port as a socket address
    pub fn group_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.group, self.port)
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    pub fn repair_interval(&self) -> Duration {
        Duration::from_millis(self.repair_interval_ms)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP,
            port: DEFAULT_PORT,
            send_interval_ms: SEND_INTERVAL_MS,
            repair_interval_ms: REPAIR_INTERVAL_MS,
            max_datagram_size: MAX_DATAGRAM_SIZE,
            max_repair_batch: MAX_REPAIR_BATCH,
            multicast_loop: true,
        }
    }
}
