//! UDP multicast binding

use super::Transport;
use crate::config::NodeConfig;
use crate::error::TransportError;
use async_trait::async_trait;
use get_if_addrs::{IfAddr, Interface};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

/// Multicast transport with separate receive and send sockets
///
/// The receive socket is bound to the group port on all addresses and joined
/// to the group per interface. The send socket uses an ephemeral port so that
/// several peers can share one host.
pub struct MulticastTransport {
    recv_socket: UdpSocket,
    send_socket: UdpSocket,
    group: SocketAddrV4,
    max_datagram_size: usize,
    /// Receive buffer reused across datagrams
    recv_buf: Mutex<Vec<u8>>,
}

impl MulticastTransport {
    /// Create both sockets. Must be called inside a tokio runtime.
    pub async fn bind(config: &NodeConfig) -> Result<Self, TransportError> {
        let recv_socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        recv_socket.set_reuse_address(true)?;
        #[cfg(unix)]
        recv_socket.set_reuse_port(true)?;
        recv_socket.set_nonblocking(true)?;
        recv_socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port)).into())?;

        let send_socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        send_socket.set_multicast_loop_v4(config.multicast_loop)?;
        send_socket.set_multicast_ttl_v4(1)?;
        send_socket.set_nonblocking(true)?;
        send_socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)).into())?;

        let recv_socket = UdpSocket::from_std(recv_socket.into())?;
        let send_socket = UdpSocket::from_std(send_socket.into())?;

        tracing::info!(
            "Multicast transport bound to {} (group {})",
            recv_socket.local_addr()?,
            config.group_addr()
        );

        Ok(Self {
            recv_socket,
            send_socket,
            group: config.group_addr(),
            max_datagram_size: config.max_datagram_size,
            recv_buf: Mutex::new(vec![0u8; config.max_datagram_size]),
        })
    }

    /// Local address of the receive socket
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.recv_socket.local_addr()?)
    }
}

#[async_trait]
impl Transport for MulticastTransport {
    fn join_all_interfaces(&self) -> usize {
        let interfaces = match get_if_addrs::get_if_addrs() {
            Ok(interfaces) => interfaces,
            Err(e) => {
                tracing::warn!("Failed to enumerate network interfaces: {}", e);
                return 0;
            }
        };

        let joined = join_interfaces(&self.recv_socket, *self.group.ip(), interfaces);
        if joined == 0 {
            tracing::warn!("Group {} not joined on any interface", self.group);
        }
        joined
    }

    async fn send(&self, datagram: &[u8]) -> Result<(), TransportError> {
        if datagram.len() > self.max_datagram_size {
            return Err(TransportError::Oversized {
                len: datagram.len(),
                max: self.max_datagram_size,
            });
        }
        self.send_socket.send_to(datagram, self.group).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        // Datagrams beyond the buffer are truncated by the kernel and then
        // fail to decode.
        let mut buf = self.recv_buf.lock().await;
        let (len, from) = self.recv_socket.recv_from(&mut buf[..]).await?;
        tracing::trace!("Received {} bytes from {}", len, from);
        Ok(buf[..len].to_vec())
    }
}

/// Join `group` on every IPv4 interface in `interfaces`
fn join_interfaces(
    socket: &UdpSocket,
    group: Ipv4Addr,
    interfaces: impl IntoIterator<Item = Interface>,
) -> usize {
    let mut joined = 0;

    for iface in interfaces {
        let addr = match iface.addr {
            IfAddr::V4(ref v4) => v4.ip,
            IfAddr::V6(_) => {
                tracing::debug!("Skipping IPv6 address on interface {}", iface.name);
                continue;
            }
        };

        match socket.join_multicast_v4(group, addr) {
            Ok(()) => {
                tracing::info!("Joined group {} on {} ({})", group, iface.name, addr);
                joined += 1;
            }
            Err(source) => {
                let err = TransportError::Join {
                    interface: iface.name.clone(),
                    source,
                };
                tracing::warn!("{}", err);
            }
        }
    }

    joined
}
