//! In-process broadcast domain

use super::Transport;
use crate::error::TransportError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

type DropFilter = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// A simulated multicast group
///
/// Every datagram sent by any endpoint is delivered to every endpoint,
/// including the sender, like a multicast socket with loopback enabled.
#[derive(Clone)]
pub struct MemoryNetwork {
    tx: broadcast::Sender<Arc<Vec<u8>>>,
    endpoints: Arc<AtomicUsize>,
}

impl MemoryNetwork {
    /// Create a network buffering up to `capacity` datagrams per endpoint
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            endpoints: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Attach a new endpoint. It hears every datagram sent from now on.
    pub fn endpoint(&self) -> MemoryTransport {
        let id = self.endpoints.fetch_add(1, Ordering::SeqCst);
        MemoryTransport {
            id,
            tx: self.tx.clone(),
            rx: Mutex::new(self.tx.subscribe()),
            drop_filter: RwLock::new(None),
        }
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new(4096)
    }
}

/// One endpoint on a [`MemoryNetwork`]
pub struct MemoryTransport {
    id: usize,
    tx: broadcast::Sender<Arc<Vec<u8>>>,
    rx: Mutex<broadcast::Receiver<Arc<Vec<u8>>>>,
    drop_filter: RwLock<Option<DropFilter>>,
}

impl MemoryTransport {
    /// Discard incoming datagrams for which `filter` returns `true`
    pub fn set_drop_filter(&self, filter: impl Fn(&[u8]) -> bool + Send + Sync + 'static) {
        *self.drop_filter.write() = Some(Arc::new(filter));
    }

    /// Deliver everything again
    pub fn clear_drop_filter(&self) {
        *self.drop_filter.write() = None;
    }

    fn should_drop(&self, datagram: &[u8]) -> bool {
        self.drop_filter
            .read()
            .as_ref()
            .map(|filter| filter(datagram))
            .unwrap_or(false)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn join_all_interfaces(&self) -> usize {
        tracing::info!("Memory endpoint {} joined", self.id);
        1
    }

    async fn send(&self, datagram: &[u8]) -> Result<(), TransportError> {
        // No receivers is not an error on a broadcast medium
        let _ = self.tx.send(Arc::new(datagram.to_vec()));
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let mut rx = self.rx.lock().await;
        loop {
            match rx.recv().await {
                Ok(datagram) => {
                    if self.should_drop(&datagram) {
                        tracing::trace!("Endpoint {} dropped {} bytes", self.id, datagram.len());
                        continue;
                    }
                    return Ok(datagram.to_vec());
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Endpoint {} lagged {} datagrams", self.id, n);
                }
                Err(broadcast::error::RecvError::Closed) => return Err(TransportError::Closed),
            }
        }
    }
}
