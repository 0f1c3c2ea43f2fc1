//! Replicating node - receive, send-pump and gap-repair activities

use crate::config::NodeConfig;
use crate::error::{NodeError, TransportError};
use crate::queue::SendQueue;
use crate::transport::{MulticastTransport, Transport};
use mcast_board::Board;
use mcast_protocol::{Message, VersionedMessage};
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Callback invoked once per newly admitted versioned message
pub type VersionedCallback = Arc<dyn Fn(VersionedMessage) + Send + Sync>;

/// Lifecycle of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Constructed, sockets bound, group not joined
    Created,
    /// Group joined, activities not yet running
    Joined,
    /// All three activities running
    Running,
}

/// Snapshot of node counters and log shape
#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeStats {
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub malformed_dropped: u64,
    pub duplicates_ignored: u64,
    pub messages_delivered: u64,
    pub repair_requests_sent: u64,
    pub cancelled_sends: u64,
    pub transport_faults: u64,
    pub high_water_mark: u64,
    pub stored_versions: usize,
    /// Capped at `max_repair_batch`
    pub missing_versions: usize,
    pub queued: usize,
}

#[derive(Default)]
struct Counters {
    datagrams_sent: AtomicU64,
    datagrams_received: AtomicU64,
    malformed_dropped: AtomicU64,
    duplicates_ignored: AtomicU64,
    messages_delivered: AtomicU64,
    repair_requests_sent: AtomicU64,
    cancelled_sends: AtomicU64,
    transport_faults: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// State shared by the caller and the three activities
struct Shared {
    board: Board,
    queue: SendQueue,
    on_versioned: VersionedCallback,
    counters: Counters,
    config: NodeConfig,
}

impl Shared {
    fn send_message(&self, msg: Message) {
        if let Message::Versioned(ref versioned) = msg {
            self.board.observe(versioned.version);
        }
        self.queue.push(msg);
    }

    fn handle(&self, msg: Message) {
        if let Message::Versioned(ref versioned) = msg {
            if !self.board.try_insert(versioned.clone()) {
                bump(&self.counters.duplicates_ignored);
                return;
            }
        }

        tracing::trace!("--> {:?}", msg);

        // Someone else already put this exact message on the wire
        if self.queue.remove(&msg) {
            bump(&self.counters.cancelled_sends);
            tracing::trace!("Cancelled queued {} message", msg.kind());
        }

        match msg {
            Message::GetSome { versions } => {
                for version in versions {
                    for found in self.board.lookup(version) {
                        self.send_message(Message::Versioned(found));
                    }
                }
            }
            Message::GetAll => {
                for stored in self.board.all_messages() {
                    self.send_message(Message::Versioned(stored));
                }
            }
            Message::Versioned(versioned) => {
                bump(&self.counters.messages_delivered);
                (self.on_versioned)(versioned);
            }
        }
    }
}

/// A peer replicating the versioned log over a multicast group
pub struct Node {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    state: Mutex<NodeState>,
}

impl Node {
    /// Create a node over an existing transport
    pub fn new(
        config: NodeConfig,
        transport: Arc<dyn Transport>,
        on_versioned: VersionedCallback,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                board: Board::new(),
                queue: SendQueue::new(),
                on_versioned,
                counters: Counters::default(),
                config,
            }),
            transport,
            state: Mutex::new(NodeState::Created),
        }
    }

    /// Queue a message for broadcast. Never blocks.
    ///
    /// A versioned message raises the high-water-mark immediately, before it
    /// is transmitted.
    pub fn send_message(&self, msg: Message) {
        self.shared.send_message(msg);
    }

    /// Stamp `payload` with the next version and queue it
    pub fn originate(&self, payload: impl Into<Vec<u8>>) -> VersionedMessage {
        let msg = VersionedMessage::new(self.shared.board.next_version(), payload);
        self.send_message(Message::Versioned(msg.clone()));
        msg
    }

    /// Join the group, request the group's log and launch the activities.
    ///
    /// Must be called inside a tokio runtime. Outside one it fails with
    /// [`NodeError::NoRuntime`] and the node stays `Created`.
    pub fn start(&self) -> Result<NodeHandle, NodeError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| NodeError::NoRuntime)?;

        {
            let mut state = self.state.lock();
            if *state != NodeState::Created {
                return Err(NodeError::AlreadyStarted);
            }

            let joined = self.transport.join_all_interfaces();
            tracing::info!("Node joined group on {} interface(s)", joined);
            *state = NodeState::Joined;
        }

        self.send_message(Message::GetAll);

        let receive = runtime.spawn(receive_loop(self.shared.clone(), self.transport.clone()));
        let send = runtime.spawn(send_loop(self.shared.clone(), self.transport.clone()));
        let repair = runtime.spawn(repair_loop(self.shared.clone()));

        *self.state.lock() = NodeState::Running;
        tracing::info!(
            "Node running (send every {}ms, repair every {}ms)",
            self.shared.config.send_interval_ms,
            self.shared.config.repair_interval_ms
        );

        Ok(NodeHandle {
            receive,
            send,
            repair,
        })
    }

    pub fn state(&self) -> NodeState {
        *self.state.lock()
    }

    /// The local replicated log
    pub fn board(&self) -> &Board {
        &self.shared.board
    }

    pub fn config(&self) -> &NodeConfig {
        &self.shared.config
    }

    /// Messages waiting to be broadcast, in transmission order
    pub fn queued(&self) -> Vec<Message> {
        self.shared.queue.snapshot()
    }

    /// Get current stats
    pub fn stats(&self) -> NodeStats {
        let c = &self.shared.counters;
        let board = &self.shared.board;
        NodeStats {
            datagrams_sent: c.datagrams_sent.load(Ordering::Relaxed),
            datagrams_received: c.datagrams_received.load(Ordering::Relaxed),
            malformed_dropped: c.malformed_dropped.load(Ordering::Relaxed),
            duplicates_ignored: c.duplicates_ignored.load(Ordering::Relaxed),
            messages_delivered: c.messages_delivered.load(Ordering::Relaxed),
            repair_requests_sent: c.repair_requests_sent.load(Ordering::Relaxed),
            cancelled_sends: c.cancelled_sends.load(Ordering::Relaxed),
            transport_faults: c.transport_faults.load(Ordering::Relaxed),
            high_water_mark: board.high_water_mark(),
            stored_versions: board.version_count(),
            missing_versions: board
                .missing_versions_limited(self.shared.config.max_repair_batch)
                .len(),
            queued: self.shared.queue.len(),
        }
    }

    /// Process one decoded message as if it had arrived from the group
    pub(crate) fn handle(&self, msg: Message) {
        self.shared.handle(msg);
    }
}

/// Handles to a running node's activities
///
/// The activities never stop on their own. Aborting exists for hosts that
/// tear a node down before process exit.
pub struct NodeHandle {
    receive: JoinHandle<()>,
    send: JoinHandle<()>,
    repair: JoinHandle<()>,
}

impl NodeHandle {
    pub fn abort(&self) {
        self.receive.abort();
        self.send.abort();
        self.repair.abort();
    }

    /// Check whether any activity has exited
    pub fn is_finished(&self) -> bool {
        self.receive.is_finished() || self.send.is_finished() || self.repair.is_finished()
    }
}

async fn receive_loop(shared: Arc<Shared>, transport: Arc<dyn Transport>) {
    loop {
        let datagram = match transport.recv().await {
            Ok(datagram) => datagram,
            Err(TransportError::Closed) => {
                tracing::warn!("Transport closed, receive loop exiting");
                return;
            }
            Err(e) => {
                bump(&shared.counters.transport_faults);
                tracing::warn!("Receive failed: {}", e);
                continue;
            }
        };
        bump(&shared.counters.datagrams_received);

        match Message::from_bytes(&datagram) {
            Ok(msg) => shared.handle(msg),
            Err(e) => {
                bump(&shared.counters.malformed_dropped);
                tracing::warn!("Dropping {} byte datagram: {}", datagram.len(), e);
            }
        }
    }
}

async fn send_loop(shared: Arc<Shared>, transport: Arc<dyn Transport>) {
    let pace = shared.config.send_interval();
    loop {
        if let Some(msg) = shared.queue.pop_front() {
            tracing::trace!("<-- {:?}", msg);
            let bytes = msg.to_bytes();
            match transport.send(&bytes).await {
                Ok(()) => bump(&shared.counters.datagrams_sent),
                Err(e) => {
                    bump(&shared.counters.transport_faults);
                    tracing::warn!("Failed to send {} message: {}", msg.kind(), e);
                }
            }
        }
        tokio::time::sleep(pace).await;
    }
}

async fn repair_loop(shared: Arc<Shared>) {
    // Jitter so peers that started together do not request in lockstep
    let period = {
        let base = shared.config.repair_interval_ms;
        let jitter = rand::thread_rng().gen_range(0..=base / 10);
        Duration::from_millis(base + jitter).max(Duration::from_millis(1))
    };
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        let missing = shared
            .board
            .missing_versions_limited(shared.config.max_repair_batch);
        if missing.is_empty() {
            continue;
        }

        tracing::debug!(
            "Requesting {} missing version(s), lowest {:?}",
            missing.len(),
            missing.first()
        );
        bump(&shared.counters.repair_requests_sent);
        shared.send_message(Message::GetSome {
            versions: missing.into_iter().collect(),
        });
    }
}

/// Builder for Node
pub struct NodeBuilder {
    config: NodeConfig,
    on_versioned: VersionedCallback,
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
            on_versioned: Arc::new(|_: VersionedMessage| {}),
        }
    }

    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn group(mut self, group: Ipv4Addr) -> Self {
        self.config.group = group;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn send_interval_ms(mut self, ms: u64) -> Self {
        self.config.send_interval_ms = ms;
        self
    }

    pub fn repair_interval_ms(mut self, ms: u64) -> Self {
        self.config.repair_interval_ms = ms;
        self
    }

    /// Set the delivery callback for new versioned messages
    pub fn on_versioned(
        mut self,
        callback: impl Fn(VersionedMessage) + Send + Sync + 'static,
    ) -> Self {
        self.on_versioned = Arc::new(callback);
        self
    }

    /// Build over a caller-supplied transport
    pub fn build(self, transport: Arc<dyn Transport>) -> Node {
        Node::new(self.config, transport, self.on_versioned)
    }

    /// Bind the multicast sockets and build
    pub async fn bind(self) -> Result<Node, TransportError> {
        let transport = MulticastTransport::bind(&self.config).await?;
        Ok(self.build(Arc::new(transport)))
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryNetwork;
    use parking_lot::Mutex as SyncMutex;

    fn recording_node() -> (Node, Arc<SyncMutex<Vec<VersionedMessage>>>) {
        let delivered = Arc::new(SyncMutex::new(Vec::new()));
        let sink = delivered.clone();
        let node = NodeBuilder::new()
            .on_versioned(move |msg| sink.lock().push(msg))
            .build(Arc::new(MemoryNetwork::default().endpoint()));
        (node, delivered)
    }

    fn versioned(version: u64, payload: &str) -> VersionedMessage {
        VersionedMessage::new(version, payload.as_bytes().to_vec())
    }

    #[test]
    fn test_send_message_observes_version() {
        let (node, _) = recording_node();
        node.send_message(Message::Versioned(versioned(9, "x")));

        assert_eq!(node.board().high_water_mark(), 9);
        assert!(node.board().is_empty());
        assert_eq!(node.queued().len(), 1);
    }

    #[test]
    fn test_send_message_dedup() {
        let (node, _) = recording_node();
        let msg = Message::Versioned(versioned(1, "x"));
        node.send_message(msg.clone());
        node.send_message(msg.clone());

        assert_eq!(node.queued(), vec![msg]);
    }

    #[test]
    fn test_originate_uses_next_version() {
        let (node, _) = recording_node();
        node.board().observe(4);

        let first = node.originate(b"a".to_vec());
        let second = node.originate(b"b".to_vec());

        assert_eq!(first.version, 5);
        assert_eq!(second.version, 6);
        assert_eq!(node.queued().len(), 2);
    }

    #[test]
    fn test_handle_delivers_once() {
        let (node, delivered) = recording_node();
        let msg = versioned(1, "hello");

        node.handle(Message::Versioned(msg.clone()));
        node.handle(Message::Versioned(msg.clone()));

        assert_eq!(*delivered.lock(), vec![msg]);
        assert_eq!(node.stats().duplicates_ignored, 1);
        assert_eq!(node.stats().messages_delivered, 1);
    }

    #[test]
    fn test_received_copy_cancels_queued_send() {
        let (node, delivered) = recording_node();
        let msg = Message::Versioned(versioned(7, "seven"));

        node.send_message(msg.clone());
        assert!(node.queued().contains(&msg));

        node.handle(msg.clone());

        assert!(!node.queued().contains(&msg));
        assert_eq!(delivered.lock().len(), 1);
        assert_eq!(node.stats().cancelled_sends, 1);
    }

    #[test]
    fn test_duplicate_does_not_cancel() {
        let (node, _) = recording_node();
        let msg = Message::Versioned(versioned(2, "two"));

        node.handle(msg.clone());
        // Queued again after admission, e.g. as a reply to GetAll
        node.send_message(msg.clone());
        node.handle(msg.clone());

        assert_eq!(node.queued(), vec![msg]);
    }

    #[test]
    fn test_get_some_replies_with_held_versions() {
        let (node, _) = recording_node();
        node.handle(Message::Versioned(versioned(1, "a")));
        node.handle(Message::Versioned(versioned(3, "c")));
        node.handle(Message::Versioned(versioned(3, "c2")));

        node.handle(Message::GetSome {
            versions: vec![2, 3],
        });

        let queued = node.queued();
        assert_eq!(queued.len(), 2);
        assert!(queued.contains(&Message::Versioned(versioned(3, "c"))));
        assert!(queued.contains(&Message::Versioned(versioned(3, "c2"))));
    }

    #[test]
    fn test_get_all_replays_log() {
        let (node, _) = recording_node();
        for v in 1..=3 {
            node.handle(Message::Versioned(versioned(v, "p")));
        }

        node.handle(Message::GetAll);

        assert_eq!(node.queued().len(), 3);
    }

    #[test]
    fn test_received_request_cancels_identical_queued_request() {
        let (node, _) = recording_node();
        node.send_message(Message::GetAll);

        node.handle(Message::GetAll);

        assert!(!node.queued().contains(&Message::GetAll));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (node, _) = recording_node();
        assert_eq!(node.state(), NodeState::Created);

        let handle = node.start().unwrap();
        assert_eq!(node.state(), NodeState::Running);
        assert!(matches!(node.start(), Err(NodeError::AlreadyStarted)));

        handle.abort();
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let (node, _) = recording_node();

        assert!(matches!(node.start(), Err(NodeError::NoRuntime)));
        assert_eq!(node.state(), NodeState::Created);
        assert!(node.queued().is_empty());
    }
}
