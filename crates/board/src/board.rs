//! In-memory replicated log using DashMap for concurrent access

use dashmap::DashMap;
use mcast_protocol::{Version, VersionedMessage};
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Thread-safe replicated log
///
/// Every operation is atomic on its own; callers never hold a lock across
/// two calls. Entries are never removed, so a version present once stays
/// present for the life of the process.
#[derive(Clone, Default)]
pub struct Board {
    /// Messages grouped by version
    messages: Arc<DashMap<Version, HashSet<VersionedMessage>>>,
    /// Greatest version observed by any means
    high_water_mark: Arc<AtomicU64>,
}

impl Board {
    /// Create a new empty board
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `version` exists somewhere in the group
    pub fn observe(&self, version: Version) {
        let prev = self.high_water_mark.fetch_max(version, Ordering::SeqCst);
        if version > prev.saturating_add(1) {
            tracing::trace!("Observed version {} past high-water-mark {}", version, prev);
        }
    }

    /// Admit a message into the log
    ///
    /// Returns `false` if this exact message is already stored, in which case
    /// the caller must not process it again.
    pub fn try_insert(&self, msg: VersionedMessage) -> bool {
        // Raise the mark before the entry becomes visible so readers never
        // see a stored version above it.
        self.observe(msg.version);
        self.messages.entry(msg.version).or_default().insert(msg)
    }

    /// Messages stored at `version` (empty if none)
    pub fn lookup(&self, version: Version) -> HashSet<VersionedMessage> {
        self.messages
            .get(&version)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    /// Snapshot of every stored message, ordered by version
    pub fn all_messages(&self) -> impl Iterator<Item = VersionedMessage> {
        let mut snapshot: Vec<(Version, Vec<VersionedMessage>)> = self
            .messages
            .iter()
            .map(|r| (*r.key(), r.value().iter().cloned().collect()))
            .collect();
        snapshot.sort_unstable_by_key(|(version, _)| *version);
        snapshot.into_iter().flat_map(|(_, msgs)| msgs)
    }

    /// Every version in `1..=high_water_mark` with no stored message
    pub fn missing_versions(&self) -> BTreeSet<Version> {
        self.missing_versions_limited(usize::MAX)
    }

    /// The lowest `limit` missing versions
    pub fn missing_versions_limited(&self, limit: usize) -> BTreeSet<Version> {
        let hwm = self.high_water_mark();
        (1..=hwm)
            .filter(|v| !self.messages.contains_key(v))
            .take(limit)
            .collect()
    }

    /// Check whether there is any gap below the high-water-mark
    pub fn has_gaps(&self) -> bool {
        !self.missing_versions_limited(1).is_empty()
    }

    /// Greatest version observed so far
    pub fn high_water_mark(&self) -> Version {
        self.high_water_mark.load(Ordering::SeqCst)
    }

    /// Version a locally originated message should carry
    pub fn next_version(&self) -> Version {
        self.high_water_mark().saturating_add(1)
    }

    /// Check whether this exact message is stored
    pub fn contains(&self, msg: &VersionedMessage) -> bool {
        self.messages
            .get(&msg.version)
            .map(|r| r.value().contains(msg))
            .unwrap_or(false)
    }

    /// Number of distinct versions stored
    pub fn version_count(&self) -> usize {
        self.messages.len()
    }

    /// Total number of stored messages
    pub fn len(&self) -> usize {
        self.messages.iter().map(|r| r.value().len()).sum()
    }

    /// Check if the board is empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(version: Version, payload: &str) -> VersionedMessage {
        VersionedMessage::new(version, payload.as_bytes().to_vec())
    }

    #[test]
    fn test_insert_is_idempotent() {
        let board = Board::new();
        let m = msg(1, "a");

        assert!(board.try_insert(m.clone()));
        assert!(!board.try_insert(m.clone()));
        assert!(!board.try_insert(m.clone()));

        assert_eq!(board.lookup(1).len(), 1);
        assert_eq!(board.len(), 1);
        assert!(board.contains(&m));
    }

    #[test]
    fn test_same_version_different_payloads() {
        let board = Board::new();

        assert!(board.try_insert(msg(3, "a")));
        assert!(board.try_insert(msg(3, "b")));

        let at_three = board.lookup(3);
        assert_eq!(at_three.len(), 2);
        assert!(at_three.contains(&msg(3, "a")));
        assert!(at_three.contains(&msg(3, "b")));
        assert_eq!(board.version_count(), 1);
        assert_eq!(board.len(), 2);
    }

    #[test]
    fn test_lookup_missing_version() {
        let board = Board::new();
        assert!(board.lookup(10).is_empty());
    }

    #[test]
    fn test_high_water_mark_is_monotonic() {
        let board = Board::new();

        board.observe(5);
        board.try_insert(msg(2, "x"));
        board.observe(3);
        board.try_insert(msg(9, "y"));
        board.observe(7);

        assert_eq!(board.high_water_mark(), 9);
        assert_eq!(board.next_version(), 10);
    }

    #[test]
    fn test_observe_does_not_store() {
        let board = Board::new();
        board.observe(4);

        assert_eq!(board.high_water_mark(), 4);
        assert!(board.is_empty());
        assert_eq!(board.missing_versions(), BTreeSet::from([1, 2, 3, 4]));
    }

    #[test]
    fn test_missing_versions() {
        let board = Board::new();
        board.try_insert(msg(1, "a"));
        board.try_insert(msg(2, "b"));
        board.try_insert(msg(4, "d"));
        board.observe(5);

        assert_eq!(board.missing_versions(), BTreeSet::from([3, 5]));
        assert!(board.has_gaps());

        board.try_insert(msg(3, "c"));
        board.try_insert(msg(5, "e"));
        assert!(board.missing_versions().is_empty());
        assert!(!board.has_gaps());
    }

    #[test]
    fn test_missing_versions_limited() {
        let board = Board::new();
        board.try_insert(msg(2, "b"));
        board.observe(10);

        let lowest = board.missing_versions_limited(3);
        assert_eq!(lowest, BTreeSet::from([1, 3, 4]));
    }

    #[test]
    fn test_version_zero_is_never_missing() {
        let board = Board::new();
        board.try_insert(msg(0, "genesis"));

        assert_eq!(board.high_water_mark(), 0);
        assert!(board.missing_versions().is_empty());
        assert_eq!(board.lookup(0).len(), 1);
    }

    #[test]
    fn test_all_messages_returns_everything() {
        let board = Board::new();
        board.try_insert(msg(3, "c"));
        board.try_insert(msg(1, "a"));
        board.try_insert(msg(3, "c2"));

        let all: Vec<_> = board.all_messages().collect();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0], msg(1, "a"));
        assert!(all[1..].contains(&msg(3, "c")));
        assert!(all[1..].contains(&msg(3, "c2")));
    }

    #[test]
    fn test_concurrent_inserts_admit_once() {
        let board = Board::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let board = board.clone();
                std::thread::spawn(move || {
                    (1..=100u64)
                        .filter(|v| board.try_insert(msg(*v, "same")))
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
        assert_eq!(board.high_water_mark(), 100);
        assert!(board.missing_versions().is_empty());
    }
}
