//! Outgoing message queue shared by the node's activities

use indexmap::IndexSet;
use mcast_protocol::Message;
use parking_lot::Mutex;

/// Insertion-ordered set of messages waiting to be broadcast
///
/// Queuing a message that is already waiting is a no-op, so repeated repair
/// requests and repeated replies collapse into one datagram.
#[derive(Default)]
pub struct SendQueue {
    pending: Mutex<IndexSet<Message>>,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message. Returns `false` if it was already queued.
    pub fn push(&self, msg: Message) -> bool {
        self.pending.lock().insert(msg)
    }

    /// Take the earliest queued message
    pub fn pop_front(&self) -> Option<Message> {
        self.pending.lock().shift_remove_index(0)
    }

    /// Drop a queued message. Returns `true` if it was present.
    pub fn remove(&self, msg: &Message) -> bool {
        self.pending.lock().shift_remove(msg)
    }

    pub fn contains(&self, msg: &Message) -> bool {
        self.pending.lock().contains(msg)
    }

    /// Copy of the queue in transmission order
    pub fn snapshot(&self) -> Vec<Message> {
        self.pending.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcast_protocol::VersionedMessage;

    fn versioned(version: u64) -> Message {
        Message::Versioned(VersionedMessage::new(version, vec![version as u8]))
    }

    #[test]
    fn test_push_dedup() {
        let queue = SendQueue::new();
        assert!(queue.push(versioned(1)));
        assert!(!queue.push(versioned(1)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_pop_in_insertion_order() {
        let queue = SendQueue::new();
        queue.push(versioned(3));
        queue.push(Message::GetAll);
        queue.push(versioned(1));
        queue.push(Message::GetAll);

        assert_eq!(queue.pop_front(), Some(versioned(3)));
        assert_eq!(queue.pop_front(), Some(Message::GetAll));
        assert_eq!(queue.pop_front(), Some(versioned(1)));
        assert_eq!(queue.pop_front(), None);
    }

    #[test]
    fn test_remove_keeps_order() {
        let queue = SendQueue::new();
        queue.push(versioned(1));
        queue.push(versioned(2));
        queue.push(versioned(3));

        assert!(queue.remove(&versioned(2)));
        assert!(!queue.remove(&versioned(2)));
        assert_eq!(queue.snapshot(), vec![versioned(1), versioned(3)]);
    }

    #[test]
    fn test_requeue_after_pop() {
        let queue = SendQueue::new();
        queue.push(Message::GetAll);
        queue.pop_front();

        assert!(queue.is_empty());
        assert!(queue.push(Message::GetAll));
    }
}
