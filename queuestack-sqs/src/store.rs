//! Per-queue message store
//!
//! Messages are kept in enqueue order keyed by a per-queue sequence number.
//! A message is either available or in flight; deleted and expired
//! messages are removed outright. In-flight messages are also indexed by
//! their visibility deadline so expiry never has to scan the whole queue.

use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::error::SqsError;
use crate::fifo::FifoSequencer;
use crate::receipt::ReceiptHandle;
use crate::types::{MessageAttributes, MessageView, QueueMetrics, ReceivedMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MessageState {
    Available,
    InFlight { visible_at: i64 },
}

#[derive(Debug)]
struct StoredMessage {
    message_id: String,
    sequence: u64,
    body: Bytes,
    md5_of_body: String,
    attributes: MessageAttributes,
    group_id: Option<String>,
    deduplication_id: Option<String>,
    enqueued_at: i64,
    state: MessageState,
    /// Bumped on every checkout; receipt handles must match it
    version: u64,
    receive_count: u32,
    first_received_at: Option<i64>,
}

impl StoredMessage {
    fn view(&self, fifo: bool) -> MessageView {
        MessageView {
            message_id: self.message_id.clone(),
            body: self.body.clone(),
            md5_of_body: self.md5_of_body.clone(),
            attributes: self.attributes.clone(),
            sent_timestamp: self.enqueued_at,
            receive_count: self.receive_count,
            first_receive_timestamp: self.first_received_at,
            group_id: self.group_id.clone(),
            deduplication_id: self.deduplication_id.clone(),
            sequence_number: fifo.then_some(self.sequence),
        }
    }
}

/// A validated message ready to be stored
#[derive(Debug)]
pub(crate) struct NewMessage {
    pub body: Bytes,
    pub md5_of_body: String,
    pub attributes: MessageAttributes,
    pub group_id: Option<String>,
    pub deduplication_id: Option<String>,
}

#[derive(Debug)]
pub(crate) struct MessageStore {
    queue_id: String,
    messages: BTreeMap<u64, StoredMessage>,
    index: HashMap<String, u64>,
    /// (visible_at, sequence) for every in-flight message
    deadlines: BTreeSet<(i64, u64)>,
    next_sequence: u64,
    fifo: Option<FifoSequencer>,
}

impl MessageStore {
    pub fn new(queue_id: impl Into<String>, fifo: Option<FifoSequencer>) -> Self {
        Self {
            queue_id: queue_id.into(),
            messages: BTreeMap::new(),
            index: HashMap::new(),
            deadlines: BTreeSet::new(),
            next_sequence: 1,
            fifo,
        }
    }

    pub fn sequencer_mut(&mut self) -> Option<&mut FifoSequencer> {
        self.fifo.as_mut()
    }

    pub fn sequence_of(&self, message_id: &str) -> Option<u64> {
        self.index.get(message_id).copied()
    }

    pub fn enqueue(&mut self, message_id: String, message: NewMessage, now: i64) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        self.index.insert(message_id.clone(), sequence);
        self.messages.insert(
            sequence,
            StoredMessage {
                message_id,
                sequence,
                body: message.body,
                md5_of_body: message.md5_of_body,
                attributes: message.attributes,
                group_id: message.group_id,
                deduplication_id: message.deduplication_id,
                enqueued_at: now,
                state: MessageState::Available,
                version: 0,
                receive_count: 0,
                first_received_at: None,
            },
        );
        sequence
    }

    /// Oldest available messages that may be handed out right now. For FIFO
    /// queues at most one per group, and none from a group that already has
    /// a message in flight.
    fn deliverable(&self, max: usize) -> Vec<u64> {
        let mut picked = Vec::new();
        let mut groups: HashSet<&str> = HashSet::new();

        for (&sequence, message) in &self.messages {
            if picked.len() >= max {
                break;
            }
            if message.state != MessageState::Available {
                continue;
            }
            if let (Some(fifo), Some(group)) = (&self.fifo, message.group_id.as_deref()) {
                if fifo.is_checked_out(group) || !groups.insert(group) {
                    continue;
                }
            }
            picked.push(sequence);
        }
        picked
    }

    /// Check out up to `max` messages, hiding each for `visibility_ms`.
    pub fn receive(&mut self, max: usize, visibility_ms: i64, now: i64) -> Vec<ReceivedMessage> {
        self.return_expired(now);

        let fifo_queue = self.fifo.is_some();
        let picked = self.deliverable(max);
        let mut received = Vec::with_capacity(picked.len());

        for sequence in picked {
            let Some(message) = self.messages.get_mut(&sequence) else {
                continue;
            };

            let visible_at = now + visibility_ms;
            message.state = MessageState::InFlight { visible_at };
            message.version += 1;
            message.receive_count += 1;
            message.first_received_at.get_or_insert(now);
            self.deadlines.insert((visible_at, sequence));

            if let (Some(fifo), Some(group)) = (self.fifo.as_mut(), message.group_id.as_deref()) {
                fifo.check_out(group, &message.message_id);
            }

            let handle = ReceiptHandle::new(&self.queue_id, &message.message_id, message.version);
            received.push(ReceivedMessage {
                message: message.view(fifo_queue),
                receipt_handle: handle.encode(),
            });
        }
        received
    }

    /// Deliverable messages, without checking them out.
    pub fn peek(&mut self, max: usize, now: i64) -> Vec<MessageView> {
        self.return_expired(now);

        let fifo_queue = self.fifo.is_some();
        self.deliverable(max)
            .into_iter()
            .filter_map(|sequence| self.messages.get(&sequence))
            .map(|message| message.view(fifo_queue))
            .collect()
    }

    /// Delete the message `handle` was issued for, provided no later
    /// receive has superseded it. Returns the deleted message id.
    pub fn delete(&mut self, handle: &ReceiptHandle) -> Result<String, SqsError> {
        let invalid = || SqsError::InvalidReceiptHandle(handle.encode());

        if handle.queue_id != self.queue_id || handle.version == 0 {
            return Err(invalid());
        }
        let sequence = self.sequence_of(&handle.message_id).ok_or_else(invalid)?;
        let current = self.messages.get(&sequence).map(|m| m.version);
        if current != Some(handle.version) {
            return Err(invalid());
        }

        self.remove(sequence);
        Ok(handle.message_id.clone())
    }

    /// InFlight -> Available once the visibility deadline has passed. A
    /// no-op for anything else (already deleted, re-received, not yet due).
    pub fn return_to_available(&mut self, message_id: &str, now: i64) -> bool {
        let Some(sequence) = self.sequence_of(message_id) else {
            return false;
        };
        let Some(message) = self.messages.get_mut(&sequence) else {
            return false;
        };
        let MessageState::InFlight { visible_at } = message.state else {
            return false;
        };
        if visible_at > now {
            return false;
        }

        message.state = MessageState::Available;
        self.deadlines.remove(&(visible_at, sequence));
        if let (Some(fifo), Some(group)) = (self.fifo.as_mut(), message.group_id.as_deref()) {
            fifo.release(group, &message.message_id);
        }
        true
    }

    pub fn return_expired(&mut self, now: i64) -> usize {
        let due: Vec<String> = self
            .deadlines
            .iter()
            .take_while(|(visible_at, _)| *visible_at <= now)
            .filter_map(|(_, sequence)| self.messages.get(sequence))
            .map(|message| message.message_id.clone())
            .collect();

        let mut returned = 0;
        for message_id in &due {
            if self.return_to_available(message_id, now) {
                returned += 1;
            }
        }
        returned
    }

    /// Remove every message enqueued more than `retention_ms` ago,
    /// whatever its state.
    pub fn purge_retained(&mut self, retention_ms: i64, now: i64) -> usize {
        let expired: Vec<u64> = self
            .messages
            .iter()
            .filter(|(_, message)| message.enqueued_at + retention_ms <= now)
            .map(|(&sequence, _)| sequence)
            .collect();

        for &sequence in &expired {
            self.remove(sequence);
        }
        expired.len()
    }

    pub fn purge_dedup(&mut self, now: i64) -> usize {
        self.fifo.as_mut().map_or(0, |fifo| fifo.purge_expired(now))
    }

    pub fn counts(&self) -> QueueMetrics {
        let total = self.messages.len();
        let in_flight = self.deadlines.len();
        QueueMetrics {
            visible: total - in_flight,
            in_flight,
            total,
        }
    }

    fn remove(&mut self, sequence: u64) -> Option<StoredMessage> {
        let message = self.messages.remove(&sequence)?;
        self.index.remove(&message.message_id);

        if let MessageState::InFlight { visible_at } = message.state {
            self.deadlines.remove(&(visible_at, sequence));
            if let (Some(fifo), Some(group)) = (self.fifo.as_mut(), message.group_id.as_deref()) {
                fifo.release(group, &message.message_id);
            }
        }
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_000_000;
    const VISIBILITY: i64 = 30_000;

    fn message(body: &str, group: Option<&str>) -> NewMessage {
        NewMessage {
            body: Bytes::from(body.to_string()),
            md5_of_body: String::new(),
            attributes: MessageAttributes::new(),
            group_id: group.map(str::to_string),
            deduplication_id: None,
        }
    }

    fn standard() -> MessageStore {
        MessageStore::new("queue-1", None)
    }

    fn fifo() -> MessageStore {
        MessageStore::new("queue-1", Some(FifoSequencer::new(300_000)))
    }

    fn bodies(received: &[ReceivedMessage]) -> Vec<&[u8]> {
        received.iter().map(ReceivedMessage::body).collect()
    }

    fn handle(received: &ReceivedMessage) -> ReceiptHandle {
        ReceiptHandle::decode(&received.receipt_handle).unwrap()
    }

    #[test]
    fn test_receive_oldest_first() {
        let mut store = standard();
        store.enqueue("m-1".into(), message("a", None), NOW);
        store.enqueue("m-2".into(), message("b", None), NOW);
        store.enqueue("m-3".into(), message("c", None), NOW);

        let received = store.receive(2, VISIBILITY, NOW);
        assert_eq!(bodies(&received), vec![b"a".as_slice(), b"b".as_slice()]);

        let rest = store.receive(10, VISIBILITY, NOW);
        assert_eq!(bodies(&rest), vec![b"c".as_slice()]);
        assert!(store.receive(10, VISIBILITY, NOW).is_empty());
    }

    #[test]
    fn test_receive_sets_metadata() {
        let mut store = standard();
        store.enqueue("m-1".into(), message("a", None), NOW);

        let received = store.receive(1, VISIBILITY, NOW + 5);
        let view = &received[0].message;
        assert_eq!(view.receive_count, 1);
        assert_eq!(view.first_receive_timestamp, Some(NOW + 5));
        assert_eq!(view.sent_timestamp, NOW);
        assert_eq!(view.sequence_number, None);
        assert_eq!(handle(&received[0]).version, 1);
    }

    #[test]
    fn test_redelivery_after_visibility_timeout() {
        let mut store = standard();
        store.enqueue("m-1".into(), message("a", None), NOW);

        let first = store.receive(1, VISIBILITY, NOW);
        assert!(store.receive(1, VISIBILITY, NOW + VISIBILITY - 1).is_empty());

        let second = store.receive(1, VISIBILITY, NOW + VISIBILITY);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].message.receive_count, 2);
        assert_eq!(second[0].message.first_receive_timestamp, Some(NOW));
        assert_ne!(first[0].receipt_handle, second[0].receipt_handle);
    }

    #[test]
    fn test_delete_with_current_handle() {
        let mut store = standard();
        store.enqueue("m-1".into(), message("a", None), NOW);
        let received = store.receive(1, VISIBILITY, NOW);

        assert_eq!(store.delete(&handle(&received[0])).unwrap(), "m-1");
        assert_eq!(store.counts(), QueueMetrics::default());

        // second delete with the same handle fails, message is gone
        assert!(matches!(
            store.delete(&handle(&received[0])),
            Err(SqsError::InvalidReceiptHandle(_))
        ));
    }

    #[test]
    fn test_delete_with_superseded_handle() {
        let mut store = standard();
        store.enqueue("m-1".into(), message("a", None), NOW);
        let stale = store.receive(1, VISIBILITY, NOW);
        let fresh = store.receive(1, VISIBILITY, NOW + VISIBILITY);

        assert!(matches!(
            store.delete(&handle(&stale[0])),
            Err(SqsError::InvalidReceiptHandle(_))
        ));
        assert_eq!(store.counts().total, 1);

        store.delete(&handle(&fresh[0])).unwrap();
        assert_eq!(store.counts().total, 0);
    }

    #[test]
    fn test_delete_after_timeout_without_new_receive() {
        let mut store = standard();
        store.enqueue("m-1".into(), message("a", None), NOW);
        let received = store.receive(1, VISIBILITY, NOW);

        assert_eq!(store.return_expired(NOW + VISIBILITY), 1);
        store.delete(&handle(&received[0])).unwrap();
        assert_eq!(store.counts().total, 0);
    }

    #[test]
    fn test_delete_rejects_foreign_and_unreceived_handles() {
        let mut store = standard();
        store.enqueue("m-1".into(), message("a", None), NOW);

        let never_issued = ReceiptHandle::new("queue-1", "m-1", 0);
        assert!(store.delete(&never_issued).is_err());

        store.receive(1, VISIBILITY, NOW);
        let other_queue = ReceiptHandle::new("queue-2", "m-1", 1);
        assert!(store.delete(&other_queue).is_err());
        assert_eq!(store.counts().in_flight, 1);
    }

    #[test]
    fn test_return_to_available_guards() {
        let mut store = standard();
        store.enqueue("m-1".into(), message("a", None), NOW);

        // not in flight
        assert!(!store.return_to_available("m-1", NOW));
        assert!(!store.return_to_available("missing", NOW));

        store.receive(1, VISIBILITY, NOW);
        // not yet due
        assert!(!store.return_to_available("m-1", NOW + 1));
        assert!(store.return_to_available("m-1", NOW + VISIBILITY));
        // already returned
        assert!(!store.return_to_available("m-1", NOW + VISIBILITY));
        assert_eq!(store.counts().visible, 1);
    }

    #[test]
    fn test_zero_visibility_is_immediately_redeliverable() {
        let mut store = standard();
        store.enqueue("m-1".into(), message("a", None), NOW);

        assert_eq!(store.receive(1, 0, NOW).len(), 1);
        let again = store.receive(1, 0, NOW);
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].message.receive_count, 2);
    }

    #[test]
    fn test_peek_does_not_check_out() {
        let mut store = standard();
        store.enqueue("m-1".into(), message("a", None), NOW);
        store.enqueue("m-2".into(), message("b", None), NOW);

        let peeked = store.peek(10, NOW);
        assert_eq!(peeked.len(), 2);
        assert_eq!(peeked[0].receive_count, 0);
        assert_eq!(store.counts().visible, 2);

        let received = store.receive(10, VISIBILITY, NOW);
        assert_eq!(received.len(), 2);
        assert!(store.peek(10, NOW).is_empty());
    }

    #[test]
    fn test_counts() {
        let mut store = standard();
        store.enqueue("m-1".into(), message("a", None), NOW);
        store.enqueue("m-2".into(), message("b", None), NOW);
        store.receive(1, VISIBILITY, NOW);

        assert_eq!(
            store.counts(),
            QueueMetrics {
                visible: 1,
                in_flight: 1,
                total: 2
            }
        );
    }

    #[test]
    fn test_purge_retained_any_state() {
        let mut store = standard();
        store.enqueue("m-1".into(), message("old", None), NOW);
        store.enqueue("m-2".into(), message("old-in-flight", None), NOW);
        store.enqueue("m-3".into(), message("young", None), NOW + 10_000);
        store.receive(2, VISIBILITY, NOW);

        assert_eq!(store.purge_retained(60_000, NOW + 60_000), 2);
        assert_eq!(
            store.counts(),
            QueueMetrics {
                visible: 1,
                in_flight: 0,
                total: 1
            }
        );
        assert_eq!(store.sequence_of("m-1"), None);
    }

    #[test]
    fn test_fifo_one_message_per_group() {
        let mut store = fifo();
        store.enqueue("m-1".into(), message("A", Some("g1")), NOW);
        store.enqueue("m-2".into(), message("B", Some("g1")), NOW);
        store.enqueue("m-3".into(), message("X", Some("g2")), NOW);

        let first = store.receive(10, VISIBILITY, NOW);
        assert_eq!(bodies(&first), vec![b"A".as_slice(), b"X".as_slice()]);
        assert_eq!(first[0].message.sequence_number, Some(1));

        // both groups are checked out
        assert!(store.receive(10, VISIBILITY, NOW).is_empty());

        store.delete(&handle(&first[0])).unwrap();
        let next = store.receive(10, VISIBILITY, NOW);
        assert_eq!(bodies(&next), vec![b"B".as_slice()]);
    }

    #[test]
    fn test_fifo_timeout_redelivers_head_of_group() {
        let mut store = fifo();
        store.enqueue("m-1".into(), message("A", Some("g1")), NOW);
        store.enqueue("m-2".into(), message("B", Some("g1")), NOW);

        store.receive(10, VISIBILITY, NOW);
        let again = store.receive(10, VISIBILITY, NOW + VISIBILITY);
        assert_eq!(bodies(&again), vec![b"A".as_slice()]);
    }

    #[test]
    fn test_fifo_purge_releases_group() {
        let mut store = fifo();
        store.enqueue("m-1".into(), message("A", Some("g1")), NOW);
        store.enqueue("m-2".into(), message("B", Some("g1")), NOW + 30_000);
        store.receive(1, 600_000, NOW);

        assert_eq!(store.purge_retained(60_000, NOW + 60_000), 1);
        let next = store.receive(10, VISIBILITY, NOW + 60_000);
        assert_eq!(bodies(&next), vec![b"B".as_slice()]);
    }
}
