//! FIFO bookkeeping: deduplication records and per-group checkout
//!
//! Lives inside the owning queue's `MessageStore`, so every update here
//! happens under the same lock as the message transition it guards.

use std::collections::HashMap;

#[derive(Debug, Clone)]
struct DedupRecord {
    message_id: String,
    expires_at: i64,
}

/// Outcome of admitting a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Admission {
    pub message_id: String,
    pub duplicate: bool,
}

#[derive(Debug)]
pub(crate) struct FifoSequencer {
    window_ms: i64,
    dedup: HashMap<String, DedupRecord>,
    /// group -> message currently in flight for that group
    checked_out: HashMap<String, String>,
}

impl FifoSequencer {
    pub fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            dedup: HashMap::new(),
            checked_out: HashMap::new(),
        }
    }

    /// Claim `deduplication_id` for `candidate`, or return the message that
    /// already holds a live claim on it.
    pub fn admit(&mut self, deduplication_id: &str, candidate: &str, now: i64) -> Admission {
        if let Some(record) = self.dedup.get(deduplication_id) {
            if record.expires_at > now {
                return Admission {
                    message_id: record.message_id.clone(),
                    duplicate: true,
                };
            }
        }

        self.dedup.insert(
            deduplication_id.to_string(),
            DedupRecord {
                message_id: candidate.to_string(),
                expires_at: now + self.window_ms,
            },
        );
        Admission {
            message_id: candidate.to_string(),
            duplicate: false,
        }
    }

    pub fn is_checked_out(&self, group_id: &str) -> bool {
        self.checked_out.contains_key(group_id)
    }

    pub fn check_out(&mut self, group_id: &str, message_id: &str) {
        self.checked_out
            .insert(group_id.to_string(), message_id.to_string());
    }

    /// Release the group if `message_id` is the one holding it.
    pub fn release(&mut self, group_id: &str, message_id: &str) -> bool {
        if self.checked_out.get(group_id).map(String::as_str) == Some(message_id) {
            self.checked_out.remove(group_id);
            true
        } else {
            false
        }
    }

    /// Drop dedup records whose window has elapsed. Messages are untouched.
    pub fn purge_expired(&mut self, now: i64) -> usize {
        let before = self.dedup.len();
        self.dedup.retain(|_, record| record.expires_at > now);
        before - self.dedup.len()
    }

    #[cfg(test)]
    pub fn dedup_len(&self) -> usize {
        self.dedup.len()
    }
}
