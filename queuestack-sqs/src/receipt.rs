//! Versioned receipt handles
//!
//! A handle names the queue incarnation, the message and the delivery
//! version it was issued for. Every consuming receive bumps the message's
//! version, so older handles stop matching.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReceiptHandle {
    pub queue_id: String,
    pub message_id: String,
    pub version: u64,
}

impl ReceiptHandle {
    pub fn new(queue_id: &str, message_id: &str, version: u64) -> Self {
        Self {
            queue_id: queue_id.to_string(),
            message_id: message_id.to_string(),
            version,
        }
    }

    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!(
            "{}:{}:{}",
            self.queue_id, self.message_id, self.version
        ))
    }

    pub fn decode(raw: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(raw.trim()).ok()?;
        let text = String::from_utf8(bytes).ok()?;
        let mut parts = text.splitn(3, ':');
        let queue_id = parts.next().filter(|p| !p.is_empty())?;
        let message_id = parts.next().filter(|p| !p.is_empty())?;
        let version = parts.next()?.parse().ok()?;
        Some(Self::new(queue_id, message_id, version))
    }
}
