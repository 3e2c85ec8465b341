//! Public request/response types and engine configuration

use bytes::Bytes;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::SqsError;

pub const FIFO_SUFFIX: &str = ".fifo";
pub const MAX_QUEUE_NAME_LEN: usize = 80;
pub const MAX_RECEIVE_BATCH: u32 = 10;
pub const MAX_VISIBILITY_TIMEOUT_SECS: u32 = 43_200; // 12 hours
pub const MIN_RETENTION_SECS: u32 = 60;
pub const MAX_RETENTION_SECS: u32 = 1_209_600; // 14 days
pub const MAX_ATTRIBUTE_NAME_LEN: usize = 256;
pub const MAX_FIFO_ID_LEN: usize = 128;

/// Engine-wide defaults and limits
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Prefix for queue URLs: `{base_url}/{name}`
    pub base_url: String,
    pub default_visibility_timeout_secs: u32,
    pub default_retention_secs: u32,
    pub default_receive_wait_secs: u32,
    pub max_wait_time_secs: u32,
    pub dedup_window_secs: u32,
    pub sweep_interval_ms: u64,
    pub max_message_size: usize,
    pub max_attributes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/queues".to_string(),
            default_visibility_timeout_secs: 30,
            default_retention_secs: 345_600, // 4 days
            default_receive_wait_secs: 0,
            max_wait_time_secs: 20,
            dedup_window_secs: 300,
            sweep_interval_ms: 1_000,
            max_message_size: 262_144, // 256KB
            max_attributes: 10,
        }
    }
}

impl EngineConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(10))
    }
}

/// Caller-supplied queue options; unset fields take the engine defaults
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueOptions {
    pub content_based_deduplication: bool,
    pub visibility_timeout_secs: Option<u32>,
    pub retention_secs: Option<u32>,
    pub receive_wait_time_secs: Option<u32>,
    pub max_message_size: Option<usize>,
}

impl QueueOptions {
    pub fn content_based_deduplication(mut self, enabled: bool) -> Self {
        self.content_based_deduplication = enabled;
        self
    }

    pub fn visibility_timeout(mut self, secs: u32) -> Self {
        self.visibility_timeout_secs = Some(secs);
        self
    }

    pub fn retention(mut self, secs: u32) -> Self {
        self.retention_secs = Some(secs);
        self
    }

    pub fn receive_wait_time(mut self, secs: u32) -> Self {
        self.receive_wait_time_secs = Some(secs);
        self
    }
}

/// Resolved, immutable queue configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub fifo: bool,
    pub content_based_deduplication: bool,
    pub visibility_timeout_secs: u32,
    pub retention_secs: u32,
    pub receive_wait_time_secs: u32,
    pub max_message_size: usize,
}

impl QueueConfig {
    pub(crate) fn resolve(
        fifo: bool,
        options: &QueueOptions,
        engine: &EngineConfig,
    ) -> Result<Self, SqsError> {
        if options.content_based_deduplication && !fifo {
            return Err(SqsError::invalid(
                "ContentBasedDeduplication is only valid for FIFO queues",
            ));
        }

        let config = Self {
            fifo,
            content_based_deduplication: options.content_based_deduplication,
            visibility_timeout_secs: options
                .visibility_timeout_secs
                .unwrap_or(engine.default_visibility_timeout_secs),
            retention_secs: options
                .retention_secs
                .unwrap_or(engine.default_retention_secs),
            receive_wait_time_secs: options
                .receive_wait_time_secs
                .unwrap_or(engine.default_receive_wait_secs),
            max_message_size: options
                .max_message_size
                .unwrap_or(engine.max_message_size),
        };

        if config.visibility_timeout_secs > MAX_VISIBILITY_TIMEOUT_SECS {
            return Err(SqsError::invalid(format!(
                "VisibilityTimeout must be between 0 and {MAX_VISIBILITY_TIMEOUT_SECS} seconds"
            )));
        }
        if !(MIN_RETENTION_SECS..=MAX_RETENTION_SECS).contains(&config.retention_secs) {
            return Err(SqsError::invalid(format!(
                "MessageRetentionPeriod must be between {} and {} seconds",
                MIN_RETENTION_SECS, MAX_RETENTION_SECS
            )));
        }
        if config.receive_wait_time_secs > engine.max_wait_time_secs {
            return Err(SqsError::invalid(format!(
                "ReceiveMessageWaitTimeSeconds must be between 0 and {} seconds",
                engine.max_wait_time_secs
            )));
        }
        if config.max_message_size == 0 || config.max_message_size > engine.max_message_size {
            return Err(SqsError::invalid(format!(
                "MaximumMessageSize must be between 1 and {} bytes",
                engine.max_message_size
            )));
        }

        Ok(config)
    }

    pub(crate) fn visibility_timeout_millis(&self) -> i64 {
        i64::from(self.visibility_timeout_secs) * 1000
    }

    pub(crate) fn retention_millis(&self) -> i64 {
        i64::from(self.retention_secs) * 1000
    }
}

/// Snapshot of a queue's identity and configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    /// Incarnation id; a queue recreated under the same name gets a new one
    pub id: String,
    pub name: String,
    pub url: String,
    pub config: QueueConfig,
    pub created_timestamp: i64,
}

impl QueueInfo {
    pub fn is_fifo(&self) -> bool {
        self.config.fifo
    }
}

/// Typed message attribute value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageAttributeValue {
    String(String),
    Number(String),
    Binary(Bytes),
}

impl MessageAttributeValue {
    pub fn data_type(&self) -> &'static str {
        match self {
            Self::String(_) => "String",
            Self::Number(_) => "Number",
            Self::Binary(_) => "Binary",
        }
    }

    /// Build a value from a data type name such as `String`, `Number` or
    /// `Number.int`. Binary values are passed already decoded.
    pub fn typed(data_type: &str, value: impl Into<Bytes>) -> Result<Self, SqsError> {
        let value = value.into();
        let base = data_type.split('.').next().unwrap_or(data_type);
        match base {
            "String" => Ok(Self::String(utf8(value, data_type)?)),
            "Number" => {
                let number = utf8(value, data_type)?;
                if number.trim().parse::<f64>().is_err() {
                    return Err(SqsError::invalid(format!(
                        "Attribute value '{number}' is not a valid Number"
                    )));
                }
                Ok(Self::Number(number))
            }
            "Binary" => Ok(Self::Binary(value)),
            other => Err(SqsError::invalid(format!(
                "Unsupported attribute data type: {other}"
            ))),
        }
    }

    pub(crate) fn payload_len(&self) -> usize {
        match self {
            Self::String(s) | Self::Number(s) => s.len(),
            Self::Binary(b) => b.len(),
        }
    }
}

fn utf8(value: Bytes, data_type: &str) -> Result<String, SqsError> {
    String::from_utf8(value.to_vec())
        .map_err(|_| SqsError::invalid(format!("{data_type} attribute value must be UTF-8")))
}

pub type MessageAttributes = BTreeMap<String, MessageAttributeValue>;

/// A message to be sent
#[derive(Debug, Clone, Default)]
pub struct SendMessageRequest {
    pub body: Bytes,
    pub attributes: MessageAttributes,
    pub group_id: Option<String>,
    pub deduplication_id: Option<String>,
}

impl SendMessageRequest {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn attribute(mut self, name: impl Into<String>, value: MessageAttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn deduplication_id(mut self, deduplication_id: impl Into<String>) -> Self {
        self.deduplication_id = Some(deduplication_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMessageResult {
    pub message_id: String,
    pub md5_of_body: String,
    /// FIFO only
    pub sequence_number: Option<u64>,
    /// The deduplication id matched a live record; nothing was enqueued
    pub duplicate: bool,
}

/// Parameters for a consuming receive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveRequest {
    pub max_messages: u32,
    /// Long-poll bound; `None` uses the queue's receive wait time
    pub wait_time_secs: Option<u32>,
    /// Per-call override of the queue's visibility timeout
    pub visibility_timeout_secs: Option<u32>,
}

impl Default for ReceiveRequest {
    fn default() -> Self {
        Self {
            max_messages: 1,
            wait_time_secs: None,
            visibility_timeout_secs: None,
        }
    }
}

impl ReceiveRequest {
    pub fn max_messages(mut self, max: u32) -> Self {
        self.max_messages = max;
        self
    }

    pub fn wait_time(mut self, secs: u32) -> Self {
        self.wait_time_secs = Some(secs);
        self
    }

    pub fn visibility_timeout(mut self, secs: u32) -> Self {
        self.visibility_timeout_secs = Some(secs);
        self
    }
}

/// Message contents and delivery metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    pub message_id: String,
    pub body: Bytes,
    pub md5_of_body: String,
    pub attributes: MessageAttributes,
    pub sent_timestamp: i64,
    pub receive_count: u32,
    pub first_receive_timestamp: Option<i64>,
    pub group_id: Option<String>,
    pub deduplication_id: Option<String>,
    pub sequence_number: Option<u64>,
}

/// A message checked out by a consuming receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message: MessageView,
    /// Only the most recently issued handle for a message can delete it
    pub receipt_handle: String,
}

impl ReceivedMessage {
    pub fn message_id(&self) -> &str {
        &self.message.message_id
    }

    pub fn body(&self) -> &[u8] {
        &self.message.body
    }
}

/// Approximate message counts; stale as soon as they are read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueMetrics {
    pub visible: usize,
    pub in_flight: usize,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_defaults() {
        let engine = EngineConfig::default();
        let config = QueueConfig::resolve(false, &QueueOptions::default(), &engine).unwrap();
        assert_eq!(config.visibility_timeout_secs, 30);
        assert_eq!(config.retention_secs, 345_600);
        assert!(!config.fifo);
    }

    #[test]
    fn test_resolve_rejects_content_dedup_on_standard() {
        let engine = EngineConfig::default();
        let options = QueueOptions::default().content_based_deduplication(true);
        let result = QueueConfig::resolve(false, &options, &engine);
        assert!(matches!(result, Err(SqsError::InvalidArgument(_))));
    }

    #[test]
    fn test_resolve_rejects_out_of_range() {
        let engine = EngineConfig::default();
        let too_long = QueueOptions::default().visibility_timeout(MAX_VISIBILITY_TIMEOUT_SECS + 1);
        assert!(QueueConfig::resolve(false, &too_long, &engine).is_err());

        let too_short = QueueOptions::default().retention(10);
        assert!(QueueConfig::resolve(false, &too_short, &engine).is_err());

        let too_patient = QueueOptions::default().receive_wait_time(21);
        assert!(QueueConfig::resolve(false, &too_patient, &engine).is_err());
    }

    #[test]
    fn test_typed_attributes() {
        assert_eq!(
            MessageAttributeValue::typed("String", "hello").unwrap(),
            MessageAttributeValue::String("hello".into())
        );
        assert_eq!(
            MessageAttributeValue::typed("Number.int", "42").unwrap().data_type(),
            "Number"
        );
        assert!(MessageAttributeValue::typed("Number", "forty-two").is_err());
        assert!(MessageAttributeValue::typed("Date", "2024-01-01").is_err());
        assert_eq!(
            MessageAttributeValue::typed("Binary", vec![0u8, 159, 146, 150])
                .unwrap()
                .payload_len(),
            4
        );
    }
}
