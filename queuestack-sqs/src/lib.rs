//! In-process message queue engine for queuestack
//!
//! Provides in-memory standard and FIFO queues with support for:
//! - CreateQueue, DeleteQueue, ListQueues, GetQueue
//! - SendMessage, ReceiveMessage (batch + long-poll), PeekMessages, DeleteMessage
//! - Visibility timeouts with versioned receipt handles
//! - Per-group ordering and deduplication for FIFO queues
//! - Retention expiry and approximate message counts

mod delivery;
mod error;
mod expiry;
mod fifo;
mod receipt;
mod registry;
mod state;
mod store;
mod types;


pub use delivery::DeliveryEngine;
pub use error::SqsError;
pub use expiry::{ExpiryHandle, ExpiryScheduler, SweepStats};
pub use registry::{Queue, QueueRegistry};
pub use state::SqsState;
pub use types::{
    EngineConfig, MessageAttributeValue, MessageAttributes, MessageView, QueueConfig, QueueInfo,
    QueueMetrics, QueueOptions, ReceiveRequest, ReceivedMessage, SendMessageRequest,
    SendMessageResult, FIFO_SUFFIX,
};
