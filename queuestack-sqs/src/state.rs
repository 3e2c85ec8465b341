//! Engine entry point shared by request handlers

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

use queuestack_core::{SharedClock, SystemClock};

use crate::delivery::DeliveryEngine;
use crate::error::SqsError;
use crate::expiry::{ExpiryHandle, ExpiryScheduler, SweepStats};
use crate::registry::QueueRegistry;
use crate::types::{
    EngineConfig, MessageView, QueueInfo, QueueMetrics, QueueOptions, ReceiveRequest,
    ReceivedMessage, SendMessageRequest, SendMessageResult,
};

/// State for queue handlers
#[derive(Debug)]
pub struct SqsState {
    registry: Arc<QueueRegistry>,
    delivery: DeliveryEngine,
    scheduler: ExpiryScheduler,
    running: Mutex<Option<ExpiryHandle>>,
}

impl Default for SqsState {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl SqsState {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: EngineConfig, clock: SharedClock) -> Self {
        let tick = config.sweep_interval();
        let registry = Arc::new(QueueRegistry::new(config, Arc::clone(&clock)));
        Self {
            delivery: DeliveryEngine::new(Arc::clone(&registry), Arc::clone(&clock)),
            scheduler: ExpiryScheduler::new(Arc::clone(&registry), clock, tick),
            registry,
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        self.registry.config()
    }

    /// Spawn the expiry scheduler. Must be called inside a tokio runtime;
    /// returns false if it is already running.
    pub fn start_scheduler(&self) -> bool {
        let mut running = self.running.lock();
        if running.is_some() {
            return false;
        }
        *running = Some(self.scheduler.clone().spawn());
        true
    }

    /// Stop the scheduler and tear down every queue. Pending receives
    /// finish with `QueueNotFound`.
    pub async fn shutdown(&self) {
        let handle = self.running.lock().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
        let dropped = self.registry.clear();
        info!(queues = dropped, "Queue engine shut down");
    }

    /// Run one expiry pass immediately.
    pub fn sweep_now(&self) -> SweepStats {
        self.scheduler.sweep()
    }

    // Delegate methods to the registry and delivery engine

    pub fn create_queue(
        &self,
        name: &str,
        fifo: bool,
        options: &QueueOptions,
    ) -> Result<QueueInfo, SqsError> {
        self.registry.create_queue(name, fifo, options)
    }

    pub fn get_queue(&self, name: &str) -> Result<QueueInfo, SqsError> {
        self.registry.get_queue(name).map(|q| q.info().clone())
    }

    pub fn list_queues(&self, prefix: Option<&str>) -> Vec<QueueInfo> {
        self.registry.list_queues(prefix)
    }

    pub fn delete_queue(&self, name: &str) -> Result<(), SqsError> {
        self.registry.delete_queue(name)
    }

    pub fn send_message(
        &self,
        queue_name: &str,
        request: SendMessageRequest,
    ) -> Result<SendMessageResult, SqsError> {
        self.delivery.send_message(queue_name, request)
    }

    pub async fn receive_messages(
        &self,
        queue_name: &str,
        request: ReceiveRequest,
    ) -> Result<Vec<ReceivedMessage>, SqsError> {
        self.delivery.receive_messages(queue_name, request).await
    }

    pub async fn receive_messages_until<F>(
        &self,
        queue_name: &str,
        request: ReceiveRequest,
        cancel: F,
    ) -> Result<Vec<ReceivedMessage>, SqsError>
    where
        F: Future<Output = ()>,
    {
        self.delivery
            .receive_messages_until(queue_name, request, cancel)
            .await
    }

    pub fn peek_messages(
        &self,
        queue_name: &str,
        max_messages: u32,
    ) -> Result<Vec<MessageView>, SqsError> {
        self.delivery.peek_messages(queue_name, max_messages)
    }

    pub fn delete_message(&self, queue_name: &str, receipt_handle: &str) -> Result<(), SqsError> {
        self.delivery.delete_message(queue_name, receipt_handle)
    }

    pub fn get_metrics(&self, queue_name: &str) -> Result<QueueMetrics, SqsError> {
        self.delivery.get_metrics(queue_name)
    }
}
