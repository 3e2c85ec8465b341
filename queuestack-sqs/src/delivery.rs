//! Send, receive and delete on top of the per-queue stores

use md5::{Digest, Md5};
use sha2::Sha256;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use queuestack_core::SharedClock;

use crate::error::SqsError;
use crate::receipt::ReceiptHandle;
use crate::registry::{Queue, QueueRegistry};
use crate::store::NewMessage;
use crate::types::{
    EngineConfig, MessageView, QueueMetrics, ReceiveRequest, ReceivedMessage,
    SendMessageRequest, SendMessageResult, MAX_ATTRIBUTE_NAME_LEN, MAX_FIFO_ID_LEN,
    MAX_RECEIVE_BATCH, MAX_VISIBILITY_TIMEOUT_SECS,
};

#[derive(Debug, Clone)]
pub struct DeliveryEngine {
    registry: Arc<QueueRegistry>,
    clock: SharedClock,
}

impl DeliveryEngine {
    pub fn new(registry: Arc<QueueRegistry>, clock: SharedClock) -> Self {
        Self { registry, clock }
    }

    fn config(&self) -> &EngineConfig {
        self.registry.config()
    }

    pub fn send_message(
        &self,
        queue_name: &str,
        request: SendMessageRequest,
    ) -> Result<SendMessageResult, SqsError> {
        let queue = self.registry.get_queue(queue_name)?;
        let message = self.validate_send(&queue, request)?;
        let md5_of_body = message.md5_of_body.clone();
        let group_id = message.group_id.clone();

        let result = {
            let now = self.clock.now_millis();
            let mut store = queue.lock();
            let message_id = uuid::Uuid::new_v4().to_string();

            let admission = match (store.sequencer_mut(), message.deduplication_id.as_deref()) {
                (Some(fifo), Some(dedup_id)) => Some(fifo.admit(dedup_id, &message_id, now)),
                _ => None,
            };

            match admission {
                Some(admission) if admission.duplicate => SendMessageResult {
                    sequence_number: store.sequence_of(&admission.message_id),
                    message_id: admission.message_id,
                    md5_of_body,
                    duplicate: true,
                },
                _ => {
                    let fifo = queue.config().fifo;
                    let sequence = store.enqueue(message_id.clone(), message, now);
                    SendMessageResult {
                        message_id,
                        md5_of_body,
                        sequence_number: fifo.then_some(sequence),
                        duplicate: false,
                    }
                }
            }
        };

        if result.duplicate {
            debug!(
                queue = %queue_name,
                message_id = %result.message_id,
                "Duplicate message coalesced"
            );
        } else {
            debug!(
                queue = %queue_name,
                message_id = %result.message_id,
                group = ?group_id,
                "Sent message"
            );
            queue.wake_receivers();
        }
        Ok(result)
    }

    /// Consuming receive. Long-polls up to the request's (or the queue's)
    /// wait time when nothing is available.
    pub async fn receive_messages(
        &self,
        queue_name: &str,
        request: ReceiveRequest,
    ) -> Result<Vec<ReceivedMessage>, SqsError> {
        self.receive_messages_until(queue_name, request, std::future::pending())
            .await
    }

    /// Like [`receive_messages`](Self::receive_messages), but stops waiting
    /// as soon as `cancel` completes and returns whatever is available at
    /// that moment.
    ///
    /// The store lock is never held across an await, so dropping this
    /// future at any point leaves no message half checked out.
    pub async fn receive_messages_until<F>(
        &self,
        queue_name: &str,
        request: ReceiveRequest,
        cancel: F,
    ) -> Result<Vec<ReceivedMessage>, SqsError>
    where
        F: Future<Output = ()>,
    {
        let queue = self.registry.get_queue(queue_name)?;
        let (max, visibility_ms, wait) = self.validate_receive(&queue, &request)?;
        let deadline = Instant::now() + wait;
        tokio::pin!(cancel);

        loop {
            // Register interest before looking, so a send landing between
            // the check and the wait still wakes us.
            let notified = queue.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.try_receive(&queue, max, visibility_ms)?;
            if !batch.is_empty() || Instant::now() >= deadline {
                return Ok(batch);
            }

            tokio::select! {
                () = &mut notified => {}
                () = tokio::time::sleep_until(deadline) => {
                    return self.try_receive(&queue, max, visibility_ms);
                }
                () = &mut cancel => {
                    debug!(queue = %queue_name, "Receive cancelled");
                    return self.try_receive(&queue, max, visibility_ms);
                }
            }
        }
    }

    fn try_receive(
        &self,
        queue: &Queue,
        max: usize,
        visibility_ms: i64,
    ) -> Result<Vec<ReceivedMessage>, SqsError> {
        if queue.is_deleted() {
            return Err(SqsError::QueueNotFound(queue.name().to_string()));
        }

        let now = self.clock.now_millis();
        let batch = queue.lock().receive(max, visibility_ms, now);
        if !batch.is_empty() {
            debug!(queue = %queue.name(), count = batch.len(), "Received messages");
        }
        Ok(batch)
    }

    /// Non-consuming look at the messages a receive would return now.
    pub fn peek_messages(
        &self,
        queue_name: &str,
        max_messages: u32,
    ) -> Result<Vec<MessageView>, SqsError> {
        let queue = self.registry.get_queue(queue_name)?;
        let max = validate_batch_size(max_messages)?;
        let now = self.clock.now_millis();
        let peeked = queue.lock().peek(max, now);
        Ok(peeked)
    }

    pub fn delete_message(&self, queue_name: &str, receipt_handle: &str) -> Result<(), SqsError> {
        let queue = self.registry.get_queue(queue_name)?;
        let handle = ReceiptHandle::decode(receipt_handle)
            .ok_or_else(|| SqsError::InvalidReceiptHandle(receipt_handle.to_string()))?;

        let message_id = queue.lock().delete(&handle)?;
        debug!(queue = %queue_name, message_id = %message_id, "Deleted message");

        // a FIFO group may have been released
        if queue.config().fifo {
            queue.wake_receivers();
        }
        Ok(())
    }

    pub fn get_metrics(&self, queue_name: &str) -> Result<QueueMetrics, SqsError> {
        let queue = self.registry.get_queue(queue_name)?;
        let metrics = queue.lock().counts();
        Ok(metrics)
    }

    fn validate_send(
        &self,
        queue: &Queue,
        request: SendMessageRequest,
    ) -> Result<NewMessage, SqsError> {
        let config = queue.config();

        if request.body.is_empty() {
            return Err(SqsError::invalid("message body must not be empty"));
        }
        if request.attributes.len() > self.config().max_attributes {
            return Err(SqsError::invalid(format!(
                "a message can have at most {} attributes",
                self.config().max_attributes
            )));
        }

        let mut size = request.body.len();
        for (name, value) in &request.attributes {
            if name.is_empty() || name.len() > MAX_ATTRIBUTE_NAME_LEN {
                return Err(SqsError::invalid(format!(
                    "attribute names must be 1 to {MAX_ATTRIBUTE_NAME_LEN} characters"
                )));
            }
            if value.payload_len() == 0 {
                return Err(SqsError::invalid(format!(
                    "attribute '{name}' must have a value"
                )));
            }
            size += name.len() + value.data_type().len() + value.payload_len();
        }
        if size > config.max_message_size {
            return Err(SqsError::invalid(format!(
                "message of {size} bytes exceeds the {} byte limit",
                config.max_message_size
            )));
        }

        let (group_id, deduplication_id) = if config.fifo {
            let group_id = request.group_id.ok_or(SqsError::MissingGroupId)?;
            validate_fifo_id("MessageGroupId", &group_id)?;

            let deduplication_id = match request.deduplication_id {
                Some(id) => {
                    validate_fifo_id("MessageDeduplicationId", &id)?;
                    id
                }
                None if config.content_based_deduplication => {
                    hex::encode(Sha256::digest(&request.body))
                }
                None => return Err(SqsError::MissingDeduplicationId),
            };
            (Some(group_id), Some(deduplication_id))
        } else {
            if request.group_id.is_some() || request.deduplication_id.is_some() {
                return Err(SqsError::invalid(
                    "MessageGroupId and MessageDeduplicationId are only valid for FIFO queues",
                ));
            }
            (None, None)
        };

        Ok(NewMessage {
            md5_of_body: hex::encode(Md5::digest(&request.body)),
            body: request.body,
            attributes: request.attributes,
            group_id,
            deduplication_id,
        })
    }

    fn validate_receive(
        &self,
        queue: &Queue,
        request: &ReceiveRequest,
    ) -> Result<(usize, i64, Duration), SqsError> {
        let max = validate_batch_size(request.max_messages)?;

        let wait_secs = request
            .wait_time_secs
            .unwrap_or(queue.config().receive_wait_time_secs);
        if wait_secs > self.config().max_wait_time_secs {
            return Err(SqsError::invalid(format!(
                "WaitTimeSeconds must be between 0 and {}",
                self.config().max_wait_time_secs
            )));
        }

        let visibility_ms = match request.visibility_timeout_secs {
            Some(secs) if secs > MAX_VISIBILITY_TIMEOUT_SECS => {
                return Err(SqsError::invalid(format!(
                    "VisibilityTimeout must be between 0 and {MAX_VISIBILITY_TIMEOUT_SECS}"
                )))
            }
            Some(secs) => i64::from(secs) * 1000,
            None => queue.config().visibility_timeout_millis(),
        };

        Ok((max, visibility_ms, Duration::from_secs(u64::from(wait_secs))))
    }
}

fn validate_batch_size(max_messages: u32) -> Result<usize, SqsError> {
    if !(1..=MAX_RECEIVE_BATCH).contains(&max_messages) {
        return Err(SqsError::invalid(format!(
            "MaxNumberOfMessages must be between 1 and {MAX_RECEIVE_BATCH}"
        )));
    }
    Ok(max_messages as usize)
}

fn validate_fifo_id(field: &str, value: &str) -> Result<(), SqsError> {
    let printable = value.chars().all(|c| c.is_ascii_graphic());
    if value.is_empty() || value.len() > MAX_FIFO_ID_LEN || !printable {
        return Err(SqsError::invalid(format!(
            "{field} must be 1 to {MAX_FIFO_ID_LEN} printable ASCII characters"
        )));
    }
    Ok(())
}
