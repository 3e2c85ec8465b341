//! Engine errors

use queuestack_core::{ApiError, ErrorCode};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SqsError {
    #[error("Queue does not exist: {0}")]
    QueueNotFound(String),
    #[error("Invalid queue name: {0}")]
    InvalidName(String),
    #[error("Queue name conflicts with an existing queue of the other type: {0}")]
    NameConflict(String),
    #[error("Queue already exists with different attributes: {0}")]
    QueueAttributeMismatch(String),
    #[error("Receipt handle is invalid: {0}")]
    InvalidReceiptHandle(String),
    #[error("MessageGroupId is required for FIFO queues")]
    MissingGroupId,
    #[error("MessageDeduplicationId is required when content-based deduplication is disabled")]
    MissingDeduplicationId,
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl SqsError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::QueueNotFound(_) => ErrorCode::QueueDoesNotExist,
            Self::InvalidName(_) => ErrorCode::InvalidQueueName,
            Self::NameConflict(_) => ErrorCode::QueueNameConflict,
            Self::QueueAttributeMismatch(_) => ErrorCode::QueueAlreadyExists,
            Self::InvalidReceiptHandle(_) => ErrorCode::ReceiptHandleIsInvalid,
            Self::MissingGroupId | Self::MissingDeduplicationId => ErrorCode::MissingParameter,
            Self::InvalidArgument(_) => ErrorCode::InvalidParameterValue,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

impl From<SqsError> for ApiError {
    fn from(err: SqsError) -> Self {
        ApiError::new(err.code(), err.to_string())
    }
}
