//! Queue error codes and the JSON error envelope

use serde::Serialize;
use thiserror::Error;

/// Stable error codes reported to callers of the queue service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Queue lifecycle
    QueueDoesNotExist,
    InvalidQueueName,
    QueueNameConflict,
    QueueAlreadyExists,

    // Messages
    ReceiptHandleIsInvalid,
    MissingParameter,
    InvalidParameterValue,

    // Transport level
    NotFound,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueueDoesNotExist => "QueueDoesNotExist",
            Self::InvalidQueueName => "InvalidQueueName",
            Self::QueueNameConflict => "QueueNameConflict",
            Self::QueueAlreadyExists => "QueueAlreadyExists",
            Self::ReceiptHandleIsInvalid => "ReceiptHandleIsInvalid",
            Self::MissingParameter => "MissingParameter",
            Self::InvalidParameterValue => "InvalidParameterValue",
            Self::NotFound => "NotFound",
            Self::InternalError => "InternalError",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::QueueDoesNotExist | Self::NotFound => 404,
            Self::QueueNameConflict | Self::QueueAlreadyExists => 409,
            Self::InvalidQueueName
            | Self::ReceiptHandleIsInvalid
            | Self::MissingParameter
            | Self::InvalidParameterValue => 400,
            Self::InternalError => 500,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error as rendered to API clients
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub request_id: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn status(&self) -> u16 {
        self.code.http_status()
    }

    /// Format as a JSON error body
    pub fn to_json(&self) -> String {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct JsonError<'a> {
            error: &'static str,
            message: &'a str,
            request_id: &'a str,
        }

        let error = JsonError {
            error: self.code.as_str(),
            message: &self.message,
            request_id: &self.request_id,
        };

        serde_json::to_string(&error).unwrap_or_else(|_| {
            format!(
                r#"{{"error":"{}","message":"{}"}}"#,
                self.code.as_str(),
                self.message
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_json_format() {
        let error = ApiError::new(ErrorCode::QueueDoesNotExist, "Queue does not exist: jobs")
            .with_request_id("test-request-id");

        let json: serde_json::Value = serde_json::from_str(&error.to_json()).unwrap();
        assert_eq!(json["error"], "QueueDoesNotExist");
        assert_eq!(json["message"], "Queue does not exist: jobs");
        assert_eq!(json["requestId"], "test-request-id");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorCode::QueueDoesNotExist.http_status(), 404);
        assert_eq!(ErrorCode::QueueAlreadyExists.http_status(), 409);
        assert_eq!(ErrorCode::ReceiptHandleIsInvalid.http_status(), 400);
        assert_eq!(ApiError::new(ErrorCode::InternalError, "boom").status(), 500);
    }

    #[test]
    fn test_display_includes_code() {
        let error = ApiError::new(ErrorCode::InvalidQueueName, "bad name");
        assert_eq!(error.to_string(), "InvalidQueueName: bad name");
    }
}
