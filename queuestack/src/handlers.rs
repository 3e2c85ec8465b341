//! HTTP handlers for the queue REST API

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use queuestack_core::{ApiError, ErrorCode};
use queuestack_sqs::{
    MessageAttributeValue, MessageView, QueueInfo, QueueOptions, ReceiveRequest,
    ReceivedMessage, SendMessageRequest, SqsError, SqsState,
};

const DEFAULT_MAX_MESSAGES: u32 = 10;

/// Error returned by handlers, rendered as the JSON error envelope
#[derive(Debug)]
pub struct HandlerError(ApiError);

impl HandlerError {
    fn missing(field: &str) -> Self {
        Self(ApiError::new(
            ErrorCode::MissingParameter,
            format!("{field} is required"),
        ))
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self(ApiError::new(ErrorCode::InvalidParameterValue, message))
    }
}

impl From<SqsError> for HandlerError {
    fn from(err: SqsError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let error = self.0;
        warn!(code = %error.code, request_id = %error.request_id, "{}", error.message);
        let status =
            StatusCode::from_u16(error.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        json_response(status, error.to_json())
    }
}

type HandlerResult = Result<Response, HandlerError>;

// === Request bodies ===

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateQueueBody {
    queue_name: Option<String>,
    #[serde(default)]
    is_fifo: bool,
    content_based_deduplication: Option<bool>,
    visibility_timeout: Option<u32>,
    message_retention_period: Option<u32>,
    receive_message_wait_time_seconds: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageBody {
    message_body: Option<String>,
    #[serde(default)]
    message_attributes: Vec<AttributeBody>,
    group_id: Option<String>,
    deduplication_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AttributeBody {
    name: String,
    value: String,
    #[serde(rename = "type")]
    data_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteMessageBody {
    receipt_handle: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQueuesQuery {
    prefix: Option<String>,
}

// === Queue handlers ===

pub async fn create_queue(State(state): State<Arc<SqsState>>, body: Bytes) -> HandlerResult {
    let request: CreateQueueBody = parse_body(&body)?;
    let name = request
        .queue_name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| HandlerError::missing("queueName"))?;

    // FIFO queues deduplicate by content unless told otherwise
    let options = QueueOptions {
        content_based_deduplication: request
            .content_based_deduplication
            .unwrap_or(request.is_fifo),
        visibility_timeout_secs: request.visibility_timeout,
        retention_secs: request.message_retention_period,
        receive_wait_time_secs: request.receive_message_wait_time_seconds,
        max_message_size: None,
    };

    let queue = state.create_queue(&name, request.is_fifo, &options)?;
    info!(queue = %queue.name, "Queue ready");

    Ok(json_value(
        StatusCode::CREATED,
        &json!({
            "message": "Queue created",
            "queueName": queue.name,
            "queueUrl": queue.url,
        }),
    ))
}

pub async fn list_queues(
    State(state): State<Arc<SqsState>>,
    Query(query): Query<ListQueuesQuery>,
) -> HandlerResult {
    let queues: Vec<Value> = state
        .list_queues(query.prefix.as_deref())
        .iter()
        .map(queue_summary)
        .collect();
    Ok(json_value(StatusCode::OK, &json!({ "queues": queues })))
}

pub async fn delete_queue(
    State(state): State<Arc<SqsState>>,
    Path(queue_name): Path<String>,
) -> HandlerResult {
    state.delete_queue(&queue_name)?;
    Ok(json_value(
        StatusCode::OK,
        &json!({ "message": "Queue deleted" }),
    ))
}

pub async fn get_metrics(
    State(state): State<Arc<SqsState>>,
    Path(queue_name): Path<String>,
) -> HandlerResult {
    let queue = state.get_queue(&queue_name)?;
    let metrics = state.get_metrics(&queue_name)?;
    Ok(json_value(
        StatusCode::OK,
        &json!({
            "queueName": queue.name,
            "queueUrl": queue.url,
            "total": metrics.total,
            "visible": metrics.visible,
            "inFlight": metrics.in_flight,
        }),
    ))
}

// === Message handlers ===

pub async fn send_message(
    State(state): State<Arc<SqsState>>,
    Path(queue_name): Path<String>,
    body: Bytes,
) -> HandlerResult {
    let request: SendMessageBody = parse_body(&body)?;
    let message_body = request
        .message_body
        .filter(|b| !b.is_empty())
        .ok_or_else(|| HandlerError::missing("messageBody"))?;

    let queue = state.get_queue(&queue_name)?;
    let mut message = SendMessageRequest::new(message_body);
    for attribute in request.message_attributes {
        let value = attribute_value(&attribute)?;
        message = message.attribute(attribute.name, value);
    }

    if queue.is_fifo() {
        let new_id = || uuid::Uuid::new_v4().to_string();
        message.group_id = Some(request.group_id.unwrap_or_else(new_id));
        message.deduplication_id = match request.deduplication_id {
            Some(id) => Some(id),
            None if queue.config.content_based_deduplication => None,
            None => Some(new_id()),
        };
    } else {
        message.group_id = request.group_id;
        message.deduplication_id = request.deduplication_id;
    }

    let result = state.send_message(&queue_name, message)?;
    let outcome = if result.duplicate {
        "Duplicate message ignored"
    } else {
        "Message sent"
    };
    Ok(json_value(
        StatusCode::OK,
        &json!({
            "message": outcome,
            "messageId": result.message_id,
            "md5OfBody": result.md5_of_body,
            "sequenceNumber": result.sequence_number.map(|s| s.to_string()),
            "duplicate": result.duplicate,
        }),
    ))
}

/// `GET /queues/:queueName/messages`
///
/// Peeks by default. With `mode=consume` the messages are checked out for
/// the visibility timeout and come back with receipt handles.
pub async fn receive_messages(
    State(state): State<Arc<SqsState>>,
    Path(queue_name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> HandlerResult {
    let max_messages = query_u32(&params, "maxMessages")?.unwrap_or(DEFAULT_MAX_MESSAGES);

    let messages: Vec<Value> = match params.get("mode").map(String::as_str) {
        None | Some("peek") => state
            .peek_messages(&queue_name, max_messages)?
            .iter()
            .map(|m| message_json(m, None))
            .collect(),
        Some("consume") => {
            // without waitTimeSeconds the queue's receive wait time applies
            let mut request = ReceiveRequest::default().max_messages(max_messages);
            if let Some(secs) = query_u32(&params, "waitTimeSeconds")? {
                request = request.wait_time(secs);
            }
            if let Some(secs) = query_u32(&params, "visibilityTimeout")? {
                request = request.visibility_timeout(secs);
            }
            state
                .receive_messages(&queue_name, request)
                .await?
                .iter()
                .map(received_json)
                .collect()
        }
        Some(other) => {
            return Err(HandlerError::invalid(format!(
                "mode must be 'peek' or 'consume', got '{other}'"
            )))
        }
    };

    Ok(json_value(StatusCode::OK, &json!({ "messages": messages })))
}

pub async fn delete_message(
    State(state): State<Arc<SqsState>>,
    Path(queue_name): Path<String>,
    body: Bytes,
) -> HandlerResult {
    let request: DeleteMessageBody = parse_body(&body)?;
    let receipt_handle = request
        .receipt_handle
        .filter(|h| !h.is_empty())
        .ok_or_else(|| HandlerError::missing("receiptHandle"))?;

    state.delete_message(&queue_name, &receipt_handle)?;
    Ok(json_value(
        StatusCode::OK,
        &json!({ "message": "Message deleted" }),
    ))
}

pub async fn health_check(State(state): State<Arc<SqsState>>) -> Response {
    json_value(
        StatusCode::OK,
        &json!({
            "status": "running",
            "queues": state.list_queues(None).len(),
        }),
    )
}

pub async fn not_found() -> HandlerError {
    HandlerError(ApiError::new(ErrorCode::NotFound, "No such route"))
}

// === Helpers ===

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, HandlerError> {
    let body: &[u8] = if body.is_empty() { b"{}" } else { body };
    serde_json::from_slice(body)
        .map_err(|e| HandlerError::invalid(format!("Malformed JSON body: {e}")))
}

fn query_u32(params: &HashMap<String, String>, name: &str) -> Result<Option<u32>, HandlerError> {
    params
        .get(name)
        .map(|raw| {
            raw.parse::<u32>().map_err(|_| {
                HandlerError::invalid(format!("{name} must be a non-negative integer"))
            })
        })
        .transpose()
}

fn attribute_value(attribute: &AttributeBody) -> Result<MessageAttributeValue, HandlerError> {
    let data_type = attribute.data_type.as_deref().unwrap_or("String");
    let value = if data_type.starts_with("Binary") {
        BASE64
            .decode(&attribute.value)
            .map(Bytes::from)
            .map_err(|_| {
                HandlerError::invalid(format!(
                    "attribute '{}' must be base64 encoded",
                    attribute.name
                ))
            })?
    } else {
        Bytes::from(attribute.value.clone())
    };
    Ok(MessageAttributeValue::typed(data_type, value)?)
}

fn queue_summary(queue: &QueueInfo) -> Value {
    json!({
        "name": queue.name,
        "url": queue.url,
        "fifo": queue.is_fifo(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AttributeJson {
    data_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    string_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    binary_value: Option<String>,
}

fn message_json(message: &MessageView, receipt_handle: Option<&str>) -> Value {
    let attributes: Map<String, Value> = message
        .attributes
        .iter()
        .map(|(name, value)| {
            let rendered = match value {
                MessageAttributeValue::String(s) | MessageAttributeValue::Number(s) => {
                    AttributeJson {
                        data_type: value.data_type(),
                        string_value: Some(s.clone()),
                        binary_value: None,
                    }
                }
                MessageAttributeValue::Binary(b) => AttributeJson {
                    data_type: value.data_type(),
                    string_value: None,
                    binary_value: Some(BASE64.encode(b)),
                },
            };
            (name.clone(), json!(rendered))
        })
        .collect();

    let mut system = Map::new();
    system.insert("sentTimestamp".into(), json!(message.sent_timestamp));
    system.insert("approximateReceiveCount".into(), json!(message.receive_count));
    if let Some(first) = message.first_receive_timestamp {
        system.insert("approximateFirstReceiveTimestamp".into(), json!(first));
    }
    if let Some(group) = &message.group_id {
        system.insert("messageGroupId".into(), json!(group));
    }
    if let Some(dedup) = &message.deduplication_id {
        system.insert("messageDeduplicationId".into(), json!(dedup));
    }
    if let Some(sequence) = message.sequence_number {
        system.insert("sequenceNumber".into(), json!(sequence.to_string()));
    }

    let mut out = json!({
        "messageId": message.message_id,
        "body": String::from_utf8_lossy(&message.body),
        "md5OfBody": message.md5_of_body,
        "attributes": system,
        "messageAttributes": attributes,
    });
    if let (Some(handle), Some(map)) = (receipt_handle, out.as_object_mut()) {
        map.insert("receiptHandle".into(), json!(handle));
    }
    out
}

fn received_json(received: &ReceivedMessage) -> Value {
    message_json(&received.message, Some(&received.receipt_handle))
}

fn json_value(status: StatusCode, value: &Value) -> Response {
    json_response(status, value.to_string())
}

fn json_response(status: StatusCode, body: String) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}
