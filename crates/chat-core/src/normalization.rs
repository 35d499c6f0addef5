//! Decoding of REST payloads into chat domain values.

use serde_json::{Map, Value};

use crate::{
    error::ChatError,
    types::{
        Message, MessageAction, Metadata, OccupancyEvent, OperationDetails,
        SendMessageParams, UpdateMessageParams,
    },
};

/// Build the message returned by a successful send.
pub fn message_from_send_response(
    response: &Value,
    client_id: &str,
    params: &SendMessageParams,
) -> Result<Message, ChatError> {
    let serial = required_str(response, "serial")?;
    let created_at_ms = required_u64(response, "createdAt")?;

    Ok(Message {
        serial: serial.to_owned(),
        action: MessageAction::Create,
        client_id: client_id.to_owned(),
        text: params.text.clone(),
        metadata: params.metadata.clone().unwrap_or_default(),
        headers: params.headers.clone().unwrap_or_default(),
        created_at_ms,
        version: serial.to_owned(),
        timestamp_ms: created_at_ms,
        operation: None,
    })
}

/// Build the new version of `original` returned by an update.
pub fn message_from_update_response(
    response: &Value,
    original: &Message,
    params: &UpdateMessageParams,
    details: OperationDetails,
) -> Result<Message, ChatError> {
    Ok(Message {
        action: MessageAction::Update,
        text: params.text.clone(),
        metadata: params.metadata.clone().unwrap_or_default(),
        headers: params.headers.clone().unwrap_or_default(),
        version: required_str(response, "version")?.to_owned(),
        timestamp_ms: required_u64(response, "timestamp")?,
        operation: Some(details),
        ..original.clone()
    })
}

/// Build the deleted version of `original` returned by a delete.
pub fn message_from_delete_response(
    response: &Value,
    original: &Message,
    details: OperationDetails,
) -> Result<Message, ChatError> {
    Ok(Message {
        action: MessageAction::Delete,
        version: required_str(response, "version")?.to_owned(),
        timestamp_ms: required_u64(response, "timestamp")?,
        operation: Some(details),
        ..original.clone()
    })
}

/// Decode one history item.
pub fn message_from_json(item: &Value) -> Result<Message, ChatError> {
    let serial = required_str(item, "serial")?.to_owned();
    let action = match item.get("action").and_then(Value::as_str) {
        Some(raw) => MessageAction::from_wire(raw)
            .ok_or_else(|| ChatError::format(format!("unknown message action '{raw}'")))?,
        None => MessageAction::Create,
    };
    let created_at_ms = required_u64(item, "createdAt")?;
    let version = item
        .get("version")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| serial.clone());
    let timestamp_ms = item
        .get("timestamp")
        .and_then(Value::as_u64)
        .unwrap_or(created_at_ms);

    Ok(Message {
        action,
        client_id: required_str(item, "clientId")?.to_owned(),
        text: item
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        metadata: object_field(item, "metadata"),
        headers: object_field(item, "headers"),
        created_at_ms,
        version,
        timestamp_ms,
        operation: item.get("operation").map(operation_details_from_json),
        serial,
    })
}

/// Decode occupancy metrics, either bare or nested under `metrics`.
pub fn occupancy_from_json(value: &Value) -> Result<OccupancyEvent, ChatError> {
    let metrics = value.get("metrics").unwrap_or(value);
    Ok(OccupancyEvent {
        connections: required_u64(metrics, "connections")?,
        presence_members: required_u64(metrics, "presenceMembers")?,
    })
}

/// Encode a send request body.
pub fn send_request_body(params: &SendMessageParams) -> Value {
    let mut body = Map::new();
    body.insert("text".to_owned(), Value::String(params.text.clone()));
    if let Some(metadata) = &params.metadata {
        body.insert("metadata".to_owned(), Value::Object(metadata.clone()));
    }
    if let Some(headers) = &params.headers {
        body.insert("headers".to_owned(), Value::Object(headers.clone()));
    }
    Value::Object(body)
}

/// Encode the operation details carried by update and delete requests.
pub fn operation_body(details: &OperationDetails) -> Map<String, Value> {
    let mut body = Map::new();
    if let Some(description) = &details.description {
        body.insert("description".to_owned(), Value::String(description.clone()));
    }
    if let Some(metadata) = &details.metadata {
        body.insert("metadata".to_owned(), Value::Object(metadata.clone()));
    }
    body
}

fn operation_details_from_json(value: &Value) -> OperationDetails {
    OperationDetails {
        client_id: value
            .get("clientId")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        description: value
            .get("description")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        metadata: value.get("metadata").and_then(Value::as_object).cloned(),
    }
}

fn object_field(value: &Value, key: &str) -> Metadata {
    value
        .get(key)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn required_str<'a>(value: &'a Value, key: &str) -> Result<&'a str, ChatError> {
    value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ChatError::format(format!("missing or non-string field '{key}'")))
}

fn required_u64(value: &Value, key: &str) -> Result<u64, ChatError> {
    value
        .get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| ChatError::format(format!("missing or non-integer field '{key}'")))
}
