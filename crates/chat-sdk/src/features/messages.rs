use std::sync::Arc;

use chat_core::{
    ChatError, DiscontinuityEvent, EventEmitter, EventStream, HistoryDirection, HistoryQuery,
    Message, MessageAction, MessageEvent, MessageTimeline, OperationDetails, SendMessageParams,
    Serial, UpdateMessageParams,
    normalization::{
        message_from_delete_response, message_from_json, message_from_send_response,
        message_from_update_response, operation_body, send_request_body,
    },
};
use chat_transport::{HttpMethod, HttpRequest, InboundMessage, RealtimeChannel};
use serde_json::{Map, Value};
use tracing::debug;

use super::{FeatureContext, first_item};
use crate::bridge;

pub(crate) const MESSAGE_EVENT_NAME: &str = "chat.message";
const HISTORY_LIMIT_CAP: u16 = 1000;
const DEFAULT_HISTORY_LIMIT: u16 = 100;

/// Send, edit, delete and page through messages; subscribe to live changes.
#[derive(Clone)]
pub struct Messages {
    context: FeatureContext,
    channel: Arc<dyn RealtimeChannel>,
    events: EventEmitter<MessageEvent>,
    discontinuity: EventEmitter<DiscontinuityEvent>,
}

impl Messages {
    pub(crate) fn new(
        context: FeatureContext,
        channel: Arc<dyn RealtimeChannel>,
        events: EventEmitter<MessageEvent>,
        discontinuity: EventEmitter<DiscontinuityEvent>,
    ) -> Self {
        Self {
            context,
            channel,
            events,
            discontinuity,
        }
    }

    pub fn channel_name(&self) -> String {
        self.channel.name()
    }

    fn messages_path(&self) -> String {
        format!("/chat/v2/rooms/{}/messages", self.context.room)
    }

    pub async fn send(&self, params: SendMessageParams) -> Result<Message, ChatError> {
        let request = HttpRequest::new(HttpMethod::Post, self.messages_path())
            .with_body(send_request_body(&params));
        let response = bridge::request(self.context.client.as_ref(), request).await?;
        let message = message_from_send_response(
            first_item(&response, "send message")?,
            &self.context.client_id,
            &params,
        )?;
        debug!(room = %self.context.room, serial = %message.serial, "message sent");
        Ok(message)
    }

    /// Replace the content of `message`, returning its new version.
    pub async fn update(
        &self,
        message: &Message,
        params: UpdateMessageParams,
        details: OperationDetails,
    ) -> Result<Message, ChatError> {
        let details = self.own_operation(details);
        let mut body = operation_body(&details);
        body.insert("message".to_owned(), update_content(&params));

        let request = HttpRequest::new(
            HttpMethod::Put,
            format!("{}/{}", self.messages_path(), message.serial),
        )
        .with_body(Value::Object(body));
        let response = bridge::request(self.context.client.as_ref(), request).await?;
        message_from_update_response(
            first_item(&response, "update message")?,
            message,
            &params,
            details,
        )
    }

    /// Soft-delete `message`, returning its deleted version.
    pub async fn delete(
        &self,
        message: &Message,
        details: OperationDetails,
    ) -> Result<Message, ChatError> {
        let details = self.own_operation(details);
        let request = HttpRequest::new(
            HttpMethod::Post,
            format!("{}/{}/delete", self.messages_path(), message.serial),
        )
        .with_body(Value::Object(operation_body(&details)));
        let response = bridge::request(self.context.client.as_ref(), request).await?;
        message_from_delete_response(first_item(&response, "delete message")?, message, details)
    }

    /// Fetch one page of history, ordered by serial in the query's direction.
    pub async fn get(&self, query: HistoryQuery) -> Result<Vec<Message>, ChatError> {
        let limit = MessageTimeline::bounded_history_limit(
            query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
            HISTORY_LIMIT_CAP,
        );
        let mut request = HttpRequest::new(HttpMethod::Get, self.messages_path())
            .with_param("limit", limit)
            .with_param("direction", direction_param(query.direction));
        if let Some(start) = query.start_ms {
            request = request.with_param("start", start);
        }
        if let Some(end) = query.end_ms {
            request = request.with_param("end", end);
        }

        let response = bridge::request(self.context.client.as_ref(), request).await?;
        let mut page = response
            .items
            .iter()
            .map(|item| {
                let message = message_from_json(item)?;
                Ok((message.parsed_serial()?, message))
            })
            .collect::<Result<Vec<(Serial, Message)>, ChatError>>()?;

        page.sort_by(|(a, _), (b, _)| a.total_cmp(b));
        if query.direction == HistoryDirection::Backwards {
            page.reverse();
        }
        Ok(page.into_iter().map(|(_, message)| message).collect())
    }

    pub fn subscribe(&self) -> EventStream<MessageEvent> {
        self.events.subscribe()
    }

    pub fn on_discontinuity(&self) -> EventStream<DiscontinuityEvent> {
        self.discontinuity.subscribe()
    }

    fn own_operation(&self, details: OperationDetails) -> OperationDetails {
        OperationDetails {
            client_id: Some(self.context.client_id.clone()),
            ..details
        }
    }
}

fn update_content(params: &UpdateMessageParams) -> Value {
    let mut content = Map::new();
    content.insert("text".to_owned(), Value::String(params.text.clone()));
    if let Some(metadata) = &params.metadata {
        content.insert("metadata".to_owned(), Value::Object(metadata.clone()));
    }
    if let Some(headers) = &params.headers {
        content.insert("headers".to_owned(), Value::Object(headers.clone()));
    }
    Value::Object(content)
}

fn direction_param(direction: HistoryDirection) -> &'static str {
    match direction {
        HistoryDirection::Forwards => "forwards",
        HistoryDirection::Backwards => "backwards",
    }
}

/// Decode a realtime chat message. Other event names yield `None`.
pub(crate) fn decode_event(message: &InboundMessage) -> Result<Option<MessageEvent>, ChatError> {
    if message.name != MESSAGE_EVENT_NAME {
        return Ok(None);
    }

    let action = match message.action.as_deref() {
        Some(raw) => MessageAction::from_wire(raw)
            .ok_or_else(|| ChatError::format(format!("unknown message action '{raw}'")))?,
        None => MessageAction::Create,
    };
    let serial = message
        .serial
        .clone()
        .ok_or_else(|| ChatError::format("realtime message without serial"))?;
    Serial::parse(&serial)?;
    let client_id = message
        .client_id
        .clone()
        .ok_or_else(|| ChatError::format("realtime message without client id"))?;

    let data = &message.data;
    let headers = message
        .extras
        .as_ref()
        .and_then(|extras| extras.get("headers"))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    Ok(Some(MessageEvent {
        kind: action.into(),
        message: Message {
            action,
            client_id,
            text: data
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            metadata: data
                .get("metadata")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            headers,
            created_at_ms: message.created_at_ms.unwrap_or(message.timestamp_ms),
            version: message.version.clone().unwrap_or_else(|| serial.clone()),
            timestamp_ms: message.timestamp_ms,
            operation: None,
            serial,
        },
    }))
}

#[cfg(test)]
mod tests {
    use chat_core::{ChatErrorKind, MessageEventKind, RoomOptions, next_event};
    use chat_transport::{HttpResponse, memory::MemoryRealtime};
    use serde_json::json;
    use tokio::time::{Duration, timeout};

    use super::*;
    use crate::room::Room;

    fn history_item(serial: &str, text: &str) -> Value {
        json!({
            "serial": serial,
            "clientId": "bob",
            "text": text,
            "createdAt": 1,
        })
    }

    #[tokio::test]
    async fn send_posts_and_maps_response() {
        let realtime = MemoryRealtime::new(Some("alice"));
        realtime.on_request(|request| {
            assert_eq!(request.method, HttpMethod::Post);
            Ok(HttpResponse::ok(vec![
                json!({"serial": "abc@100-0", "createdAt": 100}),
            ]))
        });
        let room = Room::new("lobby", RoomOptions::default(), realtime.clone(), "alice");

        let message = room
            .messages()
            .send(SendMessageParams::text("hello"))
            .await
            .expect("send");

        assert_eq!(message.serial, "abc@100-0");
        assert_eq!(message.client_id, "alice");
        let requests = realtime.requests();
        assert_eq!(requests[0].path, "/chat/v2/rooms/lobby/messages");
        assert_eq!(requests[0].body, Some(json!({"text": "hello"})));
    }

    #[tokio::test]
    async fn update_and_delete_target_the_serial() {
        let realtime = MemoryRealtime::new(Some("alice"));
        realtime.on_request(|request| {
            let body = match request.method {
                HttpMethod::Post if request.path.ends_with("/delete") => {
                    json!({"version": "abc@300-0", "timestamp": 300})
                }
                HttpMethod::Put => json!({"version": "abc@200-0", "timestamp": 200}),
                _ => json!({"serial": "abc@100-0", "createdAt": 100}),
            };
            Ok(HttpResponse::ok(vec![body]))
        });
        let room = Room::new("lobby", RoomOptions::default(), realtime.clone(), "alice");
        let messages = room.messages();
        let original = messages
            .send(SendMessageParams::text("helo"))
            .await
            .expect("send");

        let updated = messages
            .update(
                &original,
                UpdateMessageParams {
                    text: "hello".into(),
                    ..UpdateMessageParams::default()
                },
                OperationDetails {
                    description: Some("typo".into()),
                    ..OperationDetails::default()
                },
            )
            .await
            .expect("update");
        let deleted = messages
            .delete(&updated, OperationDetails::default())
            .await
            .expect("delete");

        assert!(updated.is_newer_version_of(&original).expect("same message"));
        assert_eq!(
            updated.operation.as_ref().and_then(|op| op.client_id.as_deref()),
            Some("alice")
        );
        assert!(deleted.is_deleted());
        assert!(deleted.is_newer_version_of(&updated).expect("same message"));

        let requests = realtime.requests();
        assert_eq!(requests[1].path, "/chat/v2/rooms/lobby/messages/abc@100-0");
        assert_eq!(
            requests[1].body,
            Some(json!({"message": {"text": "hello"}, "description": "typo"}))
        );
        assert_eq!(
            requests[2].path,
            "/chat/v2/rooms/lobby/messages/abc@100-0/delete"
        );
    }

    #[tokio::test]
    async fn history_is_clamped_and_sorted() {
        let realtime = MemoryRealtime::new(Some("alice"));
        realtime.on_request(|_| {
            Ok(HttpResponse::ok(vec![
                history_item("abc@200-0", "second"),
                history_item("abc@300-0", "third"),
                history_item("abc@100-0", "first"),
            ]))
        });
        let room = Room::new("lobby", RoomOptions::default(), realtime.clone(), "alice");

        let page = room
            .messages()
            .get(HistoryQuery {
                limit: Some(5000),
                start_ms: Some(10),
                ..HistoryQuery::default()
            })
            .await
            .expect("history");

        let texts: Vec<_> = page.iter().map(|message| message.text.as_str()).collect();
        assert_eq!(texts, vec!["third", "second", "first"]);
        let request = &realtime.requests()[0];
        assert_eq!(request.params.get("limit").map(String::as_str), Some("1000"));
        assert_eq!(
            request.params.get("direction").map(String::as_str),
            Some("backwards")
        );
        assert_eq!(request.params.get("start").map(String::as_str), Some("10"));
        assert!(!request.params.contains_key("end"));
    }

    #[tokio::test]
    async fn history_rejects_bad_serials() {
        let realtime = MemoryRealtime::new(Some("alice"));
        realtime.on_request(|_| Ok(HttpResponse::ok(vec![history_item("no-at-sign", "x")])));
        let room = Room::new("lobby", RoomOptions::default(), realtime.clone(), "alice");

        let err = room
            .messages()
            .get(HistoryQuery::default())
            .await
            .expect_err("bad serial");
        assert_eq!(err.kind, ChatErrorKind::Format);
    }

    #[tokio::test]
    async fn send_surfaces_transport_errors() {
        let realtime = MemoryRealtime::new(Some("alice"));
        realtime.on_request(|_| Err(chat_transport::ErrorInfo::new(40160, 401, "no token")));
        let room = Room::new("lobby", RoomOptions::default(), realtime.clone(), "alice");

        let err = room
            .messages()
            .send(SendMessageParams::text("hi"))
            .await
            .expect_err("unauthorized");
        assert_eq!(err.kind, ChatErrorKind::Transport);
        assert_eq!(err.code, 40160);
    }

    #[tokio::test]
    async fn realtime_events_are_decoded() {
        let realtime = MemoryRealtime::new(Some("alice"));
        let room = Room::new("lobby", RoomOptions::default(), realtime.clone(), "alice");
        room.attach().await.expect("attach");
        let mut events = room.messages().subscribe();
        let channel = realtime.memory_channel(&room.messages().channel_name());

        channel.deliver(InboundMessage {
            name: "chat.message".into(),
            data: json!({"text": "garbled"}),
            client_id: Some("bob".into()),
            serial: Some("not a serial".into()),
            ..InboundMessage::default()
        });
        channel.deliver(InboundMessage {
            name: "chat.message".into(),
            data: json!({"text": "edited", "metadata": {"k": "v"}}),
            client_id: Some("bob".into()),
            serial: Some("abc@100-0".into()),
            version: Some("abc@150-0".into()),
            action: Some("message.update".into()),
            timestamp_ms: 150,
            created_at_ms: Some(100),
            extras: Some(json!({"headers": {"h": 1}})),
            ..InboundMessage::default()
        });

        let event = timeout(Duration::from_secs(2), next_event(&mut events))
            .await
            .expect("event timed out")
            .expect("stream open");
        assert_eq!(event.kind, MessageEventKind::Updated);
        assert_eq!(event.message.text, "edited");
        assert_eq!(event.message.version, "abc@150-0");
        assert_eq!(event.message.created_at_ms, 100);
        assert_eq!(event.message.headers.get("h"), Some(&json!(1)));
    }

    #[test]
    fn ignores_other_event_names() {
        let decoded = decode_event(&InboundMessage {
            name: "something.else".into(),
            ..InboundMessage::default()
        })
        .expect("not an error");
        assert!(decoded.is_none());
    }
}
