use std::sync::Arc;

use chat_core::{
    ChatError, DiscontinuityEvent, EventEmitter, EventStream, Reaction, SendReactionParams,
};
use chat_transport::{InboundMessage, OutboundMessage, RealtimeChannel};
use serde_json::{Map, Value, json};

use super::FeatureContext;
use crate::bridge;

pub(crate) const REACTION_EVENT_NAME: &str = "roomReaction";

/// Ephemeral room-level reactions.
#[derive(Clone)]
pub struct Reactions {
    context: FeatureContext,
    channel: Arc<dyn RealtimeChannel>,
    events: EventEmitter<Reaction>,
    discontinuity: EventEmitter<DiscontinuityEvent>,
}

impl Reactions {
    pub(crate) fn new(
        context: FeatureContext,
        channel: Arc<dyn RealtimeChannel>,
        events: EventEmitter<Reaction>,
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

    pub async fn send(&self, params: SendReactionParams) -> Result<(), ChatError> {
        if params.name.is_empty() {
            return Err(ChatError::bad_request("reaction name must not be empty"));
        }
        self.context.require_attached("send reaction").await?;

        let mut data = Map::new();
        data.insert("type".to_owned(), Value::String(params.name));
        if let Some(metadata) = params.metadata {
            data.insert("metadata".to_owned(), Value::Object(metadata));
        }
        let message = OutboundMessage {
            name: REACTION_EVENT_NAME.to_owned(),
            data: Value::Object(data),
            extras: Some(json!({ "headers": params.headers.unwrap_or_default() })),
        };
        bridge::publish(self.channel.as_ref(), message).await
    }

    pub fn subscribe(&self) -> EventStream<Reaction> {
        self.events.subscribe()
    }

    pub fn on_discontinuity(&self) -> EventStream<DiscontinuityEvent> {
        self.discontinuity.subscribe()
    }
}

/// Decode an inbound reaction. Other event names yield `None`.
pub(crate) fn decode_reaction(
    message: &InboundMessage,
    own_client_id: &str,
) -> Result<Option<Reaction>, ChatError> {
    if message.name != REACTION_EVENT_NAME {
        return Ok(None);
    }

    let name = message
        .data
        .get("type")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ChatError::format("reaction without type"))?;
    let client_id = message
        .client_id
        .clone()
        .ok_or_else(|| ChatError::format("reaction without client id"))?;

    Ok(Some(Reaction {
        name: name.to_owned(),
        metadata: message
            .data
            .get("metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
        headers: message
            .extras
            .as_ref()
            .and_then(|extras| extras.get("headers"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
        is_self: client_id == own_client_id,
        client_id,
        created_at_ms: message.timestamp_ms,
    }))
}
