use std::sync::Arc;

use chat_core::{
    ChatError, DiscontinuityEvent, EventEmitter, EventStream, OccupancyEvent,
    normalization::occupancy_from_json,
};
use chat_transport::{HttpMethod, HttpRequest, InboundMessage, RealtimeChannel};

use super::{FeatureContext, first_item};
use crate::bridge;

pub(crate) const OCCUPANCY_EVENT_NAME: &str = "[meta]occupancy";

/// Room occupancy metrics.
#[derive(Clone)]
pub struct Occupancy {
    context: FeatureContext,
    channel: Arc<dyn RealtimeChannel>,
    events: EventEmitter<OccupancyEvent>,
    discontinuity: EventEmitter<DiscontinuityEvent>,
}

impl Occupancy {
    pub(crate) fn new(
        context: FeatureContext,
        channel: Arc<dyn RealtimeChannel>,
        events: EventEmitter<OccupancyEvent>,
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

    pub async fn get(&self) -> Result<OccupancyEvent, ChatError> {
        let request = HttpRequest::new(
            HttpMethod::Get,
            format!("/chat/v1/rooms/{}/occupancy", self.context.room),
        );
        let response = bridge::request(self.context.client.as_ref(), request).await?;
        occupancy_from_json(first_item(&response, "get occupancy")?)
    }

    pub fn subscribe(&self) -> EventStream<OccupancyEvent> {
        self.events.subscribe()
    }

    pub fn on_discontinuity(&self) -> EventStream<DiscontinuityEvent> {
        self.discontinuity.subscribe()
    }
}

pub(crate) fn decode_event(message: &InboundMessage) -> Result<Option<OccupancyEvent>, ChatError> {
    if message.name != OCCUPANCY_EVENT_NAME {
        return Ok(None);
    }
    occupancy_from_json(&message.data).map(Some)
}
