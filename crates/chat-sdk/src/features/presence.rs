use std::sync::Arc;

use chat_core::{
    ChatError, DiscontinuityEvent, EventEmitter, EventStream, PresenceEvent, PresenceEventKind,
    PresenceMember, PresenceOptions,
};
use chat_transport::{PresenceAction, PresenceMessage, PresenceQuery, RealtimeChannel};
use serde_json::{Value, json};
use tracing::debug;

use super::FeatureContext;
use crate::bridge;

const USER_DATA_KEY: &str = "userCustomData";

/// Room presence: who is here and what they advertise.
#[derive(Clone)]
pub struct Presence {
    context: FeatureContext,
    channel: Arc<dyn RealtimeChannel>,
    options: PresenceOptions,
    events: EventEmitter<PresenceEvent>,
    discontinuity: EventEmitter<DiscontinuityEvent>,
}

impl Presence {
    pub(crate) fn new(
        context: FeatureContext,
        channel: Arc<dyn RealtimeChannel>,
        options: PresenceOptions,
        events: EventEmitter<PresenceEvent>,
        discontinuity: EventEmitter<DiscontinuityEvent>,
    ) -> Self {
        Self {
            context,
            channel,
            options,
            events,
            discontinuity,
        }
    }

    pub fn channel_name(&self) -> String {
        self.channel.name()
    }

    pub async fn enter(&self, data: Option<Value>) -> Result<(), ChatError> {
        if !self.options.enter {
            return Err(ChatError::bad_request(
                "presence enter is disabled in room options",
            ));
        }
        self.context.require_attached("enter presence").await?;
        bridge::presence_enter(self.channel.presence().as_ref(), Some(wrap_data(data))).await?;
        debug!(room = %self.context.room, client_id = %self.context.client_id, "entered presence");
        Ok(())
    }

    pub async fn update(&self, data: Option<Value>) -> Result<(), ChatError> {
        self.context.require_attached("update presence").await?;
        bridge::presence_update(self.channel.presence().as_ref(), Some(wrap_data(data))).await
    }

    pub async fn leave(&self, data: Option<Value>) -> Result<(), ChatError> {
        self.context.require_attached("leave presence").await?;
        bridge::presence_leave(self.channel.presence().as_ref(), Some(wrap_data(data))).await?;
        debug!(room = %self.context.room, client_id = %self.context.client_id, "left presence");
        Ok(())
    }

    /// Current members, optionally filtered by client or connection.
    pub async fn get(&self, query: PresenceQuery) -> Result<Vec<PresenceMember>, ChatError> {
        let members = bridge::presence_get(self.channel.presence().as_ref(), query).await?;
        Ok(members
            .into_iter()
            .map(|member| PresenceMember {
                data: unwrap_data(member.data),
                client_id: member.client_id,
                updated_at_ms: member.timestamp_ms,
            })
            .collect())
    }

    pub async fn is_user_present(&self, client_id: &str) -> Result<bool, ChatError> {
        let members = self
            .get(PresenceQuery {
                client_id: Some(client_id.to_owned()),
                ..PresenceQuery::default()
            })
            .await?;
        Ok(!members.is_empty())
    }

    /// Stream of presence changes. Fails when the room was created without
    /// presence subscription.
    pub fn subscribe(&self) -> Result<EventStream<PresenceEvent>, ChatError> {
        if !self.options.subscribe {
            return Err(ChatError::bad_request(
                "presence subscription is disabled in room options",
            ));
        }
        Ok(self.events.subscribe())
    }

    pub fn on_discontinuity(&self) -> EventStream<DiscontinuityEvent> {
        self.discontinuity.subscribe()
    }
}

fn wrap_data(data: Option<Value>) -> Value {
    json!({ USER_DATA_KEY: data })
}

fn unwrap_data(data: Option<Value>) -> Option<Value> {
    match data? {
        Value::Object(mut wrapped) => wrapped.remove(USER_DATA_KEY).filter(|value| !value.is_null()),
        _ => None,
    }
}

pub(crate) fn event_from(message: PresenceMessage) -> PresenceEvent {
    let kind = match message.action {
        PresenceAction::Enter => PresenceEventKind::Enter,
        PresenceAction::Update => PresenceEventKind::Update,
        PresenceAction::Present => PresenceEventKind::Present,
        PresenceAction::Leave | PresenceAction::Absent => PresenceEventKind::Leave,
    };
    PresenceEvent {
        kind,
        client_id: message.client_id,
        data: unwrap_data(message.data),
        timestamp_ms: message.timestamp_ms,
    }
}

#[cfg(test)]
mod tests {
    use chat_core::{ChatErrorKind, RoomFeature, RoomOptions, codes, next_event};
    use chat_transport::memory::MemoryRealtime;
    use tokio::time::{Duration, timeout};

    use super::*;
    use crate::room::Room;

    fn presence_room(options: PresenceOptions) -> (Arc<MemoryRealtime>, Room) {
        let realtime = MemoryRealtime::new(Some("alice"));
        let room = Room::new(
            "lobby",
            RoomOptions {
                presence: Some(options),
                ..RoomOptions::default()
            },
            realtime.clone(),
            "alice",
        );
        (realtime, room)
    }

    #[tokio::test]
    async fn enter_wraps_data_and_get_unwraps_it() {
        let (realtime, room) = presence_room(PresenceOptions::enabled());
        room.attach().await.expect("attach");
        let presence = room.presence().expect("presence enabled");

        presence
            .enter(Some(json!({"status": "busy"})))
            .await
            .expect("enter");

        let members = presence.get(PresenceQuery::default()).await.expect("get");
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].client_id, "alice");
        assert_eq!(members[0].data, Some(json!({"status": "busy"})));
        assert!(presence.is_user_present("alice").await.expect("query"));
        assert!(!presence.is_user_present("bob").await.expect("query"));

        let memory = realtime
            .memory_channel(&RoomFeature::Presence.channel_name("lobby"))
            .memory_presence();
        assert_eq!(memory.enter_calls(), 1);
    }

    #[tokio::test]
    async fn enter_requires_attached_room() {
        let (_realtime, room) = presence_room(PresenceOptions::enabled());

        let err = room
            .presence()
            .expect("presence enabled")
            .enter(None)
            .await
            .expect_err("room is not attached");

        assert_eq!(err.kind, ChatErrorKind::InvalidRoomState);
        assert_eq!(err.code, codes::ROOM_IN_INVALID_STATE);
    }

    #[tokio::test]
    async fn enter_rejected_when_disabled() {
        let (_realtime, room) = presence_room(PresenceOptions {
            enter: false,
            subscribe: true,
        });
        room.attach().await.expect("attach");

        let err = room
            .presence()
            .expect("presence enabled")
            .enter(None)
            .await
            .expect_err("enter disabled");
        assert_eq!(err.kind, ChatErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn subscribe_rejected_when_disabled() {
        let (realtime, room) = presence_room(PresenceOptions {
            enter: true,
            subscribe: false,
        });

        assert!(room.presence().expect("presence enabled").subscribe().is_err());
        let memory = realtime
            .memory_channel(&RoomFeature::Presence.channel_name("lobby"))
            .memory_presence();
        assert_eq!(memory.listener_count(), 0);
    }

    #[tokio::test]
    async fn remote_changes_are_streamed() {
        let (realtime, room) = presence_room(PresenceOptions::enabled());
        room.attach().await.expect("attach");
        let mut events = room
            .presence()
            .expect("presence enabled")
            .subscribe()
            .expect("subscribe enabled");
        let memory = realtime
            .memory_channel(&RoomFeature::Presence.channel_name("lobby"))
            .memory_presence();

        memory.simulate(PresenceMessage {
            action: PresenceAction::Enter,
            client_id: "bob".into(),
            connection_id: Some("conn-1".into()),
            data: Some(json!({USER_DATA_KEY: "hi"})),
            timestamp_ms: 42,
        });
        memory.simulate(PresenceMessage {
            action: PresenceAction::Absent,
            client_id: "bob".into(),
            connection_id: Some("conn-1".into()),
            data: None,
            timestamp_ms: 43,
        });

        let entered = timeout(Duration::from_secs(2), next_event(&mut events))
            .await
            .expect("event timed out")
            .expect("stream open");
        assert_eq!(entered.kind, PresenceEventKind::Enter);
        assert_eq!(entered.data, Some(json!("hi")));
        assert_eq!(entered.timestamp_ms, 42);

        let left = timeout(Duration::from_secs(2), next_event(&mut events))
            .await
            .expect("event timed out")
            .expect("stream open");
        assert_eq!(left.kind, PresenceEventKind::Leave);
    }

    #[test]
    fn unwraps_only_user_data() {
        assert_eq!(unwrap_data(Some(json!({USER_DATA_KEY: 5}))), Some(json!(5)));
        assert_eq!(unwrap_data(Some(json!({USER_DATA_KEY: null}))), None);
        assert_eq!(unwrap_data(Some(json!("raw"))), None);
        assert_eq!(unwrap_data(None), None);
    }
}
