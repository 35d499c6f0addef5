//! Caller-facing handle to one chat room.

use std::sync::Arc;

use chat_core::{
    ChatError, DiscontinuityEvent, EventStream, RoomFeature, RoomOperation, RoomOptions,
    RoomStatus, RoomStatusChange,
};
use chat_transport::RealtimeClient;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;
use uuid::Uuid;

use crate::{
    features::{
        FeatureContext, Messages, Occupancy, Presence, Reactions, Typing, channel_options,
    },
    lifecycle::{self, Command, RoomEvents, RoomSetup},
};

/// A named room composed of one transport channel per enabled feature.
///
/// Cloning is cheap; every clone drives the same room.
#[derive(Clone)]
pub struct Room {
    inner: Arc<RoomInner>,
}

struct RoomInner {
    name: String,
    nonce: Uuid,
    options: RoomOptions,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<RoomStatus>,
    events: RoomEvents,
    messages: Messages,
    presence: Option<Presence>,
    typing: Option<Typing>,
    reactions: Option<Reactions>,
    occupancy: Option<Occupancy>,
}

impl Room {
    pub(crate) fn new(
        name: impl Into<String>,
        options: RoomOptions,
        client: Arc<dyn RealtimeClient>,
        client_id: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let client_id = client_id.into();
        let nonce = Uuid::new_v4();
        let events = RoomEvents::new();
        let (status_tx, status_rx) = watch::channel(RoomStatus::Initialized);

        let context = FeatureContext {
            room: name.clone(),
            client: Arc::clone(&client),
            client_id: client_id.clone(),
            status: status_rx.clone(),
        };

        let open = |feature: RoomFeature| {
            client.channel(&feature.channel_name(&name), &channel_options(feature))
        };
        let messages_channel = open(RoomFeature::Messages);
        let mut channels = vec![(RoomFeature::Messages, Arc::clone(&messages_channel))];
        channels.extend(
            options
                .features()
                .into_iter()
                .filter(|feature| *feature != RoomFeature::Messages)
                .map(|feature| (feature, open(feature))),
        );
        let channel_for = |wanted: RoomFeature| {
            channels
                .iter()
                .find(|(feature, _)| *feature == wanted)
                .map(|(_, channel)| Arc::clone(channel))
        };

        let messages = Messages::new(
            context.clone(),
            messages_channel,
            events.messages.clone(),
            events.discontinuity_for(RoomFeature::Messages),
        );
        let presence = options
            .presence
            .clone()
            .zip(channel_for(RoomFeature::Presence))
            .map(|(presence_options, channel)| {
                Presence::new(
                    context.clone(),
                    channel,
                    presence_options,
                    events.presence.clone(),
                    events.discontinuity_for(RoomFeature::Presence),
                )
            });
        let typing = options
            .typing
            .clone()
            .zip(channel_for(RoomFeature::Typing))
            .map(|(typing_options, channel)| {
                Typing::new(
                    context.clone(),
                    channel,
                    typing_options,
                    events.typing.clone(),
                    events.discontinuity_for(RoomFeature::Typing),
                )
            });
        let reactions = channel_for(RoomFeature::Reactions).map(|channel| {
            Reactions::new(
                context.clone(),
                channel,
                events.reactions.clone(),
                events.discontinuity_for(RoomFeature::Reactions),
            )
        });
        let occupancy = channel_for(RoomFeature::Occupancy).map(|channel| {
            Occupancy::new(
                context.clone(),
                channel,
                events.occupancy.clone(),
                events.discontinuity_for(RoomFeature::Occupancy),
            )
        });

        debug!(
            room = %name,
            nonce = %nonce,
            features = ?options.features(),
            "creating room"
        );
        let commands = lifecycle::spawn(
            RoomSetup {
                name: name.clone(),
                nonce,
                client,
                client_id,
                channels,
                status_tx,
                events: events.clone(),
            },
            &options,
        );

        Self {
            inner: Arc::new(RoomInner {
                name,
                nonce,
                options,
                commands,
                status: status_rx,
                events,
                messages,
                presence,
                typing,
                reactions,
                occupancy,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Random per-instance id; distinguishes a room from a later one with
    /// the same name.
    pub fn nonce(&self) -> Uuid {
        self.inner.nonce
    }

    pub fn options(&self) -> &RoomOptions {
        &self.inner.options
    }

    pub fn status(&self) -> RoomStatus {
        self.inner.status.borrow().clone()
    }

    /// Error carried by the current status, if any.
    pub fn error(&self) -> Option<ChatError> {
        self.inner.status.borrow().error().cloned()
    }

    /// Watch handle for waiting on a particular status.
    pub fn status_watch(&self) -> watch::Receiver<RoomStatus> {
        self.inner.status.clone()
    }

    pub fn on_status_change(&self) -> EventStream<RoomStatusChange> {
        self.inner.events.status.subscribe()
    }

    /// Discontinuities across every feature of the room.
    pub fn on_discontinuity(&self) -> EventStream<DiscontinuityEvent> {
        self.inner.events.discontinuity.subscribe()
    }

    /// Attach every feature channel. Concurrent calls share one attach.
    pub async fn attach(&self) -> Result<(), ChatError> {
        self.send(RoomOperation::Attach).await
    }

    /// Detach every feature channel. Concurrent calls share one detach.
    pub async fn detach(&self) -> Result<(), ChatError> {
        self.send(RoomOperation::Detach).await
    }

    /// Tear the room down for good. Idempotent.
    pub async fn release(&self) -> Result<(), ChatError> {
        self.send(RoomOperation::Release).await
    }

    pub fn messages(&self) -> &Messages {
        &self.inner.messages
    }

    pub fn presence(&self) -> Result<&Presence, ChatError> {
        self.inner
            .presence
            .as_ref()
            .ok_or_else(|| ChatError::feature_not_enabled(RoomFeature::Presence))
    }

    pub fn typing(&self) -> Result<&Typing, ChatError> {
        self.inner
            .typing
            .as_ref()
            .ok_or_else(|| ChatError::feature_not_enabled(RoomFeature::Typing))
    }

    pub fn reactions(&self) -> Result<&Reactions, ChatError> {
        self.inner
            .reactions
            .as_ref()
            .ok_or_else(|| ChatError::feature_not_enabled(RoomFeature::Reactions))
    }

    pub fn occupancy(&self) -> Result<&Occupancy, ChatError> {
        self.inner
            .occupancy
            .as_ref()
            .ok_or_else(|| ChatError::feature_not_enabled(RoomFeature::Occupancy))
    }

    async fn send(&self, operation: RoomOperation) -> Result<(), ChatError> {
        let gone = || ChatError::invalid_room_state(&RoomStatus::Released, operation.label());
        let (reply, response) = oneshot::channel();
        self.inner
            .commands
            .send(Command { operation, reply })
            .map_err(|_| gone())?;
        response.await.map_err(|_| gone())?
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("name", &self.inner.name)
            .field("nonce", &self.inner.nonce)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
