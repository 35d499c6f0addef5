use std::{collections::BTreeSet, sync::Arc, time::Duration};

use chat_core::{
    ChatError, DiscontinuityEvent, EventEmitter, EventStream, TypingChange, TypingChangeKind,
    TypingEvent, TypingOptions,
};
use chat_transport::{PresenceAction, PresenceMessage, PresenceQuery, RealtimeChannel};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::FeatureContext;
use crate::bridge;

#[derive(Default)]
struct TypingState {
    /// Armed while this client is typing; cancelling it disarms the expiry.
    timer: Option<CancellationToken>,
}

/// Typing indicators built on presence of a dedicated channel.
#[derive(Clone)]
pub struct Typing {
    context: FeatureContext,
    channel: Arc<dyn RealtimeChannel>,
    timeout: Duration,
    state: Arc<Mutex<TypingState>>,
    events: EventEmitter<TypingEvent>,
    discontinuity: EventEmitter<DiscontinuityEvent>,
}

impl Typing {
    pub(crate) fn new(
        context: FeatureContext,
        channel: Arc<dyn RealtimeChannel>,
        options: TypingOptions,
        events: EventEmitter<TypingEvent>,
        discontinuity: EventEmitter<DiscontinuityEvent>,
    ) -> Self {
        Self {
            context,
            channel,
            timeout: options.timeout,
            state: Arc::new(Mutex::new(TypingState::default())),
            events,
            discontinuity,
        }
    }

    pub fn channel_name(&self) -> String {
        self.channel.name()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Signal that the user is typing. Only the first keystroke of a burst
    /// reaches the transport; later ones push the expiry back.
    pub async fn keystroke(&self) -> Result<(), ChatError> {
        self.context.require_attached("start typing").await?;

        let mut state = self.state.lock().await;
        if let Some(timer) = state.timer.take() {
            timer.cancel();
            state.timer = Some(self.arm());
            return Ok(());
        }

        bridge::presence_enter(self.channel.presence().as_ref(), None).await?;
        debug!(room = %self.context.room, "typing started");
        state.timer = Some(self.arm());
        Ok(())
    }

    /// Stop typing now. A no-op when not typing.
    pub async fn stop(&self) -> Result<(), ChatError> {
        self.context.require_attached("stop typing").await?;

        let mut state = self.state.lock().await;
        let Some(timer) = state.timer.take() else {
            return Ok(());
        };
        timer.cancel();
        bridge::presence_leave(self.channel.presence().as_ref(), None).await?;
        debug!(room = %self.context.room, "typing stopped");
        Ok(())
    }

    /// Client ids currently typing, as reported by the transport.
    pub async fn get(&self) -> Result<BTreeSet<String>, ChatError> {
        let members =
            bridge::presence_get(self.channel.presence().as_ref(), PresenceQuery::default())
                .await?;
        Ok(members.into_iter().map(|member| member.client_id).collect())
    }

    pub fn subscribe(&self) -> EventStream<TypingEvent> {
        self.events.subscribe()
    }

    pub fn on_discontinuity(&self) -> EventStream<DiscontinuityEvent> {
        self.discontinuity.subscribe()
    }

    fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let timer = token.clone();
        let state = Arc::clone(&self.state);
        let channel = Arc::clone(&self.channel);
        let mut status = self.context.status.clone();
        let room = self.context.room.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            let room_inactive = tokio::select! {
                _ = timer.cancelled() => return,
                _ = tokio::time::sleep(timeout) => false,
                _ = status.wait_for(|status| !status.accepts_feature_events()) => true,
            };

            let mut state = state.lock().await;
            // A keystroke or stop may have won the lock after the wait ended.
            if timer.is_cancelled() {
                return;
            }
            state.timer = None;
            if room_inactive || !status.borrow().accepts_feature_events() {
                debug!(room = %room, "room no longer active; dropping typing timer");
                return;
            }
            match bridge::presence_leave(channel.presence().as_ref(), None).await {
                Ok(()) => debug!(room = %room, "typing expired"),
                Err(err) => warn!(room = %room, error = %err, "failed to leave typing presence"),
            }
        });

        token
    }
}

/// Fold a typing-channel presence change into the typer set, returning the
/// event to publish when the set changed.
pub(crate) fn apply_presence(
    typers: &mut BTreeSet<String>,
    message: PresenceMessage,
) -> Option<TypingEvent> {
    let kind = match message.action {
        PresenceAction::Enter | PresenceAction::Present | PresenceAction::Update => {
            if !typers.insert(message.client_id.clone()) {
                return None;
            }
            TypingChangeKind::Started
        }
        PresenceAction::Leave | PresenceAction::Absent => {
            if !typers.remove(&message.client_id) {
                return None;
            }
            TypingChangeKind::Stopped
        }
    };

    Some(TypingEvent {
        currently_typing: typers.clone(),
        change: TypingChange {
            client_id: message.client_id,
            kind,
        },
    })
}
