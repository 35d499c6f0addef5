//! Room actor: the single execution context owning room state.
//!
//! Commands (attach/detach/release) and transport signals (channel state,
//! messages, presence) are both drained by one task. Transport operations run
//! in spawned tasks that report back with [`Signal::Finished`], so the actor
//! never blocks and can admit, join or reject commands while an operation is
//! in flight.

use std::{collections::BTreeSet, sync::Arc};

use chat_core::{
    Admission, ChatError, DiscontinuityEvent, EventEmitter, MessageEvent, OccupancyEvent,
    PresenceEvent, Reaction, RoomFeature, RoomLifecycle, RoomOperation, RoomOptions, RoomStatus,
    RoomStatusChange, TypingEvent,
};
use chat_transport::{
    ChannelState, ChannelStateChange, InboundMessage, ListenerId, PresenceMessage,
    RealtimeChannel, RealtimeClient,
};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::{
    bridge::{self, map_transport_error},
    features::{messages, occupancy, presence, reactions, typing},
};

const EVENT_CAPACITY: usize = 256;

pub(crate) type Reply = oneshot::Sender<Result<(), ChatError>>;

pub(crate) struct Command {
    pub(crate) operation: RoomOperation,
    pub(crate) reply: Reply,
}

pub(crate) enum Signal {
    ChannelState {
        feature: RoomFeature,
        change: ChannelStateChange,
    },
    Message {
        feature: RoomFeature,
        message: InboundMessage,
    },
    Presence {
        feature: RoomFeature,
        message: PresenceMessage,
    },
    Finished {
        operation: RoomOperation,
        result: Result<(), ChatError>,
    },
}

/// Emitters for everything a room delivers to callers.
#[derive(Clone)]
pub(crate) struct RoomEvents {
    pub(crate) status: EventEmitter<RoomStatusChange>,
    pub(crate) discontinuity: EventEmitter<DiscontinuityEvent>,
    feature_discontinuity: [EventEmitter<DiscontinuityEvent>; RoomFeature::ALL.len()],
    pub(crate) messages: EventEmitter<MessageEvent>,
    pub(crate) presence: EventEmitter<PresenceEvent>,
    pub(crate) typing: EventEmitter<TypingEvent>,
    pub(crate) reactions: EventEmitter<Reaction>,
    pub(crate) occupancy: EventEmitter<OccupancyEvent>,
}

impl RoomEvents {
    pub(crate) fn new() -> Self {
        Self {
            status: EventEmitter::new(EVENT_CAPACITY),
            discontinuity: EventEmitter::new(EVENT_CAPACITY),
            feature_discontinuity: std::array::from_fn(|_| EventEmitter::new(EVENT_CAPACITY)),
            messages: EventEmitter::new(EVENT_CAPACITY),
            presence: EventEmitter::new(EVENT_CAPACITY),
            typing: EventEmitter::new(EVENT_CAPACITY),
            reactions: EventEmitter::new(EVENT_CAPACITY),
            occupancy: EventEmitter::new(EVENT_CAPACITY),
        }
    }

    pub(crate) fn discontinuity_for(&self, feature: RoomFeature) -> EventEmitter<DiscontinuityEvent> {
        self.feature_discontinuity[feature as usize].clone()
    }
}

/// Everything the actor needs at construction.
pub(crate) struct RoomSetup {
    pub(crate) name: String,
    pub(crate) nonce: Uuid,
    pub(crate) client: Arc<dyn RealtimeClient>,
    pub(crate) client_id: String,
    /// Feature channels in attach order.
    pub(crate) channels: Vec<(RoomFeature, Arc<dyn RealtimeChannel>)>,
    pub(crate) status_tx: watch::Sender<RoomStatus>,
    pub(crate) events: RoomEvents,
}

enum Subscription {
    State(ListenerId),
    Messages(ListenerId),
    Presence(ListenerId),
}

/// One feature channel as seen by the lifecycle manager.
struct Contributor {
    feature: RoomFeature,
    channel: Arc<dyn RealtimeChannel>,
    subscriptions: Vec<Subscription>,
    /// Last state reported by the transport.
    state: ChannelState,
    has_been_attached: bool,
    pending_discontinuity: Option<ChatError>,
}

impl Contributor {
    fn wire(
        feature: RoomFeature,
        channel: Arc<dyn RealtimeChannel>,
        options: &RoomOptions,
        signals: &mpsc::UnboundedSender<Signal>,
    ) -> Self {
        let mut subscriptions = vec![Subscription::State(channel.on_state_change(
            bridge::marshal(signals.clone(), move |change| Signal::ChannelState {
                feature,
                change,
            }),
        ))];

        let wants_messages = matches!(
            feature,
            RoomFeature::Messages | RoomFeature::Reactions | RoomFeature::Occupancy
        );
        let wants_presence = match feature {
            RoomFeature::Presence => options
                .presence
                .as_ref()
                .is_some_and(|presence| presence.subscribe),
            RoomFeature::Typing => true,
            _ => false,
        };

        if wants_messages {
            subscriptions.push(Subscription::Messages(channel.subscribe(bridge::marshal(
                signals.clone(),
                move |message| Signal::Message { feature, message },
            ))));
        }
        if wants_presence {
            subscriptions.push(Subscription::Presence(channel.presence().subscribe(
                bridge::marshal(signals.clone(), move |message| Signal::Presence {
                    feature,
                    message,
                }),
            )));
        }

        Self {
            state: channel.state(),
            feature,
            channel,
            subscriptions,
            has_been_attached: false,
            pending_discontinuity: None,
        }
    }

    fn unwire(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            match subscription {
                Subscription::State(id) => self.channel.off(id),
                Subscription::Messages(id) => self.channel.unsubscribe(id),
                Subscription::Presence(id) => self.channel.presence().unsubscribe(id),
            }
        }
    }

    fn forget_attachment(&mut self) {
        self.has_been_attached = false;
        self.pending_discontinuity = None;
    }
}

struct InFlight {
    operation: RoomOperation,
    waiters: Vec<Reply>,
}

/// Spawn the actor for one room and return its command sender.
pub(crate) fn spawn(setup: RoomSetup, options: &RoomOptions) -> mpsc::UnboundedSender<Command> {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (signals_tx, signals_rx) = mpsc::unbounded_channel();

    let contributors = setup
        .channels
        .into_iter()
        .map(|(feature, channel)| Contributor::wire(feature, channel, options, &signals_tx))
        .collect();

    let actor = RoomActor {
        name: setup.name,
        nonce: setup.nonce,
        client: setup.client,
        client_id: setup.client_id,
        lifecycle: RoomLifecycle::default(),
        contributors,
        status_tx: setup.status_tx,
        events: setup.events,
        commands: commands_rx,
        signals: signals_rx,
        signals_tx,
        in_flight: None,
        release_waiters: Vec::new(),
        typers: BTreeSet::new(),
    };
    tokio::spawn(actor.run());

    commands_tx
}

struct RoomActor {
    name: String,
    nonce: Uuid,
    client: Arc<dyn RealtimeClient>,
    client_id: String,
    lifecycle: RoomLifecycle,
    contributors: Vec<Contributor>,
    status_tx: watch::Sender<RoomStatus>,
    events: RoomEvents,
    commands: mpsc::UnboundedReceiver<Command>,
    signals: mpsc::UnboundedReceiver<Signal>,
    signals_tx: mpsc::UnboundedSender<Signal>,
    in_flight: Option<InFlight>,
    release_waiters: Vec<Reply>,
    typers: BTreeSet<String>,
}

impl RoomActor {
    async fn run(mut self) {
        debug!(room = %self.name, nonce = %self.nonce, "room actor started");
        loop {
            tokio::select! {
                // Signals first: a command sees every event delivered before it.
                biased;
                Some(signal) = self.signals.recv() => self.handle_signal(signal),
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    self.handle_command(command);
                }
            }
        }
        debug!(room = %self.name, nonce = %self.nonce, "room actor exiting");
    }

    fn handle_command(&mut self, command: Command) {
        let Command { operation, reply } = command;
        match self.lifecycle.admit(operation) {
            Err(err) => {
                debug!(
                    room = %self.name,
                    operation = operation.label(),
                    error = %err,
                    "room operation rejected"
                );
                let _ = reply.send(Err(err));
            }
            Ok(Admission::AlreadyDone) => {
                let _ = reply.send(Ok(()));
            }
            Ok(Admission::JoinInFlight) => self.join(operation, reply),
            Ok(Admission::Proceed(change)) => {
                self.publish_status(change);
                self.start(operation, reply);
            }
            Ok(Admission::DeferredRelease(change)) => {
                debug!(
                    room = %self.name,
                    "release requested mid-operation; deferring until it finishes"
                );
                self.publish_status(change);
                self.release_waiters.push(reply);
            }
        }
    }

    fn join(&mut self, operation: RoomOperation, reply: Reply) {
        if operation == RoomOperation::Release {
            self.release_waiters.push(reply);
            return;
        }
        match &mut self.in_flight {
            Some(in_flight) if in_flight.operation == operation => in_flight.waiters.push(reply),
            _ => {
                let _ = reply.send(Err(ChatError::invalid_room_state(
                    self.lifecycle.status(),
                    operation.label(),
                )));
            }
        }
    }

    fn start(&mut self, operation: RoomOperation, reply: Reply) {
        match operation {
            RoomOperation::Attach => {
                self.in_flight = Some(InFlight {
                    operation,
                    waiters: vec![reply],
                });
                let channels = self.channels();
                let room = self.name.clone();
                self.spawn_operation(operation, attach_all(room, channels));
            }
            RoomOperation::Detach => {
                self.in_flight = Some(InFlight {
                    operation,
                    waiters: vec![reply],
                });
                let channels = self.channels();
                let room = self.name.clone();
                self.spawn_operation(operation, detach_all(room, channels));
            }
            RoomOperation::Release => {
                self.release_waiters.push(reply);
                self.start_release();
            }
        }
    }

    fn start_release(&mut self) {
        for contributor in &mut self.contributors {
            contributor.forget_attachment();
        }
        let channels = self.channels();
        let room = self.name.clone();
        self.spawn_operation(RoomOperation::Release, async move {
            detach_best_effort(&room, channels, "release").await;
            Ok(())
        });
    }

    fn spawn_operation<F>(&self, operation: RoomOperation, work: F)
    where
        F: Future<Output = Result<(), ChatError>> + Send + 'static,
    {
        let signals = self.signals_tx.clone();
        let room = self.name.clone();
        tokio::spawn(async move {
            // Inner spawn so a panicking transport call still reports back.
            let result = match tokio::spawn(work).await {
                Ok(result) => result,
                Err(join_err) => {
                    let detail = if join_err.is_panic() {
                        panic_message(join_err.into_panic())
                    } else {
                        join_err.to_string()
                    };
                    error!(
                        room = %room,
                        operation = operation.label(),
                        detail = %detail,
                        "room operation aborted"
                    );
                    Err(ChatError::operation_aborted(operation.label(), detail))
                }
            };
            let _ = signals.send(Signal::Finished { operation, result });
        });
    }

    fn channels(&self) -> Vec<(RoomFeature, Arc<dyn RealtimeChannel>)> {
        self.contributors
            .iter()
            .map(|contributor| (contributor.feature, Arc::clone(&contributor.channel)))
            .collect()
    }

    fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::ChannelState { feature, change } => self.on_channel_state(feature, change),
            Signal::Message { feature, message } => self.on_message(feature, message),
            Signal::Presence { feature, message } => self.on_presence(feature, message),
            Signal::Finished { operation, result } => self.on_finished(operation, result),
        }
    }

    fn on_finished(&mut self, operation: RoomOperation, result: Result<(), ChatError>) {
        if operation == RoomOperation::Release {
            self.complete_release();
            return;
        }

        let waiters = self
            .in_flight
            .take()
            .map(|in_flight| in_flight.waiters)
            .unwrap_or_default();

        if self.lifecycle.status() == &RoomStatus::Releasing {
            for waiter in waiters {
                let _ = waiter.send(Err(ChatError::released_before_completion(
                    operation.label(),
                )));
            }
            self.start_release();
            return;
        }

        match (&operation, &result) {
            (RoomOperation::Attach, Ok(())) => {
                self.set_status(RoomStatus::Attached);
                self.flush_pending_discontinuities();
            }
            (RoomOperation::Detach, Ok(())) => {
                for contributor in &mut self.contributors {
                    contributor.forget_attachment();
                }
                self.set_status(RoomStatus::Detached);
            }
            (_, Err(err)) => self.set_status(RoomStatus::Failed(err.clone())),
            (RoomOperation::Release, Ok(())) => {}
        }

        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    fn complete_release(&mut self) {
        for contributor in &mut self.contributors {
            contributor.unwire();
            self.client.release_channel(&contributor.channel.name());
        }
        self.typers.clear();
        self.set_status(RoomStatus::Released);
        for waiter in self.release_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    fn on_channel_state(&mut self, feature: RoomFeature, change: ChannelStateChange) {
        let Some(idx) = self
            .contributors
            .iter()
            .position(|contributor| contributor.feature == feature)
        else {
            return;
        };
        trace!(
            room = %self.name,
            feature = feature.label(),
            previous = ?change.previous,
            current = ?change.current,
            resumed = change.resumed,
            "feature channel state changed"
        );

        let status = self.lifecycle.status().clone();
        self.contributors[idx].state = change.current;
        let reason = change.reason.map(map_transport_error);

        match change.current {
            ChannelState::Attached => {
                let contributor = &mut self.contributors[idx];
                let lost_continuity = contributor.has_been_attached && !change.resumed;
                contributor.has_been_attached = true;

                if lost_continuity {
                    let cause = ChatError::discontinuity(feature, reason);
                    match status {
                        RoomStatus::Attaching => {
                            contributor.pending_discontinuity.get_or_insert(cause);
                        }
                        RoomStatus::Attached | RoomStatus::Suspended(_) => {
                            self.emit_discontinuity(feature, cause)
                        }
                        _ => {}
                    }
                }

                if matches!(status, RoomStatus::Suspended(_))
                    && self
                        .contributors
                        .iter()
                        .all(|contributor| contributor.state == ChannelState::Attached)
                {
                    debug!(room = %self.name, "every feature channel reattached");
                    self.set_status(RoomStatus::Attached);
                }
            }
            ChannelState::Failed
                if matches!(status, RoomStatus::Attached | RoomStatus::Suspended(_)) =>
            {
                let err = ChatError::channel_failed(feature, reason);
                warn!(
                    room = %self.name,
                    feature = feature.label(),
                    error = %err,
                    "feature channel failed; failing room"
                );
                self.set_status(RoomStatus::Failed(err));
                self.detach_others(feature);
            }
            ChannelState::Suspended if status == RoomStatus::Attached => {
                let err = ChatError::channel_suspended(feature, reason);
                warn!(
                    room = %self.name,
                    feature = feature.label(),
                    error = %err,
                    "feature channel suspended"
                );
                self.set_status(RoomStatus::Suspended(err));
            }
            _ => {}
        }
    }

    fn detach_others(&self, failed: RoomFeature) {
        let channels: Vec<_> = self
            .channels()
            .into_iter()
            .filter(|(feature, _)| *feature != failed)
            .collect();
        let room = self.name.clone();
        tokio::spawn(async move {
            detach_best_effort(&room, channels, "channel failure").await;
        });
    }

    fn on_message(&mut self, feature: RoomFeature, message: InboundMessage) {
        if !self.lifecycle.status().accepts_feature_events() {
            trace!(room = %self.name, feature = feature.label(), "dropping message for inactive room");
            return;
        }

        let decoded = match feature {
            RoomFeature::Messages => messages::decode_event(&message).map(|event| {
                if let Some(event) = event {
                    self.events.messages.emit(event);
                }
            }),
            RoomFeature::Reactions => {
                reactions::decode_reaction(&message, &self.client_id).map(|reaction| {
                    if let Some(reaction) = reaction {
                        self.events.reactions.emit(reaction);
                    }
                })
            }
            RoomFeature::Occupancy => occupancy::decode_event(&message).map(|event| {
                if let Some(event) = event {
                    self.events.occupancy.emit(event);
                }
            }),
            RoomFeature::Presence | RoomFeature::Typing => Ok(()),
        };

        if let Err(err) = decoded {
            warn!(
                room = %self.name,
                feature = feature.label(),
                name = %message.name,
                error = %err,
                "dropping undecodable message"
            );
        }
    }

    fn on_presence(&mut self, feature: RoomFeature, message: PresenceMessage) {
        if !self.lifecycle.status().accepts_feature_events() {
            trace!(room = %self.name, feature = feature.label(), "dropping presence for inactive room");
            return;
        }

        match feature {
            RoomFeature::Presence => self.events.presence.emit(presence::event_from(message)),
            RoomFeature::Typing => {
                if let Some(event) = typing::apply_presence(&mut self.typers, message) {
                    self.events.typing.emit(event);
                }
            }
            _ => {}
        }
    }

    fn flush_pending_discontinuities(&mut self) {
        let pending: Vec<_> = self
            .contributors
            .iter_mut()
            .filter_map(|contributor| {
                contributor
                    .pending_discontinuity
                    .take()
                    .map(|cause| (contributor.feature, cause))
            })
            .collect();
        for (feature, cause) in pending {
            self.emit_discontinuity(feature, cause);
        }
    }

    fn emit_discontinuity(&self, feature: RoomFeature, cause: ChatError) {
        debug!(room = %self.name, feature = feature.label(), "discontinuity detected");
        let event = DiscontinuityEvent { feature, cause };
        self.events.discontinuity_for(feature).emit(event.clone());
        self.events.discontinuity.emit(event);
    }

    fn set_status(&mut self, next: RoomStatus) {
        if let Some(change) = self.lifecycle.transition_if_changed(next) {
            self.publish_status(change);
        }
    }

    fn publish_status(&self, change: RoomStatusChange) {
        debug!(
            room = %self.name,
            nonce = %self.nonce,
            from = change.previous.label(),
            to = change.current.label(),
            "room status changed"
        );
        self.status_tx.send_replace(change.current.clone());
        self.events.status.emit(change);
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "task panicked".to_owned())
}

/// Attach every channel in order; on the first failure detach the ones that
/// already attached and report the failure.
async fn attach_all(
    room: String,
    channels: Vec<(RoomFeature, Arc<dyn RealtimeChannel>)>,
) -> Result<(), ChatError> {
    for (idx, (feature, channel)) in channels.iter().enumerate() {
        let Err(cause) = bridge::attach(channel.as_ref()).await else {
            continue;
        };
        let err = ChatError::attach_failure(*feature, cause);
        warn!(
            room = %room,
            feature = feature.label(),
            error = %err,
            "feature channel failed to attach; rolling back"
        );
        for (attached_feature, attached) in &channels[..idx] {
            if let Err(rollback_err) = bridge::detach(attached.as_ref()).await {
                warn!(
                    room = %room,
                    feature = attached_feature.label(),
                    error = %rollback_err,
                    "rollback detach failed"
                );
            }
        }
        return Err(err);
    }
    Ok(())
}

async fn detach_all(
    room: String,
    channels: Vec<(RoomFeature, Arc<dyn RealtimeChannel>)>,
) -> Result<(), ChatError> {
    let mut first_error = None;
    for (feature, channel) in &channels {
        if let Err(cause) = bridge::detach(channel.as_ref()).await {
            let err = ChatError::detach_failure(*feature, cause);
            warn!(
                room = %room,
                feature = feature.label(),
                error = %err,
                "feature channel failed to detach"
            );
            first_error.get_or_insert(err);
        }
    }
    first_error.map_or(Ok(()), Err)
}

async fn detach_best_effort(
    room: &str,
    channels: Vec<(RoomFeature, Arc<dyn RealtimeChannel>)>,
    reason: &str,
) {
    for (feature, channel) in channels {
        if matches!(
            channel.state(),
            ChannelState::Initialized | ChannelState::Detached | ChannelState::Failed
        ) {
            continue;
        }
        if let Err(err) = bridge::detach(channel.as_ref()).await {
            warn!(
                room = %room,
                feature = feature.label(),
                reason,
                error = %err,
                "best-effort detach failed"
            );
        }
    }
}
