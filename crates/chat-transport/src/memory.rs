//! Scriptable in-process transport.
//!
//! Every one-shot operation resolves according to a configurable
//! [`Outcome`], listener callbacks run synchronously on the calling thread,
//! and call counts are recorded so tests can assert on what reached the
//! transport.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde_json::Value;

use crate::{
    ChannelOptions, ChannelState, ChannelStateChange, Completion, ConnectionState,
    ConnectionStateChange, ErrorInfo, HttpRequest, HttpResponse, InboundMessage, Listener,
    ListenerId, OutboundMessage, PresenceAction, PresenceMessage, PresenceQuery,
    RealtimeChannel, RealtimeClient, RealtimeConnection, RealtimePresence,
};

/// How a scripted one-shot operation resolves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Outcome {
    #[default]
    Succeed,
    Fail(ErrorInfo),
    /// Keep the completion until the test resolves it.
    Hold,
    /// Misbehave: invoke the completion twice with success.
    SucceedTwice,
    /// Misbehave: invoke the completion with neither value nor error.
    InvokeEmpty,
    /// Misbehave: drop the completion without invoking it.
    Drop,
}

/// Handler answering `request` calls.
pub type RequestHandler =
    Arc<dyn Fn(&HttpRequest) -> Result<HttpResponse, ErrorInfo> + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

/// Resolve `completion` for a unit operation according to a misbehaving
/// outcome. Returns `true` when the outcome was one of those.
fn misbehave(outcome: &Outcome, completion: Completion<()>) -> bool {
    match outcome {
        Outcome::SucceedTwice => {
            completion.succeed(());
            completion.succeed(());
            true
        }
        Outcome::InvokeEmpty => {
            completion.invoke(None, None);
            true
        }
        Outcome::Drop => true,
        _ => false,
    }
}

/// In-memory realtime client.
pub struct MemoryRealtime {
    client_id: Option<String>,
    channels: Mutex<BTreeMap<String, Arc<MemoryChannel>>>,
    released: Mutex<Vec<String>>,
    connection: Arc<MemoryConnection>,
    requests: Mutex<Vec<HttpRequest>>,
    request_handler: Mutex<Option<RequestHandler>>,
}

impl MemoryRealtime {
    pub fn new(client_id: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            client_id: client_id.map(ToOwned::to_owned),
            channels: Mutex::new(BTreeMap::new()),
            released: Mutex::new(Vec::new()),
            connection: Arc::new(MemoryConnection::default()),
            requests: Mutex::new(Vec::new()),
            request_handler: Mutex::new(None),
        })
    }

    /// Get or create the concrete channel called `name`.
    pub fn memory_channel(&self, name: &str) -> Arc<MemoryChannel> {
        let mut channels = lock(&self.channels);
        Arc::clone(
            channels
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(MemoryChannel::new(name, self.client_id.clone()))),
        )
    }

    pub fn channel_names(&self) -> Vec<String> {
        lock(&self.channels).keys().cloned().collect()
    }

    /// Names passed to `release_channel`, in call order.
    pub fn released_channels(&self) -> Vec<String> {
        lock(&self.released).clone()
    }

    pub fn memory_connection(&self) -> Arc<MemoryConnection> {
        Arc::clone(&self.connection)
    }

    pub fn on_request(
        &self,
        handler: impl Fn(&HttpRequest) -> Result<HttpResponse, ErrorInfo> + Send + Sync + 'static,
    ) {
        *lock(&self.request_handler) = Some(Arc::new(handler));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }
}

impl RealtimeClient for MemoryRealtime {
    fn client_id(&self) -> Option<String> {
        self.client_id.clone()
    }

    fn channel(&self, name: &str, options: &ChannelOptions) -> Arc<dyn RealtimeChannel> {
        let channel = self.memory_channel(name);
        lock(&channel.inner).options = options.clone();
        channel
    }

    fn release_channel(&self, name: &str) {
        lock(&self.channels).remove(name);
        lock(&self.released).push(name.to_owned());
    }

    fn connection(&self) -> Arc<dyn RealtimeConnection> {
        self.connection.clone()
    }

    fn request(&self, request: HttpRequest, completion: Completion<HttpResponse>) {
        lock(&self.requests).push(request.clone());
        let handler = lock(&self.request_handler).clone();
        match handler {
            Some(handler) => match handler(&request) {
                Ok(response) => completion.succeed(response),
                Err(err) => completion.fail(err),
            },
            None => completion.fail(ErrorInfo::new(
                40400,
                404,
                format!("no handler for {:?} {}", request.method, request.path),
            )),
        }
    }
}

struct ChannelInner {
    state: ChannelState,
    reason: Option<ErrorInfo>,
    options: ChannelOptions,
    attach_outcome: Outcome,
    detach_outcome: Outcome,
    publish_outcome: Outcome,
    attach_calls: usize,
    detach_calls: usize,
    held_attaches: VecDeque<Completion<()>>,
    held_detaches: VecDeque<Completion<()>>,
    published: Vec<OutboundMessage>,
    message_listeners: Vec<(ListenerId, Listener<InboundMessage>)>,
    state_listeners: Vec<(ListenerId, Listener<ChannelStateChange>)>,
}

/// In-memory channel.
pub struct MemoryChannel {
    name: String,
    client_id: Option<String>,
    inner: Mutex<ChannelInner>,
    presence: Arc<MemoryPresence>,
}

impl MemoryChannel {
    fn new(name: &str, client_id: Option<String>) -> Self {
        Self {
            name: name.to_owned(),
            presence: Arc::new(MemoryPresence::new(client_id.clone())),
            client_id,
            inner: Mutex::new(ChannelInner {
                state: ChannelState::Initialized,
                reason: None,
                options: ChannelOptions::default(),
                attach_outcome: Outcome::Succeed,
                detach_outcome: Outcome::Succeed,
                publish_outcome: Outcome::Succeed,
                attach_calls: 0,
                detach_calls: 0,
                held_attaches: VecDeque::new(),
                held_detaches: VecDeque::new(),
                published: Vec::new(),
                message_listeners: Vec::new(),
                state_listeners: Vec::new(),
            }),
        }
    }

    pub fn set_attach_outcome(&self, outcome: Outcome) {
        lock(&self.inner).attach_outcome = outcome;
    }

    pub fn set_detach_outcome(&self, outcome: Outcome) {
        lock(&self.inner).detach_outcome = outcome;
    }

    pub fn set_publish_outcome(&self, outcome: Outcome) {
        lock(&self.inner).publish_outcome = outcome;
    }

    pub fn attach_calls(&self) -> usize {
        lock(&self.inner).attach_calls
    }

    pub fn detach_calls(&self) -> usize {
        lock(&self.inner).detach_calls
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        lock(&self.inner).published.clone()
    }

    pub fn options(&self) -> ChannelOptions {
        lock(&self.inner).options.clone()
    }

    pub fn held_attach_count(&self) -> usize {
        lock(&self.inner).held_attaches.len()
    }

    pub fn state_listener_count(&self) -> usize {
        lock(&self.inner).state_listeners.len()
    }

    pub fn message_listener_count(&self) -> usize {
        lock(&self.inner).message_listeners.len()
    }

    pub fn memory_presence(&self) -> Arc<MemoryPresence> {
        Arc::clone(&self.presence)
    }

    /// Resolve the oldest held attach. Returns `false` if none was held.
    pub fn resolve_held_attach(&self, result: Result<(), ErrorInfo>) -> bool {
        let Some(completion) = lock(&self.inner).held_attaches.pop_front() else {
            return false;
        };
        self.finish_attach(result, completion);
        true
    }

    /// Resolve the oldest held detach. Returns `false` if none was held.
    pub fn resolve_held_detach(&self, result: Result<(), ErrorInfo>) -> bool {
        let Some(completion) = lock(&self.inner).held_detaches.pop_front() else {
            return false;
        };
        self.finish_detach(result, completion);
        true
    }

    /// Move to `current` and notify state listeners, as the transport would
    /// on its own.
    pub fn emit_state(&self, current: ChannelState, reason: Option<ErrorInfo>, resumed: bool) {
        let (change, listeners) = {
            let mut inner = lock(&self.inner);
            let previous = inner.state;
            inner.state = current;
            inner.reason = reason.clone();
            let change = ChannelStateChange {
                current,
                previous,
                reason,
                resumed,
            };
            let listeners: Vec<_> = inner
                .state_listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect();
            (change, listeners)
        };
        for listener in listeners {
            listener(change.clone());
        }
    }

    /// Deliver a message to every subscriber.
    pub fn deliver(&self, message: InboundMessage) {
        let listeners: Vec<_> = lock(&self.inner)
            .message_listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(message.clone());
        }
    }

    // State change first, completion second: callers rely on that order.
    fn finish_attach(&self, result: Result<(), ErrorInfo>, completion: Completion<()>) {
        match result {
            Ok(()) => {
                self.emit_state(ChannelState::Attached, None, false);
                completion.succeed(());
            }
            Err(err) => {
                self.emit_state(ChannelState::Failed, Some(err.clone()), false);
                completion.fail(err);
            }
        }
    }

    fn finish_detach(&self, result: Result<(), ErrorInfo>, completion: Completion<()>) {
        match result {
            Ok(()) => {
                self.emit_state(ChannelState::Detached, None, false);
                completion.succeed(());
            }
            Err(err) => completion.fail(err),
        }
    }
}

impl RealtimeChannel for MemoryChannel {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn state(&self) -> ChannelState {
        lock(&self.inner).state
    }

    fn error_reason(&self) -> Option<ErrorInfo> {
        lock(&self.inner).reason.clone()
    }

    fn attach(&self, completion: Completion<()>) {
        let (outcome, state) = {
            let mut inner = lock(&self.inner);
            inner.attach_calls += 1;
            (inner.attach_outcome.clone(), inner.state)
        };
        if misbehave(&outcome, completion.clone()) {
            return;
        }
        if state == ChannelState::Attached && outcome == Outcome::Succeed {
            completion.succeed(());
            return;
        }

        self.emit_state(ChannelState::Attaching, None, false);
        match outcome {
            Outcome::Fail(err) => self.finish_attach(Err(err), completion),
            Outcome::Hold => lock(&self.inner).held_attaches.push_back(completion),
            _ => self.finish_attach(Ok(()), completion),
        }
    }

    fn detach(&self, completion: Completion<()>) {
        let (outcome, state) = {
            let mut inner = lock(&self.inner);
            inner.detach_calls += 1;
            (inner.detach_outcome.clone(), inner.state)
        };
        if misbehave(&outcome, completion.clone()) {
            return;
        }
        if matches!(state, ChannelState::Initialized | ChannelState::Detached)
            && outcome == Outcome::Succeed
        {
            completion.succeed(());
            return;
        }

        match outcome {
            Outcome::Fail(err) => self.finish_detach(Err(err), completion),
            Outcome::Hold => {
                self.emit_state(ChannelState::Detaching, None, false);
                lock(&self.inner).held_detaches.push_back(completion);
            }
            _ => {
                self.emit_state(ChannelState::Detaching, None, false);
                self.finish_detach(Ok(()), completion);
            }
        }
    }

    fn publish(&self, message: OutboundMessage, completion: Completion<()>) {
        let (outcome, attached) = {
            let mut inner = lock(&self.inner);
            inner.published.push(message.clone());
            (
                inner.publish_outcome.clone(),
                inner.state == ChannelState::Attached,
            )
        };
        if misbehave(&outcome, completion.clone()) {
            return;
        }
        match outcome {
            Outcome::Fail(err) => completion.fail(err),
            _ => {
                if attached {
                    self.deliver(InboundMessage {
                        name: message.name,
                        data: message.data,
                        extras: message.extras,
                        client_id: self.client_id.clone(),
                        timestamp_ms: now_millis(),
                        ..InboundMessage::default()
                    });
                }
                completion.succeed(());
            }
        }
    }

    fn subscribe(&self, listener: Listener<InboundMessage>) -> ListenerId {
        let id = ListenerId::next();
        lock(&self.inner).message_listeners.push((id, listener));
        id
    }

    fn unsubscribe(&self, id: ListenerId) {
        lock(&self.inner)
            .message_listeners
            .retain(|(existing, _)| *existing != id);
    }

    fn on_state_change(&self, listener: Listener<ChannelStateChange>) -> ListenerId {
        let id = ListenerId::next();
        lock(&self.inner).state_listeners.push((id, listener));
        id
    }

    fn off(&self, id: ListenerId) {
        lock(&self.inner)
            .state_listeners
            .retain(|(existing, _)| *existing != id);
    }

    fn presence(&self) -> Arc<dyn RealtimePresence> {
        self.presence.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PresenceOp {
    Enter,
    Update,
    Leave,
}

struct PresenceInner {
    members: BTreeMap<String, PresenceMessage>,
    listeners: Vec<(ListenerId, Listener<PresenceMessage>)>,
    outcome: Outcome,
    enter_calls: usize,
    update_calls: usize,
    leave_calls: usize,
    get_calls: usize,
    held: VecDeque<(PresenceOp, Option<Value>, Completion<()>)>,
}

/// In-memory presence set for one channel.
pub struct MemoryPresence {
    client_id: Option<String>,
    inner: Mutex<PresenceInner>,
}

impl MemoryPresence {
    fn new(client_id: Option<String>) -> Self {
        Self {
            client_id,
            inner: Mutex::new(PresenceInner {
                members: BTreeMap::new(),
                listeners: Vec::new(),
                outcome: Outcome::Succeed,
                enter_calls: 0,
                update_calls: 0,
                leave_calls: 0,
                get_calls: 0,
                held: VecDeque::new(),
            }),
        }
    }

    pub fn set_outcome(&self, outcome: Outcome) {
        lock(&self.inner).outcome = outcome;
    }

    pub fn enter_calls(&self) -> usize {
        lock(&self.inner).enter_calls
    }

    pub fn update_calls(&self) -> usize {
        lock(&self.inner).update_calls
    }

    pub fn leave_calls(&self) -> usize {
        lock(&self.inner).leave_calls
    }

    pub fn get_calls(&self) -> usize {
        lock(&self.inner).get_calls
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner).listeners.len()
    }

    /// Apply a presence change from another client.
    pub fn simulate(&self, message: PresenceMessage) {
        self.apply(message);
    }

    /// Resolve the oldest held enter/update/leave.
    pub fn resolve_held(&self, result: Result<(), ErrorInfo>) -> bool {
        let Some((op, data, completion)) = lock(&self.inner).held.pop_front() else {
            return false;
        };
        match result {
            Ok(()) => {
                self.apply_own(op, data);
                completion.succeed(());
            }
            Err(err) => completion.fail(err),
        }
        true
    }

    fn run(&self, op: PresenceOp, data: Option<Value>, completion: Completion<()>) {
        let outcome = {
            let mut inner = lock(&self.inner);
            match op {
                PresenceOp::Enter => inner.enter_calls += 1,
                PresenceOp::Update => inner.update_calls += 1,
                PresenceOp::Leave => inner.leave_calls += 1,
            }
            inner.outcome.clone()
        };
        if misbehave(&outcome, completion.clone()) {
            return;
        }
        match outcome {
            Outcome::Fail(err) => completion.fail(err),
            Outcome::Hold => lock(&self.inner).held.push_back((op, data, completion)),
            _ => {
                self.apply_own(op, data);
                completion.succeed(());
            }
        }
    }

    fn apply_own(&self, op: PresenceOp, data: Option<Value>) {
        let action = match op {
            PresenceOp::Enter => PresenceAction::Enter,
            PresenceOp::Update => PresenceAction::Update,
            PresenceOp::Leave => PresenceAction::Leave,
        };
        self.apply(PresenceMessage {
            action,
            client_id: self.client_id.clone().unwrap_or_default(),
            connection_id: None,
            data,
            timestamp_ms: now_millis(),
        });
    }

    fn apply(&self, message: PresenceMessage) {
        let listeners: Vec<_> = {
            let mut inner = lock(&self.inner);
            match message.action {
                PresenceAction::Leave | PresenceAction::Absent => {
                    inner.members.remove(&message.client_id);
                }
                _ => {
                    let mut member = message.clone();
                    member.action = PresenceAction::Present;
                    inner.members.insert(message.client_id.clone(), member);
                }
            }
            inner
                .listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect()
        };
        for listener in listeners {
            listener(message.clone());
        }
    }
}

impl RealtimePresence for MemoryPresence {
    fn get(&self, query: PresenceQuery, completion: Completion<Vec<PresenceMessage>>) {
        let (outcome, members) = {
            let mut inner = lock(&self.inner);
            inner.get_calls += 1;
            let members: Vec<PresenceMessage> = inner
                .members
                .values()
                .filter(|member| {
                    query
                        .client_id
                        .as_ref()
                        .is_none_or(|client_id| &member.client_id == client_id)
                })
                .filter(|member| {
                    query
                        .connection_id
                        .as_ref()
                        .is_none_or(|connection_id| {
                            member.connection_id.as_ref() == Some(connection_id)
                        })
                })
                .cloned()
                .collect();
            (inner.outcome.clone(), members)
        };
        match outcome {
            Outcome::Fail(err) => completion.fail(err),
            Outcome::InvokeEmpty => completion.invoke(None, None),
            Outcome::Drop => {}
            Outcome::SucceedTwice => {
                completion.succeed(members.clone());
                completion.succeed(members);
            }
            _ => completion.succeed(members),
        }
    }

    fn enter(&self, data: Option<Value>, completion: Completion<()>) {
        self.run(PresenceOp::Enter, data, completion);
    }

    fn update(&self, data: Option<Value>, completion: Completion<()>) {
        self.run(PresenceOp::Update, data, completion);
    }

    fn leave(&self, data: Option<Value>, completion: Completion<()>) {
        self.run(PresenceOp::Leave, data, completion);
    }

    fn subscribe(&self, listener: Listener<PresenceMessage>) -> ListenerId {
        let id = ListenerId::next();
        lock(&self.inner).listeners.push((id, listener));
        id
    }

    fn unsubscribe(&self, id: ListenerId) {
        lock(&self.inner)
            .listeners
            .retain(|(existing, _)| *existing != id);
    }
}

struct ConnectionInner {
    state: ConnectionState,
    reason: Option<ErrorInfo>,
    listeners: Vec<(ListenerId, Listener<ConnectionStateChange>)>,
}

/// In-memory connection whose state is driven by tests.
pub struct MemoryConnection {
    inner: Mutex<ConnectionInner>,
}

impl Default for MemoryConnection {
    fn default() -> Self {
        Self {
            inner: Mutex::new(ConnectionInner {
                state: ConnectionState::Initialized,
                reason: None,
                listeners: Vec::new(),
            }),
        }
    }
}

impl MemoryConnection {
    pub fn set_state(
        &self,
        current: ConnectionState,
        reason: Option<ErrorInfo>,
        retry_in: Option<Duration>,
    ) {
        let (change, listeners) = {
            let mut inner = lock(&self.inner);
            let previous = inner.state;
            inner.state = current;
            inner.reason = reason.clone();
            let listeners: Vec<_> = inner
                .listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect();
            (
                ConnectionStateChange {
                    current,
                    previous,
                    reason,
                    retry_in,
                },
                listeners,
            )
        };
        for listener in listeners {
            listener(change.clone());
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner).listeners.len()
    }
}

impl RealtimeConnection for MemoryConnection {
    fn state(&self) -> ConnectionState {
        lock(&self.inner).state
    }

    fn error_reason(&self) -> Option<ErrorInfo> {
        lock(&self.inner).reason.clone()
    }

    fn on(&self, listener: Listener<ConnectionStateChange>) -> ListenerId {
        let id = ListenerId::next();
        lock(&self.inner).listeners.push((id, listener));
        id
    }

    fn off(&self, id: ListenerId) {
        lock(&self.inner)
            .listeners
            .retain(|(existing, _)| *existing != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Recorded<T> = Arc<Mutex<Vec<(Option<T>, Option<ErrorInfo>)>>>;

    fn recording<T: Send + 'static>() -> (Completion<T>, Recorded<T>) {
        let calls: Recorded<T> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let completion = Completion::new(move |value, error| lock(&sink).push((value, error)));
        (completion, calls)
    }

    fn state_recorder(channel: &MemoryChannel) -> Arc<Mutex<Vec<ChannelStateChange>>> {
        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&changes);
        channel.on_state_change(Arc::new(move |change| lock(&sink).push(change)));
        changes
    }

    #[test]
    fn attach_emits_states_then_completes() {
        let realtime = MemoryRealtime::new(Some("alice"));
        let channel = realtime.memory_channel("room::$chat::$chatMessages");
        let changes = state_recorder(&channel);
        let (completion, calls) = recording();

        channel.attach(completion);

        assert_eq!(channel.state(), ChannelState::Attached);
        assert_eq!(channel.attach_calls(), 1);
        let states: Vec<_> = lock(&changes).iter().map(|c| c.current).collect();
        assert_eq!(states, vec![ChannelState::Attaching, ChannelState::Attached]);
        assert_eq!(lock(&calls).len(), 1);
    }

    #[test]
    fn failed_attach_moves_channel_to_failed() {
        let realtime = MemoryRealtime::new(Some("alice"));
        let channel = realtime.memory_channel("c");
        channel.set_attach_outcome(Outcome::Fail(ErrorInfo::new(90001, 500, "denied")));
        let (completion, calls) = recording();

        channel.attach(completion);

        assert_eq!(channel.state(), ChannelState::Failed);
        assert_eq!(channel.error_reason().map(|e| e.code), Some(90001));
        assert_eq!(lock(&calls)[0].1.as_ref().map(|e| e.code), Some(90001));
    }

    #[test]
    fn held_attach_resolves_on_demand() {
        let realtime = MemoryRealtime::new(Some("alice"));
        let channel = realtime.memory_channel("c");
        channel.set_attach_outcome(Outcome::Hold);
        let (completion, calls) = recording();

        channel.attach(completion);
        assert_eq!(channel.state(), ChannelState::Attaching);
        assert!(lock(&calls).is_empty());

        assert!(channel.resolve_held_attach(Ok(())));
        assert_eq!(channel.state(), ChannelState::Attached);
        assert_eq!(lock(&calls).len(), 1);
        assert!(!channel.resolve_held_attach(Ok(())));
    }

    #[test]
    fn misbehaving_outcomes_break_the_contract() {
        let realtime = MemoryRealtime::new(Some("alice"));
        let channel = realtime.memory_channel("c");

        channel.set_attach_outcome(Outcome::SucceedTwice);
        let (completion, calls) = recording();
        channel.attach(completion);
        assert_eq!(lock(&calls).len(), 2);

        channel.set_attach_outcome(Outcome::InvokeEmpty);
        let (completion, calls) = recording::<()>();
        channel.attach(completion);
        assert_eq!(lock(&calls)[0], (None, None));
    }

    #[test]
    fn publish_echoes_to_subscribers_when_attached() {
        let realtime = MemoryRealtime::new(Some("alice"));
        let channel = realtime.memory_channel("c");
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        channel.subscribe(Arc::new(move |message| lock(&sink).push(message)));

        let (completion, _) = recording();
        channel.attach(completion);
        let (completion, _) = recording();
        channel.publish(
            OutboundMessage {
                name: "roomReaction".into(),
                data: serde_json::json!({"type": "like"}),
                extras: None,
            },
            completion,
        );

        let received = lock(&received);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].client_id.as_deref(), Some("alice"));
        assert_eq!(channel.published().len(), 1);
    }

    #[test]
    fn presence_tracks_members_and_filters_get() {
        let realtime = MemoryRealtime::new(Some("alice"));
        let presence = realtime.memory_channel("c").memory_presence();
        let (completion, _) = recording();
        presence.enter(Some(serde_json::json!({"mood": "ok"})), completion);
        presence.simulate(PresenceMessage {
            action: PresenceAction::Enter,
            client_id: "bob".into(),
            connection_id: None,
            data: None,
            timestamp_ms: 1,
        });

        let (completion, calls) = recording();
        presence.get(
            PresenceQuery {
                client_id: Some("bob".into()),
                ..PresenceQuery::default()
            },
            completion,
        );
        let calls = lock(&calls);
        let members = calls[0].0.as_ref().expect("members");
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].client_id, "bob");
        assert_eq!(members[0].action, PresenceAction::Present);
        assert_eq!(presence.enter_calls(), 1);
    }

    #[test]
    fn release_channel_forgets_and_records() {
        let realtime = MemoryRealtime::new(None);
        realtime.channel("a", &ChannelOptions::default().with_param("occupancy", "metrics"));
        assert_eq!(
            realtime.memory_channel("a").options().params.get("occupancy").map(String::as_str),
            Some("metrics")
        );
        realtime.release_channel("a");
        assert_eq!(realtime.released_channels(), vec!["a".to_owned()]);
        assert!(realtime.channel_names().is_empty());
    }

    #[test]
    fn request_without_handler_fails_with_404() {
        let realtime = MemoryRealtime::new(None);
        let (completion, calls) = recording();
        realtime.request(
            HttpRequest::new(crate::HttpMethod::Get, "/nothing"),
            completion,
        );
        assert_eq!(lock(&calls)[0].1.as_ref().map(|e| e.status_code), Some(404));
        assert_eq!(realtime.requests().len(), 1);
    }
}
