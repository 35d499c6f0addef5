//! Realtime publish/subscribe transport consumed by the chat layer.
//!
//! Operations are callback-style: one-shot calls take a [`Completion`], and
//! continuous notifications are delivered to registered [`Listener`]s on
//! whatever thread the transport chooses.

use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub mod memory;

/// Error reported by the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{code} ({status_code}): {message}")]
pub struct ErrorInfo {
    pub code: u32,
    pub status_code: u16,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: u32, status_code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            status_code,
            message: message.into(),
        }
    }
}

/// Completion callback for one-shot operations.
///
/// The transport is expected to invoke it exactly once with either a value
/// or an error. Nothing in the type enforces that; callers must.
pub struct Completion<T> {
    callback: Arc<dyn Fn(Option<T>, Option<ErrorInfo>) + Send + Sync>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            callback: Arc::clone(&self.callback),
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}

impl<T> Completion<T> {
    pub fn new(callback: impl Fn(Option<T>, Option<ErrorInfo>) + Send + Sync + 'static) -> Self {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// Invoke with the raw value/error pair.
    pub fn invoke(&self, value: Option<T>, error: Option<ErrorInfo>) {
        (self.callback)(value, error);
    }

    pub fn succeed(&self, value: T) {
        self.invoke(Some(value), None);
    }

    pub fn fail(&self, error: ErrorInfo) {
        self.invoke(None, Some(error));
    }
}

/// Persistent listener callback.
pub type Listener<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Handle returned by listener registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl ListenerId {
    /// Allocate a process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Transport channel state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Initialized,
    Attaching,
    Attached,
    Detaching,
    Detached,
    Suspended,
    Failed,
}

/// Channel state change notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelStateChange {
    pub current: ChannelState,
    pub previous: ChannelState,
    pub reason: Option<ErrorInfo>,
    /// Whether message continuity was preserved across the change.
    pub resumed: bool,
}

impl ChannelStateChange {
    /// An attached-to-attached notification without a state change.
    pub fn is_update(&self) -> bool {
        self.current == ChannelState::Attached && self.previous == ChannelState::Attached
    }
}

/// Transport connection state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Initialized,
    Connecting,
    Connected,
    Disconnected,
    Suspended,
    Closing,
    Closed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionStateChange {
    pub current: ConnectionState,
    pub previous: ConnectionState,
    pub reason: Option<ErrorInfo>,
    pub retry_in: Option<Duration>,
}

/// Message delivered by a channel subscription.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InboundMessage {
    pub id: Option<String>,
    pub name: String,
    pub data: Value,
    pub client_id: Option<String>,
    pub serial: Option<String>,
    pub version: Option<String>,
    pub action: Option<String>,
    pub timestamp_ms: u64,
    pub created_at_ms: Option<u64>,
    pub extras: Option<Value>,
}

/// Message handed to `publish`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OutboundMessage {
    pub name: String,
    pub data: Value,
    pub extras: Option<Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PresenceAction {
    Absent,
    Present,
    Enter,
    Leave,
    Update,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresenceMessage {
    pub action: PresenceAction,
    pub client_id: String,
    pub connection_id: Option<String>,
    pub data: Option<Value>,
    pub timestamp_ms: u64,
}

/// Filter for presence `get`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceQuery {
    pub client_id: Option<String>,
    pub connection_id: Option<String>,
    pub wait_for_sync: bool,
}

/// Channel options supplied when a channel is first obtained.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelOptions {
    pub params: BTreeMap<String, String>,
}

impl ChannelOptions {
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

/// Generic REST request routed through the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub path: String,
    pub params: BTreeMap<String, String>,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: BTreeMap::new(),
            body: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(key.into(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpResponse {
    pub status_code: u16,
    pub items: Vec<Value>,
}

impl HttpResponse {
    pub fn ok(items: Vec<Value>) -> Self {
        Self {
            status_code: 200,
            items,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Entry point of the transport.
pub trait RealtimeClient: Send + Sync {
    fn client_id(&self) -> Option<String>;

    /// Get or create the channel called `name`.
    fn channel(&self, name: &str, options: &ChannelOptions) -> Arc<dyn RealtimeChannel>;

    /// Drop the channel and all of its listeners.
    fn release_channel(&self, name: &str);

    fn connection(&self) -> Arc<dyn RealtimeConnection>;

    fn request(&self, request: HttpRequest, completion: Completion<HttpResponse>);
}

pub trait RealtimeChannel: Send + Sync {
    fn name(&self) -> String;

    fn state(&self) -> ChannelState;

    fn error_reason(&self) -> Option<ErrorInfo>;

    fn attach(&self, completion: Completion<()>);

    fn detach(&self, completion: Completion<()>);

    fn publish(&self, message: OutboundMessage, completion: Completion<()>);

    fn subscribe(&self, listener: Listener<InboundMessage>) -> ListenerId;

    fn unsubscribe(&self, id: ListenerId);

    fn on_state_change(&self, listener: Listener<ChannelStateChange>) -> ListenerId;

    fn off(&self, id: ListenerId);

    fn presence(&self) -> Arc<dyn RealtimePresence>;
}

pub trait RealtimePresence: Send + Sync {
    fn get(&self, query: PresenceQuery, completion: Completion<Vec<PresenceMessage>>);

    fn enter(&self, data: Option<Value>, completion: Completion<()>);

    fn update(&self, data: Option<Value>, completion: Completion<()>);

    fn leave(&self, data: Option<Value>, completion: Completion<()>);

    fn subscribe(&self, listener: Listener<PresenceMessage>) -> ListenerId;

    fn unsubscribe(&self, id: ListenerId);
}

pub trait RealtimeConnection: Send + Sync {
    fn state(&self) -> ConnectionState;

    fn error_reason(&self) -> Option<ErrorInfo>;

    fn on(&self, listener: Listener<ConnectionStateChange>) -> ListenerId;

    fn off(&self, id: ListenerId);
}
