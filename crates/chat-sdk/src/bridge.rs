//! Awaitable wrappers over the transport's callback-style operations.
//!
//! Each one-shot call gets a [`PendingOperation`] that resolves the awaiting
//! caller exactly once. A transport that invokes a completion twice, with
//! neither value nor error, or never at all has broken the contract this
//! crate is built on, and the process panics with a [`ProgrammerError`].
//!
//! Listener callbacks are never run on the transport's thread. [`marshal`]
//! turns them into enqueues onto the channel owned by the designated
//! execution context.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chat_core::{ChatError, ProgrammerError, codes};
use chat_transport::{
    Completion, ErrorInfo, HttpRequest, HttpResponse, Listener, OutboundMessage, PresenceMessage,
    PresenceQuery, RealtimeChannel, RealtimeClient, RealtimePresence,
};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

/// Wrap a transport error. This is the only place transport errors are
/// converted.
pub fn map_transport_error(err: ErrorInfo) -> ChatError {
    ChatError::transport(err.code, err.status_code, err.message)
}

/// Log and panic on a broken transport contract.
pub(crate) fn contract_violation(context: &str, detail: &str) -> ! {
    let err = ProgrammerError::new(context, detail);
    error!(error = %err, "transport broke its completion contract");
    panic!("{err}");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Single-resolution record for one outstanding transport call.
struct PendingOperation<T> {
    context: &'static str,
    tx: Mutex<Option<oneshot::Sender<Result<T, ChatError>>>>,
}

impl<T> PendingOperation<T> {
    fn new(context: &'static str, tx: oneshot::Sender<Result<T, ChatError>>) -> Self {
        Self {
            context,
            tx: Mutex::new(Some(tx)),
        }
    }

    fn resolve(&self, value: Option<T>, error: Option<ErrorInfo>) {
        let Some(tx) = lock(&self.tx).take() else {
            contract_violation(self.context, "completion invoked more than once");
        };

        // An error wins over a value supplied alongside it.
        let result = match (value, error) {
            (_, Some(err)) => Err(map_transport_error(err)),
            (Some(value), None) => Ok(value),
            (None, None) => contract_violation(
                self.context,
                "completion invoked with neither a value nor an error",
            ),
        };

        if tx.send(result).is_err() {
            debug!(
                operation = self.context,
                "caller stopped waiting; discarding result"
            );
        }
    }
}

impl<T> Drop for PendingOperation<T> {
    fn drop(&mut self) {
        let unresolved = self
            .tx
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        if unresolved && !std::thread::panicking() {
            contract_violation(self.context, "completion dropped without being invoked");
        }
    }
}

/// Run one transport call and suspend until its completion fires.
///
/// Dropping the returned future does not cancel the transport call; its
/// result is discarded when it arrives.
pub async fn perform<T, F>(context: &'static str, start: F) -> Result<T, ChatError>
where
    T: Send + 'static,
    F: FnOnce(Completion<T>),
{
    let (tx, rx) = oneshot::channel();
    let pending = Arc::new(PendingOperation::new(context, tx));
    start(Completion::new(move |value, error| {
        pending.resolve(value, error)
    }));

    match rx.await {
        Ok(result) => result,
        Err(_) => contract_violation(context, "completion dropped without being invoked"),
    }
}

/// Turn a transport listener into one that only enqueues onto `tx`.
pub fn marshal<T, E>(
    tx: mpsc::UnboundedSender<E>,
    wrap: impl Fn(T) -> E + Send + Sync + 'static,
) -> Listener<T>
where
    T: 'static,
    E: Send + 'static,
{
    Arc::new(move |event| {
        // A closed receiver means the owning context is gone.
        let _ = tx.send(wrap(event));
    })
}

pub async fn attach(channel: &dyn RealtimeChannel) -> Result<(), ChatError> {
    perform("attach", |completion| channel.attach(completion)).await
}

pub async fn detach(channel: &dyn RealtimeChannel) -> Result<(), ChatError> {
    perform("detach", |completion| channel.detach(completion)).await
}

pub async fn publish(
    channel: &dyn RealtimeChannel,
    message: OutboundMessage,
) -> Result<(), ChatError> {
    perform("publish", |completion| channel.publish(message, completion)).await
}

pub async fn presence_get(
    presence: &dyn RealtimePresence,
    query: PresenceQuery,
) -> Result<Vec<PresenceMessage>, ChatError> {
    perform("presence get", |completion| presence.get(query, completion)).await
}

pub async fn presence_enter(
    presence: &dyn RealtimePresence,
    data: Option<Value>,
) -> Result<(), ChatError> {
    perform("presence enter", |completion| presence.enter(data, completion)).await
}

pub async fn presence_update(
    presence: &dyn RealtimePresence,
    data: Option<Value>,
) -> Result<(), ChatError> {
    perform("presence update", |completion| {
        presence.update(data, completion)
    })
    .await
}

pub async fn presence_leave(
    presence: &dyn RealtimePresence,
    data: Option<Value>,
) -> Result<(), ChatError> {
    perform("presence leave", |completion| presence.leave(data, completion)).await
}

/// Issue a REST request; non-2xx responses become transport errors.
pub async fn request(
    client: &dyn RealtimeClient,
    request: HttpRequest,
) -> Result<HttpResponse, ChatError> {
    let method = request.method;
    let path = request.path.clone();
    let response = perform("request", |completion| client.request(request, completion)).await?;
    if !response.is_success() {
        return Err(ChatError::transport(
            codes::BAD_REQUEST,
            response.status_code,
            format!(
                "{method:?} {path} failed with status {}",
                response.status_code
            ),
        ));
    }
    Ok(response)
}
