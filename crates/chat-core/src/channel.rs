use thiserror::Error;
use tokio::sync::broadcast;

/// Broadcast event stream handed to subscribers.
pub type EventStream<T> = broadcast::Receiver<T>;

/// Errors returned when reading from an event stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventStreamError {
    /// Every sender is gone; no more events will arrive.
    #[error("event stream is closed")]
    Closed,
}

/// Fan-out emitter for one kind of event.
#[derive(Debug)]
pub struct EventEmitter<T> {
    tx: broadcast::Sender<T>,
}

impl<T> Clone for EventEmitter<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Clone> EventEmitter<T> {
    /// Create an emitter buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to emitted events.
    pub fn subscribe(&self) -> EventStream<T> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: T) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receive the next event, skipping over any the subscriber lagged behind on.
pub async fn next_event<T: Clone>(stream: &mut EventStream<T>) -> Result<T, EventStreamError> {
    loop {
        match stream.recv().await {
            Ok(event) => return Ok(event),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return Err(EventStreamError::Closed),
        }
    }
}
