//! Chat view of the transport connection.

use std::sync::Arc;

use chat_core::{ChatError, ConnectionStatus, ConnectionStatusChange, EventEmitter, EventStream};
use chat_transport::{ConnectionState, ConnectionStateChange, ListenerId, RealtimeConnection};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::bridge::{self, map_transport_error};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Snapshot {
    status: ConnectionStatus,
    error: Option<ChatError>,
}

/// Connection status mirrored from the transport.
///
/// Transport notifications are marshalled onto a monitor task, which is the
/// only writer of the snapshot and the only emitter of status changes.
pub struct Connection {
    transport: Arc<dyn RealtimeConnection>,
    listener: ListenerId,
    snapshot: watch::Receiver<Snapshot>,
    events: EventEmitter<ConnectionStatusChange>,
    monitor: JoinHandle<()>,
}

impl Connection {
    pub(crate) fn new(transport: Arc<dyn RealtimeConnection>) -> Self {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let listener = transport.on(bridge::marshal(changes_tx, std::convert::identity));

        let (snapshot_tx, snapshot) = watch::channel(Snapshot {
            status: status_from(transport.state()),
            error: transport.error_reason().map(map_transport_error),
        });
        let events = EventEmitter::new(EVENT_CAPACITY);
        let monitor = tokio::spawn(monitor(changes_rx, snapshot_tx, events.clone()));

        Self {
            transport,
            listener,
            snapshot,
            events,
            monitor,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.snapshot.borrow().status
    }

    /// Error reported with the most recent status change.
    pub fn error(&self) -> Option<ChatError> {
        self.snapshot.borrow().error.clone()
    }

    pub fn on_status_change(&self) -> EventStream<ConnectionStatusChange> {
        self.events.subscribe()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.transport.off(self.listener);
        self.monitor.abort();
    }
}

fn status_from(state: ConnectionState) -> ConnectionStatus {
    match state {
        ConnectionState::Initialized => ConnectionStatus::Initialized,
        ConnectionState::Connecting => ConnectionStatus::Connecting,
        ConnectionState::Connected => ConnectionStatus::Connected,
        ConnectionState::Disconnected | ConnectionState::Closing | ConnectionState::Closed => {
            ConnectionStatus::Disconnected
        }
        ConnectionState::Suspended => ConnectionStatus::Suspended,
        ConnectionState::Failed => ConnectionStatus::Failed,
    }
}

async fn monitor(
    mut changes: mpsc::UnboundedReceiver<ConnectionStateChange>,
    snapshot: watch::Sender<Snapshot>,
    events: EventEmitter<ConnectionStatusChange>,
) {
    while let Some(change) = changes.recv().await {
        let current = status_from(change.current);
        let previous = snapshot.borrow().status;
        if current == previous {
            continue;
        }

        let error = change.reason.map(map_transport_error);
        match &error {
            Some(err) if current == ConnectionStatus::Failed => {
                warn!(error = %err, "connection failed")
            }
            _ => debug!(from = ?previous, to = ?current, "connection status changed"),
        }
        snapshot.send_replace(Snapshot {
            status: current,
            error: error.clone(),
        });
        events.emit(ConnectionStatusChange {
            current,
            previous,
            error,
            retry_in: change.retry_in,
        });
    }
}
