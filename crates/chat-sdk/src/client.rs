use std::sync::Arc;

use chat_core::ChatError;
use chat_transport::RealtimeClient;
use tracing::info;

use crate::{connection::Connection, rooms::Rooms};

/// Entry point: a chat client bound to one realtime transport client.
pub struct ChatClient {
    client_id: String,
    rooms: Rooms,
    connection: Connection,
}

impl ChatClient {
    /// Build a chat client. The transport must already know its client id,
    /// since every chat operation is attributed to it.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(realtime: Arc<dyn RealtimeClient>) -> Result<Self, ChatError> {
        let client_id = realtime
            .client_id()
            .filter(|client_id| !client_id.is_empty())
            .ok_or_else(|| {
                ChatError::bad_request("realtime client must be configured with a client id")
            })?;

        let connection = Connection::new(realtime.connection());
        let rooms = Rooms::new(realtime, client_id.clone());
        info!(client_id = %client_id, "chat client ready");

        Ok(Self {
            client_id,
            rooms,
            connection,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn rooms(&self) -> &Rooms {
        &self.rooms
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

#[cfg(test)]
mod tests {
    use chat_core::{ChatErrorKind, ConnectionStatus, RoomOptions};
    use chat_transport::memory::MemoryRealtime;

    use super::*;

    #[tokio::test]
    async fn requires_client_id() {
        let err = ChatClient::new(MemoryRealtime::new(None))
            .err()
            .expect("client id is required");
        assert_eq!(err.kind, ChatErrorKind::BadRequest);

        assert!(ChatClient::new(MemoryRealtime::new(Some(""))).is_err());
    }

    #[tokio::test]
    async fn rooms_are_attributed_to_client() {
        let realtime = MemoryRealtime::new(Some("alice"));
        let client = ChatClient::new(realtime.clone()).expect("client");

        assert_eq!(client.client_id(), "alice");
        assert_eq!(client.connection().status(), ConnectionStatus::Initialized);

        let room = client
            .rooms()
            .get("lobby", RoomOptions::default())
            .await
            .expect("room");
        room.attach().await.expect("attach");
        assert_eq!(realtime.memory_connection().listener_count(), 1);
    }
}
