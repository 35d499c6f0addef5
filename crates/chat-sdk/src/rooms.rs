//! Registry of live rooms keyed by name.

use std::{collections::HashMap, sync::Arc};

use chat_core::{ChatError, RoomOptions, RoomStatus};
use chat_transport::RealtimeClient;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::room::Room;

#[derive(Default)]
struct RoomsState {
    live: HashMap<String, Room>,
    /// Rooms whose release is still running. Kept so concurrent releases
    /// join and `get` can refuse the name until teardown finishes.
    releasing: HashMap<String, Room>,
}

/// Hands out one [`Room`] per name.
pub struct Rooms {
    client: Arc<dyn RealtimeClient>,
    client_id: String,
    state: Mutex<RoomsState>,
}

impl Rooms {
    pub(crate) fn new(client: Arc<dyn RealtimeClient>, client_id: String) -> Self {
        Self {
            client,
            client_id,
            state: Mutex::new(RoomsState::default()),
        }
    }

    /// Return the room called `name`, creating it on first use.
    ///
    /// A live room is only shared when it was created with the same options.
    pub async fn get(&self, name: &str, options: RoomOptions) -> Result<Room, ChatError> {
        options.validate()?;

        let mut state = self.state.lock().await;
        if state.releasing.contains_key(name) {
            return Err(ChatError::release_in_use("get room"));
        }

        if let Some(room) = state.live.get(name) {
            if room.status() != RoomStatus::Released {
                if room.options() != &options {
                    return Err(ChatError::bad_request(format!(
                        "room '{name}' already exists with different options"
                    )));
                }
                return Ok(room.clone());
            }
            debug!(room = %name, nonce = %room.nonce(), "replacing released room");
        }

        let room = Room::new(
            name,
            options,
            Arc::clone(&self.client),
            self.client_id.clone(),
        );
        info!(room = %name, nonce = %room.nonce(), "room created");
        state.live.insert(name.to_owned(), room.clone());
        Ok(room)
    }

    /// Release the room called `name` and forget it. Unknown names are a
    /// no-op; concurrent calls share one release.
    pub async fn release(&self, name: &str) -> Result<(), ChatError> {
        let room = {
            let mut state = self.state.lock().await;
            match state.releasing.get(name) {
                Some(room) => room.clone(),
                None => {
                    let Some(room) = state.live.remove(name) else {
                        return Ok(());
                    };
                    state.releasing.insert(name.to_owned(), room.clone());
                    room
                }
            }
        };

        let result = room.release().await;

        let mut state = self.state.lock().await;
        if state
            .releasing
            .get(name)
            .is_some_and(|releasing| releasing.nonce() == room.nonce())
        {
            state.releasing.remove(name);
            info!(room = %name, nonce = %room.nonce(), "room released");
        }
        result
    }

    /// Names of rooms currently handed out.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state.lock().await.live.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chat_core::{ChatErrorKind, RoomFeature, TypingOptions, codes};
    use chat_transport::memory::{MemoryRealtime, Outcome};
    use tokio::time::{sleep, timeout};

    use super::*;

    fn rooms() -> (Arc<MemoryRealtime>, Rooms) {
        let realtime = MemoryRealtime::new(Some("alice"));
        let rooms = Rooms::new(realtime.clone(), "alice".to_owned());
        (realtime, rooms)
    }

    #[tokio::test]
    async fn same_name_and_options_share_a_room() {
        let (_realtime, rooms) = rooms();

        let first = rooms.get("lobby", RoomOptions::default()).await.expect("get");
        let second = rooms.get("lobby", RoomOptions::default()).await.expect("get");

        assert_eq!(first.nonce(), second.nonce());
        assert_eq!(rooms.names().await, vec!["lobby".to_owned()]);
    }

    #[tokio::test]
    async fn different_options_are_rejected() {
        let (_realtime, rooms) = rooms();
        rooms.get("lobby", RoomOptions::default()).await.expect("get");

        let err = rooms
            .get("lobby", RoomOptions::all_features())
            .await
            .expect_err("options differ");
        assert_eq!(err.kind, ChatErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn invalid_options_are_rejected() {
        let (realtime, rooms) = rooms();
        let options = RoomOptions {
            typing: Some(TypingOptions {
                timeout: Duration::ZERO,
            }),
            ..RoomOptions::default()
        };

        let err = rooms.get("lobby", options).await.expect_err("zero timeout");
        assert_eq!(err.kind, ChatErrorKind::BadRequest);
        assert!(realtime.channel_names().is_empty());
    }

    #[tokio::test]
    async fn release_forgets_room_and_next_get_is_fresh() {
        let (realtime, rooms) = rooms();
        let first = rooms.get("lobby", RoomOptions::default()).await.expect("get");
        first.attach().await.expect("attach");

        rooms.release("lobby").await.expect("release");
        assert_eq!(first.status(), RoomStatus::Released);
        assert!(rooms.names().await.is_empty());
        assert_eq!(
            realtime.released_channels(),
            vec![RoomFeature::Messages.channel_name("lobby")]
        );

        let second = rooms.get("lobby", RoomOptions::default()).await.expect("get");
        assert_ne!(first.nonce(), second.nonce());
        assert_eq!(second.status(), RoomStatus::Initialized);
    }

    #[tokio::test]
    async fn releasing_unknown_room_is_a_no_op() {
        let (realtime, rooms) = rooms();
        rooms.release("nowhere").await.expect("no-op");
        assert!(realtime.released_channels().is_empty());
    }

    #[tokio::test]
    async fn room_released_directly_is_replaced() {
        let (_realtime, rooms) = rooms();
        let first = rooms.get("lobby", RoomOptions::default()).await.expect("get");
        first.release().await.expect("release");

        let second = rooms
            .get("lobby", RoomOptions::all_features())
            .await
            .expect("released room does not pin options");
        assert_ne!(first.nonce(), second.nonce());
    }

    #[tokio::test]
    async fn get_during_release_is_refused_and_releases_join() {
        let (realtime, rooms) = rooms();
        let rooms = Arc::new(rooms);
        let room = rooms.get("lobby", RoomOptions::default()).await.expect("get");
        room.attach().await.expect("attach");
        let channel = realtime.memory_channel(&RoomFeature::Messages.channel_name("lobby"));
        channel.set_detach_outcome(Outcome::Hold);

        let first = tokio::spawn({
            let rooms = Arc::clone(&rooms);
            async move { rooms.release("lobby").await }
        });
        let mut status = room.status_watch();
        timeout(
            Duration::from_secs(2),
            status.wait_for(|status| *status == RoomStatus::Releasing),
        )
        .await
        .expect("release started")
        .expect("room alive");

        let err = rooms
            .get("lobby", RoomOptions::default())
            .await
            .expect_err("release in progress");
        assert_eq!(err.kind, ChatErrorKind::ReleaseInUse);
        assert_eq!(err.code, codes::ROOM_IS_RELEASING);

        let second = tokio::spawn({
            let rooms = Arc::clone(&rooms);
            async move { rooms.release("lobby").await }
        });

        timeout(Duration::from_secs(2), async {
            while !channel.resolve_held_detach(Ok(())) {
                sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("detach was issued");

        first.await.expect("join").expect("first release");
        second.await.expect("join").expect("second release");
        assert_eq!(realtime.released_channels().len(), 1);
        rooms
            .get("lobby", RoomOptions::default())
            .await
            .expect("name is free again");
    }
}
