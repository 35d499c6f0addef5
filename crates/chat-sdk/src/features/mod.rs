//! Per-feature adapters composing bridge calls into chat operations.

use std::sync::Arc;

use chat_core::{ChatError, RoomFeature, RoomStatus};
use chat_transport::{ChannelOptions, HttpResponse, RealtimeClient};
use serde_json::Value;
use tokio::sync::watch;

pub mod messages;
pub mod occupancy;
pub mod presence;
pub mod reactions;
pub mod typing;

pub use messages::Messages;
pub use occupancy::Occupancy;
pub use presence::Presence;
pub use reactions::Reactions;
pub use typing::Typing;

/// Room-scoped state every adapter needs.
#[derive(Clone)]
pub(crate) struct FeatureContext {
    pub(crate) room: String,
    pub(crate) client: Arc<dyn RealtimeClient>,
    pub(crate) client_id: String,
    pub(crate) status: watch::Receiver<RoomStatus>,
}

impl FeatureContext {
    /// Wait out an in-progress attach, then require the room to be attached.
    pub(crate) async fn require_attached(&self, action: &str) -> Result<(), ChatError> {
        let mut status = self.status.clone();
        let current = status
            .wait_for(|status| !matches!(status, RoomStatus::Attaching))
            .await
            .map(|status| status.clone())
            .map_err(|_| ChatError::invalid_room_state(&RoomStatus::Released, action))?;

        match current {
            RoomStatus::Attached => Ok(()),
            other => Err(ChatError::invalid_room_state(&other, action)),
        }
    }
}

/// Options used when obtaining the transport channel for `feature`.
pub(crate) fn channel_options(feature: RoomFeature) -> ChannelOptions {
    match feature {
        RoomFeature::Occupancy => ChannelOptions::default().with_param("occupancy", "metrics"),
        _ => ChannelOptions::default(),
    }
}

/// First item of a REST response that must carry exactly one object.
pub(crate) fn first_item<'a>(response: &'a HttpResponse, what: &str) -> Result<&'a Value, ChatError> {
    response
        .items
        .first()
        .ok_or_else(|| ChatError::format(format!("empty response to {what}")))
}
