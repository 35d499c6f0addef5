use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{RoomFeature, RoomStatus};

/// Broad error kind used by callers to branch on failures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ChatErrorKind {
    /// Malformed wire value, for example an unparseable serial.
    Format,
    /// Invalid argument or option supplied by the caller.
    BadRequest,
    /// Operation not permitted in the room's current status.
    InvalidRoomState,
    /// A feature channel failed to attach during a room attach.
    ChannelAttachFailure,
    /// A feature channel failed to detach during a room detach.
    ChannelDetachFailure,
    /// A feature channel failed on its own while the room was live.
    ChannelFailed,
    /// The room is being released.
    ReleaseInUse,
    /// The requested feature was not enabled in the room options.
    FeatureNotEnabled,
    /// A feature channel lost continuity and state may be missing.
    Discontinuity,
    /// Error reported by the transport, wrapped once at the bridge.
    Transport,
    /// A room operation died before reporting a result.
    Internal,
}

/// Stable numeric error codes.
pub mod codes {
    pub const BAD_REQUEST: u32 = 40000;
    pub const FEATURE_NOT_ENABLED: u32 = 40001;

    pub const MESSAGES_ATTACHMENT_FAILED: u32 = 102001;
    pub const PRESENCE_ATTACHMENT_FAILED: u32 = 102002;
    pub const REACTIONS_ATTACHMENT_FAILED: u32 = 102003;
    pub const OCCUPANCY_ATTACHMENT_FAILED: u32 = 102004;
    pub const TYPING_ATTACHMENT_FAILED: u32 = 102005;

    pub const MESSAGES_DETACHMENT_FAILED: u32 = 102050;
    pub const PRESENCE_DETACHMENT_FAILED: u32 = 102051;
    pub const REACTIONS_DETACHMENT_FAILED: u32 = 102052;
    pub const OCCUPANCY_DETACHMENT_FAILED: u32 = 102053;
    pub const TYPING_DETACHMENT_FAILED: u32 = 102054;

    pub const DISCONTINUITY: u32 = 102100;
    pub const ROOM_IN_FAILED_STATE: u32 = 102101;
    pub const ROOM_IS_RELEASING: u32 = 102102;
    pub const ROOM_IS_RELEASED: u32 = 102103;
    pub const ROOM_RELEASED_BEFORE_OPERATION_COMPLETED: u32 = 102106;
    pub const ROOM_IN_INVALID_STATE: u32 = 102107;

    pub const INTERNAL_ERROR: u32 = 50000;
}

/// The single error type surfaced by every chat operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{kind:?}:{code}: {message}")]
pub struct ChatError {
    /// High-level error kind.
    pub kind: ChatErrorKind,
    /// Stable machine-readable error code.
    pub code: u32,
    /// HTTP-like status code.
    pub status_code: u16,
    /// Human-readable message.
    pub message: String,
    /// Underlying error, usually the wrapped transport failure.
    pub cause: Option<Box<ChatError>>,
}

impl ChatError {
    /// Construct a new chat error without a cause.
    pub fn new(kind: ChatErrorKind, code: u32, status_code: u16, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            status_code,
            message: message.into(),
            cause: None,
        }
    }

    /// Attach the underlying error.
    pub fn with_cause(mut self, cause: ChatError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Wrap an error reported by the transport.
    pub fn transport(code: u32, status_code: u16, message: impl Into<String>) -> Self {
        Self::new(ChatErrorKind::Transport, code, status_code, message)
    }

    /// Malformed wire value.
    pub fn format(message: impl Into<String>) -> Self {
        Self::new(ChatErrorKind::Format, codes::BAD_REQUEST, 400, message)
    }

    /// Invalid caller input.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ChatErrorKind::BadRequest, codes::BAD_REQUEST, 400, message)
    }

    /// Build the standard error for an operation the current status forbids.
    pub fn invalid_room_state(current: &RoomStatus, action: &str) -> Self {
        let code = match current {
            RoomStatus::Failed(_) => codes::ROOM_IN_FAILED_STATE,
            RoomStatus::Released => codes::ROOM_IS_RELEASED,
            _ => codes::ROOM_IN_INVALID_STATE,
        };
        Self::new(
            ChatErrorKind::InvalidRoomState,
            code,
            400,
            format!("cannot {action} while room is {}", current.label()),
        )
    }

    /// The room is being released, so the operation cannot start.
    pub fn release_in_use(action: &str) -> Self {
        Self::new(
            ChatErrorKind::ReleaseInUse,
            codes::ROOM_IS_RELEASING,
            400,
            format!("cannot {action} while room is releasing"),
        )
    }

    /// An in-flight operation was superseded by a release.
    pub fn released_before_completion(action: &str) -> Self {
        Self::new(
            ChatErrorKind::ReleaseInUse,
            codes::ROOM_RELEASED_BEFORE_OPERATION_COMPLETED,
            400,
            format!("room was released before {action} completed"),
        )
    }

    /// A room operation task aborted, usually on a broken transport contract.
    pub fn operation_aborted(action: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ChatErrorKind::Internal,
            codes::INTERNAL_ERROR,
            500,
            format!("{action} aborted: {}", detail.into()),
        )
    }

    /// A feature channel failed to attach.
    pub fn attach_failure(feature: RoomFeature, cause: ChatError) -> Self {
        Self::new(
            ChatErrorKind::ChannelAttachFailure,
            feature.attach_error_code(),
            cause.status_code,
            format!("failed to attach {} feature", feature.label()),
        )
        .with_cause(cause)
    }

    /// A feature channel failed to detach.
    pub fn detach_failure(feature: RoomFeature, cause: ChatError) -> Self {
        Self::new(
            ChatErrorKind::ChannelDetachFailure,
            feature.detach_error_code(),
            cause.status_code,
            format!("failed to detach {} feature", feature.label()),
        )
        .with_cause(cause)
    }

    /// A feature channel failed while the room was live.
    pub fn channel_failed(feature: RoomFeature, cause: Option<ChatError>) -> Self {
        let err = Self::new(
            ChatErrorKind::ChannelFailed,
            feature.attach_error_code(),
            500,
            format!("{} feature channel failed", feature.label()),
        );
        match cause {
            Some(cause) => err.with_cause(cause),
            None => err,
        }
    }

    /// A feature channel was suspended while the room was live.
    pub fn channel_suspended(feature: RoomFeature, cause: Option<ChatError>) -> Self {
        let err = Self::new(
            ChatErrorKind::ChannelFailed,
            feature.attach_error_code(),
            503,
            format!("{} feature channel suspended", feature.label()),
        );
        match cause {
            Some(cause) => err.with_cause(cause),
            None => err,
        }
    }

    /// A feature channel reattached without continuity.
    pub fn discontinuity(feature: RoomFeature, cause: Option<ChatError>) -> Self {
        let err = Self::new(
            ChatErrorKind::Discontinuity,
            codes::DISCONTINUITY,
            500,
            format!("discontinuity detected on {} feature", feature.label()),
        );
        match cause {
            Some(cause) => err.with_cause(cause),
            None => err,
        }
    }

    /// The feature was not enabled in the room options.
    pub fn feature_not_enabled(feature: RoomFeature) -> Self {
        Self::new(
            ChatErrorKind::FeatureNotEnabled,
            codes::FEATURE_NOT_ENABLED,
            400,
            format!("{} feature is not enabled in room options", feature.label()),
        )
    }
}

/// A broken contract with the transport or an internal invariant.
///
/// Never returned as a `Result`; it is the payload of a fatal panic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("programmer error in {context}: {detail}")]
pub struct ProgrammerError {
    pub context: String,
    pub detail: String,
}

impl ProgrammerError {
    pub fn new(context: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_code_tracks_status() {
        let failed = RoomStatus::Failed(ChatError::bad_request("x"));
        assert_eq!(
            ChatError::invalid_room_state(&failed, "attach").code,
            codes::ROOM_IN_FAILED_STATE
        );
        assert_eq!(
            ChatError::invalid_room_state(&RoomStatus::Released, "attach").code,
            codes::ROOM_IS_RELEASED
        );
        let err = ChatError::invalid_room_state(&RoomStatus::Attaching, "detach");
        assert_eq!(err.code, codes::ROOM_IN_INVALID_STATE);
        assert_eq!(err.kind, ChatErrorKind::InvalidRoomState);
        assert_eq!(err.message, "cannot detach while room is attaching");
    }

    #[test]
    fn attach_failure_wraps_transport_cause() {
        let cause = ChatError::transport(90001, 503, "channel denied");
        let err = ChatError::attach_failure(RoomFeature::Typing, cause.clone());
        assert_eq!(err.kind, ChatErrorKind::ChannelAttachFailure);
        assert_eq!(err.code, codes::TYPING_ATTACHMENT_FAILED);
        assert_eq!(err.status_code, 503);
        assert_eq!(err.cause.as_deref(), Some(&cause));
    }

    #[test]
    fn display_includes_kind_code_and_message() {
        let err = ChatError::format("bad serial");
        assert_eq!(err.to_string(), "Format:40000: bad serial");
    }

    #[test]
    fn programmer_error_display_is_stable() {
        let err = ProgrammerError::new("attach", "completion invoked twice");
        assert_eq!(
            err.to_string(),
            "programmer error in attach: completion invoked twice"
        );
    }
}
