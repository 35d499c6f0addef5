use std::{collections::BTreeSet, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::{ChatError, codes},
    serial::Serial,
};

/// Free-form metadata attached to messages and reactions.
pub type Metadata = Map<String, Value>;
/// Free-form headers attached to messages and reactions.
pub type Headers = Map<String, Value>;

/// One chat capability backed by its own transport channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoomFeature {
    Messages,
    Presence,
    Typing,
    Reactions,
    Occupancy,
}

impl RoomFeature {
    /// Attach order used by the lifecycle manager.
    pub const ALL: [RoomFeature; 5] = [
        RoomFeature::Messages,
        RoomFeature::Presence,
        RoomFeature::Typing,
        RoomFeature::Reactions,
        RoomFeature::Occupancy,
    ];

    pub fn label(self) -> &'static str {
        match self {
            RoomFeature::Messages => "messages",
            RoomFeature::Presence => "presence",
            RoomFeature::Typing => "typing",
            RoomFeature::Reactions => "reactions",
            RoomFeature::Occupancy => "occupancy",
        }
    }

    /// Transport channel name for this feature in `room`.
    pub fn channel_name(self, room: &str) -> String {
        let suffix = match self {
            RoomFeature::Messages => "chatMessages",
            RoomFeature::Presence => "presence",
            RoomFeature::Typing => "typingIndicators",
            RoomFeature::Reactions => "reactions",
            RoomFeature::Occupancy => "occupancy",
        };
        format!("{room}::$chat::${suffix}")
    }

    pub fn attach_error_code(self) -> u32 {
        match self {
            RoomFeature::Messages => codes::MESSAGES_ATTACHMENT_FAILED,
            RoomFeature::Presence => codes::PRESENCE_ATTACHMENT_FAILED,
            RoomFeature::Typing => codes::TYPING_ATTACHMENT_FAILED,
            RoomFeature::Reactions => codes::REACTIONS_ATTACHMENT_FAILED,
            RoomFeature::Occupancy => codes::OCCUPANCY_ATTACHMENT_FAILED,
        }
    }

    pub fn detach_error_code(self) -> u32 {
        match self {
            RoomFeature::Messages => codes::MESSAGES_DETACHMENT_FAILED,
            RoomFeature::Presence => codes::PRESENCE_DETACHMENT_FAILED,
            RoomFeature::Typing => codes::TYPING_DETACHMENT_FAILED,
            RoomFeature::Reactions => codes::REACTIONS_DETACHMENT_FAILED,
            RoomFeature::Occupancy => codes::OCCUPANCY_DETACHMENT_FAILED,
        }
    }
}

/// Room lifecycle status reported to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RoomStatus {
    /// Room exists but no attach has been requested.
    Initialized,
    /// An attach is in progress across the feature channels.
    Attaching,
    /// Every feature channel is attached.
    Attached,
    /// A detach is in progress.
    Detaching,
    /// Every feature channel is detached.
    Detached,
    /// A feature channel is suspended; the transport may recover it.
    Suspended(ChatError),
    /// Attach failed or a feature channel failed; release the room.
    Failed(ChatError),
    /// Release is in progress.
    Releasing,
    /// Terminal state after release.
    Released,
}

impl RoomStatus {
    pub fn label(&self) -> &'static str {
        match self {
            RoomStatus::Initialized => "initialized",
            RoomStatus::Attaching => "attaching",
            RoomStatus::Attached => "attached",
            RoomStatus::Detaching => "detaching",
            RoomStatus::Detached => "detached",
            RoomStatus::Suspended(_) => "suspended",
            RoomStatus::Failed(_) => "failed",
            RoomStatus::Releasing => "releasing",
            RoomStatus::Released => "released",
        }
    }

    /// Error carried by `Suspended` and `Failed`.
    pub fn error(&self) -> Option<&ChatError> {
        match self {
            RoomStatus::Suspended(err) | RoomStatus::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Whether per-feature events should still reach subscribers.
    pub fn accepts_feature_events(&self) -> bool {
        !matches!(
            self,
            RoomStatus::Detached | RoomStatus::Releasing | RoomStatus::Released
        )
    }
}

/// Emitted on every room status transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomStatusChange {
    pub current: RoomStatus,
    pub previous: RoomStatus,
}

/// Emitted when a feature channel lost continuity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscontinuityEvent {
    pub feature: RoomFeature,
    pub cause: ChatError,
}

/// Presence feature options.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceOptions {
    /// Whether this client may enter presence.
    pub enter: bool,
    /// Whether this client receives presence events.
    pub subscribe: bool,
}

impl PresenceOptions {
    pub fn enabled() -> Self {
        Self {
            enter: true,
            subscribe: true,
        }
    }
}

/// Typing feature options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypingOptions {
    /// Idle window after the last keystroke before "stopped" is signalled.
    pub timeout: Duration,
}

impl Default for TypingOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

/// Reactions feature options.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionsOptions {}

/// Occupancy feature options.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OccupancyOptions {}

/// Per-room feature selection. Messages are always enabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomOptions {
    pub presence: Option<PresenceOptions>,
    pub typing: Option<TypingOptions>,
    pub reactions: Option<ReactionsOptions>,
    pub occupancy: Option<OccupancyOptions>,
}

impl RoomOptions {
    /// Every feature enabled with default settings.
    pub fn all_features() -> Self {
        Self {
            presence: Some(PresenceOptions::enabled()),
            typing: Some(TypingOptions::default()),
            reactions: Some(ReactionsOptions::default()),
            occupancy: Some(OccupancyOptions::default()),
        }
    }

    /// Features enabled by these options, in attach order.
    pub fn features(&self) -> Vec<RoomFeature> {
        RoomFeature::ALL
            .into_iter()
            .filter(|feature| self.is_enabled(*feature))
            .collect()
    }

    pub fn is_enabled(&self, feature: RoomFeature) -> bool {
        match feature {
            RoomFeature::Messages => true,
            RoomFeature::Presence => self.presence.is_some(),
            RoomFeature::Typing => self.typing.is_some(),
            RoomFeature::Reactions => self.reactions.is_some(),
            RoomFeature::Occupancy => self.occupancy.is_some(),
        }
    }

    pub fn validate(&self) -> Result<(), ChatError> {
        if let Some(typing) = &self.typing
            && typing.timeout.is_zero()
        {
            return Err(ChatError::bad_request("typing timeout must be greater than 0"));
        }
        Ok(())
    }
}

/// Lifecycle action recorded on a message version.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MessageAction {
    Create,
    Update,
    Delete,
}

impl MessageAction {
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "message.create" => Some(MessageAction::Create),
            "message.update" => Some(MessageAction::Update),
            "message.delete" => Some(MessageAction::Delete),
            _ => None,
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            MessageAction::Create => "message.create",
            MessageAction::Update => "message.update",
            MessageAction::Delete => "message.delete",
        }
    }
}

/// Who changed a message and why.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationDetails {
    pub client_id: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<Metadata>,
}

/// A chat message in its latest known version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Serial assigned when the message was created.
    pub serial: String,
    pub action: MessageAction,
    pub client_id: String,
    pub text: String,
    pub metadata: Metadata,
    pub headers: Headers,
    /// Creation time in milliseconds since Unix epoch.
    pub created_at_ms: u64,
    /// Serial of this version; equals `serial` for unedited messages.
    pub version: String,
    /// Time of this version in milliseconds since Unix epoch.
    pub timestamp_ms: u64,
    /// Present on update and delete versions.
    pub operation: Option<OperationDetails>,
}

impl Message {
    pub fn parsed_serial(&self) -> Result<Serial, ChatError> {
        self.serial.parse()
    }

    pub fn is_updated(&self) -> bool {
        self.action == MessageAction::Update
    }

    pub fn is_deleted(&self) -> bool {
        self.action == MessageAction::Delete
    }

    /// Whether this message was created before `other`.
    pub fn before(&self, other: &Message) -> Result<bool, ChatError> {
        Ok(self.parsed_serial()?.before(&other.parsed_serial()?))
    }

    /// Whether this message was created after `other`.
    pub fn after(&self, other: &Message) -> Result<bool, ChatError> {
        Ok(self.parsed_serial()?.after(&other.parsed_serial()?))
    }

    /// Whether both values refer to the same message.
    pub fn equal(&self, other: &Message) -> Result<bool, ChatError> {
        Ok(self.parsed_serial()?.equal(&other.parsed_serial()?))
    }

    /// Whether this is a later version of the same message than `other`.
    pub fn is_newer_version_of(&self, other: &Message) -> Result<bool, ChatError> {
        if !self.equal(other)? {
            return Err(ChatError::bad_request(format!(
                "cannot compare versions of different messages '{}' and '{}'",
                self.serial, other.serial
            )));
        }
        let mine: Serial = self.version.parse()?;
        let theirs: Serial = other.version.parse()?;
        Ok(mine.after(&theirs))
    }
}

/// Kind of change carried by a `MessageEvent`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageEventKind {
    Created,
    Updated,
    Deleted,
}

impl From<MessageAction> for MessageEventKind {
    fn from(action: MessageAction) -> Self {
        match action {
            MessageAction::Create => MessageEventKind::Created,
            MessageAction::Update => MessageEventKind::Updated,
            MessageAction::Delete => MessageEventKind::Deleted,
        }
    }
}

/// Realtime message change delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageEvent {
    pub kind: MessageEventKind,
    pub message: Message,
}

/// Parameters for sending a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendMessageParams {
    pub text: String,
    pub metadata: Option<Metadata>,
    pub headers: Option<Headers>,
}

impl SendMessageParams {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Replacement content for a message update.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateMessageParams {
    pub text: String,
    pub metadata: Option<Metadata>,
    pub headers: Option<Headers>,
}

/// Iteration order for history queries.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum HistoryDirection {
    Forwards,
    #[default]
    Backwards,
}

/// Message history query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Inclusive lower time bound in milliseconds.
    pub start_ms: Option<u64>,
    /// Inclusive upper time bound in milliseconds.
    pub end_ms: Option<u64>,
    pub direction: HistoryDirection,
    /// Requested page size; clamped to `1..=1000`.
    pub limit: Option<u16>,
}

/// Presence change kinds surfaced to chat callers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PresenceEventKind {
    Enter,
    Leave,
    Update,
    Present,
}

/// A member currently present in a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceMember {
    pub client_id: String,
    pub data: Option<Value>,
    pub updated_at_ms: u64,
}

/// Presence change delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceEvent {
    pub kind: PresenceEventKind,
    pub client_id: String,
    pub data: Option<Value>,
    pub timestamp_ms: u64,
}

/// Whether a typer started or stopped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TypingChangeKind {
    Started,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypingChange {
    pub client_id: String,
    pub kind: TypingChangeKind,
}

/// Typing set change delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypingEvent {
    pub currently_typing: BTreeSet<String>,
    pub change: TypingChange,
}

/// Parameters for sending a room reaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendReactionParams {
    /// Reaction name, for example `like`.
    pub name: String,
    pub metadata: Option<Metadata>,
    pub headers: Option<Headers>,
}

/// An ephemeral room reaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub name: String,
    pub metadata: Metadata,
    pub headers: Headers,
    pub client_id: String,
    pub created_at_ms: u64,
    /// Sent by the local client.
    pub is_self: bool,
}

/// Occupancy metrics for a room.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OccupancyEvent {
    pub connections: u64,
    pub presence_members: u64,
}

/// Connection status surfaced by the chat client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionStatus {
    Initialized,
    Connecting,
    Connected,
    Disconnected,
    Suspended,
    Failed,
}

/// Emitted on every connection status transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionStatusChange {
    pub current: ConnectionStatus,
    pub previous: ConnectionStatus,
    pub error: Option<ChatError>,
    /// Transport's hint for the next reconnection attempt.
    pub retry_in: Option<Duration>,
}
