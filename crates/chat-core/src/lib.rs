//! Core chat contract shared between the room runtime and its callers.
//!
//! This crate defines the error taxonomy, message serial ordering, the room
//! status state machine, domain event types, and broadcast event streams.

/// Broadcast event stream primitives.
pub mod channel;
/// Stable chat error type and codes.
pub mod error;
/// REST payload decoding helpers.
pub mod normalization;
/// Message serial parsing and ordering.
pub mod serial;
/// Room status state machine.
pub mod state_machine;
/// Serial-ordered message buffer.
pub mod timeline;
/// Caller-facing domain types (statuses, messages, events, options).
pub mod types;

pub use channel::{EventEmitter, EventStream, EventStreamError, next_event};
pub use error::{ChatError, ChatErrorKind, ProgrammerError, codes};
pub use serial::Serial;
pub use state_machine::{Admission, RoomLifecycle, RoomOperation};
pub use timeline::{MessageTimeline, TimelineMergeError};
pub use types::{
    ConnectionStatus, ConnectionStatusChange, DiscontinuityEvent, Headers, HistoryDirection,
    HistoryQuery, Message, MessageAction, MessageEvent, MessageEventKind, Metadata,
    OccupancyEvent, OccupancyOptions, OperationDetails, PresenceEvent, PresenceEventKind,
    PresenceMember, PresenceOptions, Reaction, ReactionsOptions, RoomFeature, RoomOptions,
    RoomStatus, RoomStatusChange, SendMessageParams, SendReactionParams, TypingChange,
    TypingChangeKind, TypingEvent, TypingOptions, UpdateMessageParams,
};
