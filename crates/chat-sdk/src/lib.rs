//! Chat rooms on top of a realtime publish/subscribe transport.
//!
//! [`ChatClient`] hands out [`Room`]s through [`Rooms`]. Each room owns one
//! transport channel per enabled feature and a single actor task that runs
//! the room lifecycle and delivers every event callers observe.

/// Awaitable wrappers over callback-style transport operations.
pub mod bridge;
/// Chat client entry point.
pub mod client;
/// Transport connection status mirror.
pub mod connection;
/// Messages, presence, typing, reactions and occupancy.
pub mod features;
mod lifecycle;
/// Room handle.
pub mod room;
/// Room registry.
pub mod rooms;

pub use client::ChatClient;
pub use connection::Connection;
pub use features::{Messages, Occupancy, Presence, Reactions, Typing};
pub use room::Room;
pub use rooms::Rooms;
