use thiserror::Error;

use crate::{
    error::ChatError,
    serial::Serial,
    types::{Message, MessageEvent, MessageEventKind},
};

/// Errors that can occur while applying message events.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimelineMergeError {
    /// An update or delete referenced a message that is not in the buffer.
    #[error("message with serial '{0}' was not found")]
    MissingMessage(String),
    /// A message carried a serial that could not be parsed.
    #[error("invalid message serial: {0}")]
    InvalidSerial(#[from] ChatError),
}

/// In-memory message buffer kept in serial order, oldest first.
#[derive(Debug, Clone)]
pub struct MessageTimeline {
    items: Vec<(Serial, Message)>,
    max_items: usize,
}

impl MessageTimeline {
    /// Create a timeline with an item cap (`max_items >= 1`).
    pub fn new(max_items: usize) -> Self {
        Self {
            items: Vec::new(),
            max_items: max_items.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Messages in serial order, oldest first.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.items.iter().map(|(_, message)| message)
    }

    /// Apply realtime events in order.
    pub fn apply(&mut self, events: &[MessageEvent]) -> Result<(), TimelineMergeError> {
        for event in events {
            match event.kind {
                MessageEventKind::Created => self.insert(event.message.clone())?,
                MessageEventKind::Updated | MessageEventKind::Deleted => {
                    self.replace_if_newer(event.message.clone())?
                }
            }
            self.trim_to_max();
        }
        Ok(())
    }

    /// Merge a history page, which may arrive in either direction.
    pub fn merge_history(&mut self, page: Vec<Message>) -> Result<(), TimelineMergeError> {
        for message in page {
            self.insert(message)?;
        }
        self.trim_to_max();
        Ok(())
    }

    /// Clamp a requested history page size against safety and server caps.
    ///
    /// The result is always in `1..=1000`.
    pub fn bounded_history_limit(requested: u16, server_cap: u16) -> u16 {
        let safe_requested = requested.max(1);
        let safe_cap = server_cap.max(1);
        safe_requested.min(safe_cap).min(1000)
    }

    fn insert(&mut self, message: Message) -> Result<(), TimelineMergeError> {
        let serial = message.parsed_serial()?;
        match self.search(&serial) {
            Ok(idx) => {
                let (_, existing) = &self.items[idx];
                if message.is_newer_version_of(existing)? {
                    self.items[idx].1 = message;
                }
            }
            Err(idx) => self.items.insert(idx, (serial, message)),
        }
        Ok(())
    }

    fn replace_if_newer(&mut self, message: Message) -> Result<(), TimelineMergeError> {
        let serial = message.parsed_serial()?;
        let idx = self
            .search(&serial)
            .map_err(|_| TimelineMergeError::MissingMessage(message.serial.clone()))?;
        if message.is_newer_version_of(&self.items[idx].1)? {
            self.items[idx].1 = message;
        }
        Ok(())
    }

    fn search(&self, serial: &Serial) -> Result<usize, usize> {
        self.items.binary_search_by(|(existing, _)| existing.total_cmp(serial))
    }

    fn trim_to_max(&mut self) {
        if self.items.len() <= self.max_items {
            return;
        }

        let excess = self.items.len() - self.max_items;
        self.items.drain(0..excess);
    }
}
