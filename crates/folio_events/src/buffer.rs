//! Recorded event sequences.

use crate::encoding::CanonicalEncode;
use crate::event::Event;
use crate::handler::{ContentHandler, StreamError};
use serde::{Deserialize, Serialize};

/// An owned, ordered batch of events that can be replayed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBuffer {
    events: Vec<Event>,
}

impl EventBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Append an event
    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Recorded events
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Take ownership of the recorded events
    #[must_use]
    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    /// Number of recorded events
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Push every recorded event, in order, into `out`
    ///
    /// # Errors
    ///
    /// Stops at and returns the first handler error
    pub fn replay(&self, out: &mut dyn ContentHandler) -> Result<(), StreamError> {
        for event in &self.events {
            out.handle(event.clone())?;
        }
        Ok(())
    }
}

impl From<Vec<Event>> for EventBuffer {
    fn from(events: Vec<Event>) -> Self {
        Self { events }
    }
}

impl ContentHandler for EventBuffer {
    fn handle(&mut self, event: Event) -> Result<(), StreamError> {
        self.events.push(event);
        Ok(())
    }
}

impl CanonicalEncode for EventBuffer {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Event> {
        vec![
            Event::StartDocument,
            Event::start("doc"),
            Event::text("hello"),
            Event::end("doc"),
            Event::EndDocument,
        ]
    }

    #[test]
    fn test_buffer_records() {
        let mut buffer = EventBuffer::new();
        for event in sample() {
            buffer.handle(event).unwrap();
        }
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.events(), sample().as_slice());
    }

    #[test]
    fn test_replay_preserves_order() {
        let buffer = EventBuffer::from(sample());
        let mut out: Vec<Event> = Vec::new();
        buffer.replay(&mut out).unwrap();
        assert_eq!(out, sample());
    }

    #[test]
    fn test_replay_stops_on_error() {
        struct StopAfter(usize);
        impl ContentHandler for StopAfter {
            fn handle(&mut self, _event: Event) -> Result<(), StreamError> {
                if self.0 == 0 {
                    return Err(StreamError::Cancelled);
                }
                self.0 -= 1;
                Ok(())
            }
        }

        let buffer = EventBuffer::from(sample());
        let mut out = StopAfter(2);
        assert_eq!(buffer.replay(&mut out), Err(StreamError::Cancelled));
    }

    #[test]
    fn test_empty_buffer() {
        let buffer = EventBuffer::default();
        assert!(buffer.is_empty());
        assert!(buffer.into_events().is_empty());
    }
}
