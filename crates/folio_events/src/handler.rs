//! Push-style consumers of the event stream.

use crate::event::Event;

/// Errors raised while pushing events down a chain
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The stream broke a nesting or bracketing rule
    #[error("Unbalanced stream at event {position}: {reason}")]
    Unbalanced {
        /// Zero-based index of the offending event
        position: usize,
        /// What went wrong
        reason: String,
    },

    /// A qualified name used a prefix with no binding in scope
    #[error("Undeclared namespace prefix '{prefix}'")]
    UndeclaredPrefix {
        /// The unbound prefix
        prefix: String,
    },

    /// A stage failed while handling or producing events
    #[error("Stage '{stage}' failed: {message}")]
    Stage {
        /// Stage type id
        stage: String,
        /// Failure description
        message: String,
    },

    /// The consumer aborted the execution
    #[error("Execution cancelled")]
    Cancelled,
}

impl StreamError {
    /// Shorthand for a stage failure
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

/// Receives events one at a time, in stream order
pub trait ContentHandler {
    /// Handle the next event
    ///
    /// # Errors
    ///
    /// Returns error to abort the stream
    fn handle(&mut self, event: Event) -> Result<(), StreamError>;
}

impl<H: ContentHandler + ?Sized> ContentHandler for &mut H {
    fn handle(&mut self, event: Event) -> Result<(), StreamError> {
        (**self).handle(event)
    }
}

impl<H: ContentHandler + ?Sized> ContentHandler for Box<H> {
    fn handle(&mut self, event: Event) -> Result<(), StreamError> {
        (**self).handle(event)
    }
}

impl ContentHandler for Vec<Event> {
    fn handle(&mut self, event: Event) -> Result<(), StreamError> {
        self.push(event);
        Ok(())
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHandler;

impl ContentHandler for NullHandler {
    fn handle(&mut self, _event: Event) -> Result<(), StreamError> {
        Ok(())
    }
}

/// Forwards every event to two handlers, `first` before `second`
pub struct Tee<A, B> {
    first: A,
    second: B,
}

impl<A: ContentHandler, B: ContentHandler> Tee<A, B> {
    /// Create a tee
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }

    /// Split back into the two handlers
    pub fn into_parts(self) -> (A, B) {
        (self.first, self.second)
    }
}

impl<A: ContentHandler, B: ContentHandler> ContentHandler for Tee<A, B> {
    fn handle(&mut self, event: Event) -> Result<(), StreamError> {
        self.first.handle(event.clone())?;
        self.second.handle(event)
    }
}
