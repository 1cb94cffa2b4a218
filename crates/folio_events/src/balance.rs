//! Stream balance validation.
//!
//! Checks the structural invariants every document stream must keep:
//! one document bracket, balanced elements with matching names, and
//! prefix mappings unbound in LIFO order right after the element that
//! introduced them.

use crate::event::{Event, QName};
use crate::handler::{ContentHandler, StreamError};

/// Counters collected while validating
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BalanceReport {
    /// Events seen
    pub events: usize,
    /// `StartPrefixMapping` events
    pub prefix_binds: usize,
    /// `EndPrefixMapping` events
    pub prefix_unbinds: usize,
    /// Deepest element nesting reached
    pub max_depth: usize,
}

#[derive(Debug)]
struct Frame {
    name: QName,
    prefixes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    BeforeDocument,
    InDocument,
    Ended,
}

/// Incremental checker for the stream invariants
#[derive(Debug)]
pub struct BalanceTracker {
    phase: Phase,
    open: Vec<Frame>,
    // bound but not yet attached to an element
    pending: Vec<String>,
    // owed by the element that just ended
    closing: Vec<String>,
    report: BalanceReport,
}

impl BalanceTracker {
    /// Create a tracker expecting a fresh document
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: Phase::BeforeDocument,
            open: Vec::new(),
            pending: Vec::new(),
            closing: Vec::new(),
            report: BalanceReport::default(),
        }
    }

    /// Current element depth
    #[must_use]
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Counters so far
    #[must_use]
    pub fn report(&self) -> BalanceReport {
        self.report
    }

    /// Whether the document has been closed
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Ended
    }

    /// Check the next event
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Unbalanced`] at the first violation
    pub fn check(&mut self, event: &Event) -> Result<(), StreamError> {
        let position = self.report.events;
        self.report.events += 1;

        if !self.closing.is_empty() && !matches!(event, Event::EndPrefixMapping { .. }) {
            return Err(self.violation(
                position,
                format!("prefixes {:?} still bound after their element ended", self.closing),
            ));
        }

        match (self.phase, event) {
            (Phase::BeforeDocument, Event::StartDocument) => {
                self.phase = Phase::InDocument;
                Ok(())
            }
            (Phase::BeforeDocument, _) => {
                Err(self.violation(position, "event before StartDocument".to_string()))
            }
            (Phase::Ended, _) => {
                Err(self.violation(position, "event after EndDocument".to_string()))
            }
            (Phase::InDocument, Event::StartDocument) => {
                Err(self.violation(position, "nested StartDocument".to_string()))
            }
            (Phase::InDocument, Event::EndDocument) => {
                if let Some(frame) = self.open.last() {
                    return Err(self.violation(
                        position,
                        format!("EndDocument with element <{}> still open", frame.name),
                    ));
                }
                if !self.pending.is_empty() {
                    return Err(self.violation(
                        position,
                        format!("EndDocument with prefixes {:?} still bound", self.pending),
                    ));
                }
                self.phase = Phase::Ended;
                Ok(())
            }
            (Phase::InDocument, Event::StartPrefixMapping { prefix, .. }) => {
                self.report.prefix_binds += 1;
                self.pending.push(prefix.clone());
                Ok(())
            }
            (Phase::InDocument, Event::EndPrefixMapping { prefix }) => {
                self.report.prefix_unbinds += 1;
                self.unbind(position, prefix)
            }
            (Phase::InDocument, Event::StartElement { name, .. }) => {
                self.open.push(Frame {
                    name: name.clone(),
                    prefixes: std::mem::take(&mut self.pending),
                });
                self.report.max_depth = self.report.max_depth.max(self.open.len());
                Ok(())
            }
            (Phase::InDocument, Event::EndElement { name }) => {
                let Some(frame) = self.open.pop() else {
                    return Err(self.violation(
                        position,
                        format!("EndElement </{}> at depth 0", name),
                    ));
                };
                if !frame.name.same_name(name) {
                    return Err(self.violation(
                        position,
                        format!("EndElement </{}> does not match <{}>", name, frame.name),
                    ));
                }
                self.closing = frame.prefixes;
                Ok(())
            }
            (Phase::InDocument, _) => Ok(()),
        }
    }

    fn unbind(&mut self, position: usize, prefix: &str) -> Result<(), StreamError> {
        if !self.closing.is_empty() {
            // innermost binding goes first
            if self.closing.last().map(String::as_str) == Some(prefix) {
                self.closing.pop();
                return Ok(());
            }
            return Err(self.violation(
                position,
                format!(
                    "EndPrefixMapping '{}' out of order, expected {:?} last first",
                    prefix, self.closing
                ),
            ));
        }
        // a mapping that never reached an element may be withdrawn, last first
        if self.pending.last().map(String::as_str) == Some(prefix) {
            self.pending.pop();
            return Ok(());
        }
        Err(self.violation(
            position,
            format!("EndPrefixMapping '{}' without a matching bind in scope", prefix),
        ))
    }

    fn violation(&self, position: usize, reason: String) -> StreamError {
        StreamError::Unbalanced { position, reason }
    }

    /// Confirm the stream ended properly
    ///
    /// # Errors
    ///
    /// Returns error if `EndDocument` was never seen
    pub fn finish(&self) -> Result<BalanceReport, StreamError> {
        if self.phase != Phase::Ended {
            return Err(StreamError::Unbalanced {
                position: self.report.events,
                reason: "stream ended without EndDocument".to_string(),
            });
        }
        Ok(self.report)
    }
}

impl Default for BalanceTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler that validates every event before forwarding it
pub struct BalanceValidator<H> {
    tracker: BalanceTracker,
    next: H,
}

impl<H: ContentHandler> BalanceValidator<H> {
    /// Wrap `next`
    pub fn new(next: H) -> Self {
        Self {
            tracker: BalanceTracker::new(),
            next,
        }
    }

    /// Confirm the stream ended properly
    ///
    /// # Errors
    ///
    /// Returns error if `EndDocument` was never seen
    pub fn finish(&self) -> Result<BalanceReport, StreamError> {
        self.tracker.finish()
    }

    /// Unwrap the downstream handler
    pub fn into_inner(self) -> H {
        self.next
    }
}

impl<H: ContentHandler> ContentHandler for BalanceValidator<H> {
    fn handle(&mut self, event: Event) -> Result<(), StreamError> {
        self.tracker.check(&event)?;
        self.next.handle(event)
    }
}

/// Validate a complete event sequence
///
/// # Errors
///
/// Returns the first violation
pub fn validate(events: &[Event]) -> Result<BalanceReport, StreamError> {
    let mut tracker = BalanceTracker::new();
    for event in events {
        tracker.check(event)?;
    }
    tracker.finish()
}
