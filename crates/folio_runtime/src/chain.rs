//! Push-chain wiring.
//!
//! Each transform is wrapped in a [`Link`] that owns a borrow of the
//! transform and of the handler after it. Links are built from the tail
//! backwards on the stack, so a chain of any length needs no allocation
//! and no shared ownership.

use crate::stage::Transform;
use folio_events::{ContentHandler, Event, StreamError};
use tokio_util::sync::CancellationToken;

/// A transform bound to its downstream handler
pub struct Link<'s, 'n> {
    stage: &'s mut dyn Transform,
    next: &'n mut dyn ContentHandler,
}

impl<'s, 'n> Link<'s, 'n> {
    /// Bind `stage` to `next`
    pub fn new(stage: &'s mut dyn Transform, next: &'n mut dyn ContentHandler) -> Self {
        Self { stage, next }
    }

    /// Let the transform flush into its downstream
    ///
    /// # Errors
    ///
    /// Propagates the transform's or a downstream error
    pub fn finish(&mut self) -> Result<(), StreamError> {
        self.stage.finish(&mut *self.next)
    }
}

impl ContentHandler for Link<'_, '_> {
    fn handle(&mut self, event: Event) -> Result<(), StreamError> {
        self.stage.transform(event, &mut *self.next)
    }
}

/// Wire `transforms` in order in front of `tail` and run `body` with the head
///
/// With no transforms `body` receives `tail` itself. Once `body` succeeds
/// each transform's `finish` hook runs, first transform first.
///
/// # Errors
///
/// Returns the first error from `body` or a `finish` hook
pub fn with_chain<R>(
    transforms: &mut [&mut dyn Transform],
    tail: &mut dyn ContentHandler,
    body: impl FnOnce(&mut dyn ContentHandler) -> Result<R, StreamError>,
) -> Result<R, StreamError> {
    let Some((last, rest)) = transforms.split_last_mut() else {
        return body(tail);
    };
    let mut link = Link::new(&mut **last, tail);
    let result = with_chain(rest, &mut link, body)?;
    link.finish()?;
    Ok(result)
}

/// Aborts the stream once the token is cancelled
pub struct CancelGate<'t, H> {
    token: &'t CancellationToken,
    next: H,
}

impl<'t, H: ContentHandler> CancelGate<'t, H> {
    /// Guard `next` with `token`
    pub fn new(token: &'t CancellationToken, next: H) -> Self {
        Self { token, next }
    }
}

impl<H: ContentHandler> ContentHandler for CancelGate<'_, H> {
    fn handle(&mut self, event: Event) -> Result<(), StreamError> {
        if self.token.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        self.next.handle(event)
    }
}
