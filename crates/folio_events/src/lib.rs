//! FOLIO Event Stream
//!
//! Structured document events passed push-style between pipeline stages,
//! with balance validation, recording/replay, canonical encoding for the
//! cache, and an adapter for producers that only emit flat attributes.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod balance;
pub mod buffer;
pub mod encoding;
pub mod event;
pub mod handler;

pub use adapter::NamespaceAdapter;
pub use balance::{BalanceReport, BalanceTracker, BalanceValidator};
pub use buffer::EventBuffer;
pub use encoding::{CanonicalDecode, CanonicalEncode, DecodeError, EncodeError};
pub use event::{Attribute, Event, EventKind, QName};
pub use handler::{ContentHandler, NullHandler, StreamError, Tee};
