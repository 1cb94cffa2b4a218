//! FOLIO Core Types
//!
//! Pure types shared by every FOLIO crate: identifiers, content hashes,
//! request parameters and the core error. No I/O happens here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod hash;
pub mod id;
pub mod params;

// Re-exports
pub use error::{CoreError, CoreResult};
pub use hash::Hash;
pub use id::{ExecutionId, NodeId};
pub use params::Parameters;
