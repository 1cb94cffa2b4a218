//! FOLIO Runtime
//!
//! Serves requests against a compiled sitemap: resolves the stage path for
//! the request, applies the requested view, wires the stages into a push
//! chain and runs it with the cacheable prefix memoized.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assembler;
pub mod builtin;
pub mod chain;
pub mod context;
pub mod engine;
pub mod error;
pub mod registry;
pub mod stage;

pub use builtin::{FileSource, IdentityTransform, ParametersSource, TextSink, TextSource, WrapTransform, XmlSink};
pub use chain::{CancelGate, Link, with_chain};
pub use context::{AcquiredStage, ExecutionContext, Request, Response, StageLease};
pub use engine::{Engine, EngineConfig};
pub use error::ProcessingError;
pub use registry::{StageArgs, StageProvider, StageRegistry};
pub use stage::{Cacheable, Sink, Source, StageEnv, StageInstance, Transform};
pub use tokio_util::sync::CancellationToken;
