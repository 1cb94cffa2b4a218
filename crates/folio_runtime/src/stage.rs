//! Stage contracts.
//!
//! A pipeline is one [`Source`], any number of [`Transform`]s and one
//! [`Sink`]. Events are pushed: the source drives every downstream stage
//! synchronously, one event at a time.
//!
//! Any stage may offer the [`Cacheable`] capability. Stages are request
//! scoped and get a [`recycle`](Source::recycle) call when released, so a
//! provider that pools instances hands out clean ones.

use folio_cache::{CacheKey, Validity};
use folio_core::{ExecutionId, Parameters};
use folio_events::{ContentHandler, Event, StreamError};
use folio_plan::StageRole;

/// What a source can see about the request it runs for
#[derive(Debug, Clone, Copy)]
pub struct StageEnv<'a> {
    /// Execution the stage belongs to
    pub execution: ExecutionId,
    /// Request path
    pub path: &'a str,
    /// Request parameters
    pub request: &'a Parameters,
}

/// Optional caching capability
pub trait Cacheable {
    /// Key of this stage's contribution, `None` when not cacheable this time
    fn cache_key(&self) -> Option<CacheKey>;

    /// Current validity of this stage's output
    fn validity(&self) -> Option<Validity>;
}

/// Produces the initial stream
pub trait Source: Send {
    /// Push a complete document into `out`
    ///
    /// # Errors
    ///
    /// Returns error if production or a downstream stage fails
    fn produce(&mut self, env: &StageEnv<'_>, out: &mut dyn ContentHandler) -> Result<(), StreamError>;

    /// Caching capability, if offered
    fn cacheable(&self) -> Option<&dyn Cacheable> {
        None
    }

    /// Reset before reuse
    fn recycle(&mut self) {}
}

/// Rewrites the stream event by event
pub trait Transform: Send {
    /// Handle one event, pushing any output into `out`
    ///
    /// # Errors
    ///
    /// Returns error if the transform or a downstream stage fails
    fn transform(&mut self, event: Event, out: &mut dyn ContentHandler) -> Result<(), StreamError>;

    /// Called once after the upstream finished producing
    ///
    /// # Errors
    ///
    /// Returns error if flushing fails
    fn finish(&mut self, _out: &mut dyn ContentHandler) -> Result<(), StreamError> {
        Ok(())
    }

    /// Caching capability, if offered
    fn cacheable(&self) -> Option<&dyn Cacheable> {
        None
    }

    /// Reset before reuse
    fn recycle(&mut self) {}
}

/// Serializes the stream
pub trait Sink: ContentHandler + Send {
    /// MIME type of the serialized output
    fn mime_type(&self) -> &str;

    /// Take the serialized output, leaving the sink empty
    fn take_output(&mut self) -> Vec<u8>;

    /// Caching capability, if offered
    fn cacheable(&self) -> Option<&dyn Cacheable> {
        None
    }

    /// Reset before reuse
    fn recycle(&mut self) {}
}

/// A live stage of any role
pub enum StageInstance {
    /// Source stage
    Source(Box<dyn Source>),
    /// Transform stage
    Transform(Box<dyn Transform>),
    /// Sink stage
    Sink(Box<dyn Sink>),
}

impl StageInstance {
    /// Role of the stage
    #[must_use]
    pub fn role(&self) -> StageRole {
        match self {
            Self::Source(_) => StageRole::Source,
            Self::Transform(_) => StageRole::Transform,
            Self::Sink(_) => StageRole::Sink,
        }
    }

    /// Caching capability, if offered
    #[must_use]
    pub fn cacheable(&self) -> Option<&dyn Cacheable> {
        match self {
            Self::Source(stage) => stage.cacheable(),
            Self::Transform(stage) => stage.cacheable(),
            Self::Sink(stage) => stage.cacheable(),
        }
    }

    /// Reset before reuse
    pub fn recycle(&mut self) {
        match self {
            Self::Source(stage) => stage.recycle(),
            Self::Transform(stage) => stage.recycle(),
            Self::Sink(stage) => stage.recycle(),
        }
    }

    /// The source, if this is one
    pub fn as_source_mut(&mut self) -> Option<&mut dyn Source> {
        match self {
            Self::Source(stage) => Some(stage.as_mut()),
            _ => None,
        }
    }

    /// The transform, if this is one
    pub fn as_transform_mut(&mut self) -> Option<&mut dyn Transform> {
        match self {
            Self::Transform(stage) => Some(stage.as_mut()),
            _ => None,
        }
    }

    /// The sink, if this is one
    pub fn as_sink_mut(&mut self) -> Option<&mut dyn Sink> {
        match self {
            Self::Sink(stage) => Some(stage.as_mut()),
            _ => None,
        }
    }
}

impl std::fmt::Debug for StageInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StageInstance::{}", self.role())
    }
}
