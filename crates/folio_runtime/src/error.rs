//! Request-time errors.

use folio_events::StreamError;

/// Error that aborts one execution
///
/// Output already handed to the sink when the error occurred is discarded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessingError {
    /// Requested view is not declared anywhere
    #[error("unknown view '{view}'")]
    UnknownView { view: String },

    /// Requested view is declared but its owner is not on the resolved path
    #[error("view '{view}' does not apply to the resolved path")]
    ViewNotReached { view: String },

    /// Resolved stages do not form source, transforms, sink
    #[error("malformed pipeline: {reason}")]
    MalformedChain { reason: String },

    /// No factory for the stage
    #[error("no {role} stage of type '{type_id}' is registered")]
    UnknownStage { role: String, type_id: String },

    /// Factory rejected the stage's parameters
    #[error("stage '{type_id}' could not be created: {message}")]
    StageInit { type_id: String, message: String },

    /// A `{name}` placeholder had no request parameter
    #[error("stage '{type_id}': {message}")]
    Parameter { type_id: String, message: String },

    /// Failure inside the event chain
    #[error(transparent)]
    Stream(StreamError),

    /// The caller cancelled the execution
    #[error("execution cancelled")]
    Cancelled,
}

impl ProcessingError {
    /// Shorthand for a malformed chain
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedChain {
            reason: reason.into(),
        }
    }
}

impl From<StreamError> for ProcessingError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Cancelled => Self::Cancelled,
            other => Self::Stream(other),
        }
    }
}
