//! Per-request state.

use crate::registry::StageProvider;
use crate::stage::{StageEnv, StageInstance};
use folio_cache::CacheOutcome;
use folio_core::{ExecutionId, NodeId, Parameters};
use folio_plan::EvalContext;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// An execution request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Request path
    pub path: String,
    /// Request parameters
    #[serde(default)]
    pub parameters: Parameters,
    /// View to render instead of the full pipeline
    #[serde(default)]
    pub view: Option<String>,
}

impl Request {
    /// Request for `path` with no parameters
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Add a parameter
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name, value);
        self
    }

    /// Select a view
    #[must_use]
    pub fn with_view(mut self, view: impl Into<String>) -> Self {
        self.view = Some(view.into());
        self
    }
}

/// Result of a successful execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Execution that produced it
    pub execution: ExecutionId,
    /// MIME type reported by the sink
    pub mime_type: String,
    /// Serialized body
    pub body: Vec<u8>,
    /// What the cache did for the cacheable prefix
    pub cache: CacheOutcome,
}

impl Response {
    /// Body as UTF-8 text, lossy
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A stage acquired for the current execution
#[derive(Debug)]
pub struct AcquiredStage {
    /// Node the stage was created for
    pub node: NodeId,
    /// Registered type
    pub type_id: String,
    /// The live stage
    pub instance: StageInstance,
}

/// Owns acquired stages and releases each exactly once on drop
pub struct StageLease {
    provider: Arc<dyn StageProvider>,
    stages: Vec<AcquiredStage>,
}

impl StageLease {
    /// Empty lease returning stages to `provider`
    #[must_use]
    pub fn new(provider: Arc<dyn StageProvider>) -> Self {
        Self {
            provider,
            stages: Vec::new(),
        }
    }

    /// Take ownership of an acquired stage
    pub fn push(&mut self, stage: AcquiredStage) {
        self.stages.push(stage);
    }

    /// Acquired stages in chain order
    #[must_use]
    pub fn stages(&self) -> &[AcquiredStage] {
        &self.stages
    }

    /// Mutable access for wiring
    pub fn stages_mut(&mut self) -> &mut [AcquiredStage] {
        &mut self.stages
    }

    /// Number of held stages
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether nothing is held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl Drop for StageLease {
    fn drop(&mut self) {
        for stage in self.stages.drain(..) {
            self.provider.release(&stage.type_id, stage.instance);
        }
    }
}

/// State of one execution
pub struct ExecutionContext<'r> {
    /// Unique execution id
    pub id: ExecutionId,
    /// The request being served
    pub request: &'r Request,
    /// Cancellation signal from the caller
    pub cancel: CancellationToken,
    /// Stages acquired so far
    pub lease: StageLease,
}

impl<'r> ExecutionContext<'r> {
    /// Start an execution
    #[must_use]
    pub fn new(request: &'r Request, provider: Arc<dyn StageProvider>, cancel: CancellationToken) -> Self {
        Self {
            id: ExecutionId::new(),
            request,
            cancel,
            lease: StageLease::new(provider),
        }
    }

    /// Request path
    #[must_use]
    pub fn path(&self) -> &str {
        &self.request.path
    }

    /// Request parameters
    #[must_use]
    pub fn params(&self) -> &Parameters {
        &self.request.parameters
    }

    /// Active view, if any
    #[must_use]
    pub fn view(&self) -> Option<&str> {
        self.request.view.as_deref()
    }

    /// What select tests see
    #[must_use]
    pub fn eval_context(&self) -> EvalContext<'r> {
        EvalContext::new(&self.request.path, &self.request.parameters)
    }

    /// What sources see
    #[must_use]
    pub fn stage_env(&self) -> StageEnv<'r> {
        StageEnv {
            execution: self.id,
            path: &self.request.path,
            request: &self.request.parameters,
        }
    }
}
