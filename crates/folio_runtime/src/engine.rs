//! Execution engine.
//!
//! Serves requests against a compiled node tree: resolves the stage path,
//! acquires one stage per node, wires the push chain and runs it. The
//! longest cacheable prefix of the chain (the source plus the transforms
//! right after it that offer a key) runs through the cache coordinator as
//! one memoizable producer. Every acquired stage is released exactly once,
//! whatever the outcome.

use crate::assembler;
use crate::chain::{CancelGate, with_chain};
use crate::context::{AcquiredStage, ExecutionContext, Request, Response};
use crate::error::ProcessingError;
use crate::registry::{StageArgs, StageProvider, StageRegistry};
use crate::stage::{Source, StageEnv, Transform};
use folio_cache::{CacheConfig, CacheCoordinator, CacheKey, CacheStore, Memoizable, Validity};
use folio_core::NodeId;
use folio_events::{BalanceValidator, ContentHandler, StreamError};
use folio_plan::{ConfigNode, ConfigResult, LanguageRegistry, NodeTree, StageRole, TreeBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Check stream balance in front of the sink
    pub validate_balance: bool,
    /// Cache behavior
    pub cache: CacheConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            validate_balance: true,
            cache: CacheConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Enable or disable the balance validator
    #[must_use]
    pub fn with_validate_balance(mut self, validate: bool) -> Self {
        self.validate_balance = validate;
        self
    }

    /// Set the cache configuration
    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }
}

/// Request-serving engine over one compiled tree
///
/// The tree is read-only after construction, so one engine can serve
/// concurrent requests from several threads.
pub struct Engine {
    tree: Arc<NodeTree>,
    provider: Arc<dyn StageProvider>,
    cache: CacheCoordinator,
    config: EngineConfig,
}

impl Engine {
    /// Create an engine over an already compiled tree
    #[must_use]
    pub fn new(
        tree: Arc<NodeTree>,
        provider: Arc<dyn StageProvider>,
        store: Arc<dyn CacheStore>,
        config: EngineConfig,
    ) -> Self {
        let cache = CacheCoordinator::new(store, config.cache.clone());
        Self {
            tree,
            provider,
            cache,
            config,
        }
    }

    /// Compile `root` against `registry` and create an engine for it
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`](folio_plan::ConfigError) found in
    /// the configuration
    pub fn build(
        root: &ConfigNode,
        registry: Arc<StageRegistry>,
        languages: &LanguageRegistry,
        store: Arc<dyn CacheStore>,
        config: EngineConfig,
    ) -> ConfigResult<Self> {
        let tree = TreeBuilder::new(languages, registry.as_ref()).build(root)?;
        info!(nodes = tree.len(), views = tree.views().len(), "sitemap compiled");
        Ok(Self::new(Arc::new(tree), registry, store, config))
    }

    /// Compiled node tree
    #[must_use]
    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    /// Cache coordinator
    #[must_use]
    pub fn cache(&self) -> &CacheCoordinator {
        &self.cache
    }

    /// Engine configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Serve one request
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError`] if the view is unknown or not reachable,
    /// the resolved chain is malformed, or a stage fails
    pub fn execute(&self, request: &Request) -> Result<Response, ProcessingError> {
        self.execute_with_cancel(request, CancellationToken::new())
    }

    /// Serve one request, aborting once `cancel` is cancelled
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute), plus [`ProcessingError::Cancelled`]
    pub fn execute_with_cancel(
        &self,
        request: &Request,
        cancel: CancellationToken,
    ) -> Result<Response, ProcessingError> {
        let mut ctx = ExecutionContext::new(request, Arc::clone(&self.provider), cancel);
        let span = info_span!("execute", id = %ctx.id, path = %request.path);
        let _enter = span.enter();

        let result = self.serve(&mut ctx);
        match &result {
            Ok(response) => info!(
                mime_type = %response.mime_type,
                bytes = response.body.len(),
                cache = response.cache.as_str(),
                "execution finished"
            ),
            Err(error) => warn!(%error, "execution failed"),
        }
        result
    }

    fn serve(&self, ctx: &mut ExecutionContext<'_>) -> Result<Response, ProcessingError> {
        if ctx.cancel.is_cancelled() {
            return Err(ProcessingError::Cancelled);
        }

        let nodes = assembler::resolve(&self.tree, &ctx.eval_context(), ctx.view())?;
        assembler::check_roles(&self.tree, &nodes)?;
        debug!(stages = nodes.len(), view = ?ctx.view(), "pipeline resolved");

        self.acquire(ctx, &nodes)?;
        self.run(ctx)
    }

    fn acquire(&self, ctx: &mut ExecutionContext<'_>, nodes: &[NodeId]) -> Result<(), ProcessingError> {
        let request = ctx.request;
        for &id in nodes {
            let node = self
                .tree
                .stage(id)
                .ok_or_else(|| ProcessingError::malformed(format!("{} is not a stage", id)))?;
            let params = node
                .params
                .resolve_all(&request.parameters)
                .map_err(|err| ProcessingError::Parameter {
                    type_id: node.type_id.clone(),
                    message: err.to_string(),
                })?;
            let args = StageArgs {
                params: &params,
                path: &request.path,
                request: &request.parameters,
            };
            let instance = self.provider.acquire(node, &args)?;
            ctx.lease.push(AcquiredStage {
                node: id,
                type_id: node.type_id.clone(),
                instance,
            });
        }
        Ok(())
    }

    fn run(&self, ctx: &mut ExecutionContext<'_>) -> Result<Response, ProcessingError> {
        let execution = ctx.id;
        let env = ctx.stage_env();
        let cancel = ctx.cancel.clone();
        let (prefix_len, key) = cacheable_prefix(ctx.lease.stages());

        let stages = ctx.lease.stages_mut();
        let (first, rest) = stages
            .split_first_mut()
            .ok_or_else(|| ProcessingError::malformed("no stages acquired"))?;
        let (last, middle) = rest
            .split_last_mut()
            .ok_or_else(|| ProcessingError::malformed("no sink acquired"))?;

        let source = first
            .instance
            .as_source_mut()
            .ok_or_else(|| role_mismatch(&first.type_id, StageRole::Source))?;
        let sink = last
            .instance
            .as_sink_mut()
            .ok_or_else(|| role_mismatch(&last.type_id, StageRole::Sink))?;
        let mut transforms: Vec<&mut dyn Transform> = Vec::with_capacity(middle.len());
        for stage in middle.iter_mut() {
            let transform = stage
                .instance
                .as_transform_mut()
                .ok_or_else(|| role_mismatch(&stage.type_id, StageRole::Transform))?;
            transforms.push(transform);
        }
        let (prefix, suffix) = transforms.split_at_mut(prefix_len);

        let mut producer = PrefixProducer {
            source,
            transforms: prefix,
            env,
            key,
        };
        let cache = &self.cache;
        let mut gate = CancelGate::new(&cancel, &mut *sink);
        let outcome = if self.config.validate_balance {
            let mut validator = BalanceValidator::new(&mut gate);
            let outcome = with_chain(suffix, &mut validator, |head| {
                cache.fetch_or_compute(&mut producer, head)
            })?;
            let report = validator.finish()?;
            debug!(events = report.events, depth = report.max_depth, "stream balanced");
            outcome
        } else {
            with_chain(suffix, &mut gate, |head| cache.fetch_or_compute(&mut producer, head))?
        };

        Ok(Response {
            execution,
            mime_type: sink.mime_type().to_string(),
            body: sink.take_output(),
            cache: outcome,
        })
    }
}

fn role_mismatch(type_id: &str, expected: StageRole) -> ProcessingError {
    ProcessingError::malformed(format!("provider returned '{}' but a {} was expected", type_id, expected))
}

/// Number of transforms in the cacheable prefix and the composed key
///
/// Without a source key nothing is cacheable.
fn cacheable_prefix(stages: &[AcquiredStage]) -> (usize, Option<CacheKey>) {
    let Some((source, rest)) = stages.split_first() else {
        return (0, None);
    };
    let Some(source_key) = source.instance.cacheable().and_then(|c| c.cache_key()) else {
        return (0, None);
    };

    let mut parts = vec![(source.type_id.as_str(), source_key)];
    for stage in rest {
        if stage.instance.role() != StageRole::Transform {
            break;
        }
        match stage.instance.cacheable().and_then(|c| c.cache_key()) {
            Some(key) => parts.push((stage.type_id.as_str(), key)),
            None => break,
        }
    }

    let key = CacheKey::compose(parts.iter().map(|(type_id, key)| (*type_id, key)));
    (parts.len() - 1, Some(key))
}

/// Source plus cacheable transforms, presented to the cache as one producer
struct PrefixProducer<'p, 'q> {
    source: &'p mut dyn Source,
    transforms: &'p mut [&'q mut dyn Transform],
    env: StageEnv<'p>,
    key: Option<CacheKey>,
}

impl Memoizable for PrefixProducer<'_, '_> {
    fn cache_key(&self) -> Option<CacheKey> {
        self.key.clone()
    }

    fn validity(&self) -> Option<Validity> {
        let mut parts = Vec::with_capacity(self.transforms.len() + 1);
        parts.push(self.source.cacheable()?.validity()?);
        for transform in self.transforms.iter() {
            parts.push(transform.cacheable()?.validity()?);
        }
        Some(Validity::Aggregated(parts))
    }

    fn produce(&mut self, out: &mut dyn ContentHandler) -> Result<(), StreamError> {
        let Self {
            source,
            transforms,
            env,
            ..
        } = self;
        with_chain(transforms, out, |head| source.produce(env, head))
    }
}
