//! Stage factories and providers.
//!
//! Stage types are registered by id together with a constructor. The
//! registry doubles as the catalog the tree builder checks stage
//! declarations against, so an unknown type fails at build time.

use crate::error::ProcessingError;
use crate::stage::{Sink, Source, StageInstance, Transform};
use folio_core::Parameters;
use folio_plan::{StageCatalog, StageNode, StageRole};
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::trace;

/// Arguments handed to a stage constructor
#[derive(Debug, Clone, Copy)]
pub struct StageArgs<'a> {
    /// Stage parameters with placeholders resolved
    pub params: &'a Parameters,
    /// Request path
    pub path: &'a str,
    /// Request parameters
    pub request: &'a Parameters,
}

impl StageArgs<'_> {
    /// Required stage parameter
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError::StageInit`] naming `type_id` if absent
    pub fn require(&self, type_id: &str, name: &str) -> Result<&str, ProcessingError> {
        self.params.get(name).ok_or_else(|| ProcessingError::StageInit {
            type_id: type_id.to_string(),
            message: format!("missing parameter '{}'", name),
        })
    }
}

type Factory = Arc<dyn Fn(&StageArgs<'_>) -> Result<StageInstance, ProcessingError> + Send + Sync>;

/// Hands out stage instances for one execution and takes them back
pub trait StageProvider: Send + Sync {
    /// Create or reuse a stage for `node`
    ///
    /// # Errors
    ///
    /// Returns error if the type is unknown or construction fails
    fn acquire(&self, node: &StageNode, args: &StageArgs<'_>) -> Result<StageInstance, ProcessingError>;

    /// Take a stage back; called exactly once per acquired stage
    fn release(&self, type_id: &str, stage: StageInstance);
}

/// Registration-based stage factory map
#[derive(Clone, Default)]
pub struct StageRegistry {
    factories: IndexMap<(StageRole, String), Factory>,
}

impl StageRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in stages
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::builtin::register(&mut registry);
        registry
    }

    /// Register a source type
    pub fn register_source<F, S>(&mut self, type_id: &str, factory: F)
    where
        F: Fn(&StageArgs<'_>) -> Result<S, ProcessingError> + Send + Sync + 'static,
        S: Source + 'static,
    {
        self.insert(StageRole::Source, type_id, move |args| {
            factory(args).map(|stage| StageInstance::Source(Box::new(stage)))
        });
    }

    /// Register a transform type
    pub fn register_transform<F, T>(&mut self, type_id: &str, factory: F)
    where
        F: Fn(&StageArgs<'_>) -> Result<T, ProcessingError> + Send + Sync + 'static,
        T: Transform + 'static,
    {
        self.insert(StageRole::Transform, type_id, move |args| {
            factory(args).map(|stage| StageInstance::Transform(Box::new(stage)))
        });
    }

    /// Register a sink type
    pub fn register_sink<F, S>(&mut self, type_id: &str, factory: F)
    where
        F: Fn(&StageArgs<'_>) -> Result<S, ProcessingError> + Send + Sync + 'static,
        S: Sink + 'static,
    {
        self.insert(StageRole::Sink, type_id, move |args| {
            factory(args).map(|stage| StageInstance::Sink(Box::new(stage)))
        });
    }

    fn insert<F>(&mut self, role: StageRole, type_id: &str, factory: F)
    where
        F: Fn(&StageArgs<'_>) -> Result<StageInstance, ProcessingError> + Send + Sync + 'static,
    {
        self.factories
            .insert((role, type_id.to_string()), Arc::new(factory));
    }

    /// Registered `(role, type id)` pairs
    pub fn types(&self) -> impl Iterator<Item = (StageRole, &str)> {
        self.factories
            .keys()
            .map(|(role, type_id)| (*role, type_id.as_str()))
    }

    /// Construct a stage
    ///
    /// # Errors
    ///
    /// Returns error if no factory is registered or construction fails
    pub fn create(
        &self,
        role: StageRole,
        type_id: &str,
        args: &StageArgs<'_>,
    ) -> Result<StageInstance, ProcessingError> {
        let factory = self
            .factories
            .get(&(role, type_id.to_string()))
            .ok_or_else(|| ProcessingError::UnknownStage {
                role: role.to_string(),
                type_id: type_id.to_string(),
            })?;
        factory(args)
    }
}

impl StageCatalog for StageRegistry {
    fn contains(&self, role: StageRole, type_id: &str) -> bool {
        self.factories.contains_key(&(role, type_id.to_string()))
    }
}

impl StageProvider for StageRegistry {
    fn acquire(&self, node: &StageNode, args: &StageArgs<'_>) -> Result<StageInstance, ProcessingError> {
        self.create(node.role, &node.type_id, args)
    }

    fn release(&self, type_id: &str, mut stage: StageInstance) {
        stage.recycle();
        trace!(type_id, role = %stage.role(), "stage released");
    }
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.factories.keys().map(|(role, id)| format!("{}:{}", role, id)))
            .finish()
    }
}
