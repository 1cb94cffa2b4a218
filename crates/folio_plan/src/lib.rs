//! FOLIO Planner
//!
//! Builds the immutable node tree a site is served from: stages, selects,
//! containers and views, with every view linked to the stage it hangs off
//! before the first request runs.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod config;
pub mod error;
pub mod select;
pub mod tree;

pub use builder::{StageCatalog, TreeBuilder};
pub use config::{ConfigKind, ConfigNode, Location};
pub use error::{ConfigError, ConfigResult};
pub use select::{
    Branch, Discriminant, Dispatch, EvalContext, Language, LanguageRegistry, SelectNode, SwitchLanguage, Test,
    TestLanguage,
};
pub use tree::{Node, NodeTree, Splice, StageNode, StageRole, ViewAnchor, ViewBinding, ViewNode, ViewRegistry};
