//! Pipeline assembly.
//!
//! Resolves the ordered stage nodes one request runs through: every
//! sequence and container child in order, one branch per select. View
//! declarations are skipped by the walk. When the request names a view,
//! reaching the owner stage of that view's binding switches the walk over
//! to the view's children according to the binding's splice mode.

use crate::error::ProcessingError;
use folio_core::NodeId;
use folio_plan::{EvalContext, Node, NodeTree, Splice, StageRole};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct Walk<'t, 'c> {
    tree: &'t NodeTree,
    ctx: &'c EvalContext<'c>,
    view: Option<&'c str>,
    applied: bool,
    stages: Vec<NodeId>,
}

impl Walk<'_, '_> {
    fn walk_all(&mut self, children: &[NodeId]) -> Result<Flow, ProcessingError> {
        for &child in children {
            if self.walk(child)? == Flow::Stop {
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    fn walk(&mut self, id: NodeId) -> Result<Flow, ProcessingError> {
        match self.tree.node(id) {
            Node::Sequence(children) | Node::Container(children) => self.walk_all(children),
            Node::Select(select) => match select.evaluate(self.ctx) {
                Some(children) => self.walk_all(children),
                None => Ok(Flow::Continue),
            },
            Node::View(_) => Ok(Flow::Continue),
            Node::Stage(_) => self.visit_stage(id),
        }
    }

    fn visit_stage(&mut self, id: NodeId) -> Result<Flow, ProcessingError> {
        let binding = match self.view {
            Some(view) if !self.applied => self.tree.views().binding_for(view, id).copied(),
            _ => None,
        };
        let Some(binding) = binding else {
            self.stages.push(id);
            return Ok(Flow::Continue);
        };

        let Node::View(view) = self.tree.node(binding.view) else {
            return Err(ProcessingError::malformed(format!(
                "view binding points at {} which is not a view",
                binding.view
            )));
        };
        self.applied = true;
        debug!(view = %view.name, owner = %id, splice = binding.splice.as_str(), "view applied");

        match binding.splice {
            Splice::Before => {
                self.walk_all(&view.children)?;
                Ok(Flow::Stop)
            }
            Splice::After => {
                self.stages.push(id);
                self.walk_all(&view.children)?;
                Ok(Flow::Stop)
            }
            Splice::Replace => {
                self.walk_all(&view.children)?;
                Ok(Flow::Continue)
            }
        }
    }
}

/// Resolve the stage nodes for one request, in chain order
///
/// # Errors
///
/// Returns [`ProcessingError::UnknownView`] if `view` is not declared and
/// [`ProcessingError::ViewNotReached`] if it is declared but none of its
/// owners lies on the resolved path
pub fn resolve(tree: &NodeTree, ctx: &EvalContext<'_>, view: Option<&str>) -> Result<Vec<NodeId>, ProcessingError> {
    if let Some(name) = view {
        if tree.views().lookup(name).is_none() {
            return Err(ProcessingError::UnknownView {
                view: name.to_string(),
            });
        }
    }

    let mut walk = Walk {
        tree,
        ctx,
        view,
        applied: false,
        stages: Vec::new(),
    };
    walk.walk(tree.root())?;

    if let Some(name) = view {
        if !walk.applied {
            return Err(ProcessingError::ViewNotReached {
                view: name.to_string(),
            });
        }
    }
    Ok(walk.stages)
}

/// Check that `stages` is one source, then transforms, then one sink
///
/// # Errors
///
/// Returns [`ProcessingError::MalformedChain`] describing the first problem
pub fn check_roles(tree: &NodeTree, stages: &[NodeId]) -> Result<(), ProcessingError> {
    let roles: Vec<StageRole> = stages
        .iter()
        .filter_map(|&id| tree.stage(id).map(|stage| stage.role))
        .collect();
    if roles.len() != stages.len() {
        return Err(ProcessingError::malformed("resolved path contains a non-stage node"));
    }

    match roles.as_slice() {
        [] => Err(ProcessingError::malformed("no stages on the resolved path")),
        [StageRole::Source, middle @ .., StageRole::Sink] => {
            match middle.iter().position(|role| *role != StageRole::Transform) {
                Some(index) => Err(ProcessingError::malformed(format!(
                    "{} stage at position {} where only transforms may appear",
                    middle[index],
                    index + 1
                ))),
                None => Ok(()),
            }
        }
        [first, ..] if *first != StageRole::Source => Err(ProcessingError::malformed(format!(
            "pipeline starts with a {} instead of a source",
            first
        ))),
        [.., last] => Err(ProcessingError::malformed(format!(
            "pipeline ends with a {} instead of a sink",
            last
        ))),
    }
}
