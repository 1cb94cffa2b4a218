//! Tree builder.
//!
//! Turns a [`ConfigNode`] tree into a linked [`NodeTree`] in two passes
//! per container: the first builds every child and collects the labels
//! stages declare, the second resolves each view declared in the
//! container against those labels. Views may therefore reference stages
//! declared after them.
//!
//! Labels are scoped to the container that declares them; a nested
//! container starts a fresh scope and its labels are invisible outside.
//! Stages inside a view's own children never anchor views.

use crate::config::{ConfigKind, ConfigNode};
use crate::error::{ConfigError, ConfigResult};
use crate::select::{Branch, Dispatch, Language, LanguageRegistry, SelectNode};
use crate::tree::{Node, NodeTree, Splice, StageNode, StageRole, ViewAnchor, ViewBinding, ViewNode, ViewRegistry};
use folio_core::{NodeId, Parameters};
use indexmap::{IndexMap, IndexSet};
use tracing::debug;

/// Attributes of a stage that are not parameters
const STAGE_RESERVED: &[&str] = &["role", "type", "label"];

/// Something that knows which stage types exist
pub trait StageCatalog {
    /// Whether a stage of `type_id` is registered for `role`
    fn contains(&self, role: StageRole, type_id: &str) -> bool;
}

struct PendingView {
    id: NodeId,
    name: String,
    anchor: ViewAnchor,
    splice: Splice,
    location: String,
}

#[derive(Default)]
struct Scope {
    // labeled stages in declaration order
    stages: Vec<(NodeId, Vec<String>)>,
    views: Vec<PendingView>,
}

/// Builds and links node trees
pub struct TreeBuilder<'a> {
    languages: &'a LanguageRegistry,
    catalog: &'a dyn StageCatalog,
    nodes: Vec<Node>,
    scopes: Vec<Scope>,
    // depth of view subtrees currently being built
    in_view: usize,
    views: ViewRegistry,
}

impl<'a> TreeBuilder<'a> {
    /// Create a builder checking stage types against `catalog`
    #[must_use]
    pub fn new(languages: &'a LanguageRegistry, catalog: &'a dyn StageCatalog) -> Self {
        Self {
            languages,
            catalog,
            nodes: Vec::new(),
            scopes: Vec::new(),
            in_view: 0,
            views: ViewRegistry::default(),
        }
    }

    /// Build and link the tree rooted at `root`
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found; no partial tree is produced
    pub fn build(mut self, root: &ConfigNode) -> ConfigResult<NodeTree> {
        let location = locate(root, "/");
        match kind_of(root, &location)? {
            ConfigKind::Sequence | ConfigKind::Container => {}
            _ => {
                return Err(ConfigError::InvalidRoot {
                    kind: root.kind.clone(),
                    location,
                });
            }
        }

        // the root always opens a scope, even as a plain sequence
        self.scopes.push(Scope::default());
        let root_id = self.build_node(root, "/")?;
        let scope = self.scopes.pop().unwrap_or_default();
        self.link(scope)?;

        debug!(
            nodes = self.nodes.len(),
            views = self.views.len(),
            "node tree built"
        );
        Ok(NodeTree::new(self.nodes, root_id, self.views))
    }

    fn push(&mut self, node: Node) -> ConfigResult<NodeId> {
        let id = NodeId::from_index(self.nodes.len()).ok_or(ConfigError::TooManyNodes)?;
        self.nodes.push(node);
        Ok(id)
    }

    fn scope(&mut self) -> &mut Scope {
        if self.scopes.is_empty() {
            self.scopes.push(Scope::default());
        }
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    fn build_node(&mut self, node: &ConfigNode, path: &str) -> ConfigResult<NodeId> {
        let location = locate(node, path);
        match kind_of(node, &location)? {
            ConfigKind::Sequence => {
                let children = self.build_children(node, path)?;
                self.push(Node::Sequence(children))
            }
            ConfigKind::Container => {
                self.scopes.push(Scope::default());
                let children = self.build_children(node, path)?;
                let scope = self.scopes.pop().unwrap_or_default();
                self.link(scope)?;
                self.push(Node::Container(children))
            }
            ConfigKind::Stage => self.build_stage(node, location),
            ConfigKind::Select => self.build_select(node, path, location),
            ConfigKind::View => self.build_view(node, path, location),
            ConfigKind::When | ConfigKind::Otherwise => Err(ConfigError::UnexpectedChild {
                parent: "non-select".to_string(),
                child: node.kind.clone(),
                location,
            }),
        }
    }

    fn build_children(&mut self, node: &ConfigNode, path: &str) -> ConfigResult<Vec<NodeId>> {
        let mut ids = Vec::with_capacity(node.children.len());
        for (index, child) in node.children.iter().enumerate() {
            let child_path = child_path(path, child, index);
            if matches!(
                child.kind.parse::<ConfigKind>(),
                Ok(ConfigKind::When | ConfigKind::Otherwise)
            ) {
                return Err(ConfigError::UnexpectedChild {
                    parent: node.kind.clone(),
                    child: child.kind.clone(),
                    location: locate(child, &child_path),
                });
            }
            ids.push(self.build_node(child, &child_path)?);
        }
        Ok(ids)
    }

    fn build_stage(&mut self, node: &ConfigNode, location: String) -> ConfigResult<NodeId> {
        let role_name = required(node, "role", &location)?;
        let role = role_name
            .parse::<StageRole>()
            .map_err(|value| ConfigError::InvalidAttribute {
                attribute: "role".to_string(),
                value,
                location: location.clone(),
            })?;
        let type_id = required(node, "type", &location)?.to_string();
        if !self.catalog.contains(role, &type_id) {
            return Err(ConfigError::UnknownStageType {
                role: role.to_string(),
                type_id,
                location,
            });
        }
        if let Some(child) = node.children.first() {
            return Err(ConfigError::UnexpectedChild {
                parent: node.kind.clone(),
                child: child.kind.clone(),
                location,
            });
        }

        let labels: Vec<String> = node
            .get("label")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let params: Parameters = node
            .attributes
            .iter()
            .filter(|(name, _)| !STAGE_RESERVED.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        let id = self.push(Node::Stage(StageNode {
            role,
            type_id,
            params,
            labels: labels.clone(),
            location,
        }))?;
        if !labels.is_empty() && self.in_view == 0 {
            self.scope().stages.push((id, labels));
        }
        Ok(id)
    }

    fn build_select(&mut self, node: &ConfigNode, path: &str, location: String) -> ConfigResult<NodeId> {
        let language_name = node
            .get("language")
            .unwrap_or(LanguageRegistry::DEFAULT_LANGUAGE)
            .to_string();
        let language = self
            .languages
            .get(&language_name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownLanguage {
                language: language_name.clone(),
                location: location.clone(),
            })?;

        let mut branches = Vec::new();
        let mut cases: IndexMap<String, Vec<NodeId>> = IndexMap::new();
        let mut otherwise: Option<(Vec<NodeId>, String)> = None;

        for (index, child) in node.children.iter().enumerate() {
            let child_path = child_path(path, child, index);
            let child_location = locate(child, &child_path);
            match kind_of(child, &child_location)? {
                ConfigKind::When => match &language {
                    Language::Test(lang) => {
                        let expression = required(child, "test", &child_location)?.to_string();
                        let test = lang.compile(&expression).map_err(|reason| {
                            ConfigError::InvalidExpression {
                                expression: expression.clone(),
                                reason,
                                location: child_location.clone(),
                            }
                        })?;
                        let children = self.build_children(child, &child_path)?;
                        branches.push(Branch {
                            expression,
                            test,
                            children,
                        });
                    }
                    Language::Switch(_) => {
                        let case = required(child, "case", &child_location)?.to_string();
                        if cases.contains_key(&case) {
                            return Err(ConfigError::DuplicateCase {
                                case,
                                location: child_location,
                            });
                        }
                        let children = self.build_children(child, &child_path)?;
                        cases.insert(case, children);
                    }
                },
                ConfigKind::Otherwise => {
                    if let Some((_, first)) = &otherwise {
                        return Err(ConfigError::DuplicateOtherwise {
                            location: child_location,
                            first: first.clone(),
                        });
                    }
                    let children = self.build_children(child, &child_path)?;
                    otherwise = Some((children, child_location));
                }
                _ => {
                    return Err(ConfigError::UnexpectedChild {
                        parent: node.kind.clone(),
                        child: child.kind.clone(),
                        location: child_location,
                    });
                }
            }
        }

        let dispatch = match language {
            Language::Test(_) => Dispatch::Ordered(branches),
            Language::Switch(lang) => {
                let discriminant = lang.compile(&node.attributes).map_err(|reason| {
                    ConfigError::InvalidExpression {
                        expression: language_name.clone(),
                        reason,
                        location: location.clone(),
                    }
                })?;
                Dispatch::Switch { discriminant, cases }
            }
        };

        self.push(Node::Select(SelectNode {
            language: language_name,
            dispatch,
            otherwise: otherwise.map(|(children, _)| children),
        }))
    }

    fn build_view(&mut self, node: &ConfigNode, path: &str, location: String) -> ConfigResult<NodeId> {
        let name = required(node, "name", &location)?.to_string();
        let anchor = match (node.get("from-label"), node.get("from-position")) {
            (Some(label), None) => ViewAnchor::Label(label.trim().to_string()),
            (None, Some("first")) => ViewAnchor::First,
            (None, Some("last")) => ViewAnchor::Last,
            (None, Some(other)) => {
                return Err(ConfigError::InvalidAttribute {
                    attribute: "from-position".to_string(),
                    value: other.to_string(),
                    location,
                });
            }
            _ => return Err(ConfigError::ViewAnchor { view: name, location }),
        };
        let splice = match node.get("splice") {
            None => Splice::After,
            Some(raw) => raw.parse::<Splice>().map_err(|value| ConfigError::InvalidAttribute {
                attribute: "splice".to_string(),
                value,
                location: location.clone(),
            })?,
        };

        self.in_view += 1;
        let children = self.build_children(node, path);
        self.in_view -= 1;
        let children = children?;

        let id = self.push(Node::View(ViewNode {
            name: name.clone(),
            anchor: anchor.clone(),
            splice,
            children,
            location: location.clone(),
        }))?;
        if self.in_view == 0 {
            self.scope().views.push(PendingView {
                id,
                name,
                anchor,
                splice,
                location,
            });
        }
        Ok(id)
    }

    /// Second pass: resolve the views of one finished scope
    fn link(&mut self, scope: Scope) -> ConfigResult<()> {
        let mut seen = IndexSet::new();
        for view in scope.views {
            if !seen.insert(view.name.clone()) {
                return Err(ConfigError::DuplicateView {
                    view: view.name,
                    location: view.location,
                });
            }
            let owner = resolve_anchor(&scope.stages, &view)?;
            debug!(view = %view.name, owner = %owner, splice = view.splice.as_str(), "view linked");
            self.views.insert(
                &view.name,
                ViewBinding {
                    view: view.id,
                    owner,
                    splice: view.splice,
                },
            );
        }
        Ok(())
    }
}

fn resolve_anchor(stages: &[(NodeId, Vec<String>)], view: &PendingView) -> ConfigResult<NodeId> {
    match &view.anchor {
        ViewAnchor::Label(label) => {
            let owners: Vec<NodeId> = stages
                .iter()
                .filter(|(_, labels)| labels.iter().any(|l| l == label))
                .map(|(id, _)| *id)
                .collect();
            match owners.as_slice() {
                [owner] => Ok(*owner),
                [] => Err(ConfigError::UnresolvedLabel {
                    view: view.name.clone(),
                    label: label.clone(),
                    location: view.location.clone(),
                }),
                many => Err(ConfigError::AmbiguousLabel {
                    view: view.name.clone(),
                    label: label.clone(),
                    count: many.len(),
                    location: view.location.clone(),
                }),
            }
        }
        ViewAnchor::First | ViewAnchor::Last => {
            let owner = if view.anchor == ViewAnchor::First {
                stages.first()
            } else {
                stages.last()
            };
            owner.map(|(id, _)| *id).ok_or_else(|| ConfigError::NoLabeledStage {
                view: view.name.clone(),
                position: if view.anchor == ViewAnchor::First { "first" } else { "last" }.to_string(),
                location: view.location.clone(),
            })
        }
    }
}

fn kind_of(node: &ConfigNode, location: &str) -> ConfigResult<ConfigKind> {
    node.kind.parse().map_err(|kind| ConfigError::UnknownKind {
        kind,
        location: location.to_string(),
    })
}

fn required<'n>(node: &'n ConfigNode, attribute: &str, location: &str) -> ConfigResult<&'n str> {
    node.get(attribute).ok_or_else(|| ConfigError::MissingAttribute {
        kind: node.kind.clone(),
        attribute: attribute.to_string(),
        location: location.to_string(),
    })
}

fn child_path(parent: &str, child: &ConfigNode, index: usize) -> String {
    format!("{}/{}[{}]", parent.trim_end_matches('/'), child.kind, index)
}

fn locate(node: &ConfigNode, path: &str) -> String {
    node.location
        .as_ref()
        .map_or_else(|| path.to_string(), ToString::to_string)
}
