//! Immutable node tree.
//!
//! Nodes live in one arena and reference each other by [`NodeId`]. A built
//! tree never changes, so it can be shared across threads and executed by
//! any number of requests at once.

use crate::select::{Dispatch, SelectNode};
use folio_core::{NodeId, Parameters};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};
use std::str::FromStr;

/// Role of a pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageRole {
    /// Produces the initial stream
    Source,
    /// Rewrites the stream
    Transform,
    /// Serializes the stream
    Sink,
}

impl StageRole {
    /// Name as written in configuration
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Transform => "transform",
            Self::Sink => "sink",
        }
    }
}

impl FromStr for StageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(Self::Source),
            "transform" => Ok(Self::Transform),
            "sink" => Ok(Self::Sink),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for StageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageNode {
    /// Stage role
    pub role: StageRole,
    /// Registered type of the stage
    pub type_id: String,
    /// Unresolved parameters, may contain `{name}` placeholders
    pub params: Parameters,
    /// View anchor labels
    pub labels: Vec<String>,
    /// Declaration location
    pub location: String,
}

impl StageNode {
    /// Whether the stage carries `label`
    #[must_use]
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// Where a view attaches relative to its owner stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Splice {
    /// Exclude the owner and everything after it, then run the view
    Before,
    /// Keep the owner, drop what follows it, then run the view
    After,
    /// Run the view in place of the owner, then continue
    Replace,
}

impl Splice {
    /// Name as written in configuration
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
            Self::Replace => "replace",
        }
    }
}

impl FromStr for Splice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "before" => Ok(Self::Before),
            "after" => Ok(Self::After),
            "replace" => Ok(Self::Replace),
            other => Err(other.to_string()),
        }
    }
}

/// How a view picks its owner stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewAnchor {
    /// The stage declaring this label
    Label(String),
    /// First labeled stage of the container
    First,
    /// Last labeled stage of the container
    Last,
}

impl fmt::Display for ViewAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Label(label) => write!(f, "label '{}'", label),
            Self::First => f.write_str("position first"),
            Self::Last => f.write_str("position last"),
        }
    }
}

/// A named alternate tail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewNode {
    /// View name requested by callers
    pub name: String,
    /// How the owner was chosen
    pub anchor: ViewAnchor,
    /// Attachment mode
    pub splice: Splice,
    /// Tail nodes
    pub children: Vec<NodeId>,
    /// Declaration location
    pub location: String,
}

/// A node of the tree
#[derive(Debug, Clone)]
pub enum Node {
    /// Ordered children
    Sequence(Vec<NodeId>),
    /// Ordered children forming a label scope
    Container(Vec<NodeId>),
    /// Pipeline stage
    Stage(StageNode),
    /// Conditional
    Select(SelectNode),
    /// View declaration, skipped by the normal walk
    View(ViewNode),
}

impl Node {
    /// Short kind name
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Sequence(_) => "sequence",
            Self::Container(_) => "container",
            Self::Stage(_) => "stage",
            Self::Select(_) => "select",
            Self::View(_) => "view",
        }
    }
}

/// Resolved view: which stage it hangs off and how
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewBinding {
    /// The view node
    pub view: NodeId,
    /// Owner stage
    pub owner: NodeId,
    /// Attachment mode
    pub splice: Splice,
}

/// View name to its bindings, one per container declaring it
#[derive(Debug, Clone, Default)]
pub struct ViewRegistry {
    bindings: IndexMap<String, Vec<ViewBinding>>,
}

impl ViewRegistry {
    pub(crate) fn insert(&mut self, name: &str, binding: ViewBinding) {
        self.bindings.entry(name.to_string()).or_default().push(binding);
    }

    /// Bindings for `name`
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&[ViewBinding]> {
        self.bindings.get(name).map(Vec::as_slice)
    }

    /// Binding for `name` whose owner is `stage`
    #[must_use]
    pub fn binding_for(&self, name: &str, stage: NodeId) -> Option<&ViewBinding> {
        self.lookup(name)?.iter().find(|b| b.owner == stage)
    }

    /// Declared view names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    /// Number of distinct view names
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether no views are declared
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// A fully linked, immutable node tree
#[derive(Debug, Clone)]
pub struct NodeTree {
    nodes: Vec<Node>,
    root: NodeId,
    views: ViewRegistry,
}

impl NodeTree {
    pub(crate) fn new(nodes: Vec<Node>, root: NodeId, views: ViewRegistry) -> Self {
        Self { nodes, root, views }
    }

    /// Root node
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Node by id
    ///
    /// Ids only come from this tree, so lookups cannot miss.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Stage declaration by id
    #[must_use]
    pub fn stage(&self, id: NodeId) -> Option<&StageNode> {
        match self.node(id) {
            Node::Stage(stage) => Some(stage),
            _ => None,
        }
    }

    /// Linked views
    #[must_use]
    pub fn views(&self) -> &ViewRegistry {
        &self.views
    }

    /// Total node count
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids of every stage, in arena order
    pub fn stages(&self) -> impl Iterator<Item = (NodeId, &StageNode)> {
        self.nodes.iter().enumerate().filter_map(|(i, node)| match node {
            Node::Stage(stage) => NodeId::from_index(i).map(|id| (id, stage)),
            _ => None,
        })
    }

    /// Indented human-readable rendering
    #[must_use]
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_node(self.root, 0, &mut out);
        if !self.views.is_empty() {
            out.push_str("views:\n");
            for name in self.views.names() {
                for binding in self.views.lookup(name).unwrap_or_default() {
                    let _ = writeln!(
                        out,
                        "  {} -> {} {} ({})",
                        name,
                        binding.splice.as_str(),
                        binding.owner,
                        binding.view
                    );
                }
            }
        }
        out
    }

    fn dump_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        match self.node(id) {
            Node::Sequence(children) | Node::Container(children) => {
                let _ = writeln!(out, "{}{} {}", indent, self.node(id).kind_name(), id);
                self.dump_children(children, depth + 1, out);
            }
            Node::Stage(stage) => {
                let _ = write!(out, "{}{} {} {}", indent, stage.role, stage.type_id, id);
                if !stage.labels.is_empty() {
                    let _ = write!(out, " [{}]", stage.labels.join(","));
                }
                out.push('\n');
            }
            Node::Select(select) => {
                let _ = writeln!(out, "{}select {} {}", indent, select.language, id);
                match &select.dispatch {
                    Dispatch::Ordered(branches) => {
                        for branch in branches {
                            let _ = writeln!(out, "{}  when {}", indent, branch.expression);
                            self.dump_children(&branch.children, depth + 2, out);
                        }
                    }
                    Dispatch::Switch { cases, .. } => {
                        for (case, children) in cases {
                            let _ = writeln!(out, "{}  case {}", indent, case);
                            self.dump_children(children, depth + 2, out);
                        }
                    }
                }
                if let Some(children) = &select.otherwise {
                    let _ = writeln!(out, "{}  otherwise", indent);
                    self.dump_children(children, depth + 2, out);
                }
            }
            Node::View(view) => {
                let _ = writeln!(
                    out,
                    "{}view {} {} {} {}",
                    indent,
                    view.name,
                    view.splice.as_str(),
                    view.anchor,
                    id
                );
                self.dump_children(&view.children, depth + 1, out);
            }
        }
    }

    fn dump_children(&self, children: &[NodeId], depth: usize, out: &mut String) {
        for &child in children {
            self.dump_node(child, depth, out);
        }
    }
}
