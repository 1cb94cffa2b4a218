//! Generic attributed configuration tree.
//!
//! The concrete file syntax is somebody else's problem; whatever parses it
//! hands the builder a tree of [`ConfigNode`]s. A JSON rendition is
//! accepted directly through serde.

use folio_core::{CoreError, CoreResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Position of a node in its source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// File or resource name
    pub source: String,
    /// One-based line
    pub line: u32,
    /// One-based column
    pub column: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.source, self.line, self.column)
    }
}

/// Node-kind discriminant of a configuration node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKind {
    Sequence,
    Stage,
    Select,
    When,
    Otherwise,
    View,
    Container,
}

impl ConfigKind {
    /// Name as written in configuration
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sequence => "sequence",
            Self::Stage => "stage",
            Self::Select => "select",
            Self::When => "when",
            Self::Otherwise => "otherwise",
            Self::View => "view",
            Self::Container => "container",
        }
    }
}

impl FromStr for ConfigKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequence" => Ok(Self::Sequence),
            "stage" => Ok(Self::Stage),
            "select" => Ok(Self::Select),
            "when" => Ok(Self::When),
            "otherwise" => Ok(Self::Otherwise),
            "view" => Ok(Self::View),
            "container" => Ok(Self::Container),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node of the configuration tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigNode {
    /// Kind discriminant, e.g. `"stage"`
    pub kind: String,
    /// Attributes in declaration order
    #[serde(default)]
    pub attributes: IndexMap<String, String>,
    /// Child nodes in declaration order
    #[serde(default)]
    pub children: Vec<ConfigNode>,
    /// Where the node was declared, if the parser knows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl ConfigNode {
    /// Create a node of the given kind
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attributes: IndexMap::new(),
            children: Vec::new(),
            location: None,
        }
    }

    /// Builder-style attribute
    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Builder-style child
    #[must_use]
    pub fn child(mut self, child: ConfigNode) -> Self {
        self.children.push(child);
        self
    }

    /// Builder-style location
    #[must_use]
    pub fn at(mut self, source: impl Into<String>, line: u32, column: u32) -> Self {
        self.location = Some(Location {
            source: source.into(),
            line,
            column,
        });
        self
    }

    /// Look up an attribute
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Parse a JSON rendition of the tree
    ///
    /// # Errors
    ///
    /// Returns error if the JSON does not describe a configuration node
    pub fn from_json(json: &str) -> CoreResult<Self> {
        serde_json::from_str(json).map_err(CoreError::from)
    }

    // Shorthands used when writing trees in code

    /// `<sequence>`
    #[must_use]
    pub fn sequence() -> Self {
        Self::new(ConfigKind::Sequence.as_str())
    }

    /// `<container>`
    #[must_use]
    pub fn container() -> Self {
        Self::new(ConfigKind::Container.as_str())
    }

    /// `<stage role=.. type=..>`
    #[must_use]
    pub fn stage(role: &str, type_id: &str) -> Self {
        Self::new(ConfigKind::Stage.as_str())
            .attr("role", role)
            .attr("type", type_id)
    }

    /// `<select language=..>`
    #[must_use]
    pub fn select(language: &str) -> Self {
        Self::new(ConfigKind::Select.as_str()).attr("language", language)
    }

    /// `<when test=..>`
    #[must_use]
    pub fn when(test: &str) -> Self {
        Self::new(ConfigKind::When.as_str()).attr("test", test)
    }

    /// `<when case=..>` for switch selects
    #[must_use]
    pub fn case(value: &str) -> Self {
        Self::new(ConfigKind::When.as_str()).attr("case", value)
    }

    /// `<otherwise>`
    #[must_use]
    pub fn otherwise() -> Self {
        Self::new(ConfigKind::Otherwise.as_str())
    }

    /// `<view name=..>`
    #[must_use]
    pub fn view(name: &str) -> Self {
        Self::new(ConfigKind::View.as_str()).attr("name", name)
    }
}
