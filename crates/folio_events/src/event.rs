//! Structured document events.
//!
//! A document is a balanced sequence of these events bracketed by
//! [`Event::StartDocument`] and [`Event::EndDocument`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespace-qualified name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QName {
    /// Namespace URI, empty for no namespace
    pub uri: String,
    /// Local part
    pub local: String,
    /// Prefix used in the source, empty for none
    pub prefix: String,
}

impl QName {
    /// Name without namespace
    #[must_use]
    pub fn local(local: impl Into<String>) -> Self {
        Self {
            uri: String::new(),
            local: local.into(),
            prefix: String::new(),
        }
    }

    /// Name in a namespace, without prefix (default namespace)
    #[must_use]
    pub fn namespaced(uri: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            local: local.into(),
            prefix: String::new(),
        }
    }

    /// Name in a namespace with an explicit prefix
    #[must_use]
    pub fn prefixed(
        prefix: impl Into<String>,
        uri: impl Into<String>,
        local: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            local: local.into(),
            prefix: prefix.into(),
        }
    }

    /// Raw `prefix:local` form as written in markup
    #[must_use]
    pub fn raw(&self) -> String {
        if self.prefix.is_empty() {
            self.local.clone()
        } else {
            format!("{}:{}", self.prefix, self.local)
        }
    }

    /// Whether two names denote the same element (URI and local part)
    #[must_use]
    pub fn same_name(&self, other: &QName) -> bool {
        self.uri == other.uri && self.local == other.local
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.uri.is_empty() {
            write!(f, "{}", self.local)
        } else {
            write!(f, "{{{}}}{}", self.uri, self.local)
        }
    }
}

/// Element attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    /// Qualified attribute name
    pub name: QName,
    /// Attribute value
    pub value: String,
}

impl Attribute {
    /// Attribute without namespace
    #[must_use]
    pub fn new(local: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: QName::local(local),
            value: value.into(),
        }
    }
}

/// Event kind - discriminant of an [`Event`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    StartDocument,
    EndDocument,
    StartPrefixMapping,
    EndPrefixMapping,
    StartElement,
    EndElement,
    Characters,
    Comment,
    ProcessingInstruction,
}

impl EventKind {
    /// Document start or end
    pub const fn is_document_boundary(self) -> bool {
        matches!(self, Self::StartDocument | Self::EndDocument)
    }

    /// Namespace prefix bind or unbind
    pub const fn is_prefix_mapping(self) -> bool {
        matches!(self, Self::StartPrefixMapping | Self::EndPrefixMapping)
    }
}

/// A structured document event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    StartDocument,
    EndDocument,
    StartPrefixMapping { prefix: String, uri: String },
    EndPrefixMapping { prefix: String },
    StartElement { name: QName, attributes: Vec<Attribute> },
    EndElement { name: QName },
    Characters(String),
    Comment(String),
    ProcessingInstruction { target: String, data: String },
}

impl Event {
    /// Kind of this event
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::StartDocument => EventKind::StartDocument,
            Self::EndDocument => EventKind::EndDocument,
            Self::StartPrefixMapping { .. } => EventKind::StartPrefixMapping,
            Self::EndPrefixMapping { .. } => EventKind::EndPrefixMapping,
            Self::StartElement { .. } => EventKind::StartElement,
            Self::EndElement { .. } => EventKind::EndElement,
            Self::Characters(_) => EventKind::Characters,
            Self::Comment(_) => EventKind::Comment,
            Self::ProcessingInstruction { .. } => EventKind::ProcessingInstruction,
        }
    }

    /// Start of an element without namespace or attributes
    pub fn start(local: impl Into<String>) -> Self {
        Self::StartElement {
            name: QName::local(local),
            attributes: Vec::new(),
        }
    }

    /// End of an element without namespace
    pub fn end(local: impl Into<String>) -> Self {
        Self::EndElement {
            name: QName::local(local),
        }
    }

    /// Character data
    pub fn text(text: impl Into<String>) -> Self {
        Self::Characters(text.into())
    }
}
