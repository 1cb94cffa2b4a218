//! Configuration errors raised while building the node tree.
//!
//! Every variant carries the location of the offending node: the source
//! position when the parser supplied one, otherwise its path in the
//! configuration tree.

/// Error raised while building a [`crate::NodeTree`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Node kind is not one the builder understands
    #[error("{location}: unknown node kind '{kind}'")]
    UnknownKind { kind: String, location: String },

    /// Required attribute is absent
    #[error("{location}: <{kind}> requires attribute '{attribute}'")]
    MissingAttribute {
        kind: String,
        attribute: String,
        location: String,
    },

    /// Attribute value is not acceptable
    #[error("{location}: invalid value '{value}' for attribute '{attribute}'")]
    InvalidAttribute {
        attribute: String,
        value: String,
        location: String,
    },

    /// Node appears where its kind is not allowed
    #[error("{location}: <{child}> is not allowed inside <{parent}>")]
    UnexpectedChild {
        parent: String,
        child: String,
        location: String,
    },

    /// A select declared more than one otherwise branch
    #[error("{location}: select already has an <otherwise> at {first}")]
    DuplicateOtherwise { location: String, first: String },

    /// A switch select declared the same case twice
    #[error("{location}: duplicate switch case '{case}'")]
    DuplicateCase { case: String, location: String },

    /// Select names a language nobody registered
    #[error("{location}: unknown select language '{language}'")]
    UnknownLanguage { language: String, location: String },

    /// Test or switch expression failed to compile
    #[error("{location}: invalid expression '{expression}': {reason}")]
    InvalidExpression {
        expression: String,
        reason: String,
        location: String,
    },

    /// Stage type is not registered for the declared role
    #[error("{location}: no {role} stage of type '{type_id}' is registered")]
    UnknownStageType {
        role: String,
        type_id: String,
        location: String,
    },

    /// View anchor names a label no stage declares
    #[error("{location}: view '{view}' references unknown label '{label}'")]
    UnresolvedLabel {
        view: String,
        label: String,
        location: String,
    },

    /// View anchor names a label several stages declare
    #[error("{location}: view '{view}' label '{label}' is declared by {count} stages")]
    AmbiguousLabel {
        view: String,
        label: String,
        count: usize,
        location: String,
    },

    /// Positional anchor found no labeled stage
    #[error("{location}: view '{view}' has no labeled stage for position '{position}'")]
    NoLabeledStage {
        view: String,
        position: String,
        location: String,
    },

    /// View declares both or neither of `from-label` and `from-position`
    #[error("{location}: view '{view}' needs exactly one of from-label or from-position")]
    ViewAnchor { view: String, location: String },

    /// Same view name declared twice in one container
    #[error("{location}: view '{view}' is already declared in this container")]
    DuplicateView { view: String, location: String },

    /// Root is neither a sequence nor a container
    #[error("{location}: configuration root must be a sequence or container, found <{kind}>")]
    InvalidRoot { kind: String, location: String },

    /// Tree has more nodes than a [`folio_core::NodeId`] can address
    #[error("configuration has more nodes than can be indexed")]
    TooManyNodes,
}

impl ConfigError {
    /// Location the error refers to, if any
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        match self {
            Self::UnknownKind { location, .. }
            | Self::MissingAttribute { location, .. }
            | Self::InvalidAttribute { location, .. }
            | Self::UnexpectedChild { location, .. }
            | Self::DuplicateOtherwise { location, .. }
            | Self::DuplicateCase { location, .. }
            | Self::UnknownLanguage { location, .. }
            | Self::InvalidExpression { location, .. }
            | Self::UnknownStageType { location, .. }
            | Self::UnresolvedLabel { location, .. }
            | Self::AmbiguousLabel { location, .. }
            | Self::NoLabeledStage { location, .. }
            | Self::ViewAnchor { location, .. }
            | Self::DuplicateView { location, .. }
            | Self::InvalidRoot { location, .. } => Some(location),
            Self::TooManyNodes => None,
        }
    }
}

/// Result type for tree building
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_location() {
        let err = ConfigError::UnresolvedLabel {
            view: "content".into(),
            label: "body".into(),
            location: "site.json:4:7".into(),
        };
        assert_eq!(
            err.to_string(),
            "site.json:4:7: view 'content' references unknown label 'body'"
        );
        assert_eq!(err.location(), Some("site.json:4:7"));
        assert_eq!(ConfigError::TooManyNodes.location(), None);
    }
}
