//! Request and stage parameters.
//!
//! Stage parameters may reference request parameters with `{name}`
//! placeholders; they are resolved once per execution.

use crate::{CoreError, CoreResult, Hash};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z0-9_.:\-]+)\}").expect("placeholder pattern is valid"));

/// Ordered name/value parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(IndexMap<String, String>);

impl Parameters {
    /// Create an empty parameter set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a parameter
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Look up a parameter
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Whether a parameter is present
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Iterate in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of parameters
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no parameters
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Substitute `{name}` placeholders in `template` with values from `self`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnresolvedParameter`] for the first placeholder
    /// that has no value.
    pub fn resolve(&self, template: &str) -> CoreResult<String> {
        let mut missing = None;
        let resolved = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
            let name = &caps[1];
            match self.get(name) {
                Some(value) => value.to_string(),
                None => {
                    missing.get_or_insert_with(|| name.to_string());
                    String::new()
                }
            }
        });
        match missing {
            Some(name) => Err(CoreError::UnresolvedParameter { name }),
            None => Ok(resolved.into_owned()),
        }
    }

    /// Resolve every value of `self` against `request`.
    ///
    /// # Errors
    ///
    /// Returns the first unresolved placeholder.
    pub fn resolve_all(&self, request: &Parameters) -> CoreResult<Parameters> {
        self.0
            .iter()
            .map(|(k, v)| Ok((k.clone(), request.resolve(v)?)))
            .collect::<CoreResult<IndexMap<_, _>>>()
            .map(Self)
    }

    /// Copy of `self` ordered by name
    #[must_use]
    pub fn sorted(&self) -> Self {
        let mut map = self.0.clone();
        map.sort_keys();
        Self(map)
    }

    /// Order-independent digest of the parameters
    #[must_use]
    pub fn digest(&self) -> Hash {
        let mut pairs: Vec<(&str, &str)> = self.iter().collect();
        pairs.sort_unstable();
        Hash::compute_parts(pairs.into_iter().flat_map(|(k, v)| [k, v]))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Parameters {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
