//! Cache keys.

use folio_core::Hash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, comparable cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap a key string
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Compose a chain key from ordered `(stage type, stage key)` parts
    ///
    /// Parts are length-prefixed so that no two part lists compose to the
    /// same key.
    #[must_use]
    pub fn compose<'a, I>(parts: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a CacheKey)>,
    {
        let mut out = String::new();
        for (type_id, key) in parts {
            if !out.is_empty() {
                out.push('|');
            }
            out.push_str(&format!("{}:{}:{}:{}", type_id.len(), type_id, key.0.len(), key.0));
        }
        Self(out)
    }

    /// Key string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// BLAKE3 digest of the key, used for file naming
    #[must_use]
    pub fn digest(&self) -> Hash {
        Hash::compute(self.0.as_bytes())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_is_ordered() {
        let a = CacheKey::new("a");
        let b = CacheKey::new("b");
        let ab = CacheKey::compose([("text", &a), ("wrap", &b)]);
        let ba = CacheKey::compose([("wrap", &b), ("text", &a)]);
        assert_ne!(ab, ba);
        assert_eq!(ab, CacheKey::compose([("text", &a), ("wrap", &b)]));
    }

    #[test]
    fn test_compose_is_unambiguous() {
        let one = CacheKey::compose([("t", &CacheKey::new("x|y"))]);
        let two = CacheKey::compose([("t", &CacheKey::new("x")), ("y", &CacheKey::new(""))]);
        assert_ne!(one, two);
    }

    #[test]
    fn test_digest_stable() {
        let key = CacheKey::new("k1");
        assert_eq!(key.digest(), CacheKey::from("k1").digest());
        assert_ne!(key.digest(), CacheKey::new("k2").digest());
        assert_eq!(key.to_string(), "k1");
    }
}
