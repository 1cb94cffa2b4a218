//! Validity tokens.
//!
//! A validity describes when cached output stops being usable. It can be
//! asked two questions: is it still valid on its own ([`Validity::is_valid`]),
//! and is it still valid compared to a freshly computed token
//! ([`Validity::compare`]). Both answer in three states, because some kinds
//! cannot decide alone.

use folio_core::Hash;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Answer of a validity check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidityState {
    /// Cached output can be used
    Valid,
    /// Cached output is stale
    Invalid,
    /// Cannot tell without a fresh token
    Unknown,
}

impl ValidityState {
    /// Combine two answers: any `Invalid` wins, then any `Unknown`
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::Invalid, _) | (_, Self::Invalid) => Self::Invalid,
            (Self::Unknown, _) | (_, Self::Unknown) => Self::Unknown,
            (Self::Valid, Self::Valid) => Self::Valid,
        }
    }

    fn from_bool(valid: bool) -> Self {
        if valid { Self::Valid } else { Self::Invalid }
    }
}

/// Cache validity token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Validity {
    /// Never expires
    Always,
    /// Always stale
    Never,
    /// Source modification time; equal timestamps are valid
    Timestamp(u64),
    /// Valid until a wall-clock deadline
    Expires {
        /// Milliseconds since the Unix epoch
        deadline_ms: u64,
    },
    /// Content digest; equal digests are valid
    Digest(Hash),
    /// Element-wise combination
    Aggregated(Vec<Validity>),
}

impl Validity {
    /// Validity expiring `ttl_ms` from now
    #[must_use]
    pub fn expires_in(ttl_ms: u64) -> Self {
        Self::Expires {
            deadline_ms: now_ms().saturating_add(ttl_ms),
        }
    }

    /// Self-check against the current time
    #[must_use]
    pub fn is_valid(&self) -> ValidityState {
        self.is_valid_at(now_ms())
    }

    /// Self-check as of `now_ms`
    #[must_use]
    pub fn is_valid_at(&self, now_ms: u64) -> ValidityState {
        match self {
            Self::Always => ValidityState::Valid,
            Self::Never => ValidityState::Invalid,
            Self::Expires { deadline_ms } => ValidityState::from_bool(now_ms < *deadline_ms),
            Self::Timestamp(_) | Self::Digest(_) => ValidityState::Unknown,
            Self::Aggregated(parts) => parts
                .iter()
                .fold(ValidityState::Valid, |acc, part| acc.and(part.is_valid_at(now_ms))),
        }
    }

    /// Compare this stored token with a fresh one
    #[must_use]
    pub fn compare(&self, fresh: &Validity) -> ValidityState {
        self.compare_at(fresh, now_ms())
    }

    /// Compare as of `now_ms`
    ///
    /// Kinds that can decide alone answer with their self-check. Tokens of
    /// different kinds answer `Unknown`.
    #[must_use]
    pub fn compare_at(&self, fresh: &Validity, now_ms: u64) -> ValidityState {
        match (self, fresh) {
            (Self::Never, _) | (_, Self::Never) => ValidityState::Invalid,
            (Self::Always, Self::Always) => ValidityState::Valid,
            (Self::Expires { .. }, Self::Expires { .. }) => self.is_valid_at(now_ms),
            (Self::Timestamp(stored), Self::Timestamp(current)) => ValidityState::from_bool(stored == current),
            (Self::Digest(stored), Self::Digest(current)) => ValidityState::from_bool(stored == current),
            (Self::Aggregated(stored), Self::Aggregated(current)) => {
                if stored.len() != current.len() {
                    return ValidityState::Invalid;
                }
                stored
                    .iter()
                    .zip(current)
                    .fold(ValidityState::Valid, |acc, (s, c)| {
                        let part = match s.is_valid_at(now_ms) {
                            ValidityState::Unknown => s.compare_at(c, now_ms),
                            decided => decided,
                        };
                        acc.and(part)
                    })
            }
            _ => ValidityState::Unknown,
        }
    }
}

/// Milliseconds since the Unix epoch
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
