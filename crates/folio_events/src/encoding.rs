//! Canonical encoding for stored event batches.
//!
//! Uses postcard for byte-stable encoding.

use serde::{Deserialize, Serialize};

/// Trait for canonical serialization
pub trait CanonicalEncode: Serialize {
    /// Encode to canonical bytes
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized
    fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        postcard::to_allocvec(self).map_err(|e| EncodeError::Serialize {
            reason: e.to_string(),
        })
    }

    /// Get encoded length, 0 if the value cannot be encoded
    fn encoded_len(&self) -> usize {
        self.encode().map(|v| v.len()).unwrap_or(0)
    }
}

/// Trait for canonical deserialization
pub trait CanonicalDecode<'de>: Deserialize<'de> {
    /// Decode from canonical bytes
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a valid encoding
    fn decode(data: &'de [u8]) -> Result<Self, DecodeError>
    where
        Self: Sized,
    {
        postcard::from_bytes(data).map_err(|_| DecodeError::InvalidEncoding)
    }
}

impl<'de, T: Deserialize<'de>> CanonicalDecode<'de> for T {}

/// Encoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// Serializer rejected the value
    #[error("Serialization failed: {reason}")]
    Serialize {
        /// Serializer message
        reason: String,
    },
}

/// Decoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Invalid encoding
    #[error("Invalid canonical encoding")]
    InvalidEncoding,
}
