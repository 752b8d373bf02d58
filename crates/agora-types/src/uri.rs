//! Length-capped opaque URIs and unit-type labels

use crate::error::{AgoraError, Result};
use crate::MAX_URI_LENGTH;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque URI, validated to be at most [`MAX_URI_LENGTH`] bytes.
///
/// The marketplace never dereferences URIs; they are carried for off-chain
/// consumers (metadata documents, task descriptions, artifacts, evidence).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Uri(String);

impl Uri {
    /// Validate and wrap a URI string
    pub fn parse(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if s.len() > MAX_URI_LENGTH {
            return Err(AgoraError::UriTooLong {
                len: s.len(),
                max: MAX_URI_LENGTH,
            });
        }
        Ok(Self(s))
    }

    /// Borrow the underlying string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Byte length of the URI
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the URI is the empty string
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<&str> for Uri {
    type Error = AgoraError;

    fn try_from(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque 32-byte unit-of-work label chosen by a listing creator
/// (e.g. "token", "request", "hour").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct UnitType(pub [u8; 32]);

impl UnitType {
    /// Build a label from a short string, zero-padded to 32 bytes
    pub fn from_label(label: &str) -> Result<Self> {
        let bytes = label.as_bytes();
        if bytes.len() > 32 {
            return Err(AgoraError::invalid_input(
                "unit_type",
                "label exceeds 32 bytes",
            ));
        }
        let mut out = [0u8; 32];
        out[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(out))
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(32);
        write!(f, "{}", String::from_utf8_lossy(&self.0[..end]))
    }
}
