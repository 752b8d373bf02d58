//! Identity types for Agora
//!
//! Addresses (`AccountId`) are strongly typed wrappers around UUIDs to prevent
//! accidental mixing with entity identifiers. Agents, listings and tasks use
//! monotonically increasing non-zero integers assigned by their registries.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// An address: any principal that can hold tokens, own agents, post tasks,
/// administer the market or resolve disputes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub Uuid);

impl AccountId {
    /// Create a new random account id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse from a string (with or without the `acct_` prefix)
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        let s = s.strip_prefix("acct_").unwrap_or(s);
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "acct_{}", self.0)
    }
}

/// Macro to generate the monotone integer id types assigned by registries.
macro_rules! define_entity_id {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl $name {
            /// Get the raw integer value
            pub fn get(&self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(v: u64) -> Self {
                Self(v)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

define_entity_id!(AgentId, "agent", "Identifier of a registered agent, starting at 1");
define_entity_id!(ListingId, "listing", "Identifier of a listing, starting at 1");
define_entity_id!(TaskId, "task", "Identifier of a task, starting at 1");

/// Identifier of a fungible payment token.
///
/// Tokens are external collaborators; the id is an opaque symbol-like string
/// chosen when the token is created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenId(pub String);

impl TokenId {
    /// Create a new random token id
    pub fn new() -> Self {
        Self(format!("token_{}", Uuid::new_v4()))
    }

    /// Create a token id from a fixed symbol (e.g. `"T"` in tests)
    pub fn from_symbol(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    /// An empty token id is never a valid payment token
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for TokenId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
