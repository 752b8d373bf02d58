//! Listing pricing and settlement policy
//!
//! A listing binds an agent to an immutable pricing and policy pair. Only the
//! listing URI and the active flag are mutable after creation; the agent
//! binding never changes.

use crate::amount::Amount;
use crate::error::{AgoraError, Result};
use crate::ids::{AgentId, ListingId, TokenId};
use crate::uri::{UnitType, Uri};
use serde::{Deserialize, Serialize};

/// How work is priced: a base price plus a per-unit price over a bounded
/// unit range, in a declared payment token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    /// Token every amount of this listing is denominated in
    pub payment_token: TokenId,
    /// Flat component of the price
    pub base_price: Amount,
    /// Opaque unit-of-work label
    pub unit_type: UnitType,
    /// Price per unit
    pub unit_price: Amount,
    /// Minimum units per task (at least 1)
    pub min_units: u64,
    /// Maximum units per task
    pub max_units: u64,
    /// Whether the controller must quote explicitly before funding
    pub quote_required: bool,
}

impl Pricing {
    /// Validate creation-time constraints
    pub fn validate(&self) -> Result<()> {
        if self.payment_token.is_empty() {
            return Err(AgoraError::InvalidPricing {
                reason: "payment token must not be empty".to_string(),
            });
        }
        if self.min_units < 1 {
            return Err(AgoraError::InvalidPricing {
                reason: "min_units must be at least 1".to_string(),
            });
        }
        if self.max_units < self.min_units {
            return Err(AgoraError::InvalidPricing {
                reason: "max_units must be at least min_units".to_string(),
            });
        }
        Ok(())
    }

    /// Whether `units` falls inside `[min_units, max_units]`
    pub fn units_in_range(&self, units: u64) -> bool {
        units >= self.min_units && units <= self.max_units
    }

    /// `base_price + units · unit_price`, checked
    pub fn total_for(&self, units: u64) -> Result<Amount> {
        let per_units = self
            .unit_price
            .0
            .checked_mul(units as u128)
            .ok_or(AgoraError::AmountOverflow)?;
        self.base_price.checked_add(Amount(per_units))
    }
}

/// Settlement policy: the time windows and bond requirement governing every
/// task posted against the listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Seconds after submission during which the buyer may dispute
    pub challenge_window_secs: u64,
    /// Seconds after a dispute opens after which, with no resolution,
    /// anyone may settle seller-wins; 0 disables
    pub post_dispute_window_secs: u64,
    /// Seconds after activation within which the seller must submit
    pub delivery_window_secs: u64,
    /// Seller bond as basis points of the quoted total
    pub seller_bond_bps: u16,
}

impl Policy {
    /// Validate creation-time constraints
    pub fn validate(&self) -> Result<()> {
        if self.challenge_window_secs == 0 {
            return Err(AgoraError::InvalidPolicy {
                reason: "challenge window must be positive".to_string(),
            });
        }
        if self.delivery_window_secs == 0 {
            return Err(AgoraError::InvalidPolicy {
                reason: "delivery window must be positive".to_string(),
            });
        }
        if self.seller_bond_bps > 10_000 {
            return Err(AgoraError::InvalidPolicy {
                reason: "seller bond exceeds 10000 bps".to_string(),
            });
        }
        Ok(())
    }

    /// Bond the seller side must post for a quoted total: `⌊total · bps / 10000⌋`
    pub fn required_bond(&self, quoted_total: Amount) -> Result<Amount> {
        quoted_total.bps(self.seller_bond_bps)
    }
}

/// A per-agent offering with fixed pricing and policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    /// Bound agent; never changes
    pub agent_id: AgentId,
    /// Opaque metadata URI; mutable
    pub listing_uri: Uri,
    /// Immutable after creation
    pub pricing: Pricing,
    /// Immutable after creation
    pub policy: Policy,
    /// Whether the listing accepts new tasks and quotes; mutable
    pub active: bool,
}
