//! Dispute records and outcomes

use crate::ids::{AccountId, TaskId};
use crate::task::SettlementPath;
use crate::uri::Uri;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Adjudicator outcome for a disputed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisputeOutcome {
    /// Escrow to seller, bond back to its funder
    SellerWins,
    /// Escrow and bond to the buyer
    BuyerWins,
    /// Escrow split evenly, residue to seller; bond back to its funder
    Split,
    /// Escrow back to the buyer; bond back to its funder
    Cancel,
}

impl DisputeOutcome {
    /// The settlement path this outcome maps to
    pub fn settlement_path(&self) -> SettlementPath {
        match self {
            Self::SellerWins => SettlementPath::DisputeSellerWins,
            Self::BuyerWins => SettlementPath::DisputeBuyerWins,
            Self::Split => SettlementPath::DisputeSplit,
            Self::Cancel => SettlementPath::DisputeCancel,
        }
    }
}

impl fmt::Display for DisputeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SellerWins => "seller_wins",
            Self::BuyerWins => "buyer_wins",
            Self::Split => "split",
            Self::Cancel => "cancel",
        };
        write!(f, "{}", s)
    }
}

/// One dispute record per task id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeRecord {
    pub task_id: TaskId,
    /// Buyer of the disputed task at opening time
    pub buyer: AccountId,
    pub opened: bool,
    pub resolved: bool,
    pub dispute_uri: Option<Uri>,
    pub resolution_uri: Option<Uri>,
    /// Defaults to [`DisputeOutcome::SellerWins`] until resolved
    pub outcome: DisputeOutcome,
}

impl DisputeRecord {
    /// A freshly opened record with the default outcome
    pub fn opened(task_id: TaskId, buyer: AccountId, dispute_uri: Option<Uri>) -> Self {
        Self {
            task_id,
            buyer,
            opened: true,
            resolved: false,
            dispute_uri,
            resolution_uri: None,
            outcome: DisputeOutcome::SellerWins,
        }
    }
}
