//! The task lifecycle
//!
//! A task is a buyer's purchase of work against a listing. It traverses a
//! seven-state machine; SETTLED and CANCELLED are terminal.

use crate::amount::Amount;
use crate::ids::{AccountId, AgentId, ListingId, TaskId, TokenId};
use crate::uri::Uri;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Posted, awaiting a quote
    Open,
    /// Quoted, awaiting bond/funding/acceptance
    Quoted,
    /// Quote accepted; seller snapshotted; delivery window running
    Active,
    /// Deliverable submitted; challenge window running
    Submitted,
    /// Buyer disputed the submission
    Disputed,
    /// Settled through one of the settlement paths
    Settled,
    /// Cancelled before activation or for non-delivery
    Cancelled,
}

impl TaskStatus {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Settled | Self::Cancelled)
    }

    /// Validates whether a status transition is allowed.
    ///
    /// Valid transitions:
    /// - Open → Quoted (explicit or implicit quote)
    /// - Open → Cancelled (buyer cancels pre-quote)
    /// - Quoted → Active (buyer accepts a fully funded quote)
    /// - Quoted → Cancelled (buyer cancels, or seller cancels an unfunded quote)
    /// - Active → Submitted (seller delivers inside the window)
    /// - Active → Cancelled (buyer cancels for non-delivery)
    /// - Submitted → Settled (acceptance or silent timeout)
    /// - Submitted → Disputed (buyer disputes inside the window)
    /// - Disputed → Settled (resolution or post-dispute timeout)
    ///
    /// Terminal states cannot transition anywhere.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Open, Quoted)
                | (Open, Cancelled)
                | (Quoted, Active)
                | (Quoted, Cancelled)
                | (Active, Submitted)
                | (Active, Cancelled)
                | (Submitted, Settled)
                | (Submitted, Disputed)
                | (Disputed, Settled)
        )
    }

    /// Status label used in errors and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Quoted => "quoted",
            Self::Active => "active",
            Self::Submitted => "submitted",
            Self::Disputed => "disputed",
            Self::Settled => "settled",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which of the terminal transitions produced a SETTLED state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementPath {
    /// Buyer accepted the submission
    Accepted,
    /// Buyer stayed silent through the challenge window
    Timeout,
    /// Dispute opened but never resolved; window elapsed
    PostDisputeTimeout,
    DisputeSellerWins,
    DisputeBuyerWins,
    DisputeSplit,
    DisputeCancel,
}

impl fmt::Display for SettlementPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Accepted => "accepted",
            Self::Timeout => "timeout",
            Self::PostDisputeTimeout => "post_dispute_timeout",
            Self::DisputeSellerWins => "dispute_seller_wins",
            Self::DisputeBuyerWins => "dispute_buyer_wins",
            Self::DisputeSplit => "dispute_split",
            Self::DisputeCancel => "dispute_cancel",
        };
        write!(f, "{}", s)
    }
}

/// A task: one buyer's purchase of work against a listing.
///
/// Fields snapshotted at posting (`listing_id`, `agent_id`, `buyer`,
/// `payment_token`) and at activation (`seller`) never change afterwards.
/// `bond_funder` is whoever actually paid the bond; all bond refunds route
/// there regardless of current agent ownership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub listing_id: ListingId,
    /// Agent bound to the listing at posting time
    pub agent_id: AgentId,
    pub buyer: AccountId,
    /// Payment token snapshotted from the listing pricing
    pub payment_token: TokenId,
    pub task_uri: Uri,
    pub proposed_units: u64,
    /// Units the quote covers; 0 until quoted
    pub quoted_units: u64,
    /// Total price of the quote; zero-priced quotes are valid
    pub quoted_total_price: Amount,
    /// Unix seconds after which funding is blocked; 0 = no expiry
    pub quote_expiry: u64,
    /// Escrowed amount; all-or-nothing
    pub funded_amount: Amount,
    /// Whether the buyer funded (distinguishes funded zero-price tasks)
    pub funded: bool,
    /// Bond held in custody
    pub seller_bond: Amount,
    /// Address that paid the bond; sole refund recipient
    pub bond_funder: Option<AccountId>,
    /// Agent owner at the instant the quote was accepted; sole principal for
    /// post-activation seller actions and payouts
    pub seller: Option<AccountId>,
    pub artifact_uri: Option<Uri>,
    pub artifact_hash: Option<[u8; 32]>,
    pub created_at: u64,
    pub activated_at: Option<u64>,
    pub submitted_at: Option<u64>,
    pub disputed_at: Option<u64>,
    pub status: TaskStatus,
    /// Idempotence flag; set exactly when entering SETTLED or when
    /// CANCELLED for non-delivery
    pub settled: bool,
}

impl Task {
    /// Value currently in custody for this task
    pub fn custody_total(&self) -> Amount {
        Amount(self.funded_amount.0.saturating_add(self.seller_bond.0))
    }
}
