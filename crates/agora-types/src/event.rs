//! Event types
//!
//! Events are the source of truth for off-chain consumers (indexer, UI). The
//! market and the dispute module each keep an append-only log; a record's
//! sequence number is its position in the host's total order for that log.

use crate::amount::Amount;
use crate::dispute::DisputeOutcome;
use crate::ids::{AccountId, AgentId, ListingId, TaskId};
use crate::task::SettlementPath;
use crate::uri::Uri;
use serde::{Deserialize, Serialize};

/// An entry in an append-only event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord<E> {
    /// Position in the log, starting at 0
    pub seq: u64,
    /// Host time when the event was recorded, unix seconds
    pub at: u64,
    pub event: E,
}

/// Events emitted by the task market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketEvent {
    TaskPosted {
        task_id: TaskId,
        listing_id: ListingId,
        agent_id: AgentId,
        buyer: AccountId,
        task_uri: Uri,
        proposed_units: u64,
    },
    QuoteProposed {
        task_id: TaskId,
        quoted_units: u64,
        quoted_total_price: Amount,
        quote_expiry: u64,
    },
    /// Implicit-quote variant of quoting
    TaskAccepted {
        task_id: TaskId,
        quoted_units: u64,
        quoted_total_price: Amount,
    },
    SellerBondFunded {
        task_id: TaskId,
        bond_funder: AccountId,
        amount: Amount,
    },
    TaskFunded {
        task_id: TaskId,
        amount: Amount,
    },
    QuoteAccepted {
        task_id: TaskId,
        seller: AccountId,
    },
    DeliverableSubmitted {
        task_id: TaskId,
        artifact_uri: Uri,
        artifact_hash: [u8; 32],
    },
    SubmissionAccepted {
        task_id: TaskId,
    },
    /// Emitted on every dispute opening, including the delegated path
    SubmissionDisputed {
        task_id: TaskId,
        dispute_uri: Uri,
    },
    /// Legacy settlement shape, kept for existing consumers
    TaskSettled {
        task_id: TaskId,
        buyer_payout: Amount,
        seller_bond_refund: Amount,
    },
    TaskSettledV2 {
        task_id: TaskId,
        buyer: AccountId,
        seller: Option<AccountId>,
        bond_funder: Option<AccountId>,
        buyer_escrow_payout: Amount,
        buyer_bond_payout: Amount,
        seller_escrow_payout: Amount,
        seller_bond_refund: Amount,
        path: SettlementPath,
    },
    PostDisputeTimeoutSettled {
        task_id: TaskId,
        deadline: u64,
        outcome: DisputeOutcome,
    },
    TaskCancelled {
        task_id: TaskId,
    },
    TaskCancelledForNonDelivery {
        task_id: TaskId,
        escrow_refund: Amount,
        seller_bond_penalty: Amount,
    },
    SellerCancelledQuote {
        task_id: TaskId,
        bond_refund: Amount,
    },
    DisputeModuleUpdateScheduled {
        previous: Option<AccountId>,
        pending: AccountId,
        execute_after: u64,
    },
    DisputeModuleUpdateCancelled {
        pending: AccountId,
    },
    DisputeModuleUpdated {
        previous: Option<AccountId>,
        new_module: AccountId,
    },
}

impl MarketEvent {
    /// The task this event concerns, if any
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Self::TaskPosted { task_id, .. }
            | Self::QuoteProposed { task_id, .. }
            | Self::TaskAccepted { task_id, .. }
            | Self::SellerBondFunded { task_id, .. }
            | Self::TaskFunded { task_id, .. }
            | Self::QuoteAccepted { task_id, .. }
            | Self::DeliverableSubmitted { task_id, .. }
            | Self::SubmissionAccepted { task_id }
            | Self::SubmissionDisputed { task_id, .. }
            | Self::TaskSettled { task_id, .. }
            | Self::TaskSettledV2 { task_id, .. }
            | Self::PostDisputeTimeoutSettled { task_id, .. }
            | Self::TaskCancelled { task_id }
            | Self::TaskCancelledForNonDelivery { task_id, .. }
            | Self::SellerCancelledQuote { task_id, .. } => Some(*task_id),
            Self::DisputeModuleUpdateScheduled { .. }
            | Self::DisputeModuleUpdateCancelled { .. }
            | Self::DisputeModuleUpdated { .. } => None,
        }
    }
}

/// Events emitted by the dispute module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisputeEvent {
    DisputeOpened {
        task_id: TaskId,
        buyer: AccountId,
        dispute_uri: Uri,
    },
    DisputeResolved {
        task_id: TaskId,
        resolver: AccountId,
        outcome: DisputeOutcome,
        resolution_uri: Uri,
    },
}
