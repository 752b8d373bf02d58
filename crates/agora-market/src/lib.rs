//! Agora Market - The task escrow state machine
//!
//! The market is the custody and settlement core: it owns the seven-state
//! task lifecycle, pulls escrow and bond deposits into a single shared token
//! pool, and pushes value back out on terminal transitions according to the
//! settlement table. It reads listings for pricing/policy and agent identity
//! for authorization snapshots; the dispute module is the only external
//! principal allowed to drive `mark_disputed` / `resolve_dispute`.
//!
//! # Custody Invariants
//!
//! 1. Funding is all-or-nothing; deposits use pull-and-verify-delta, so
//!    fee-on-transfer tokens fail deterministically at deposit time
//! 2. State is written before any outbound transfer
//! 3. A mutating call arriving while a transfer is in flight is rejected
//! 4. Over a task's full lifecycle, tokens in equal tokens out

pub mod market;
pub mod settlement;

mod admin;
mod custody;

pub use admin::DisputeGateway;
pub use market::TaskMarket;
pub use settlement::{settlement_payouts, SettlementSplit};

use agora_types::DISPUTE_MODULE_UPDATE_DELAY;

/// Market configuration.
#[derive(Debug, Clone, Copy)]
pub struct MarketConfig {
    /// Seconds between scheduling and executing a dispute-module swap
    pub dispute_module_update_delay: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            dispute_module_update_delay: DISPUTE_MODULE_UPDATE_DELAY,
        }
    }
}
