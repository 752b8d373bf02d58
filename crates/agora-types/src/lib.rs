//! Agora Types - Canonical domain types for the task-escrow marketplace
//!
//! This crate contains all foundational types for Agora with zero dependencies
//! on other agora crates. It defines the complete type system for:
//!
//! - Identity types (`AccountId`, `AgentId`, `ListingId`, `TaskId`, `TokenId`)
//! - Integer amounts in token base units with checked arithmetic
//! - Listing pricing and settlement policy
//! - The task lifecycle state machine and settlement paths
//! - Dispute records and outcomes
//! - Market and dispute event types
//! - The error taxonomy shared by every component
//!
//! # Core Invariants
//!
//! 1. Funding is all-or-nothing: `funded_amount ∈ {0, quoted_total_price}`
//! 2. The seller snapshot, once taken, never changes for a task
//! 3. `settled` only ever moves false → true
//! 4. Every persisted URI is at most [`MAX_URI_LENGTH`] bytes

pub mod amount;
pub mod clock;
pub mod dispute;
pub mod error;
pub mod event;
pub mod ids;
pub mod listing;
pub mod task;
pub mod uri;

pub use amount::*;
pub use clock::*;
pub use dispute::*;
pub use error::*;
pub use event::*;
pub use ids::*;
pub use listing::*;
pub use task::*;
pub use uri::*;

/// Maximum byte length of any persisted URI.
pub const MAX_URI_LENGTH: usize = 2048;

/// Denominator for basis-point math (one hundredth of a percent).
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Default timelock, in seconds, between scheduling and executing a
/// dispute-module replacement.
pub const DISPUTE_MODULE_UPDATE_DELAY: u64 = 86_400;
