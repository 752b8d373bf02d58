//! Error types for Agora
//!
//! Every failure aborts the whole call; nothing is retried internally.
//! Each variant maps to exactly one of the six taxonomy categories via
//! [`AgoraError::category`].

use crate::amount::Amount;
use crate::ids::{AgentId, ListingId, TaskId, TokenId};
use crate::task::TaskStatus;
use thiserror::Error;

/// Result type for Agora operations
pub type Result<T> = std::result::Result<T, AgoraError>;

/// Failure taxonomy: every error is traceable to exactly one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authorization,
    State,
    Input,
    Window,
    Custody,
    Configuration,
}

/// Agora error types
#[derive(Debug, Clone, Error)]
pub enum AgoraError {
    // ========================================================================
    // Authorization
    // ========================================================================

    /// Caller is not the principal the transition requires
    #[error("Not authorized: {reason}")]
    NotAuthorized { reason: String },

    // ========================================================================
    // State
    // ========================================================================

    /// Agent lookup miss
    #[error("Agent {agent_id} not found")]
    UnknownAgent { agent_id: AgentId },

    /// Listing lookup miss
    #[error("Listing {listing_id} not found")]
    UnknownListing { listing_id: ListingId },

    /// Task lookup miss
    #[error("Task {task_id} not found")]
    UnknownTask { task_id: TaskId },

    /// Dispute record lookup miss
    #[error("No dispute record for {task_id}")]
    UnknownDispute { task_id: TaskId },

    /// Listing exists but is not accepting tasks
    #[error("Listing {listing_id} is not active")]
    ListingInactive { listing_id: ListingId },

    /// Task is not in the status the transition requires
    #[error("Task {task_id} is {actual}, expected {expected}")]
    InvalidStatus {
        task_id: TaskId,
        expected: &'static str,
        actual: TaskStatus,
    },

    /// Escrow already funded
    #[error("Task {task_id} is already funded")]
    AlreadyFunded { task_id: TaskId },

    /// Escrow not yet funded
    #[error("Task {task_id} is not funded")]
    NotFunded { task_id: TaskId },

    /// Seller bond already funded
    #[error("Seller bond for {task_id} is already funded")]
    BondAlreadyFunded { task_id: TaskId },

    /// Dispute already opened for this task
    #[error("Dispute for {task_id} already opened")]
    DisputeAlreadyOpened { task_id: TaskId },

    /// Dispute already resolved
    #[error("Dispute for {task_id} already resolved")]
    DisputeAlreadyResolved { task_id: TaskId },

    /// No pending dispute-module update to cancel or execute
    #[error("No pending dispute module update")]
    NoPendingUpdate,

    /// A mutating call arrived while a token transfer was in flight
    #[error("Re-entrant call rejected")]
    ReentrantCall,

    // ========================================================================
    // Input
    // ========================================================================

    /// Units outside the listing's `[min_units, max_units]` range
    #[error("Units {units} outside range [{min}, {max}]")]
    UnitsOutOfRange { units: u64, min: u64, max: u64 },

    /// Supplied amount differs from the amount the transition requires
    #[error("Amount mismatch: expected {expected}, got {actual}")]
    AmountMismatch { expected: Amount, actual: Amount },

    /// URI exceeds the persisted-length cap
    #[error("URI of {len} bytes exceeds maximum of {max}")]
    UriTooLong { len: usize, max: usize },

    /// Bond funding attempted on a listing with no bond requirement
    #[error("Task {task_id} requires no seller bond")]
    BondNotRequired { task_id: TaskId },

    /// Funding attempted before the required bond was posted
    #[error("Seller bond for {task_id} has not been funded")]
    BondNotFunded { task_id: TaskId },

    /// Listing demands an explicit quote; implicit acceptance rejected
    #[error("Listing {listing_id} requires an explicit quote")]
    QuoteRequired { listing_id: ListingId },

    /// Invalid input
    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    // ========================================================================
    // Window
    // ========================================================================

    /// Quote expired before funding
    #[error("Quote for {task_id} expired at {expiry} (now {now})")]
    QuoteExpired {
        task_id: TaskId,
        expiry: u64,
        now: u64,
    },

    /// Delivery window has elapsed; submission no longer possible
    #[error("Delivery window for {task_id} closed at {deadline}")]
    DeliveryWindowClosed { task_id: TaskId, deadline: u64 },

    /// Delivery window still open; non-delivery cancellation not yet possible
    #[error("Delivery window for {task_id} is open until {deadline}")]
    DeliveryWindowStillOpen { task_id: TaskId, deadline: u64 },

    /// Challenge window has elapsed; dispute no longer possible
    #[error("Challenge window for {task_id} closed at {deadline}")]
    ChallengeWindowClosed { task_id: TaskId, deadline: u64 },

    /// Challenge window still open; timeout settlement not yet possible
    #[error("Challenge window for {task_id} is open until {deadline}")]
    ChallengeWindowStillOpen { task_id: TaskId, deadline: u64 },

    /// Post-dispute window still open; permissionless settlement not yet possible
    #[error("Post-dispute window for {task_id} is open until {deadline}")]
    PostDisputeWindowStillOpen { task_id: TaskId, deadline: u64 },

    /// Listing policy disables post-dispute timeout settlement
    #[error("Post-dispute timeout settlement is disabled for {task_id}")]
    PostDisputeTimeoutDisabled { task_id: TaskId },

    /// Timelocked update not yet executable
    #[error("Update not ready: executable at {activation_at} (now {now})")]
    UpdateNotReady { activation_at: u64, now: u64 },

    // ========================================================================
    // Custody
    // ========================================================================

    /// Token collaborator refused the transfer
    #[error("Token transfer failed: {reason}")]
    TransferFailed { reason: String },

    /// Deposit delta differed from the requested amount (fee-on-transfer
    /// or rebasing token)
    #[error("Deposit mismatch: requested {requested}, received {received}")]
    DepositMismatch { requested: Amount, received: Amount },

    /// Insufficient token balance
    #[error("Insufficient balance of {token}: requested {requested}, available {available}")]
    InsufficientBalance {
        token: TokenId,
        requested: Amount,
        available: Amount,
    },

    /// Insufficient token allowance
    #[error("Insufficient allowance of {token}: requested {requested}, allowed {allowed}")]
    InsufficientAllowance {
        token: TokenId,
        requested: Amount,
        allowed: Amount,
    },

    /// A payout would exceed the pool it draws from
    #[error("Payout {requested} exceeds source pool {pool}")]
    PayoutExceedsPool { requested: Amount, pool: Amount },

    /// Amount overflow during arithmetic
    #[error("Amount overflow during arithmetic operation")]
    AmountOverflow,

    /// Amount underflow during arithmetic
    #[error("Amount underflow during arithmetic operation")]
    AmountUnderflow,

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Listing pricing rejected at creation
    #[error("Invalid pricing: {reason}")]
    InvalidPricing { reason: String },

    /// Listing policy rejected at creation
    #[error("Invalid policy: {reason}")]
    InvalidPolicy { reason: String },

    /// No dispute module installed
    #[error("Dispute module not set")]
    DisputeModuleNotSet,

    /// Scheduled module equals the installed one
    #[error("Pending dispute module equals the current module")]
    UnchangedModule,
}

impl AgoraError {
    /// Create a not-authorized error
    pub fn not_authorized(reason: impl Into<String>) -> Self {
        Self::NotAuthorized {
            reason: reason.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// The taxonomy category this error belongs to
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotAuthorized { .. } => ErrorCategory::Authorization,

            Self::UnknownAgent { .. }
            | Self::UnknownListing { .. }
            | Self::UnknownTask { .. }
            | Self::UnknownDispute { .. }
            | Self::ListingInactive { .. }
            | Self::InvalidStatus { .. }
            | Self::AlreadyFunded { .. }
            | Self::NotFunded { .. }
            | Self::BondAlreadyFunded { .. }
            | Self::DisputeAlreadyOpened { .. }
            | Self::DisputeAlreadyResolved { .. }
            | Self::NoPendingUpdate
            | Self::ReentrantCall => ErrorCategory::State,

            Self::UnitsOutOfRange { .. }
            | Self::AmountMismatch { .. }
            | Self::UriTooLong { .. }
            | Self::BondNotRequired { .. }
            | Self::BondNotFunded { .. }
            | Self::QuoteRequired { .. }
            | Self::InvalidInput { .. } => ErrorCategory::Input,

            Self::QuoteExpired { .. }
            | Self::DeliveryWindowClosed { .. }
            | Self::DeliveryWindowStillOpen { .. }
            | Self::ChallengeWindowClosed { .. }
            | Self::ChallengeWindowStillOpen { .. }
            | Self::PostDisputeWindowStillOpen { .. }
            | Self::PostDisputeTimeoutDisabled { .. }
            | Self::UpdateNotReady { .. } => ErrorCategory::Window,

            Self::TransferFailed { .. }
            | Self::DepositMismatch { .. }
            | Self::InsufficientBalance { .. }
            | Self::InsufficientAllowance { .. }
            | Self::PayoutExceedsPool { .. }
            | Self::AmountOverflow
            | Self::AmountUnderflow => ErrorCategory::Custody,

            Self::InvalidPricing { .. }
            | Self::InvalidPolicy { .. }
            | Self::DisputeModuleNotSet
            | Self::UnchangedModule => ErrorCategory::Configuration,
        }
    }

    /// Get an error code for logs and API surfaces
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotAuthorized { .. } => "NOT_AUTHORIZED",
            Self::UnknownAgent { .. } => "UNKNOWN_AGENT",
            Self::UnknownListing { .. } => "UNKNOWN_LISTING",
            Self::UnknownTask { .. } => "UNKNOWN_TASK",
            Self::UnknownDispute { .. } => "UNKNOWN_DISPUTE",
            Self::ListingInactive { .. } => "LISTING_INACTIVE",
            Self::InvalidStatus { .. } => "INVALID_STATUS",
            Self::AlreadyFunded { .. } => "ALREADY_FUNDED",
            Self::NotFunded { .. } => "NOT_FUNDED",
            Self::BondAlreadyFunded { .. } => "BOND_ALREADY_FUNDED",
            Self::DisputeAlreadyOpened { .. } => "DISPUTE_ALREADY_OPENED",
            Self::DisputeAlreadyResolved { .. } => "DISPUTE_ALREADY_RESOLVED",
            Self::NoPendingUpdate => "NO_PENDING_UPDATE",
            Self::ReentrantCall => "REENTRANT_CALL",
            Self::UnitsOutOfRange { .. } => "UNITS_OUT_OF_RANGE",
            Self::AmountMismatch { .. } => "AMOUNT_MISMATCH",
            Self::UriTooLong { .. } => "URI_TOO_LONG",
            Self::BondNotRequired { .. } => "BOND_NOT_REQUIRED",
            Self::BondNotFunded { .. } => "BOND_NOT_FUNDED",
            Self::QuoteRequired { .. } => "QUOTE_REQUIRED",
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::QuoteExpired { .. } => "QUOTE_EXPIRED",
            Self::DeliveryWindowClosed { .. } => "DELIVERY_WINDOW_CLOSED",
            Self::DeliveryWindowStillOpen { .. } => "DELIVERY_WINDOW_STILL_OPEN",
            Self::ChallengeWindowClosed { .. } => "CHALLENGE_WINDOW_CLOSED",
            Self::ChallengeWindowStillOpen { .. } => "CHALLENGE_WINDOW_STILL_OPEN",
            Self::PostDisputeWindowStillOpen { .. } => "POST_DISPUTE_WINDOW_STILL_OPEN",
            Self::PostDisputeTimeoutDisabled { .. } => "POST_DISPUTE_TIMEOUT_DISABLED",
            Self::UpdateNotReady { .. } => "UPDATE_NOT_READY",
            Self::TransferFailed { .. } => "TRANSFER_FAILED",
            Self::DepositMismatch { .. } => "DEPOSIT_MISMATCH",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::InsufficientAllowance { .. } => "INSUFFICIENT_ALLOWANCE",
            Self::PayoutExceedsPool { .. } => "PAYOUT_EXCEEDS_POOL",
            Self::AmountOverflow => "AMOUNT_OVERFLOW",
            Self::AmountUnderflow => "AMOUNT_UNDERFLOW",
            Self::InvalidPricing { .. } => "INVALID_PRICING",
            Self::InvalidPolicy { .. } => "INVALID_POLICY",
            Self::DisputeModuleNotSet => "DISPUTE_MODULE_NOT_SET",
            Self::UnchangedModule => "UNCHANGED_MODULE",
        }
    }
}
