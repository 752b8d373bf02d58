//! The task market state machine
//!
//! Every mutating operation takes the host substrate's message sender as an
//! explicit `caller` and commits atomically or fails. Status is written
//! before any outbound token transfer; deposits verify their delta; terminal
//! states accept no further transitions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use agora_identity::IdentitySource;
use agora_listings::ListingSource;
use agora_token::TokenLedger;
use agora_types::{
    AccountId, AgentId, AgoraError, Amount, Clock, DisputeOutcome, EventRecord, Listing,
    ListingId, MarketEvent, Result, SettlementPath, Task, TaskId, TaskStatus, Uri,
};
use tokio::sync::RwLock;
use tracing::info;

use crate::admin::AdminState;
use crate::custody::{self, TransferGuard};
use crate::settlement::{settlement_payouts, SettlementSplit};
use crate::MarketConfig;

/// The escrow market: task lifecycle, token custody and settlement.
pub struct TaskMarket {
    pub(crate) address: AccountId,
    pub(crate) identity: Arc<dyn IdentitySource>,
    pub(crate) listings: Arc<dyn ListingSource>,
    pub(crate) token: Arc<dyn TokenLedger>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: MarketConfig,
    pub(crate) tasks: Arc<RwLock<HashMap<TaskId, Task>>>,
    pub(crate) buyer_index: Arc<RwLock<HashMap<AccountId, Vec<TaskId>>>>,
    pub(crate) agent_index: Arc<RwLock<HashMap<AgentId, Vec<TaskId>>>>,
    pub(crate) events: Arc<RwLock<Vec<EventRecord<MarketEvent>>>>,
    pub(crate) admin: Arc<RwLock<AdminState>>,
    pub(crate) guard: TransferGuard,
    next_task_id: AtomicU64,
}

impl TaskMarket {
    pub fn new(
        address: AccountId,
        admin: AccountId,
        identity: Arc<dyn IdentitySource>,
        listings: Arc<dyn ListingSource>,
        token: Arc<dyn TokenLedger>,
        clock: Arc<dyn Clock>,
        config: MarketConfig,
    ) -> Self {
        Self {
            address,
            identity,
            listings,
            token,
            clock,
            config,
            tasks: Arc::new(RwLock::new(HashMap::new())),
            buyer_index: Arc::new(RwLock::new(HashMap::new())),
            agent_index: Arc::new(RwLock::new(HashMap::new())),
            events: Arc::new(RwLock::new(Vec::new())),
            admin: Arc::new(RwLock::new(AdminState::new(admin))),
            guard: TransferGuard::new(),
            next_task_id: AtomicU64::new(1),
        }
    }

    /// The market's own token account
    pub fn address(&self) -> &AccountId {
        &self.address
    }

    // ========================================================================
    // Views
    // ========================================================================

    pub async fn get_task(&self, task_id: TaskId) -> Result<Task> {
        self.tasks
            .read()
            .await
            .get(&task_id)
            .cloned()
            .ok_or(AgoraError::UnknownTask { task_id })
    }

    pub async fn tasks_by_buyer(&self, buyer: &AccountId) -> Vec<Task> {
        let index = self.buyer_index.read().await;
        let tasks = self.tasks.read().await;
        index
            .get(buyer)
            .into_iter()
            .flatten()
            .filter_map(|id| tasks.get(id).cloned())
            .collect()
    }

    pub async fn tasks_by_agent(&self, agent_id: AgentId) -> Vec<Task> {
        let index = self.agent_index.read().await;
        let tasks = self.tasks.read().await;
        index
            .get(&agent_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tasks.get(id).cloned())
            .collect()
    }

    /// The full event log, oldest first
    pub async fn events(&self) -> Vec<EventRecord<MarketEvent>> {
        self.events.read().await.clone()
    }

    /// Most recent events, newest first
    pub async fn recent_events(&self, limit: usize) -> Vec<EventRecord<MarketEvent>> {
        let events = self.events.read().await;
        events.iter().rev().take(limit).cloned().collect()
    }

    // ========================================================================
    // Posting and quoting
    // ========================================================================

    /// Post a task against an active listing; the caller becomes its buyer.
    pub async fn post_task(
        &self,
        caller: AccountId,
        listing_id: ListingId,
        task_uri: Uri,
        proposed_units: u64,
    ) -> Result<TaskId> {
        self.guard.ensure_clear()?;
        let listing = self.active_listing(listing_id).await?;
        ensure_units_in_range(&listing, proposed_units)?;

        let id = TaskId(self.next_task_id.fetch_add(1, Ordering::SeqCst));
        let task = Task {
            id,
            listing_id,
            agent_id: listing.agent_id,
            buyer: caller.clone(),
            payment_token: listing.pricing.payment_token.clone(),
            task_uri: task_uri.clone(),
            proposed_units,
            quoted_units: 0,
            quoted_total_price: Amount::ZERO,
            quote_expiry: 0,
            funded_amount: Amount::ZERO,
            funded: false,
            seller_bond: Amount::ZERO,
            bond_funder: None,
            seller: None,
            artifact_uri: None,
            artifact_hash: None,
            created_at: self.clock.now(),
            activated_at: None,
            submitted_at: None,
            disputed_at: None,
            status: TaskStatus::Open,
            settled: false,
        };

        self.tasks.write().await.insert(id, task);
        self.buyer_index
            .write()
            .await
            .entry(caller.clone())
            .or_default()
            .push(id);
        self.agent_index
            .write()
            .await
            .entry(listing.agent_id)
            .or_default()
            .push(id);

        info!(task = %id, listing = %listing_id, buyer = %caller, "task posted");
        self.emit(MarketEvent::TaskPosted {
            task_id: id,
            listing_id,
            agent_id: listing.agent_id,
            buyer: caller,
            task_uri,
            proposed_units,
        })
        .await;
        Ok(id)
    }

    /// Quote an open task (agent-authorized). The controller picks the total
    /// freely; that is what `quote_required` buys the listing.
    pub async fn propose_quote(
        &self,
        caller: AccountId,
        task_id: TaskId,
        quoted_units: u64,
        quoted_total_price: Amount,
        quote_expiry: u64,
    ) -> Result<()> {
        self.guard.ensure_clear()?;
        let mut tasks = self.tasks.write().await;
        let task = task_mut(&mut tasks, task_id)?;
        ensure_status(task, TaskStatus::Open)?;

        let listing = self.active_listing(task.listing_id).await?;
        if quoted_units == 0 {
            return Err(AgoraError::UnitsOutOfRange {
                units: 0,
                min: listing.pricing.min_units,
                max: listing.pricing.max_units,
            });
        }
        ensure_units_in_range(&listing, quoted_units)?;
        self.ensure_agent_authorized(&caller, task.agent_id).await?;

        self.transition(task, TaskStatus::Quoted)?;
        task.quoted_units = quoted_units;
        task.quoted_total_price = quoted_total_price;
        task.quote_expiry = quote_expiry;
        drop(tasks);

        info!(task = %task_id, units = quoted_units, total = %quoted_total_price, "quote proposed");
        self.emit(MarketEvent::QuoteProposed {
            task_id,
            quoted_units,
            quoted_total_price,
            quote_expiry,
        })
        .await;
        Ok(())
    }

    /// Implicit quote: accept an open task at listing prices
    /// (agent-authorized, listings with `quote_required = false` only).
    pub async fn accept_task(&self, caller: AccountId, task_id: TaskId) -> Result<()> {
        self.guard.ensure_clear()?;
        let mut tasks = self.tasks.write().await;
        let task = task_mut(&mut tasks, task_id)?;
        ensure_status(task, TaskStatus::Open)?;

        let listing = self.active_listing(task.listing_id).await?;
        if listing.pricing.quote_required {
            return Err(AgoraError::QuoteRequired {
                listing_id: listing.id,
            });
        }
        self.ensure_agent_authorized(&caller, task.agent_id).await?;

        let total = listing.pricing.total_for(task.proposed_units)?;
        self.transition(task, TaskStatus::Quoted)?;
        task.quoted_units = task.proposed_units;
        task.quoted_total_price = total;
        task.quote_expiry = 0;
        let quoted_units = task.quoted_units;
        drop(tasks);

        info!(task = %task_id, total = %total, "task accepted at listing prices");
        self.emit(MarketEvent::TaskAccepted {
            task_id,
            quoted_units,
            quoted_total_price: total,
        })
        .await;
        Ok(())
    }

    // ========================================================================
    // Funding
    // ========================================================================

    /// Post the seller bond for a quoted task (agent-authorized). The caller
    /// becomes the bond funder and the sole recipient of any bond refund.
    pub async fn fund_seller_bond(
        &self,
        caller: AccountId,
        task_id: TaskId,
        amount: Amount,
    ) -> Result<()> {
        self.guard.ensure_clear()?;
        let mut tasks = self.tasks.write().await;
        let task = task_mut(&mut tasks, task_id)?;
        ensure_status(task, TaskStatus::Quoted)?;
        self.ensure_agent_authorized(&caller, task.agent_id).await?;

        let listing = self.listings.get_listing(task.listing_id).await?;
        let required = listing.policy.required_bond(task.quoted_total_price)?;
        if required.is_zero() {
            return Err(AgoraError::BondNotRequired { task_id });
        }
        if task.bond_funder.is_some() {
            return Err(AgoraError::BondAlreadyFunded { task_id });
        }
        if amount != required {
            return Err(AgoraError::AmountMismatch {
                expected: required,
                actual: amount,
            });
        }

        {
            let _scope = self.guard.begin()?;
            custody::pull_exact(
                self.token.as_ref(),
                &task.payment_token,
                &caller,
                &self.address,
                amount,
            )
            .await?;
        }
        task.seller_bond = amount;
        task.bond_funder = Some(caller.clone());
        drop(tasks);

        info!(task = %task_id, funder = %caller, %amount, "seller bond funded");
        self.emit(MarketEvent::SellerBondFunded {
            task_id,
            bond_funder: caller,
            amount,
        })
        .await;
        Ok(())
    }

    /// Fund the escrow in full (buyer only). Requires the bond, when the
    /// policy demands one, to already be in custody; blocked after the quote
    /// expiry but permitted exactly at it.
    pub async fn fund_task(&self, caller: AccountId, task_id: TaskId, amount: Amount) -> Result<()> {
        self.guard.ensure_clear()?;
        let mut tasks = self.tasks.write().await;
        let task = task_mut(&mut tasks, task_id)?;
        ensure_status(task, TaskStatus::Quoted)?;
        if caller != task.buyer {
            return Err(AgoraError::not_authorized("only the buyer may fund the task"));
        }
        if task.funded {
            return Err(AgoraError::AlreadyFunded { task_id });
        }
        if amount != task.quoted_total_price {
            return Err(AgoraError::AmountMismatch {
                expected: task.quoted_total_price,
                actual: amount,
            });
        }

        let listing = self.listings.get_listing(task.listing_id).await?;
        let required = listing.policy.required_bond(task.quoted_total_price)?;
        if !required.is_zero() && task.bond_funder.is_none() {
            return Err(AgoraError::BondNotFunded { task_id });
        }

        let now = self.clock.now();
        if task.quote_expiry != 0 && now > task.quote_expiry {
            return Err(AgoraError::QuoteExpired {
                task_id,
                expiry: task.quote_expiry,
                now,
            });
        }

        {
            let _scope = self.guard.begin()?;
            custody::pull_exact(
                self.token.as_ref(),
                &task.payment_token,
                &caller,
                &self.address,
                amount,
            )
            .await?;
        }
        task.funded_amount = amount;
        task.funded = true;
        drop(tasks);

        info!(task = %task_id, %amount, "task funded");
        self.emit(MarketEvent::TaskFunded { task_id, amount }).await;
        Ok(())
    }

    /// Activate a fully funded quote (buyer only). Snapshots the current
    /// agent owner as the seller; the snapshot alone holds post-activation
    /// seller rights. Valid after quote expiry as long as funding happened
    /// before it.
    pub async fn accept_quote(&self, caller: AccountId, task_id: TaskId) -> Result<()> {
        self.guard.ensure_clear()?;
        let mut tasks = self.tasks.write().await;
        let task = task_mut(&mut tasks, task_id)?;
        ensure_status(task, TaskStatus::Quoted)?;
        if caller != task.buyer {
            return Err(AgoraError::not_authorized(
                "only the buyer may accept the quote",
            ));
        }
        if !task.funded {
            return Err(AgoraError::NotFunded { task_id });
        }

        let listing = self.listings.get_listing(task.listing_id).await?;
        let required = listing.policy.required_bond(task.quoted_total_price)?;
        if !required.is_zero() && task.bond_funder.is_none() {
            return Err(AgoraError::BondNotFunded { task_id });
        }

        let seller = self.identity.owner_of(task.agent_id).await?;
        self.transition(task, TaskStatus::Active)?;
        task.seller = Some(seller.clone());
        task.activated_at = Some(self.clock.now());
        drop(tasks);

        info!(task = %task_id, seller = %seller, "quote accepted");
        self.emit(MarketEvent::QuoteAccepted { task_id, seller }).await;
        Ok(())
    }

    // ========================================================================
    // Pre-activation cancellation
    // ========================================================================

    /// Withdraw an unfunded quote (agent-authorized). Refunds any bond to its
    /// funder and zeroes the quote.
    pub async fn seller_cancel_quote(&self, caller: AccountId, task_id: TaskId) -> Result<()> {
        self.guard.ensure_clear()?;
        let mut tasks = self.tasks.write().await;
        let task = task_mut(&mut tasks, task_id)?;
        ensure_status(task, TaskStatus::Quoted)?;
        self.ensure_agent_authorized(&caller, task.agent_id).await?;
        if !task.funded_amount.is_zero() {
            return Err(AgoraError::AlreadyFunded { task_id });
        }

        self.transition(task, TaskStatus::Cancelled)?;
        task.quoted_units = 0;
        task.quoted_total_price = Amount::ZERO;
        task.quote_expiry = 0;
        let bond_refund = task.seller_bond;
        let bond_funder = task.bond_funder.clone();
        let payment_token = task.payment_token.clone();
        drop(tasks);

        if let Some(funder) = bond_funder {
            let _scope = self.guard.begin()?;
            custody::push(
                self.token.as_ref(),
                &payment_token,
                &self.address,
                &funder,
                bond_refund,
            )
            .await?;
        }

        info!(task = %task_id, %bond_refund, "seller cancelled quote");
        self.emit(MarketEvent::SellerCancelledQuote {
            task_id,
            bond_refund,
        })
        .await;
        Ok(())
    }

    /// Cancel a task before activation (buyer only). Refunds any escrow to
    /// the buyer and any bond to its funder.
    pub async fn cancel_task(&self, caller: AccountId, task_id: TaskId) -> Result<()> {
        self.guard.ensure_clear()?;
        let mut tasks = self.tasks.write().await;
        let task = task_mut(&mut tasks, task_id)?;
        if !matches!(task.status, TaskStatus::Open | TaskStatus::Quoted) {
            return Err(AgoraError::InvalidStatus {
                task_id,
                expected: "open or quoted",
                actual: task.status,
            });
        }
        if caller != task.buyer {
            return Err(AgoraError::not_authorized(
                "only the buyer may cancel the task",
            ));
        }

        self.transition(task, TaskStatus::Cancelled)?;
        let escrow_refund = task.funded_amount;
        let bond_refund = task.seller_bond;
        let buyer = task.buyer.clone();
        let bond_funder = task.bond_funder.clone();
        let payment_token = task.payment_token.clone();
        drop(tasks);

        {
            let _scope = self.guard.begin()?;
            custody::push(
                self.token.as_ref(),
                &payment_token,
                &self.address,
                &buyer,
                escrow_refund,
            )
            .await?;
            if let Some(funder) = bond_funder {
                custody::push(
                    self.token.as_ref(),
                    &payment_token,
                    &self.address,
                    &funder,
                    bond_refund,
                )
                .await?;
            }
        }

        info!(task = %task_id, %escrow_refund, %bond_refund, "task cancelled");
        self.emit(MarketEvent::TaskCancelled { task_id }).await;
        Ok(())
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    /// Submit the deliverable. Only the seller snapshotted at activation may
    /// submit: transferring the agent mid-task redirects nothing.
    pub async fn submit_deliverable(
        &self,
        caller: AccountId,
        task_id: TaskId,
        artifact_uri: Uri,
        artifact_hash: [u8; 32],
    ) -> Result<()> {
        self.guard.ensure_clear()?;
        let mut tasks = self.tasks.write().await;
        let task = task_mut(&mut tasks, task_id)?;
        ensure_status(task, TaskStatus::Active)?;
        if task.seller.as_ref() != Some(&caller) {
            return Err(AgoraError::not_authorized(
                "only the snapshotted seller may submit",
            ));
        }
        if !task.funded {
            return Err(AgoraError::NotFunded { task_id });
        }

        let listing = self.listings.get_listing(task.listing_id).await?;
        let now = self.clock.now();
        let deadline = deadline_after(task.activated_at, listing.policy.delivery_window_secs);
        if now >= deadline {
            return Err(AgoraError::DeliveryWindowClosed { task_id, deadline });
        }

        self.transition(task, TaskStatus::Submitted)?;
        task.submitted_at = Some(now);
        task.artifact_uri = Some(artifact_uri.clone());
        task.artifact_hash = Some(artifact_hash);
        drop(tasks);

        info!(task = %task_id, artifact = %artifact_uri, "deliverable submitted");
        self.emit(MarketEvent::DeliverableSubmitted {
            task_id,
            artifact_uri,
            artifact_hash,
        })
        .await;
        Ok(())
    }

    // ========================================================================
    // Settlement
    // ========================================================================

    /// Accept the submission (buyer only); settles escrow to the seller.
    pub async fn accept_submission(&self, caller: AccountId, task_id: TaskId) -> Result<()> {
        self.guard.ensure_clear()?;
        let mut tasks = self.tasks.write().await;
        let task = task_mut(&mut tasks, task_id)?;
        ensure_status(task, TaskStatus::Submitted)?;
        if caller != task.buyer {
            return Err(AgoraError::not_authorized(
                "only the buyer may accept the submission",
            ));
        }

        let split = self.settle_locked(task, SettlementPath::Accepted).await?;
        let snapshot = task.clone();
        drop(tasks);

        self.emit(MarketEvent::SubmissionAccepted { task_id }).await;
        self.emit_settlement(&snapshot, &split, SettlementPath::Accepted)
            .await?;
        Ok(())
    }

    /// Settle a submission the buyer stayed silent about. Deliberately open
    /// to any caller so liveness survives silent counterparties.
    pub async fn settle_after_timeout(&self, _caller: AccountId, task_id: TaskId) -> Result<()> {
        self.guard.ensure_clear()?;
        let mut tasks = self.tasks.write().await;
        let task = task_mut(&mut tasks, task_id)?;
        ensure_status(task, TaskStatus::Submitted)?;

        let listing = self.listings.get_listing(task.listing_id).await?;
        let now = self.clock.now();
        let deadline = deadline_after(task.submitted_at, listing.policy.challenge_window_secs);
        if now < deadline {
            return Err(AgoraError::ChallengeWindowStillOpen { task_id, deadline });
        }

        let split = self.settle_locked(task, SettlementPath::Timeout).await?;
        let snapshot = task.clone();
        drop(tasks);

        self.emit_settlement(&snapshot, &split, SettlementPath::Timeout)
            .await?;
        Ok(())
    }

    /// Open a dispute (buyer only), delegated to the installed dispute
    /// module, which calls back [`TaskMarket::mark_disputed`].
    pub async fn dispute_submission(
        &self,
        caller: AccountId,
        task_id: TaskId,
        dispute_uri: Uri,
    ) -> Result<()> {
        self.guard.ensure_clear()?;
        let (gateway, listing, task) = {
            let tasks = self.tasks.read().await;
            let task = tasks
                .get(&task_id)
                .ok_or(AgoraError::UnknownTask { task_id })?;
            ensure_status(task, TaskStatus::Submitted)?;
            if caller != task.buyer {
                return Err(AgoraError::not_authorized("only the buyer may dispute"));
            }
            let gateway = {
                let admin = self.admin.read().await;
                admin
                    .module
                    .as_ref()
                    .map(|m| m.gateway.clone())
                    .ok_or(AgoraError::DisputeModuleNotSet)?
            };
            let listing = self.listings.get_listing(task.listing_id).await?;
            (gateway, listing, task.clone())
        };

        let now = self.clock.now();
        let deadline = deadline_after(task.submitted_at, listing.policy.challenge_window_secs);
        if now >= deadline {
            return Err(AgoraError::ChallengeWindowClosed { task_id, deadline });
        }

        // No state changes here: the module validates, records the dispute
        // and drives the DISPUTED transition through mark_disputed.
        gateway
            .open_dispute(self.address.clone(), task_id, dispute_uri)
            .await
    }

    /// Move a submitted task to DISPUTED. Dispute module only.
    pub async fn mark_disputed(
        &self,
        caller: AccountId,
        task_id: TaskId,
        dispute_uri: Uri,
    ) -> Result<()> {
        self.guard.ensure_clear()?;
        self.ensure_dispute_module(&caller).await?;

        let mut tasks = self.tasks.write().await;
        let task = task_mut(&mut tasks, task_id)?;
        ensure_status(task, TaskStatus::Submitted)?;

        self.transition(task, TaskStatus::Disputed)?;
        task.disputed_at = Some(self.clock.now());
        drop(tasks);

        info!(task = %task_id, "submission disputed");
        self.emit(MarketEvent::SubmissionDisputed {
            task_id,
            dispute_uri,
        })
        .await;
        Ok(())
    }

    /// Settle a disputed task with an adjudicated outcome. Dispute module
    /// only; accepts tasks whose dispute predates the installed module.
    pub async fn resolve_dispute(
        &self,
        caller: AccountId,
        task_id: TaskId,
        outcome: DisputeOutcome,
    ) -> Result<()> {
        self.guard.ensure_clear()?;
        self.ensure_dispute_module(&caller).await?;

        let mut tasks = self.tasks.write().await;
        let task = task_mut(&mut tasks, task_id)?;
        ensure_status(task, TaskStatus::Disputed)?;

        let path = outcome.settlement_path();
        let split = self.settle_locked(task, path).await?;
        let snapshot = task.clone();
        drop(tasks);

        info!(task = %task_id, %outcome, "dispute resolved");
        self.emit_settlement(&snapshot, &split, path).await?;
        Ok(())
    }

    /// Settle a dispute nobody resolved, seller-wins, once the post-dispute
    /// window has elapsed. Open to any caller; disabled when the listing's
    /// window is zero.
    pub async fn settle_after_post_dispute_timeout(
        &self,
        _caller: AccountId,
        task_id: TaskId,
    ) -> Result<()> {
        self.guard.ensure_clear()?;
        let mut tasks = self.tasks.write().await;
        let task = task_mut(&mut tasks, task_id)?;
        ensure_status(task, TaskStatus::Disputed)?;

        let listing = self.listings.get_listing(task.listing_id).await?;
        let window = listing.policy.post_dispute_window_secs;
        if window == 0 {
            return Err(AgoraError::PostDisputeTimeoutDisabled { task_id });
        }
        let now = self.clock.now();
        let deadline = deadline_after(task.disputed_at, window);
        if now < deadline {
            return Err(AgoraError::PostDisputeWindowStillOpen { task_id, deadline });
        }

        let split = self
            .settle_locked(task, SettlementPath::PostDisputeTimeout)
            .await?;
        let snapshot = task.clone();
        drop(tasks);

        self.emit(MarketEvent::PostDisputeTimeoutSettled {
            task_id,
            deadline,
            outcome: DisputeOutcome::SellerWins,
        })
        .await;
        self.emit_settlement(&snapshot, &split, SettlementPath::PostDisputeTimeout)
            .await?;
        Ok(())
    }

    /// Claim escrow and bond after the seller missed the delivery window
    /// (buyer only). The bond is forfeited to the buyer.
    pub async fn cancel_for_non_delivery(&self, caller: AccountId, task_id: TaskId) -> Result<()> {
        self.guard.ensure_clear()?;
        let mut tasks = self.tasks.write().await;
        let task = task_mut(&mut tasks, task_id)?;
        ensure_status(task, TaskStatus::Active)?;
        if caller != task.buyer {
            return Err(AgoraError::not_authorized(
                "only the buyer may cancel for non-delivery",
            ));
        }
        if !task.funded {
            return Err(AgoraError::NotFunded { task_id });
        }

        let listing = self.listings.get_listing(task.listing_id).await?;
        let now = self.clock.now();
        let deadline = deadline_after(task.activated_at, listing.policy.delivery_window_secs);
        if now < deadline {
            return Err(AgoraError::DeliveryWindowStillOpen { task_id, deadline });
        }

        self.transition(task, TaskStatus::Cancelled)?;
        task.settled = true;
        let escrow_refund = task.funded_amount;
        let seller_bond_penalty = task.seller_bond;
        let buyer = task.buyer.clone();
        let payment_token = task.payment_token.clone();
        drop(tasks);

        {
            let _scope = self.guard.begin()?;
            let total = escrow_refund.checked_add(seller_bond_penalty)?;
            custody::push(
                self.token.as_ref(),
                &payment_token,
                &self.address,
                &buyer,
                total,
            )
            .await?;
        }

        info!(task = %task_id, %escrow_refund, %seller_bond_penalty, "cancelled for non-delivery");
        self.emit(MarketEvent::TaskCancelledForNonDelivery {
            task_id,
            escrow_refund,
            seller_bond_penalty,
        })
        .await;
        Ok(())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Settle a task in place: write terminal state, then pay buyer, seller
    /// and bond funder in that order, skipping zero amounts.
    async fn settle_locked(&self, task: &mut Task, path: SettlementPath) -> Result<SettlementSplit> {
        let split = settlement_payouts(task.funded_amount, task.seller_bond, path)?;

        self.transition(task, TaskStatus::Settled)?;
        task.settled = true;

        if task.seller.is_none() && !split.seller_escrow_payout.is_zero() {
            return Err(AgoraError::TransferFailed {
                reason: "no seller snapshot for escrow payout".to_string(),
            });
        }
        if task.bond_funder.is_none() && !split.seller_bond_refund.is_zero() {
            return Err(AgoraError::TransferFailed {
                reason: "no bond funder for bond refund".to_string(),
            });
        }

        let _scope = self.guard.begin()?;
        custody::push(
            self.token.as_ref(),
            &task.payment_token,
            &self.address,
            &task.buyer,
            split.buyer_total()?,
        )
        .await?;
        if let Some(seller) = task.seller.clone() {
            custody::push(
                self.token.as_ref(),
                &task.payment_token,
                &self.address,
                &seller,
                split.seller_escrow_payout,
            )
            .await?;
        }
        if let Some(funder) = task.bond_funder.clone() {
            custody::push(
                self.token.as_ref(),
                &task.payment_token,
                &self.address,
                &funder,
                split.seller_bond_refund,
            )
            .await?;
        }

        info!(task = %task.id, %path, "task settled");
        Ok(split)
    }

    async fn emit_settlement(
        &self,
        task: &Task,
        split: &SettlementSplit,
        path: SettlementPath,
    ) -> Result<()> {
        self.emit(MarketEvent::TaskSettled {
            task_id: task.id,
            buyer_payout: split.buyer_total()?,
            seller_bond_refund: split.seller_bond_refund,
        })
        .await;
        self.emit(MarketEvent::TaskSettledV2 {
            task_id: task.id,
            buyer: task.buyer.clone(),
            seller: task.seller.clone(),
            bond_funder: task.bond_funder.clone(),
            buyer_escrow_payout: split.buyer_escrow_payout,
            buyer_bond_payout: split.buyer_bond_payout,
            seller_escrow_payout: split.seller_escrow_payout,
            seller_bond_refund: split.seller_bond_refund,
            path,
        })
        .await;
        Ok(())
    }

    pub(crate) async fn emit(&self, event: MarketEvent) {
        let mut events = self.events.write().await;
        let seq = events.len() as u64;
        events.push(EventRecord {
            seq,
            at: self.clock.now(),
            event,
        });
    }

    pub(crate) fn transition(&self, task: &mut Task, next: TaskStatus) -> Result<()> {
        if !task.status.can_transition_to(next) {
            return Err(AgoraError::InvalidStatus {
                task_id: task.id,
                expected: next.as_str(),
                actual: task.status,
            });
        }
        task.status = next;
        Ok(())
    }

    async fn active_listing(&self, listing_id: ListingId) -> Result<Listing> {
        let listing = self.listings.get_listing(listing_id).await?;
        if !listing.active {
            return Err(AgoraError::ListingInactive { listing_id });
        }
        Ok(listing)
    }

    async fn ensure_agent_authorized(&self, caller: &AccountId, agent_id: AgentId) -> Result<()> {
        if self.identity.is_agent_authorized(caller, agent_id).await? {
            Ok(())
        } else {
            Err(AgoraError::not_authorized(format!(
                "{caller} is not authorized for {agent_id}"
            )))
        }
    }

    async fn ensure_dispute_module(&self, caller: &AccountId) -> Result<()> {
        let admin = self.admin.read().await;
        let module = admin
            .module
            .as_ref()
            .ok_or(AgoraError::DisputeModuleNotSet)?;
        if &module.address != caller {
            return Err(AgoraError::not_authorized(
                "only the dispute module may drive dispute transitions",
            ));
        }
        Ok(())
    }
}

fn task_mut(
    tasks: &mut HashMap<TaskId, Task>,
    task_id: TaskId,
) -> Result<&mut Task> {
    tasks
        .get_mut(&task_id)
        .ok_or(AgoraError::UnknownTask { task_id })
}

fn ensure_status(task: &Task, expected: TaskStatus) -> Result<()> {
    if task.status != expected {
        return Err(AgoraError::InvalidStatus {
            task_id: task.id,
            expected: expected.as_str(),
            actual: task.status,
        });
    }
    Ok(())
}

fn ensure_units_in_range(listing: &Listing, units: u64) -> Result<()> {
    if !listing.pricing.units_in_range(units) {
        return Err(AgoraError::UnitsOutOfRange {
            units,
            min: listing.pricing.min_units,
            max: listing.pricing.max_units,
        });
    }
    Ok(())
}

/// Deadline for a window that starts at `start`; windows on states the task
/// has not reached never close.
fn deadline_after(start: Option<u64>, window: u64) -> u64 {
    start
        .map(|s| s.saturating_add(window))
        .unwrap_or(u64::MAX)
}
