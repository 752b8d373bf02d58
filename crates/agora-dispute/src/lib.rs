//! Agora Dispute - Buyer-gated dispute opening and permissioned resolution
//!
//! The module keeps one [`DisputeRecord`] per task. Opening is allowed to the
//! task's buyer (or to the market itself on the delegated path) strictly
//! inside the challenge window; resolution is allowed to an approved
//! resolver and feeds the adjudicated outcome back into the market. The
//! module stores the market handle once at construction; the market gates
//! the callbacks against this module's address.
//!
//! A task can arrive DISPUTED without a local record when the dispute was
//! opened under a previous module: resolution then reconstructs a minimal
//! record instead of rejecting.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use agora_listings::ListingSource;
use agora_market::{DisputeGateway, TaskMarket};
use agora_types::{
    AccountId, AgoraError, Clock, DisputeEvent, DisputeOutcome, DisputeRecord, EventRecord,
    Result, TaskId, TaskStatus, Uri,
};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

struct OwnerState {
    owner: AccountId,
    pending_owner: Option<AccountId>,
}

/// The dispute module.
pub struct DisputeModule {
    address: AccountId,
    market: Arc<TaskMarket>,
    listings: Arc<dyn ListingSource>,
    clock: Arc<dyn Clock>,
    owner: RwLock<OwnerState>,
    resolvers: RwLock<HashSet<AccountId>>,
    records: RwLock<HashMap<TaskId, DisputeRecord>>,
    events: RwLock<Vec<EventRecord<DisputeEvent>>>,
}

impl DisputeModule {
    pub fn new(
        address: AccountId,
        owner: AccountId,
        market: Arc<TaskMarket>,
        listings: Arc<dyn ListingSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            address,
            market,
            listings,
            clock,
            owner: RwLock::new(OwnerState {
                owner,
                pending_owner: None,
            }),
            resolvers: RwLock::new(HashSet::new()),
            records: RwLock::new(HashMap::new()),
            events: RwLock::new(Vec::new()),
        }
    }

    /// The module's own address; the market gates callbacks against it
    pub fn address(&self) -> &AccountId {
        &self.address
    }

    // ========================================================================
    // Disputing
    // ========================================================================

    /// Open a dispute on a submitted task.
    ///
    /// The caller must be the task's buyer or the market itself (delegated
    /// path). Opening is blocked at `submitted_at + challenge_window` and
    /// later. The record is created with the default seller-wins outcome and
    /// the market is moved to DISPUTED.
    pub async fn open_dispute(
        &self,
        caller: AccountId,
        task_id: TaskId,
        dispute_uri: Uri,
    ) -> Result<()> {
        let task = self.market.get_task(task_id).await?;
        if caller != task.buyer && &caller != self.market.address() {
            return Err(AgoraError::not_authorized(
                "only the buyer or the market may open a dispute",
            ));
        }
        if task.status != TaskStatus::Submitted {
            return Err(AgoraError::InvalidStatus {
                task_id,
                expected: TaskStatus::Submitted.as_str(),
                actual: task.status,
            });
        }

        let listing = self.listings.get_listing(task.listing_id).await?;
        let now = self.clock.now();
        let deadline = task
            .submitted_at
            .map(|s| s.saturating_add(listing.policy.challenge_window_secs))
            .unwrap_or(u64::MAX);
        if now >= deadline {
            return Err(AgoraError::ChallengeWindowClosed { task_id, deadline });
        }

        {
            let mut records = self.records.write().await;
            if records.get(&task_id).map(|r| r.opened).unwrap_or(false) {
                return Err(AgoraError::DisputeAlreadyOpened { task_id });
            }
            records.insert(
                task_id,
                DisputeRecord::opened(task_id, task.buyer.clone(), Some(dispute_uri.clone())),
            );
        }

        // Drive the market transition; unwind the record if it refuses
        if let Err(err) = self
            .market
            .mark_disputed(self.address.clone(), task_id, dispute_uri.clone())
            .await
        {
            self.records.write().await.remove(&task_id);
            return Err(err);
        }

        info!(task = %task_id, buyer = %task.buyer, "dispute opened");
        self.emit(DisputeEvent::DisputeOpened {
            task_id,
            buyer: task.buyer,
            dispute_uri,
        })
        .await;
        Ok(())
    }

    /// Resolve a dispute with an adjudicated outcome (approved resolvers
    /// only). Settles the task through the market.
    pub async fn resolve_dispute(
        &self,
        caller: AccountId,
        task_id: TaskId,
        outcome: DisputeOutcome,
        resolution_uri: Uri,
    ) -> Result<()> {
        if !self.is_resolver(&caller).await {
            return Err(AgoraError::not_authorized("caller is not an approved resolver"));
        }

        let task = self.market.get_task(task_id).await?;
        if task.status != TaskStatus::Disputed {
            return Err(AgoraError::InvalidStatus {
                task_id,
                expected: TaskStatus::Disputed.as_str(),
                actual: task.status,
            });
        }

        let previous = {
            let mut records = self.records.write().await;
            // A DISPUTED task without a record was opened under an earlier
            // module; reconstruct the minimal record instead of rejecting.
            let record = records
                .entry(task_id)
                .or_insert_with(|| DisputeRecord::opened(task_id, task.buyer.clone(), None));
            if record.resolved {
                return Err(AgoraError::DisputeAlreadyResolved { task_id });
            }
            let previous = record.clone();
            record.resolved = true;
            record.outcome = outcome;
            record.resolution_uri = Some(resolution_uri.clone());
            previous
        };

        // Settlement runs in the market; unwind the record if it refuses
        if let Err(err) = self
            .market
            .resolve_dispute(self.address.clone(), task_id, outcome)
            .await
        {
            self.records.write().await.insert(task_id, previous);
            return Err(err);
        }

        info!(task = %task_id, resolver = %caller, %outcome, "dispute resolved");
        self.emit(DisputeEvent::DisputeResolved {
            task_id,
            resolver: caller,
            outcome,
            resolution_uri,
        })
        .await;
        Ok(())
    }

    // ========================================================================
    // Resolver set and ownership
    // ========================================================================

    pub async fn add_resolver(&self, caller: AccountId, resolver: AccountId) -> Result<()> {
        self.ensure_owner(&caller).await?;
        self.resolvers.write().await.insert(resolver);
        Ok(())
    }

    pub async fn remove_resolver(&self, caller: AccountId, resolver: &AccountId) -> Result<()> {
        self.ensure_owner(&caller).await?;
        self.resolvers.write().await.remove(resolver);
        Ok(())
    }

    pub async fn is_resolver(&self, account: &AccountId) -> bool {
        self.resolvers.read().await.contains(account)
    }

    pub async fn owner(&self) -> AccountId {
        self.owner.read().await.owner.clone()
    }

    /// Step one of the ownership handover: name a successor.
    pub async fn transfer_ownership(&self, caller: AccountId, new_owner: AccountId) -> Result<()> {
        let mut state = self.owner.write().await;
        if caller != state.owner {
            return Err(AgoraError::not_authorized("only the owner may transfer"));
        }
        state.pending_owner = Some(new_owner);
        Ok(())
    }

    /// Step two: the proposed owner accepts and takes over.
    pub async fn accept_ownership(&self, caller: AccountId) -> Result<()> {
        let mut state = self.owner.write().await;
        if state.pending_owner.as_ref() != Some(&caller) {
            return Err(AgoraError::not_authorized("caller is not the proposed owner"));
        }
        state.owner = caller;
        state.pending_owner = None;
        Ok(())
    }

    // ========================================================================
    // Views
    // ========================================================================

    pub async fn record(&self, task_id: TaskId) -> Result<DisputeRecord> {
        self.records
            .read()
            .await
            .get(&task_id)
            .cloned()
            .ok_or(AgoraError::UnknownDispute { task_id })
    }

    /// The full event log, oldest first
    pub async fn events(&self) -> Vec<EventRecord<DisputeEvent>> {
        self.events.read().await.clone()
    }

    async fn ensure_owner(&self, caller: &AccountId) -> Result<()> {
        let state = self.owner.read().await;
        if &state.owner != caller {
            return Err(AgoraError::not_authorized(
                "only the module owner may manage resolvers",
            ));
        }
        Ok(())
    }

    async fn emit(&self, event: DisputeEvent) {
        let mut events = self.events.write().await;
        let seq = events.len() as u64;
        events.push(EventRecord {
            seq,
            at: self.clock.now(),
            event,
        });
    }
}

#[async_trait]
impl DisputeGateway for DisputeModule {
    async fn open_dispute(
        &self,
        caller: AccountId,
        task_id: TaskId,
        dispute_uri: Uri,
    ) -> Result<()> {
        DisputeModule::open_dispute(self, caller, task_id, dispute_uri).await
    }
}
