//! Agora Listings - Per-agent offerings with immutable pricing and policy
//!
//! A listing binds pricing and settlement policy to an agent. Authorization
//! is inherited from agent identity: whoever may act for the agent may create
//! and maintain its listings. Pricing and policy are frozen at creation; only
//! the listing URI and the active flag change afterwards.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use agora_identity::IdentitySource;
use agora_types::{
    AccountId, AgentId, AgoraError, Listing, ListingId, Policy, Pricing, Result, Uri,
};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

/// Read surface the market consumes.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn get_listing(&self, listing_id: ListingId) -> Result<Listing>;
}

/// In-memory listing registry.
pub struct ListingRegistry {
    identity: Arc<dyn IdentitySource>,
    listings: Arc<RwLock<HashMap<ListingId, Listing>>>,
    /// agent → listings
    agent_index: Arc<RwLock<HashMap<AgentId, Vec<ListingId>>>>,
    next_id: AtomicU64,
}

impl ListingRegistry {
    pub fn new(identity: Arc<dyn IdentitySource>) -> Self {
        Self {
            identity,
            listings: Arc::new(RwLock::new(HashMap::new())),
            agent_index: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a listing for an agent the caller is authorized for.
    ///
    /// Pricing and policy are validated here and immutable afterwards.
    pub async fn create_listing(
        &self,
        caller: &AccountId,
        agent_id: AgentId,
        uri: Uri,
        pricing: Pricing,
        policy: Policy,
    ) -> Result<ListingId> {
        self.ensure_authorized(caller, agent_id).await?;
        pricing.validate()?;
        policy.validate()?;

        let id = ListingId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let listing = Listing {
            id,
            agent_id,
            listing_uri: uri,
            pricing,
            policy,
            active: true,
        };

        self.listings.write().await.insert(id, listing);
        self.agent_index
            .write()
            .await
            .entry(agent_id)
            .or_default()
            .push(id);

        info!(listing = %id, agent = %agent_id, "listing created");
        Ok(id)
    }

    /// Update the mutable parts of a listing: URI and active flag.
    pub async fn update_listing(
        &self,
        caller: &AccountId,
        listing_id: ListingId,
        uri: Uri,
        active: bool,
    ) -> Result<()> {
        let agent_id = {
            let listings = self.listings.read().await;
            listings
                .get(&listing_id)
                .map(|l| l.agent_id)
                .ok_or(AgoraError::UnknownListing { listing_id })?
        };
        self.ensure_authorized(caller, agent_id).await?;

        let mut listings = self.listings.write().await;
        let listing = listings
            .get_mut(&listing_id)
            .ok_or(AgoraError::UnknownListing { listing_id })?;
        listing.listing_uri = uri;
        listing.active = active;

        info!(listing = %listing_id, active, "listing updated");
        Ok(())
    }

    /// All listings bound to an agent
    pub async fn listings_by_agent(&self, agent_id: AgentId) -> Vec<Listing> {
        let index = self.agent_index.read().await;
        let listings = self.listings.read().await;
        index
            .get(&agent_id)
            .into_iter()
            .flatten()
            .filter_map(|id| listings.get(id).cloned())
            .collect()
    }

    async fn ensure_authorized(&self, caller: &AccountId, agent_id: AgentId) -> Result<()> {
        if self.identity.is_agent_authorized(caller, agent_id).await? {
            Ok(())
        } else {
            Err(AgoraError::not_authorized(format!(
                "{caller} is not authorized for {agent_id}"
            )))
        }
    }
}

#[async_trait]
impl ListingSource for ListingRegistry {
    async fn get_listing(&self, listing_id: ListingId) -> Result<Listing> {
        self.listings
            .read()
            .await
            .get(&listing_id)
            .cloned()
            .ok_or(AgoraError::UnknownListing { listing_id })
    }
}
