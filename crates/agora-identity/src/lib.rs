//! Agora Identity - Transferable agent records
//!
//! An agent is a non-fungible, freely transferable identity representing a
//! worker. Each record carries an owner, an optional single-address approval,
//! and an opaque metadata URI; owners may additionally grant blanket operator
//! approval per address. Transferring an agent clears its single-address
//! approval. Agents are created on first registration and never destroyed.
//!
//! Consumers authorize against the [`IdentitySource`] seam rather than the
//! registry type, so the market and listings can be tested against any
//! identity implementation.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use agora_types::{AccountId, AgentId, AgoraError, Result, Uri};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

/// One registered agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: AgentId,
    pub owner: AccountId,
    /// Single-address approval; cleared on every transfer
    pub approved: Option<AccountId>,
    pub uri: Uri,
}

/// The authorization surface consumed by listings and the market.
#[async_trait]
pub trait IdentitySource: Send + Sync {
    /// Current owner of an agent
    async fn owner_of(&self, agent_id: AgentId) -> Result<AccountId>;

    /// Single-approved address for an agent, if any
    async fn get_approved(&self, agent_id: AgentId) -> Result<Option<AccountId>>;

    /// Whether `operator` has blanket approval from `owner`
    async fn is_approved_for_all(&self, owner: &AccountId, operator: &AccountId) -> bool;

    /// Whether `caller` is the owner, the single-approved address, or an
    /// operator for the agent's owner.
    async fn is_agent_authorized(&self, caller: &AccountId, agent_id: AgentId) -> Result<bool> {
        let owner = self.owner_of(agent_id).await?;
        if &owner == caller {
            return Ok(true);
        }
        if self.get_approved(agent_id).await?.as_ref() == Some(caller) {
            return Ok(true);
        }
        Ok(self.is_approved_for_all(&owner, caller).await)
    }
}

/// In-memory agent registry.
pub struct AgentRegistry {
    agents: Arc<RwLock<HashMap<AgentId, AgentRecord>>>,
    /// owner → operators with blanket approval
    operators: Arc<RwLock<HashMap<AccountId, HashSet<AccountId>>>>,
    /// owner → agents, maintained across transfers
    owner_index: Arc<RwLock<HashMap<AccountId, Vec<AgentId>>>>,
    next_id: AtomicU64,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: Arc::new(RwLock::new(HashMap::new())),
            operators: Arc::new(RwLock::new(HashMap::new())),
            owner_index: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new agent; the caller becomes its owner.
    pub async fn register_agent(&self, caller: AccountId, uri: Uri) -> Result<AgentId> {
        let id = AgentId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let record = AgentRecord {
            id,
            owner: caller.clone(),
            approved: None,
            uri,
        };

        self.agents.write().await.insert(id, record);
        self.owner_index
            .write()
            .await
            .entry(caller.clone())
            .or_default()
            .push(id);

        info!(agent = %id, owner = %caller, "agent registered");
        Ok(id)
    }

    /// Update an agent's metadata URI (owner, approved, or operator).
    pub async fn set_agent_uri(&self, caller: &AccountId, agent_id: AgentId, uri: Uri) -> Result<()> {
        self.ensure_authorized(caller, agent_id).await?;
        let mut agents = self.agents.write().await;
        let record = agents
            .get_mut(&agent_id)
            .ok_or(AgoraError::UnknownAgent { agent_id })?;
        record.uri = uri;
        Ok(())
    }

    /// Transfer an agent. Standard non-fungible semantics: the caller must
    /// be the owner, the single-approved address, or an operator, and the
    /// single-address approval is cleared.
    pub async fn transfer_agent(
        &self,
        caller: &AccountId,
        agent_id: AgentId,
        to: AccountId,
    ) -> Result<()> {
        self.ensure_authorized(caller, agent_id).await?;

        let previous = {
            let mut agents = self.agents.write().await;
            let record = agents
                .get_mut(&agent_id)
                .ok_or(AgoraError::UnknownAgent { agent_id })?;
            let previous = record.owner.clone();
            record.owner = to.clone();
            record.approved = None;
            previous
        };

        let mut index = self.owner_index.write().await;
        if let Some(ids) = index.get_mut(&previous) {
            ids.retain(|id| *id != agent_id);
        }
        index.entry(to.clone()).or_default().push(agent_id);

        info!(agent = %agent_id, from = %previous, to = %to, "agent transferred");
        Ok(())
    }

    /// Set or clear the single-address approval (owner or operator only).
    pub async fn approve(
        &self,
        caller: &AccountId,
        agent_id: AgentId,
        approved: Option<AccountId>,
    ) -> Result<()> {
        let mut agents = self.agents.write().await;
        let record = agents
            .get_mut(&agent_id)
            .ok_or(AgoraError::UnknownAgent { agent_id })?;

        let is_operator = self
            .operators
            .read()
            .await
            .get(&record.owner)
            .map(|ops| ops.contains(caller))
            .unwrap_or(false);
        if &record.owner != caller && !is_operator {
            return Err(AgoraError::not_authorized(format!(
                "{caller} cannot approve for {agent_id}"
            )));
        }

        record.approved = approved;
        Ok(())
    }

    /// Grant or revoke blanket operator approval for the caller's agents.
    pub async fn set_approval_for_all(
        &self,
        caller: &AccountId,
        operator: AccountId,
        approved: bool,
    ) {
        let mut operators = self.operators.write().await;
        let entry = operators.entry(caller.clone()).or_default();
        if approved {
            entry.insert(operator);
        } else {
            entry.remove(&operator);
        }
    }

    /// The agent's metadata URI
    pub async fn agent_uri(&self, agent_id: AgentId) -> Result<Uri> {
        let agents = self.agents.read().await;
        agents
            .get(&agent_id)
            .map(|r| r.uri.clone())
            .ok_or(AgoraError::UnknownAgent { agent_id })
    }

    /// All agents currently owned by `owner`
    pub async fn agents_of(&self, owner: &AccountId) -> Vec<AgentId> {
        self.owner_index
            .read()
            .await
            .get(owner)
            .cloned()
            .unwrap_or_default()
    }

    async fn ensure_authorized(&self, caller: &AccountId, agent_id: AgentId) -> Result<()> {
        if self.is_agent_authorized(caller, agent_id).await? {
            Ok(())
        } else {
            Err(AgoraError::not_authorized(format!(
                "{caller} is not owner, approved or operator for {agent_id}"
            )))
        }
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentitySource for AgentRegistry {
    async fn owner_of(&self, agent_id: AgentId) -> Result<AccountId> {
        let agents = self.agents.read().await;
        agents
            .get(&agent_id)
            .map(|r| r.owner.clone())
            .ok_or(AgoraError::UnknownAgent { agent_id })
    }

    async fn get_approved(&self, agent_id: AgentId) -> Result<Option<AccountId>> {
        let agents = self.agents.read().await;
        agents
            .get(&agent_id)
            .map(|r| r.approved.clone())
            .ok_or(AgoraError::UnknownAgent { agent_id })
    }

    async fn is_approved_for_all(&self, owner: &AccountId, operator: &AccountId) -> bool {
        self.operators
            .read()
            .await
            .get(owner)
            .map(|ops| ops.contains(operator))
            .unwrap_or(false)
    }
}
