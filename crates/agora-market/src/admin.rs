//! Privileged market administration
//!
//! Admin transfer is two-step (propose + accept). Replacing the dispute
//! module is timelocked: the first installation is immediate, every later
//! swap schedules a pending module that becomes executable after the
//! configured delay. The market holds the module as a capability pair:
//! the address it gates callbacks against, and the gateway it delegates
//! dispute openings to.

use std::sync::Arc;

use agora_types::{AccountId, AgoraError, MarketEvent, Result, TaskId, Uri};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::market::TaskMarket;

/// Capability the market holds on the dispute module.
#[async_trait]
pub trait DisputeGateway: Send + Sync {
    /// Open a dispute for `task_id`. On the delegated path the market passes
    /// its own address as `caller`.
    async fn open_dispute(&self, caller: AccountId, task_id: TaskId, dispute_uri: Uri)
        -> Result<()>;
}

#[derive(Clone)]
pub(crate) struct InstalledModule {
    pub(crate) address: AccountId,
    pub(crate) gateway: Arc<dyn DisputeGateway>,
}

#[derive(Clone)]
pub(crate) struct PendingModule {
    pub(crate) address: AccountId,
    pub(crate) gateway: Arc<dyn DisputeGateway>,
    pub(crate) activation_at: u64,
}

pub(crate) struct AdminState {
    pub(crate) admin: AccountId,
    pub(crate) pending_admin: Option<AccountId>,
    pub(crate) module: Option<InstalledModule>,
    pub(crate) pending_module: Option<PendingModule>,
}

impl AdminState {
    pub(crate) fn new(admin: AccountId) -> Self {
        Self {
            admin,
            pending_admin: None,
            module: None,
            pending_module: None,
        }
    }
}

impl TaskMarket {
    /// Current admin
    pub async fn admin(&self) -> AccountId {
        self.admin.read().await.admin.clone()
    }

    /// Address of the installed dispute module, if any
    pub async fn dispute_module_address(&self) -> Option<AccountId> {
        self.admin.read().await.module.as_ref().map(|m| m.address.clone())
    }

    /// Address and activation time of the pending module, if any
    pub async fn pending_dispute_module(&self) -> Option<(AccountId, u64)> {
        self.admin
            .read()
            .await
            .pending_module
            .as_ref()
            .map(|p| (p.address.clone(), p.activation_at))
    }

    /// Step one of the admin handover: name a successor.
    pub async fn propose_admin(&self, caller: AccountId, new_admin: AccountId) -> Result<()> {
        let mut state = self.admin.write().await;
        if caller != state.admin {
            return Err(AgoraError::not_authorized("only the admin may propose"));
        }
        info!(current = %state.admin, proposed = %new_admin, "admin handover proposed");
        state.pending_admin = Some(new_admin);
        Ok(())
    }

    /// Step two: the proposed admin accepts and takes over.
    pub async fn accept_admin(&self, caller: AccountId) -> Result<()> {
        let mut state = self.admin.write().await;
        if state.pending_admin.as_ref() != Some(&caller) {
            return Err(AgoraError::not_authorized(
                "caller is not the proposed admin",
            ));
        }
        warn!(previous = %state.admin, new = %caller, "admin handover executed");
        state.admin = caller;
        state.pending_admin = None;
        Ok(())
    }

    /// Install or schedule a dispute module. With no module installed the
    /// pair takes effect immediately; otherwise it is scheduled behind the
    /// configured delay.
    pub async fn set_dispute_module(
        &self,
        caller: AccountId,
        module_address: AccountId,
        gateway: Arc<dyn DisputeGateway>,
    ) -> Result<()> {
        self.guard.ensure_clear()?;
        let mut state = self.admin.write().await;
        if caller != state.admin {
            return Err(AgoraError::not_authorized(
                "only the admin may set the dispute module",
            ));
        }

        let event = {
            let st = &mut *state;
            match &st.module {
                None => {
                    info!(module = %module_address, "dispute module installed");
                    st.module = Some(InstalledModule {
                        address: module_address.clone(),
                        gateway,
                    });
                    MarketEvent::DisputeModuleUpdated {
                        previous: None,
                        new_module: module_address,
                    }
                }
                Some(current) => {
                    if current.address == module_address {
                        return Err(AgoraError::UnchangedModule);
                    }
                    let previous = current.address.clone();
                    let activation_at = self
                        .clock
                        .now()
                        .saturating_add(self.config.dispute_module_update_delay);
                    info!(pending = %module_address, activation_at, "dispute module update scheduled");
                    st.pending_module = Some(PendingModule {
                        address: module_address.clone(),
                        gateway,
                        activation_at,
                    });
                    MarketEvent::DisputeModuleUpdateScheduled {
                        previous: Some(previous),
                        pending: module_address,
                        execute_after: activation_at,
                    }
                }
            }
        };
        drop(state);
        self.emit(event).await;
        Ok(())
    }

    /// Wipe the pending module.
    pub async fn cancel_dispute_module_update(&self, caller: AccountId) -> Result<()> {
        let mut state = self.admin.write().await;
        if caller != state.admin {
            return Err(AgoraError::not_authorized(
                "only the admin may cancel the update",
            ));
        }
        let pending = state.pending_module.take().ok_or(AgoraError::NoPendingUpdate)?;
        drop(state);

        info!(pending = %pending.address, "dispute module update cancelled");
        self.emit(MarketEvent::DisputeModuleUpdateCancelled {
            pending: pending.address,
        })
        .await;
        Ok(())
    }

    /// Swap in the pending module once its activation time has passed.
    /// Disputes opened under the old module remain resolvable by the new one.
    pub async fn execute_dispute_module_update(&self, caller: AccountId) -> Result<()> {
        self.guard.ensure_clear()?;
        let mut state = self.admin.write().await;
        if caller != state.admin {
            return Err(AgoraError::not_authorized(
                "only the admin may execute the update",
            ));
        }
        let pending = state
            .pending_module
            .as_ref()
            .ok_or(AgoraError::NoPendingUpdate)?;
        let now = self.clock.now();
        if now < pending.activation_at {
            return Err(AgoraError::UpdateNotReady {
                activation_at: pending.activation_at,
                now,
            });
        }

        let pending = state.pending_module.take().ok_or(AgoraError::NoPendingUpdate)?;
        let previous = state.module.as_ref().map(|m| m.address.clone());
        state.module = Some(InstalledModule {
            address: pending.address.clone(),
            gateway: pending.gateway,
        });
        drop(state);

        warn!(module = %pending.address, "dispute module updated");
        self.emit(MarketEvent::DisputeModuleUpdated {
            previous,
            new_module: pending.address,
        })
        .await;
        Ok(())
    }
}
