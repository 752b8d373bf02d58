//! Agora Token - Fungible payment token collaborator
//!
//! The market consumes tokens through the [`TokenLedger`] seam: exact-amount
//! transfer semantics with explicit failures. [`InMemoryTokenLedger`] is the
//! standard implementation; [`FeeOnTransferLedger`] wraps it to skim a fee on
//! every transfer, existing solely so the market's deposit delta check can be
//! shown to reject such tokens deterministically.
//!
//! # Invariants
//!
//! 1. No negative balances
//! 2. Transfers either move exactly the requested amount or fail
//! 3. Pulling from a third party spends allowance

use std::collections::HashMap;
use std::sync::Arc;

use agora_types::{AccountId, AgoraError, Amount, Result, TokenId};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

/// The transfer surface the market relies on.
///
/// Zero-amount transfers succeed as no-ops; all other failures are explicit.
#[async_trait]
pub trait TokenLedger: Send + Sync {
    /// Balance of `account` in `token`
    async fn balance_of(&self, token: &TokenId, account: &AccountId) -> Amount;

    /// Move `amount` from `caller` to `to`
    async fn transfer(
        &self,
        caller: &AccountId,
        to: &AccountId,
        token: &TokenId,
        amount: Amount,
    ) -> Result<()>;

    /// Move `amount` from `owner` to `to`, spending `caller`'s allowance
    async fn transfer_from(
        &self,
        caller: &AccountId,
        owner: &AccountId,
        to: &AccountId,
        token: &TokenId,
        amount: Amount,
    ) -> Result<()>;
}

/// In-memory multi-token ledger with ERC-20-shaped allowances.
pub struct InMemoryTokenLedger {
    /// token → account → balance
    balances: Arc<RwLock<HashMap<TokenId, HashMap<AccountId, Amount>>>>,
    /// token → (owner, spender) → allowance
    allowances: Arc<RwLock<HashMap<TokenId, HashMap<(AccountId, AccountId), Amount>>>>,
}

impl InMemoryTokenLedger {
    pub fn new() -> Self {
        Self {
            balances: Arc::new(RwLock::new(HashMap::new())),
            allowances: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Credit `amount` of `token` to `to` out of thin air (issuer operation)
    pub async fn mint(&self, token: &TokenId, to: &AccountId, amount: Amount) -> Result<()> {
        let mut balances = self.balances.write().await;
        let account_balances = balances.entry(token.clone()).or_default();
        let balance = account_balances.entry(to.clone()).or_default();
        *balance = balance.checked_add(amount)?;
        info!(%token, account = %to, %amount, "minted");
        Ok(())
    }

    /// Destroy `amount` of `token` held by `from`
    pub async fn burn(&self, token: &TokenId, from: &AccountId, amount: Amount) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        let mut balances = self.balances.write().await;
        let account_balances = balances.entry(token.clone()).or_default();
        let balance = account_balances.entry(from.clone()).or_default();
        if *balance < amount {
            return Err(AgoraError::InsufficientBalance {
                token: token.clone(),
                requested: amount,
                available: *balance,
            });
        }
        *balance = balance.checked_sub(amount)?;
        Ok(())
    }

    /// Let `spender` pull up to `amount` of `token` from `owner`
    pub async fn approve(
        &self,
        owner: &AccountId,
        spender: &AccountId,
        token: &TokenId,
        amount: Amount,
    ) -> Result<()> {
        let mut allowances = self.allowances.write().await;
        allowances
            .entry(token.clone())
            .or_default()
            .insert((owner.clone(), spender.clone()), amount);
        Ok(())
    }

    /// Remaining allowance for `(owner, spender)` in `token`
    pub async fn allowance(
        &self,
        owner: &AccountId,
        spender: &AccountId,
        token: &TokenId,
    ) -> Amount {
        self.allowances
            .read()
            .await
            .get(token)
            .and_then(|m| m.get(&(owner.clone(), spender.clone())))
            .copied()
            .unwrap_or(Amount::ZERO)
    }

    async fn move_balance(
        &self,
        token: &TokenId,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        let mut balances = self.balances.write().await;
        let account_balances = balances.entry(token.clone()).or_default();

        let from_balance = account_balances.get(from).copied().unwrap_or(Amount::ZERO);
        if from_balance < amount {
            return Err(AgoraError::InsufficientBalance {
                token: token.clone(),
                requested: amount,
                available: from_balance,
            });
        }

        account_balances.insert(from.clone(), from_balance.checked_sub(amount)?);
        let to_balance = account_balances.entry(to.clone()).or_default();
        *to_balance = to_balance.checked_add(amount)?;
        Ok(())
    }
}

impl Default for InMemoryTokenLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenLedger for InMemoryTokenLedger {
    async fn balance_of(&self, token: &TokenId, account: &AccountId) -> Amount {
        self.balances
            .read()
            .await
            .get(token)
            .and_then(|m| m.get(account))
            .copied()
            .unwrap_or(Amount::ZERO)
    }

    async fn transfer(
        &self,
        caller: &AccountId,
        to: &AccountId,
        token: &TokenId,
        amount: Amount,
    ) -> Result<()> {
        self.move_balance(token, caller, to, amount).await
    }

    async fn transfer_from(
        &self,
        caller: &AccountId,
        owner: &AccountId,
        to: &AccountId,
        token: &TokenId,
        amount: Amount,
    ) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }

        // Spend allowance before moving the balance
        {
            let mut allowances = self.allowances.write().await;
            let token_allowances = allowances.entry(token.clone()).or_default();
            let key = (owner.clone(), caller.clone());
            let allowed = token_allowances.get(&key).copied().unwrap_or(Amount::ZERO);
            if allowed < amount {
                return Err(AgoraError::InsufficientAllowance {
                    token: token.clone(),
                    requested: amount,
                    allowed,
                });
            }
            token_allowances.insert(key, allowed.checked_sub(amount)?);
        }

        self.move_balance(token, owner, to, amount).await
    }
}

/// A misbehaving token that delivers less than it debits.
///
/// Transfers move the full amount out of the payer but burn `fee_bps` of it
/// before it reaches the recipient.
pub struct FeeOnTransferLedger {
    inner: Arc<InMemoryTokenLedger>,
    fee_bps: u16,
}

impl FeeOnTransferLedger {
    pub fn new(inner: Arc<InMemoryTokenLedger>, fee_bps: u16) -> Self {
        Self { inner, fee_bps }
    }

    /// The wrapped ledger, for minting and approvals in tests
    pub fn inner(&self) -> &Arc<InMemoryTokenLedger> {
        &self.inner
    }
}

#[async_trait]
impl TokenLedger for FeeOnTransferLedger {
    async fn balance_of(&self, token: &TokenId, account: &AccountId) -> Amount {
        self.inner.balance_of(token, account).await
    }

    async fn transfer(
        &self,
        caller: &AccountId,
        to: &AccountId,
        token: &TokenId,
        amount: Amount,
    ) -> Result<()> {
        self.inner.transfer(caller, to, token, amount).await?;
        let fee = amount.bps(self.fee_bps)?;
        self.inner.burn(token, to, fee).await
    }

    async fn transfer_from(
        &self,
        caller: &AccountId,
        owner: &AccountId,
        to: &AccountId,
        token: &TokenId,
        amount: Amount,
    ) -> Result<()> {
        self.inner
            .transfer_from(caller, owner, to, token, amount)
            .await?;
        let fee = amount.bps(self.fee_bps)?;
        self.inner.burn(token, to, fee).await
    }
}
