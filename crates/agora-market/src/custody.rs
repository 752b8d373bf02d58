//! Token custody discipline
//!
//! All inbound deposits go through one primitive: record the market balance,
//! pull, record again, and require the delta to equal the requested amount.
//! This is the only place fee-on-transfer rejection lives. Outbound payouts
//! skip zero amounts. A market-wide in-flight flag rejects any mutating call
//! that re-enters while a transfer is running.

use std::sync::atomic::{AtomicBool, Ordering};

use agora_token::TokenLedger;
use agora_types::{AccountId, AgoraError, Amount, Result, TokenId};

/// Re-entrance guard shared by all custody transitions.
pub(crate) struct TransferGuard {
    in_flight: AtomicBool,
}

impl TransferGuard {
    pub(crate) fn new() -> Self {
        Self {
            in_flight: AtomicBool::new(false),
        }
    }

    /// Reject a mutating entry while a transfer is in flight.
    pub(crate) fn ensure_clear(&self) -> Result<()> {
        if self.in_flight.load(Ordering::SeqCst) {
            return Err(AgoraError::ReentrantCall);
        }
        Ok(())
    }

    /// Mark a transfer in flight for the lifetime of the returned scope.
    pub(crate) fn begin(&self) -> Result<TransferScope<'_>> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AgoraError::ReentrantCall);
        }
        Ok(TransferScope { guard: self })
    }
}

pub(crate) struct TransferScope<'a> {
    guard: &'a TransferGuard,
}

impl Drop for TransferScope<'_> {
    fn drop(&mut self) {
        self.guard.in_flight.store(false, Ordering::SeqCst);
    }
}

/// Pull exactly `amount` of `token_id` from `from` into market custody.
///
/// On a delta mismatch the received tokens go back to the payer and the call
/// fails: the emulation of the substrate's whole-call revert.
pub(crate) async fn pull_exact(
    token: &dyn TokenLedger,
    token_id: &TokenId,
    from: &AccountId,
    market: &AccountId,
    amount: Amount,
) -> Result<()> {
    let before = token.balance_of(token_id, market).await;
    token
        .transfer_from(market, from, market, token_id, amount)
        .await?;
    let after = token.balance_of(token_id, market).await;

    let received = after.checked_sub(before)?;
    if received != amount {
        token.transfer(market, from, token_id, received).await?;
        return Err(AgoraError::DepositMismatch {
            requested: amount,
            received,
        });
    }
    Ok(())
}

/// Pay `amount` out of market custody; zero amounts are skipped.
pub(crate) async fn push(
    token: &dyn TokenLedger,
    token_id: &TokenId,
    market: &AccountId,
    to: &AccountId,
    amount: Amount,
) -> Result<()> {
    if amount.is_zero() {
        return Ok(());
    }
    token.transfer(market, to, token_id, amount).await
}
