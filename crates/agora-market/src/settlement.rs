//! Settlement accounting
//!
//! Terminal transitions settle through one table: compute the buyer's share
//! of escrow and bond for the settlement path, give the rest of the escrow to
//! the seller and the rest of the bond back to its funder. All division is
//! floor division; the residue of an odd split accrues to the seller.

use agora_types::{AgoraError, Amount, Result, SettlementPath};

/// The four payout figures of one settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementSplit {
    pub buyer_escrow_payout: Amount,
    pub buyer_bond_payout: Amount,
    pub seller_escrow_payout: Amount,
    pub seller_bond_refund: Amount,
}

impl SettlementSplit {
    /// Combined amount the buyer receives
    pub fn buyer_total(&self) -> Result<Amount> {
        self.buyer_escrow_payout.checked_add(self.buyer_bond_payout)
    }
}

/// Deterministic multi-way payout for a settlement path.
///
/// Both buyer payouts are bounded by their source pools; everything not paid
/// to the buyer returns to the seller side (escrow to the seller snapshot,
/// bond to its funder).
pub fn settlement_payouts(
    funded: Amount,
    bond: Amount,
    path: SettlementPath,
) -> Result<SettlementSplit> {
    let (buyer_escrow_payout, buyer_bond_payout) = match path {
        SettlementPath::Accepted
        | SettlementPath::Timeout
        | SettlementPath::PostDisputeTimeout
        | SettlementPath::DisputeSellerWins => (Amount::ZERO, Amount::ZERO),
        SettlementPath::DisputeBuyerWins => (funded, bond),
        SettlementPath::DisputeSplit => (funded.half(), Amount::ZERO),
        SettlementPath::DisputeCancel => (funded, Amount::ZERO),
    };

    if buyer_escrow_payout > funded {
        return Err(AgoraError::PayoutExceedsPool {
            requested: buyer_escrow_payout,
            pool: funded,
        });
    }
    if buyer_bond_payout > bond {
        return Err(AgoraError::PayoutExceedsPool {
            requested: buyer_bond_payout,
            pool: bond,
        });
    }

    Ok(SettlementSplit {
        buyer_escrow_payout,
        buyer_bond_payout,
        seller_escrow_payout: funded.checked_sub(buyer_escrow_payout)?,
        seller_bond_refund: bond.checked_sub(buyer_bond_payout)?,
    })
}
