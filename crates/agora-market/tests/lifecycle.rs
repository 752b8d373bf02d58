//! End-to-end lifecycle tests for the task market: funding, delivery,
//! settlement, cancellation, window boundaries and custody conservation.

use std::sync::Arc;

use agora_identity::AgentRegistry;
use agora_listings::ListingRegistry;
use agora_market::{DisputeGateway, MarketConfig, TaskMarket};
use agora_token::{FeeOnTransferLedger, InMemoryTokenLedger, TokenLedger};
use agora_types::{
    AccountId, AgentId, AgoraError, Amount, Clock, ListingId, ManualClock, MarketEvent, Policy,
    Pricing, Result, SettlementPath, TaskId, TaskStatus, TokenId, UnitType, Uri,
};
use async_trait::async_trait;

const START: u64 = 1_700_000_000;

struct World {
    clock: Arc<ManualClock>,
    token: Arc<InMemoryTokenLedger>,
    identity: Arc<AgentRegistry>,
    listings: Arc<ListingRegistry>,
    market: Arc<TaskMarket>,
    token_id: TokenId,
    admin: AccountId,
    owner: AccountId,
    buyer: AccountId,
    agent: AgentId,
}

fn uri(s: &str) -> Uri {
    Uri::parse(s).unwrap()
}

fn pricing(base: u128, unit: u128, min: u64, max: u64, quote_required: bool) -> Pricing {
    Pricing {
        payment_token: TokenId::from_symbol("T"),
        base_price: Amount(base),
        unit_type: UnitType::from_label("request").unwrap(),
        unit_price: Amount(unit),
        min_units: min,
        max_units: max,
        quote_required,
    }
}

fn policy(challenge: u64, post_dispute: u64, delivery: u64, bond_bps: u16) -> Policy {
    Policy {
        challenge_window_secs: challenge,
        post_dispute_window_secs: post_dispute,
        delivery_window_secs: delivery,
        seller_bond_bps: bond_bps,
    }
}

async fn setup_with_ledger(
    inner: Arc<InMemoryTokenLedger>,
    market_token: Arc<dyn TokenLedger>,
) -> World {
    let clock = Arc::new(ManualClock::new(START));
    let identity = Arc::new(AgentRegistry::new());
    let listings = Arc::new(ListingRegistry::new(identity.clone()));

    let admin = AccountId::new();
    let market = Arc::new(TaskMarket::new(
        AccountId::new(),
        admin.clone(),
        identity.clone(),
        listings.clone(),
        market_token,
        clock.clone(),
        MarketConfig::default(),
    ));

    let token_id = TokenId::from_symbol("T");
    let owner = AccountId::new();
    let buyer = AccountId::new();
    let agent = identity
        .register_agent(owner.clone(), uri("ipfs://agent"))
        .await
        .unwrap();

    inner.mint(&token_id, &buyer, Amount(10_000)).await.unwrap();
    inner
        .approve(&buyer, market.address(), &token_id, Amount(10_000))
        .await
        .unwrap();
    inner.mint(&token_id, &owner, Amount(1_000)).await.unwrap();
    inner
        .approve(&owner, market.address(), &token_id, Amount(1_000))
        .await
        .unwrap();

    World {
        clock,
        token: inner,
        identity,
        listings,
        market,
        token_id,
        admin,
        owner,
        buyer,
        agent,
    }
}

async fn setup() -> World {
    let token = Arc::new(InMemoryTokenLedger::new());
    setup_with_ledger(token.clone(), token).await
}

impl World {
    async fn listing(&self, pricing: Pricing, policy: Policy) -> ListingId {
        self.listings
            .create_listing(&self.owner, self.agent, uri("ipfs://listing"), pricing, policy)
            .await
            .unwrap()
    }

    async fn balance(&self, account: &AccountId) -> Amount {
        self.token.balance_of(&self.token_id, account).await
    }

    async fn market_balance(&self) -> Amount {
        self.balance(self.market.address()).await
    }

    /// Post, quote, fund and activate a task; returns its id.
    async fn activated_task(&self, listing: ListingId, units: u64, total: u128) -> TaskId {
        let task = self
            .market
            .post_task(self.buyer.clone(), listing, uri("ipfs://task"), units)
            .await
            .unwrap();
        self.market
            .propose_quote(self.owner.clone(), task, units, Amount(total), 0)
            .await
            .unwrap();
        self.market
            .fund_task(self.buyer.clone(), task, Amount(total))
            .await
            .unwrap();
        self.market
            .accept_quote(self.buyer.clone(), task)
            .await
            .unwrap();
        task
    }
}

// ============================================================================
// End-to-end scenarios
// ============================================================================

#[tokio::test]
async fn happy_path_with_quote() {
    let w = setup().await;
    let listing = w
        .listing(pricing(100, 10, 1, 10, true), policy(3600, 0, 7200, 0))
        .await;

    let task = w
        .market
        .post_task(w.buyer.clone(), listing, uri("ipfs://task"), 4)
        .await
        .unwrap();
    w.market
        .propose_quote(w.owner.clone(), task, 4, Amount(140), w.clock.now() + 3600)
        .await
        .unwrap();
    w.market
        .fund_task(w.buyer.clone(), task, Amount(140))
        .await
        .unwrap();
    assert_eq!(w.market_balance().await, Amount(140));

    w.market.accept_quote(w.buyer.clone(), task).await.unwrap();
    w.market
        .submit_deliverable(w.owner.clone(), task, uri("ipfs://artifact"), [7u8; 32])
        .await
        .unwrap();
    w.market
        .accept_submission(w.buyer.clone(), task)
        .await
        .unwrap();

    assert_eq!(w.balance(&w.buyer).await, Amount(9_860));
    assert_eq!(w.balance(&w.owner).await, Amount(1_140));
    assert_eq!(w.market_balance().await, Amount::ZERO);

    let record = w.market.get_task(task).await.unwrap();
    assert_eq!(record.status, TaskStatus::Settled);
    assert!(record.settled);
    assert_eq!(record.seller, Some(w.owner.clone()));

    // both settlement shapes land in the log, in order
    let events = w.market.events().await;
    assert!(events
        .iter()
        .enumerate()
        .all(|(i, r)| r.seq == i as u64));
    assert!(events.iter().any(|r| matches!(
        &r.event,
        MarketEvent::TaskSettled {
            buyer_payout: Amount(0),
            ..
        }
    )));
    assert!(events.iter().any(|r| matches!(
        &r.event,
        MarketEvent::TaskSettledV2 {
            path: SettlementPath::Accepted,
            seller_escrow_payout: Amount(140),
            ..
        }
    )));
}

#[tokio::test]
async fn silent_timeout_settles_to_seller() {
    let w = setup().await;
    let listing = w
        .listing(pricing(100, 10, 1, 10, false), policy(3600, 0, 7200, 0))
        .await;

    let task = w
        .market
        .post_task(w.buyer.clone(), listing, uri("ipfs://task"), 1)
        .await
        .unwrap();
    w.market.accept_task(w.owner.clone(), task).await.unwrap();

    let record = w.market.get_task(task).await.unwrap();
    assert_eq!(record.quoted_total_price, Amount(110));

    w.market
        .fund_task(w.buyer.clone(), task, Amount(110))
        .await
        .unwrap();
    w.market.accept_quote(w.buyer.clone(), task).await.unwrap();
    w.market
        .submit_deliverable(w.owner.clone(), task, uri("ipfs://artifact"), [1u8; 32])
        .await
        .unwrap();

    w.clock.advance(3601);
    let third_party = AccountId::new();
    w.market
        .settle_after_timeout(third_party, task)
        .await
        .unwrap();

    assert_eq!(w.balance(&w.owner).await, Amount(1_110));
    assert_eq!(w.balance(&w.buyer).await, Amount(9_890));
    assert_eq!(w.market_balance().await, Amount::ZERO);
    assert!(w.market.events().await.iter().any(|r| matches!(
        &r.event,
        MarketEvent::TaskSettledV2 {
            path: SettlementPath::Timeout,
            ..
        }
    )));
}

#[tokio::test]
async fn nft_transfer_mid_task_does_not_redirect() {
    let w = setup().await;
    let listing = w
        .listing(pricing(100, 10, 1, 10, true), policy(3600, 0, 7200, 0))
        .await;
    let task = w.activated_task(listing, 4, 140).await;

    // the agent changes hands after activation
    let new_owner = AccountId::new();
    w.identity
        .transfer_agent(&w.owner, w.agent, new_owner.clone())
        .await
        .unwrap();

    // the new owner is agent-authorized but not the snapshotted seller
    let result = w
        .market
        .submit_deliverable(new_owner.clone(), task, uri("ipfs://fake"), [0u8; 32])
        .await;
    assert!(matches!(result, Err(AgoraError::NotAuthorized { .. })));

    // the original seller still delivers and gets paid
    w.market
        .submit_deliverable(w.owner.clone(), task, uri("ipfs://artifact"), [2u8; 32])
        .await
        .unwrap();
    w.market
        .accept_submission(w.buyer.clone(), task)
        .await
        .unwrap();

    assert_eq!(w.balance(&w.owner).await, Amount(1_140));
    assert_eq!(w.balance(&new_owner).await, Amount::ZERO);
    assert_eq!(w.market_balance().await, Amount::ZERO);
}

// ============================================================================
// Cancellation laws
// ============================================================================

#[tokio::test]
async fn pre_activation_cancel_refunds_exactly() {
    let w = setup().await;
    let listing = w
        .listing(pricing(100, 10, 1, 10, true), policy(3600, 0, 7200, 5000))
        .await;

    let task = w
        .market
        .post_task(w.buyer.clone(), listing, uri("ipfs://task"), 2)
        .await
        .unwrap();
    w.market
        .propose_quote(w.owner.clone(), task, 2, Amount(120), 0)
        .await
        .unwrap();
    w.market
        .fund_seller_bond(w.owner.clone(), task, Amount(60))
        .await
        .unwrap();
    w.market
        .fund_task(w.buyer.clone(), task, Amount(120))
        .await
        .unwrap();
    assert_eq!(w.market_balance().await, Amount(180));

    w.market.cancel_task(w.buyer.clone(), task).await.unwrap();

    // escrow back to the buyer, bond back to its funder, market untouched
    assert_eq!(w.balance(&w.buyer).await, Amount(10_000));
    assert_eq!(w.balance(&w.owner).await, Amount(1_000));
    assert_eq!(w.market_balance().await, Amount::ZERO);

    let record = w.market.get_task(task).await.unwrap();
    assert_eq!(record.status, TaskStatus::Cancelled);
    assert!(!record.settled);
}

#[tokio::test]
async fn seller_cancel_quote_refunds_bond_and_zeroes_quote() {
    let w = setup().await;
    let listing = w
        .listing(pricing(100, 10, 1, 10, true), policy(3600, 0, 7200, 5000))
        .await;

    let task = w
        .market
        .post_task(w.buyer.clone(), listing, uri("ipfs://task"), 2)
        .await
        .unwrap();
    w.market
        .propose_quote(w.owner.clone(), task, 2, Amount(120), 0)
        .await
        .unwrap();
    w.market
        .fund_seller_bond(w.owner.clone(), task, Amount(60))
        .await
        .unwrap();

    w.market
        .seller_cancel_quote(w.owner.clone(), task)
        .await
        .unwrap();

    assert_eq!(w.balance(&w.owner).await, Amount(1_000));
    assert_eq!(w.market_balance().await, Amount::ZERO);

    let record = w.market.get_task(task).await.unwrap();
    assert_eq!(record.status, TaskStatus::Cancelled);
    assert_eq!(record.quoted_units, 0);
    assert_eq!(record.quoted_total_price, Amount::ZERO);
    assert_eq!(record.quote_expiry, 0);
    assert!(w.market.events().await.iter().any(|r| matches!(
        &r.event,
        MarketEvent::SellerCancelledQuote {
            bond_refund: Amount(60),
            ..
        }
    )));
}

#[tokio::test]
async fn seller_cannot_cancel_funded_quote() {
    let w = setup().await;
    let listing = w
        .listing(pricing(100, 10, 1, 10, true), policy(3600, 0, 7200, 0))
        .await;
    let task = w
        .market
        .post_task(w.buyer.clone(), listing, uri("ipfs://task"), 1)
        .await
        .unwrap();
    w.market
        .propose_quote(w.owner.clone(), task, 1, Amount(110), 0)
        .await
        .unwrap();
    w.market
        .fund_task(w.buyer.clone(), task, Amount(110))
        .await
        .unwrap();

    let result = w.market.seller_cancel_quote(w.owner.clone(), task).await;
    assert!(matches!(result, Err(AgoraError::AlreadyFunded { .. })));
}

#[tokio::test]
async fn non_delivery_cancel_claims_escrow_and_bond() {
    let w = setup().await;
    let listing = w
        .listing(pricing(100, 10, 1, 10, true), policy(3600, 0, 7200, 2500))
        .await;

    let task = w
        .market
        .post_task(w.buyer.clone(), listing, uri("ipfs://task"), 2)
        .await
        .unwrap();
    w.market
        .propose_quote(w.owner.clone(), task, 2, Amount(120), 0)
        .await
        .unwrap();
    w.market
        .fund_seller_bond(w.owner.clone(), task, Amount(30))
        .await
        .unwrap();
    w.market
        .fund_task(w.buyer.clone(), task, Amount(120))
        .await
        .unwrap();
    w.market.accept_quote(w.buyer.clone(), task).await.unwrap();

    // too early
    let result = w.market.cancel_for_non_delivery(w.buyer.clone(), task).await;
    assert!(matches!(
        result,
        Err(AgoraError::DeliveryWindowStillOpen { .. })
    ));

    // enabled exactly at the deadline
    w.clock.advance(7200);
    w.market
        .cancel_for_non_delivery(w.buyer.clone(), task)
        .await
        .unwrap();

    // buyer takes escrow and bond; the bond funder eats the penalty
    assert_eq!(w.balance(&w.buyer).await, Amount(10_030));
    assert_eq!(w.balance(&w.owner).await, Amount(970));
    assert_eq!(w.market_balance().await, Amount::ZERO);

    let record = w.market.get_task(task).await.unwrap();
    assert_eq!(record.status, TaskStatus::Cancelled);
    assert!(record.settled);
    assert!(w.market.events().await.iter().any(|r| matches!(
        &r.event,
        MarketEvent::TaskCancelledForNonDelivery {
            escrow_refund: Amount(120),
            seller_bond_penalty: Amount(30),
            ..
        }
    )));
}

// ============================================================================
// Window boundaries
// ============================================================================

#[tokio::test]
async fn funding_boundary_at_quote_expiry() {
    let w = setup().await;
    let listing = w
        .listing(pricing(100, 10, 1, 10, true), policy(3600, 0, 7200, 0))
        .await;

    let expiry = START + 600;
    let task = w
        .market
        .post_task(w.buyer.clone(), listing, uri("ipfs://task"), 1)
        .await
        .unwrap();
    w.market
        .propose_quote(w.owner.clone(), task, 1, Amount(110), expiry)
        .await
        .unwrap();

    // funding exactly at the expiry instant succeeds
    w.clock.set(expiry);
    w.market
        .fund_task(w.buyer.clone(), task, Amount(110))
        .await
        .unwrap();

    // acceptance carries no expiry check of its own
    w.clock.set(expiry + 500);
    w.market.accept_quote(w.buyer.clone(), task).await.unwrap();

    // a second task funded one second past expiry fails
    let late = w
        .market
        .post_task(w.buyer.clone(), listing, uri("ipfs://task2"), 1)
        .await
        .unwrap();
    w.market
        .propose_quote(w.owner.clone(), late, 1, Amount(110), expiry + 1000)
        .await
        .unwrap();
    w.clock.set(expiry + 1001);
    let result = w.market.fund_task(w.buyer.clone(), late, Amount(110)).await;
    assert!(matches!(result, Err(AgoraError::QuoteExpired { .. })));
}

#[tokio::test]
async fn delivery_boundary_flips_to_non_delivery() {
    let w = setup().await;
    let listing = w
        .listing(pricing(100, 10, 1, 10, true), policy(3600, 0, 7200, 0))
        .await;
    let task = w.activated_task(listing, 1, 110).await;

    // submission is blocked exactly at the deadline
    w.clock.advance(7200);
    let result = w
        .market
        .submit_deliverable(w.owner.clone(), task, uri("ipfs://late"), [3u8; 32])
        .await;
    assert!(matches!(result, Err(AgoraError::DeliveryWindowClosed { .. })));

    // while non-delivery cancellation is enabled at the same instant
    w.market
        .cancel_for_non_delivery(w.buyer.clone(), task)
        .await
        .unwrap();
    assert_eq!(w.balance(&w.buyer).await, Amount(10_000));
}

#[tokio::test]
async fn challenge_boundary_enables_timeout_settlement() {
    let w = setup().await;
    let listing = w
        .listing(pricing(100, 10, 1, 10, true), policy(3600, 0, 7200, 0))
        .await;
    let task = w.activated_task(listing, 1, 110).await;
    w.market
        .submit_deliverable(w.owner.clone(), task, uri("ipfs://artifact"), [4u8; 32])
        .await
        .unwrap();

    // one second early: still the buyer's window
    w.clock.advance(3599);
    let result = w
        .market
        .settle_after_timeout(AccountId::new(), task)
        .await;
    assert!(matches!(
        result,
        Err(AgoraError::ChallengeWindowStillOpen { .. })
    ));

    // exactly at the boundary: permissionless settlement
    w.clock.advance(1);
    w.market
        .settle_after_timeout(AccountId::new(), task)
        .await
        .unwrap();
    assert_eq!(w.balance(&w.owner).await, Amount(1_110));
}

#[tokio::test]
async fn zero_price_task_settles_with_zero_transfers() {
    let w = setup().await;
    let listing = w
        .listing(pricing(0, 0, 1, 10, false), policy(3600, 0, 7200, 0))
        .await;

    let task = w
        .market
        .post_task(w.buyer.clone(), listing, uri("ipfs://task"), 1)
        .await
        .unwrap();
    w.market.accept_task(w.owner.clone(), task).await.unwrap();
    w.market
        .fund_task(w.buyer.clone(), task, Amount::ZERO)
        .await
        .unwrap();
    w.market.accept_quote(w.buyer.clone(), task).await.unwrap();
    w.market
        .submit_deliverable(w.owner.clone(), task, uri("ipfs://artifact"), [5u8; 32])
        .await
        .unwrap();
    w.market
        .accept_submission(w.buyer.clone(), task)
        .await
        .unwrap();

    let record = w.market.get_task(task).await.unwrap();
    assert!(record.settled);
    assert_eq!(record.funded_amount, Amount::ZERO);
    assert_eq!(w.balance(&w.buyer).await, Amount(10_000));
    assert_eq!(w.balance(&w.owner).await, Amount(1_000));
    assert_eq!(w.market_balance().await, Amount::ZERO);
}

// ============================================================================
// Custody discipline
// ============================================================================

#[tokio::test]
async fn fee_on_transfer_deposit_is_rejected() {
    let inner = Arc::new(InMemoryTokenLedger::new());
    let skimming = Arc::new(FeeOnTransferLedger::new(inner.clone(), 100)); // 1%
    let w = setup_with_ledger(inner, skimming).await;

    let listing = w
        .listing(pricing(100, 10, 1, 10, true), policy(3600, 0, 7200, 0))
        .await;
    let task = w
        .market
        .post_task(w.buyer.clone(), listing, uri("ipfs://task"), 4)
        .await
        .unwrap();
    w.market
        .propose_quote(w.owner.clone(), task, 4, Amount(140), 0)
        .await
        .unwrap();

    let result = w.market.fund_task(w.buyer.clone(), task, Amount(140)).await;
    assert!(matches!(result, Err(AgoraError::DepositMismatch { .. })));

    // nothing sticks to the market and the task stays unfunded
    assert_eq!(w.market_balance().await, Amount::ZERO);
    let record = w.market.get_task(task).await.unwrap();
    assert!(!record.funded);
    assert_eq!(record.funded_amount, Amount::ZERO);
}

/// A token that re-enters the market from inside a transfer.
struct ReentrantToken {
    inner: Arc<InMemoryTokenLedger>,
    market: std::sync::OnceLock<Arc<TaskMarket>>,
    victim: std::sync::OnceLock<(AccountId, TaskId)>,
    observed: tokio::sync::Mutex<Option<AgoraError>>,
}

#[async_trait]
impl agora_token::TokenLedger for ReentrantToken {
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
        self.inner.transfer(caller, to, token, amount).await
    }

    async fn transfer_from(
        &self,
        caller: &AccountId,
        owner: &AccountId,
        to: &AccountId,
        token: &TokenId,
        amount: Amount,
    ) -> Result<()> {
        if let (Some(market), Some((buyer, task))) = (self.market.get(), self.victim.get()) {
            let attempt = market.cancel_task(buyer.clone(), *task).await;
            if let Err(err) = attempt {
                *self.observed.lock().await = Some(err);
            }
        }
        self.inner
            .transfer_from(caller, owner, to, token, amount)
            .await
    }
}

#[tokio::test]
async fn reentrant_call_during_transfer_is_rejected() {
    let inner = Arc::new(InMemoryTokenLedger::new());
    let token = Arc::new(ReentrantToken {
        inner: inner.clone(),
        market: std::sync::OnceLock::new(),
        victim: std::sync::OnceLock::new(),
        observed: tokio::sync::Mutex::new(None),
    });
    let w = setup_with_ledger(inner, token.clone()).await;
    token.market.set(w.market.clone()).ok();

    let listing = w
        .listing(pricing(100, 10, 1, 10, true), policy(3600, 0, 7200, 0))
        .await;
    let task = w
        .market
        .post_task(w.buyer.clone(), listing, uri("ipfs://task"), 4)
        .await
        .unwrap();
    w.market
        .propose_quote(w.owner.clone(), task, 4, Amount(140), 0)
        .await
        .unwrap();
    token.victim.set((w.buyer.clone(), task)).ok();

    // the deposit itself succeeds; the nested mutating call does not
    w.market
        .fund_task(w.buyer.clone(), task, Amount(140))
        .await
        .unwrap();
    let observed = token.observed.lock().await.clone();
    assert!(matches!(observed, Some(AgoraError::ReentrantCall)));
    assert_eq!(w.market_balance().await, Amount(140));
}

// ============================================================================
// Precondition coverage
// ============================================================================

#[tokio::test]
async fn posting_validates_listing_and_units() {
    let w = setup().await;
    let listing = w
        .listing(pricing(100, 10, 2, 5, true), policy(3600, 0, 7200, 0))
        .await;

    let result = w
        .market
        .post_task(w.buyer.clone(), listing, uri("ipfs://task"), 6)
        .await;
    assert!(matches!(result, Err(AgoraError::UnitsOutOfRange { .. })));

    w.listings
        .update_listing(&w.owner, listing, uri("ipfs://listing"), false)
        .await
        .unwrap();
    let result = w
        .market
        .post_task(w.buyer.clone(), listing, uri("ipfs://task"), 3)
        .await;
    assert!(matches!(result, Err(AgoraError::ListingInactive { .. })));

    let result = w
        .market
        .post_task(w.buyer.clone(), ListingId(99), uri("ipfs://task"), 3)
        .await;
    assert!(matches!(result, Err(AgoraError::UnknownListing { .. })));
}

#[tokio::test]
async fn quoting_requires_authorization_and_open_status() {
    let w = setup().await;
    let listing = w
        .listing(pricing(100, 10, 1, 10, true), policy(3600, 0, 7200, 0))
        .await;
    let task = w
        .market
        .post_task(w.buyer.clone(), listing, uri("ipfs://task"), 4)
        .await
        .unwrap();

    let stranger = AccountId::new();
    let result = w
        .market
        .propose_quote(stranger, task, 4, Amount(140), 0)
        .await;
    assert!(matches!(result, Err(AgoraError::NotAuthorized { .. })));

    // implicit acceptance is off for quote-required listings
    let result = w.market.accept_task(w.owner.clone(), task).await;
    assert!(matches!(result, Err(AgoraError::QuoteRequired { .. })));

    w.market
        .propose_quote(w.owner.clone(), task, 4, Amount(140), 0)
        .await
        .unwrap();
    let result = w
        .market
        .propose_quote(w.owner.clone(), task, 4, Amount(140), 0)
        .await;
    assert!(matches!(result, Err(AgoraError::InvalidStatus { .. })));
}

#[tokio::test]
async fn funding_preconditions() {
    let w = setup().await;
    let listing = w
        .listing(pricing(100, 10, 1, 10, true), policy(3600, 0, 7200, 5000))
        .await;
    let task = w
        .market
        .post_task(w.buyer.clone(), listing, uri("ipfs://task"), 2)
        .await
        .unwrap();
    w.market
        .propose_quote(w.owner.clone(), task, 2, Amount(120), 0)
        .await
        .unwrap();

    // bond must land before escrow
    let result = w.market.fund_task(w.buyer.clone(), task, Amount(120)).await;
    assert!(matches!(result, Err(AgoraError::BondNotFunded { .. })));

    // bond amount must match exactly
    let result = w
        .market
        .fund_seller_bond(w.owner.clone(), task, Amount(59))
        .await;
    assert!(matches!(result, Err(AgoraError::AmountMismatch { .. })));
    w.market
        .fund_seller_bond(w.owner.clone(), task, Amount(60))
        .await
        .unwrap();
    let result = w
        .market
        .fund_seller_bond(w.owner.clone(), task, Amount(60))
        .await;
    assert!(matches!(result, Err(AgoraError::BondAlreadyFunded { .. })));

    // escrow amount must match the quote; only the buyer funds
    let result = w.market.fund_task(w.buyer.clone(), task, Amount(119)).await;
    assert!(matches!(result, Err(AgoraError::AmountMismatch { .. })));
    let result = w.market.fund_task(w.owner.clone(), task, Amount(120)).await;
    assert!(matches!(result, Err(AgoraError::NotAuthorized { .. })));

    // accepting before funding is rejected
    let result = w.market.accept_quote(w.buyer.clone(), task).await;
    assert!(matches!(result, Err(AgoraError::NotFunded { .. })));

    w.market
        .fund_task(w.buyer.clone(), task, Amount(120))
        .await
        .unwrap();
    let result = w.market.fund_task(w.buyer.clone(), task, Amount(120)).await;
    assert!(matches!(result, Err(AgoraError::AlreadyFunded { .. })));
}

#[tokio::test]
async fn bond_funding_rejected_when_not_required() {
    let w = setup().await;
    let listing = w
        .listing(pricing(100, 10, 1, 10, true), policy(3600, 0, 7200, 0))
        .await;
    let task = w
        .market
        .post_task(w.buyer.clone(), listing, uri("ipfs://task"), 2)
        .await
        .unwrap();
    w.market
        .propose_quote(w.owner.clone(), task, 2, Amount(120), 0)
        .await
        .unwrap();

    let result = w
        .market
        .fund_seller_bond(w.owner.clone(), task, Amount(1))
        .await;
    assert!(matches!(result, Err(AgoraError::BondNotRequired { .. })));
}

#[tokio::test]
async fn terminal_states_accept_no_transitions() {
    let w = setup().await;
    let listing = w
        .listing(pricing(100, 10, 1, 10, true), policy(3600, 0, 7200, 0))
        .await;
    let task = w.activated_task(listing, 1, 110).await;
    w.market
        .submit_deliverable(w.owner.clone(), task, uri("ipfs://artifact"), [6u8; 32])
        .await
        .unwrap();
    w.market
        .accept_submission(w.buyer.clone(), task)
        .await
        .unwrap();

    // double settlement and every later transition are state violations
    let result = w.market.accept_submission(w.buyer.clone(), task).await;
    assert!(matches!(result, Err(AgoraError::InvalidStatus { .. })));
    let result = w.market.settle_after_timeout(w.buyer.clone(), task).await;
    assert!(matches!(result, Err(AgoraError::InvalidStatus { .. })));
    let result = w.market.cancel_task(w.buyer.clone(), task).await;
    assert!(matches!(result, Err(AgoraError::InvalidStatus { .. })));
    let result = w
        .market
        .submit_deliverable(w.owner.clone(), task, uri("ipfs://again"), [6u8; 32])
        .await;
    assert!(matches!(result, Err(AgoraError::InvalidStatus { .. })));
}

// ============================================================================
// Administration
// ============================================================================

struct NoopGateway;

#[async_trait]
impl DisputeGateway for NoopGateway {
    async fn open_dispute(&self, _caller: AccountId, _task_id: TaskId, _uri: Uri) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn admin_handover_is_two_step() {
    let w = setup().await;
    let successor = AccountId::new();
    let stranger = AccountId::new();

    let result = w
        .market
        .propose_admin(stranger.clone(), successor.clone())
        .await;
    assert!(matches!(result, Err(AgoraError::NotAuthorized { .. })));

    w.market
        .propose_admin(w.admin.clone(), successor.clone())
        .await
        .unwrap();
    let result = w.market.accept_admin(stranger).await;
    assert!(matches!(result, Err(AgoraError::NotAuthorized { .. })));

    w.market.accept_admin(successor.clone()).await.unwrap();
    assert_eq!(w.market.admin().await, successor);
}

#[tokio::test]
async fn dispute_module_update_is_timelocked() {
    let w = setup().await;
    let first = AccountId::new();
    let second = AccountId::new();

    // first installation is immediate
    w.market
        .set_dispute_module(w.admin.clone(), first.clone(), Arc::new(NoopGateway))
        .await
        .unwrap();
    assert_eq!(w.market.dispute_module_address().await, Some(first.clone()));

    // re-installing the same address is refused
    let result = w
        .market
        .set_dispute_module(w.admin.clone(), first.clone(), Arc::new(NoopGateway))
        .await;
    assert!(matches!(result, Err(AgoraError::UnchangedModule)));

    // a different module is scheduled behind the delay
    w.market
        .set_dispute_module(w.admin.clone(), second.clone(), Arc::new(NoopGateway))
        .await
        .unwrap();
    assert_eq!(w.market.dispute_module_address().await, Some(first.clone()));
    let (pending, activation_at) = w.market.pending_dispute_module().await.unwrap();
    assert_eq!(pending, second);
    assert_eq!(activation_at, START + agora_types::DISPUTE_MODULE_UPDATE_DELAY);

    let result = w.market.execute_dispute_module_update(w.admin.clone()).await;
    assert!(matches!(result, Err(AgoraError::UpdateNotReady { .. })));

    // cancelling wipes the pending module
    w.market
        .cancel_dispute_module_update(w.admin.clone())
        .await
        .unwrap();
    let result = w.market.execute_dispute_module_update(w.admin.clone()).await;
    assert!(matches!(result, Err(AgoraError::NoPendingUpdate)));

    // schedule again and run the clock past the delay
    w.market
        .set_dispute_module(w.admin.clone(), second.clone(), Arc::new(NoopGateway))
        .await
        .unwrap();
    w.clock.advance(agora_types::DISPUTE_MODULE_UPDATE_DELAY);
    w.market
        .execute_dispute_module_update(w.admin.clone())
        .await
        .unwrap();
    assert_eq!(w.market.dispute_module_address().await, Some(second));

    let events = w.market.events().await;
    assert!(events.iter().any(|r| matches!(
        &r.event,
        MarketEvent::DisputeModuleUpdateScheduled { .. }
    )));
    assert!(events.iter().any(|r| matches!(
        &r.event,
        MarketEvent::DisputeModuleUpdateCancelled { .. }
    )));
}

#[tokio::test]
async fn dispute_requires_installed_module() {
    let w = setup().await;
    let listing = w
        .listing(pricing(100, 10, 1, 10, true), policy(3600, 0, 7200, 0))
        .await;
    let task = w.activated_task(listing, 1, 110).await;
    w.market
        .submit_deliverable(w.owner.clone(), task, uri("ipfs://artifact"), [8u8; 32])
        .await
        .unwrap();

    let result = w
        .market
        .dispute_submission(w.buyer.clone(), task, uri("ipfs://evidence"))
        .await;
    assert!(matches!(result, Err(AgoraError::DisputeModuleNotSet)));

    // nobody but the installed module may drive the dispute transitions
    let impostor = AccountId::new();
    let result = w
        .market
        .mark_disputed(impostor, task, uri("ipfs://evidence"))
        .await;
    assert!(matches!(result, Err(AgoraError::DisputeModuleNotSet)));
}
