//! Deterministic in-memory marketplace used by tests and the `--demo` mode.
//!
//! Submissions are validated the way a node simulates a call before
//! accepting it, then queued. Queued transactions are mined in submission
//! order the first time anybody waits for one of them, so two purchases of
//! the same listing submitted back to back settle as one success and one
//! revert.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use sha2::{Digest, Sha256};
use tokio::time::sleep;

use super::{MarketplaceLedger, TokenContract};
use crate::errors::{LedgerError, LedgerResult};
use crate::types::{
    Account, Listing, ListingId, PurchaseEvent, RevertReason, TokenId, TxHash, TxReceipt,
    TxStatus,
};
use crate::units::Amount;

/// Address holding tokens while they are listed.
pub const ESCROW_ADDRESS: &str = "0x000000000000000000000000000000000000e5c0";

const DEFAULT_FEE_BASIS_POINTS: u32 = 100;

#[derive(Clone)]
pub struct InMemoryMarketplace {
    state: Arc<Mutex<MarketState>>,
}

struct MarketState {
    fee_basis_points: u32,
    fee_overrides: HashMap<ListingId, Amount>,
    listings: Vec<Listing>,
    tokens: Vec<TokenRecord>,
    events: Vec<PurchaseEvent>,
    pending: VecDeque<PendingTx>,
    receipts: HashMap<TxHash, TxReceipt>,
    block_height: u64,
    nonce: u64,
    calls: usize,
    unreachable: bool,
    confirmation_delay: Option<Duration>,
    escrow: Account,
}

struct TokenRecord {
    uri: String,
    owner: Account,
}

struct PendingTx {
    hash: TxHash,
    op: PendingOp,
}

enum PendingOp {
    Purchase {
        buyer: Account,
        listing_id: ListingId,
        value: Amount,
    },
    Relist {
        seller: Account,
        listing_id: ListingId,
        price: Amount,
    },
    Mint {
        owner: Account,
        uri: String,
    },
}

impl InMemoryMarketplace {
    /// Creates an empty marketplace charging `fee_basis_points` on top of the
    /// base price of every listing.
    pub fn new(fee_basis_points: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(MarketState {
                fee_basis_points,
                fee_overrides: HashMap::new(),
                listings: Vec::new(),
                tokens: Vec::new(),
                events: Vec::new(),
                pending: VecDeque::new(),
                receipts: HashMap::new(),
                block_height: 0,
                nonce: 0,
                calls: 0,
                unreachable: false,
                confirmation_delay: None,
                escrow: Account::from_static(ESCROW_ADDRESS),
            })),
        }
    }

    pub fn escrow_account(&self) -> Account {
        self.lock().escrow.clone()
    }

    /// Mints a token referencing `uri` straight into escrow and lists it for
    /// `seller` at `base_price`.
    pub fn list_item(&self, seller: &Account, uri: &str, base_price: Amount) -> ListingId {
        let mut state = self.lock();
        let escrow = state.escrow.clone();
        state.tokens.push(TokenRecord {
            uri: uri.to_owned(),
            owner: escrow,
        });
        let token_id = state.tokens.len() as TokenId;
        state.push_listing(seller.clone(), token_id, base_price)
    }

    /// Replaces the percentage fee of one listing by a flat fee.
    pub fn set_fee_override(&self, listing_id: ListingId, fee: Amount) {
        self.lock().fee_overrides.insert(listing_id, fee);
    }

    /// Applies a purchase by another client immediately, bypassing the queue.
    pub fn record_external_purchase(
        &self,
        listing_id: ListingId,
        buyer: &Account,
    ) -> LedgerResult<()> {
        let mut state = self.lock();
        let value = state.total_price(listing_id)?;
        state.block_height += 1;
        let block_height = state.block_height;
        match state.apply_purchase(buyer, listing_id, value, block_height) {
            TxStatus::Confirmed => Ok(()),
            TxStatus::Reverted { reason } => Err(LedgerError::Rejected(reason)),
        }
    }

    /// Makes every subsequent call fail as if the node were offline.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Delays every confirmation by `delay` before mining.
    pub fn set_confirmation_delay(&self, delay: Option<Duration>) {
        self.lock().confirmation_delay = delay;
    }

    /// Number of trait calls served so far, including failed ones.
    pub fn call_count(&self) -> usize {
        self.lock().calls
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn listing_snapshot(&self, listing_id: ListingId) -> Option<Listing> {
        self.lock().listing(listing_id).ok().cloned()
    }

    fn lock(&self) -> MutexGuard<'_, MarketState> {
        self.state.lock()
    }
}

impl Default for InMemoryMarketplace {
    fn default() -> Self {
        Self::new(DEFAULT_FEE_BASIS_POINTS)
    }
}

impl MarketState {
    fn enter(&mut self) -> LedgerResult<()> {
        self.calls += 1;
        if self.unreachable {
            return Err(LedgerError::Unavailable("in-memory ledger offline".into()));
        }
        Ok(())
    }

    fn listing(&self, listing_id: ListingId) -> LedgerResult<&Listing> {
        listing_id
            .checked_sub(1)
            .and_then(|index| self.listings.get(index as usize))
            .ok_or(LedgerError::Rejected(RevertReason::UnknownListing))
    }

    fn token(&self, token_id: TokenId) -> LedgerResult<&TokenRecord> {
        token_id
            .checked_sub(1)
            .and_then(|index| self.tokens.get(index as usize))
            .ok_or_else(|| RevertReason::other(format!("token {token_id} does not exist")))
            .map_err(LedgerError::Rejected)
    }

    fn token_mut(&mut self, token_id: TokenId) -> Option<&mut TokenRecord> {
        let index = token_id.checked_sub(1)? as usize;
        self.tokens.get_mut(index)
    }

    fn total_price(&self, listing_id: ListingId) -> LedgerResult<Amount> {
        let listing = self.listing(listing_id)?;
        let total = match self.fee_overrides.get(&listing_id) {
            Some(fee) => listing.base_price.checked_add(*fee),
            None => listing.base_price.with_basis_points(self.fee_basis_points),
        };
        total.ok_or_else(|| LedgerError::Malformed(format!("price of {listing_id} overflows")))
    }

    fn push_listing(
        &mut self,
        seller: Account,
        token_id: TokenId,
        base_price: Amount,
    ) -> ListingId {
        let listing_id = self.listings.len() as ListingId + 1;
        self.listings.push(Listing {
            listing_id,
            seller,
            token_id,
            base_price,
            sold: false,
        });
        listing_id
    }

    fn queue(&mut self, op: PendingOp) -> TxHash {
        self.nonce += 1;
        let mut hasher = Sha256::new();
        hasher.update(b"in-memory-marketplace");
        hasher.update(self.nonce.to_le_bytes());
        let hash = TxHash(hasher.finalize().into());
        self.pending.push_back(PendingTx { hash, op });
        hash
    }

    fn check_relist(
        &self,
        seller: &Account,
        listing_id: ListingId,
        price: Amount,
    ) -> LedgerResult<()> {
        let listing = self.listing(listing_id)?;
        if price.is_zero() {
            return Err(LedgerError::Rejected(RevertReason::InvalidPrice));
        }
        let owner = &self.token(listing.token_id)?.owner;
        if !listing.sold || owner != seller {
            return Err(LedgerError::Rejected(RevertReason::NotOwner));
        }
        Ok(())
    }

    fn apply_purchase(
        &mut self,
        buyer: &Account,
        listing_id: ListingId,
        value: Amount,
        block_height: u64,
    ) -> TxStatus {
        let total = match self.total_price(listing_id) {
            Ok(total) => total,
            Err(_) => return reverted(RevertReason::UnknownListing),
        };
        let Some(listing) = listing_id
            .checked_sub(1)
            .and_then(|index| self.listings.get_mut(index as usize))
        else {
            return reverted(RevertReason::UnknownListing);
        };
        if listing.sold {
            return reverted(RevertReason::AlreadySold);
        }
        if value < total {
            return reverted(RevertReason::InsufficientValue {
                required: Some(total),
            });
        }
        listing.sold = true;
        let event = PurchaseEvent {
            listing_id,
            token_id: listing.token_id,
            price: listing.base_price,
            seller: listing.seller.clone(),
            buyer: buyer.clone(),
            block_height,
        };
        if let Some(token) = self.token_mut(event.token_id) {
            token.owner = buyer.clone();
        }
        self.events.push(event);
        TxStatus::Confirmed
    }

    fn mine(&mut self, pending: PendingTx) {
        self.block_height += 1;
        let block_height = self.block_height;
        let mut created_listing = None;
        let mut minted_token = None;
        let status = match pending.op {
            PendingOp::Purchase {
                buyer,
                listing_id,
                value,
            } => self.apply_purchase(&buyer, listing_id, value, block_height),
            PendingOp::Relist {
                seller,
                listing_id,
                price,
            } => match self.check_relist(&seller, listing_id, price) {
                Ok(()) => match self.listing(listing_id).map(|listing| listing.token_id) {
                    Ok(token_id) => {
                        let escrow = self.escrow.clone();
                        if let Some(token) = self.token_mut(token_id) {
                            token.owner = escrow;
                        }
                        created_listing = Some(self.push_listing(seller, token_id, price));
                        TxStatus::Confirmed
                    }
                    Err(_) => reverted(RevertReason::UnknownListing),
                },
                Err(LedgerError::Rejected(reason)) => reverted(reason),
                Err(other) => reverted(RevertReason::other(other.to_string())),
            },
            PendingOp::Mint { owner, uri } => {
                self.tokens.push(TokenRecord { uri, owner });
                minted_token = Some(self.tokens.len() as TokenId);
                TxStatus::Confirmed
            }
        };
        let receipt = TxReceipt {
            tx: pending.hash,
            block_height,
            status,
            created_listing,
            minted_token,
        };
        self.receipts.insert(pending.hash, receipt);
    }
}

fn reverted(reason: RevertReason) -> TxStatus {
    TxStatus::Reverted { reason }
}

#[async_trait]
impl MarketplaceLedger for InMemoryMarketplace {
    async fn listing_count(&self) -> LedgerResult<u64> {
        let mut state = self.lock();
        state.enter()?;
        Ok(state.listings.len() as u64)
    }

    async fn listing(&self, listing_id: ListingId) -> LedgerResult<Listing> {
        let mut state = self.lock();
        state.enter()?;
        state.listing(listing_id).cloned()
    }

    async fn total_price(&self, listing_id: ListingId) -> LedgerResult<Amount> {
        let mut state = self.lock();
        state.enter()?;
        state.total_price(listing_id)
    }

    async fn submit_purchase(
        &self,
        buyer: &Account,
        listing_id: ListingId,
        value: Amount,
    ) -> LedgerResult<TxHash> {
        let mut state = self.lock();
        state.enter()?;
        let total = state.total_price(listing_id)?;
        if value < total {
            return Err(LedgerError::Rejected(RevertReason::InsufficientValue {
                required: Some(total),
            }));
        }
        if state.listing(listing_id)?.sold {
            return Err(LedgerError::Rejected(RevertReason::AlreadySold));
        }
        Ok(state.queue(PendingOp::Purchase {
            buyer: buyer.clone(),
            listing_id,
            value,
        }))
    }

    async fn submit_relist(
        &self,
        seller: &Account,
        listing_id: ListingId,
        price: Amount,
    ) -> LedgerResult<TxHash> {
        let mut state = self.lock();
        state.enter()?;
        state.check_relist(seller, listing_id, price)?;
        Ok(state.queue(PendingOp::Relist {
            seller: seller.clone(),
            listing_id,
            price,
        }))
    }

    async fn purchase_events(&self, buyer: &Account) -> LedgerResult<Vec<PurchaseEvent>> {
        let mut state = self.lock();
        state.enter()?;
        Ok(state
            .events
            .iter()
            .filter(|event| &event.buyer == buyer)
            .cloned()
            .collect())
    }

    async fn await_confirmation(&self, tx: TxHash) -> LedgerResult<TxReceipt> {
        let delay = {
            let mut state = self.lock();
            state.enter()?;
            state.confirmation_delay
        };
        if let Some(delay) = delay {
            sleep(delay).await;
        }

        let mut state = self.lock();
        if let Some(receipt) = state.receipts.get(&tx) {
            return Ok(receipt.clone());
        }
        let position = state
            .pending
            .iter()
            .position(|pending| pending.hash == tx)
            .ok_or_else(|| LedgerError::Malformed(format!("unknown transaction {tx}")))?;
        for _ in 0..=position {
            if let Some(pending) = state.pending.pop_front() {
                state.mine(pending);
            }
        }
        state
            .receipts
            .get(&tx)
            .cloned()
            .ok_or_else(|| LedgerError::Malformed(format!("transaction {tx} was not mined")))
    }
}

#[async_trait]
impl TokenContract for InMemoryMarketplace {
    async fn token_uri(&self, token_id: TokenId) -> LedgerResult<String> {
        let mut state = self.lock();
        state.enter()?;
        Ok(state.token(token_id)?.uri.clone())
    }

    async fn owner_of(&self, token_id: TokenId) -> LedgerResult<Account> {
        let mut state = self.lock();
        state.enter()?;
        Ok(state.token(token_id)?.owner.clone())
    }

    async fn submit_mint(&self, owner: &Account, uri: &str) -> LedgerResult<TxHash> {
        let mut state = self.lock();
        state.enter()?;
        Ok(state.queue(PendingOp::Mint {
            owner: owner.clone(),
            uri: uri.to_owned(),
        }))
    }
}
