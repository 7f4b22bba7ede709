//! Last reconstructed views of the active account.
//!
//! Contents are only ever replaced wholesale by a successful reconstruction.
//! A failed reconstruction leaves the previous items visible and records the
//! error. Every account change bumps an epoch; results computed under an
//! older epoch are dropped when they arrive. Confirmed transactions bump a
//! generation instead: a pass that started before one is still stored, but
//! its view stays stale and it cannot lift a relist that happened after it
//! began reading.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use crate::errors::{MarketError, MarketResult};
use crate::types::{Account, DisplayItem, ListingId, PurchaseRecord};

/// Snapshot of one cached view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedView<T> {
    /// `None` until the first successful reconstruction.
    pub items: Option<Vec<T>>,
    /// Set after an invalidation or a failed reconstruction.
    pub stale: bool,
    pub last_error: Option<MarketError>,
}

/// Cache position captured when a reconstruction starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pass {
    epoch: u64,
    generation: u64,
}

impl<T> CachedView<T> {
    pub fn is_loaded(&self) -> bool {
        self.items.is_some()
    }
}

struct Slot<T> {
    items: Option<Vec<T>>,
    stale: bool,
    last_error: Option<MarketError>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            items: None,
            stale: true,
            last_error: None,
        }
    }
}

impl<T: Clone> Slot<T> {
    fn apply(&mut self, result: &MarketResult<Vec<T>>, superseded: bool) {
        match result {
            Ok(items) => {
                self.items = Some(items.clone());
                self.stale = superseded;
                self.last_error = None;
            }
            Err(err) => {
                self.stale = true;
                self.last_error = Some(err.clone());
            }
        }
    }

    fn snapshot(&self) -> CachedView<T> {
        CachedView {
            items: self.items.clone(),
            stale: self.stale,
            last_error: self.last_error.clone(),
        }
    }
}

#[derive(Default)]
struct CacheState {
    epoch: u64,
    generation: u64,
    account: Option<Account>,
    catalog: Slot<DisplayItem>,
    purchases: Slot<PurchaseRecord>,
    /// Relisted purchases, keyed to the generation their relist confirmed in.
    relisted: HashMap<ListingId, u64>,
}

impl CacheState {
    fn bump(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }
}

#[derive(Default)]
pub struct LocalViewCache {
    state: Mutex<CacheState>,
}

impl LocalViewCache {
    pub fn new(account: Option<Account>) -> Self {
        let cache = Self::default();
        cache.state.lock().account = account;
        cache
    }

    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    /// Marks the start of a reconstruction.
    pub fn begin(&self) -> Pass {
        let state = self.state.lock();
        Pass {
            epoch: state.epoch,
            generation: state.generation,
        }
    }

    pub fn account(&self) -> Option<Account> {
        self.state.lock().account.clone()
    }

    /// Discards everything and starts a new epoch for `account`.
    pub fn reset(&self, account: Option<Account>) -> u64 {
        let mut state = self.state.lock();
        let epoch = state.epoch + 1;
        *state = CacheState {
            epoch,
            account,
            ..CacheState::default()
        };
        epoch
    }

    /// Marks both views as outdated after a confirmed transaction.
    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        state.bump();
        state.catalog.stale = true;
        state.purchases.stale = true;
    }

    /// Hides a relisted purchase until a history reconstruction that started
    /// after the relist succeeds.
    pub fn hide_purchase(&self, listing_id: ListingId) {
        let mut state = self.state.lock();
        let generation = state.bump();
        state.relisted.insert(listing_id, generation);
    }

    /// Stores a catalog reconstruction started at `pass`. Returns `false`
    /// when the epoch has moved on and the result was dropped.
    pub fn store_catalog(&self, pass: Pass, result: &MarketResult<Vec<DisplayItem>>) -> bool {
        let mut state = self.state.lock();
        if state.epoch != pass.epoch {
            debug!(
                epoch = pass.epoch,
                current = state.epoch,
                "dropping catalog from a previous epoch"
            );
            return false;
        }
        let superseded = state.generation != pass.generation;
        state.catalog.apply(result, superseded);
        true
    }

    /// Stores a purchase history reconstruction for `account` started at
    /// `pass`. Histories of any other account are not cached.
    pub fn store_purchases(
        &self,
        pass: Pass,
        account: &Account,
        result: &MarketResult<Vec<PurchaseRecord>>,
    ) -> bool {
        let mut state = self.state.lock();
        if state.epoch != pass.epoch || state.account.as_ref() != Some(account) {
            debug!(
                epoch = pass.epoch,
                current = state.epoch,
                %account,
                "dropping purchase history for an inactive account"
            );
            return false;
        }
        let superseded = state.generation != pass.generation;
        state.purchases.apply(result, superseded);
        if result.is_ok() {
            state
                .relisted
                .retain(|_, hidden_at| *hidden_at > pass.generation);
        }
        true
    }

    pub fn catalog(&self) -> CachedView<DisplayItem> {
        self.state.lock().catalog.snapshot()
    }

    /// Cached purchase history with relisted purchases already removed.
    pub fn purchases(&self) -> CachedView<PurchaseRecord> {
        let state = self.state.lock();
        let mut view = state.purchases.snapshot();
        if let Some(items) = view.items.as_mut() {
            items.retain(|record| !state.relisted.contains_key(&record.listing_id));
        }
        view
    }
}
