use tracing::{info, warn};

use crate::cache::{CachedView, LocalViewCache};
use crate::catalog::CatalogReconstructor;
use crate::errors::MarketResult;
use crate::history::PurchaseHistoryReconstructor;
use crate::types::{Account, DisplayItem, PurchaseRecord};

/// Reconstructors paired with the cache they feed.
pub struct MarketViews {
    catalog: CatalogReconstructor,
    history: PurchaseHistoryReconstructor,
    cache: LocalViewCache,
}

impl MarketViews {
    pub fn new(
        catalog: CatalogReconstructor,
        history: PurchaseHistoryReconstructor,
        account: Option<Account>,
    ) -> Self {
        Self {
            catalog,
            history,
            cache: LocalViewCache::new(account),
        }
    }

    pub fn cache(&self) -> &LocalViewCache {
        &self.cache
    }

    /// Starts a new cache epoch when `account` differs from the cached one.
    /// Returns whether anything changed.
    pub fn follow(&self, account: Option<Account>) -> bool {
        if account == self.cache.account() {
            return false;
        }
        match &account {
            Some(account) => info!(%account, "active account changed"),
            None => info!("active account cleared"),
        }
        self.cache.reset(account);
        true
    }

    pub async fn refresh_catalog(&self) -> MarketResult<Vec<DisplayItem>> {
        let pass = self.cache.begin();
        let result = self.catalog.reconstruct().await;
        if let Err(error) = &result {
            warn!(%error, "catalog reconstruction failed");
        }
        self.cache.store_catalog(pass, &result);
        result
    }

    pub async fn refresh_purchases(&self, account: &Account) -> MarketResult<Vec<PurchaseRecord>> {
        let pass = self.cache.begin();
        let result = self.history.reconstruct(account).await;
        if let Err(error) = &result {
            warn!(%account, %error, "purchase history reconstruction failed");
        }
        self.cache.store_purchases(pass, account, &result);
        result
    }

    /// Rebuilds both views for the cached account.
    pub async fn refresh_all(&self) {
        // Outcomes are already logged and recorded in the cache slots.
        match self.cache.account() {
            Some(account) => {
                let _ = tokio::join!(self.refresh_catalog(), self.refresh_purchases(&account));
            }
            None => {
                let _ = self.refresh_catalog().await;
            }
        }
    }

    /// Purchases of `account` whose token it still owns. Not cached.
    pub async fn held_purchases(&self, account: &Account) -> MarketResult<Vec<PurchaseRecord>> {
        self.history.reconstruct_held(account).await
    }

    pub fn catalog_view(&self) -> CachedView<DisplayItem> {
        self.cache.catalog()
    }

    pub fn purchases_view(&self) -> CachedView<PurchaseRecord> {
        self.cache.purchases()
    }
}
