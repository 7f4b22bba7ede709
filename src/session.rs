//! Wiring of the marketplace client for one identity provider.

use std::sync::Arc;

use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::error;

use crate::cache::CachedView;
use crate::catalog::{listings_by, CatalogReconstructor};
use crate::config::MarketplaceConfig;
use crate::errors::{MarketError, MarketResult};
use crate::history::PurchaseHistoryReconstructor;
use crate::ledger::{MarketplaceLedger, TokenContract};
use crate::metadata::{DescriptorSource, MetadataFetcher};
use crate::orchestrator::{TransactionOrchestrator, TxOutcome};
use crate::types::{Account, DisplayItem, ListingId, PurchaseRecord};
use crate::units::Amount;
use crate::views::MarketViews;

/// Marketplace client bound to an identity channel.
///
/// The channel carries the active account, `None` meaning browse-only. The
/// session reads it on every call; [`MarketplaceSession::watch_identity`]
/// additionally rebuilds the views whenever it changes.
pub struct MarketplaceSession {
    views: Arc<MarketViews>,
    orchestrator: TransactionOrchestrator,
    metadata: Arc<MetadataFetcher>,
    identity: watch::Receiver<Option<Account>>,
}

impl MarketplaceSession {
    pub fn new(
        ledger: Arc<dyn MarketplaceLedger>,
        tokens: Arc<dyn TokenContract>,
        descriptors: Arc<dyn DescriptorSource>,
        config: &MarketplaceConfig,
        identity: watch::Receiver<Option<Account>>,
    ) -> Self {
        let metadata = Arc::new(MetadataFetcher::new(
            descriptors,
            config.metadata.cache_descriptors,
        ));
        let catalog = CatalogReconstructor::new(
            Arc::clone(&ledger),
            Arc::clone(&tokens),
            Arc::clone(&metadata),
            config.catalog.max_concurrent_reads,
        );
        let history = PurchaseHistoryReconstructor::new(
            Arc::clone(&ledger),
            Arc::clone(&tokens),
            Arc::clone(&metadata),
            config.history.max_concurrent_reads,
        );
        let account = identity.borrow().clone();
        let views = Arc::new(MarketViews::new(catalog, history, account));
        let orchestrator =
            TransactionOrchestrator::new(ledger, tokens, Arc::clone(&views), identity.clone());
        Self {
            views,
            orchestrator,
            metadata,
            identity,
        }
    }

    pub fn account(&self) -> Option<Account> {
        self.identity.borrow().clone()
    }

    /// Resets the cache if the identity changed since it was last seen.
    fn sync_identity(&self) {
        self.views.follow(self.account());
    }

    pub async fn reconstruct_catalog(&self) -> MarketResult<Vec<DisplayItem>> {
        self.sync_identity();
        self.views.refresh_catalog().await
    }

    /// Purchase history of any account. Only the active account's history is
    /// kept in the cache.
    pub async fn reconstruct_purchases(
        &self,
        account: &Account,
    ) -> MarketResult<Vec<PurchaseRecord>> {
        self.sync_identity();
        self.views.refresh_purchases(account).await
    }

    pub async fn my_purchases(&self) -> MarketResult<Vec<PurchaseRecord>> {
        let account = self.account().ok_or(MarketError::NoIdentity)?;
        self.reconstruct_purchases(&account).await
    }

    /// Latest purchase of each token the active account still owns. Unlike
    /// [`Self::my_purchases`] this drops purchases that were relisted or
    /// moved on, and it bypasses the cache.
    pub async fn held_purchases(&self) -> MarketResult<Vec<PurchaseRecord>> {
        self.sync_identity();
        let account = self.account().ok_or(MarketError::NoIdentity)?;
        self.views.held_purchases(&account).await
    }

    /// Unsold listings created by the active account.
    pub async fn my_listings(&self) -> MarketResult<Vec<DisplayItem>> {
        let account = self.account().ok_or(MarketError::NoIdentity)?;
        let catalog = self.reconstruct_catalog().await?;
        Ok(listings_by(&catalog, &account))
    }

    pub async fn purchase(&self, listing_id: ListingId) -> MarketResult<TxOutcome> {
        self.sync_identity();
        self.orchestrator.purchase(listing_id).await
    }

    pub async fn relist(&self, listing_id: ListingId, price: &str) -> MarketResult<TxOutcome> {
        self.sync_identity();
        self.orchestrator.relist(listing_id, price).await
    }

    pub async fn relist_amount(
        &self,
        listing_id: ListingId,
        price: Amount,
    ) -> MarketResult<TxOutcome> {
        self.sync_identity();
        self.orchestrator.relist_amount(listing_id, price).await
    }

    pub async fn mint(&self, uri: &str) -> MarketResult<TxOutcome> {
        self.sync_identity();
        self.orchestrator.mint(uri).await
    }

    pub fn catalog_view(&self) -> CachedView<DisplayItem> {
        self.views.catalog_view()
    }

    pub fn purchases_view(&self) -> CachedView<PurchaseRecord> {
        self.views.purchases_view()
    }

    pub fn orchestrator(&self) -> &TransactionOrchestrator {
        &self.orchestrator
    }

    pub fn metadata(&self) -> &MetadataFetcher {
        &self.metadata
    }

    /// Spawns a task that resets the cache and rebuilds both views every
    /// time the identity channel reports a new account.
    pub fn watch_identity(&self) -> AccountWatcher {
        AccountWatcher::start(Arc::clone(&self.views), self.identity.clone())
    }
}

/// Background task following the identity channel.
pub struct AccountWatcher {
    shutdown_tx: watch::Sender<bool>,
    task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl AccountWatcher {
    fn start(views: Arc<MarketViews>, identity: watch::Receiver<Option<Account>>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(views, identity, shutdown_rx));
        Self {
            shutdown_tx,
            task: AsyncMutex::new(Some(task)),
        }
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            if let Err(err) = handle.await {
                error!(?err, "account watcher terminated abnormally");
            }
        }
    }
}

async fn run_loop(
    views: Arc<MarketViews>,
    mut identity: watch::Receiver<Option<Account>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            changed = identity.changed() => {
                if changed.is_err() {
                    break;
                }
                let account = identity.borrow_and_update().clone();
                // A session call may already have followed this change.
                views.follow(account);
                views.refresh_all().await;
            }
        }
    }
}
