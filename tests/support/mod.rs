#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};

use rpp_marketplace::config::MarketplaceConfig;
use rpp_marketplace::errors::{LedgerError, LedgerResult};
use rpp_marketplace::ledger::{InMemoryMarketplace, MarketplaceLedger, TokenContract};
use rpp_marketplace::metadata::StaticDescriptorSource;
use rpp_marketplace::types::{
    Account, Descriptor, Listing, ListingId, PurchaseEvent, RevertReason, TokenId, TxHash,
    TxReceipt,
};
use rpp_marketplace::{Amount, MarketplaceSession};

pub fn account(raw: &str) -> Account {
    Account::new(raw).expect("account")
}

pub fn units(raw: &str) -> Amount {
    Amount::parse_units(raw).expect("amount")
}

pub fn descriptor(name: &str) -> Descriptor {
    Descriptor {
        name: name.to_owned(),
        description: format!("{name} description"),
        image: format!("https://img.test/{name}.png"),
    }
}

pub fn descriptor_uri(name: &str) -> String {
    format!("ipfs://fixture/{name}.json")
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn wait_for<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(10)).await;
    }
}

/// Read-only ledger answering from fixed tables, for exact read scenarios.
#[derive(Default)]
pub struct FixtureLedger {
    pub listings: Vec<Listing>,
    pub totals: HashMap<ListingId, Amount>,
    pub events: Vec<PurchaseEvent>,
    pub token_uris: HashMap<TokenId, String>,
    pub owners: HashMap<TokenId, Account>,
    calls: AtomicUsize,
}

impl FixtureLedger {
    pub fn listing(
        mut self,
        seller: &Account,
        token_id: TokenId,
        base: &str,
        total: &str,
        sold: bool,
    ) -> Self {
        let listing_id = self.listings.len() as ListingId + 1;
        self.listings.push(Listing {
            listing_id,
            seller: seller.clone(),
            token_id,
            base_price: units(base),
            sold,
        });
        self.totals.insert(listing_id, units(total));
        self
    }

    pub fn total(mut self, listing_id: ListingId, total: &str) -> Self {
        self.totals.insert(listing_id, units(total));
        self
    }

    pub fn token(mut self, token_id: TokenId, uri: &str, owner: &Account) -> Self {
        self.token_uris.insert(token_id, uri.to_owned());
        self.owners.insert(token_id, owner.clone());
        self
    }

    pub fn event(
        mut self,
        buyer: &Account,
        listing_id: ListingId,
        token_id: TokenId,
        price: &str,
    ) -> Self {
        let block_height = self.events.len() as u64 + 1;
        self.events.push(PurchaseEvent {
            listing_id,
            token_id,
            price: units(price),
            seller: account("0xfixture-seller"),
            buyer: buyer.clone(),
            block_height,
        });
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn count(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn read_only<T>() -> LedgerResult<T> {
        Err(LedgerError::Rejected(RevertReason::other(
            "fixture ledger is read-only",
        )))
    }
}

#[async_trait]
impl MarketplaceLedger for FixtureLedger {
    async fn listing_count(&self) -> LedgerResult<u64> {
        self.count();
        Ok(self.listings.len() as u64)
    }

    async fn listing(&self, listing_id: ListingId) -> LedgerResult<Listing> {
        self.count();
        self.listings
            .iter()
            .find(|listing| listing.listing_id == listing_id)
            .cloned()
            .ok_or(LedgerError::Rejected(RevertReason::UnknownListing))
    }

    async fn total_price(&self, listing_id: ListingId) -> LedgerResult<Amount> {
        self.count();
        self.totals
            .get(&listing_id)
            .copied()
            .ok_or(LedgerError::Rejected(RevertReason::UnknownListing))
    }

    async fn submit_purchase(
        &self,
        _buyer: &Account,
        _listing_id: ListingId,
        _value: Amount,
    ) -> LedgerResult<TxHash> {
        self.count();
        Self::read_only()
    }

    async fn submit_relist(
        &self,
        _seller: &Account,
        _listing_id: ListingId,
        _price: Amount,
    ) -> LedgerResult<TxHash> {
        self.count();
        Self::read_only()
    }

    async fn purchase_events(&self, buyer: &Account) -> LedgerResult<Vec<PurchaseEvent>> {
        self.count();
        Ok(self
            .events
            .iter()
            .filter(|event| &event.buyer == buyer)
            .cloned()
            .collect())
    }

    async fn await_confirmation(&self, _tx: TxHash) -> LedgerResult<TxReceipt> {
        self.count();
        Self::read_only()
    }
}

#[async_trait]
impl TokenContract for FixtureLedger {
    async fn token_uri(&self, token_id: TokenId) -> LedgerResult<String> {
        self.count();
        self.token_uris
            .get(&token_id)
            .cloned()
            .ok_or_else(|| LedgerError::Malformed(format!("no uri for token {token_id}")))
    }

    async fn owner_of(&self, token_id: TokenId) -> LedgerResult<Account> {
        self.count();
        self.owners
            .get(&token_id)
            .cloned()
            .ok_or_else(|| LedgerError::Malformed(format!("no owner for token {token_id}")))
    }

    async fn submit_mint(&self, _owner: &Account, _uri: &str) -> LedgerResult<TxHash> {
        self.count();
        Self::read_only()
    }
}

/// Session over a [`FixtureLedger`] with descriptors published for `names`.
pub fn fixture_session(
    ledger: FixtureLedger,
    names: &[&str],
    active: Option<Account>,
) -> (Arc<FixtureLedger>, MarketplaceSession) {
    let ledger = Arc::new(ledger);
    let descriptors = Arc::new(StaticDescriptorSource::new());
    for name in names {
        descriptors.publish(descriptor_uri(name), descriptor(name));
    }
    let (_identity_tx, identity_rx) = watch::channel(active);
    let session = MarketplaceSession::new(
        ledger.clone(),
        ledger.clone(),
        descriptors,
        &MarketplaceConfig::default(),
        identity_rx,
    );
    (ledger, session)
}

/// In-memory marketplace plus one session per identity channel.
pub struct Market {
    pub ledger: InMemoryMarketplace,
    pub descriptors: Arc<StaticDescriptorSource>,
}

impl Market {
    pub fn new(fee_basis_points: u32) -> Self {
        Self {
            ledger: InMemoryMarketplace::new(fee_basis_points),
            descriptors: Arc::new(StaticDescriptorSource::new()),
        }
    }

    /// Publishes a descriptor named `name` and lists its token.
    pub fn list(&self, seller: &Account, name: &str, price: &str) -> ListingId {
        let uri = descriptor_uri(name);
        self.descriptors.publish(uri.clone(), descriptor(name));
        self.ledger.list_item(seller, &uri, units(price))
    }

    pub fn session(
        &self,
        active: Option<Account>,
    ) -> (watch::Sender<Option<Account>>, MarketplaceSession) {
        self.session_over(Arc::new(self.ledger.clone()), active)
    }

    /// Session whose purchase log reads answer `delay` after reading.
    pub fn slow_history_session(
        &self,
        delay: Duration,
        active: Option<Account>,
    ) -> (watch::Sender<Option<Account>>, MarketplaceSession) {
        let ledger = Arc::new(SlowPurchaseLog {
            inner: self.ledger.clone(),
            delay,
        });
        self.session_over(ledger, active)
    }

    fn session_over<L>(
        &self,
        ledger: Arc<L>,
        active: Option<Account>,
    ) -> (watch::Sender<Option<Account>>, MarketplaceSession)
    where
        L: MarketplaceLedger + TokenContract + 'static,
    {
        let (identity_tx, identity_rx) = watch::channel(active);
        let session = MarketplaceSession::new(
            ledger.clone(),
            ledger,
            self.descriptors.clone(),
            &MarketplaceConfig::default(),
            identity_rx,
        );
        (identity_tx, session)
    }
}

/// Marketplace whose purchase log answers arrive late, carrying the state
/// from when the read was made.
pub struct SlowPurchaseLog {
    inner: InMemoryMarketplace,
    delay: Duration,
}

#[async_trait]
impl MarketplaceLedger for SlowPurchaseLog {
    async fn listing_count(&self) -> LedgerResult<u64> {
        self.inner.listing_count().await
    }

    async fn listing(&self, listing_id: ListingId) -> LedgerResult<Listing> {
        self.inner.listing(listing_id).await
    }

    async fn total_price(&self, listing_id: ListingId) -> LedgerResult<Amount> {
        self.inner.total_price(listing_id).await
    }

    async fn submit_purchase(
        &self,
        buyer: &Account,
        listing_id: ListingId,
        value: Amount,
    ) -> LedgerResult<TxHash> {
        self.inner.submit_purchase(buyer, listing_id, value).await
    }

    async fn submit_relist(
        &self,
        seller: &Account,
        listing_id: ListingId,
        price: Amount,
    ) -> LedgerResult<TxHash> {
        self.inner.submit_relist(seller, listing_id, price).await
    }

    async fn purchase_events(&self, buyer: &Account) -> LedgerResult<Vec<PurchaseEvent>> {
        let events = self.inner.purchase_events(buyer).await;
        sleep(self.delay).await;
        events
    }

    async fn await_confirmation(&self, tx: TxHash) -> LedgerResult<TxReceipt> {
        self.inner.await_confirmation(tx).await
    }
}

#[async_trait]
impl TokenContract for SlowPurchaseLog {
    async fn token_uri(&self, token_id: TokenId) -> LedgerResult<String> {
        self.inner.token_uri(token_id).await
    }

    async fn owner_of(&self, token_id: TokenId) -> LedgerResult<Account> {
        self.inner.owner_of(token_id).await
    }

    async fn submit_mint(&self, owner: &Account, uri: &str) -> LedgerResult<TxHash> {
        self.inner.submit_mint(owner, uri).await
    }
}
