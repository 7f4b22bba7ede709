//! Catalog reconstruction from listing reads.
//!
//! The catalog is rebuilt from scratch on every call: the listing count is
//! read once, ids `1..=count` are read with a bounded window of concurrent
//! requests, sold listings are dropped and the rest are joined with their
//! total price and descriptor. Output is ordered by listing id. A single
//! failing listing fails the whole reconstruction.

use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, trace};

use crate::errors::{MarketError, MarketResult};
use crate::ledger::{MarketplaceLedger, TokenContract};
use crate::metadata::MetadataFetcher;
use crate::pricing::PriceResolver;
use crate::types::{Account, DisplayItem, ListingId};

pub struct CatalogReconstructor {
    ledger: Arc<dyn MarketplaceLedger>,
    tokens: Arc<dyn TokenContract>,
    prices: PriceResolver,
    metadata: Arc<MetadataFetcher>,
    max_concurrent_reads: usize,
}

impl CatalogReconstructor {
    pub fn new(
        ledger: Arc<dyn MarketplaceLedger>,
        tokens: Arc<dyn TokenContract>,
        metadata: Arc<MetadataFetcher>,
        max_concurrent_reads: usize,
    ) -> Self {
        Self {
            prices: PriceResolver::new(Arc::clone(&ledger)),
            ledger,
            tokens,
            metadata,
            max_concurrent_reads: max_concurrent_reads.max(1),
        }
    }

    pub async fn reconstruct(&self) -> MarketResult<Vec<DisplayItem>> {
        let count = self.ledger.listing_count().await?;
        debug!(count, "reconstructing catalog");
        let items: Vec<Option<DisplayItem>> = stream::iter(1..=count)
            .map(|listing_id| self.display_item(listing_id))
            .buffered(self.max_concurrent_reads)
            .try_collect()
            .await?;
        let items: Vec<DisplayItem> = items.into_iter().flatten().collect();
        debug!(count, unsold = items.len(), "catalog reconstructed");
        Ok(items)
    }

    async fn display_item(&self, listing_id: ListingId) -> MarketResult<Option<DisplayItem>> {
        let listing = self.ledger.listing(listing_id).await?;
        if listing.listing_id != listing_id {
            return Err(MarketError::MalformedLedger(format!(
                "requested listing {listing_id} but ledger returned {}",
                listing.listing_id
            )));
        }
        if listing.sold {
            trace!(listing_id, "skipping sold listing");
            return Ok(None);
        }
        let quote = self.prices.quote(&listing).await?;
        let descriptor = self
            .metadata
            .token_descriptor(self.tokens.as_ref(), listing.token_id)
            .await?;
        Ok(Some(DisplayItem {
            listing_id,
            seller: listing.seller,
            token_id: listing.token_id,
            total_price: quote.total_price,
            descriptor,
        }))
    }
}

/// Unsold catalog entries listed by `seller`, in catalog order.
pub fn listings_by(items: &[DisplayItem], seller: &Account) -> Vec<DisplayItem> {
    items
        .iter()
        .filter(|item| &item.seller == seller)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{DescriptorError, FailureKind};
    use crate::ledger::InMemoryMarketplace;
    use crate::metadata::StaticDescriptorSource;
    use crate::types::Descriptor;
    use crate::units::Amount;

    fn descriptor(name: &str) -> Descriptor {
        Descriptor {
            name: name.into(),
            description: String::new(),
            image: format!("https://img.example/{name}.png"),
        }
    }

    fn reconstructor(
        market: &InMemoryMarketplace,
        source: Arc<StaticDescriptorSource>,
        window: usize,
    ) -> CatalogReconstructor {
        let ledger = Arc::new(market.clone());
        CatalogReconstructor::new(
            ledger.clone(),
            ledger,
            Arc::new(MetadataFetcher::new(source, true)),
            window,
        )
    }

    #[tokio::test]
    async fn keeps_id_order_with_a_wide_window() {
        let market = InMemoryMarketplace::new(0);
        let source = Arc::new(StaticDescriptorSource::new());
        let seller = Account::new("0xseller").unwrap();
        for index in 1..=20u128 {
            let uri = format!("ipfs://{index}");
            source.publish(uri.clone(), descriptor(&index.to_string()));
            market.list_item(&seller, &uri, Amount::from_base_units(index));
        }
        market
            .record_external_purchase(4, &Account::new("0xbuyer").unwrap())
            .unwrap();

        let items = reconstructor(&market, source, 16).reconstruct().await.unwrap();
        let ids: Vec<_> = items.iter().map(|item| item.listing_id).collect();
        let expected: Vec<_> = (1..=20).filter(|id| *id != 4).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn one_bad_descriptor_fails_everything() {
        let market = InMemoryMarketplace::new(0);
        let source = Arc::new(StaticDescriptorSource::new());
        let seller = Account::new("0xseller").unwrap();
        source.publish("ipfs://good", descriptor("good"));
        source.fail("ipfs://bad", DescriptorError::Malformed("missing `image`".into()));
        market.list_item(&seller, "ipfs://good", Amount::from_base_units(1));
        market.list_item(&seller, "ipfs://bad", Amount::from_base_units(1));

        let err = reconstructor(&market, source, 4)
            .reconstruct()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::DescriptorUnresolvable);
    }

    #[test]
    fn seller_filter_keeps_catalog_order() {
        let alice = Account::new("0xalice").unwrap();
        let bob = Account::new("0xbob").unwrap();
        let item = |listing_id, seller: &Account| DisplayItem {
            listing_id,
            seller: seller.clone(),
            token_id: listing_id,
            total_price: Amount::ZERO,
            descriptor: descriptor("x"),
        };
        let items = vec![item(1, &alice), item(2, &bob), item(3, &alice)];
        let mine: Vec<_> = listings_by(&items, &alice)
            .into_iter()
            .map(|item| item.listing_id)
            .collect();
        assert_eq!(mine, vec![1, 3]);
    }
}
