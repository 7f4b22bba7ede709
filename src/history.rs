//! Purchase history reconstruction from the append-only purchase log.
//!
//! The log keeps every purchase forever, including ones whose token has since
//! been relisted or moved on, and [`PurchaseHistoryReconstructor::reconstruct`]
//! returns one record per event. [`PurchaseHistoryReconstructor::reconstruct_held`]
//! narrows that to the latest purchase of each token the buyer still owns.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

use crate::errors::MarketResult;
use crate::ledger::{MarketplaceLedger, TokenContract};
use crate::metadata::MetadataFetcher;
use crate::pricing::PriceResolver;
use crate::types::{Account, PurchaseEvent, PurchaseRecord};

pub struct PurchaseHistoryReconstructor {
    ledger: Arc<dyn MarketplaceLedger>,
    tokens: Arc<dyn TokenContract>,
    prices: PriceResolver,
    metadata: Arc<MetadataFetcher>,
    max_concurrent_reads: usize,
}

impl PurchaseHistoryReconstructor {
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

    /// One record per purchase event of `buyer`, in log order.
    pub async fn reconstruct(&self, buyer: &Account) -> MarketResult<Vec<PurchaseRecord>> {
        let events = self.ledger.purchase_events(buyer).await?;
        let records = self.records(events).await?;
        debug!(
            account = %buyer,
            records = records.len(),
            "purchase history reconstructed"
        );
        Ok(records)
    }

    /// Latest purchase of every token `buyer` still owns.
    pub async fn reconstruct_held(&self, buyer: &Account) -> MarketResult<Vec<PurchaseRecord>> {
        let events = self.ledger.purchase_events(buyer).await?;
        let total_events = events.len();

        let held: Vec<Option<PurchaseEvent>> = stream::iter(latest_per_token(events))
            .map(|event| self.still_held(buyer, event))
            .buffered(self.max_concurrent_reads)
            .try_collect()
            .await?;
        let records = self.records(held.into_iter().flatten().collect()).await?;
        debug!(
            account = %buyer,
            events = total_events,
            records = records.len(),
            "held purchases reconstructed"
        );
        Ok(records)
    }

    async fn records(&self, events: Vec<PurchaseEvent>) -> MarketResult<Vec<PurchaseRecord>> {
        stream::iter(events)
            .map(|event| self.record(event))
            .buffered(self.max_concurrent_reads)
            .try_collect()
            .await
    }

    async fn still_held(
        &self,
        buyer: &Account,
        event: PurchaseEvent,
    ) -> MarketResult<Option<PurchaseEvent>> {
        let owner = self.tokens.owner_of(event.token_id).await?;
        Ok((&owner == buyer).then_some(event))
    }

    async fn record(&self, event: PurchaseEvent) -> MarketResult<PurchaseRecord> {
        let live_total_price = self.prices.total_price(event.listing_id).await?;
        let descriptor = self
            .metadata
            .token_descriptor(self.tokens.as_ref(), event.token_id)
            .await?;
        Ok(PurchaseRecord {
            listing_id: event.listing_id,
            token_id: event.token_id,
            price_paid: event.price,
            live_total_price,
            descriptor,
        })
    }
}

/// Drops every event superseded by a later purchase of the same token,
/// keeping log order among the survivors.
fn latest_per_token(events: Vec<PurchaseEvent>) -> Vec<PurchaseEvent> {
    let mut seen = HashSet::new();
    let mut latest: Vec<PurchaseEvent> = events
        .into_iter()
        .rev()
        .filter(|event| seen.insert(event.token_id))
        .collect();
    latest.reverse();
    latest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Amount;

    fn event(listing_id: u64, token_id: u64) -> PurchaseEvent {
        PurchaseEvent {
            listing_id,
            token_id,
            price: Amount::from_base_units(listing_id as u128),
            seller: Account::new("0xseller").unwrap(),
            buyer: Account::new("0xbuyer").unwrap(),
            block_height: listing_id,
        }
    }

    #[test]
    fn later_purchases_of_a_token_supersede_earlier_ones() {
        let events = vec![event(1, 10), event(2, 20), event(5, 10), event(6, 30)];
        let kept: Vec<_> = latest_per_token(events)
            .into_iter()
            .map(|event| (event.listing_id, event.token_id))
            .collect();
        assert_eq!(kept, vec![(2, 20), (5, 10), (6, 30)]);
    }
}
