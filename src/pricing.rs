use std::sync::Arc;

use tracing::warn;

use crate::errors::{MarketError, MarketResult};
use crate::ledger::MarketplaceLedger;
use crate::types::{Listing, ListingId};
use crate::units::Amount;

/// Base and total price of one listing as reported by the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PriceQuote {
    pub listing_id: ListingId,
    pub base_price: Amount,
    pub total_price: Amount,
}

impl PriceQuote {
    /// Protocol fee implied by the quote. Never negative for a validated quote.
    pub fn fee(&self) -> Amount {
        self.total_price
            .checked_sub(self.base_price)
            .unwrap_or(Amount::ZERO)
    }
}

/// Reads payable amounts from the ledger. The fee schedule lives in the
/// contract and is never recomputed here.
#[derive(Clone)]
pub struct PriceResolver {
    ledger: Arc<dyn MarketplaceLedger>,
}

impl PriceResolver {
    pub fn new(ledger: Arc<dyn MarketplaceLedger>) -> Self {
        Self { ledger }
    }

    pub async fn total_price(&self, listing_id: ListingId) -> MarketResult<Amount> {
        self.ledger
            .total_price(listing_id)
            .await
            .map_err(|err| MarketError::for_listing(listing_id, err, Amount::ZERO))
    }

    pub async fn quote(&self, listing: &Listing) -> MarketResult<PriceQuote> {
        let total_price = self.total_price(listing.listing_id).await?;
        if total_price < listing.base_price {
            warn!(
                listing_id = listing.listing_id,
                base = %listing.base_price,
                total = %total_price,
                "ledger reported a total below the base price"
            );
            return Err(MarketError::MalformedLedger(format!(
                "total price {} of listing {} is below its base price {}",
                total_price.format_units(),
                listing.listing_id,
                listing.base_price.format_units()
            )));
        }
        Ok(PriceQuote {
            listing_id: listing.listing_id,
            base_price: listing.base_price,
            total_price,
        })
    }
}
