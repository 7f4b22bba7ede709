//! Value-bearing transactions against the marketplace and token contracts.
//!
//! Every operation follows the same shape: validate locally, claim the
//! target so a second submission from this client is refused as `Busy`,
//! submit, then hand the confirmation wait to a detached task. The task
//! applies the cache effect of the transaction and releases the claim even
//! when the caller has stopped waiting; in that case the result is only
//! logged. A caller that is still waiting refreshes the affected views
//! afterwards: both after a purchase, the catalog after a relist. The relisted
//! purchase stays hidden from the cached history until the next history
//! reconstruction.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::cache::LocalViewCache;
use crate::errors::{LedgerError, MarketError, MarketResult};
use crate::ledger::{MarketplaceLedger, TokenContract};
use crate::pricing::PriceResolver;
use crate::types::{Account, ListingId, TokenId, TxHash, TxReceipt, TxStatus};
use crate::units::Amount;
use crate::views::MarketViews;

/// Confirmed transaction as reported back to the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TxOutcome {
    pub tx: TxHash,
    pub block_height: u64,
    /// Listing id assigned by a relist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_listing: Option<ListingId>,
    /// Token id assigned by a mint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minted_token: Option<TokenId>,
}

impl From<TxReceipt> for TxOutcome {
    fn from(receipt: TxReceipt) -> Self {
        Self {
            tx: receipt.tx,
            block_height: receipt.block_height,
            created_listing: receipt.created_listing,
            minted_token: receipt.minted_token,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum InFlight {
    Listing(ListingId),
    Mint(String),
}

impl fmt::Display for InFlight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listing(listing_id) => write!(f, "listing {listing_id}"),
            Self::Mint(uri) => write!(f, "mint of {uri}"),
        }
    }
}

type InFlightSet = Arc<Mutex<HashSet<InFlight>>>;

/// Releases its claim when dropped, whichever task holds it at that point.
struct InFlightGuard {
    set: InFlightSet,
    key: InFlight,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

/// Local bookkeeping applied once a transaction is confirmed.
enum Settlement {
    Purchase,
    Relist(ListingId),
    Mint,
}

impl Settlement {
    fn apply(&self, cache: &LocalViewCache) {
        match self {
            Self::Purchase => cache.invalidate(),
            Self::Relist(listing_id) => {
                cache.invalidate();
                cache.hide_purchase(*listing_id);
            }
            Self::Mint => {}
        }
    }
}

struct Submitted {
    tx: TxHash,
    guard: InFlightGuard,
    listing_id: Option<ListingId>,
    attached: Amount,
    settlement: Settlement,
}

/// Parses a relist price typed by a user, in whole currency units.
pub fn parse_relist_price(input: &str) -> MarketResult<Amount> {
    let price = Amount::parse_units(input)?;
    if price.is_zero() {
        return Err(MarketError::invalid_input(
            "relist price must be greater than zero",
        ));
    }
    Ok(price)
}

#[derive(Clone)]
pub struct TransactionOrchestrator {
    ledger: Arc<dyn MarketplaceLedger>,
    tokens: Arc<dyn TokenContract>,
    prices: PriceResolver,
    views: Arc<MarketViews>,
    identity: watch::Receiver<Option<Account>>,
    in_flight: InFlightSet,
}

impl TransactionOrchestrator {
    pub fn new(
        ledger: Arc<dyn MarketplaceLedger>,
        tokens: Arc<dyn TokenContract>,
        views: Arc<MarketViews>,
        identity: watch::Receiver<Option<Account>>,
    ) -> Self {
        Self {
            prices: PriceResolver::new(Arc::clone(&ledger)),
            ledger,
            tokens,
            views,
            identity,
            in_flight: Arc::default(),
        }
    }

    /// Buys `listing_id` for the active account, attaching exactly the total
    /// price the ledger reports right before submission.
    pub async fn purchase(&self, listing_id: ListingId) -> MarketResult<TxOutcome> {
        let buyer = self.active_account()?;
        let guard = self.claim(InFlight::Listing(listing_id))?;
        let value = self.prices.total_price(listing_id).await?;
        info!(
            listing_id,
            account = %buyer,
            value = %value.format_units(),
            "submitting purchase"
        );
        let tx = self
            .ledger
            .submit_purchase(&buyer, listing_id, value)
            .await
            .map_err(|err| MarketError::for_listing(listing_id, err, value))?;
        let outcome = self
            .settle(Submitted {
                tx,
                guard,
                listing_id: Some(listing_id),
                attached: value,
                settlement: Settlement::Purchase,
            })
            .await?;
        self.views.refresh_all().await;
        Ok(outcome)
    }

    /// Relists a purchased token at a price typed in whole currency units.
    /// Invalid prices never reach the ledger.
    pub async fn relist(&self, listing_id: ListingId, price: &str) -> MarketResult<TxOutcome> {
        let price = parse_relist_price(price)?;
        self.relist_amount(listing_id, price).await
    }

    pub async fn relist_amount(
        &self,
        listing_id: ListingId,
        price: Amount,
    ) -> MarketResult<TxOutcome> {
        if price.is_zero() {
            return Err(MarketError::invalid_input(
                "relist price must be greater than zero",
            ));
        }
        let seller = self.active_account()?;
        let guard = self.claim(InFlight::Listing(listing_id))?;
        info!(
            listing_id,
            account = %seller,
            price = %price.format_units(),
            "submitting relist"
        );
        let tx = self
            .ledger
            .submit_relist(&seller, listing_id, price)
            .await
            .map_err(|err| MarketError::for_listing(listing_id, err, Amount::ZERO))?;
        let outcome = self
            .settle(Submitted {
                tx,
                guard,
                listing_id: Some(listing_id),
                attached: Amount::ZERO,
                settlement: Settlement::Relist(listing_id),
            })
            .await?;
        let _ = self.views.refresh_catalog().await;
        Ok(outcome)
    }

    /// Mints a new token referencing `uri` to the active account.
    pub async fn mint(&self, uri: &str) -> MarketResult<TxOutcome> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(MarketError::invalid_input("descriptor uri must not be empty"));
        }
        let owner = self.active_account()?;
        let guard = self.claim(InFlight::Mint(uri.to_owned()))?;
        info!(account = %owner, uri, "submitting mint");
        let tx = self.tokens.submit_mint(&owner, uri).await?;
        self.settle(Submitted {
            tx,
            guard,
            listing_id: None,
            attached: Amount::ZERO,
            settlement: Settlement::Mint,
        })
        .await
    }

    /// Whether a submission for `listing_id` is currently awaiting
    /// confirmation.
    pub fn is_in_flight(&self, listing_id: ListingId) -> bool {
        self.in_flight
            .lock()
            .contains(&InFlight::Listing(listing_id))
    }

    fn active_account(&self) -> MarketResult<Account> {
        self.identity.borrow().clone().ok_or(MarketError::NoIdentity)
    }

    fn claim(&self, key: InFlight) -> MarketResult<InFlightGuard> {
        let mut set = self.in_flight.lock();
        if !set.insert(key.clone()) {
            debug!(claim = %key, "refusing duplicate submission");
            return Err(MarketError::Busy(key.to_string()));
        }
        Ok(InFlightGuard {
            set: Arc::clone(&self.in_flight),
            key,
        })
    }

    async fn settle(&self, submitted: Submitted) -> MarketResult<TxOutcome> {
        let (sender, receiver) = oneshot::channel();
        let ledger = Arc::clone(&self.ledger);
        let views = Arc::clone(&self.views);
        tokio::spawn(async move {
            let Submitted {
                tx,
                guard,
                listing_id,
                attached,
                settlement,
            } = submitted;
            let result = match ledger.await_confirmation(tx).await {
                Ok(TxReceipt {
                    status: TxStatus::Reverted { reason },
                    ..
                }) => Err(classify(listing_id, LedgerError::Rejected(reason), attached)),
                Ok(receipt) => Ok(TxOutcome::from(receipt)),
                Err(err) => Err(classify(listing_id, err, attached)),
            };
            match &result {
                Ok(outcome) => {
                    settlement.apply(views.cache());
                    info!(%tx, block_height = outcome.block_height, "transaction confirmed");
                }
                Err(error) => warn!(%tx, %error, "transaction did not confirm"),
            }
            drop(guard);
            if sender.send(result).is_err() {
                debug!(%tx, "confirmation result arrived after the caller stopped waiting");
            }
        });
        match receiver.await {
            Ok(result) => result,
            Err(_) => Err(MarketError::UnavailableLedger(
                "confirmation task aborted".into(),
            )),
        }
    }
}

fn classify(listing_id: Option<ListingId>, error: LedgerError, attached: Amount) -> MarketError {
    match listing_id {
        Some(listing_id) => MarketError::for_listing(listing_id, error, attached),
        None => error.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FailureKind;

    #[test]
    fn relist_prices_are_validated_locally() {
        for input in ["0", "0.0", "-5", "abc", "", "NaN", "inf"] {
            let err = parse_relist_price(input).unwrap_err();
            assert_eq!(err.kind(), FailureKind::InvalidInput, "input {input:?}");
        }
        assert_eq!(
            parse_relist_price("2.5").unwrap(),
            Amount::parse_units("2.5").unwrap()
        );
    }

    #[test]
    fn claims_are_exclusive_until_dropped() {
        let set: InFlightSet = Arc::default();
        assert!(set.lock().insert(InFlight::Listing(7)));
        let guard = InFlightGuard {
            set: Arc::clone(&set),
            key: InFlight::Listing(7),
        };
        assert!(!set.lock().insert(InFlight::Listing(7)));
        drop(guard);
        assert!(set.lock().is_empty());
        assert!(set.lock().insert(InFlight::Listing(7)));
    }
}
