//! Interfaces of the external marketplace and token contracts.
//!
//! The ledger is authoritative: every read goes to the contract and nothing
//! here re-implements contract rules. Two implementations ship with the
//! crate, [`RpcMarketplaceClient`] talking JSON-RPC to a gateway node and
//! [`InMemoryMarketplace`] for tests and offline demos.

pub mod dto;
pub mod memory;
pub mod rpc;

use async_trait::async_trait;

use crate::errors::LedgerResult;
use crate::types::{Account, Listing, ListingId, PurchaseEvent, TokenId, TxHash, TxReceipt};
use crate::units::Amount;

pub use self::memory::InMemoryMarketplace;
pub use self::rpc::RpcMarketplaceClient;

/// Capabilities of the marketplace contract consumed by the client.
#[async_trait]
pub trait MarketplaceLedger: Send + Sync {
    /// Number of listings ever created. Valid ids are `1..=count`.
    async fn listing_count(&self) -> LedgerResult<u64>;

    async fn listing(&self, listing_id: ListingId) -> LedgerResult<Listing>;

    /// Base price plus protocol fee, computed by the contract.
    async fn total_price(&self, listing_id: ListingId) -> LedgerResult<Amount>;

    /// Submits a purchase signed by `buyer`, attaching `value`.
    async fn submit_purchase(
        &self,
        buyer: &Account,
        listing_id: ListingId,
        value: Amount,
    ) -> LedgerResult<TxHash>;

    /// Submits a relist of a previously purchased token at `price`.
    async fn submit_relist(
        &self,
        seller: &Account,
        listing_id: ListingId,
        price: Amount,
    ) -> LedgerResult<TxHash>;

    /// All purchase events emitted for `buyer`, in log order.
    async fn purchase_events(&self, buyer: &Account) -> LedgerResult<Vec<PurchaseEvent>>;

    /// Suspends until `tx` is included and returns its receipt. Receipts are
    /// chain-wide, so this also settles token contract transactions.
    async fn await_confirmation(&self, tx: TxHash) -> LedgerResult<TxReceipt>;
}

/// Capabilities of the token contract consumed by the client.
#[async_trait]
pub trait TokenContract: Send + Sync {
    /// Descriptor reference of `token_id`.
    async fn token_uri(&self, token_id: TokenId) -> LedgerResult<String>;

    async fn owner_of(&self, token_id: TokenId) -> LedgerResult<Account>;

    /// Submits a mint of a new token referencing `uri`, owned by `owner`.
    async fn submit_mint(&self, owner: &Account, uri: &str) -> LedgerResult<TxHash>;
}
