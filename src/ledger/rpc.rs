use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, trace};

use super::dto::{
    BoughtEventsParams, CountResponse, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    ListingParams, MintParams, OwnerResponse, PurchaseParams, ReceiptParams, RelistParams,
    SubmittedResponse, TokenParams, TokenUriResponse, TotalPriceResponse, JSONRPC_VERSION,
    METHOD_BOUGHT_EVENTS, METHOD_GET_ITEM, METHOD_GET_RECEIPT, METHOD_ITEM_COUNT, METHOD_MINT,
    METHOD_OWNER_OF, METHOD_PURCHASE_ITEM, METHOD_RELIST_ITEM, METHOD_TOKEN_URI,
    METHOD_TOTAL_PRICE,
};
use super::{MarketplaceLedger, TokenContract};
use crate::config::LedgerConfig;
use crate::errors::{LedgerError, LedgerResult};
use crate::types::{
    Account, Listing, ListingId, PurchaseEvent, RevertReason, TokenId, TxHash, TxReceipt,
};
use crate::units::Amount;

/// JSON-RPC client for a gateway node exposing the marketplace and token
/// contracts. Signing happens on the gateway side for the `from` account.
#[derive(Clone)]
pub struct RpcMarketplaceClient {
    inner: Client,
    url: Url,
    auth_token: Option<String>,
    poll_interval: Duration,
}

impl RpcMarketplaceClient {
    pub fn from_config(config: &LedgerConfig) -> LedgerResult<Self> {
        let url = Url::parse(&config.endpoint).map_err(|err| {
            LedgerError::Unavailable(format!("invalid endpoint {}: {err}", config.endpoint))
        })?;
        Self::from_url(
            url,
            config.auth_token.clone(),
            Duration::from_millis(config.request_timeout_ms),
            Duration::from_millis(config.confirmation_poll_ms),
        )
    }

    pub fn from_url(
        url: Url,
        auth_token: Option<String>,
        timeout: Duration,
        poll_interval: Duration,
    ) -> LedgerResult<Self> {
        let inner = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| LedgerError::Unavailable(err.to_string()))?;
        Ok(Self {
            inner,
            url,
            auth_token,
            poll_interval,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.url
    }

    /// Issues a JSON-RPC call and deserialises the result into `R`.
    pub async fn call<P, R>(&self, method: &str, params: &P) -> LedgerResult<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)
            .map_err(|err| LedgerError::Malformed(format!("{method} params: {err}")))?;
        let payload = JsonRpcRequest {
            jsonrpc: Some(JSONRPC_VERSION.to_owned()),
            id: Some(Value::from(1)),
            method: method.to_owned(),
            params: Some(params),
        };

        let mut request = self.inner.post(self.url.clone()).json(&payload);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        trace!(method, "ledger rpc request");
        let response = request
            .send()
            .await
            .map_err(|err| LedgerError::Unavailable(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(method, status));
        }

        let response: JsonRpcResponse = response
            .json()
            .await
            .map_err(|err| LedgerError::Malformed(format!("{method}: {err}")))?;
        if let Some(error) = response.error {
            return Err(rpc_error(error));
        }

        // `"result": null` deserialises to `None`; pending receipts rely on it.
        let result = response.result.unwrap_or(Value::Null);
        serde_json::from_value(result)
            .map_err(|err| LedgerError::Malformed(format!("{method}: {err}")))
    }

    async fn receipt(&self, tx: TxHash) -> LedgerResult<Option<TxReceipt>> {
        self.call(METHOD_GET_RECEIPT, &ReceiptParams { tx }).await
    }
}

fn status_error(method: &str, status: StatusCode) -> LedgerError {
    let message = format!("{method}: HTTP status {status}");
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        LedgerError::Unavailable(message)
    } else {
        LedgerError::Malformed(message)
    }
}

/// Maps a JSON-RPC error object to a ledger error. Contract rejections carry
/// a revert payload in `data`; everything else is treated as a node failure.
fn rpc_error(error: JsonRpcError) -> LedgerError {
    if let Some(data) = error.data.clone() {
        if let Ok(reason) = serde_json::from_value::<RevertReason>(data) {
            return LedgerError::Rejected(reason);
        }
    }
    match error.code {
        // JSON-RPC server error range used by nodes for execution reverts.
        3 | -32000 => LedgerError::Rejected(RevertReason::other(error.message)),
        -32602..=-32600 => {
            LedgerError::Malformed(format!("[{}] {}", error.code, error.message))
        }
        _ => LedgerError::Unavailable(format!("[{}] {}", error.code, error.message)),
    }
}

#[async_trait]
impl MarketplaceLedger for RpcMarketplaceClient {
    async fn listing_count(&self) -> LedgerResult<u64> {
        let response: CountResponse = self.call(METHOD_ITEM_COUNT, &Value::Null).await?;
        Ok(response.count)
    }

    async fn listing(&self, listing_id: ListingId) -> LedgerResult<Listing> {
        self.call(METHOD_GET_ITEM, &ListingParams { listing_id })
            .await
    }

    async fn total_price(&self, listing_id: ListingId) -> LedgerResult<Amount> {
        let response: TotalPriceResponse = self
            .call(METHOD_TOTAL_PRICE, &ListingParams { listing_id })
            .await?;
        Ok(response.total_price)
    }

    async fn submit_purchase(
        &self,
        buyer: &Account,
        listing_id: ListingId,
        value: Amount,
    ) -> LedgerResult<TxHash> {
        let params = PurchaseParams {
            from: buyer.clone(),
            listing_id,
            value,
        };
        let response: SubmittedResponse = self.call(METHOD_PURCHASE_ITEM, &params).await?;
        Ok(response.tx)
    }

    async fn submit_relist(
        &self,
        seller: &Account,
        listing_id: ListingId,
        price: Amount,
    ) -> LedgerResult<TxHash> {
        let params = RelistParams {
            from: seller.clone(),
            listing_id,
            price,
        };
        let response: SubmittedResponse = self.call(METHOD_RELIST_ITEM, &params).await?;
        Ok(response.tx)
    }

    async fn purchase_events(&self, buyer: &Account) -> LedgerResult<Vec<PurchaseEvent>> {
        let params = BoughtEventsParams {
            buyer: buyer.clone(),
            from_block: 0,
        };
        self.call(METHOD_BOUGHT_EVENTS, &params).await
    }

    async fn await_confirmation(&self, tx: TxHash) -> LedgerResult<TxReceipt> {
        loop {
            if let Some(receipt) = self.receipt(tx).await? {
                return Ok(receipt);
            }
            debug!(%tx, "transaction not yet included");
            sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl TokenContract for RpcMarketplaceClient {
    async fn token_uri(&self, token_id: TokenId) -> LedgerResult<String> {
        let response: TokenUriResponse = self
            .call(METHOD_TOKEN_URI, &TokenParams { token_id })
            .await?;
        Ok(response.uri)
    }

    async fn owner_of(&self, token_id: TokenId) -> LedgerResult<Account> {
        let response: OwnerResponse = self
            .call(METHOD_OWNER_OF, &TokenParams { token_id })
            .await?;
        Ok(response.owner)
    }

    async fn submit_mint(&self, owner: &Account, uri: &str) -> LedgerResult<TxHash> {
        let params = MintParams {
            from: owner.clone(),
            uri: uri.to_owned(),
        };
        let response: SubmittedResponse = self.call(METHOD_MINT, &params).await?;
        Ok(response.tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn revert_payloads_map_to_rejections() {
        let error = JsonRpcError::new(
            -32000,
            "execution reverted: item already sold",
            Some(json!({ "code": "ALREADY_SOLD" })),
        );
        assert_eq!(
            rpc_error(error),
            LedgerError::Rejected(RevertReason::AlreadySold)
        );

        let error = JsonRpcError::new(
            -32000,
            "execution reverted",
            Some(json!({ "code": "INSUFFICIENT_VALUE", "required": "2600" })),
        );
        assert_eq!(
            rpc_error(error),
            LedgerError::Rejected(RevertReason::InsufficientValue {
                required: Some(Amount::from_base_units(2600))
            })
        );
    }

    #[test]
    fn bare_errors_are_classified_by_code() {
        let reverted = rpc_error(JsonRpcError::new(3, "execution reverted: paused", None));
        assert_eq!(
            reverted,
            LedgerError::Rejected(RevertReason::other("execution reverted: paused"))
        );

        let bad_params = rpc_error(JsonRpcError::new(-32602, "invalid params", None));
        assert!(matches!(bad_params, LedgerError::Malformed(_)));

        let internal = rpc_error(JsonRpcError::new(-32603, "internal error", None));
        assert!(matches!(internal, LedgerError::Unavailable(_)));
    }

    #[test]
    fn http_statuses_split_transient_from_permanent() {
        assert!(matches!(
            status_error("m", StatusCode::BAD_GATEWAY),
            LedgerError::Unavailable(_)
        ));
        assert!(matches!(
            status_error("m", StatusCode::TOO_MANY_REQUESTS),
            LedgerError::Unavailable(_)
        ));
        assert!(matches!(
            status_error("m", StatusCode::NOT_FOUND),
            LedgerError::Malformed(_)
        ));
    }
}
