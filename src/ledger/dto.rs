use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Account, ListingId, TokenId, TxHash};
use crate::units::Amount;

pub const JSONRPC_VERSION: &str = "2.0";

pub const METHOD_ITEM_COUNT: &str = "market_itemCount";
pub const METHOD_GET_ITEM: &str = "market_getItem";
pub const METHOD_TOTAL_PRICE: &str = "market_getTotalPrice";
pub const METHOD_PURCHASE_ITEM: &str = "market_purchaseItem";
pub const METHOD_RELIST_ITEM: &str = "market_relistItem";
pub const METHOD_BOUGHT_EVENTS: &str = "market_boughtEvents";
pub const METHOD_GET_RECEIPT: &str = "market_getReceipt";
pub const METHOD_TOKEN_URI: &str = "nft_tokenURI";
pub const METHOD_OWNER_OF: &str = "nft_ownerOf";
pub const METHOD_MINT: &str = "nft_mint";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_owned()),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_owned()),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC error object. Contract rejections carry a revert code in
/// `data.code` (for example `ALREADY_SOLD`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListingParams {
    pub listing_id: ListingId,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PurchaseParams {
    pub from: Account,
    pub listing_id: ListingId,
    pub value: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelistParams {
    pub from: Account,
    pub listing_id: ListingId,
    pub price: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoughtEventsParams {
    pub buyer: Account,
    /// First block to scan; the client always asks for the whole history.
    pub from_block: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceiptParams {
    pub tx: TxHash,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenParams {
    pub token_id: TokenId,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MintParams {
    pub from: Account,
    pub uri: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CountResponse {
    pub count: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TotalPriceResponse {
    pub total_price: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmittedResponse {
    pub tx: TxHash,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUriResponse {
    pub uri: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerResponse {
    pub owner: Account,
}
