//! Read projections of ledger state and the view records derived from them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::units::Amount;

/// Ledger-assigned listing identifier. Ids start at 1 and are never reused.
pub type ListingId = u64;

/// Token identifier on the token contract.
pub type TokenId = u64;

/// Address-like identity of an account.
///
/// Addresses compare case-insensitively, so the value is normalised to lower
/// case on construction.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Account(String);

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AccountError {
    #[error("account identifier is empty")]
    Empty,
    #[error("account identifier `{0}` contains whitespace")]
    Whitespace(String),
}

impl Account {
    pub fn new(raw: impl AsRef<str>) -> Result<Self, AccountError> {
        let raw = raw.as_ref().trim();
        if raw.is_empty() {
            return Err(AccountError::Empty);
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(AccountError::Whitespace(raw.to_owned()));
        }
        Ok(Self(raw.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Builds an account from a compile-time constant known to be valid.
    pub(crate) fn from_static(raw: &'static str) -> Self {
        Self(raw.to_ascii_lowercase())
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Account {
    type Err = AccountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Account {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Account::new(raw).map_err(serde::de::Error::custom)
    }
}

/// Listing record as stored by the marketplace contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub listing_id: ListingId,
    pub seller: Account,
    pub token_id: TokenId,
    pub base_price: Amount,
    pub sold: bool,
}

/// Off-chain display metadata of a token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub name: String,
    pub description: String,
    /// Reference to the token image, usually a URL.
    pub image: String,
}

/// Catalog entry shown on the buy surface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DisplayItem {
    pub listing_id: ListingId,
    pub seller: Account,
    pub token_id: TokenId,
    /// Base price plus the protocol fee, as reported by the ledger.
    pub total_price: Amount,
    pub descriptor: Descriptor,
}

/// Entry of the append-only purchase log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseEvent {
    pub listing_id: ListingId,
    pub token_id: TokenId,
    /// Base price of the listing at the time of the purchase.
    pub price: Amount,
    pub seller: Account,
    pub buyer: Account,
    pub block_height: u64,
}

/// Purchase reconstructed for the history view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PurchaseRecord {
    pub listing_id: ListingId,
    pub token_id: TokenId,
    /// Price recorded in the purchase event.
    pub price_paid: Amount,
    /// Total price the ledger reports for the listing id right now.
    pub live_total_price: Amount,
    pub descriptor: Descriptor,
}

/// Transaction identifier, rendered as `0x`-prefixed hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHash(pub [u8; 32]);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({self})")
    }
}

impl FromStr for TxHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(digits, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Reason the ledger gave for refusing or reverting a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RevertReason {
    AlreadySold,
    InsufficientValue { required: Option<Amount> },
    NotOwner,
    UnknownListing,
    InvalidPrice,
    Other { message: String },
}

impl RevertReason {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

impl fmt::Display for RevertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadySold => write!(f, "item already sold"),
            Self::InsufficientValue {
                required: Some(required),
            } => write!(
                f,
                "attached value does not cover price and fee (required {})",
                required.format_units()
            ),
            Self::InsufficientValue { required: None } => {
                write!(f, "attached value does not cover price and fee")
            }
            Self::NotOwner => write!(f, "sender does not own the token"),
            Self::UnknownListing => write!(f, "item doesn't exist"),
            Self::InvalidPrice => write!(f, "price must be greater than zero"),
            Self::Other { message } => write!(f, "{message}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TxStatus {
    Confirmed,
    Reverted { reason: RevertReason },
}

/// Final inclusion record of a submitted transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx: TxHash,
    pub block_height: u64,
    #[serde(flatten)]
    pub status: TxStatus,
    /// Listing id assigned by a confirmed relist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_listing: Option<ListingId>,
    /// Token id assigned by a confirmed mint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minted_token: Option<TokenId>,
}

impl TxReceipt {
    pub fn is_confirmed(&self) -> bool {
        matches!(self.status, TxStatus::Confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accounts_normalise_case_and_reject_blank_input() {
        let upper = Account::new("0xABCdef").expect("account");
        let lower = Account::new(" 0xabcdef ").expect("account");
        assert_eq!(upper, lower);
        assert_eq!(upper.as_str(), "0xabcdef");
        assert_eq!(Account::new("  "), Err(AccountError::Empty));
        assert!(matches!(
            Account::new("0x ab"),
            Err(AccountError::Whitespace(_))
        ));
    }

    #[test]
    fn tx_hash_parses_with_and_without_prefix() {
        let hash = TxHash([0xab; 32]);
        let rendered = hash.to_string();
        assert!(rendered.starts_with("0xabab"));
        assert_eq!(rendered.parse::<TxHash>().unwrap(), hash);
        assert_eq!(rendered[2..].parse::<TxHash>().unwrap(), hash);
        assert!("0x1234".parse::<TxHash>().is_err());
    }

    #[test]
    fn receipts_decode_reverted_status() {
        let json = serde_json::json!({
            "tx": format!("0x{}", "11".repeat(32)),
            "block_height": 7,
            "status": "reverted",
            "reason": { "code": "ALREADY_SOLD" },
        });
        let receipt: TxReceipt = serde_json::from_value(json).expect("receipt");
        assert_eq!(
            receipt.status,
            TxStatus::Reverted {
                reason: RevertReason::AlreadySold
            }
        );
        assert!(!receipt.is_confirmed());
        assert_eq!(receipt.created_listing, None);
    }
}
