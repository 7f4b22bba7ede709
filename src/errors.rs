use thiserror::Error;

use crate::types::{ListingId, RevertReason};
use crate::units::{Amount, AmountError};

/// Failures reported by a ledger or token contract transport.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// The node could not be reached or did not answer in time.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    /// The ledger refused the request for contract-level reasons.
    #[error("ledger rejected request: {0}")]
    Rejected(RevertReason),
    /// The ledger answered with data that cannot be interpreted.
    #[error("malformed ledger response: {0}")]
    Malformed(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Failures of the off-chain descriptor store.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("descriptor fetch failed: {0}")]
    Fetch(String),
    #[error("descriptor store answered with HTTP status {0}")]
    Status(u16),
    #[error("malformed descriptor: {0}")]
    Malformed(String),
}

/// Classification of a [`MarketError`] that callers use to decide how to
/// recover.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    UnavailableLedger,
    StaleListing,
    InvalidInput,
    DescriptorUnresolvable,
    NoIdentity,
    Busy,
    MalformedLedger,
    Rejected,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnavailableLedger => "UNAVAILABLE_LEDGER",
            Self::StaleListing => "STALE_LISTING",
            Self::InvalidInput => "INVALID_INPUT",
            Self::DescriptorUnresolvable => "DESCRIPTOR_UNRESOLVABLE",
            Self::NoIdentity => "NO_IDENTITY",
            Self::Busy => "BUSY",
            Self::MalformedLedger => "MALFORMED_LEDGER",
            Self::Rejected => "REJECTED",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MarketError {
    #[error("ledger unavailable: {0}")]
    UnavailableLedger(String),
    #[error("listing {listing_id} is no longer in the expected state: {reason}")]
    StaleListing {
        listing_id: ListingId,
        reason: RevertReason,
    },
    #[error(
        "attached value {} does not cover listing {listing_id}",
        .attached.format_units()
    )]
    InsufficientValue {
        listing_id: ListingId,
        attached: Amount,
    },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("descriptor `{uri}` could not be resolved: {source}")]
    DescriptorUnresolvable {
        uri: String,
        #[source]
        source: DescriptorError,
    },
    #[error("no active account")]
    NoIdentity,
    #[error("an operation on {0} is already in flight")]
    Busy(String),
    #[error("malformed ledger response: {0}")]
    MalformedLedger(String),
    #[error("ledger rejected transaction: {0}")]
    Rejected(RevertReason),
}

pub type MarketResult<T> = Result<T, MarketError>;

impl MarketError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::UnavailableLedger(_) => FailureKind::UnavailableLedger,
            Self::StaleListing { .. } => FailureKind::StaleListing,
            Self::InsufficientValue { .. } | Self::InvalidInput(_) => FailureKind::InvalidInput,
            Self::DescriptorUnresolvable { .. } => FailureKind::DescriptorUnresolvable,
            Self::NoIdentity => FailureKind::NoIdentity,
            Self::Busy(_) => FailureKind::Busy,
            Self::MalformedLedger(_) => FailureKind::MalformedLedger,
            Self::Rejected(_) => FailureKind::Rejected,
        }
    }

    /// Whether repeating the same call unchanged may succeed.
    ///
    /// Stale listings are excluded: the caller has to refresh the catalog
    /// before deciding what to submit next.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UnavailableLedger(_)
                | Self::InsufficientValue { .. }
                | Self::DescriptorUnresolvable { .. }
                | Self::Busy(_)
        )
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn descriptor(uri: impl Into<String>, source: DescriptorError) -> Self {
        Self::DescriptorUnresolvable {
            uri: uri.into(),
            source,
        }
    }

    /// Maps a ledger failure observed while operating on `listing_id`.
    pub fn for_listing(listing_id: ListingId, error: LedgerError, attached: Amount) -> Self {
        match error {
            LedgerError::Rejected(RevertReason::InsufficientValue { .. }) => {
                Self::InsufficientValue {
                    listing_id,
                    attached,
                }
            }
            LedgerError::Rejected(RevertReason::InvalidPrice) => {
                Self::InvalidInput(RevertReason::InvalidPrice.to_string())
            }
            LedgerError::Rejected(RevertReason::Other { message }) => {
                Self::Rejected(RevertReason::Other { message })
            }
            LedgerError::Rejected(reason) => Self::StaleListing { listing_id, reason },
            other => other.into(),
        }
    }
}

impl From<LedgerError> for MarketError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::Unavailable(message) => Self::UnavailableLedger(message),
            LedgerError::Malformed(message) => Self::MalformedLedger(message),
            LedgerError::Rejected(reason) => Self::Rejected(reason),
        }
    }
}

impl From<AmountError> for MarketError {
    fn from(error: AmountError) -> Self {
        Self::InvalidInput(error.to_string())
    }
}
