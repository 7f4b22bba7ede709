//! Fixed-point amounts denominated in the ledger's smallest currency unit.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// Number of decimals between the display unit and the smallest ledger unit.
pub const CURRENCY_DECIMALS: u32 = 18;

/// Amount expressed in the smallest ledger unit.
///
/// Amounts travel over the wire as decimal strings because they routinely
/// exceed the range JSON numbers can carry without loss.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u128);

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,
    #[error("amount `{0}` is negative")]
    Negative(String),
    #[error("amount `{0}` is not a decimal number")]
    NotNumeric(String),
    #[error("amount `{input}` has more than {decimals} fractional digits")]
    TooPrecise { input: String, decimals: u32 },
    #[error("amount `{0}` overflows the ledger range")]
    Overflow(String),
}

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_base_units(value: u128) -> Self {
        Self(value)
    }

    pub const fn base_units(self) -> u128 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Parses an amount written in whole currency units, e.g. `"2.5"`.
    pub fn parse_units(input: &str) -> Result<Self, AmountError> {
        parse_units(input, CURRENCY_DECIMALS).map(Self)
    }

    /// Renders the amount in whole currency units, always with at least one
    /// fractional digit (`1.0`, `2.6`, `0.000000000000000001`).
    pub fn format_units(self) -> String {
        format_units(self.0, CURRENCY_DECIMALS)
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Self)
    }

    /// Applies a fee expressed in basis points, rounding down like integer
    /// contract arithmetic does.
    pub fn with_basis_points(self, basis_points: u32) -> Option<Amount> {
        self.0
            .checked_mul(10_000 + u128::from(basis_points))
            .map(|scaled| Self(scaled / 10_000))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    /// Parses a plain integer in the smallest ledger unit.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_units(s, 0).map(Self)
    }
}

impl From<u128> for Amount {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AmountVisitor;

        impl<'de> Visitor<'de> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a decimal string or unsigned integer amount")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Amount, E> {
                Ok(Amount(u128::from(value)))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Amount, E> {
                value.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

/// Parses a non-negative decimal string into an integer scaled by
/// `10^decimals`.
pub fn parse_units(input: &str, decimals: u32) -> Result<u128, AmountError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AmountError::Empty);
    }
    if trimmed.starts_with('-') {
        return Err(AmountError::Negative(trimmed.to_owned()));
    }

    let (whole, fraction) = match trimmed.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (trimmed, ""),
    };
    let all_digits = |part: &str| part.bytes().all(|byte| byte.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !all_digits(whole) || !all_digits(fraction) {
        return Err(AmountError::NotNumeric(trimmed.to_owned()));
    }
    if trimmed.contains('.') && decimals == 0 {
        return Err(AmountError::TooPrecise {
            input: trimmed.to_owned(),
            decimals,
        });
    }
    let fraction = fraction.trim_end_matches('0');
    if fraction.len() > decimals as usize {
        return Err(AmountError::TooPrecise {
            input: trimmed.to_owned(),
            decimals,
        });
    }

    let overflow = || AmountError::Overflow(trimmed.to_owned());
    let scale = 10u128.checked_pow(decimals).ok_or_else(overflow)?;
    let whole_value = if whole.is_empty() {
        0
    } else {
        whole.parse::<u128>().map_err(|_| overflow())?
    };
    let fraction_value = if fraction.is_empty() {
        0
    } else {
        let padding = 10u128.pow(decimals - fraction.len() as u32);
        fraction.parse::<u128>().map_err(|_| overflow())? * padding
    };

    whole_value
        .checked_mul(scale)
        .and_then(|scaled| scaled.checked_add(fraction_value))
        .ok_or_else(overflow)
}

pub fn format_units(value: u128, decimals: u32) -> String {
    if decimals == 0 {
        return value.to_string();
    }
    let scale = 10u128.pow(decimals);
    let whole = value / scale;
    let fraction = value % scale;
    if fraction == 0 {
        return format!("{whole}.0");
    }
    let digits = format!("{fraction:0width$}", width = decimals as usize);
    format!("{whole}.{}", digits.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE: u128 = 1_000_000_000_000_000_000;

    #[test]
    fn parses_whole_and_fractional_units() {
        assert_eq!(Amount::parse_units("1").unwrap().base_units(), ONE);
        assert_eq!(Amount::parse_units("2.5").unwrap().base_units(), 5 * ONE / 2);
        assert_eq!(Amount::parse_units(".1").unwrap().base_units(), ONE / 10);
        assert_eq!(Amount::parse_units(" 3. ").unwrap().base_units(), 3 * ONE);
        assert_eq!(Amount::parse_units("0").unwrap(), Amount::ZERO);
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(
            Amount::parse_units("-5"),
            Err(AmountError::Negative("-5".into()))
        );
        assert_eq!(
            Amount::parse_units("abc"),
            Err(AmountError::NotNumeric("abc".into()))
        );
        assert_eq!(Amount::parse_units("   "), Err(AmountError::Empty));
        assert!(matches!(
            Amount::parse_units("NaN"),
            Err(AmountError::NotNumeric(_))
        ));
        assert!(matches!(
            Amount::parse_units("inf"),
            Err(AmountError::NotNumeric(_))
        ));
        assert!(matches!(
            Amount::parse_units("1.2.3"),
            Err(AmountError::NotNumeric(_))
        ));
        assert!(matches!(
            Amount::parse_units("0.0000000000000000001"),
            Err(AmountError::TooPrecise { .. })
        ));
        assert!(matches!(
            Amount::parse_units("999999999999999999999999999999999"),
            Err(AmountError::Overflow(_))
        ));
    }

    #[test]
    fn formats_like_the_wallet_display() {
        assert_eq!(Amount::from_base_units(ONE).format_units(), "1.0");
        assert_eq!(
            Amount::from_base_units(26 * ONE / 10).format_units(),
            "2.6"
        );
        assert_eq!(Amount::from_base_units(1).format_units(), "0.000000000000000001");
    }

    #[test]
    fn basis_points_round_down() {
        let base = Amount::parse_units("2.5").unwrap();
        assert_eq!(
            base.with_basis_points(400).unwrap(),
            Amount::parse_units("2.6").unwrap()
        );
        assert_eq!(Amount::from_base_units(99).with_basis_points(100).unwrap().base_units(), 99);
    }

    #[test]
    fn serde_accepts_strings_and_integers() {
        let amount: Amount = serde_json::from_str("\"2500\"").unwrap();
        assert_eq!(amount.base_units(), 2500);
        let amount: Amount = serde_json::from_str("42").unwrap();
        assert_eq!(amount.base_units(), 42);
        assert_eq!(serde_json::to_string(&amount).unwrap(), "\"42\"");
        assert!(serde_json::from_str::<Amount>("\"1.5\"").is_err());
    }
}
