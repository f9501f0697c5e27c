//! Money amounts using decimal arithmetic.
//!
//! The shop trades in a single currency, so a price is just a non-negative
//! decimal with at most two fractional digits. Stored as `NUMERIC(10, 2)`.

use core::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

/// Errors that can occur when constructing a [`Price`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PriceError {
    /// The amount is below zero.
    #[error("price cannot be negative")]
    Negative,
    /// The amount has more than two fractional digits.
    #[error("price cannot have more than two decimal places")]
    TooPrecise,
    /// The amount does not fit `NUMERIC(10, 2)`.
    #[error("price must be less than {max}")]
    TooLarge {
        /// Exclusive upper bound.
        max: Decimal,
    },
}

/// A non-negative money amount with cent precision.
///
/// Serializes as a decimal string (`"12.50"`) so clients never see float
/// rounding artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Default)]
#[serde(transparent)]
pub struct Price(Decimal);

impl Price {
    /// Zero.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Exclusive upper bound imposed by the `NUMERIC(10, 2)` columns.
    pub const MAX: Decimal = Decimal::from_parts(1_410_065_408, 2, 0, false, 2);

    /// Validate and wrap a decimal amount.
    ///
    /// # Errors
    ///
    /// Returns [`PriceError`] if the amount is negative, has more than two
    /// decimal places, or exceeds the column range.
    pub fn new(amount: Decimal) -> Result<Self, PriceError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(PriceError::Negative);
        }
        if amount.normalize().scale() > 2 {
            return Err(PriceError::TooPrecise);
        }
        if amount >= Self::MAX {
            return Err(PriceError::TooLarge { max: Self::MAX });
        }
        let mut amount = amount;
        amount.rescale(2);
        Ok(Self(amount))
    }

    /// Build a price from a whole number of cents.
    #[must_use]
    pub fn from_cents(cents: u32) -> Self {
        Self(Decimal::new(i64::from(cents), 2))
    }

    /// The underlying decimal amount.
    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// Price of `quantity` units.
    ///
    /// # Errors
    ///
    /// Returns [`PriceError::TooLarge`] if the result leaves the column range.
    pub fn checked_times(self, quantity: u32) -> Result<Self, PriceError> {
        Self::bounded(self.0.checked_mul(Decimal::from(quantity)))
    }

    /// Sum of two prices.
    ///
    /// # Errors
    ///
    /// Returns [`PriceError::TooLarge`] if the result leaves the column range.
    pub fn checked_add(self, rhs: Self) -> Result<Self, PriceError> {
        Self::bounded(self.0.checked_add(rhs.0))
    }

    /// Sum of many prices.
    ///
    /// # Errors
    ///
    /// Returns [`PriceError::TooLarge`] as soon as a partial sum leaves the
    /// column range.
    pub fn checked_sum(prices: impl IntoIterator<Item = Self>) -> Result<Self, PriceError> {
        prices.into_iter().try_fold(Self::ZERO, Self::checked_add)
    }

    fn bounded(amount: Option<Decimal>) -> Result<Self, PriceError> {
        match amount {
            Some(amount) if amount < Self::MAX => Ok(Self(amount)),
            _ => Err(PriceError::TooLarge { max: Self::MAX }),
        }
    }

    /// Whether the amount is zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl TryFrom<Decimal> for Price {
    type Error = PriceError;

    fn try_from(amount: Decimal) -> Result<Self, Self::Error> {
        Self::new(amount)
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let amount = <Decimal as Deserialize>::deserialize(deserializer)?;
        Self::new(amount).map_err(serde::de::Error::custom)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for Price {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <Decimal as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <Decimal as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for Price {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <Decimal as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).expect("valid decimal")
    }

    #[test]
    fn test_new_rescales_to_cents() {
        let price = Price::new(dec("4.5")).expect("valid");
        assert_eq!(price.to_string(), "4.50");
        assert_eq!(serde_json::to_string(&price).expect("serialize"), "\"4.50\"");
    }

    #[test]
    fn test_new_rejects_invalid_amounts() {
        assert_eq!(Price::new(dec("-0.01")), Err(PriceError::Negative));
        assert_eq!(Price::new(dec("1.005")), Err(PriceError::TooPrecise));
        assert!(matches!(
            Price::new(dec("100000000.00")),
            Err(PriceError::TooLarge { .. })
        ));
        // Trailing zeros are not extra precision.
        assert!(Price::new(dec("2.5000")).is_ok());
    }

    #[test]
    fn test_max_is_one_hundred_million() {
        assert_eq!(Price::MAX, dec("100000000.00"));
        assert!(Price::new(dec("99999999.99")).is_ok());
    }

    #[test]
    fn test_arithmetic() {
        let unit = Price::from_cents(1_299);
        assert_eq!(unit.checked_times(3).expect("fits").to_string(), "38.97");

        let total = Price::checked_sum([Price::from_cents(100), Price::from_cents(250)]);
        assert_eq!(total, Ok(Price::from_cents(350)));
        assert_eq!(Price::checked_sum([]), Ok(Price::ZERO));
    }

    #[test]
    fn test_arithmetic_stays_below_max() {
        let top = Price::new(dec("99999999.99")).expect("valid");

        assert!(matches!(top.checked_times(2), Err(PriceError::TooLarge { .. })));
        assert!(matches!(
            top.checked_add(Price::from_cents(1)),
            Err(PriceError::TooLarge { .. })
        ));
        assert!(Price::checked_sum([top, Price::from_cents(1)]).is_err());

        let half = Price::new(dec("50000000.00")).expect("valid");
        assert_eq!(half.checked_times(1), Ok(half));
        assert!(half.checked_times(2).is_err());
        assert_eq!(top.checked_times(0), Ok(Price::ZERO));
    }

    #[test]
    fn test_deserialize_validates() {
        let from_str: Price = serde_json::from_str("\"7.25\"").expect("string");
        assert_eq!(from_str, Price::from_cents(725));

        assert!(serde_json::from_str::<Price>("\"-1\"").is_err());
    }
}
