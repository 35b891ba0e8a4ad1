//! Monetary types for NyumbaPay.
//!
//! All monetary state is carried as integer minor units (100 minor units =
//! 1 major unit). Floating point never touches money; major-unit views go
//! through `rust_decimal` for rendering and percentage math.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Neg, Sub};
use thiserror::Error;

/// Closed set of currencies the platform settles in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    KES,
    USD,
    EUR,
    GBP,
    TZS,
    UGX,
}

impl Currency {
    /// All supported currencies.
    pub const ALL: [Currency; 6] = [
        Currency::KES,
        Currency::USD,
        Currency::EUR,
        Currency::GBP,
        Currency::TZS,
        Currency::UGX,
    ];

    /// ISO 4217 code.
    pub fn code(&self) -> &'static str {
        match self {
            Currency::KES => "KES",
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::TZS => "TZS",
            Currency::UGX => "UGX",
        }
    }

    /// Minor units per major unit. Uniform across the supported set.
    pub fn minor_per_major(&self) -> i64 {
        100
    }

    /// Parse an ISO 4217 code.
    pub fn parse(code: &str) -> Result<Self, UnknownCurrency> {
        match code.to_ascii_uppercase().as_str() {
            "KES" => Ok(Currency::KES),
            "USD" => Ok(Currency::USD),
            "EUR" => Ok(Currency::EUR),
            "GBP" => Ok(Currency::GBP),
            "TZS" => Ok(Currency::TZS),
            "UGX" => Ok(Currency::UGX),
            _ => Err(UnknownCurrency(code.to_string())),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Error for a currency code outside the supported set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported currency code: {0}")]
pub struct UnknownCurrency(pub String);

/// Error when attempting arithmetic across currencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("currency mismatch: expected {expected}, got {actual}")]
pub struct CurrencyMismatch {
    pub expected: Currency,
    pub actual: Currency,
}

/// A monetary amount in integer minor units with its currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    /// Amount in minor units (cents). May be negative.
    pub minor_units: i64,
    /// Currency of the amount.
    pub currency: Currency,
}

impl Money {
    /// Create a new amount.
    pub fn new(minor_units: i64, currency: Currency) -> Self {
        Self {
            minor_units,
            currency,
        }
    }

    /// Zero in the given currency.
    pub fn zero(currency: Currency) -> Self {
        Self {
            minor_units: 0,
            currency,
        }
    }

    /// Check if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.minor_units == 0
    }

    /// Check if the amount is strictly positive.
    pub fn is_positive(&self) -> bool {
        self.minor_units > 0
    }

    /// Check if the amount is strictly negative.
    pub fn is_negative(&self) -> bool {
        self.minor_units < 0
    }

    /// Absolute value.
    pub fn abs(&self) -> Self {
        Self {
            minor_units: self.minor_units.abs(),
            currency: self.currency,
        }
    }

    /// Add, failing on currency mismatch.
    pub fn checked_add(self, other: Money) -> Result<Money, CurrencyMismatch> {
        self.ensure_same_currency(other)?;
        Ok(Money {
            minor_units: self.minor_units + other.minor_units,
            currency: self.currency,
        })
    }

    /// Subtract, failing on currency mismatch.
    pub fn checked_sub(self, other: Money) -> Result<Money, CurrencyMismatch> {
        self.ensure_same_currency(other)?;
        Ok(Money {
            minor_units: self.minor_units - other.minor_units,
            currency: self.currency,
        })
    }

    /// Fail unless `other` is in the same currency.
    pub fn ensure_same_currency(&self, other: Money) -> Result<(), CurrencyMismatch> {
        if self.currency == other.currency {
            Ok(())
        } else {
            Err(CurrencyMismatch {
                expected: self.currency,
                actual: other.currency,
            })
        }
    }

    /// Major-unit view as an exact decimal (no floating point).
    pub fn to_major(&self) -> Decimal {
        Decimal::new(self.minor_units, 2)
    }

    /// Render in major units with two fraction digits, e.g. `450.00`.
    pub fn format_major(&self) -> String {
        let sign = if self.minor_units < 0 { "-" } else { "" };
        let abs = self.minor_units.abs();
        format!("{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.currency, self.format_major())
    }
}

impl Add for Money {
    type Output = Result<Money, CurrencyMismatch>;

    fn add(self, other: Money) -> Self::Output {
        self.checked_add(other)
    }
}

impl Sub for Money {
    type Output = Result<Money, CurrencyMismatch>;

    fn sub(self, other: Money) -> Self::Output {
        self.checked_sub(other)
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money {
            minor_units: -self.minor_units,
            currency: self.currency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn money_arithmetic_same_currency() {
        let a = Money::new(100_00, Currency::KES);
        let b = Money::new(50_00, Currency::KES);

        assert_eq!((a + b).unwrap().minor_units, 150_00);
        assert_eq!((a - b).unwrap().minor_units, 50_00);
    }

    #[test]
    fn money_arithmetic_rejects_mixed_currencies() {
        let a = Money::new(100_00, Currency::KES);
        let b = Money::new(100_00, Currency::USD);

        assert!((a + b).is_err());
        assert!((a - b).is_err());
    }

    #[test]
    fn major_unit_views() {
        let m = Money::new(45000, Currency::KES);
        assert_eq!(m.to_major(), dec!(450.00));
        assert_eq!(m.format_major(), "450.00");
        assert_eq!(m.to_string(), "KES 450.00");

        let neg = Money::new(-305, Currency::USD);
        assert_eq!(neg.format_major(), "-3.05");
    }

    #[test]
    fn currency_parse() {
        assert_eq!(Currency::parse("kes").unwrap(), Currency::KES);
        assert!(Currency::parse("JPY").is_err());
    }

    #[test]
    fn sign_predicates() {
        assert!(Money::new(1, Currency::UGX).is_positive());
        assert!(Money::new(-1, Currency::UGX).is_negative());
        assert!(Money::zero(Currency::UGX).is_zero());
        assert_eq!(Money::new(-7, Currency::TZS).abs().minor_units, 7);
    }
}
