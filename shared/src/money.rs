//! Money and currency
//!
//! Amounts are `rust_decimal::Decimal`, always paired with a [`Currency`].
//! Arithmetic across currencies is rejected, and rounding always goes to
//! the currency's minor units, half away from zero.

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: Currency, right: Currency },

    #[error("unknown currency: {0}")]
    UnknownCurrency(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

/// Supported ISO-4217 currencies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::Type))]
#[cfg_attr(feature = "db", sqlx(rename_all = "UPPERCASE"))]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Rwf,
    Ugx,
    Kes,
    Tzs,
    Ngn,
    Zar,
    Usd,
    Eur,
    Gbp,
    Cny,
    Jpy,
}

impl Currency {
    pub const ALL: [Currency; 11] = [
        Currency::Rwf,
        Currency::Ugx,
        Currency::Kes,
        Currency::Tzs,
        Currency::Ngn,
        Currency::Zar,
        Currency::Usd,
        Currency::Eur,
        Currency::Gbp,
        Currency::Cny,
        Currency::Jpy,
    ];

    pub const fn code(&self) -> &'static str {
        match self {
            Currency::Rwf => "RWF",
            Currency::Ugx => "UGX",
            Currency::Kes => "KES",
            Currency::Tzs => "TZS",
            Currency::Ngn => "NGN",
            Currency::Zar => "ZAR",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Cny => "CNY",
            Currency::Jpy => "JPY",
        }
    }

    /// Number of decimal places in the smallest unit
    pub const fn minor_units(&self) -> u32 {
        match self {
            Currency::Rwf | Currency::Ugx | Currency::Jpy => 0,
            _ => 2,
        }
    }

    /// Round to minor units, half away from zero
    pub fn round(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.minor_units(), RoundingStrategy::MidpointAwayFromZero)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Currency::ALL
            .into_iter()
            .find(|c| c.code() == upper)
            .ok_or_else(|| MoneyError::UnknownCurrency(s.to_string()))
    }
}

/// Parse a decimal string, rejecting anything that is not a plain number
pub fn parse_amount(s: &str) -> Result<Decimal, MoneyError> {
    Decimal::from_str(s.trim()).map_err(|_| MoneyError::InvalidAmount(s.to_string()))
}

/// Parse a strictly positive amount
pub fn parse_positive(s: &str) -> Result<Decimal, MoneyError> {
    let value = parse_amount(s)?;
    if value <= Decimal::ZERO {
        return Err(MoneyError::InvalidAmount(s.to_string()));
    }
    Ok(value)
}

/// An amount in a currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: Currency,
}

impl Money {
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(Decimal::ZERO, currency)
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    fn same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch {
                left: self.currency,
                right: other.currency,
            });
        }
        Ok(())
    }

    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.same_currency(other)?;
        Ok(Money::new(self.amount + other.amount, self.currency))
    }

    pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.same_currency(other)?;
        Ok(Money::new(self.amount - other.amount, self.currency))
    }

    /// Multiply by a factor (surge multiplier, share percent / 100)
    pub fn scale(&self, factor: Decimal) -> Money {
        Money::new(self.amount * factor, self.currency)
    }

    /// Round to the currency's minor units
    pub fn rounded(&self) -> Money {
        Money::new(self.currency.round(self.amount), self.currency)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}
