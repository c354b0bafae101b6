use bigdecimal::{BigDecimal, FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Monetary amount in minor units (paise). Arithmetic inside the core is
/// integral; `BigDecimal` appears only at the relational-store boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_paise(paise: i64) -> Self {
        Self(paise)
    }

    pub fn paise(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Convert a major-unit decimal (e.g. "249.50" rupees) into paise.
    /// Values are normalized to 2 decimal places first; extra precision is
    /// truncated the same way the canonical store stores prices.
    pub fn from_decimal(value: &BigDecimal) -> Option<Self> {
        let scaled = value.with_scale(2) * BigDecimal::from(100);
        scaled.to_i64().map(Money)
    }

    pub fn to_decimal(self) -> BigDecimal {
        (BigDecimal::from_i64(self.0).unwrap_or_default() / BigDecimal::from(100)).with_scale(2)
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_mul(self, quantity: u32) -> Option<Money> {
        self.0.checked_mul(i64::from(quantity)).map(Money)
    }

    /// Line total for a cart entry, saturating rather than wrapping.
    pub fn line_total(self, quantity: u32) -> Money {
        self.checked_mul(quantity).unwrap_or(Money(i64::MAX))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}₹{}.{:02}", abs / 100, abs % 100)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, item| {
            acc.checked_add(item).unwrap_or(Money(i64::MAX))
        })
    }
}
