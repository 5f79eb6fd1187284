use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Monetary amount in minor currency units (cents).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    const SCALE: u64 = 100;

    pub const ZERO: Amount = Amount(0);

    pub fn from_cents(value: u64) -> Self {
        Amount(value)
    }

    pub fn cents(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    /// `floor(self * pct)`.
    pub fn share(self, pct: Percentage) -> Self {
        let scaled = self.0 as u128 * pct.basis_points() as u128 / Percentage::SCALE as u128;
        // pct <= 100% keeps the result within u64
        Amount(scaled as u64)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / Self::SCALE;
        let frac = self.0 % Self::SCALE;
        write!(f, "{whole}.{frac:02}")
    }
}

/// Error parsing a decimal amount such as `"12.50"`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseAmountError {
    #[error("empty amount")]
    Empty,
    #[error("invalid amount '{0}'")]
    Invalid(String),
    #[error("amount '{0}' has more than two decimal places")]
    TooPrecise(String),
    #[error("amount '{0}' is too large")]
    Overflow(String),
}

impl FromStr for Amount {
    type Err = ParseAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseAmountError::Empty);
        }

        let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
        let is_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if whole.is_empty() || !is_digits(whole) || !is_digits(frac) {
            return Err(ParseAmountError::Invalid(s.to_string()));
        }
        if frac.len() > 2 {
            return Err(ParseAmountError::TooPrecise(s.to_string()));
        }

        let overflow = || ParseAmountError::Overflow(s.to_string());
        let whole: u64 = whole.parse().map_err(|_| overflow())?;
        let frac: u64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<u64>().map_err(|_| overflow())? * 10,
            _ => frac.parse().map_err(|_| overflow())?,
        };

        whole
            .checked_mul(Self::SCALE)
            .and_then(|cents| cents.checked_add(frac))
            .map(Amount)
            .ok_or_else(overflow)
    }
}

/// Percentage in basis points (1/100 of a percent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Percentage(u32);

impl Percentage {
    const SCALE: u32 = 10_000;

    pub const HUNDRED: Percentage = Percentage(Self::SCALE);

    pub fn from_basis_points(bp: u32) -> Self {
        Percentage(bp)
    }

    pub fn basis_points(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_cents_preserves_value() {
        assert_eq!(Amount::from_cents(12345).cents(), 12345);
    }

    #[test]
    fn display_formats_cents() {
        assert_eq!(Amount::from_cents(10_000).to_string(), "100.00");
        assert_eq!(Amount::from_cents(150).to_string(), "1.50");
        assert_eq!(Amount::from_cents(1).to_string(), "0.01");
        assert_eq!(Amount::from_cents(0).to_string(), "0.00");
    }

    #[test]
    fn parse_decimal_strings() {
        assert_eq!("100".parse(), Ok(Amount::from_cents(10_000)));
        assert_eq!("1.5".parse(), Ok(Amount::from_cents(150)));
        assert_eq!("0.01".parse(), Ok(Amount::from_cents(1)));
        assert_eq!(" 12.34 ".parse(), Ok(Amount::from_cents(1234)));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!("".parse::<Amount>(), Err(ParseAmountError::Empty));
        assert!(matches!("-1".parse::<Amount>(), Err(ParseAmountError::Invalid(_))));
        assert!(matches!(".5".parse::<Amount>(), Err(ParseAmountError::Invalid(_))));
        assert!(matches!("1.2.3".parse::<Amount>(), Err(ParseAmountError::Invalid(_))));
        assert!(matches!(
            "1.234".parse::<Amount>(),
            Err(ParseAmountError::TooPrecise(_))
        ));
        assert!(matches!(
            "184467440737095516.16".parse::<Amount>(),
            Err(ParseAmountError::Overflow(_))
        ));
    }

    #[test]
    fn checked_sub_refuses_to_go_negative() {
        let a = Amount::from_cents(100);
        assert_eq!(a.checked_sub(Amount::from_cents(30)), Some(Amount::from_cents(70)));
        assert_eq!(a.checked_sub(Amount::from_cents(100)), Some(Amount::ZERO));
        assert_eq!(a.checked_sub(Amount::from_cents(101)), None);
    }

    #[test]
    fn checked_add_detects_overflow() {
        assert_eq!(Amount::from_cents(u64::MAX).checked_add(Amount::from_cents(1)), None);
    }

    #[test]
    fn share_truncates() {
        let ten_percent = Percentage::from_basis_points(1_000);
        assert_eq!(Amount::from_cents(999).share(ten_percent), Amount::from_cents(99));
        assert_eq!(Amount::from_cents(5).share(ten_percent), Amount::ZERO);
        let third = Percentage::from_basis_points(3_333);
        assert_eq!(Amount::from_cents(100).share(third), Amount::from_cents(33));
    }

    #[test]
    fn share_of_max_does_not_overflow() {
        let max = Amount::from_cents(u64::MAX);
        assert_eq!(max.share(Percentage::HUNDRED), max);
    }

    #[test]
    fn percentage_display() {
        assert_eq!(Percentage::from_basis_points(1_050).to_string(), "10.50%");
    }
}
