//! Fixed-point money. JSON-LD `Offer.price` is a decimal literal with an
//! ISO-4217 currency code; we never round-trip it through `f64` (the
//! classic float-money bug), instead keeping the literal string alongside
//! an integer "wei" (10^18 minor-unit) representation used only for the
//! payment-matching comparison in `OrderStore::TryMarkPaidByReference`.

use serde::{Deserialize, Serialize};

use crate::errors::{ApiError, ErrorKind};

/// A price tag: a decimal literal plus its currency code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    /// Decimal literal as written, e.g. `"38.00"`. Kept as a string so we
    /// never lose precision re-serializing it.
    pub amount: String,
    pub currency: String,
}

impl Price {
    #[must_use]
    pub fn new(amount: impl Into<String>, currency: impl Into<String>) -> Self {
        Self { amount: amount.into(), currency: currency.into() }
    }

    /// Expected-amount matching rule per spec §4.8 / Open Question #1:
    /// `expected_wei = amount * 10^18`, regardless of currency. This is the
    /// literal, unresolved behavior the spec describes — see
    /// `SPEC_FULL.md` §11.1 and `DESIGN.md`.
    pub fn to_wei(&self) -> Result<u128, ApiError> {
        decimal_str_to_scaled_u128(&self.amount, 18)
    }
}

/// Parses a plain decimal literal (`"38"`, `"38.5"`, `"38.123456789012345678"`)
/// into an integer scaled by `10^scale`, rejecting more fractional digits
/// than `scale` allows (the matching rule is `price * 10^18`, which assumes
/// no more than 18 fractional digits).
fn decimal_str_to_scaled_u128(literal: &str, scale: u32) -> Result<u128, ApiError> {
    let literal = literal.trim();
    let bad = || ErrorKind::InvalidInput(format!("malformed decimal amount: {literal}")).into();

    let (sign, unsigned) = match literal.strip_prefix('-') {
        Some(rest) => (-1i8, rest),
        None => (1i8, literal),
    };
    if sign < 0 {
        return Err(bad());
    }
    if unsigned.is_empty() || !unsigned.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err(bad());
    }

    let mut parts = unsigned.splitn(2, '.');
    let int_part = parts.next().unwrap_or("0");
    let frac_part = parts.next().unwrap_or("");
    if frac_part.len() as u32 > scale {
        return Err(ErrorKind::InvalidInput(format!(
            "amount has more than {scale} fractional digits: {literal}"
        ))
        .into());
    }
    let int_part = if int_part.is_empty() { "0" } else { int_part };

    let int_value: u128 = int_part.parse().map_err(|_| bad())?;
    let mut frac_value: u128 = if frac_part.is_empty() { 0 } else { frac_part.parse().map_err(|_| bad())? };
    let missing_digits = scale - frac_part.len() as u32;
    frac_value *= 10u128.pow(missing_digits);

    let scaled_int = int_value.checked_mul(10u128.pow(scale)).ok_or_else(bad)?;
    scaled_int.checked_add(frac_value).ok_or_else(bad)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_number_scales_correctly() {
        assert_eq!(decimal_str_to_scaled_u128("38", 18).unwrap(), 38_000_000_000_000_000_000);
    }

    #[test]
    fn fractional_scales_correctly() {
        assert_eq!(decimal_str_to_scaled_u128("1.5", 18).unwrap(), 1_500_000_000_000_000_000);
    }

    #[test]
    fn price_to_wei_matches_spec_example() {
        let p = Price::new("38.0", "EUR");
        assert_eq!(p.to_wei().unwrap(), 38_000_000_000_000_000_000);
    }

    #[test]
    fn rejects_too_many_fractional_digits() {
        assert!(decimal_str_to_scaled_u128("1.0000000000000000001", 18).is_err());
    }

    #[test]
    fn rejects_negative_and_garbage() {
        assert!(decimal_str_to_scaled_u128("-1", 18).is_err());
        assert!(decimal_str_to_scaled_u128("abc", 18).is_err());
    }
}
