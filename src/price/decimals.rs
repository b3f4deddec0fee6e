//! Fixed-point normalization of raw on-chain integers.
//!
//! Values are kept as [`BigDecimal`] end to end and truncated (never rounded)
//! to [`CANONICAL_SCALE`] fractional digits.

use bigdecimal::num_bigint::BigInt;
use bigdecimal::{BigDecimal, RoundingMode};
use std::str::FromStr;

use super::PriceError;

pub const CANONICAL_SCALE: i64 = 18;

/// Scales a raw integer string down by `decimals`.
pub fn normalize(raw: &str, decimals: u32) -> Result<BigDecimal, PriceError> {
    let int = BigInt::from_str(raw.trim()).map_err(|_| PriceError::Decimal(raw.to_string()))?;
    Ok(truncate(&BigDecimal::new(int, decimals as i64)))
}

/// Divides a stored raw integer by `10^decimals`. Exact; no rounding happens.
pub fn scale_down(value: &BigDecimal, decimals: u32) -> BigDecimal {
    let (int, scale) = value.as_bigint_and_exponent();
    BigDecimal::new(int, scale + decimals as i64)
}

pub fn truncate(value: &BigDecimal) -> BigDecimal {
    value.with_scale_round(CANONICAL_SCALE, RoundingMode::Down)
}

/// Plain (non-scientific) decimal string, truncated, without trailing zeros.
pub fn format_fixed(value: &BigDecimal) -> String {
    let (int, scale) = truncate(value).as_bigint_and_exponent();
    let negative = int < BigInt::from(0);
    let digits = int.magnitude().to_string();
    let scale = scale.max(0) as usize;

    let (whole, frac) = if digits.len() > scale {
        let split = digits.len() - scale;
        (digits[..split].to_string(), digits[split..].to_string())
    } else {
        ("0".to_string(), format!("{:0>width$}", digits, width = scale))
    };
    let frac = frac.trim_end_matches('0');
    let sign = if negative { "-" } else { "" };
    if frac.is_empty() {
        if whole == "0" {
            "0".to_string()
        } else {
            format!("{}{}", sign, whole)
        }
    } else {
        format!("{}{}.{}", sign, whole, frac)
    }
}
