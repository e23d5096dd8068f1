//! Fixed-point amount conversion between mobile currency and the token.

use bigdecimal::{BigDecimal, ToPrimitive, Zero};

use super::TransactionType;

/// Native precision of the token (USDT TRC-20).
pub const TOKEN_DECIMALS: u32 = 6;
/// Native precision of the mobile currency (KES).
pub const MOBILE_DECIMALS: u32 = 2;

/// Converts `source` at `rate` (mobile units per token) into the target asset.
///
/// mobile -> token divides and rounds half-up to 6 places; token -> mobile
/// multiplies and rounds half-up to 2 places. Returns `None` for a
/// non-positive rate.
pub fn convert_amount(
    source: &BigDecimal,
    rate: &BigDecimal,
    direction: TransactionType,
) -> Option<BigDecimal> {
    if rate <= &BigDecimal::zero() {
        return None;
    }

    let converted = match direction {
        TransactionType::MobileToToken => (source / rate)
            .round(TOKEN_DECIMALS as i64)
            .with_scale(TOKEN_DECIMALS as i64),
        TransactionType::TokenToMobile => (source * rate)
            .round(MOBILE_DECIMALS as i64)
            .with_scale(MOBILE_DECIMALS as i64),
    };

    Some(converted)
}

/// `floor(amount * 10^decimals)` as an integer count of minor units.
pub fn to_minor_units(amount: &BigDecimal, decimals: u32) -> Option<u64> {
    if amount < &BigDecimal::zero() {
        return None;
    }

    let factor = BigDecimal::from(10u64.pow(decimals));
    (amount * factor).with_scale(0).to_u64()
}

/// Number of digits after the decimal point, ignoring trailing zeros.
pub fn fractional_digits(amount: &BigDecimal) -> i64 {
    let (_, scale) = amount.normalized().as_bigint_and_exponent();
    scale.max(0)
}
