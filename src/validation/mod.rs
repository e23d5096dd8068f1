use bigdecimal::{BigDecimal, One};
use std::fmt;

use crate::domain::money::{fractional_digits, MOBILE_DECIMALS, TOKEN_DECIMALS};
use crate::domain::TransactionType;
use crate::tron::address::{TronAddress, ADDRESS_TEXT_LEN};

pub const COUNTRY_CODE: &str = "254";
pub const CANONICAL_MOBILE_LEN: usize = 12;
/// First subscriber digit of mobile-money capable numbers (07xx / 01xx ranges).
pub const MOBILE_NETWORK_PREFIXES: &[char] = &['7', '1'];
pub const MOBILE_INPUT_MAX_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control() || ch.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

/// Normalizes a mobile number to `254XXXXXXXXX`.
///
/// Accepts `07..`/`01..`, `+254..`, `254..` and bare subscriber numbers;
/// whitespace is ignored. Anything that is not all digits after the
/// optional leading `+` is rejected.
pub fn normalize_mobile_number(raw: &str) -> Result<String, ValidationError> {
    let compact: String = raw.chars().filter(|ch| !ch.is_whitespace()).collect();
    validate_required("mobile_number", &compact)?;
    validate_max_len("mobile_number", &compact, MOBILE_INPUT_MAX_LEN)?;

    let digits = compact.strip_prefix('+').unwrap_or(&compact);
    if !digits.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(ValidationError::new(
            "mobile_number",
            "must contain only digits",
        ));
    }

    let canonical = if let Some(local) = digits.strip_prefix('0') {
        format!("{}{}", COUNTRY_CODE, local)
    } else if digits.starts_with(COUNTRY_CODE) {
        digits.to_string()
    } else {
        format!("{}{}", COUNTRY_CODE, digits)
    };

    if canonical.len() != CANONICAL_MOBILE_LEN {
        return Err(ValidationError::new(
            "mobile_number",
            format!(
                "must normalize to {} digits starting with {}",
                CANONICAL_MOBILE_LEN, COUNTRY_CODE
            ),
        ));
    }

    let network_digit = canonical[COUNTRY_CODE.len()..].chars().next();
    if !network_digit.map_or(false, |d| MOBILE_NETWORK_PREFIXES.contains(&d)) {
        return Err(ValidationError::new(
            "mobile_number",
            "is not a mobile-money number (expected 07xx or 01xx)",
        ));
    }

    Ok(canonical)
}

/// Checks the textual wallet grammar (prefix, length, base58check payload).
pub fn validate_wallet_address(address: &str) -> Result<TronAddress, ValidationError> {
    let address = sanitize_string(address);
    validate_required("wallet_address", &address)?;

    if address.len() != ADDRESS_TEXT_LEN {
        return Err(ValidationError::new(
            "wallet_address",
            format!("must be exactly {} characters", ADDRESS_TEXT_LEN),
        ));
    }

    if !address.starts_with('T') {
        return Err(ValidationError::new("wallet_address", "must start with 'T'"));
    }

    address
        .parse::<TronAddress>()
        .map_err(|e| ValidationError::new("wallet_address", e.to_string()))
}

/// Minimum of one whole unit; mobile-currency amounts must be whole units
/// because the push gateway only charges integers.
pub fn validate_source_amount(amount: &BigDecimal, direction: TransactionType) -> ValidationResult {
    if amount < &BigDecimal::one() {
        return Err(ValidationError::new("source_amount", "must be at least 1"));
    }

    let digits = fractional_digits(amount);
    match direction {
        TransactionType::MobileToToken if digits > 0 => Err(ValidationError::new(
            "source_amount",
            "must be a whole number of mobile-currency units",
        )),
        TransactionType::TokenToMobile if digits > TOKEN_DECIMALS as i64 => {
            Err(ValidationError::new(
                "source_amount",
                format!("must have at most {} decimal places", TOKEN_DECIMALS),
            ))
        }
        _ => Ok(()),
    }
}

/// Rates are strictly positive with at most 8 decimal places.
pub fn validate_exchange_rate(rate: &BigDecimal) -> ValidationResult {
    if rate <= &BigDecimal::from(0) {
        return Err(ValidationError::new("rate", "must be greater than zero"));
    }

    if fractional_digits(rate) > (MOBILE_DECIMALS + TOKEN_DECIMALS) as i64 {
        return Err(ValidationError::new(
            "rate",
            format!(
                "must have at most {} decimal places",
                MOBILE_DECIMALS + TOKEN_DECIMALS
            ),
        ));
    }

    Ok(())
}
