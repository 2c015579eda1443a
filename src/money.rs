//! Money Module
//!
//! All monetary values are `rust_decimal::Decimal` with at most
//! [`AMOUNT_SCALE`] fractional digits, matching the `NUMERIC(12,2)` columns
//! of the ledger. Floating point never touches a balance.
//!
//! ## Usage
//! ```rust
//! use wallet_transfer::money::{parse_amount, canonical_amount};
//!
//! let amount = parse_amount("25.50").unwrap();
//! assert_eq!(canonical_amount(amount), "25.5");
//! ```

use rust_decimal::prelude::*;
use thiserror::Error;

/// Fractional digits stored by the ledger.
pub const AMOUNT_SCALE: u32 = 2;

/// Largest value a `NUMERIC(12,2)` column can hold: 9_999_999_999.99
pub fn max_amount() -> Decimal {
    Decimal::new(999_999_999_999, AMOUNT_SCALE)
}

/// Money parsing / range errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount too large, would overflow")]
    Overflow,
}

// ============================================================================
// Parse: Client → Decimal
// ============================================================================

/// Parse a client-supplied amount string.
///
/// Format rules (sign is NOT checked here, the transfer engine owns that):
/// - no empty string
/// - no `.5` / `5.`
/// - no scientific notation
/// - no `+` prefix
pub fn parse_amount(amount_str: &str) -> Result<Decimal, MoneyError> {
    let s = amount_str.trim();
    if s.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }
    if s.starts_with('+') {
        return Err(MoneyError::InvalidFormat("+ prefix not allowed".into()));
    }
    if s.contains('e') || s.contains('E') {
        return Err(MoneyError::InvalidFormat(
            "scientific notation not allowed".into(),
        ));
    }

    let unsigned = s.strip_prefix('-').unwrap_or(s);
    if unsigned.starts_with('.') {
        return Err(MoneyError::InvalidFormat(
            "missing leading zero (e.g., use 0.5 instead of .5)".into(),
        ));
    }
    if unsigned.ends_with('.') {
        return Err(MoneyError::InvalidFormat(
            "missing fractional part (e.g., use 5.0 instead of 5.)".into(),
        ));
    }

    Decimal::from_str(s).map_err(|e| MoneyError::InvalidFormat(e.to_string()))
}

/// Check an amount fits the ledger column: scale and range.
///
/// Trailing zeros do not count towards precision (`10.500` is `10.5`).
pub fn check_amount(amount: Decimal) -> Result<(), MoneyError> {
    let normalized = amount.normalize();
    if normalized.scale() > AMOUNT_SCALE {
        return Err(MoneyError::PrecisionOverflow {
            provided: normalized.scale(),
            max: AMOUNT_SCALE,
        });
    }
    if normalized.abs() > max_amount() {
        return Err(MoneyError::Overflow);
    }
    Ok(())
}

/// Canonical string form used in request fingerprints.
///
/// `10`, `10.0` and `10.00` are the same logical amount.
pub fn canonical_amount(amount: Decimal) -> String {
    amount.normalize().to_string()
}

/// Format for display with exactly [`AMOUNT_SCALE`] digits.
pub fn format_amount(amount: Decimal) -> String {
    format!("{:.prec$}", amount, prec = AMOUNT_SCALE as usize)
}
