//! Exact conversion between human amounts ("12.5") and smallest units.

use crate::error::{Result, TollError};

const MAX_DECIMALS: u8 = 19;

fn invalid(input: &str, reason: &'static str) -> TollError {
    TollError::InvalidUiAmount {
        input: input.to_string(),
        reason,
    }
}

/// Parse a decimal string into smallest units for a mint with `decimals`.
///
/// More fractional digits than `decimals` are rejected rather than rounded.
pub fn parse_ui_amount(input: &str, decimals: u8) -> Result<u64> {
    if decimals > MAX_DECIMALS {
        return Err(invalid(input, "decimals out of range"));
    }
    let trimmed = input.trim().replace('_', "");
    if trimmed.is_empty() {
        return Err(invalid(input, "empty"));
    }
    let (whole, frac) = match trimmed.split_once('.') {
        Some((w, f)) => (w, f),
        None => (trimmed.as_str(), ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(invalid(input, "no digits"));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid(input, "not a non-negative decimal number"));
    }
    if frac.len() > usize::from(decimals) {
        return Err(invalid(input, "more fractional digits than the mint supports"));
    }
    let scale = 10u64.pow(u32::from(decimals));
    let whole: u64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid(input, "too large"))?
    };
    let frac_units: u64 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{frac:0<width$}", width = usize::from(decimals));
        padded.parse().map_err(|_| invalid(input, "too large"))?
    };
    whole
        .checked_mul(scale)
        .and_then(|w| w.checked_add(frac_units))
        .ok_or_else(|| invalid(input, "too large"))
}

/// Render smallest units as a decimal string without trailing zeros.
pub fn format_ui_amount(amount: u64, decimals: u8) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let scale = 10u64.pow(u32::from(decimals.min(MAX_DECIMALS)));
    let whole = amount / scale;
    let frac = amount % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{frac:0>width$}", width = usize::from(decimals));
    format!("{whole}.{}", frac.trim_end_matches('0'))
}
