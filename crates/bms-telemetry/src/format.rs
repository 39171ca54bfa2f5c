//! Value normalisation applied before anything reaches the bus.

use crate::error::FormatError;
use crate::types::TelemetryValue;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use tracing::error;

/// Round a numeric telemetry value to `n` significant digits.
///
/// Text, booleans, lists and records pass through unchanged, as do zero and
/// non-finite floats (they have no logarithm). When the number of decimal places
/// works out to zero the result is an integer.
pub fn round_to_n(value: &TelemetryValue, n: u32) -> Result<TelemetryValue, FormatError> {
    let rounded = match value {
        TelemetryValue::F64(x) => round_f64(*x, n),
        TelemetryValue::I64(x) => round_i64(*x, n).map(TelemetryValue::I64),
        _ => Ok(value.clone()),
    };
    if let Err(e) = &rounded {
        error!("failed to round {} to {} significant digits: {}", value, n, e);
    }
    rounded
}

/// Decimal places that keep `n` significant digits for a number of this magnitude.
fn decimal_places(magnitude: i32, n: u32) -> Result<i32, FormatError> {
    if n == 0 {
        return Err(FormatError::InvalidPrecision(n));
    }
    let n = i32::try_from(n).map_err(|_| FormatError::InvalidPrecision(n))?;
    Ok((n - 1).saturating_sub(magnitude))
}

fn round_f64(x: f64, n: u32) -> Result<TelemetryValue, FormatError> {
    if !x.is_finite() || x == 0.0 {
        return Ok(TelemetryValue::F64(x));
    }
    let magnitude = x.abs().log10().floor() as i32;
    let digits = decimal_places(magnitude, n)?;

    match digits.cmp(&0) {
        Ordering::Equal => {
            let r = x.round_ties_even();
            // beyond i64 the float is already integral
            if r.abs() >= i64::MAX as f64 {
                return Ok(TelemetryValue::F64(r));
            }
            Ok(TelemetryValue::I64(r as i64))
        }
        Ordering::Greater => {
            let text = format!("{x:.prec$}", prec = digits as usize);
            text.parse::<f64>()
                .map(TelemetryValue::F64)
                .map_err(|_| FormatError::Parse { text })
        }
        Ordering::Less => {
            let scale = 10f64.powi(-digits);
            let r = (x / scale).round_ties_even() * scale;
            if !r.is_finite() {
                return Err(FormatError::NonFinite { value: x, digits });
            }
            Ok(TelemetryValue::F64(r))
        }
    }
}

fn round_i64(x: i64, n: u32) -> Result<i64, FormatError> {
    if x == 0 {
        return Ok(x);
    }
    let magnitude = x.unsigned_abs().ilog10() as i32;
    let digits = decimal_places(magnitude, n)?;
    if digits >= 0 {
        return Ok(x);
    }

    let overflow = || FormatError::Overflow {
        value: x.to_string(),
        digits,
    };
    let scale = 10i64.checked_pow(digits.unsigned_abs()).ok_or_else(overflow)?;
    let q = x.div_euclid(scale);
    let r = x.rem_euclid(scale);
    // ties go to the even quotient
    let up = match (2 * r).cmp(&scale) {
        Ordering::Greater => true,
        Ordering::Equal => q % 2 != 0,
        Ordering::Less => false,
    };
    let q = if up { q.checked_add(1).ok_or_else(overflow)? } else { q };
    q.checked_mul(scale).ok_or_else(overflow)
}

/// Drop entries that carry no value: `null`, empty strings and non-finite numbers.
///
/// Non-finite floats already become `null` when converted into a JSON value, so
/// they are removed along with explicit absences. Zero, `false` and non-empty
/// strings are kept.
pub fn remove_none_values(fields: &mut Map<String, Value>) {
    fields.retain(|_, v| match v {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Number(num) => num.as_f64().map_or(true, f64::is_finite),
        _ => true,
    });
}
