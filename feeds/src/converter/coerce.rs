//! Scalar coercions shared by the field converters.

use super::FieldError;
use chrono::{DateTime, Utc};
use serde_json::{Number, Value};

const MICROS_THRESHOLD: f64 = 1e15;
const MILLIS_THRESHOLD: f64 = 1e12;

pub fn to_string(key: &str, value: &Value) -> Result<String, FieldError> {
    match value {
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(number_to_string(n)),
        Value::String(s) => Ok(s.clone()),
        _ => Err(FieldError::new(key, value, "string/bool/int/float")),
    }
}

fn number_to_string(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    let f = n.as_f64().unwrap_or_default();
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        (f as i64).to_string()
    } else {
        format!("{f:.6}")
    }
}

/// Returns `None` when the value has no exact 32-bit integer form.
pub fn to_int32(value: &Value) -> Option<i32> {
    match value {
        Value::Bool(b) => Some(i32::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i32::try_from(i).ok()
            } else if let Some(u) = n.as_u64() {
                i32::try_from(u).ok()
            } else {
                let f = n.as_f64()?;
                let in_range = f >= i32::MIN as f64 && f <= i32::MAX as f64;
                (in_range && f.trunc() == f).then_some(f as i32)
            }
        }
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Numbers are unix epoch counts. Values above 1e15 are taken as
/// microseconds and values above 1e12 as milliseconds.
pub fn to_timestamp(key: &str, value: &Value) -> Result<DateTime<Utc>, FieldError> {
    let secs = match value {
        Value::Number(n) => match n.as_i64() {
            Some(mut i) => {
                if i as f64 > MICROS_THRESHOLD {
                    i /= 1_000_000;
                }
                if i as f64 > MILLIS_THRESHOLD {
                    i /= 1_000;
                }
                i
            }
            None => {
                let mut f = n.as_f64().unwrap_or_default();
                if f > MICROS_THRESHOLD {
                    f /= 1_000_000.0;
                }
                if f > MILLIS_THRESHOLD {
                    f /= 1_000.0;
                }
                f as i64
            }
        },
        Value::String(s) => {
            return DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| FieldError::new(key, value, "timestamp in RFC3339 format"));
        }
        _ => return Err(FieldError::new(key, value, "timestamp")),
    };

    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| FieldError::new(key, value, "timestamp within range"))
}

pub fn to_joined_string(key: &str, value: &Value, sep: &str) -> Result<String, FieldError> {
    let Value::Array(items) = value else {
        return Err(FieldError::new(key, value, "a sequence"));
    };
    let parts = items
        .iter()
        .map(|item| to_string(key, item))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parts.join(sep))
}
