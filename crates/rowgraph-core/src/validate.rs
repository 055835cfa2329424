//! Field value checks used by pre-commit validation.
//!
//! `check_type` decides whether a value can be stored in a field of the
//! given type, `check_length` whether it fits the declared length. NULL
//! passes both; whether NULL is allowed at all is a separate "required"
//! rule.

use std::sync::OnceLock;

use regex::Regex;

use crate::field::FieldDef;
use crate::types::FieldType;
use crate::value::Value;

const TIMESTAMP_MAX: i64 = 2_147_483_647;

fn compiled(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            tracing::warn!(pattern = pattern, error = %e, "invalid validation pattern");
            None
        }
    })
    .as_ref()
}

fn integer_pattern() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&CELL, r"^-?\d+$")
}

fn decimal_pattern() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&CELL, r"^-?(\d+)(?:\.(\d+))?$")
}

fn date_pattern() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&CELL, r"^(\d{4})-(\d{2})-(\d{2})$")
}

fn time_pattern() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&CELL, r"^(\d{2}):(\d{2}):(\d{2})$")
}

fn matches(regex: Option<&'static Regex>, value: &str) -> bool {
    regex.is_some_and(|r| r.is_match(value))
}

fn is_valid_date(value: &str) -> bool {
    let Some(caps) = date_pattern().and_then(|r| r.captures(value)) else {
        return false;
    };
    let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    let (Some(year), Some(month), Some(day)) = (part(1), part(2), part(3)) else {
        return false;
    };
    let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
    let days_in_month = match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if leap => 29,
        2 => 28,
        _ => return false,
    };
    (1..=days_in_month).contains(&day)
}

fn is_valid_time(value: &str) -> bool {
    let Some(caps) = time_pattern().and_then(|r| r.captures(value)) else {
        return false;
    };
    let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    matches!((part(1), part(2), part(3)), (Some(h), Some(m), Some(s)) if h < 24 && m < 60 && s < 60)
}

fn is_valid_datetime(value: &str) -> bool {
    value
        .split_once(' ')
        .is_some_and(|(date, time)| is_valid_date(date) && is_valid_time(time))
}

fn integer_of(value: &Value) -> Option<i64> {
    match value {
        Value::Int(v) => Some(*v),
        Value::Text(s) if matches(integer_pattern(), s) => s.parse().ok(),
        _ => None,
    }
}

fn is_numeric(value: &Value) -> bool {
    match value {
        Value::Int(_) | Value::Double(_) => true,
        Value::Decimal(s) | Value::Text(s) => matches(decimal_pattern(), s.trim()),
        _ => false,
    }
}

/// Whether `value` can be stored in `field`.
pub fn check_type(field: &FieldDef, value: &Value) -> bool {
    if value.is_null() {
        return true;
    }
    match field.field_type {
        FieldType::Boolean => match value {
            Value::Bool(_) => true,
            Value::Int(v) => *v == 0 || *v == 1,
            Value::Text(s) => s == "0" || s == "1",
            _ => false,
        },
        FieldType::Integer => {
            integer_of(value).is_some_and(|v| !field.unsigned || v >= 0)
        }
        FieldType::Decimal | FieldType::Double => {
            is_numeric(value) && (!field.unsigned || value.as_f64().is_some_and(|v| v >= 0.0))
        }
        FieldType::String => matches!(
            value,
            Value::Text(_) | Value::Int(_) | Value::Double(_) | Value::Decimal(_)
        ),
        FieldType::Date => value.as_str().is_some_and(is_valid_date),
        FieldType::Time => value.as_str().is_some_and(is_valid_time),
        FieldType::Datetime => value.as_str().is_some_and(is_valid_datetime),
        FieldType::Timestamp => integer_of(value).is_some_and(|v| (0..=TIMESTAMP_MAX).contains(&v)),
        FieldType::Blob => matches!(value, Value::Bytes(_) | Value::Text(_)),
        FieldType::Enum => value
            .as_str()
            .is_some_and(|s| field.values.iter().any(|allowed| allowed == s)),
    }
}

/// Whether `value` fits the declared length of `field`.
///
/// Fields without a declared length always fit.
pub fn check_length(field: &FieldDef, value: &Value) -> bool {
    if value.is_null() {
        return true;
    }
    if field.field_type == FieldType::Timestamp {
        return integer_of(value).is_some_and(|v| (0..=TIMESTAMP_MAX).contains(&v));
    }
    let Some(length) = field.length.map(|l| l as usize) else {
        return true;
    };
    match field.field_type {
        FieldType::String | FieldType::Enum => {
            value
                .identifier_string()
                .is_some_and(|s| s.chars().count() <= length)
        }
        FieldType::Blob => value.as_bytes().is_some_and(|b| b.len() <= length),
        FieldType::Integer => integer_of(value)
            .is_some_and(|v| v.unsigned_abs().to_string().len() <= length),
        FieldType::Decimal => {
            let text = value.identifier_string().unwrap_or_default();
            let precision = field.precision.unwrap_or(0) as usize;
            decimal_pattern()
                .and_then(|r| r.captures(text.trim()))
                .is_some_and(|caps| {
                    let int_digits = caps.get(1).map_or(0, |m| m.as_str().len());
                    let frac_digits = caps.get(2).map_or(0, |m| m.as_str().len());
                    int_digits <= length.saturating_sub(precision) && frac_digits <= precision
                })
        }
        _ => true,
    }
}
