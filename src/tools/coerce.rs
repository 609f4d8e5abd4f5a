// src/tools/coerce.rs
//! Parameter value coercion.
//!
//! Coercion is driven by the declared `type` attribute. Without one, only
//! plain integer/decimal literals and `true`/`false` are converted; anything
//! bracket-shaped stays a string.

use super::ParamType;
use serde_json::{Number, Value};

/// Convert a raw parameter value into a JSON value.
pub fn coerce_value(raw: &str, declared: Option<ParamType>) -> Value {
    match declared {
        Some(ParamType::String) => Value::String(raw.to_string()),
        Some(ParamType::Number) => parse_number(raw.trim(), true).unwrap_or_else(|| {
            crate::log_debug!("declared number did not parse, keeping raw text: {:?}", raw);
            Value::String(raw.to_string())
        }),
        Some(ParamType::Boolean) => parse_bool(raw.trim()).unwrap_or_else(|| {
            crate::log_debug!("declared boolean did not parse, keeping raw text: {:?}", raw);
            Value::String(raw.to_string())
        }),
        Some(ParamType::Json) => match serde_json::from_str::<Value>(raw.trim()) {
            Ok(value) => value,
            Err(e) => {
                crate::log_debug!("declared json did not parse ({}), keeping raw text", e);
                Value::String(raw.to_string())
            }
        },
        None => auto_detect(raw),
    }
}

/// Integer/decimal grammar → number, `true|false` → boolean, else string.
pub fn auto_detect(raw: &str) -> Value {
    let trimmed = raw.trim();
    if let Some(value) = parse_number(trimmed, false) {
        return value;
    }
    if let Some(value) = parse_bool(trimmed) {
        return value;
    }
    Value::String(raw.to_string())
}

fn parse_bool(s: &str) -> Option<Value> {
    if s.eq_ignore_ascii_case("true") {
        Some(Value::Bool(true))
    } else if s.eq_ignore_ascii_case("false") {
        Some(Value::Bool(false))
    } else {
        None
    }
}

/// `lenient` accepts anything `f64` parses (exponents, leading zeros) for
/// values declared as numbers. Auto-detection only takes canonical literals
/// so identifiers like `007` survive as strings.
fn parse_number(s: &str, lenient: bool) -> Option<Value> {
    if is_integer_literal(s) {
        if let Ok(v) = s.parse::<i64>() {
            return Some(Value::Number(v.into()));
        }
        if let Ok(v) = s.parse::<u64>() {
            return Some(Value::Number(v.into()));
        }
        if !lenient {
            return None;
        }
    } else if !lenient && !is_decimal_literal(s) {
        return None;
    }
    if lenient && s.is_empty() {
        return None;
    }
    s.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

fn split_sign(s: &str) -> &str {
    s.strip_prefix('-').unwrap_or(s)
}

fn is_integer_literal(s: &str) -> bool {
    let digits = split_sign(s);
    !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_digit())
        && (digits.len() == 1 || !digits.starts_with('0'))
}

fn is_decimal_literal(s: &str) -> bool {
    let Some((int_part, frac_part)) = split_sign(s).split_once('.') else {
        return false;
    };
    let int_ok = !int_part.is_empty()
        && int_part.bytes().all(|b| b.is_ascii_digit())
        && (int_part.len() == 1 || !int_part.starts_with('0'));
    int_ok && !frac_part.is_empty() && frac_part.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_declared_number() {
        assert_eq!(coerce_value("42", Some(ParamType::Number)), json!(42));
        assert_eq!(coerce_value(" 3.5 ", Some(ParamType::Number)), json!(3.5));
        assert_eq!(coerce_value("1e3", Some(ParamType::Number)), json!(1000.0));
        assert_eq!(coerce_value("abc", Some(ParamType::Number)), json!("abc"));
        assert_eq!(coerce_value("inf", Some(ParamType::Number)), json!("inf"));
    }

    #[test]
    fn test_declared_boolean_and_json() {
        assert_eq!(coerce_value("TRUE", Some(ParamType::Boolean)), json!(true));
        assert_eq!(coerce_value("no", Some(ParamType::Boolean)), json!("no"));
        assert_eq!(
            coerce_value(r#"{"a": [1, 2]}"#, Some(ParamType::Json)),
            json!({"a": [1, 2]})
        );
        assert_eq!(coerce_value("{broken", Some(ParamType::Json)), json!("{broken"));
    }

    #[test]
    fn test_declared_string_is_untouched() {
        assert_eq!(coerce_value("42", Some(ParamType::String)), json!("42"));
    }

    #[test]
    fn test_auto_detect() {
        assert_eq!(auto_detect("17"), json!(17));
        assert_eq!(auto_detect("-2.25"), json!(-2.25));
        assert_eq!(auto_detect("False"), json!(false));
        assert_eq!(auto_detect("007"), json!("007"));
        assert_eq!(auto_detect("1e5"), json!("1e5"));
        assert_eq!(auto_detect("hello world"), json!("hello world"));
    }

    #[test]
    fn test_auto_detect_does_not_sniff_json() {
        assert_eq!(auto_detect(r#"{"a":1}"#), json!(r#"{"a":1}"#));
        assert_eq!(auto_detect("[1, 2, 3]"), json!("[1, 2, 3]"));
    }

    #[test]
    fn test_auto_detect_overflow_stays_string() {
        let big = "123456789012345678901234567890";
        assert_eq!(auto_detect(big), json!(big));
    }
}
