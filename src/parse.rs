//! Normalization of upstream counter payloads
//!
//! Upstream APIs are third-party and undocumented. A counter may arrive as a
//! bare number, a numeric string, an object carrying one of several keys, or
//! an object wrapping the real payload in `data`. Everything here resolves to
//! an integer and never fails.

use serde::Serialize;
use serde_json::{Map, Value};

/// Ordered candidate keys probed on an object payload
#[derive(Debug, Clone, Copy)]
pub struct CountKeys {
    /// Probed on the `data` member when it is an object
    pub nested: &'static [&'static str],
    /// Probed on the top-level object
    pub top: &'static [&'static str],
}

pub const SUBSCRIPTION_KEYS: CountKeys = CountKeys {
    nested: &[],
    top: &["count", "subscriptions", "value", "total"],
};

pub const SPINWHEEL_KEYS: CountKeys = CountKeys {
    nested: &[],
    top: &["count", "leads", "value", "total"],
};

/// `{"data":{"remaining_count":644,"user_position":null},"error":null}`
pub const WAITLIST_KEYS: CountKeys = CountKeys {
    nested: &["remaining_count", "remaining", "count", "value"],
    top: &["remaining_count", "remaining", "count", "waitlist", "value", "total"],
};

/// The shapes an upstream counter has been seen in
#[derive(Debug, Clone, PartialEq)]
pub enum Payload<'a> {
    Number(f64),
    Text(&'a str),
    /// Object whose `data` member is itself an object
    Nested {
        outer: &'a Map<String, Value>,
        inner: &'a Map<String, Value>,
    },
    Object(&'a Map<String, Value>),
    Other,
}

impl<'a> Payload<'a> {
    pub fn decode(value: &'a Value) -> Self {
        match value {
            Value::Number(n) => n.as_f64().map(Payload::Number).unwrap_or(Payload::Other),
            Value::String(s) => Payload::Text(s),
            Value::Object(map) => match map.get("data") {
                Some(Value::Object(inner)) => Payload::Nested { outer: map, inner },
                _ => Payload::Object(map),
            },
            _ => Payload::Other,
        }
    }
}

/// Resolve any upstream payload to an integer. Never fails; unknown shapes
/// are 0. Raw numbers keep their sign so callers can clamp for their domain.
pub fn parse_count(value: &Value, keys: &CountKeys) -> i64 {
    match Payload::decode(value) {
        Payload::Number(n) => n.trunc() as i64,
        Payload::Text(s) => parse_int_prefix(s).unwrap_or(0),
        Payload::Nested { inner, .. } if !keys.nested.is_empty() => probe(inner, keys.nested),
        Payload::Nested { outer: map, .. } | Payload::Object(map) => probe(map, keys.top),
        Payload::Other => 0,
    }
}

fn probe(map: &Map<String, Value>, keys: &[&str]) -> i64 {
    keys.iter()
        .find_map(|key| map.get(*key).filter(|v| !v.is_null()))
        .map(coerce)
        .unwrap_or(0)
}

fn coerce(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .unwrap_or(0),
        Value::String(s) => parse_int_prefix(s).unwrap_or(0),
        _ => 0,
    }
}

/// Leading-integer parse: optional whitespace, optional sign, then digits.
/// Trailing garbage is ignored; no digits at all is `None`.
pub fn parse_int_prefix(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (negative, rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let digits_len = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits_len == 0 {
        return None;
    }
    let magnitude = rest[..digits_len].parse::<i64>().unwrap_or(i64::MAX);
    Some(if negative { -magnitude } else { magnitude })
}

/// Leading-decimal parse: digits with at most one decimal point.
fn parse_float_prefix(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let mut seen_dot = false;
    let len = s
        .char_indices()
        .take_while(|&(i, c)| match c {
            '0'..='9' => true,
            '.' if !seen_dot => {
                seen_dot = true;
                true
            }
            '-' | '+' => i == 0,
            _ => false,
        })
        .count();
    s[..len].parse::<f64>().ok()
}

const LAKH: f64 = 100_000.0;
const MILLION: f64 = 1_000_000.0;
const THOUSAND: f64 = 1_000.0;

/// Parse a Play Store style download count such as `10,000,000+`, `1L+`,
/// `1.5M` or `50K`. Unit letters are checked L, then M, then K.
pub fn parse_downloads_string(raw: &str) -> u64 {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return 0;
    }

    let cleaned: String = trimmed.chars().filter(|&c| c != '+').collect();
    let cleaned = cleaned.trim();

    for (unit, multiplier) in [('l', LAKH), ('m', MILLION), ('k', THOUSAND)] {
        if cleaned.chars().any(|c| c.to_ascii_lowercase() == unit) {
            let number: String = cleaned
                .chars()
                .filter(|&c| c != ',' && c.to_ascii_lowercase() != unit)
                .collect();
            return match parse_float_prefix(&number) {
                Some(n) if n > 0.0 => (n * multiplier).floor() as u64,
                _ => 0,
            };
        }
    }

    let number: String = cleaned.chars().filter(|&c| c != ',').collect();
    match parse_int_prefix(&number) {
        Some(n) if n > 0 => n as u64,
        _ => 0,
    }
}

/// Direction and size of the move between two samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    /// Rounded to one decimal place
    pub percentage: f64,
    pub is_increase: bool,
    pub is_equal: bool,
    pub absolute_change: u64,
}

pub fn calculate_change(current: u64, previous: u64) -> Change {
    if previous == 0 {
        return Change {
            percentage: if current > 0 { 100.0 } else { 0.0 },
            is_increase: current > 0,
            is_equal: current == 0,
            absolute_change: current,
        };
    }

    let delta = current as f64 - previous as f64;
    let percentage = (delta / previous as f64 * 100.0).abs();

    Change {
        percentage: (percentage * 10.0).round() / 10.0,
        is_increase: current > previous,
        is_equal: current == previous,
        absolute_change: current.abs_diff(previous),
    }
}

/// Display form: plain with thousands separators below 10 000, then `K`/`M`
/// with at most one decimal.
pub fn format_number(n: u64) -> String {
    if n < 10_000 {
        return with_commas(n);
    }

    let (scaled, suffix) = if n < 1_000_000 {
        (n as f64 / THOUSAND, "K")
    } else {
        (n as f64 / MILLION, "M")
    };

    if scaled.fract() == 0.0 {
        format!("{}{}", scaled as u64, suffix)
    } else {
        format!("{:.1}{}", scaled, suffix)
    }
}

fn with_commas(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
