//! Canonical rendering of parameter mappings
//!
//! Cache keys are derived from the canonical text produced here, so the
//! rendering must depend only on the *content* of a mapping: key order is
//! normalized and values are coerced so that `1`, `1.0` and `"1"` render
//! identically, while any other difference in value stays visible.

use sha2::{Digest, Sha256};

use crate::spec::ParamMap;

/// Render a parameter mapping canonically.
pub fn canonical_params(params: &ParamMap) -> String {
    let mut out = String::new();
    out.push('{');
    // ParamMap is a BTreeMap, iteration order is already sorted.
    for (i, (key, value)) in params.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_string(&mut out, key);
        out.push(':');
        push_value(&mut out, value);
    }
    out.push('}');
    out
}

fn push_value(out: &mut String, value: &serde_json::Value) {
    match value {
        serde_json::Value::Null => out.push_str("null"),
        serde_json::Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        serde_json::Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                out.push_str(&n.to_string());
            } else {
                match n.as_f64() {
                    Some(v) => out.push_str(&canonical_number(v, &n.to_string())),
                    None => out.push_str(&n.to_string()),
                }
            }
        }
        serde_json::Value::String(s) => match numeric_string(s) {
            Some(rendered) => out.push_str(&rendered),
            None => push_string(out, s),
        },
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                push_value(out, item);
            }
            out.push(']');
        }
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                push_string(out, key);
                out.push(':');
                push_value(out, item);
            }
            out.push('}');
        }
    }
}

/// Integral values render without a fraction so `2023` and `2023.0` agree.
fn canonical_number(value: f64, original: &str) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 9.007_199_254_740_992e15 {
        format!("{}", value as i64)
    } else if value.is_finite() {
        format!("{}", value)
    } else {
        original.to_string()
    }
}

fn numeric_string(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed != raw {
        return None;
    }
    if let Ok(int) = trimmed.parse::<i64>() {
        return Some(int.to_string());
    }
    let parsed = trimmed.parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some(canonical_number(parsed, trimmed))
}

fn push_string(out: &mut String, s: &str) {
    // serde_json escaping is deterministic and unambiguous.
    match serde_json::to_string(s) {
        Ok(quoted) => out.push_str(&quoted),
        Err(_) => {
            out.push('"');
            out.push_str(s);
            out.push('"');
        }
    }
}

/// Compute SHA-256 of content, returning hex-encoded string.
pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}
