//! Tolerant decoding of list responses.
//!
//! Upstream list endpoints answer either with a bare JSON array or with the
//! array wrapped in an object under one of a few keys (`result`, `pools`,
//! `blocks`, `payments`). All shapes funnel through [`normalize_list`] so
//! callers always receive a plain `Vec`.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::tracing::prelude::*;

/// Envelope keys tried for `GET /api/pools`.
pub const POOLS_KEYS: &[&str] = &["pools", "result"];
/// Envelope keys tried for `GET /api/blocks`.
pub const BLOCKS_KEYS: &[&str] = &["result", "blocks"];
/// Envelope keys tried for `GET /api/payments`.
pub const PAYMENTS_KEYS: &[&str] = &["result", "payments"];

/// Extract a list of `T` from any accepted envelope shape.
///
/// Unrecognized shapes yield an empty list. Elements that do not decode as
/// `T` are skipped; the rest keep their order.
pub fn normalize_list<T: DeserializeOwned>(body: Value, keys: &[&str]) -> Vec<T> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            let found = keys.iter().find_map(|key| match map.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            });
            match found {
                Some(items) => items,
                None => {
                    debug!(keys = ?keys, "No list under any known envelope key");
                    return Vec::new();
                }
            }
        }
        other => {
            debug!(kind = json_kind(&other), "List response is not an array or object");
            return Vec::new();
        }
    };

    items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value(item) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(index, error = %e, "Skipping undecodable list element");
                None
            }
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
