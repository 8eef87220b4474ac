//! Helpers for mapping API payloads back onto resource state.
//!
//! The host distinguishes a null attribute from an empty one, while the
//! Elastic Stack APIs mostly do not. These helpers decide which of the two
//! ends up in state, based on what the prior state held.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::ProviderError;

/// Pick the value for an optional attribute the API may fill with a default.
///
/// `prior` is the attribute in prior state (`None` when there is no prior
/// state, as on import). An attribute the configuration left null stays
/// null; otherwise the API value is taken.
pub fn adopt<T>(prior: Option<&Option<T>>, api: Option<T>) -> Option<T> {
    match prior {
        Some(None) => None,
        _ => api,
    }
}

/// Map an API list onto state, keeping an explicit empty list when the prior state had one.
pub fn list_or_null<T>(prior: Option<&Option<Vec<T>>>, api: Option<Vec<T>>) -> Option<Vec<T>> {
    match api {
        Some(items) if !items.is_empty() => Some(items),
        _ => match prior {
            Some(Some(items)) if items.is_empty() => Some(Vec::new()),
            _ => None,
        },
    }
}

/// Map an API object onto state, keeping an explicit empty map when the prior state had one.
pub fn map_or_null<V>(
    prior: Option<&Option<BTreeMap<String, V>>>,
    api: Option<BTreeMap<String, V>>,
) -> Option<BTreeMap<String, V>> {
    match api {
        Some(map) if !map.is_empty() => Some(map),
        _ => match prior {
            Some(Some(map)) if map.is_empty() => Some(BTreeMap::new()),
            _ => None,
        },
    }
}

/// Treat an empty string from the API as null.
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

/// Render a JSON value as a state string.
///
/// When the prior string decodes to the same value it is kept verbatim, so
/// formatting and key order chosen by the user do not show up as a diff.
/// Missing or empty objects map to null unless the prior string was an
/// equivalent empty object.
pub fn json_string(
    prior: Option<&Option<String>>,
    api: Option<&Value>,
) -> Result<Option<String>, ProviderError> {
    let prior = prior.and_then(|p| p.as_deref());
    let api = match api {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Object(map)) if map.is_empty() => {
            return Ok(prior
                .filter(|p| semantically_equal(p, &Value::Object(Default::default())))
                .map(str::to_string));
        },
        Some(value) => value,
    };

    if let Some(prior) = prior {
        if semantically_equal(prior, api) {
            return Ok(Some(prior.to_string()));
        }
    }
    Ok(Some(serde_json::to_string(api)?))
}

fn semantically_equal(encoded: &str, value: &Value) -> bool {
    serde_json::from_str::<Value>(encoded)
        .map(|decoded| &decoded == value)
        .unwrap_or(false)
}

/// Decode a JSON-string attribute for an API request.
pub fn parse_json_string(
    attribute: &str,
    value: Option<&str>,
) -> Result<Option<Value>, ProviderError> {
    match value {
        None => Ok(None),
        Some(s) => serde_json::from_str(s).map(Some).map_err(|e| {
            ProviderError::Validation(format!("{} is not valid JSON: {}", attribute, e))
        }),
    }
}

/// Restore a write-only value the API never returns.
pub fn write_only<T: Clone>(api: Option<T>, prior: Option<&Option<T>>) -> Option<T> {
    api.or_else(|| prior.and_then(|p| p.clone()))
}

/// Decode a state or config value into a typed model.
pub fn from_state<T: DeserializeOwned>(value: Value) -> Result<T, ProviderError> {
    serde_json::from_value(value)
        .map_err(|e| ProviderError::Validation(format!("invalid resource data: {}", e)))
}

/// Encode a typed model as state.
pub fn to_state<T: Serialize>(model: &T) -> Result<Value, ProviderError> {
    Ok(serde_json::to_value(model)?)
}
