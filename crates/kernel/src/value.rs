//! Filter value normalization.
//!
//! Raw filter parameters arrive as strings (or arrays of strings from
//! repeated parameters). Normalization turns them into typed [`FilterValue`]s:
//!
//! - `foo,bar,baz` becomes `["foo", "bar", "baz"]`
//! - `{{foo,bar}},baz` becomes `["foo,bar", "baz"]`
//! - `{{{ "id": 1 }}}` becomes the JSON object `{ "id": 1 }`
//! - `true`/`false` become booleans, `nil`/`null` become null

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Escaped literal token: `{{...}}`, shortest match.
static ESCAPED_TOKEN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{\{(.*?)\}\}").ok());

const JSON_MARKER: &str = "{{{";

/// A normalized filter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Null,
    Boolean(bool),
    Number(serde_json::Number),
    String(String),
    /// Multiple tokens, in request order.
    List(Vec<FilterValue>),
    /// Escaped JSON literal or a nested parameter map, passed through as-is.
    Json(Value),
}

impl FilterValue {
    /// Convert to string representation for comparisons and SQL.
    pub fn as_string(&self) -> Option<String> {
        match self {
            FilterValue::String(s) => Some(s.clone()),
            FilterValue::Number(n) => Some(n.to_string()),
            FilterValue::Boolean(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Convert to float if possible.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FilterValue::Number(n) => n.as_f64(),
            FilterValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Scalar members of this value: the list items for a list, itself otherwise.
    pub fn items(&self) -> Vec<&FilterValue> {
        match self {
            FilterValue::List(items) => items.iter().collect(),
            other => vec![other],
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FilterValue::Null)
    }

    /// Convert back into a JSON value.
    pub fn to_json(&self) -> Value {
        match self {
            FilterValue::Null => Value::Null,
            FilterValue::Boolean(b) => Value::Bool(*b),
            FilterValue::Number(n) => Value::Number(n.clone()),
            FilterValue::String(s) => Value::String(s.clone()),
            FilterValue::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            FilterValue::Json(v) => v.clone(),
        }
    }

    /// Equality against a record attribute.
    ///
    /// Scalars compare by their string rendering so that `"1"` from a query
    /// string matches a numeric attribute `1`. Lists match if any member does.
    pub fn matches(&self, attribute: &Value) -> bool {
        match self {
            FilterValue::List(items) => items.iter().any(|item| item.matches(attribute)),
            FilterValue::Null => attribute.is_null(),
            FilterValue::Json(v) => v == attribute,
            scalar => match (scalar.as_string(), json_scalar_string(attribute)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::String(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::String(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Number(value.into())
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Boolean(value)
    }
}

impl From<Vec<FilterValue>> for FilterValue {
    fn from(value: Vec<FilterValue>) -> Self {
        FilterValue::List(value)
    }
}

/// Render a scalar JSON value as a string for loose comparison.
pub fn json_scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Normalize a raw filter parameter.
///
/// Strings are split into literal arrays and coerced; arrays (from repeated
/// parameters) are coerced element-wise without splitting. Fails only when a
/// `{{{...}}}` literal is not valid JSON.
pub fn normalize(raw: &Value) -> Result<FilterValue, serde_json::Error> {
    match raw {
        Value::String(s) => parse_string(s),
        Value::Array(items) => Ok(FilterValue::List(
            items.iter().map(normalize_scalar).collect(),
        )),
        other => Ok(normalize_scalar(other)),
    }
}

fn normalize_scalar(raw: &Value) -> FilterValue {
    match raw {
        Value::Null => FilterValue::Null,
        Value::Bool(b) => FilterValue::Boolean(*b),
        Value::Number(n) => FilterValue::Number(n.clone()),
        Value::String(s) => coerce(s),
        other => FilterValue::Json(other.clone()),
    }
}

fn parse_string(value: &str) -> Result<FilterValue, serde_json::Error> {
    if value.starts_with(JSON_MARKER) {
        let inner = &value[2..];
        let inner = inner.strip_suffix("}}").unwrap_or(inner);
        return serde_json::from_str(inner).map(FilterValue::Json);
    }

    let mut tokens = split_tokens(value)
        .into_iter()
        .map(|token| coerce(&token))
        .collect::<Vec<_>>();

    if tokens.len() == 1 {
        Ok(tokens.remove(0))
    } else {
        Ok(FilterValue::List(tokens))
    }
}

/// Split on commas, keeping `{{...}}` tokens whole and dropping blanks.
fn split_tokens(value: &str) -> Vec<String> {
    let mut tokens = Vec::new();

    let Some(pattern) = ESCAPED_TOKEN.as_ref() else {
        push_plain(value, &mut tokens);
        return tokens;
    };

    let mut cursor = 0;
    for captures in pattern.captures_iter(value) {
        let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        push_plain(&value[cursor..whole.start()], &mut tokens);
        if !inner.as_str().is_empty() {
            tokens.push(inner.as_str().to_string());
        }
        cursor = whole.end();
    }
    push_plain(&value[cursor..], &mut tokens);

    tokens
}

fn push_plain(segment: &str, tokens: &mut Vec<String>) {
    tokens.extend(
        segment
            .split(',')
            .filter(|t| !t.is_empty())
            .map(str::to_string),
    );
}

fn coerce(token: &str) -> FilterValue {
    match token {
        "true" => FilterValue::Boolean(true),
        "false" => FilterValue::Boolean(false),
        "nil" | "null" => FilterValue::Null,
        other => FilterValue::String(other.to_string()),
    }
}
