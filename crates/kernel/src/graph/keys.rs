//! Key extraction for matching children to parents.

use std::collections::HashSet;

use serde_json::Value;

use crate::value::{FilterValue, json_scalar_string};

/// Extract a field value from a record as a string.
///
/// `field_path` may be dotted (`meta.owner_id`) to reach into nested
/// objects. Nested values stored as JSON text are parsed first. Null and
/// missing values yield `None`.
pub fn extract_field_value(record: &Value, field_path: &str) -> Option<String> {
    let mut parts = field_path.split('.');
    let first = parts.next()?;
    let mut current = std::borrow::Cow::Borrowed(record.get(first)?);

    for part in parts {
        let next = match current.as_ref() {
            Value::Object(_) => current.get(part)?.clone(),
            Value::String(s) => serde_json::from_str::<Value>(s).ok()?.get(part)?.clone(),
            _ => return None,
        };
        current = std::borrow::Cow::Owned(next);
    }

    json_scalar_string(current.as_ref())
}

/// Distinct key values across a batch, in first-seen order.
pub fn collect_keys(records: &[Value], field_path: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter_map(|record| extract_field_value(record, field_path))
        .filter(|key| seen.insert(key.clone()))
        .collect()
}

/// Distinct key values as a list filter value.
pub fn key_filter(records: &[Value], field_path: &str) -> FilterValue {
    FilterValue::List(
        collect_keys(records, field_path)
            .into_iter()
            .map(FilterValue::String)
            .collect(),
    )
}
