//! Sideload test utilities.
//!
//! An in-memory [`BackingStore`] that evaluates [`ScopeQuery`]s against JSON
//! collections and records every query it executes, plus a small library
//! fixture (authors, books, genres, ...) used by the kernel's integration
//! tests.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use sideload_kernel::query::SortDirection;
use sideload_kernel::scope::{BackingStore, Condition, FilterOperator, JoinThrough, ScopeQuery};
use sideload_kernel::value::{FilterValue, json_scalar_string};

pub mod fixtures;

/// In-memory collections keyed by name.
#[derive(Default)]
pub struct MemoryStore {
    collections: BTreeMap<String, Vec<Value>>,
    failing: BTreeSet<String>,
    executed: Mutex<Vec<ScopeQuery>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a collection.
    pub fn with_collection(mut self, name: impl Into<String>, records: Vec<Value>) -> Self {
        self.collections.insert(name.into(), records);
        self
    }

    /// Make every query against `collection` fail.
    pub fn failing(mut self, collection: impl Into<String>) -> Self {
        self.failing.insert(collection.into());
        self
    }

    pub fn collection(&self, name: &str) -> &[Value] {
        self.collections.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every query executed so far, in order.
    pub fn executed(&self) -> Vec<ScopeQuery> {
        self.executed.lock().clone()
    }

    pub fn execution_count(&self) -> usize {
        self.executed.lock().len()
    }

    /// Executed queries against one collection.
    pub fn executed_against(&self, collection: &str) -> Vec<ScopeQuery> {
        self.executed
            .lock()
            .iter()
            .filter(|query| query.collection == collection)
            .cloned()
            .collect()
    }

    pub fn clear_log(&self) {
        self.executed.lock().clear();
    }

    fn evaluate(&self, query: &ScopeQuery) -> Vec<Value> {
        let mut records: Vec<Value> = self
            .collection(&query.collection)
            .iter()
            .filter(|record| query.conditions.iter().all(|c| condition_holds(record, c)))
            .cloned()
            .collect();

        if let Some(join) = &query.join {
            records = self.join(records, join);
        }

        if !query.sorts.is_empty() {
            records.sort_by(|a, b| {
                query
                    .sorts
                    .iter()
                    .map(|sort| {
                        let ord = compare(&field(a, &sort.field), &field(b, &sort.field));
                        match sort.direction {
                            SortDirection::Asc => ord,
                            SortDirection::Desc => ord.reverse(),
                        }
                    })
                    .find(|ord| ord.is_ne())
                    .unwrap_or(Ordering::Equal)
            });
        }

        let offset = query.offset.unwrap_or(0) as usize;
        let records = records.into_iter().skip(offset);
        match query.limit {
            Some(limit) => records.take(limit as usize).collect(),
            None => records.collect(),
        }
    }

    /// Keep records reachable through `join`, attaching their join rows.
    fn join(&self, records: Vec<Value>, join: &JoinThrough) -> Vec<Value> {
        let parents = FilterValue::List(join.values.clone());
        let rows: Vec<&Value> = self
            .collection(&join.table)
            .iter()
            .filter(|row| parents.matches(&field(row, &join.parent_key)))
            .collect();

        records
            .into_iter()
            .filter_map(|mut record| {
                let key = json_scalar_string(&field(&record, &join.primary_key))?;
                let matched: Vec<Value> = rows
                    .iter()
                    .filter(|row| json_scalar_string(&field(row, &join.child_key)).as_deref() == Some(&key))
                    .map(|row| (*row).clone())
                    .collect();
                if matched.is_empty() {
                    return None;
                }
                if let Some(obj) = record.as_object_mut() {
                    obj.insert(join.table.clone(), Value::Array(matched));
                }
                Some(record)
            })
            .collect()
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn execute(&self, query: &ScopeQuery) -> anyhow::Result<Vec<Value>> {
        self.executed.lock().push(query.clone());
        if self.failing.contains(&query.collection) {
            anyhow::bail!("collection '{}' is unavailable", query.collection);
        }
        let records = self.evaluate(query);
        debug!(collection = %query.collection, count = records.len(), "memory store executed query");
        Ok(records)
    }
}

/// Attribute at a dotted path, `Null` when absent.
fn field(record: &Value, path: &str) -> Value {
    path.split('.')
        .try_fold(record, |value, segment| value.get(segment))
        .cloned()
        .unwrap_or(Value::Null)
}

fn condition_holds(record: &Value, condition: &Condition) -> bool {
    let actual = field(record, &condition.field);
    let expected = &condition.value;

    match condition.operator {
        FilterOperator::Equals | FilterOperator::In => expected.matches(&actual),
        FilterOperator::NotEquals | FilterOperator::NotIn => !actual.is_null() && !expected.matches(&actual),
        FilterOperator::IsNull => actual.is_null(),
        FilterOperator::IsNotNull => !actual.is_null(),
        FilterOperator::Contains => text_test(&actual, expected, |a, e| a.contains(e)),
        FilterOperator::StartsWith => text_test(&actual, expected, |a, e| a.starts_with(e)),
        FilterOperator::EndsWith => text_test(&actual, expected, |a, e| a.ends_with(e)),
        FilterOperator::GreaterThan => range_test(&actual, expected, Ordering::is_gt),
        FilterOperator::LessThan => range_test(&actual, expected, Ordering::is_lt),
        FilterOperator::GreaterOrEqual => range_test(&actual, expected, Ordering::is_ge),
        FilterOperator::LessOrEqual => range_test(&actual, expected, Ordering::is_le),
    }
}

fn text_test(actual: &Value, expected: &FilterValue, test: impl Fn(&str, &str) -> bool) -> bool {
    match (json_scalar_string(actual), expected.as_string()) {
        (Some(actual), Some(expected)) => test(&actual, &expected),
        _ => false,
    }
}

fn range_test(actual: &Value, expected: &FilterValue, test: impl Fn(Ordering) -> bool) -> bool {
    if actual.is_null() || expected.is_null() {
        return false;
    }
    test(compare(actual, &expected.to_json()))
}

/// Numbers numerically (numeric strings included), everything else as text.
/// Nulls sort first.
fn compare(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }
    let text_a = json_scalar_string(a).unwrap_or_else(|| a.to_string());
    let text_b = json_scalar_string(b).unwrap_or_else(|| b.to_string());
    match (text_a.parse::<f64>(), text_b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => text_a.cmp(&text_b),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> MemoryStore {
        MemoryStore::new().with_collection(
            "books",
            vec![
                json!({"id": 1, "title": "The Shining", "sales": 100}),
                json!({"id": 2, "title": "It", "sales": 300}),
                json!({"id": 3, "title": "The Stand", "sales": null}),
            ],
        )
    }

    fn ids(records: &[Value]) -> Vec<i64> {
        records.iter().map(|r| r["id"].as_i64().unwrap()).collect()
    }

    #[tokio::test]
    async fn evaluates_conditions() {
        let store = store();

        let query = ScopeQuery::new("books").filter("title", FilterOperator::StartsWith, "The");
        assert_eq!(ids(&store.execute(&query).await.unwrap()), vec![1, 3]);

        let query = ScopeQuery::new("books").filter("sales", FilterOperator::GreaterThan, 150i64);
        assert_eq!(ids(&store.execute(&query).await.unwrap()), vec![2]);

        let query = ScopeQuery::new("books").filter_eq("id", FilterValue::List(vec!["1".into(), 3i64.into()]));
        assert_eq!(ids(&store.execute(&query).await.unwrap()), vec![1, 3]);

        let query = ScopeQuery::new("books").filter_eq("sales", FilterValue::Null);
        assert_eq!(ids(&store.execute(&query).await.unwrap()), vec![3]);
    }

    #[tokio::test]
    async fn sorts_and_paginates() {
        let store = store();
        let query = ScopeQuery::new("books")
            .order_by("sales", SortDirection::Desc)
            .limit_offset(2, 1);
        assert_eq!(ids(&store.execute(&query).await.unwrap()), vec![1, 3]);
        assert_eq!(store.execution_count(), 1);
    }

    #[tokio::test]
    async fn failing_collection_errors() {
        let store = store().failing("books");
        assert!(store.execute(&ScopeQuery::new("books")).await.is_err());
        assert_eq!(store.executed_against("books").len(), 1);
    }
}
