//! Backing-store collaborator contract.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::types::{FilterOperator, JoinThrough, ScopeQuery};
use crate::graph::keys::extract_field_value;
use crate::query::SortDirection;
use crate::value::FilterValue;

/// Built-in stat calculations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Count,
    Sum,
    Average,
    Maximum,
    Minimum,
}

impl Aggregate {
    pub fn name(&self) -> &'static str {
        match self {
            Aggregate::Count => "count",
            Aggregate::Sum => "sum",
            Aggregate::Average => "average",
            Aggregate::Maximum => "maximum",
            Aggregate::Minimum => "minimum",
        }
    }

    /// Fold already-fetched records.
    pub fn fold(&self, records: &[Value], attribute: &str) -> Value {
        if *self == Aggregate::Count {
            return Value::from(records.len());
        }

        let numbers: Vec<f64> = records
            .iter()
            .filter_map(|r| extract_field_value(r, attribute))
            .filter_map(|v| v.parse::<f64>().ok())
            .collect();

        match self {
            Aggregate::Count => Value::from(records.len()),
            Aggregate::Sum => number(numbers.iter().sum()),
            Aggregate::Average => {
                if numbers.is_empty() {
                    number(0.0)
                } else {
                    number(numbers.iter().sum::<f64>() / numbers.len() as f64)
                }
            }
            Aggregate::Maximum => numbers
                .iter()
                .copied()
                .reduce(f64::max)
                .map(number)
                .unwrap_or(Value::Null),
            Aggregate::Minimum => numbers
                .iter()
                .copied()
                .reduce(f64::min)
                .map(number)
                .unwrap_or(Value::Null),
        }
    }
}

fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// Store-side primitives the scope pipeline and sideload loaders rely on.
///
/// The query-shaping methods default to extending the [`ScopeQuery`]
/// description; stores override them only to change how a primitive is
/// expressed. `execute` is the one required call into storage.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Equality for scalars, inclusion for lists.
    fn filter_equals(&self, query: ScopeQuery, attribute: &str, value: &FilterValue) -> ScopeQuery {
        match value {
            FilterValue::Json(json) => {
                query.filter(attribute, FilterOperator::Equals, FilterValue::Json(json.clone()))
            }
            other => query.filter_eq(attribute, other.clone()),
        }
    }

    fn order_by(&self, query: ScopeQuery, attribute: &str, direction: SortDirection) -> ScopeQuery {
        query.order_by(attribute, direction)
    }

    fn limit_offset(&self, query: ScopeQuery, limit: u64, offset: u64) -> ScopeQuery {
        query.limit_offset(limit, offset)
    }

    fn join_through(&self, query: ScopeQuery, join: JoinThrough) -> ScopeQuery {
        query.join_through(join)
    }

    /// Materialize the query into records.
    async fn execute(&self, query: &ScopeQuery) -> Result<Vec<Value>>;

    /// Compute a stat over every row matching `query`.
    async fn calculate(
        &self,
        query: &ScopeQuery,
        attribute: &str,
        aggregate: Aggregate,
    ) -> Result<Value> {
        let records = self.execute(&query.unpaginated()).await?;
        Ok(aggregate.fold(&records, attribute))
    }
}
