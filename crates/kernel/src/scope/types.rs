//! Lazy, store-agnostic query description.
//!
//! A [`ScopeQuery`] is what the scope pipeline transforms and what a
//! [`BackingStore`](super::BackingStore) executes. Every builder method
//! consumes the query and returns a new one.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::query::SortDirection;
use crate::value::FilterValue;

/// Per-request context consulted by guards, handlers, and action whitelists.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryContext {
    /// Action being served (`index`, `show`, ...).
    pub action: String,

    pub current_user_id: Option<Uuid>,

    #[serde(default)]
    pub roles: BTreeSet<String>,

    /// URL arguments (e.g. path segments) by name.
    #[serde(default)]
    pub url_args: HashMap<String, String>,
}

impl QueryContext {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.current_user_id = Some(user_id);
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn with_url_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.url_args.insert(name.into(), value.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn url_arg(&self, name: &str) -> Option<&str> {
        self.url_args.get(name).map(String::as_str)
    }
}

/// Comparison operators for conditions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    /// Exact match, or membership when the value is a list.
    Equals,
    NotEquals,
    /// Substring match.
    Contains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

/// One WHERE-style condition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    pub field: String,
    pub operator: FilterOperator,
    pub value: FilterValue,
}

/// One ORDER BY entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuerySort {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

/// Many-to-many join through an association table.
///
/// Selects rows of the queried collection whose `primary_key` appears in
/// `table.child_key` for a join row whose `parent_key` is one of `values`.
/// Stores attach the matched join rows to each returned record under `table`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinThrough {
    /// Association table (e.g. "author_hobbies").
    pub table: String,
    /// Join column referencing the parent (e.g. "author_id").
    pub parent_key: String,
    /// Join column referencing the queried row (e.g. "hobby_id").
    pub child_key: String,
    /// Key on the queried collection matched by `child_key`.
    pub primary_key: String,
    /// Parent key values to match.
    pub values: Vec<FilterValue>,
}

impl JoinThrough {
    pub fn new(
        table: impl Into<String>,
        parent_key: impl Into<String>,
        child_key: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            parent_key: parent_key.into(),
            child_key: child_key.into(),
            primary_key: "id".to_string(),
            values: Vec::new(),
        }
    }

    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    pub fn matching(mut self, values: Vec<FilterValue>) -> Self {
        self.values = values;
        self
    }
}

/// A lazy query against one collection of the backing store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScopeQuery {
    /// Collection (table) to read.
    pub collection: String,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub sorts: Vec<QuerySort>,

    pub limit: Option<u64>,

    pub offset: Option<u64>,

    pub join: Option<JoinThrough>,

    /// Related data an extra field will need; a hint to the store.
    #[serde(default)]
    pub eager_loads: Vec<String>,

    #[serde(default)]
    pub distinct: bool,
}

impl ScopeQuery {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Default::default()
        }
    }

    pub fn filter(
        mut self,
        field: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<FilterValue>,
    ) -> Self {
        self.conditions.push(Condition {
            field: field.into(),
            operator,
            value: value.into(),
        });
        self
    }

    /// Equality for scalars, membership for lists, IS NULL for null.
    pub fn filter_eq(self, field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        let value = value.into();
        let operator = match value {
            FilterValue::List(_) => FilterOperator::In,
            FilterValue::Null => FilterOperator::IsNull,
            _ => FilterOperator::Equals,
        };
        self.filter(field, operator, value)
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sorts.push(QuerySort {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit_offset(mut self, limit: u64, offset: u64) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    pub fn join_through(mut self, join: JoinThrough) -> Self {
        self.join = Some(join);
        self.distinct = true;
        self
    }

    pub fn eager_load(mut self, relation: impl Into<String>) -> Self {
        let relation = relation.into();
        if !self.eager_loads.contains(&relation) {
            self.eager_loads.push(relation);
        }
        self
    }

    /// The same query without ordering or a page window.
    pub fn unpaginated(&self) -> Self {
        Self {
            sorts: Vec::new(),
            limit: None,
            offset: None,
            ..self.clone()
        }
    }
}
