//! SQL rendering of scope queries using SeaQuery.
//!
//! Renders a [`ScopeQuery`] for PostgreSQL:
//! - conditions and sort keys against the queried collection
//! - LIMIT/OFFSET page windows
//! - many-to-many joins as an `EXISTS` subquery plus a `json_agg` column
//!   carrying the matched association rows
//! - aggregate queries for stats

use anyhow::{Result, bail};
use sea_query::{
    Alias, Asterisk, Cond, Expr, Func, Order, PostgresQueryBuilder, Query, SelectStatement,
    SimpleExpr,
};

use super::store::Aggregate;
use super::types::{Condition, FilterOperator, JoinThrough, ScopeQuery};
use crate::query::SortDirection;
use crate::value::FilterValue;

/// Column name for aggregate results.
pub const AGGREGATE_COLUMN: &str = "value";

/// Renders one [`ScopeQuery`] to SQL text.
pub struct SqlRenderer<'a> {
    query: &'a ScopeQuery,
}

impl<'a> SqlRenderer<'a> {
    pub fn new(query: &'a ScopeQuery) -> Self {
        Self { query }
    }

    /// The row-selecting statement.
    ///
    /// Fails when a condition's value cannot be expressed for its operator;
    /// conditions are never dropped.
    pub fn build(&self) -> Result<String> {
        let mut select = Query::select();
        select.column((self.table(), Asterisk));
        select.from(self.table());

        if let Some(join) = &self.query.join {
            select.expr_as(self.join_rows_expr(join), Alias::new(&join.table));
            select.and_where(self.join_exists_expr(join));
        }

        self.add_conditions(&mut select)?;

        if self.query.distinct && self.query.join.is_none() {
            select.distinct();
        }

        for sort in &self.query.sorts {
            let order = match sort.direction {
                SortDirection::Asc => Order::Asc,
                SortDirection::Desc => Order::Desc,
            };
            select.order_by((self.table(), Alias::new(&sort.field)), order);
        }

        if let Some(limit) = self.query.limit {
            select.limit(limit);
        }
        if let Some(offset) = self.query.offset {
            select.offset(offset);
        }

        Ok(select.to_string(PostgresQueryBuilder))
    }

    /// An aggregate over every matching row; ordering and paging are ignored.
    pub fn build_aggregate(&self, attribute: &str, aggregate: Aggregate) -> Result<String> {
        let column = Expr::col((self.table(), Alias::new(attribute)));
        let expr: SimpleExpr = match aggregate {
            Aggregate::Count => Func::count(Expr::col(Asterisk)).into(),
            Aggregate::Sum => Func::sum(column).into(),
            Aggregate::Average => Func::avg(column).into(),
            Aggregate::Maximum => Func::max(column).into(),
            Aggregate::Minimum => Func::min(column).into(),
        };

        let mut select = Query::select();
        select.expr_as(expr, Alias::new(AGGREGATE_COLUMN));
        select.from(self.table());

        if let Some(join) = &self.query.join {
            select.and_where(self.join_exists_expr(join));
        }
        self.add_conditions(&mut select)?;

        Ok(select.to_string(PostgresQueryBuilder))
    }

    fn table(&self) -> Alias {
        Alias::new(&self.query.collection)
    }

    fn add_conditions(&self, select: &mut SelectStatement) -> Result<()> {
        for condition in &self.query.conditions {
            select.and_where(self.condition_expr(condition)?);
        }
        Ok(())
    }

    fn condition_expr(&self, condition: &Condition) -> Result<SimpleExpr> {
        let column = || Expr::col((self.table(), Alias::new(&condition.field)));
        let value = &condition.value;

        let expr = match condition.operator {
            FilterOperator::Equals => match value {
                FilterValue::List(_) => self.in_expr(condition, false)?,
                FilterValue::Null => column().is_null(),
                other => column().eq(scalar(condition, other)?),
            },
            FilterOperator::NotEquals => match value {
                FilterValue::List(_) => self.in_expr(condition, true)?,
                FilterValue::Null => column().is_not_null(),
                other => column().ne(scalar(condition, other)?),
            },
            FilterOperator::Contains => {
                column().like(format!("%{}%", escape_like_wildcards(&like_text(condition)?)))
            }
            FilterOperator::StartsWith => {
                column().like(format!("{}%", escape_like_wildcards(&like_text(condition)?)))
            }
            FilterOperator::EndsWith => {
                column().like(format!("%{}", escape_like_wildcards(&like_text(condition)?)))
            }
            FilterOperator::GreaterThan => column().gt(bound(condition)?),
            FilterOperator::LessThan => column().lt(bound(condition)?),
            FilterOperator::GreaterOrEqual => column().gte(bound(condition)?),
            FilterOperator::LessOrEqual => column().lte(bound(condition)?),
            FilterOperator::In => self.in_expr(condition, false)?,
            FilterOperator::NotIn => self.in_expr(condition, true)?,
            FilterOperator::IsNull => column().is_null(),
            FilterOperator::IsNotNull => column().is_not_null(),
        };
        Ok(expr)
    }

    /// `IN (...)`; an empty list matches nothing (or everything when negated).
    fn in_expr(&self, condition: &Condition, negate: bool) -> Result<SimpleExpr> {
        let values = condition
            .value
            .items()
            .into_iter()
            .map(|item| scalar(condition, item))
            .collect::<Result<Vec<_>>>()?;
        if values.is_empty() {
            return Ok(Expr::cust(if negate { "TRUE" } else { "FALSE" }));
        }
        let column = Expr::col((self.table(), Alias::new(&condition.field)));
        if negate {
            Ok(column.is_not_in(values))
        } else {
            Ok(column.is_in(values))
        }
    }

    /// `FROM <join table> WHERE <join>.<child_key> = <table>.<pk> AND <join>.<parent_key> IN (...)`
    fn join_subquery(&self, join: &JoinThrough, mut select: SelectStatement) -> SelectStatement {
        let join_table = Alias::new(&join.table);
        select.from(join_table.clone());

        let mut cond = Cond::all().add(
            Expr::col((join_table.clone(), Alias::new(&join.child_key)))
                .equals((self.table(), Alias::new(&join.primary_key))),
        );

        let values: Vec<sea_query::Value> = join.values.iter().filter_map(sql_value).collect();
        if values.is_empty() {
            cond = cond.add(Expr::cust("FALSE"));
        } else {
            cond = cond.add(Expr::col((join_table, Alias::new(&join.parent_key))).is_in(values));
        }

        select.cond_where(cond);
        select
    }

    fn join_exists_expr(&self, join: &JoinThrough) -> SimpleExpr {
        let select_one = Query::select().expr(Expr::val(1)).to_owned();
        Expr::exists(self.join_subquery(join, select_one))
    }

    /// Correlated `json_agg` of the matching association rows.
    fn join_rows_expr(&self, join: &JoinThrough) -> SimpleExpr {
        let rows = Query::select()
            .expr(Expr::cust(format!("json_agg(\"{}\")", join.table.replace('"', ""))))
            .to_owned();
        let sql = self.join_subquery(join, rows).to_string(PostgresQueryBuilder);
        Expr::cust(format!("({sql})"))
    }
}

/// Bindable scalar for a filter value.
fn sql_value(value: &FilterValue) -> Option<sea_query::Value> {
    match value {
        FilterValue::String(s) => Some(s.clone().into()),
        FilterValue::Number(n) => n
            .as_i64()
            .map(Into::into)
            .or_else(|| n.as_f64().map(Into::into)),
        FilterValue::Boolean(b) => Some((*b).into()),
        FilterValue::Json(json) => Some(json.clone().into()),
        FilterValue::Null | FilterValue::List(_) => None,
    }
}

fn scalar(condition: &Condition, value: &FilterValue) -> Result<sea_query::Value> {
    match sql_value(value) {
        Some(value) => Ok(value),
        None => bail!(
            "filter on '{}' ({:?}) has no bindable value: {}",
            condition.field,
            condition.operator,
            value.to_json()
        ),
    }
}

/// Range bound: numbers compare numerically, strings as a text literal the
/// database coerces to the column type (dates, timestamps).
fn bound(condition: &Condition) -> Result<sea_query::Value> {
    match &condition.value {
        FilterValue::Number(_) => scalar(condition, &condition.value),
        FilterValue::String(s) => Ok(s.clone().into()),
        other => bail!(
            "range filter on '{}' ({:?}) needs a number or string, got {}",
            condition.field,
            condition.operator,
            other.to_json()
        ),
    }
}

fn like_text(condition: &Condition) -> Result<String> {
    match condition.value.as_string() {
        Some(text) => Ok(text),
        None => bail!(
            "pattern filter on '{}' ({:?}) needs a scalar, got {}",
            condition.field,
            condition.operator,
            condition.value.to_json()
        ),
    }
}

/// Escape LIKE/ILIKE wildcard characters in user input.
fn escape_like_wildcards(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
