//! Scoping: the lazy query description, the backing-store contract, and the
//! pipeline that applies request instructions to a query.

pub mod pipeline;
pub mod postgres;
pub mod sql;
pub mod store;
pub mod types;

pub use pipeline::{PageWindow, Pagination, ScopePipeline};
pub use postgres::PgStore;
pub use sql::SqlRenderer;
pub use store::{Aggregate, BackingStore};
pub use types::{Condition, FilterOperator, JoinThrough, QueryContext, QuerySort, ScopeQuery};
