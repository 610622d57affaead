//! Sideload Kernel Library
//!
//! Parses JSON:API style request parameters into per-branch instructions,
//! runs them through a resource's scope pipeline, and resolves the requested
//! sideloads in one batched query per relationship.

pub mod config;
pub mod error;
pub mod graph;
pub mod params;
pub mod query;
pub mod render;
pub mod resolver;
pub mod resource;
pub mod scope;
pub mod value;

pub use config::Config;
pub use error::{Result, SideloadError};
pub use graph::{Cardinality, SideloadGraph, SideloadNode};
pub use query::{IncludeTree, InstructionSet, Query};
pub use render::{AttributeSerializer, RecordSerializer, RenderOptions, SerializerRegistry};
pub use resolver::{ResolveState, ResolvedGraph, Resolver};
pub use resource::{FilterDefinition, Resource, Stats};
pub use scope::{BackingStore, FilterOperator, JoinThrough, QueryContext, ScopeQuery};
pub use value::FilterValue;
