//! Filter definitions: the per-resource filter allow-list.

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::scope::{BackingStore, QueryContext, ScopeQuery};
use crate::value::FilterValue;

/// Custom filter behavior, replacing the store's equality/inclusion filter.
pub type FilterHandler =
    Arc<dyn Fn(ScopeQuery, &FilterValue, &QueryContext) -> Result<ScopeQuery> + Send + Sync>;

/// Predicate against the request context.
pub type Guard = Arc<dyn Fn(&QueryContext) -> bool + Send + Sync>;

/// One allow-listed filter.
#[derive(Clone)]
pub struct FilterDefinition {
    name: String,
    aliases: Vec<String>,
    guard: Option<Guard>,
    required: bool,
    handler: Option<FilterHandler>,
}

impl FilterDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            guard: None,
            required: false,
            handler: None,
        }
    }

    /// Alternate parameter name answering to this filter.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Reject the whole request unless `guard` passes.
    pub fn guard(mut self, guard: impl Fn(&QueryContext) -> bool + Send + Sync + 'static) -> Self {
        self.guard = Some(Arc::new(guard));
        self
    }

    /// Fail with `RequiredFilter` when the request omits this filter.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn handler(
        mut self,
        handler: impl Fn(ScopeQuery, &FilterValue, &QueryContext) -> Result<ScopeQuery>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Whether `key` is this filter's name or one of its aliases.
    pub fn answers_to(&self, key: &str) -> bool {
        self.name == key || self.aliases.iter().any(|a| a == key)
    }

    /// Whether the guard (if any) accepts the request.
    pub fn allows(&self, context: &QueryContext) -> bool {
        self.guard.as_ref().is_none_or(|guard| guard(context))
    }

    /// Apply this filter: the custom handler if set, the store's default otherwise.
    pub fn apply(
        &self,
        query: ScopeQuery,
        value: &FilterValue,
        store: &dyn BackingStore,
        context: &QueryContext,
    ) -> Result<ScopeQuery> {
        match &self.handler {
            Some(handler) => handler(query, value, context),
            None => Ok(store.filter_equals(query, &self.name, value)),
        }
    }
}

impl fmt::Debug for FilterDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterDefinition")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("guarded", &self.guard.is_some())
            .field("required", &self.required)
            .field("custom", &self.handler.is_some())
            .finish()
    }
}
