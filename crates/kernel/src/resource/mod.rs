//! Resource scoping configuration.
//!
//! A [`Resource`] describes how requests scope one resource type: which
//! filters are allowed, which default filters always apply, which extra
//! fields may be requested, optional sort/paginate overrides, stats, and
//! page-size limits. Resources are built once at configuration time and
//! shared read-only across requests.

pub mod filter;
pub mod stats;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, SideloadError};
use crate::query::{SortDirection, SortInstruction};
use crate::scope::{PageWindow, QueryContext, ScopeQuery};

pub use filter::{FilterDefinition, FilterHandler, Guard};
pub use stats::{Calculation, CustomStat, Stats};

/// Baseline scope applied to every request (e.g. soft-delete exclusion).
pub type DefaultFilterFn =
    Arc<dyn Fn(ScopeQuery, &QueryContext) -> Result<ScopeQuery> + Send + Sync>;

/// Scope mutation for a requested extra field.
pub type ExtraFieldScope = Arc<dyn Fn(ScopeQuery) -> ScopeQuery + Send + Sync>;

/// Custom sort, called once per sort instruction.
pub type SortHook =
    Arc<dyn Fn(ScopeQuery, &str, SortDirection) -> Result<ScopeQuery> + Send + Sync>;

/// Custom pagination, called with the resolved page window.
pub type PaginateHook = Arc<dyn Fn(ScopeQuery, &PageWindow) -> Result<ScopeQuery> + Send + Sync>;

/// A named default filter.
#[derive(Clone)]
pub struct DefaultFilter {
    pub name: String,
    apply: DefaultFilterFn,
}

impl DefaultFilter {
    pub fn apply(&self, query: ScopeQuery, context: &QueryContext) -> Result<ScopeQuery> {
        (self.apply)(query, context)
    }
}

/// An opt-in attribute, suppressed unless requested.
#[derive(Clone)]
pub struct ExtraField {
    name: String,
    scope: Option<ExtraFieldScope>,
    guard: Option<Guard>,
}

impl ExtraField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: None,
            guard: None,
        }
    }

    /// Scope mutation to run when the field is requested (e.g. an eager load).
    pub fn scope(mut self, scope: impl Fn(ScopeQuery) -> ScopeQuery + Send + Sync + 'static) -> Self {
        self.scope = Some(Arc::new(scope));
        self
    }

    /// The field is dropped from the request unless `guard` passes.
    pub fn guard(mut self, guard: impl Fn(&QueryContext) -> bool + Send + Sync + 'static) -> Self {
        self.guard = Some(Arc::new(guard));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn allows(&self, context: &QueryContext) -> bool {
        self.guard.as_ref().is_none_or(|guard| guard(context))
    }

    pub fn apply(&self, query: ScopeQuery) -> ScopeQuery {
        match &self.scope {
            Some(scope) => scope(query),
            None => query,
        }
    }
}

/// Scoping configuration for one resource type.
#[derive(Clone)]
pub struct Resource {
    type_name: String,
    collection: String,
    primary_key: String,
    filters: Vec<FilterDefinition>,
    default_filters: Vec<DefaultFilter>,
    extra_fields: Vec<ExtraField>,
    sort_hook: Option<SortHook>,
    paginate_hook: Option<PaginateHook>,
    stats: BTreeMap<String, Stats>,
    default_sort: Vec<SortInstruction>,
    default_page_size: Option<u64>,
    max_page_size: Option<u64>,
}

impl Resource {
    pub fn builder(type_name: impl Into<String>) -> ResourceBuilder {
        ResourceBuilder::new(type_name)
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Backing collection; defaults to the type name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Unscoped query over this resource's collection.
    pub fn base_query(&self) -> ScopeQuery {
        ScopeQuery::new(&self.collection)
    }

    pub fn filters(&self) -> &[FilterDefinition] {
        &self.filters
    }

    /// Resolve a requested filter key: declared names first, then aliases.
    pub fn find_filter(&self, key: &str) -> Option<&FilterDefinition> {
        self.filters
            .iter()
            .find(|def| def.name() == key)
            .or_else(|| {
                self.filters
                    .iter()
                    .find(|def| def.aliases().iter().any(|a| a == key))
            })
    }

    pub fn default_filters(&self) -> &[DefaultFilter] {
        &self.default_filters
    }

    pub fn extra_fields(&self) -> &[ExtraField] {
        &self.extra_fields
    }

    pub fn extra_field(&self, name: &str) -> Option<&ExtraField> {
        self.extra_fields.iter().find(|field| field.name() == name)
    }

    /// Requested extra fields minus registered ones whose guard rejects the request.
    pub fn permitted_extra_fields(
        &self,
        requested: &BTreeSet<String>,
        context: &QueryContext,
    ) -> BTreeSet<String> {
        requested
            .iter()
            .filter(|name| {
                self.extra_field(name)
                    .is_none_or(|field| field.allows(context))
            })
            .cloned()
            .collect()
    }

    pub fn sort_hook(&self) -> Option<&SortHook> {
        self.sort_hook.as_ref()
    }

    pub fn paginate_hook(&self) -> Option<&PaginateHook> {
        self.paginate_hook.as_ref()
    }

    pub fn stats(&self, attribute: &str) -> Option<&Stats> {
        self.stats.get(attribute)
    }

    pub fn default_sort(&self) -> &[SortInstruction] {
        &self.default_sort
    }

    pub fn default_page_size(&self) -> Option<u64> {
        self.default_page_size
    }

    pub fn max_page_size(&self) -> Option<u64> {
        self.max_page_size
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("type_name", &self.type_name)
            .field("collection", &self.collection)
            .field("primary_key", &self.primary_key)
            .field("filters", &self.filters)
            .field(
                "default_filters",
                &self.default_filters.iter().map(|d| &d.name).collect::<Vec<_>>(),
            )
            .field(
                "extra_fields",
                &self.extra_fields.iter().map(ExtraField::name).collect::<Vec<_>>(),
            )
            .field("stats", &self.stats)
            .field("default_sort", &self.default_sort)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Resource`].
pub struct ResourceBuilder {
    resource: Resource,
}

impl ResourceBuilder {
    fn new(type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        Self {
            resource: Resource {
                collection: type_name.clone(),
                type_name,
                primary_key: "id".to_string(),
                filters: Vec::new(),
                default_filters: Vec::new(),
                extra_fields: Vec::new(),
                sort_hook: None,
                paginate_hook: None,
                stats: BTreeMap::new(),
                default_sort: Vec::new(),
                default_page_size: None,
                max_page_size: None,
            },
        }
    }

    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.resource.collection = collection.into();
        self
    }

    pub fn primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.resource.primary_key = primary_key.into();
        self
    }

    pub fn filter(mut self, definition: FilterDefinition) -> Self {
        self.resource.filters.push(definition);
        self
    }

    /// Allow plain equality filtering on each named attribute.
    pub fn allow_filters<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resource
            .filters
            .extend(names.into_iter().map(FilterDefinition::new));
        self
    }

    pub fn default_filter(
        mut self,
        name: impl Into<String>,
        apply: impl Fn(ScopeQuery, &QueryContext) -> Result<ScopeQuery> + Send + Sync + 'static,
    ) -> Self {
        self.resource.default_filters.push(DefaultFilter {
            name: name.into(),
            apply: Arc::new(apply),
        });
        self
    }

    pub fn extra_field(mut self, field: ExtraField) -> Self {
        self.resource.extra_fields.push(field);
        self
    }

    pub fn sort_with(
        mut self,
        hook: impl Fn(ScopeQuery, &str, SortDirection) -> Result<ScopeQuery> + Send + Sync + 'static,
    ) -> Self {
        self.resource.sort_hook = Some(Arc::new(hook));
        self
    }

    pub fn paginate_with(
        mut self,
        hook: impl Fn(ScopeQuery, &PageWindow) -> Result<ScopeQuery> + Send + Sync + 'static,
    ) -> Self {
        self.resource.paginate_hook = Some(Arc::new(hook));
        self
    }

    pub fn stat(mut self, attribute: impl Into<String>, stats: Stats) -> Self {
        self.resource.stats.insert(attribute.into(), stats);
        self
    }

    /// Sort applied when a request carries none, e.g. `"-id"` or `"name,-id"`.
    pub fn default_sort(mut self, sort: &str) -> Self {
        self.resource.default_sort = SortInstruction::parse_list(sort);
        self
    }

    pub fn default_page_size(mut self, size: u64) -> Self {
        self.resource.default_page_size = Some(size);
        self
    }

    pub fn max_page_size(mut self, size: u64) -> Self {
        self.resource.max_page_size = Some(size);
        self
    }

    /// Validate and finish.
    ///
    /// Fails with `InvalidConfig` on duplicate filter names, on an alias
    /// claimed by two filters or shadowing a filter name, and on a default
    /// page size above the resource's maximum.
    pub fn build(self) -> Result<Resource> {
        let resource = self.resource;
        let type_name = &resource.type_name;

        let mut owners: HashMap<&str, &str> = HashMap::new();
        for def in &resource.filters {
            if let Some(existing) = owners.insert(def.name(), def.name()) {
                return Err(SideloadError::InvalidConfig(format!(
                    "resource '{type_name}' declares filter '{existing}' twice"
                )));
            }
        }
        for def in &resource.filters {
            for alias in def.aliases() {
                if let Some(owner) = owners.insert(alias, def.name()) {
                    return Err(SideloadError::InvalidConfig(format!(
                        "resource '{type_name}': alias '{alias}' of filter '{}' collides with filter '{owner}'",
                        def.name()
                    )));
                }
            }
        }

        if let (Some(default), Some(max)) = (resource.default_page_size, resource.max_page_size)
            && default > max
        {
            return Err(SideloadError::InvalidConfig(format!(
                "resource '{type_name}': default page size {default} exceeds max page size {max}"
            )));
        }

        Ok(resource)
    }
}
