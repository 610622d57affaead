//! Scope pipeline.
//!
//! Applies one branch's instructions to a [`ScopeQuery`] in a fixed order:
//! default filters, filters, extra-field scopes, sort, paginate. Every stage
//! runs either the resource's custom hook or the store's primitive, never
//! both. Stages are pure: each returns a new query, and a failing stage
//! leaves the caller's query untouched.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::store::BackingStore;
use super::types::{QueryContext, ScopeQuery};
use crate::config::Config;
use crate::error::{Result, SideloadError};
use crate::query::{InstructionSet, PageParams, SortInstruction};
use crate::resource::{FilterDefinition, Resource};
use crate::value::{FilterValue, normalize};

/// A resolved page: 1-based number and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageWindow {
    pub number: u64,
    pub size: u64,
}

impl PageWindow {
    pub fn offset(&self) -> u64 {
        self.number.saturating_sub(1).saturating_mul(self.size)
    }
}

/// When the paginate stage runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    /// Always, falling back to default sizes (the primary collection).
    Always,
    /// Only when the branch carries a page instruction (sideloads).
    WhenRequested,
}

/// The scope pipeline for one resource in one request.
pub struct ScopePipeline<'a> {
    resource: &'a Resource,
    store: &'a dyn BackingStore,
    config: &'a Config,
    context: &'a QueryContext,
}

impl<'a> ScopePipeline<'a> {
    pub fn new(
        resource: &'a Resource,
        store: &'a dyn BackingStore,
        config: &'a Config,
        context: &'a QueryContext,
    ) -> Self {
        Self {
            resource,
            store,
            config,
            context,
        }
    }

    /// Run every stage.
    pub fn apply(&self, query: ScopeQuery, instructions: &InstructionSet) -> Result<ScopeQuery> {
        let query = self.apply_scoping(query, instructions)?;
        self.apply_ordering(query, instructions, Pagination::Always)
    }

    /// Default filters, filters, and extra-field scopes.
    pub fn apply_scoping(
        &self,
        query: ScopeQuery,
        instructions: &InstructionSet,
    ) -> Result<ScopeQuery> {
        let query = self.apply_default_filters(query)?;
        let query = self.apply_filters(query, &instructions.filter)?;
        Ok(self.apply_extra_fields(query, &instructions.extra_fields))
    }

    /// Sort and paginate.
    pub fn apply_ordering(
        &self,
        query: ScopeQuery,
        instructions: &InstructionSet,
        pagination: Pagination,
    ) -> Result<ScopeQuery> {
        let query = self.apply_sort(query, &instructions.sort)?;
        match pagination {
            Pagination::WhenRequested if instructions.page.is_empty() => Ok(query),
            _ => self.apply_paginate(query, &instructions.page),
        }
    }

    /// Check filters and page size without building a query.
    pub fn validate(&self, instructions: &InstructionSet, pagination: Pagination) -> Result<()> {
        self.resolve_filters(&instructions.filter)?;
        self.check_required(&instructions.filter)?;
        if pagination == Pagination::Always || !instructions.page.is_empty() {
            self.page_window(&instructions.page)?;
        }
        Ok(())
    }

    pub fn apply_default_filters(&self, query: ScopeQuery) -> Result<ScopeQuery> {
        self.resource
            .default_filters()
            .iter()
            .try_fold(query, |query, default| {
                debug!(resource = self.resource.type_name(), filter = %default.name, "applying default filter");
                default.apply(query, self.context)
            })
    }

    /// Resolve, normalize, and apply requested filters.
    ///
    /// Every key is resolved before any is applied, so a bad key fails the
    /// stage without partial work.
    pub fn apply_filters(
        &self,
        query: ScopeQuery,
        filter: &BTreeMap<String, Value>,
    ) -> Result<ScopeQuery> {
        let resolved = self.resolve_filters(filter)?;
        self.check_required(filter)?;

        resolved.into_iter().try_fold(query, |query, (definition, value)| {
            debug!(
                resource = self.resource.type_name(),
                filter = definition.name(),
                custom = definition.has_handler(),
                "applying filter"
            );
            definition.apply(query, &value, self.store, self.context)
        })
    }

    pub fn apply_extra_fields(&self, query: ScopeQuery, requested: &BTreeSet<String>) -> ScopeQuery {
        requested
            .iter()
            .filter_map(|name| self.resource.extra_field(name))
            .filter(|field| field.allows(self.context))
            .fold(query, |query, field| field.apply(query))
    }

    /// Sort by `sort`, or by the resource's default sort when `sort` is empty.
    pub fn apply_sort(&self, query: ScopeQuery, sort: &[SortInstruction]) -> Result<ScopeQuery> {
        let sort = if sort.is_empty() {
            self.resource.default_sort()
        } else {
            sort
        };

        sort.iter().try_fold(query, |query, instruction| {
            match self.resource.sort_hook() {
                Some(hook) => hook(query, &instruction.attribute, instruction.direction),
                None => Ok(self
                    .store
                    .order_by(query, &instruction.attribute, instruction.direction)),
            }
        })
    }

    pub fn apply_paginate(&self, query: ScopeQuery, page: &PageParams) -> Result<ScopeQuery> {
        let window = self.page_window(page)?;
        match self.resource.paginate_hook() {
            Some(hook) => hook(query, &window),
            None => Ok(self.store.limit_offset(query, window.size, window.offset())),
        }
    }

    /// Resolve page defaults and enforce the size cap.
    pub fn page_window(&self, page: &PageParams) -> Result<PageWindow> {
        let max = self
            .resource
            .max_page_size()
            .unwrap_or(self.config.max_page_size);
        let size = page
            .size
            .or(self.resource.default_page_size())
            .unwrap_or(self.config.default_page_size);

        if size > max {
            debug!(resource = self.resource.type_name(), requested = size, max, "page size over limit");
            return Err(SideloadError::UnsupportedPageSize { size, max });
        }

        Ok(PageWindow {
            number: page.number.unwrap_or(1).max(1),
            size,
        })
    }

    /// Requested extra fields minus those whose guard rejects the request.
    pub fn permitted_extra_fields(&self, requested: &BTreeSet<String>) -> BTreeSet<String> {
        self.resource.permitted_extra_fields(requested, self.context)
    }

    fn resolve_filters(
        &self,
        filter: &BTreeMap<String, Value>,
    ) -> Result<Vec<(&'a FilterDefinition, FilterValue)>> {
        filter
            .iter()
            .map(|(key, raw)| {
                let definition = self.resource.find_filter(key).ok_or_else(|| {
                    SideloadError::bad_filter(
                        key,
                        format!("not an allowed filter for '{}'", self.resource.type_name()),
                    )
                })?;
                if !definition.allows(self.context) {
                    return Err(SideloadError::bad_filter(key, "not permitted for this request"));
                }
                let value = normalize(raw)
                    .map_err(|e| SideloadError::bad_filter(key, format!("invalid value: {e}")))?;
                Ok((definition, value))
            })
            .collect()
    }

    fn check_required(&self, filter: &BTreeMap<String, Value>) -> Result<()> {
        let missing: Vec<String> = self
            .resource
            .filters()
            .iter()
            .filter(|def| def.is_required())
            .filter(|def| !filter.keys().any(|key| def.answers_to(key)))
            .map(|def| def.name().to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(SideloadError::RequiredFilter { names: missing })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::query::SortDirection;
    use crate::resource::{ExtraField, FilterDefinition};
    use crate::scope::FilterOperator;
    use async_trait::async_trait;
    use serde_json::json;

    struct NullStore;

    #[async_trait]
    impl BackingStore for NullStore {
        async fn execute(&self, _query: &ScopeQuery) -> anyhow::Result<Vec<Value>> {
            Ok(Vec::new())
        }
    }

    fn authors() -> Resource {
        Resource::builder("authors")
            .filter(FilterDefinition::new("id"))
            .filter(FilterDefinition::new("first_name").alias("name"))
            .filter(FilterDefinition::new("salary").guard(|ctx| ctx.has_role("admin")))
            .filter(
                FilterDefinition::new("search")
                    .handler(|q, v, _| Ok(q.filter("last_name", FilterOperator::StartsWith, v.clone()))),
            )
            .default_filter("visible", |q, _| Ok(q.filter_eq("hidden", false)))
            .extra_field(ExtraField::new("net_worth").scope(|q| q.eager_load("assets")))
            .extra_field(
                ExtraField::new("secrets")
                    .guard(|ctx| ctx.has_role("admin"))
                    .scope(|q| q.eager_load("vault")),
            )
            .default_sort("-id")
            .build()
            .unwrap()
    }

    fn run(resource: &Resource, instructions: &InstructionSet) -> Result<ScopeQuery> {
        let ctx = QueryContext::new("index");
        let config = Config::default();
        ScopePipeline::new(resource, &NullStore, &config, &ctx)
            .apply(resource.base_query(), instructions)
    }

    fn with_filter(pairs: &[(&str, Value)]) -> InstructionSet {
        InstructionSet {
            filter: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn stages_run_in_order() {
        let resource = authors();
        let mut instructions = with_filter(&[("id", json!("1,2"))]);
        instructions.extra_fields.insert("net_worth".to_string());
        instructions.page = PageParams::new(2, 10);

        let query = run(&resource, &instructions).unwrap();
        assert_eq!(query.conditions[0].field, "hidden");
        assert_eq!(query.conditions[1].field, "id");
        assert_eq!(query.conditions[1].operator, FilterOperator::In);
        assert_eq!(query.eager_loads, vec!["assets".to_string()]);
        assert_eq!(query.sorts[0].field, "id");
        assert_eq!(query.sorts[0].direction, SortDirection::Desc);
        assert_eq!((query.limit, query.offset), (Some(10), Some(10)));
    }

    #[test]
    fn unknown_filter_is_bad_filter() {
        let err = run(&authors(), &with_filter(&[("nickname", json!("x"))])).unwrap_err();
        assert!(matches!(err, SideloadError::BadFilter { ref name, .. } if name == "nickname"));
    }

    #[test]
    fn guarded_filter_is_bad_filter_without_role() {
        let err = run(&authors(), &with_filter(&[("salary", json!("100"))])).unwrap_err();
        assert!(matches!(err, SideloadError::BadFilter { .. }));

        let resource = authors();
        let ctx = QueryContext::new("index").with_role("admin");
        let config = Config::default();
        let query = ScopePipeline::new(&resource, &NullStore, &config, &ctx)
            .apply(resource.base_query(), &with_filter(&[("salary", json!("100"))]))
            .unwrap();
        assert!(query.conditions.iter().any(|c| c.field == "salary"));
    }

    #[test]
    fn alias_reaches_store_as_definition_name() {
        let query = run(&authors(), &with_filter(&[("name", json!("Stephen"))])).unwrap();
        let condition = query.conditions.iter().find(|c| c.field == "first_name").unwrap();
        assert_eq!(condition.value, FilterValue::from("Stephen"));
    }

    #[test]
    fn custom_handler_replaces_default() {
        let query = run(&authors(), &with_filter(&[("search", json!("Ki"))])).unwrap();
        assert!(query.conditions.iter().all(|c| c.field != "search"));
        assert!(
            query
                .conditions
                .iter()
                .any(|c| c.field == "last_name" && c.operator == FilterOperator::StartsWith)
        );
    }

    #[test]
    fn invalid_json_literal_is_bad_filter() {
        let err = run(&authors(), &with_filter(&[("id", json!("{{{ nope }}}"))])).unwrap_err();
        assert!(matches!(err, SideloadError::BadFilter { .. }));
    }

    #[test]
    fn required_filters_must_be_present() {
        let resource = Resource::builder("authors")
            .filter(FilterDefinition::new("tenant").alias("org").required())
            .build()
            .unwrap();

        let err = run(&resource, &InstructionSet::default()).unwrap_err();
        assert!(matches!(err, SideloadError::RequiredFilter { ref names } if names == &["tenant"]));
        assert!(run(&resource, &with_filter(&[("org", json!("acme"))])).is_ok());
    }

    #[test]
    fn page_size_cap() {
        let mut instructions = InstructionSet::default();
        instructions.page.size = Some(1001);
        let err = run(&authors(), &instructions).unwrap_err();
        assert!(matches!(
            err,
            SideloadError::UnsupportedPageSize { size: 1001, max: 1000 }
        ));
    }

    #[test]
    fn page_defaults() {
        let query = run(&authors(), &InstructionSet::default()).unwrap();
        assert_eq!((query.limit, query.offset), (Some(20), Some(0)));

        let resource = Resource::builder("books")
            .default_page_size(5)
            .max_page_size(50)
            .build()
            .unwrap();
        let query = run(&resource, &InstructionSet::default()).unwrap();
        assert_eq!(query.limit, Some(5));

        let mut instructions = InstructionSet::default();
        instructions.page.size = Some(51);
        assert!(run(&resource, &instructions).is_err());
    }

    #[test]
    fn custom_sort_called_once_per_entry() {
        let resource = Resource::builder("authors")
            .sort_with(|q, attribute, direction| Ok(q.order_by(format!("custom_{attribute}"), direction)))
            .build()
            .unwrap();
        let instructions = InstructionSet {
            sort: vec![SortInstruction::asc("name"), SortInstruction::desc("id")],
            ..Default::default()
        };
        let query = run(&resource, &instructions).unwrap();
        let fields: Vec<_> = query.sorts.iter().map(|s| s.field.as_str()).collect();
        assert_eq!(fields, vec!["custom_name", "custom_id"]);
    }

    #[test]
    fn custom_paginate_receives_resolved_window() {
        let resource = Resource::builder("authors")
            .paginate_with(|q, window| Ok(q.limit_offset(window.size * 100, window.number)))
            .build()
            .unwrap();
        let mut instructions = InstructionSet::default();
        instructions.page.number = Some(3);
        let query = run(&resource, &instructions).unwrap();
        assert_eq!((query.limit, query.offset), (Some(2000), Some(3)));
    }

    #[test]
    fn sideload_pagination_only_when_requested() {
        let resource = authors();
        let ctx = QueryContext::new("index");
        let config = Config::default();
        let pipeline = ScopePipeline::new(&resource, &NullStore, &config, &ctx);

        let query = pipeline
            .apply_ordering(resource.base_query(), &InstructionSet::default(), Pagination::WhenRequested)
            .unwrap();
        assert_eq!(query.limit, None);
    }

    #[test]
    fn guarded_extra_fields_are_skipped() {
        let resource = authors();
        let ctx = QueryContext::new("index");
        let config = Config::default();
        let pipeline = ScopePipeline::new(&resource, &NullStore, &config, &ctx);

        let requested: BTreeSet<String> = ["secrets".to_string(), "net_worth".to_string()].into();
        let query = pipeline.apply_extra_fields(resource.base_query(), &requested);
        assert_eq!(query.eager_loads, vec!["assets".to_string()]);
        assert_eq!(
            pipeline.permitted_extra_fields(&requested),
            BTreeSet::from(["net_worth".to_string()])
        );
    }

    #[test]
    fn window_offset_math() {
        assert_eq!(PageWindow { number: 1, size: 10 }.offset(), 0);
        assert_eq!(PageWindow { number: 3, size: 10 }.offset(), 20);
    }
}
