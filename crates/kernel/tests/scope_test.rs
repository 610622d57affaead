#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Scope pipeline integration tests.
//!
//! Filters, default filters, extra fields, custom sort and pagination, page
//! limits and stats, exercised through a resolver over the library fixture.

use std::sync::Arc;

use serde_json::{Value, json};
use sideload_kernel::params::parse_query_string;
use sideload_kernel::resolver::{ResolveState, ResolvedGraph, Resolver};
use sideload_kernel::resource::ExtraField;
use sideload_kernel::scope::{FilterOperator, QueryContext};
use sideload_kernel::{
    FilterDefinition, Resource, Result, SideloadError, SideloadGraph, Stats,
};
use sideload_test_utils::{MemoryStore, fixtures};

fn authors() -> sideload_kernel::resource::ResourceBuilder {
    Resource::builder("authors")
        .filter(FilterDefinition::new("id"))
        .filter(FilterDefinition::new("first_name").alias("name"))
        .default_sort("id")
}

fn resolver(resource: Resource) -> (Arc<MemoryStore>, Resolver) {
    let store = Arc::new(fixtures::library());
    let resolver = Resolver::new(
        Arc::new(resource),
        Arc::new(SideloadGraph::empty("authors")),
        store.clone(),
    )
    .unwrap();
    (store, resolver)
}

async fn resolve(resolver: &Resolver, query: &str, ctx: &QueryContext) -> Result<ResolvedGraph> {
    resolver.resolve_params(&parse_query_string(query), ctx).await
}

fn index() -> QueryContext {
    QueryContext::new("index")
}

fn ids(graph: &ResolvedGraph) -> Vec<i64> {
    graph.records.iter().map(|r| r["id"].as_i64().unwrap()).collect()
}

// -------------------------------------------------------------------------
// Filters
// -------------------------------------------------------------------------

#[tokio::test]
async fn list_filters_match_any_value() {
    let (_store, resolver) = resolver(authors().build().unwrap());
    let graph = resolve(&resolver, "filter[id]=1,3", &index()).await.unwrap();
    assert_eq!(ids(&graph), vec![1, 3]);
}

#[tokio::test]
async fn aliases_resolve_to_the_filter() {
    let (store, resolver) = resolver(authors().build().unwrap());
    let graph = resolve(&resolver, "filter[name]=Agatha", &index()).await.unwrap();

    assert_eq!(ids(&graph), vec![3]);
    let root = &store.executed()[0];
    assert_eq!(root.conditions[0].field, "first_name");
}

#[tokio::test]
async fn unknown_filter_never_reaches_the_store() {
    let (store, resolver) = resolver(authors().build().unwrap());
    let err = resolve(&resolver, "filter[salary]=100", &index()).await.unwrap_err();

    assert!(matches!(err, SideloadError::BadFilter { ref name, .. } if name == "salary"));
    assert_eq!(store.execution_count(), 0);
}

#[tokio::test]
async fn guarded_filters_require_permission() {
    let resource = authors()
        .filter(FilterDefinition::new("age").guard(|ctx| ctx.has_role("admin")))
        .build()
        .unwrap();
    let (store, resolver) = resolver(resource);

    let err = resolve(&resolver, "filter[age]=70", &index()).await.unwrap_err();
    assert!(matches!(err, SideloadError::BadFilter { .. }));
    assert_eq!(store.execution_count(), 0);

    let admin = index().with_role("admin");
    let graph = resolve(&resolver, "filter[age]=70", &admin).await.unwrap();
    assert_eq!(ids(&graph), vec![1]);
}

#[tokio::test]
async fn required_filters_are_enforced() {
    let resource = Resource::builder("authors")
        .filter(FilterDefinition::new("id").alias("ids").required())
        .build()
        .unwrap();
    let (store, resolver) = resolver(resource);

    let err = resolve(&resolver, "", &index()).await.unwrap_err();
    assert!(matches!(err, SideloadError::RequiredFilter { ref names } if names == &["id".to_string()]));
    assert_eq!(store.execution_count(), 0);

    let graph = resolve(&resolver, "filter[ids]=2", &index()).await.unwrap();
    assert_eq!(ids(&graph), vec![2]);
}

#[tokio::test]
async fn custom_filter_handlers_replace_equality() {
    let resource = authors()
        .filter(FilterDefinition::new("search").handler(|query, value, _ctx| {
            Ok(query.filter("last_name", FilterOperator::StartsWith, value.clone()))
        }))
        .filter(FilterDefinition::new("older_than").handler(|query, value, _ctx| {
            Ok(query.filter("age", FilterOperator::GreaterThan, value.clone()))
        }))
        .build()
        .unwrap();
    let (_store, resolver) = resolver(resource);

    let graph = resolve(&resolver, "filter[search]=Ki", &index()).await.unwrap();
    assert_eq!(ids(&graph), vec![1]);

    let graph = resolve(&resolver, "filter[older_than]=75", &index()).await.unwrap();
    assert_eq!(ids(&graph), vec![2, 3]);
}

#[tokio::test]
async fn default_filters_always_apply() {
    let resource = authors()
        .default_filter("not_deleted", |query, _ctx| Ok(query.filter_eq("deleted", false)))
        .default_filter("state", |query, ctx| {
            Ok(match ctx.url_arg("state_id") {
                Some(state) => query.filter_eq("state_id", state),
                None => query,
            })
        })
        .build()
        .unwrap();
    let (_store, resolver) = resolver(resource);

    let graph = resolve(&resolver, "", &index()).await.unwrap();
    assert_eq!(ids(&graph), vec![1, 2, 3]);

    let nested = index().with_url_arg("state_id", "1");
    let graph = resolve(&resolver, "", &nested).await.unwrap();
    assert_eq!(ids(&graph), vec![1]);
}

// -------------------------------------------------------------------------
// Sort and pagination
// -------------------------------------------------------------------------

#[tokio::test]
async fn sort_overrides_default_sort() {
    let (_store, resolver) = resolver(authors().build().unwrap());

    let graph = resolve(&resolver, "", &index()).await.unwrap();
    assert_eq!(ids(&graph), vec![1, 2, 3, 4]);

    let graph = resolve(&resolver, "sort=-age", &index()).await.unwrap();
    assert_eq!(ids(&graph), vec![3, 2, 1, 4]);
}

#[tokio::test]
async fn custom_sort_hook_receives_each_instruction() {
    let resource = authors()
        .sort_with(|query, attribute, direction| {
            let attribute = if attribute == "name" { "last_name" } else { attribute };
            Ok(query.order_by(attribute, direction))
        })
        .build()
        .unwrap();
    let (_store, resolver) = resolver(resource);

    let graph = resolve(&resolver, "sort=name", &index()).await.unwrap();
    assert_eq!(ids(&graph), vec![3, 4, 1, 2]);
}

#[tokio::test]
async fn pagination_defaults_and_windows() {
    let (store, resolver) = resolver(authors().default_page_size(2).build().unwrap());

    let graph = resolve(&resolver, "", &index()).await.unwrap();
    assert_eq!(ids(&graph), vec![1, 2]);

    let graph = resolve(&resolver, "page[number]=2", &index()).await.unwrap();
    assert_eq!(ids(&graph), vec![3, 4]);

    let graph = resolve(&resolver, "page[number]=0&page[size]=3", &index()).await.unwrap();
    assert_eq!(ids(&graph), vec![1, 2, 3]);

    let last = store.executed().pop().unwrap();
    assert_eq!((last.limit, last.offset), (Some(3), Some(0)));
}

#[tokio::test]
async fn custom_paginate_hook() {
    let resource = authors()
        .paginate_with(|query, window| Ok(query.limit_offset(window.size + 1, window.offset())))
        .build()
        .unwrap();
    let (_store, resolver) = resolver(resource);

    let graph = resolve(&resolver, "page[size]=1", &index()).await.unwrap();
    assert_eq!(ids(&graph), vec![1, 2]);
}

#[tokio::test]
async fn oversized_pages_are_rejected() {
    let (store, resolver) = resolver(authors().max_page_size(3).build().unwrap());
    let err = resolve(&resolver, "page[size]=4", &index()).await.unwrap_err();

    assert!(matches!(err, SideloadError::UnsupportedPageSize { size: 4, max: 3 }));
    assert_eq!(
        err.to_string(),
        "Requested page size 4 is greater than max supported size 3"
    );
    assert_eq!(store.execution_count(), 0);
}

#[tokio::test]
async fn zero_size_page_skips_the_store() {
    let (store, resolver) = resolver(authors().build().unwrap());
    let graph = resolve(&resolver, "page[size]=0&filter[bogus]=1", &index()).await.unwrap();

    assert_eq!(graph.state, ResolveState::ZeroResult);
    assert_eq!(store.execution_count(), 0);
}

// -------------------------------------------------------------------------
// Extra fields
// -------------------------------------------------------------------------

#[tokio::test]
async fn extra_fields_adjust_scope_and_render_options() {
    let resource = authors()
        .extra_field(ExtraField::new("net_worth").scope(|query| query.eager_load("assets")))
        .extra_field(
            ExtraField::new("salary")
                .guard(|ctx| ctx.has_role("admin"))
                .scope(|query| query.eager_load("payroll")),
        )
        .build()
        .unwrap();
    let (store, resolver) = resolver(resource);

    let graph = resolve(
        &resolver,
        "extra_fields[authors]=net_worth,salary&fields[authors]=first_name",
        &index(),
    )
    .await
    .unwrap();

    let root = &store.executed()[0];
    assert_eq!(root.eager_loads, vec!["assets".to_string()]);

    let extras = graph.render.extra_fields_for("authors").unwrap();
    assert!(extras.contains("net_worth"));
    assert!(!extras.contains("salary"));
    let fields = graph.render.fields_for("authors").unwrap();
    assert!(fields.contains("first_name"));
    assert!(fields.contains("net_worth"));
}

// -------------------------------------------------------------------------
// Stats
// -------------------------------------------------------------------------

fn with_stats() -> Resource {
    authors()
        .stat(
            "age",
            Stats::new()
                .sum()
                .average()
                .maximum()
                .custom("spread", |records, attribute| {
                    let ages: Vec<i64> = records.iter().filter_map(|r| r[attribute].as_i64()).collect();
                    match (ages.iter().min(), ages.iter().max()) {
                        (Some(min), Some(max)) => json!(max - min),
                        _ => Value::Null,
                    }
                }),
        )
        .stat("id", Stats::new().count())
        .build()
        .unwrap()
}

#[tokio::test]
async fn stats_cover_the_filtered_set_not_the_page() {
    let (_store, resolver) = resolver(with_stats());
    let graph = resolve(
        &resolver,
        "filter[id]=1,2&page[size]=1&stats[age]=sum,average,maximum,spread&stats[id]=count",
        &index(),
    )
    .await
    .unwrap();

    assert_eq!(ids(&graph), vec![1]);
    assert_eq!(graph.stats["age"]["sum"], json!(151));
    assert_eq!(graph.stats["age"]["average"], json!(75.5));
    assert_eq!(graph.stats["age"]["maximum"], json!(81));
    assert_eq!(graph.stats["age"]["spread"], json!(11));
    assert_eq!(graph.stats["id"]["count"], json!(2));
}

#[tokio::test]
async fn unknown_stats_fail_before_the_store() {
    let (store, resolver) = resolver(with_stats());

    let err = resolve(&resolver, "stats[age]=median", &index()).await.unwrap_err();
    assert!(matches!(
        err,
        SideloadError::StatNotFound { ref attribute, ref calculation }
            if attribute == "age" && calculation == "median"
    ));

    let err = resolve(&resolver, "stats[salary]=sum", &index()).await.unwrap_err();
    assert!(matches!(err, SideloadError::StatNotFound { .. }));
    assert_eq!(store.execution_count(), 0);
}
