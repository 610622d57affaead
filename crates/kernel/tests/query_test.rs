#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Query parsing and rendering integration tests.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Value, json};
use sideload_kernel::params::parse_query_string;
use sideload_kernel::query::{Branches, PageParams, SortInstruction};
use sideload_kernel::resolver::Resolver;
use sideload_kernel::scope::QueryContext;
use sideload_kernel::value::normalize;
use sideload_kernel::{
    AttributeSerializer, FilterValue, IncludeTree, Query, SerializerRegistry, SideloadError,
};
use sideload_test_utils::fixtures;

fn books_branches() -> Branches {
    Branches::new("authors").with_branch("books", "books")
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// -------------------------------------------------------------------------
// Query parser
// -------------------------------------------------------------------------

#[test]
fn parses_branch_qualified_instructions() {
    let params = json!({
        "filter": {"id": 1, "books": {"title": "foo"}},
        "sort": "name,-id,-books.title",
        "page": {"number": 2, "size": 10}
    });
    let query = Query::parse(&params, &books_branches());

    let default = query.default_branch();
    assert_eq!(default.filter.get("id"), Some(&json!(1)));
    assert_eq!(default.filter.len(), 1);
    assert_eq!(
        default.sort,
        vec![SortInstruction::asc("name"), SortInstruction::desc("id")]
    );
    assert_eq!(default.page, PageParams::new(2, 10));

    let books = query.branch("books").unwrap();
    assert_eq!(books.filter.get("title"), Some(&json!("foo")));
    assert_eq!(books.sort, vec![SortInstruction::desc("title")]);
    assert!(books.page.is_empty());
}

#[test]
fn parses_from_a_query_string() {
    let params = parse_query_string(
        "filter[id]=1,2&filter[books][title]=It&sort=-books.title&page[books][size]=5&include=books.genre",
    );
    let query = Query::parse(&params, &books_branches());

    assert_eq!(query.default_branch().filter.get("id"), Some(&json!("1,2")));
    assert_eq!(query.branch("books").unwrap().filter.get("title"), Some(&json!("It")));
    assert_eq!(query.branch("books").unwrap().page.size, Some(5));
    assert_eq!(query.include, IncludeTree::parse("books.genre"));
}

#[test]
fn unknown_branches_fall_back_or_drop() {
    let params = json!({
        "filter": {"widgets": {"color": "red"}},
        "sort": "widgets.name",
        "page": {"widgets": {"size": 3}}
    });
    let query = Query::parse(&params, &books_branches());

    // An object under an unknown name is a default-branch filter value.
    assert_eq!(
        query.default_branch().filter.get("widgets"),
        Some(&json!({"color": "red"}))
    );
    assert!(query.default_branch().sort.is_empty());
    assert!(query.branch("widgets").is_none());
}

#[test]
fn fieldsets_reach_every_branch_of_their_type() {
    let branches = books_branches().with_branch("top_books", "books");
    let params = parse_query_string("fields[books]=title&extra_fields[authors]=net_worth");
    let query = Query::parse(&params, &branches);

    assert_eq!(query.branch("books").unwrap().fields, set(&["title"]));
    assert_eq!(query.branch("top_books").unwrap().fields, set(&["title"]));
    assert_eq!(query.default_branch().extra_fields, set(&["net_worth"]));
    assert_eq!(query.fields_for("books"), Some(&set(&["title"])));
}

#[test]
fn resolver_parses_against_its_graph() {
    let store = Arc::new(fixtures::library());
    let resolver = Resolver::new(
        Arc::new(fixtures::authors_resource().unwrap()),
        Arc::new(fixtures::authors_graph().unwrap()),
        store,
    )
    .unwrap();

    let params = parse_query_string("sort=-top_books.sales");
    let index = resolver.parse(&params, &QueryContext::new("index"));
    assert_eq!(index.branch("top_books").unwrap().sort, vec![SortInstruction::desc("sales")]);

    // `bestsellers` is index-only, so its branch does not exist for `show`.
    let show = resolver.parse(&params, &QueryContext::new("show"));
    assert!(show.branch("top_books").is_none());
}

// -------------------------------------------------------------------------
// Value normalizer
// -------------------------------------------------------------------------

#[test]
fn normalizes_request_values() {
    let cases: Vec<(Value, FilterValue)> = vec![
        (json!("true"), FilterValue::Boolean(true)),
        (json!("null"), FilterValue::Null),
        (json!("42"), FilterValue::from("42")),
        (json!(42), FilterValue::Number(42.into())),
        (
            json!("1,2"),
            FilterValue::List(vec![FilterValue::from("1"), FilterValue::from("2")]),
        ),
        (json!(["a", "false"]), FilterValue::List(vec![FilterValue::from("a"), FilterValue::Boolean(false)])),
        (
            json!("{{a,b}},c"),
            FilterValue::List(vec![FilterValue::from("a,b"), FilterValue::from("c")]),
        ),
        (json!("{{{\"a\": 1}}}"), FilterValue::Json(json!({"a": 1}))),
    ];

    for (raw, expected) in cases {
        assert_eq!(normalize(&raw).unwrap(), expected, "normalizing {raw}");
    }
    assert!(normalize(&json!("{{{not json}}}")).is_err());
}

// -------------------------------------------------------------------------
// Rendering
// -------------------------------------------------------------------------

#[tokio::test]
async fn resolved_graph_renders_through_the_registry() {
    let store = Arc::new(fixtures::library());
    let graph = fixtures::authors_graph().unwrap();

    let partial = SerializerRegistry::new()
        .register(AttributeSerializer::new("authors").relationship("books"))
        .register(AttributeSerializer::new("books"));
    let err = partial.validate(&graph).unwrap_err();
    assert!(matches!(err, SideloadError::MissingSerializer { .. }));

    let resolver = Resolver::new(
        Arc::new(fixtures::authors_resource().unwrap()),
        Arc::new(graph),
        store,
    )
    .unwrap();
    let resolved = resolver
        .resolve_params(
            &parse_query_string("filter[id]=1&include=books&fields[authors]=last_name&fields[books]=title"),
            &QueryContext::new("index"),
        )
        .await
        .unwrap();

    let author = partial
        .serialize("authors", &resolved.records[0], &resolved.render)
        .unwrap();
    assert_eq!(author["last_name"], "King");
    assert!(author.get("first_name").is_none());
    assert_eq!(author["books"].as_array().unwrap().len(), 2);

    let book = partial
        .serialize("books", &resolved.included["books"][0], &resolved.render)
        .unwrap();
    assert_eq!(book, json!({"title": "The Shining"}));
}
