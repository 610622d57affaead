//! Library fixture: authors with books, genres, states, bios, hobbies and
//! polymorphic residences.

use std::sync::Arc;

use serde_json::{Value, json};

use sideload_kernel::graph::{SideloadGraph, SideloadNode};
use sideload_kernel::resource::{FilterDefinition, Resource};
use sideload_kernel::scope::JoinThrough;

use crate::MemoryStore;

pub fn authors() -> Vec<Value> {
    vec![
        json!({"id": 1, "first_name": "Stephen", "last_name": "King", "age": 70,
               "state_id": 1, "residence_type": "House", "residence_id": 1, "deleted": false}),
        json!({"id": 2, "first_name": "J.R.R.", "last_name": "Tolkien", "age": 81,
               "state_id": 2, "residence_type": "Condo", "residence_id": 1, "deleted": false}),
        json!({"id": 3, "first_name": "Agatha", "last_name": "Christie", "age": 85,
               "state_id": null, "residence_type": null, "residence_id": null, "deleted": false}),
        json!({"id": 4, "first_name": "Anonymous", "last_name": "Hack", "age": 40,
               "state_id": 1, "residence_type": "Igloo", "residence_id": 9, "deleted": true}),
    ]
}

pub fn books() -> Vec<Value> {
    vec![
        json!({"id": 1, "author_id": 1, "genre_id": 1, "title": "The Shining", "sales": 100}),
        json!({"id": 2, "author_id": 1, "genre_id": 1, "title": "It", "sales": 300}),
        json!({"id": 3, "author_id": 2, "genre_id": 2, "title": "The Hobbit", "sales": 500}),
        json!({"id": 4, "author_id": 2, "genre_id": 2, "title": "The Silmarillion", "sales": 50}),
        json!({"id": 5, "author_id": 3, "genre_id": 3, "title": "Murder on the Orient Express", "sales": 200}),
    ]
}

pub fn genres() -> Vec<Value> {
    vec![
        json!({"id": 1, "name": "Horror"}),
        json!({"id": 2, "name": "Fantasy"}),
        json!({"id": 3, "name": "Mystery"}),
    ]
}

pub fn states() -> Vec<Value> {
    vec![
        json!({"id": 1, "name": "Maine"}),
        json!({"id": 2, "name": "Oxfordshire"}),
    ]
}

pub fn bios() -> Vec<Value> {
    vec![
        json!({"id": 1, "author_id": 1, "picture": "king.jpg"}),
        json!({"id": 2, "author_id": 2, "picture": "tolkien.jpg"}),
    ]
}

pub fn hobbies() -> Vec<Value> {
    vec![
        json!({"id": 1, "name": "Fishing"}),
        json!({"id": 2, "name": "Woodworking"}),
        json!({"id": 3, "name": "Writing"}),
    ]
}

pub fn author_hobbies() -> Vec<Value> {
    vec![
        json!({"id": 1, "author_id": 1, "hobby_id": 1}),
        json!({"id": 2, "author_id": 1, "hobby_id": 3}),
        json!({"id": 3, "author_id": 2, "hobby_id": 3}),
        json!({"id": 4, "author_id": 2, "hobby_id": 2}),
    ]
}

pub fn houses() -> Vec<Value> {
    vec![json!({"id": 1, "name": "Bangor House"})]
}

pub fn condos() -> Vec<Value> {
    vec![json!({"id": 1, "name": "Oxford Flat"})]
}

/// Every library collection loaded into a fresh store.
pub fn library() -> MemoryStore {
    MemoryStore::new()
        .with_collection("authors", authors())
        .with_collection("books", books())
        .with_collection("genres", genres())
        .with_collection("states", states())
        .with_collection("bios", bios())
        .with_collection("hobbies", hobbies())
        .with_collection("author_hobbies", author_hobbies())
        .with_collection("houses", houses())
        .with_collection("condos", condos())
}

/// Books resource allowing `title` and `genre_id` filters.
pub fn books_resource() -> sideload_kernel::Result<Resource> {
    Resource::builder("books")
        .allow_filters(["title", "genre_id"])
        .build()
}

/// Authors resource with the filters most tests need.
pub fn authors_resource() -> sideload_kernel::Result<Resource> {
    Resource::builder("authors")
        .filter(FilterDefinition::new("id"))
        .filter(FilterDefinition::new("first_name").alias("name"))
        .filter(FilterDefinition::new("age"))
        .default_sort("id")
        .build()
}

/// The full authors sideload graph.
///
/// `books` (with nested `genre`), `bestsellers` (rendered as `top_books`,
/// index only), `bio`, `state`, `hobbies` (through `author_hobbies`) and a
/// polymorphic `residence` classified by `residence_type`.
pub fn authors_graph() -> sideload_kernel::Result<SideloadGraph> {
    let books = Arc::new(books_resource()?);

    SideloadGraph::new(
        "authors",
        vec![
            SideloadNode::has_many("books", "books", "id", "author_id")
                .scoped_by(books.clone())
                .with_child(SideloadNode::belongs_to("genre", "genres", "genre_id", "id")),
            SideloadNode::has_many("bestsellers", "books", "id", "author_id")
                .scoped_by(books)
                .with_rendered_as("top_books")
                .only(["index"]),
            SideloadNode::has_one("bio", "bios", "id", "author_id"),
            SideloadNode::belongs_to("state", "states", "state_id", "id"),
            SideloadNode::many_to_many(
                "hobbies",
                "hobbies",
                "id",
                JoinThrough::new("author_hobbies", "author_id", "hobby_id"),
            ),
            SideloadNode::polymorphic_on("residence", "residence_type")
                .group("House", SideloadNode::belongs_to("house", "houses", "residence_id", "id"))
                .group("Condo", SideloadNode::belongs_to("condo", "condos", "residence_id", "id")),
        ],
    )
}
