//! Sideload graph.
//!
//! A tree of [`SideloadNode`]s declared once at configuration time. The
//! graph is immutable after [`SideloadGraph::new`] validates it and can be
//! shared across requests behind an `Arc`.

mod builder;
pub mod keys;
mod node;

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::error::{Result, SideloadError};
use crate::query::{Branches, IncludeTree};

pub use node::{AssignFn, Cardinality, Classifier, DataFn, NodeKind, SideloadNode};

/// The sideloads available from one root resource type.
#[derive(Debug, Clone)]
pub struct SideloadGraph {
    root_type: String,
    nodes: Vec<SideloadNode>,
    whitelists: BTreeMap<String, IncludeTree>,
}

impl SideloadGraph {
    /// Validate and assemble a graph.
    ///
    /// Fails with `InvalidConfig` when sibling names repeat or a polymorphic
    /// node has no groups.
    pub fn new(root_type: impl Into<String>, nodes: Vec<SideloadNode>) -> Result<Self> {
        let root_type = root_type.into();
        validate_siblings(&root_type, &nodes)?;
        Ok(Self {
            root_type,
            nodes,
            whitelists: BTreeMap::new(),
        })
    }

    /// A graph with no sideloads.
    pub fn empty(root_type: impl Into<String>) -> Self {
        Self {
            root_type: root_type.into(),
            nodes: Vec::new(),
            whitelists: BTreeMap::new(),
        }
    }

    /// Cap the includes `action` may load to the paths in `whitelist`,
    /// keyed by node name. Actions without a whitelist are unrestricted.
    pub fn with_whitelist(mut self, action: impl Into<String>, whitelist: IncludeTree) -> Self {
        self.whitelists.insert(action.into(), whitelist);
        self
    }

    pub fn whitelist(&self, action: &str) -> Option<&IncludeTree> {
        self.whitelists.get(action)
    }

    pub fn root_type(&self) -> &str {
        &self.root_type
    }

    /// Top-level nodes in declaration order.
    pub fn nodes(&self) -> &[SideloadNode] {
        &self.nodes
    }

    pub fn node(&self, name: &str) -> Option<&SideloadNode> {
        self.nodes.iter().find(|node| node.name() == name)
    }

    /// Legal branch names for `action`: the `rendered_as` key of every
    /// allowed node at any depth, with the resource types it serves.
    pub fn branches(&self, action: &str) -> Branches {
        let mut branches = Branches::new(&self.root_type);
        collect_branches(&self.nodes.iter().collect::<Vec<_>>(), action, &mut branches);
        branches
    }

    /// Keep only declared, allowed, whitelisted names, keyed by node name.
    pub fn scrub(&self, include: &IncludeTree, action: &str) -> IncludeTree {
        let include = self.whitelisted(include, action);
        scrub_level(&self.nodes.iter().collect::<Vec<_>>(), &include, action, false)
    }

    /// Like [`scrub`](Self::scrub), keyed by `rendered_as` for the serializer.
    pub fn scrub_rendered(&self, include: &IncludeTree, action: &str) -> IncludeTree {
        let include = self.whitelisted(include, action);
        scrub_level(&self.nodes.iter().collect::<Vec<_>>(), &include, action, true)
    }

    fn whitelisted(&self, include: &IncludeTree, action: &str) -> IncludeTree {
        match self.whitelists.get(action) {
            Some(whitelist) => {
                let allowed = include.intersect(whitelist);
                if allowed != *include {
                    tracing::debug!(action, "include trimmed to action whitelist");
                }
                allowed
            }
            None => include.clone(),
        }
    }

    /// Every resource type reachable from the root, root included.
    pub fn resource_types(&self) -> BTreeSet<String> {
        let mut types = BTreeSet::from([self.root_type.clone()]);
        collect_types(&self.nodes, &mut types);
        types
    }
}

fn validate_siblings(parent: &str, nodes: &[SideloadNode]) -> Result<()> {
    let mut seen = HashSet::new();
    for node in nodes {
        if !seen.insert(node.name()) {
            return Err(SideloadError::InvalidConfig(format!(
                "sideload '{}' declared twice under '{parent}'",
                node.name()
            )));
        }
        if let Some(groups) = node.groups() {
            if groups.is_empty() {
                return Err(SideloadError::InvalidConfig(format!(
                    "polymorphic sideload '{}' has no groups",
                    node.name()
                )));
            }
            for group in groups.values() {
                validate_siblings(group.name(), group.children())?;
            }
        }
        validate_siblings(node.name(), node.children())?;
    }
    Ok(())
}

fn collect_branches(nodes: &[&SideloadNode], action: &str, branches: &mut Branches) {
    for node in nodes.iter().filter(|node| node.allows(action)) {
        match node.groups() {
            Some(groups) => {
                for group in groups.values() {
                    branches.insert(node.rendered_as(), group.resource_type());
                }
            }
            None => branches.insert(node.rendered_as(), node.resource_type()),
        }
        collect_branches(&node.nested(), action, branches);
    }
}

fn collect_types(nodes: &[SideloadNode], types: &mut BTreeSet<String>) {
    for node in nodes {
        match node.groups() {
            Some(groups) => {
                for group in groups.values() {
                    types.insert(group.resource_type().to_string());
                    collect_types(group.children(), types);
                }
            }
            None => {
                types.insert(node.resource_type().to_string());
            }
        }
        collect_types(node.children(), types);
    }
}

fn scrub_level(
    nodes: &[&SideloadNode],
    include: &IncludeTree,
    action: &str,
    rendered: bool,
) -> IncludeTree {
    let mut scrubbed = IncludeTree::new();
    for name in include.names() {
        let Some(node) = nodes.iter().find(|node| node.name() == name) else {
            tracing::debug!(include = name, "dropping unknown include");
            continue;
        };
        if !node.allows(action) {
            tracing::debug!(include = name, action, "dropping include not allowed for action");
            continue;
        }
        let nested = include
            .get(name)
            .map(|sub| scrub_level(&node.nested(), sub, action, rendered))
            .unwrap_or_default();
        let key = if rendered { node.rendered_as() } else { node.name() };
        scrubbed.insert(key, nested);
    }
    scrubbed
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn graph() -> SideloadGraph {
        SideloadGraph::new(
            "authors",
            vec![
                SideloadNode::has_many("books", "books", "id", "author_id")
                    .with_child(SideloadNode::belongs_to("genre", "genres", "genre_id", "id")),
                SideloadNode::has_many("bestsellers", "books", "id", "author_id")
                    .with_rendered_as("top_books")
                    .only(["index"]),
                SideloadNode::belongs_to("state", "states", "state_id", "id"),
                SideloadNode::polymorphic_on("residence", "residence_type")
                    .group("House", SideloadNode::belongs_to("house", "houses", "residence_id", "id"))
                    .group("Condo", SideloadNode::belongs_to("condo", "condos", "residence_id", "id")),
            ],
        )
        .unwrap()
    }

    #[test]
    fn duplicate_siblings_are_rejected() {
        let result = SideloadGraph::new(
            "authors",
            vec![
                SideloadNode::has_many("books", "books", "id", "author_id"),
                SideloadNode::has_many("books", "books", "id", "editor_id"),
            ],
        );
        assert!(matches!(result, Err(SideloadError::InvalidConfig(_))));

        let nested = SideloadGraph::new(
            "authors",
            vec![
                SideloadNode::has_many("books", "books", "id", "author_id")
                    .with_child(SideloadNode::belongs_to("genre", "genres", "genre_id", "id"))
                    .with_child(SideloadNode::belongs_to("genre", "genres", "sub_genre_id", "id")),
            ],
        );
        assert!(nested.is_err());
    }

    #[test]
    fn empty_polymorphic_is_rejected() {
        let result =
            SideloadGraph::new("authors", vec![SideloadNode::polymorphic_on("residence", "type")]);
        assert!(matches!(result, Err(SideloadError::InvalidConfig(_))));
    }

    #[test]
    fn branches_respect_actions() {
        let graph = graph();
        let index = graph.branches("index");
        assert!(index.contains("books"));
        assert!(index.contains("genre"));
        assert!(index.contains("top_books"));
        assert!(index.contains("residence"));
        assert!(!index.contains("bestsellers"));
        assert_eq!(index.serving("houses").collect::<Vec<_>>(), vec!["residence"]);

        let show = graph.branches("show");
        assert!(!show.contains("top_books"));
    }

    #[test]
    fn scrub_drops_unknown_and_disallowed() {
        let graph = graph();
        let include = IncludeTree::parse("books.genre,books.unknown,bestsellers,widgets");

        let index = graph.scrub(&include, "index");
        assert_eq!(index, IncludeTree::parse("books.genre,bestsellers"));
        assert_eq!(
            graph.scrub_rendered(&include, "index"),
            IncludeTree::parse("books.genre,top_books")
        );
        assert_eq!(graph.scrub(&include, "show"), IncludeTree::parse("books.genre"));
    }

    #[test]
    fn resource_types_cover_groups() {
        let types = graph().resource_types();
        for expected in ["authors", "books", "genres", "states", "houses", "condos"] {
            assert!(types.contains(expected), "missing {expected}");
        }
        assert!(!types.contains("residence"));
    }

    #[test]
    fn action_whitelist_caps_include_depth() {
        let graph = graph()
            .with_whitelist("index", IncludeTree::parse("books,bestsellers"))
            .with_whitelist("show", IncludeTree::parse("books.genre"));
        let include = IncludeTree::parse("books.genre,bestsellers,state");

        assert_eq!(graph.scrub(&include, "index"), IncludeTree::parse("books,bestsellers"));
        assert_eq!(
            graph.scrub_rendered(&include, "index"),
            IncludeTree::parse("books,top_books")
        );
        assert_eq!(graph.scrub(&include, "show"), IncludeTree::parse("books.genre"));
        // No whitelist for the action: only declaration and `only` apply.
        assert_eq!(
            graph.scrub(&include, "update"),
            IncludeTree::parse("books.genre,state")
        );
    }
}
