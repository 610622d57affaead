//! Include directive parsing (`include=books.genre,state`).

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// A requested include tree: relation name → nested includes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct IncludeTree(BTreeMap<String, IncludeTree>);

impl IncludeTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a comma-separated list of dotted paths.
    pub fn parse(directive: &str) -> Self {
        let mut tree = Self::new();
        for path in directive.split(',') {
            let mut node = &mut tree;
            for segment in path.trim().split('.').filter(|s| !s.is_empty()) {
                node = node.0.entry(segment.to_string()).or_default();
            }
        }
        tree
    }

    /// Build from an `include` parameter: a directive string, an array of
    /// directive strings, or an already-nested object.
    pub fn from_param(param: &Value) -> Self {
        match param {
            Value::String(directive) => Self::parse(directive),
            Value::Array(items) => {
                let mut tree = Self::new();
                for item in items {
                    tree.merge(Self::from_param(item));
                }
                tree
            }
            Value::Object(map) => Self(
                map.iter()
                    .map(|(name, nested)| (name.clone(), Self::from_param(nested)))
                    .collect(),
            ),
            _ => Self::new(),
        }
    }

    pub fn merge(&mut self, other: IncludeTree) {
        for (name, nested) in other.0 {
            self.0.entry(name).or_default().merge(nested);
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, nested: IncludeTree) {
        self.0.entry(name.into()).or_default().merge(nested);
    }

    pub fn get(&self, name: &str) -> Option<&IncludeTree> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Paths present in both trees.
    pub fn intersect(&self, other: &IncludeTree) -> IncludeTree {
        Self(
            self.0
                .iter()
                .filter_map(|(name, nested)| {
                    other.get(name).map(|allowed| (name.clone(), nested.intersect(allowed)))
                })
                .collect(),
        )
    }

    /// Longest path length in the tree.
    pub fn depth(&self) -> usize {
        self.0
            .values()
            .map(|nested| 1 + nested.depth())
            .max()
            .unwrap_or(0)
    }
}
