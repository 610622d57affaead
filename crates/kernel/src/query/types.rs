//! Parsed per-branch query instructions.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Branch holding the primary collection's instructions.
pub const DEFAULT_BRANCH: &str = "default";

/// Sort direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl std::fmt::Display for SortDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SortDirection::Asc => f.write_str("asc"),
            SortDirection::Desc => f.write_str("desc"),
        }
    }
}

/// One sort key; the first instruction in a list is the outermost sort.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SortInstruction {
    pub attribute: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortInstruction {
    pub fn asc(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            direction: SortDirection::Desc,
        }
    }

    /// Parse `name` (ascending) or `-name` (descending). Blank tokens yield `None`.
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        let (attribute, direction) = match token.strip_prefix('-') {
            Some(rest) => (rest, SortDirection::Desc),
            None => (token, SortDirection::Asc),
        };
        if attribute.is_empty() {
            return None;
        }
        Some(Self {
            attribute: attribute.to_string(),
            direction,
        })
    }

    /// Parse a comma-separated sort list, preserving priority order.
    pub fn parse_list(list: &str) -> Vec<Self> {
        list.split(',').filter_map(Self::parse).collect()
    }
}

/// Requested page; unset members fall back to resource/config defaults.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageParams {
    /// 1-based page number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl PageParams {
    pub fn new(number: u64, size: u64) -> Self {
        Self {
            number: Some(number),
            size: Some(size),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.number.is_none() && self.size.is_none()
    }
}

/// Directives for one branch (`default` or a sideload).
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct InstructionSet {
    /// Raw filter values keyed by requested name or alias; normalized during scoping.
    pub filter: BTreeMap<String, Value>,
    pub sort: Vec<SortInstruction>,
    pub page: PageParams,
    /// Sparse fieldset for this branch's resource type.
    pub fields: BTreeSet<String>,
    /// Opt-in extra fields for this branch's resource type.
    pub extra_fields: BTreeSet<String>,
    /// Requested stats: attribute → calculation names.
    pub stats: BTreeMap<String, Vec<String>>,
}

/// Legal branch names for one request, with the resource types behind them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Branches {
    root_type: String,
    branches: BTreeMap<String, BTreeSet<String>>,
}

impl Branches {
    pub fn new(root_type: impl Into<String>) -> Self {
        Self {
            root_type: root_type.into(),
            branches: BTreeMap::new(),
        }
    }

    /// Register a branch name served by `resource_type`.
    pub fn with_branch(mut self, name: impl Into<String>, resource_type: impl Into<String>) -> Self {
        self.insert(name, resource_type);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, resource_type: impl Into<String>) {
        self.branches
            .entry(name.into())
            .or_default()
            .insert(resource_type.into());
    }

    pub fn root_type(&self) -> &str {
        &self.root_type
    }

    pub fn contains(&self, name: &str) -> bool {
        name != DEFAULT_BRANCH && self.branches.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.branches.keys().map(String::as_str)
    }

    /// Branch names whose resource type is `resource_type`.
    pub fn serving(&self, resource_type: &str) -> impl Iterator<Item = &str> {
        self.branches
            .iter()
            .filter(move |(_, types)| types.contains(resource_type))
            .map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_token_parsing() {
        assert_eq!(SortInstruction::parse("name"), Some(SortInstruction::asc("name")));
        assert_eq!(SortInstruction::parse("-id"), Some(SortInstruction::desc("id")));
        assert_eq!(SortInstruction::parse(" -id "), Some(SortInstruction::desc("id")));
        assert_eq!(SortInstruction::parse("-"), None);
        assert_eq!(SortInstruction::parse(""), None);
    }

    #[test]
    fn sort_list_keeps_priority_order() {
        assert_eq!(
            SortInstruction::parse_list("name,,-id"),
            vec![SortInstruction::asc("name"), SortInstruction::desc("id")]
        );
    }

    #[test]
    fn branches_lookup() {
        let branches = Branches::new("authors")
            .with_branch("books", "books")
            .with_branch("bestsellers", "books")
            .with_branch("genre", "genres");

        assert!(branches.contains("books"));
        assert!(!branches.contains("default"));
        assert!(!branches.contains("unknown"));
        assert_eq!(
            branches.serving("books").collect::<Vec<_>>(),
            vec!["bestsellers", "books"]
        );
    }
}
