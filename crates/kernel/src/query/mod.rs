//! Query parser.
//!
//! Converts the flat request parameter bag (`filter`, `sort`, `page`,
//! `fields`, `extra_fields`, `stats`, `include`) into one [`InstructionSet`]
//! per branch: `default` plus every legal sideload branch. Keys naming an
//! unknown branch are dropped without error; filter names are validated
//! later, during scoping.

mod include;
pub mod types;

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

pub use include::IncludeTree;
pub use types::{
    Branches, DEFAULT_BRANCH, InstructionSet, PageParams, SortDirection, SortInstruction,
};

/// Parsed query: per-branch instructions plus request-wide directives.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Query {
    /// Instructions keyed by branch name, always including `default`.
    pub branches: BTreeMap<String, InstructionSet>,
    /// Requested include tree, unscrubbed.
    pub include: IncludeTree,
    /// Sparse fieldsets keyed by resource type.
    pub fields: BTreeMap<String, BTreeSet<String>>,
    /// Requested extra fields keyed by resource type.
    pub extra_fields: BTreeMap<String, BTreeSet<String>>,
}

impl Query {
    /// Parse raw request parameters against the legal branches.
    pub fn parse(params: &Value, branches: &Branches) -> Self {
        let mut query = Self::empty(branches);
        let Some(params) = params.as_object() else {
            return query;
        };

        if let Some(filter) = params.get("filter").and_then(Value::as_object) {
            query.parse_filter(filter, branches);
        }
        if let Some(sort) = params.get("sort") {
            query.parse_sort(sort, branches);
        }
        if let Some(page) = params.get("page").and_then(Value::as_object) {
            query.parse_pagination(page, branches);
        }
        if let Some(fields) = params.get("fields").and_then(Value::as_object) {
            query.fields = parse_field_sets(fields);
            let fields = query.fields.clone();
            query.distribute(&fields, branches, |set| &mut set.fields);
        }
        if let Some(extra) = params.get("extra_fields").and_then(Value::as_object) {
            query.extra_fields = parse_field_sets(extra);
            let extra = query.extra_fields.clone();
            query.distribute(&extra, branches, |set| &mut set.extra_fields);
        }
        if let Some(stats) = params.get("stats").and_then(Value::as_object) {
            query.parse_stats(stats);
        }
        if let Some(include) = params.get("include") {
            query.include = IncludeTree::from_param(include);
        }

        query
    }

    /// Instruction sets for `default` and every legal branch, all empty.
    pub fn empty(branches: &Branches) -> Self {
        let mut map = BTreeMap::new();
        map.insert(DEFAULT_BRANCH.to_string(), InstructionSet::default());
        for name in branches.names() {
            map.insert(name.to_string(), InstructionSet::default());
        }
        Self {
            branches: map,
            ..Default::default()
        }
    }

    /// Instructions for the primary collection.
    pub fn default_branch(&self) -> &InstructionSet {
        static EMPTY: std::sync::LazyLock<InstructionSet> =
            std::sync::LazyLock::new(InstructionSet::default);
        self.branches.get(DEFAULT_BRANCH).unwrap_or(&EMPTY)
    }

    pub fn branch(&self, name: &str) -> Option<&InstructionSet> {
        self.branches.get(name)
    }

    /// Whether the client asked for a zero-size default page.
    pub fn is_zero_results(&self) -> bool {
        self.default_branch().page.size == Some(0)
    }

    pub fn fields_for(&self, resource_type: &str) -> Option<&BTreeSet<String>> {
        self.fields.get(resource_type)
    }

    pub fn extra_fields_for(&self, resource_type: &str) -> Option<&BTreeSet<String>> {
        self.extra_fields.get(resource_type)
    }

    fn default_mut(&mut self) -> &mut InstructionSet {
        self.branches.entry(DEFAULT_BRANCH.to_string()).or_default()
    }

    fn parse_filter(&mut self, filter: &Map<String, Value>, branches: &Branches) {
        for (key, value) in filter {
            match value {
                Value::Object(nested) if branches.contains(key) => {
                    let set = self.branches.entry(key.clone()).or_default();
                    for (attribute, raw) in nested {
                        set.filter.insert(attribute.clone(), raw.clone());
                    }
                }
                _ => {
                    self.default_mut().filter.insert(key.clone(), value.clone());
                }
            }
        }
    }

    fn parse_sort(&mut self, sort: &Value, branches: &Branches) {
        let tokens: Vec<&str> = match sort {
            Value::String(list) => list.split(',').collect(),
            Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };

        for token in tokens.into_iter().map(str::trim).filter(|t| !t.is_empty()) {
            let Some((branch, attribute)) = token.split_once('.') else {
                if let Some(instruction) = SortInstruction::parse(token) {
                    self.default_mut().sort.push(instruction);
                }
                continue;
            };

            // `-books.title` moves the sign onto the attribute.
            let (branch, attribute) = match branch.strip_prefix('-') {
                Some(stripped) => (stripped, format!("-{attribute}")),
                None => (branch, attribute.to_string()),
            };

            if !branches.contains(branch) {
                debug!(branch, token, "dropping sort for unknown branch");
                continue;
            }
            if let Some(instruction) = SortInstruction::parse(&attribute) {
                self.branches
                    .entry(branch.to_string())
                    .or_default()
                    .sort
                    .push(instruction);
            }
        }
    }

    fn parse_pagination(&mut self, page: &Map<String, Value>, branches: &Branches) {
        for (key, value) in page {
            match key.as_str() {
                "number" => self.default_mut().page.number = page_number(value),
                "size" => self.default_mut().page.size = page_number(value),
                branch if branches.contains(branch) => {
                    let params = value
                        .as_object()
                        .map(|nested| PageParams {
                            number: nested.get("number").and_then(page_number),
                            size: nested.get("size").and_then(page_number),
                        })
                        .unwrap_or_default();
                    self.branches.entry(branch.to_string()).or_default().page = params;
                }
                unknown => debug!(key = unknown, "dropping page instruction for unknown branch"),
            }
        }
    }

    fn parse_stats(&mut self, stats: &Map<String, Value>) {
        for (attribute, calculations) in stats {
            let names = comma_list(calculations);
            if !names.is_empty() {
                self.default_mut()
                    .stats
                    .insert(attribute.clone(), names.into_iter().collect());
            }
        }
    }

    /// Copy per-type sets into the branches they apply to: the branch named
    /// by the key, every branch serving that type, and `default` when the key
    /// is the root type.
    fn distribute(
        &mut self,
        sets: &BTreeMap<String, BTreeSet<String>>,
        branches: &Branches,
        target: impl Fn(&mut InstructionSet) -> &mut BTreeSet<String>,
    ) {
        for (key, names) in sets {
            let mut receivers: BTreeSet<String> =
                branches.serving(key).map(str::to_string).collect();
            if branches.contains(key) {
                receivers.insert(key.clone());
            }
            if key == branches.root_type() {
                receivers.insert(DEFAULT_BRANCH.to_string());
            }
            for receiver in receivers {
                target(self.branches.entry(receiver).or_default()).extend(names.iter().cloned());
            }
        }
    }
}

fn page_number(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn comma_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(list) => list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Value::Array(items) => items.iter().flat_map(comma_list).collect(),
        _ => Vec::new(),
    }
}

fn parse_field_sets(map: &Map<String, Value>) -> BTreeMap<String, BTreeSet<String>> {
    map.iter()
        .map(|(resource_type, names)| {
            (resource_type.clone(), comma_list(names).into_iter().collect())
        })
        .collect()
}
