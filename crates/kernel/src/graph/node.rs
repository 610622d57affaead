//! Sideload node types.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::resource::Resource;
use crate::scope::{BackingStore, ScopeQuery};

/// Builds the child query for a parent batch, starting from the node's base query.
pub type DataFn = Arc<dyn Fn(ScopeQuery, &[Value], &dyn BackingStore) -> ScopeQuery + Send + Sync>;

/// Attaches fetched children to their parents under the given key.
pub type AssignFn = Arc<dyn Fn(&mut [Value], &[Value], &str) + Send + Sync>;

/// Maps a parent record to its polymorphic discriminant.
pub type Classifier = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;

/// Whether a relation attaches one record or a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// How a node loads its records.
#[derive(Clone)]
pub enum NodeKind {
    /// One batched fetch for the whole parent batch.
    Loader { data: DataFn, assign: AssignFn },
    /// Parents are partitioned by discriminant; each group resolves its own node.
    Polymorphic {
        classifier: Classifier,
        groups: BTreeMap<String, SideloadNode>,
    },
}

/// A named edge in the sideload graph.
#[derive(Clone)]
pub struct SideloadNode {
    pub(crate) name: String,
    pub(crate) rendered_as: String,
    pub(crate) resource_type: String,
    pub(crate) primary_key: String,
    pub(crate) allowed_actions: Option<BTreeSet<String>>,
    pub(crate) cardinality: Cardinality,
    pub(crate) kind: NodeKind,
    pub(crate) children: Vec<SideloadNode>,
    pub(crate) resource: Option<Arc<Resource>>,
}

impl SideloadNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key the results attach under, and the branch its instructions come from.
    pub fn rendered_as(&self) -> &str {
        &self.rendered_as
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn children(&self) -> &[SideloadNode] {
        &self.children
    }

    pub fn child(&self, name: &str) -> Option<&SideloadNode> {
        self.children.iter().find(|child| child.name == name)
    }

    /// Scoping configuration for this node's branch, if any.
    pub fn resource(&self) -> Option<&Arc<Resource>> {
        self.resource.as_ref()
    }

    pub fn allowed_actions(&self) -> Option<&BTreeSet<String>> {
        self.allowed_actions.as_ref()
    }

    /// Whether the node exists for `action`.
    pub fn allows(&self, action: &str) -> bool {
        self.allowed_actions
            .as_ref()
            .is_none_or(|actions| actions.contains(action))
    }

    /// Polymorphic groups, if this node has them.
    pub fn groups(&self) -> Option<&BTreeMap<String, SideloadNode>> {
        match &self.kind {
            NodeKind::Polymorphic { groups, .. } => Some(groups),
            NodeKind::Loader { .. } => None,
        }
    }

    /// Unscoped query for this node's records.
    pub fn base_query(&self) -> ScopeQuery {
        match &self.resource {
            Some(resource) => resource.base_query(),
            None => ScopeQuery::new(&self.resource_type),
        }
    }

    /// Children reachable below this node: its own plus every group's.
    pub fn nested(&self) -> Vec<&SideloadNode> {
        let mut nested: Vec<&SideloadNode> = self.children.iter().collect();
        if let Some(groups) = self.groups() {
            for group in groups.values() {
                for child in &group.children {
                    if !nested.iter().any(|n| n.name == child.name) {
                        nested.push(child);
                    }
                }
            }
        }
        nested
    }
}

impl fmt::Debug for SideloadNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("SideloadNode");
        s.field("name", &self.name)
            .field("rendered_as", &self.rendered_as)
            .field("resource_type", &self.resource_type)
            .field("cardinality", &self.cardinality)
            .field("allowed_actions", &self.allowed_actions);
        if let Some(groups) = self.groups() {
            s.field("groups", groups);
        }
        s.field("children", &self.children).finish()
    }
}
