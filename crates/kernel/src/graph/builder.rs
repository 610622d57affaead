//! Declarative constructors for sideload nodes.
//!
//! Every association shape reduces to a [`NodeKind::Loader`] with a data
//! step (one batched query for all parents) and an assign step (partition the
//! fetched children by key and attach them to their parents).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;

use super::keys::{extract_field_value, key_filter};
use super::node::{Cardinality, NodeKind, SideloadNode};
use crate::resource::Resource;
use crate::scope::{BackingStore, JoinThrough, ScopeQuery};

impl SideloadNode {
    /// The generic primitive: a named node with explicit data and assign steps.
    pub fn custom(
        name: impl Into<String>,
        resource_type: impl Into<String>,
        cardinality: Cardinality,
        data: impl Fn(ScopeQuery, &[Value], &dyn BackingStore) -> ScopeQuery + Send + Sync + 'static,
        assign: impl Fn(&mut [Value], &[Value], &str) + Send + Sync + 'static,
    ) -> Self {
        Self::with_kind(
            name,
            resource_type,
            cardinality,
            NodeKind::Loader {
                data: Arc::new(data),
                assign: Arc::new(assign),
            },
        )
    }

    /// Children whose `foreign_key` matches the parent's `parent_key`.
    pub fn has_many(
        name: impl Into<String>,
        resource_type: impl Into<String>,
        parent_key: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::keyed(name, resource_type, Cardinality::Many, parent_key, foreign_key)
    }

    /// Like [`has_many`](Self::has_many), attaching the first match or null.
    pub fn has_one(
        name: impl Into<String>,
        resource_type: impl Into<String>,
        parent_key: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::keyed(name, resource_type, Cardinality::One, parent_key, foreign_key)
    }

    /// The record whose `primary_key` matches the parent's `foreign_key`.
    pub fn belongs_to(
        name: impl Into<String>,
        resource_type: impl Into<String>,
        foreign_key: impl Into<String>,
        primary_key: impl Into<String>,
    ) -> Self {
        let primary_key = primary_key.into();
        Self::keyed(name, resource_type, Cardinality::One, foreign_key, primary_key.clone())
            .with_primary_key(primary_key)
    }

    /// Records joined to the parent's `parent_key` through an association table.
    ///
    /// The store attaches the matched join rows to each fetched record under
    /// `join.table`; a record shared by several parents is attached to each
    /// of them.
    pub fn many_to_many(
        name: impl Into<String>,
        resource_type: impl Into<String>,
        parent_key: impl Into<String>,
        join: JoinThrough,
    ) -> Self {
        let parent_key = parent_key.into();
        let primary_key = join.primary_key.clone();
        let data_join = join.clone();
        let data_parent_key = parent_key.clone();

        let data = move |base: ScopeQuery, parents: &[Value], store: &dyn BackingStore| {
            let values = key_filter(parents, &data_parent_key).items().into_iter().cloned().collect();
            store.join_through(base, data_join.clone().matching(values))
        };

        let assign = move |parents: &mut [Value], children: &[Value], key: &str| {
            for parent in parents.iter_mut() {
                let parent_value = extract_field_value(parent, &parent_key);
                let matching: Vec<Value> = children
                    .iter()
                    .filter(|child| {
                        parent_value.is_some() && joined_to(child, &join, parent_value.as_deref())
                    })
                    .map(|child| without_key(child, &join.table))
                    .collect();
                attach(parent, key, Value::Array(matching));
            }
        };

        Self::custom(name, resource_type, Cardinality::Many, data, assign).with_primary_key(primary_key)
    }

    /// Polymorphic relation: `classifier` picks each parent's group.
    pub fn polymorphic(
        name: impl Into<String>,
        classifier: impl Fn(&Value) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        let name = name.into();
        Self::with_kind(
            name.clone(),
            name,
            Cardinality::One,
            NodeKind::Polymorphic {
                classifier: Arc::new(classifier),
                groups: BTreeMap::new(),
            },
        )
    }

    /// Polymorphic relation classified by a type-tag field on the parent.
    pub fn polymorphic_on(name: impl Into<String>, discriminant_field: impl Into<String>) -> Self {
        let field = discriminant_field.into();
        Self::polymorphic(name, move |parent| extract_field_value(parent, &field))
    }

    /// Register the node resolving parents whose discriminant is `discriminant`.
    ///
    /// No effect on non-polymorphic nodes.
    pub fn group(mut self, discriminant: impl Into<String>, node: SideloadNode) -> Self {
        if let NodeKind::Polymorphic { groups, .. } = &mut self.kind {
            groups.insert(discriminant.into(), node);
        }
        self
    }

    pub fn with_rendered_as(mut self, key: impl Into<String>) -> Self {
        self.rendered_as = key.into();
        self
    }

    /// Attach a single-record relation as a list: `[record]`, or `[]` when
    /// nothing matched. No effect on list or polymorphic nodes.
    pub fn as_array(mut self) -> Self {
        if self.cardinality == Cardinality::Many {
            return self;
        }
        if let NodeKind::Loader { assign, .. } = &mut self.kind {
            let single = assign.clone();
            *assign = Arc::new(move |parents: &mut [Value], children: &[Value], key: &str| {
                single(parents, children, key);
                for parent in parents.iter_mut() {
                    if let Some(value) = parent.get_mut(key) {
                        *value = match value.take() {
                            Value::Null => Value::Array(Vec::new()),
                            record => Value::Array(vec![record]),
                        };
                    }
                }
            });
            self.cardinality = Cardinality::Many;
        }
        self
    }

    /// Restrict the node to the given actions.
    pub fn only<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_actions = Some(actions.into_iter().map(Into::into).collect::<BTreeSet<_>>());
        self
    }

    pub fn with_primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key = key.into();
        self
    }

    /// Scope this node's branch with `resource` (filters, sort, paging).
    pub fn scoped_by(mut self, resource: Arc<Resource>) -> Self {
        self.resource_type = resource.type_name().to_string();
        self.resource = Some(resource);
        self
    }

    pub fn with_child(mut self, node: SideloadNode) -> Self {
        self.children.push(node);
        self
    }

    fn with_kind(
        name: impl Into<String>,
        resource_type: impl Into<String>,
        cardinality: Cardinality,
        kind: NodeKind,
    ) -> Self {
        let name = name.into();
        Self {
            rendered_as: name.clone(),
            name,
            resource_type: resource_type.into(),
            primary_key: "id".to_string(),
            allowed_actions: None,
            cardinality,
            kind,
            children: Vec::new(),
            resource: None,
        }
    }

    /// Direct key match: `child[child_key] == parent[parent_key]`.
    fn keyed(
        name: impl Into<String>,
        resource_type: impl Into<String>,
        cardinality: Cardinality,
        parent_key: impl Into<String>,
        child_key: impl Into<String>,
    ) -> Self {
        let parent_key = parent_key.into();
        let child_key = child_key.into();
        let data_parent_key = parent_key.clone();
        let data_child_key = child_key.clone();

        let data = move |base: ScopeQuery, parents: &[Value], store: &dyn BackingStore| {
            store.filter_equals(base, &data_child_key, &key_filter(parents, &data_parent_key))
        };

        let assign = move |parents: &mut [Value], children: &[Value], key: &str| {
            for parent in parents.iter_mut() {
                let parent_value = extract_field_value(parent, &parent_key);
                let mut matching = children.iter().filter(|child| {
                    parent_value.is_some() && extract_field_value(child, &child_key) == parent_value
                });
                let value = match cardinality {
                    Cardinality::One => matching.next().cloned().unwrap_or(Value::Null),
                    Cardinality::Many => Value::Array(matching.cloned().collect()),
                };
                attach(parent, key, value);
            }
        };

        Self::custom(name, resource_type, cardinality, data, assign)
    }
}

/// Whether any join row on `child` references `parent_value`.
fn joined_to(child: &Value, join: &JoinThrough, parent_value: Option<&str>) -> bool {
    child
        .get(&join.table)
        .and_then(Value::as_array)
        .is_some_and(|rows| {
            rows.iter()
                .any(|row| extract_field_value(row, &join.parent_key).as_deref() == parent_value)
        })
}

fn without_key(record: &Value, key: &str) -> Value {
    let mut record = record.clone();
    if let Some(obj) = record.as_object_mut() {
        obj.remove(key);
    }
    record
}

fn attach(parent: &mut Value, key: &str, value: Value) {
    if let Some(obj) = parent.as_object_mut() {
        obj.insert(key.to_string(), value);
    }
}
