//! Serializer-facing output: render options and the serializer registry.
//!
//! Wire formatting is left to the registered [`RecordSerializer`]s; this
//! module only carries what they need (the include tree, sparse fieldsets,
//! extra fields) and fails fast when a resource type has no serializer.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Result, SideloadError};
use crate::graph::SideloadGraph;
use crate::query::IncludeTree;

/// What the serializer should render.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RenderOptions {
    /// Scrubbed include tree keyed by `rendered_as`.
    pub include: IncludeTree,
    /// Sparse fieldsets per resource type, requested extra fields merged in.
    pub fields: BTreeMap<String, BTreeSet<String>>,
    /// Requested (and permitted) extra fields per resource type.
    pub extra_fields: BTreeMap<String, BTreeSet<String>>,
}

impl RenderOptions {
    pub fn new(
        include: IncludeTree,
        fields: BTreeMap<String, BTreeSet<String>>,
        extra_fields: BTreeMap<String, BTreeSet<String>>,
    ) -> Self {
        let mut fields = fields;
        for (resource_type, extras) in &extra_fields {
            if let Some(set) = fields.get_mut(resource_type) {
                set.extend(extras.iter().cloned());
            }
        }
        Self {
            include,
            fields,
            extra_fields,
        }
    }

    pub fn fields_for(&self, resource_type: &str) -> Option<&BTreeSet<String>> {
        self.fields.get(resource_type)
    }

    pub fn extra_fields_for(&self, resource_type: &str) -> Option<&BTreeSet<String>> {
        self.extra_fields.get(resource_type)
    }

    /// Whether a plain attribute passes the sparse fieldset for its type.
    pub fn includes_field(&self, resource_type: &str, attribute: &str) -> bool {
        self.fields_for(resource_type)
            .is_none_or(|set| set.contains(attribute))
    }

    /// Whether an extra field was requested for its type.
    pub fn includes_extra_field(&self, resource_type: &str, attribute: &str) -> bool {
        self.extra_fields_for(resource_type)
            .is_some_and(|set| set.contains(attribute))
    }
}

/// Renders records of one resource type.
pub trait RecordSerializer: Send + Sync {
    fn resource_type(&self) -> &str;

    fn serialize(&self, record: &Value, options: &RenderOptions) -> Value;
}

/// Attribute filtering serializer.
///
/// Drops attributes outside the type's sparse fieldset, and extra fields
/// nobody asked for. Relationship keys are kept as attached.
#[derive(Debug, Clone)]
pub struct AttributeSerializer {
    resource_type: String,
    extra_fields: BTreeSet<String>,
    relationships: BTreeSet<String>,
}

impl AttributeSerializer {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            extra_fields: BTreeSet::new(),
            relationships: BTreeSet::new(),
        }
    }

    pub fn extra_field(mut self, name: impl Into<String>) -> Self {
        self.extra_fields.insert(name.into());
        self
    }

    pub fn relationship(mut self, key: impl Into<String>) -> Self {
        self.relationships.insert(key.into());
        self
    }
}

impl RecordSerializer for AttributeSerializer {
    fn resource_type(&self) -> &str {
        &self.resource_type
    }

    fn serialize(&self, record: &Value, options: &RenderOptions) -> Value {
        let Some(attributes) = record.as_object() else {
            return record.clone();
        };

        let rendered: Map<String, Value> = attributes
            .iter()
            .filter(|(key, _)| {
                if self.relationships.contains(key.as_str()) {
                    return true;
                }
                if self.extra_fields.contains(key.as_str()) {
                    return options.includes_extra_field(&self.resource_type, key);
                }
                options.includes_field(&self.resource_type, key)
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Value::Object(rendered)
    }
}

/// Resource type → serializer, populated at configuration time.
#[derive(Clone, Default)]
pub struct SerializerRegistry {
    serializers: BTreeMap<String, Arc<dyn RecordSerializer>>,
}

impl SerializerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, serializer: impl RecordSerializer + 'static) -> Self {
        self.serializers
            .insert(serializer.resource_type().to_string(), Arc::new(serializer));
        self
    }

    pub fn get(&self, resource_type: &str) -> Option<&Arc<dyn RecordSerializer>> {
        self.serializers.get(resource_type)
    }

    /// Fail unless every type reachable in `graph` has a serializer.
    pub fn validate(&self, graph: &SideloadGraph) -> Result<()> {
        match graph
            .resource_types()
            .into_iter()
            .find(|t| !self.serializers.contains_key(t))
        {
            Some(resource_type) => Err(SideloadError::MissingSerializer { resource_type }),
            None => Ok(()),
        }
    }

    pub fn serialize(
        &self,
        resource_type: &str,
        record: &Value,
        options: &RenderOptions,
    ) -> Result<Value> {
        let serializer = self
            .get(resource_type)
            .ok_or_else(|| SideloadError::MissingSerializer {
                resource_type: resource_type.to_string(),
            })?;
        Ok(serializer.serialize(record, options))
    }
}
