//! Resolver.
//!
//! Drives one request through `Idle → RootScoped → RootFetched →
//! SideloadsResolved → Done`, or straight to `ZeroResult` when the client
//! asked for a zero-size page:
//!
//! 1. Scope the root query with the `default` branch.
//! 2. Execute it.
//! 3. For every requested, declared, allowed sideload: build one batched
//!    query for the whole parent batch, scope it with the sideload's branch,
//!    execute it, resolve its own children against the fetched batch, then
//!    attach the batch to the parents.
//! 4. Return the attached root batch.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Result, SideloadError};
use crate::graph::keys::extract_field_value;
use crate::graph::{AssignFn, DataFn, NodeKind, SideloadGraph, SideloadNode};
use crate::query::{Branches, IncludeTree, InstructionSet, Query};
use crate::render::RenderOptions;
use crate::resource::{Calculation, Resource};
use crate::scope::{BackingStore, Pagination, QueryContext, ScopePipeline, ScopeQuery};

/// Resolution progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveState {
    #[default]
    Idle,
    RootScoped,
    RootFetched,
    SideloadsResolved,
    Done,
    /// Zero-size page requested; nothing was fetched.
    ZeroResult,
}

/// Stat results: attribute → calculation → value.
pub type StatResults = BTreeMap<String, BTreeMap<String, Value>>;

/// The resolved object graph for one request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolvedGraph {
    /// Root records with sideloads attached under their `rendered_as` keys.
    pub records: Vec<Value>,
    /// Every fetched sideload record, per resource type, deduplicated by primary key.
    pub included: BTreeMap<String, Vec<Value>>,
    pub stats: StatResults,
    pub render: RenderOptions,
    pub state: ResolveState,
}

impl ResolvedGraph {
    /// The first root record, for single-record responses.
    pub fn into_single(self) -> Option<Value> {
        self.records.into_iter().next()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Resolves requests for one root resource and its sideload graph.
#[derive(Clone)]
pub struct Resolver {
    resource: Arc<Resource>,
    graph: Arc<SideloadGraph>,
    store: Arc<dyn BackingStore>,
    config: Arc<Config>,
}

impl Resolver {
    /// Resolver using the process-wide default [`Config`].
    ///
    /// Fails with `InvalidConfig` if the graph is rooted at a different type.
    pub fn new(
        resource: Arc<Resource>,
        graph: Arc<SideloadGraph>,
        store: Arc<dyn BackingStore>,
    ) -> Result<Self> {
        if graph.root_type() != resource.type_name() {
            return Err(SideloadError::InvalidConfig(format!(
                "sideload graph for '{}' cannot serve resource '{}'",
                graph.root_type(),
                resource.type_name()
            )));
        }
        Ok(Self {
            resource,
            graph,
            store,
            config: Config::global(),
        })
    }

    pub fn with_config(mut self, config: Arc<Config>) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn graph(&self) -> &SideloadGraph {
        &self.graph
    }

    /// Legal branch names for the context's action.
    pub fn branches(&self, context: &QueryContext) -> Branches {
        self.graph.branches(&context.action)
    }

    /// Parse raw parameters against this resolver's branches.
    pub fn parse(&self, params: &Value, context: &QueryContext) -> Query {
        Query::parse(params, &self.branches(context))
    }

    /// Parse and resolve raw request parameters.
    pub async fn resolve_params(
        &self,
        params: &Value,
        context: &QueryContext,
    ) -> Result<ResolvedGraph> {
        let query = self.parse(params, context);
        self.resolve(&query, context).await
    }

    /// Resolve a parsed query.
    pub async fn resolve(&self, query: &Query, context: &QueryContext) -> Result<ResolvedGraph> {
        let action = context.action.as_str();
        let include = self.graph.scrub(&query.include, action);
        let render = self.render_options(query, context);

        if query.is_zero_results() {
            debug!(resource = self.resource.type_name(), "zero-size page requested; skipping resolution");
            return Ok(ResolvedGraph {
                render,
                state: ResolveState::ZeroResult,
                ..Default::default()
            });
        }

        let default = query.default_branch();
        let pipeline = ScopePipeline::new(&self.resource, self.store.as_ref(), &self.config, context);

        // Everything the request asks for is validated before the store is touched.
        pipeline.validate(default, Pagination::Always)?;
        self.check_stats(default)?;
        self.validate_branches(self.graph.nodes().iter().collect(), &include, query, context)?;

        let scoped = pipeline.apply_scoping(self.resource.base_query(), default)?;
        let stats = self.compute_stats(&scoped, default).await?;
        let scoped = pipeline.apply_ordering(scoped, default, Pagination::Always)?;
        let mut state = ResolveState::RootScoped;
        debug!(resource = self.resource.type_name(), ?state, "root scoped");

        let mut records = self
            .store
            .execute(&scoped)
            .await
            .with_context(|| format!("failed to load '{}'", self.resource.type_name()))?;
        state = ResolveState::RootFetched;
        debug!(resource = self.resource.type_name(), ?state, count = records.len(), "root fetched");

        let mut included = IncludedSet::default();
        if records.is_empty() {
            debug!(resource = self.resource.type_name(), "empty root batch; skipping sideloads");
        } else if !include.is_empty() {
            self.resolve_level(
                self.graph.nodes().iter().collect(),
                &mut records,
                &include,
                query,
                context,
                &mut included,
                0,
            )
            .await?;
        }
        state = ResolveState::SideloadsResolved;
        debug!(resource = self.resource.type_name(), ?state, "sideloads resolved");

        Ok(ResolvedGraph {
            records,
            included: included.records,
            stats,
            render,
            state: ResolveState::Done,
        })
    }

    /// Resolve `nodes` requested by `include` against `parents`.
    #[allow(clippy::too_many_arguments)]
    fn resolve_level<'a>(
        &'a self,
        nodes: Vec<&'a SideloadNode>,
        parents: &'a mut [Value],
        include: &'a IncludeTree,
        query: &'a Query,
        context: &'a QueryContext,
        included: &'a mut IncludedSet,
        depth: u8,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if depth >= self.config.max_include_depth {
                warn!(
                    depth,
                    "include depth limit ({}) reached, skipping nested sideloads",
                    self.config.max_include_depth
                );
                return Ok(());
            }

            for node in nodes {
                let Some(nested) = include.get(node.name()) else {
                    continue;
                };
                if !node.allows(&context.action) {
                    continue;
                }

                match node.kind() {
                    NodeKind::Loader { data, assign } => {
                        let load = Load {
                            node,
                            key: node.rendered_as(),
                            data,
                            assign,
                        };
                        self.resolve_loader(load, parents, nested, query, context, included, depth)
                            .await?;
                    }
                    NodeKind::Polymorphic { classifier, groups } => {
                        let mut partitions: BTreeMap<String, Vec<usize>> = BTreeMap::new();
                        for (index, parent) in parents.iter().enumerate() {
                            match classifier(parent) {
                                Some(discriminant) if groups.contains_key(&discriminant) => {
                                    partitions.entry(discriminant).or_default().push(index);
                                }
                                discriminant => {
                                    debug!(node = node.name(), ?discriminant, "no sideload group for parent");
                                }
                            }
                        }

                        for (discriminant, indices) in partitions {
                            let Some(group) = groups.get(&discriminant) else {
                                continue;
                            };
                            let NodeKind::Loader { data, assign } = group.kind() else {
                                warn!(node = node.name(), %discriminant, "nested polymorphic groups are not supported");
                                continue;
                            };

                            let mut batch: Vec<Value> = indices
                                .iter()
                                .map(|&i| std::mem::take(&mut parents[i]))
                                .collect();
                            let load = Load {
                                node: group,
                                key: node.rendered_as(),
                                data,
                                assign,
                            };
                            let result = self
                                .resolve_loader(load, &mut batch, nested, query, context, included, depth)
                                .await;
                            for (i, record) in indices.into_iter().zip(batch) {
                                parents[i] = record;
                            }
                            result?;
                        }
                    }
                }
            }

            Ok(())
        })
    }

    /// Fetch, recurse, then attach one loader node.
    #[allow(clippy::too_many_arguments)]
    async fn resolve_loader(
        &self,
        load: Load<'_>,
        parents: &mut [Value],
        include: &IncludeTree,
        query: &Query,
        context: &QueryContext,
        included: &mut IncludedSet,
        depth: u8,
    ) -> Result<()> {
        let Load {
            node,
            key,
            data,
            assign,
        } = load;
        let instructions = query.branch(key).cloned().unwrap_or_default();

        if instructions.page.size == Some(0) {
            debug!(node = node.name(), "zero-size sideload page; attaching nothing");
            assign(parents, &[], key);
            return Ok(());
        }

        let resource = node_resource(node)?;
        let pipeline = ScopePipeline::new(&resource, self.store.as_ref(), &self.config, context);
        let base = data(node.base_query(), parents, self.store.as_ref());
        let scoped = pipeline.apply_scoping(base, &instructions)?;
        let scoped = pipeline.apply_ordering(scoped, &instructions, Pagination::WhenRequested)?;

        debug!(node = node.name(), depth, parents = parents.len(), "loading sideload");
        let mut children = self
            .store
            .execute(&scoped)
            .await
            .with_context(|| format!("failed to load sideload '{}'", node.name()))?;

        if !children.is_empty() && !include.is_empty() {
            self.resolve_level(
                node.nested(),
                &mut children,
                include,
                query,
                context,
                included,
                depth + 1,
            )
            .await?;
        }

        included.record(node, &scoped, &children);
        assign(parents, &children, key);
        Ok(())
    }

    fn validate_branches(
        &self,
        nodes: Vec<&SideloadNode>,
        include: &IncludeTree,
        query: &Query,
        context: &QueryContext,
    ) -> Result<()> {
        for node in nodes {
            let Some(nested) = include.get(node.name()) else {
                continue;
            };
            let Some(instructions) = query.branch(node.rendered_as()) else {
                continue;
            };

            let targets: Vec<&SideloadNode> = match node.groups() {
                Some(groups) => groups.values().collect(),
                None => vec![node],
            };
            for target in targets {
                let resource = node_resource(target)?;
                ScopePipeline::new(&resource, self.store.as_ref(), &self.config, context)
                    .validate(instructions, Pagination::WhenRequested)?;
            }

            self.validate_branches(node.nested(), nested, query, context)?;
        }
        Ok(())
    }

    fn check_stats(&self, instructions: &InstructionSet) -> Result<()> {
        for (attribute, names) in &instructions.stats {
            for name in names {
                let known = self
                    .resource
                    .stats(attribute)
                    .is_some_and(|stats| stats.get(name).is_some());
                if !known {
                    return Err(SideloadError::StatNotFound {
                        attribute: attribute.clone(),
                        calculation: name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Stats over the whole filtered set (before sort and paginate).
    async fn compute_stats(
        &self,
        scoped: &ScopeQuery,
        instructions: &InstructionSet,
    ) -> Result<StatResults> {
        let mut results = StatResults::new();
        let mut filtered: Option<Vec<Value>> = None;

        for (attribute, names) in &instructions.stats {
            let Some(stats) = self.resource.stats(attribute) else {
                continue;
            };
            for name in names {
                let value = match stats.get(name) {
                    Some(Calculation::Builtin(aggregate)) => self
                        .store
                        .calculate(scoped, attribute, *aggregate)
                        .await
                        .with_context(|| format!("failed to calculate {name} of '{attribute}'"))?,
                    Some(Calculation::Custom(calculation)) => {
                        if filtered.is_none() {
                            filtered = Some(self.store.execute(&scoped.unpaginated()).await?);
                        }
                        calculation(filtered.as_deref().unwrap_or(&[]), attribute)
                    }
                    None => {
                        return Err(SideloadError::StatNotFound {
                            attribute: attribute.clone(),
                            calculation: name.clone(),
                        });
                    }
                };
                results
                    .entry(attribute.clone())
                    .or_default()
                    .insert(name.clone(), value);
            }
        }

        Ok(results)
    }

    fn render_options(&self, query: &Query, context: &QueryContext) -> RenderOptions {
        let mut resources: BTreeMap<&str, &Resource> = BTreeMap::new();
        resources.insert(self.resource.type_name(), &self.resource);
        collect_resources(self.graph.nodes().iter().collect(), &mut resources);

        let extra_fields = query
            .extra_fields
            .iter()
            .map(|(resource_type, requested)| {
                let permitted = match resources.get(resource_type.as_str()) {
                    Some(resource) => resource.permitted_extra_fields(requested, context),
                    None => requested.clone(),
                };
                (resource_type.clone(), permitted)
            })
            .collect();

        RenderOptions::new(
            self.graph.scrub_rendered(&query.include, &context.action),
            query.fields.clone(),
            extra_fields,
        )
    }
}

/// One loader step: the node, the key it attaches under, and its functions.
struct Load<'a> {
    node: &'a SideloadNode,
    key: &'a str,
    data: &'a DataFn,
    assign: &'a AssignFn,
}

/// The node's scoping resource, or an unconfigured one for its type.
fn node_resource(node: &SideloadNode) -> Result<Cow<'_, Resource>> {
    match node.resource() {
        Some(resource) => Ok(Cow::Borrowed(resource.as_ref())),
        None => Ok(Cow::Owned(Resource::builder(node.resource_type()).build()?)),
    }
}

fn collect_resources<'a>(nodes: Vec<&'a SideloadNode>, resources: &mut BTreeMap<&'a str, &'a Resource>) {
    for node in nodes {
        if let Some(resource) = node.resource() {
            resources.entry(resource.type_name()).or_insert(resource.as_ref());
        }
        if let Some(groups) = node.groups() {
            collect_resources(groups.values().collect(), resources);
        }
        collect_resources(node.nested(), resources);
    }
}

/// Flattened sideloaded records by resource type, one per primary key.
#[derive(Default)]
struct IncludedSet {
    records: BTreeMap<String, Vec<Value>>,
    seen: HashMap<String, HashSet<String>>,
}

impl IncludedSet {
    /// Add fetched records, skipping primary keys already present.
    fn record(&mut self, node: &SideloadNode, scoped: &ScopeQuery, children: &[Value]) {
        let entry = self.records.entry(node.resource_type().to_string()).or_default();
        let seen = self.seen.entry(node.resource_type().to_string()).or_default();
        for child in children {
            let fresh = extract_field_value(child, node.primary_key()).is_none_or(|key| seen.insert(key));
            if !fresh {
                continue;
            }

            let mut record = child.clone();
            if let (Some(join), Some(obj)) = (&scoped.join, record.as_object_mut()) {
                obj.remove(&join.table);
            }
            entry.push(record);
        }
    }
}
