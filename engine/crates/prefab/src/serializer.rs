use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Instant;

use object_model::{FieldFilter, Guid, NodeId, ObjectModel, ObjectModelError, PropertyCodec};
use observability::SaveMetrics;

use crate::collector::{ChildSorter, CollectedActor, CollectedGraph, CollectedKind, Collector};
use crate::config::SaveOptions;
use crate::container::{self, ContainerHeader};
use crate::context::SaveContext;
use crate::error::PrefabError;
use crate::identity::IdentityMap;
use crate::records::{
    ActorRecordBody, ActorSaveRecord, DefaultSubobjectRecord, ObjectSaveRecord,
    OverrideParameterRecord, PrefabSaveData, ReferenceTables,
};
use crate::sub_prefab::{SubPrefabData, SubPrefabMap};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveStats {
    pub actors: usize,
    pub sub_prefabs: usize,
    pub objects: usize,
    pub overrides: usize,
    pub bytes: usize,
}

/// Result of a save: the container and the identity map it was written with.
#[derive(Debug, Clone)]
pub struct SavedPrefab {
    pub bytes: Vec<u8>,
    /// Superset of the identity map passed in, restricted to live nodes.
    pub identity: IdentityMap,
    pub stats: SaveStats,
}

/// GUID lookups limited to the nodes this save writes out.
struct EmitScope<'a> {
    identity: &'a IdentityMap,
    session: &'a HashSet<NodeId>,
    dropped: &'a BTreeSet<NodeId>,
}

impl EmitScope<'_> {
    fn emits(&self, node: NodeId) -> bool {
        self.session.contains(&node) && !self.dropped.contains(&node)
    }

    /// References leaving the written set are null even when a seeded entry
    /// knows the target.
    fn guid_of(&self, node: NodeId) -> Option<Guid> {
        if self.emits(node) {
            self.identity.guid_of(node)
        } else {
            None
        }
    }

    fn require(&self, node: NodeId) -> Result<Guid, PrefabError> {
        if !self.emits(node) {
            return Err(PrefabError::UnmappedNode(node));
        }
        self.identity.require(node)
    }
}

/// Output of one emission pass.
#[derive(Default)]
struct Emission {
    tables: ReferenceTables,
    stats: SaveStats,
    /// Non-root nodes whose properties failed to encode.
    failed: BTreeSet<NodeId>,
}

pub struct Serializer<'a, M: ?Sized, C> {
    model: &'a M,
    codec: &'a C,
    options: &'a SaveOptions,
    sorter: Option<&'a dyn ChildSorter>,
}

impl<'a, M, C> Serializer<'a, M, C>
where
    M: ObjectModel + ?Sized,
    C: PropertyCodec<M>,
{
    pub fn new(model: &'a M, codec: &'a C, options: &'a SaveOptions) -> Self {
        Self {
            model,
            codec,
            options,
            sorter: None,
        }
    }

    pub fn with_sorter(mut self, sorter: &'a dyn ChildSorter) -> Self {
        self.sorter = Some(sorter);
        self
    }

    pub fn save(
        &self,
        root: NodeId,
        identity: &IdentityMap,
        sub_prefabs: &SubPrefabMap,
    ) -> Result<SavedPrefab, PrefabError> {
        let started = Instant::now();
        let mut identity = IdentityMap::seeded_from(identity, self.model);

        let mut collector = Collector::new(self.model, sub_prefabs, self.options.mode);
        if let Some(sorter) = self.sorter {
            collector = collector.with_sorter(sorter);
        }
        let graph = collector.collect(root, &mut identity)?;

        // A node that fails to encode is left out together with everything
        // hanging off it, and the pass reruns so no record or reference
        // points at it. Each rerun drops at least one more node.
        let mut dropped = BTreeSet::new();
        let (data, stats) = loop {
            let scope = EmitScope {
                identity: &identity,
                session: &graph.session,
                dropped: &dropped,
            };
            let mut emission = Emission::default();
            let data = self.emit(&graph, &scope, sub_prefabs, &mut emission)?;
            if emission.failed.is_empty() {
                break (data, emission.stats);
            }
            let hanging = self.hanging_off(&graph, &emission.failed);
            tracing::warn!(
                root = %root,
                failed = emission.failed.len(),
                dropped = hanging.len(),
                "leaving out nodes that failed to encode"
            );
            dropped.extend(hanging);
        };

        if data.root.children.is_empty() && data.objects.is_empty() {
            tracing::warn!(root = %root, "prefab saved with no content beyond its root actor");
        }

        let header = ContainerHeader::current(self.options.host, self.options.mode);
        let bytes = container::write_container(&header, &data)?;
        let stats = SaveStats {
            bytes: bytes.len(),
            ..stats
        };

        SaveMetrics {
            root: self.model.label(root).unwrap_or_default(),
            duration_us: started.elapsed().as_micros(),
            actors: stats.actors,
            sub_prefabs: stats.sub_prefabs,
            objects: stats.objects,
            overrides: stats.overrides,
            bytes: stats.bytes,
            budget_us: u128::from(self.options.slow_save_warn_ms) * 1000,
        }
        .log();

        Ok(SavedPrefab {
            bytes,
            identity,
            stats,
        })
    }

    fn emit(
        &self,
        graph: &CollectedGraph,
        scope: &EmitScope<'_>,
        sub_prefabs: &SubPrefabMap,
        out: &mut Emission,
    ) -> Result<PrefabSaveData, PrefabError> {
        let root = self
            .emit_actor(&graph.root, scope, sub_prefabs, out, true)?
            .ok_or(PrefabError::UnmappedNode(graph.root.node))?;

        let mut objects = Vec::with_capacity(graph.objects.len());
        for &node in graph.objects.iter().filter(|&&n| scope.emits(n)) {
            match self.emit_object(node, scope, &mut out.tables) {
                Ok(record) => objects.push(record),
                Err(e) => {
                    tracing::warn!(node = %node, error = %e, "object failed to encode");
                    out.failed.insert(node);
                }
            }
        }
        out.stats.objects = objects.len();

        let mut scene_parents = BTreeMap::new();
        for actor in graph.actors() {
            if actor.kind != CollectedKind::SubPrefab || !scope.emits(actor.node) {
                continue;
            }
            let Some(component) = self.model.root_component(actor.node) else {
                continue;
            };
            let parent = self.model.scene_parent(component).and_then(|p| scope.guid_of(p));
            if let (Some(child), Some(parent)) = (scope.guid_of(component), parent) {
                scene_parents.insert(child, parent);
            }
        }

        Ok(PrefabSaveData {
            root,
            objects,
            scene_parents,
            tables: std::mem::take(&mut out.tables),
        })
    }

    /// Collected nodes that are, or hang off, one of `failed`: attached
    /// actors, their components and inner objects.
    fn hanging_off(&self, graph: &CollectedGraph, failed: &BTreeSet<NodeId>) -> BTreeSet<NodeId> {
        graph
            .session
            .iter()
            .copied()
            .filter(|&node| {
                let mut current = Some(node);
                while let Some(n) = current {
                    if failed.contains(&n) {
                        return true;
                    }
                    current = if self.model.kind(n).is_some_and(|k| k.is_actor()) {
                        self.model.attach_parent_actor(n)
                    } else {
                        self.model.outer(n)
                    };
                }
                false
            })
            .collect()
    }

    fn emit_actor(
        &self,
        actor: &CollectedActor,
        scope: &EmitScope<'_>,
        sub_prefabs: &SubPrefabMap,
        out: &mut Emission,
        is_root: bool,
    ) -> Result<Option<ActorSaveRecord>, PrefabError> {
        let body = match actor.kind {
            CollectedKind::Full => self.full_body(actor.node, scope, &mut out.tables),
            CollectedKind::SubPrefab => match sub_prefabs.get(&actor.node) {
                Some(data) => Ok(self.sub_prefab_body(data, scope, out)),
                None => Err(PrefabError::NotSubPrefab(actor.node)),
            },
        };
        let body = match body {
            Ok(body) => body,
            Err(e) if !is_root => {
                tracing::warn!(actor = %actor.node, error = %e, "actor failed to encode");
                out.failed.insert(actor.node);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let guid = scope.require(actor.node)?;
        let label = out.tables.name_index(&self.model.label(actor.node).unwrap_or_default());
        match body {
            ActorRecordBody::SubPrefab { .. } => out.stats.sub_prefabs += 1,
            ActorRecordBody::Actor { .. } => out.stats.actors += 1,
        }

        let mut children = Vec::with_capacity(actor.children.len());
        for child in actor.children.iter().filter(|c| scope.emits(c.node)) {
            if let Some(record) = self.emit_actor(child, scope, sub_prefabs, out, false)? {
                children.push(record);
            }
        }
        Ok(Some(ActorSaveRecord {
            guid,
            label,
            body,
            children,
        }))
    }

    fn full_body(
        &self,
        node: NodeId,
        scope: &EmitScope<'_>,
        tables: &mut ReferenceTables,
    ) -> Result<ActorRecordBody, PrefabError> {
        let class = self
            .model
            .class(node)
            .ok_or(ObjectModelError::NodeNotFound(node))?;
        let properties = {
            let guid_of = |n: NodeId| scope.guid_of(n);
            let mut ctx = SaveContext { guid_of: &guid_of, tables: &mut *tables };
            self.codec.encode(self.model, node, FieldFilter::All, &mut ctx)?
        };
        Ok(ActorRecordBody::Actor {
            class: tables.class_index(class.as_str()),
            name: tables.name_index(&self.model.name(node).unwrap_or_default()),
            flags: self.model.flags(node).bits(),
            properties,
            root_component: self.model.root_component(node).and_then(|c| scope.guid_of(c)),
            default_subobjects: self.default_subobject_records(node, scope, tables),
        })
    }

    fn sub_prefab_body(
        &self,
        data: &SubPrefabData,
        scope: &EmitScope<'_>,
        out: &mut Emission,
    ) -> ActorRecordBody {
        let guid_remap = data
            .instance_map
            .iter()
            .filter_map(|(internal, node)| scope.guid_of(*node).map(|outer| (outer, *internal)))
            .collect();

        let tables = &mut out.tables;
        let mut overrides = BTreeMap::new();
        for entry in &data.overrides {
            let Some(guid) = scope.guid_of(entry.node) else {
                tracing::warn!(node = %entry.node, prefab = %data.prefab_asset, "override target missing from the identity map");
                continue;
            };
            let fields: Vec<String> = entry
                .fields
                .iter()
                .filter(|field| {
                    let allowed = self.model.can_override(entry.node, field);
                    if !allowed {
                        tracing::warn!(node = %entry.node, field = %field, "dropping override of a field that is not overridable");
                    }
                    allowed
                })
                .cloned()
                .collect();
            if fields.is_empty() {
                continue;
            }
            let encoded = {
                let guid_of = |n: NodeId| scope.guid_of(n);
                let mut ctx = SaveContext { guid_of: &guid_of, tables: &mut *tables };
                self.codec
                    .encode(self.model, entry.node, FieldFilter::Only(&fields), &mut ctx)
            };
            match encoded {
                Ok(bytes) => {
                    let names = fields.iter().map(|f| tables.name_index(f)).collect();
                    overrides.insert(guid, OverrideParameterRecord { fields: names, data: bytes });
                    out.stats.overrides += 1;
                }
                Err(e) => {
                    tracing::warn!(node = %entry.node, error = %e, "skipping override that failed to encode")
                }
            }
        }

        ActorRecordBody::SubPrefab {
            prefab_asset: tables.asset_index(&data.prefab_asset),
            guid_remap,
            overrides,
        }
    }

    fn emit_object(
        &self,
        node: NodeId,
        scope: &EmitScope<'_>,
        tables: &mut ReferenceTables,
    ) -> Result<ObjectSaveRecord, PrefabError> {
        let guid = scope.require(node)?;
        let kind = self.model.kind(node).ok_or(ObjectModelError::NodeNotFound(node))?;
        let class = self
            .model
            .class(node)
            .ok_or(ObjectModelError::NodeNotFound(node))?;
        let outer = self.model.outer(node).ok_or(PrefabError::UnmappedNode(node))?;
        let outer = scope.require(outer)?;

        let filter = if kind.is_scene_component() {
            FieldFilter::Excluding(&self.options.scene_component_excluded_fields)
        } else {
            FieldFilter::All
        };
        let properties = {
            let guid_of = |n: NodeId| scope.guid_of(n);
            let mut ctx = SaveContext { guid_of: &guid_of, tables: &mut *tables };
            self.codec.encode(self.model, node, filter, &mut ctx)?
        };
        let scene_parent = if kind.is_scene_component() {
            self.model.scene_parent(node).and_then(|p| scope.guid_of(p))
        } else {
            None
        };

        Ok(ObjectSaveRecord {
            guid,
            kind,
            class: tables.class_index(class.as_str()),
            name: tables.name_index(&self.model.name(node).unwrap_or_default()),
            flags: self.model.flags(node).bits(),
            outer,
            properties,
            scene_parent,
            default_subobjects: self.default_subobject_records(node, scope, tables),
        })
    }

    fn default_subobject_records(
        &self,
        node: NodeId,
        scope: &EmitScope<'_>,
        tables: &mut ReferenceTables,
    ) -> Vec<DefaultSubobjectRecord> {
        self.model
            .default_subobjects(node)
            .into_iter()
            .filter_map(|sub| {
                let guid = scope.guid_of(sub)?;
                let name = self.model.name(sub)?;
                Some(DefaultSubobjectRecord {
                    guid,
                    name: tables.name_index(&name),
                })
            })
            .collect()
    }
}

/// Save the hierarchy under `root` into a prefab container.
pub fn save_prefab<M, C>(
    model: &M,
    codec: &C,
    root: NodeId,
    identity: &IdentityMap,
    sub_prefabs: &SubPrefabMap,
    options: &SaveOptions,
) -> Result<SavedPrefab, PrefabError>
where
    M: ObjectModel + ?Sized,
    C: PropertyCodec<M>,
{
    Serializer::new(model, codec, options).save(root, identity, sub_prefabs)
}
