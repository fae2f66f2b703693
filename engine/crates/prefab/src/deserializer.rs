use std::collections::BTreeSet;
use std::time::Instant;

use object_model::{FieldFilter, Guid, NewNode, NodeFlags, NodeId, ObjectModel, PropertyCodec, WorldId};
use observability::LoadMetrics;

use crate::asset::PrefabAssetSource;
use crate::config::LoadOptions;
use crate::container::{self, ContainerHeader};
use crate::context::LoadContext;
use crate::error::PrefabError;
use crate::identity::IdentityMap;
use crate::records::{
    ActorRecordBody, ActorSaveRecord, DefaultSubobjectRecord, PrefabSaveData, ReferenceTables,
};
use crate::sub_prefab::{ObjectOverride, OverrideSet, SubPrefabData, SubPrefabMap};

/// A freshly instantiated prefab.
#[derive(Debug, Clone)]
pub struct LoadedPrefab {
    pub root: NodeId,
    pub header: ContainerHeader,
    /// Keyed by the GUIDs stored in the container.
    pub identity: IdentityMap,
    pub sub_prefabs: SubPrefabMap,
    /// Every actor created, nested instances included, in creation order.
    pub actors: Vec<NodeId>,
}

#[derive(Default)]
struct LoadSession {
    identity: IdentityMap,
    sub_prefabs: SubPrefabMap,
    actors: Vec<NodeId>,
    /// (actor, record-tree parent actor)
    record_parents: Vec<(NodeId, NodeId)>,
}

impl LoadSession {
    fn bind(&mut self, node: NodeId, guid: Guid) -> Result<(), PrefabError> {
        if self.identity.insert(node, guid) {
            Ok(())
        } else {
            Err(PrefabError::Corrupt(format!("GUID {guid} is bound to two nodes")))
        }
    }

    fn node(&self, guid: Guid) -> Result<NodeId, PrefabError> {
        self.identity
            .node_of(guid)
            .ok_or_else(|| PrefabError::Corrupt(format!("GUID {guid} was never created")))
    }
}

fn table_name(tables: &ReferenceTables, index: u32) -> Result<&str, PrefabError> {
    tables
        .name(index)
        .ok_or_else(|| PrefabError::Corrupt(format!("name index {index} out of range")))
}

fn field_names(tables: &ReferenceTables, indices: &[u32]) -> Result<Vec<String>, PrefabError> {
    indices
        .iter()
        .map(|&i| table_name(tables, i).map(str::to_string))
        .collect()
}

/// Destroy `actors` (last created first), skipping ones already gone.
pub(crate) fn destroy_created<M: ObjectModel + ?Sized>(model: &mut M, actors: &[NodeId]) {
    for &actor in actors.iter().rev() {
        if model.is_valid(actor) {
            if let Err(e) = model.destroy(actor) {
                tracing::warn!(actor = %actor, error = %e, "failed to destroy node during rollback");
            }
        }
    }
}

pub struct Deserializer<'a, M: ?Sized, C> {
    model: &'a mut M,
    codec: &'a C,
    assets: &'a dyn PrefabAssetSource,
    options: &'a LoadOptions,
    extra_overrides: Option<&'a OverrideSet>,
}

impl<'a, M, C> Deserializer<'a, M, C>
where
    M: ObjectModel + ?Sized,
    C: PropertyCodec<M>,
{
    pub fn new(
        model: &'a mut M,
        codec: &'a C,
        assets: &'a dyn PrefabAssetSource,
        options: &'a LoadOptions,
    ) -> Self {
        Self {
            model,
            codec,
            assets,
            options,
            extra_overrides: None,
        }
    }

    /// Values applied after the stored overrides, keyed by the container's
    /// own GUIDs.
    pub fn with_extra_overrides(mut self, overrides: &'a OverrideSet) -> Self {
        self.extra_overrides = Some(overrides);
        self
    }

    /// Instantiate a container into `world`, attached under `attach_parent`.
    /// On failure nothing created by this call is left behind.
    pub fn load(
        &mut self,
        bytes: &[u8],
        attach_parent: Option<NodeId>,
        world: WorldId,
    ) -> Result<LoadedPrefab, PrefabError> {
        let extra = self.extra_overrides;
        let mut stack = Vec::new();
        let loaded = self.instantiate(bytes, world, 0, &mut stack, extra)?;
        if let Some(parent) = attach_parent {
            if let Err(e) = self.model.attach_actor(loaded.root, parent) {
                destroy_created(self.model, &loaded.actors);
                return Err(e.into());
            }
        }
        Ok(loaded)
    }

    fn instantiate(
        &mut self,
        bytes: &[u8],
        world: WorldId,
        depth: usize,
        stack: &mut Vec<String>,
        extra: Option<&OverrideSet>,
    ) -> Result<LoadedPrefab, PrefabError> {
        let started = Instant::now();
        let (header, data) = container::read_container(bytes)?;

        let mut session = LoadSession::default();
        let root = match self.build(&data, world, depth, stack, extra, &mut session) {
            Ok(root) => root,
            Err(e) => {
                destroy_created(self.model, &session.actors);
                return Err(e);
            }
        };

        LoadMetrics {
            root: self.model.label(root).unwrap_or_default(),
            duration_us: started.elapsed().as_micros(),
            actors: session.actors.len(),
            objects: data.objects.len(),
            sub_prefabs: session.sub_prefabs.len(),
            depth,
            bytes: bytes.len(),
            budget_us: u128::from(self.options.slow_load_warn_ms) * 1000,
        }
        .log();

        Ok(LoadedPrefab {
            root,
            header,
            identity: session.identity,
            sub_prefabs: session.sub_prefabs,
            actors: session.actors,
        })
    }

    fn build(
        &mut self,
        data: &PrefabSaveData,
        world: WorldId,
        depth: usize,
        stack: &mut Vec<String>,
        extra: Option<&OverrideSet>,
        session: &mut LoadSession,
    ) -> Result<NodeId, PrefabError> {
        let records = data.root.walk();

        // Actors, parents first.
        for &(record, parent) in &records {
            let node = self.create_actor(record, &data.tables, world, depth, stack, session)?;
            if let Some(parent) = parent {
                let parent_node = session.node(parent.guid)?;
                session.record_parents.push((node, parent_node));
            }
        }
        let root = session.node(data.root.guid)?;

        // Objects; outers always precede inners.
        for record in &data.objects {
            let node = match session.identity.node_of(record.guid) {
                Some(existing) => existing,
                None => {
                    let outer = session.node(record.outer)?;
                    let class = data.tables.class(record.class).ok_or_else(|| {
                        PrefabError::Corrupt(format!("class index {} out of range", record.class))
                    })?;
                    let name = table_name(&data.tables, record.name)?;
                    let request = NewNode::owned(record.kind, outer, world, class, name)
                        .with_flags(NodeFlags::from_bits(record.flags));
                    let node = self.model.construct(request)?;
                    session.bind(node, record.guid)?;
                    node
                }
            };
            self.map_default_subobjects(node, &record.default_subobjects, &data.tables, session)?;
        }

        // Every GUID is bound now, so forward references resolve.
        let identity = &session.identity;
        let node_for = |guid: Guid| identity.node_of(guid);
        let ctx = LoadContext {
            node_for: &node_for,
            tables: &data.tables,
            strict: self.options.strict_references,
        };
        for &(record, _) in &records {
            if let ActorRecordBody::Actor { properties, .. } = &record.body {
                let node = session.node(record.guid)?;
                self.codec
                    .decode(&mut *self.model, node, properties, FieldFilter::All, &ctx)?;
            }
        }
        for record in &data.objects {
            let node = session.node(record.guid)?;
            self.codec
                .decode(&mut *self.model, node, &record.properties, FieldFilter::All, &ctx)?;
        }

        self.attach(data, &records, session)?;

        for &(record, _) in &records {
            if let ActorRecordBody::SubPrefab { overrides, .. } = &record.body {
                for (guid, entry) in overrides {
                    let Some(node) = session.identity.node_of(*guid) else {
                        tracing::warn!(guid = %guid, "override target not found in the nested instance");
                        continue;
                    };
                    let fields = field_names(&data.tables, &entry.fields)?;
                    self.codec.decode(
                        &mut *self.model,
                        node,
                        &entry.data,
                        FieldFilter::Only(&fields),
                        &ctx,
                    )?;
                }
            }
        }

        if let Some(extra) = extra {
            let extra_ctx = LoadContext {
                node_for: &node_for,
                tables: &extra.tables,
                strict: self.options.strict_references,
            };
            for (guid, entry) in &extra.records {
                let Some(node) = session.identity.node_of(*guid) else {
                    tracing::warn!(guid = %guid, "extra override target not in this prefab");
                    continue;
                };
                let fields = field_names(&extra.tables, &entry.fields)?;
                self.codec.decode(
                    &mut *self.model,
                    node,
                    &entry.data,
                    FieldFilter::Only(&fields),
                    &extra_ctx,
                )?;
            }
        }

        Ok(root)
    }

    fn create_actor(
        &mut self,
        record: &ActorSaveRecord,
        tables: &ReferenceTables,
        world: WorldId,
        depth: usize,
        stack: &mut Vec<String>,
        session: &mut LoadSession,
    ) -> Result<NodeId, PrefabError> {
        let label = table_name(tables, record.label)?;
        let node = match &record.body {
            ActorRecordBody::Actor {
                class,
                name,
                flags,
                default_subobjects,
                ..
            } => {
                let class = tables
                    .class(*class)
                    .ok_or_else(|| PrefabError::Corrupt(format!("class index {class} out of range")))?;
                let name = table_name(tables, *name)?;
                let request = NewNode::actor(world, class, name).with_flags(NodeFlags::from_bits(*flags));
                let node = self.model.construct(request)?;
                session.actors.push(node);
                session.bind(node, record.guid)?;
                self.map_default_subobjects(node, default_subobjects, tables, session)?;
                node
            }
            ActorRecordBody::SubPrefab {
                prefab_asset,
                guid_remap,
                overrides,
            } => {
                let path = tables
                    .asset(*prefab_asset)
                    .ok_or_else(|| PrefabError::Corrupt(format!("asset index {prefab_asset} out of range")))?
                    .to_string();
                if stack.contains(&path) {
                    return Err(PrefabError::RecursivePrefab(path));
                }
                if depth + 1 > self.options.max_nesting_depth {
                    return Err(PrefabError::NestingTooDeep {
                        max: self.options.max_nesting_depth,
                    });
                }
                let asset = self.assets.load_asset(&path)?;
                stack.push(path.clone());
                let nested = self.instantiate(&asset.data, world, depth + 1, stack, None);
                stack.pop();
                let nested = nested?;
                session.actors.extend(nested.actors.iter().copied());

                for (outer, internal) in guid_remap {
                    match nested.identity.node_of(*internal) {
                        Some(node) => session.bind(node, *outer)?,
                        None => tracing::warn!(prefab = %path, guid = %internal, "remapped GUID missing from the nested asset"),
                    }
                }
                session.bind(nested.root, record.guid)?;

                let instance_map = nested
                    .identity
                    .entries()
                    .into_iter()
                    .map(|(node, guid)| (guid, node))
                    .collect();
                let mut instance = SubPrefabData::new(path, instance_map);
                for (guid, entry) in overrides {
                    match session.identity.node_of(*guid) {
                        Some(node) => instance.overrides.push(ObjectOverride {
                            node,
                            fields: field_names(tables, &entry.fields)?
                                .into_iter()
                                .collect::<BTreeSet<_>>(),
                        }),
                        None => tracing::warn!(guid = %guid, "override recorded for a node outside the nested instance"),
                    }
                }
                session.sub_prefabs.insert(nested.root, instance);
                nested.root
            }
        };
        self.model.set_label(node, label)?;
        Ok(node)
    }

    fn map_default_subobjects(
        &mut self,
        node: NodeId,
        records: &[DefaultSubobjectRecord],
        tables: &ReferenceTables,
        session: &mut LoadSession,
    ) -> Result<(), PrefabError> {
        for record in records {
            let name = table_name(tables, record.name)?;
            match self.model.find_inner_object(node, name) {
                Some(sub) => session.bind(sub, record.guid)?,
                None => {
                    tracing::warn!(outer = %node, subobject = name, "default sub-object no longer created by its class")
                }
            }
        }
        Ok(())
    }

    fn unresolved(&self, guid: Guid, what: &str) -> Result<(), PrefabError> {
        if self.options.strict_references {
            return Err(PrefabError::Corrupt(format!("unresolved {what} {guid}")));
        }
        tracing::warn!(guid = %guid, what, "skipping unresolved attachment");
        Ok(())
    }

    fn attach(
        &mut self,
        data: &PrefabSaveData,
        records: &[(&ActorSaveRecord, Option<&ActorSaveRecord>)],
        session: &LoadSession,
    ) -> Result<(), PrefabError> {
        for &(record, _) in records {
            if let ActorRecordBody::Actor {
                root_component: Some(guid),
                ..
            } = &record.body
            {
                let actor = session.node(record.guid)?;
                match session.identity.node_of(*guid) {
                    Some(component) if self.model.root_component(actor) != Some(component) => {
                        self.model.set_root_component(actor, Some(component))?;
                    }
                    Some(_) => {}
                    None => self.unresolved(*guid, "root component")?,
                }
            }
        }

        for record in data.objects.iter().filter(|o| o.kind.is_scene_component()) {
            let node = session.node(record.guid)?;
            match record.scene_parent {
                Some(guid) => match session.identity.node_of(guid) {
                    Some(parent) => self.set_scene_parent(node, Some(parent))?,
                    None => self.unresolved(guid, "scene parent")?,
                },
                None => self.set_scene_parent(node, None)?,
            }
        }

        for (child, parent) in &data.scene_parents {
            match (session.identity.node_of(*child), session.identity.node_of(*parent)) {
                (Some(child), Some(parent)) => self.set_scene_parent(child, Some(parent))?,
                (None, _) => self.unresolved(*child, "sub-prefab root component")?,
                (_, None) => self.unresolved(*parent, "sub-prefab attach parent")?,
            }
        }

        for &(actor, parent) in &session.record_parents {
            if self.model.attach_parent_actor(actor).is_some() {
                continue;
            }
            if self.model.root_component(actor).is_some() && self.model.root_component(parent).is_some() {
                self.model.attach_actor(actor, parent)?;
            } else {
                tracing::debug!(actor = %actor, parent = %parent, "actor has no root component to attach");
            }
        }
        Ok(())
    }

    fn set_scene_parent(&mut self, node: NodeId, parent: Option<NodeId>) -> Result<(), PrefabError> {
        if self.model.scene_parent(node) != parent {
            self.model.set_scene_parent(node, parent)?;
        }
        Ok(())
    }
}

/// Instantiate a prefab container.
pub fn load_prefab<M, C>(
    model: &mut M,
    codec: &C,
    assets: &dyn PrefabAssetSource,
    bytes: &[u8],
    attach_parent: Option<NodeId>,
    world: WorldId,
    options: &LoadOptions,
) -> Result<LoadedPrefab, PrefabError>
where
    M: ObjectModel + ?Sized,
    C: PropertyCodec<M>,
{
    Deserializer::new(model, codec, assets, options).load(bytes, attach_parent, world)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::PrefabLibrary;
    use crate::config::SaveOptions;
    use crate::serializer::save_prefab;
    use object_model::{ClassDescriptor, FieldCodec, FieldValue, NodeKind, SceneWorld};

    const W: WorldId = WorldId(0);

    fn scene() -> SceneWorld {
        let mut scene = SceneWorld::new();
        scene.register_class(
            ClassDescriptor::new("Node")
                .with_subobject("Root", "SceneComponent", NodeKind::SceneComponent)
                .with_root("Root"),
        );
        scene
    }

    fn save(scene: &SceneWorld, root: NodeId) -> Vec<u8> {
        save_prefab(
            scene,
            &FieldCodec,
            root,
            &IdentityMap::new(),
            &SubPrefabMap::new(),
            &SaveOptions::default(),
        )
        .unwrap()
        .bytes
    }

    #[test]
    fn rebuilds_hierarchy_and_cross_references() {
        let mut scene = scene();
        let root = scene.spawn_actor(W, "Node", "Root").unwrap();
        let child = scene.spawn_actor(W, "Node", "Child").unwrap();
        scene.attach_actor(child, root).unwrap();
        // back-reference from parent to child and forward from child to parent
        scene.set_field(root, "Favorite", FieldValue::Object(Some(child))).unwrap();
        scene.set_field(child, "Owner", FieldValue::Object(Some(root))).unwrap();
        let bytes = save(&scene, root);

        let mut target = scene_world_with_parent();
        let parent = target.1;
        let loaded = load_prefab(
            &mut target.0,
            &FieldCodec,
            &PrefabLibrary::new(),
            &bytes,
            Some(parent),
            W,
            &LoadOptions::default(),
        )
        .unwrap();
        let model = &target.0;
        let new_root = loaded.root;
        let children = model.attached_actors(new_root);
        assert_eq!(children.len(), 1);
        let new_child = children[0];
        assert_eq!(model.label(new_child).as_deref(), Some("Child"));
        assert_eq!(model.field(new_root, "Favorite"), Some(&FieldValue::Object(Some(new_child))));
        assert_eq!(model.field(new_child, "Owner"), Some(&FieldValue::Object(Some(new_root))));
        assert_eq!(model.attach_parent_actor(new_root), Some(parent));
        assert_eq!(loaded.identity.len(), 4);
        assert_eq!(loaded.actors, vec![new_root, new_child]);
    }

    fn scene_world_with_parent() -> (SceneWorld, NodeId) {
        let mut target = scene();
        let parent = target.spawn_actor(W, "Node", "Level").unwrap();
        (target, parent)
    }

    /// A container whose root points at a child record that was cut out.
    fn dangling_reference() -> Vec<u8> {
        let mut scene = scene();
        let root = scene.spawn_actor(W, "Node", "Root").unwrap();
        let child = scene.spawn_actor(W, "Node", "Child").unwrap();
        scene.attach_actor(child, root).unwrap();
        scene.set_field(root, "Favorite", FieldValue::Object(Some(child))).unwrap();
        scene.set_field(root, "Speed", FieldValue::Int(3)).unwrap();
        let (header, mut data) = container::read_container(&save(&scene, root)).unwrap();
        let cut = data.root.children.remove(0).guid;
        data.objects.retain(|o| o.outer != cut);
        container::write_container(&header, &data).unwrap()
    }

    #[test]
    fn lenient_load_nulls_dangling_references() {
        let bytes = dangling_reference();
        let mut target = scene();
        let loaded = load_prefab(
            &mut target,
            &FieldCodec,
            &PrefabLibrary::new(),
            &bytes,
            None,
            W,
            &LoadOptions::default(),
        )
        .unwrap();
        assert_eq!(target.field(loaded.root, "Favorite"), Some(&FieldValue::Object(None)));
        assert_eq!(target.field(loaded.root, "Speed"), Some(&FieldValue::Int(3)));
    }

    #[test]
    fn strict_load_rejects_dangling_references() {
        let bytes = dangling_reference();
        let mut target = scene();
        let options = LoadOptions {
            strict_references: true,
            ..LoadOptions::default()
        };
        let result = load_prefab(&mut target, &FieldCodec, &PrefabLibrary::new(), &bytes, None, W, &options);
        assert!(matches!(
            result,
            Err(PrefabError::Codec(object_model::CodecError::UnresolvedReference(_)))
        ));
        assert_eq!(target.node_count(), 0);
    }

    #[test]
    fn corrupt_container_creates_nothing() {
        let mut scene = scene();
        let root = scene.spawn_actor(W, "Node", "Root").unwrap();
        let bytes = save(&scene, root);
        let before = scene.node_count();

        let truncated = &bytes[..bytes.len() / 2];
        let result = load_prefab(
            &mut scene,
            &FieldCodec,
            &PrefabLibrary::new(),
            truncated,
            None,
            W,
            &LoadOptions::default(),
        );
        assert!(result.is_err());
        assert_eq!(scene.node_count(), before);
    }

    #[test]
    fn failure_after_creation_rolls_back() {
        let mut scene = scene();
        let root = scene.spawn_actor(W, "Node", "Root").unwrap();
        let child = scene.spawn_actor(W, "Node", "Child").unwrap();
        scene.attach_actor(child, root).unwrap();
        let bytes = save(&scene, root);

        let (mut target, dead_parent) = scene_world_with_parent();
        target.destroy(dead_parent).unwrap();
        let before = target.node_count();
        let result = load_prefab(
            &mut target,
            &FieldCodec,
            &PrefabLibrary::new(),
            &bytes,
            Some(dead_parent),
            W,
            &LoadOptions::default(),
        );
        assert!(result.is_err());
        assert_eq!(target.node_count(), before);
    }

    #[test]
    fn missing_nested_asset_rolls_back() {
        let mut scene = scene();
        let root = scene.spawn_actor(W, "Node", "Root").unwrap();
        let sub = scene.spawn_actor(W, "Node", "Sub").unwrap();
        scene.attach_actor(sub, root).unwrap();
        let mut subs = SubPrefabMap::new();
        subs.insert(
            sub,
            SubPrefabData::new("/Game/Missing", [(Guid::from_u128(1), sub)].into_iter().collect()),
        );
        let bytes = save_prefab(
            &scene,
            &FieldCodec,
            root,
            &IdentityMap::new(),
            &subs,
            &SaveOptions::default(),
        )
        .unwrap()
        .bytes;

        let mut target = SceneWorld::new();
        let result = load_prefab(
            &mut target,
            &FieldCodec,
            &PrefabLibrary::new(),
            &bytes,
            None,
            W,
            &LoadOptions::default(),
        );
        assert!(matches!(result, Err(PrefabError::UnknownAsset(_))));
        assert_eq!(target.node_count(), 0);
    }
}
