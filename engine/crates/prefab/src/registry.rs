use std::collections::{BTreeMap, HashMap};

use object_model::hierarchy::destroy_actor_with_hierarchy;
use object_model::{Guid, NodeId, ObjectModel, ObjectModelError, PropertyCodec, WorldId};

use crate::asset::{PrefabAsset, PrefabAssetSource};
use crate::config::{LoadOptions, SaveOptions};
use crate::deserializer::{destroy_created, load_prefab, Deserializer};
use crate::error::PrefabError;
use crate::identity::IdentityMap;
use crate::records::ActorRecordBody;
use crate::serializer::{save_prefab, SaveStats};
use crate::sub_prefab::{ObjectOverride, SubPrefabData, SubPrefabMap};

/// A live instantiation of a prefab asset.
#[derive(Debug, Clone)]
pub struct PrefabInstance {
    pub prefab_asset: String,
    pub root: NodeId,
    pub identity: IdentityMap,
    pub sub_prefabs: SubPrefabMap,
}

impl PrefabInstance {
    /// Stop tracking the sub-prefab rooted at `sub_root`. Its actors stay
    /// where they are and are saved as plain actors of this instance from
    /// now on, current values included.
    pub fn unpack_sub_prefab(&mut self, sub_root: NodeId) -> Result<SubPrefabData, PrefabError> {
        let data = self
            .sub_prefabs
            .remove(&sub_root)
            .ok_or(PrefabError::NotSubPrefab(sub_root))?;
        tracing::info!(
            root = %sub_root,
            prefab = %data.prefab_asset,
            nodes = data.instance_map.len(),
            "sub-prefab unpacked"
        );
        Ok(data)
    }

    /// Drop sub-prefab entries whose root actor is gone and prune dead
    /// nodes from the rest. Returns how many entries were dropped.
    pub fn cleanup_invalid<M: ObjectModel + ?Sized>(&mut self, model: &M) -> usize {
        let before = self.sub_prefabs.len();
        self.sub_prefabs.retain(|root, data| {
            let alive = model.is_valid(*root);
            if !alive {
                tracing::debug!(root = %root, prefab = %data.prefab_asset, "dropping sub-prefab with a dead root");
            }
            alive
        });
        for data in self.sub_prefabs.values_mut() {
            data.retain_valid(model);
        }
        before - self.sub_prefabs.len()
    }

    /// Re-instantiate the sub-prefab at `sub_root` from the current version
    /// of its asset. Overrides, the outer GUIDs of surviving nodes, the label
    /// and the attach parent carry over. Actors of this instance attached
    /// inside the old copy are moved onto the matching nodes of the new one.
    /// Returns the new sub-prefab root.
    pub fn refresh_sub_prefab<M, C>(
        &mut self,
        model: &mut M,
        codec: &C,
        assets: &dyn PrefabAssetSource,
        sub_root: NodeId,
        options: &LoadOptions,
    ) -> Result<NodeId, PrefabError>
    where
        M: ObjectModel + ?Sized,
        C: PropertyCodec<M>,
    {
        let data = self
            .sub_prefabs
            .get(&sub_root)
            .cloned()
            .ok_or(PrefabError::NotSubPrefab(sub_root))?;
        let world = model
            .world(sub_root)
            .ok_or(ObjectModelError::NodeNotFound(sub_root))?;
        let parent = model.attach_parent_actor(sub_root);
        let label = model.label(sub_root);
        let captured = data.capture_overrides(model, codec)?;
        // nested GUID -> GUID in this instance's space
        let outer: Vec<(Guid, Guid)> = data
            .instance_map
            .iter()
            .filter_map(|(internal, node)| self.identity.guid_of(*node).map(|g| (*internal, g)))
            .collect();

        let asset = assets.load_asset(&data.prefab_asset)?;
        let loaded = Deserializer::new(model, codec, assets, options)
            .with_extra_overrides(&captured)
            .load(&asset.data, parent, world)?;

        let mut moved: Vec<(NodeId, NodeId)> = Vec::new();
        let rehome = (|| -> Result<(), PrefabError> {
            for (internal, node) in &data.instance_map {
                for child in model.attached_actors(*node) {
                    if data.contains(child) {
                        continue;
                    }
                    let target = match loaded.identity.node_of(*internal) {
                        Some(target) => target,
                        None => {
                            tracing::warn!(actor = %child, "attach parent no longer in the nested asset, moving to its root");
                            loaded.root
                        }
                    };
                    model.attach_actor(child, target)?;
                    moved.push((child, *node));
                }
            }
            if let Some(label) = &label {
                model.set_label(loaded.root, label)?;
            }
            Ok(())
        })();
        if let Err(e) = rehome {
            for (child, old_parent) in moved.into_iter().rev() {
                if let Err(e) = model.attach_actor(child, old_parent) {
                    tracing::warn!(actor = %child, error = %e, "failed to restore attachment during rollback");
                }
            }
            destroy_created(model, &loaded.actors);
            return Err(e);
        }

        destroy_actor_with_hierarchy(model, sub_root)?;
        let mut identity = IdentityMap::seeded_from(&self.identity, model);
        for (internal, guid) in outer {
            if let Some(node) = loaded.identity.node_of(internal) {
                if !identity.insert(node, guid) {
                    tracing::warn!(node = %node, guid = %guid, "GUID already bound, refreshed node gets a new one on save");
                }
            }
        }
        self.identity = identity;

        let mut refreshed = SubPrefabData::new(
            data.prefab_asset.clone(),
            loaded
                .identity
                .entries()
                .into_iter()
                .map(|(node, guid)| (guid, node))
                .collect(),
        );
        for entry in &data.overrides {
            let node = data
                .internal_guid_of(entry.node)
                .and_then(|internal| loaded.identity.node_of(internal));
            match node {
                Some(node) => refreshed.overrides.push(ObjectOverride {
                    node,
                    fields: entry.fields.clone(),
                }),
                None => tracing::warn!(node = %entry.node, "overridden node no longer in the nested asset"),
            }
        }
        self.sub_prefabs.remove(&sub_root);
        self.sub_prefabs.insert(loaded.root, refreshed);
        tracing::info!(old = %sub_root, new = %loaded.root, prefab = %data.prefab_asset, "sub-prefab refreshed");
        Ok(loaded.root)
    }
}

/// True when `path` is `target` or nests it at any depth. Assets missing
/// from `assets` count as not nesting anything.
fn nests_asset(
    assets: &dyn PrefabAssetSource,
    path: &str,
    target: &str,
    depth: usize,
    max_depth: usize,
) -> Result<bool, PrefabError> {
    if path == target {
        return Ok(true);
    }
    if !assets.contains(path) {
        return Ok(false);
    }
    if depth >= max_depth {
        return Err(PrefabError::NestingTooDeep { max: max_depth });
    }
    let data = assets.load_asset(path)?.decode()?;
    for (record, _) in data.root.walk() {
        if let ActorRecordBody::SubPrefab { prefab_asset, .. } = &record.body {
            let Some(nested) = data.tables.asset(*prefab_asset) else {
                continue;
            };
            if nests_asset(assets, nested, target, depth + 1, max_depth)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Live prefab instances, keyed by instance root. Instances are registered
/// when instantiated and deregistered when destroyed.
#[derive(Debug, Default)]
pub struct PrefabInstanceRegistry {
    instances: BTreeMap<NodeId, PrefabInstance>,
}

impl PrefabInstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the instance previously registered at the same root.
    pub fn register(&mut self, instance: PrefabInstance) -> Option<PrefabInstance> {
        tracing::debug!(root = %instance.root, prefab = %instance.prefab_asset, "prefab instance registered");
        self.instances.insert(instance.root, instance)
    }

    pub fn deregister(&mut self, root: NodeId) -> Option<PrefabInstance> {
        self.instances.remove(&root)
    }

    pub fn get(&self, root: NodeId) -> Option<&PrefabInstance> {
        self.instances.get(&root)
    }

    pub fn get_mut(&mut self, root: NodeId) -> Option<&mut PrefabInstance> {
        self.instances.get_mut(&root)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn instances_of(&self, prefab_asset: &str) -> Vec<NodeId> {
        self.instances
            .values()
            .filter(|i| i.prefab_asset == prefab_asset)
            .map(|i| i.root)
            .collect()
    }

    /// The nearest registered instance root at or above `node`.
    pub fn find_owner<M: ObjectModel + ?Sized>(&self, model: &M, node: NodeId) -> Option<NodeId> {
        let mut current = model.owning_actor(node);
        while let Some(actor) = current {
            if self.instances.contains_key(&actor) {
                return Some(actor);
            }
            current = model.attach_parent_actor(actor);
        }
        None
    }

    #[allow(clippy::too_many_arguments)]
    pub fn instantiate<M, C>(
        &mut self,
        model: &mut M,
        codec: &C,
        assets: &dyn PrefabAssetSource,
        prefab_asset: &str,
        attach_parent: Option<NodeId>,
        world: WorldId,
        options: &LoadOptions,
    ) -> Result<NodeId, PrefabError>
    where
        M: ObjectModel + ?Sized,
        C: PropertyCodec<M>,
    {
        let asset = assets.load_asset(prefab_asset)?;
        let loaded = load_prefab(model, codec, assets, &asset.data, attach_parent, world, options)?;
        let root = loaded.root;
        self.register(PrefabInstance {
            prefab_asset: prefab_asset.to_string(),
            root,
            identity: loaded.identity,
            sub_prefabs: loaded.sub_prefabs,
        });
        Ok(root)
    }

    pub fn destroy_instance<M: ObjectModel + ?Sized>(
        &mut self,
        model: &mut M,
        root: NodeId,
    ) -> Result<(), PrefabError> {
        let instance = self.deregister(root).ok_or(PrefabError::NotSubPrefab(root))?;
        destroy_actor_with_hierarchy(model, instance.root)?;
        Ok(())
    }

    /// Re-save an instance into its asset, keeping the GUIDs it was loaded
    /// with.
    pub fn apply_instance<M, C>(
        &mut self,
        model: &M,
        codec: &C,
        assets: &mut dyn PrefabAssetSource,
        root: NodeId,
        options: &SaveOptions,
    ) -> Result<SaveStats, PrefabError>
    where
        M: ObjectModel + ?Sized,
        C: PropertyCodec<M>,
    {
        let instance = self
            .instances
            .get_mut(&root)
            .ok_or(PrefabError::NotSubPrefab(root))?;
        let saved = save_prefab(model, codec, root, &instance.identity, &instance.sub_prefabs, options)?;
        assets.store_asset(PrefabAsset::new(instance.prefab_asset.clone(), saved.bytes)?)?;
        instance.identity = saved.identity;
        Ok(saved.stats)
    }

    /// Unpack `actor`: a registered instance root is deregistered and left
    /// in the world as plain actors, a sub-prefab root stops being tracked
    /// by the instance that holds it. Stale entries are cleaned up after.
    /// Returns the asset the actor was an instance of.
    pub fn unpack_instance<M: ObjectModel + ?Sized>(
        &mut self,
        model: &M,
        actor: NodeId,
    ) -> Result<String, PrefabError> {
        let prefab = if let Some(instance) = self.instances.remove(&actor) {
            tracing::info!(root = %actor, prefab = %instance.prefab_asset, "prefab instance unpacked");
            instance.prefab_asset
        } else {
            let owner = self
                .instances
                .values_mut()
                .find(|i| i.sub_prefabs.contains_key(&actor))
                .ok_or(PrefabError::NotSubPrefab(actor))?;
            owner.unpack_sub_prefab(actor)?.prefab_asset
        };
        self.cleanup_invalid(model);
        Ok(prefab)
    }

    /// Refresh every sub-prefab instance whose asset is `prefab_asset` or
    /// nests it, keeping per-instance overrides. Returns the new roots.
    pub fn refresh_instances<M, C>(
        &mut self,
        model: &mut M,
        codec: &C,
        assets: &dyn PrefabAssetSource,
        prefab_asset: &str,
        options: &LoadOptions,
    ) -> Result<Vec<NodeId>, PrefabError>
    where
        M: ObjectModel + ?Sized,
        C: PropertyCodec<M>,
    {
        let mut nests: HashMap<String, bool> = HashMap::new();
        let mut refreshed = Vec::new();
        for instance in self.instances.values_mut() {
            let mut targets = Vec::new();
            for (root, data) in &instance.sub_prefabs {
                let hit = match nests.get(&data.prefab_asset) {
                    Some(hit) => *hit,
                    None => {
                        let hit = nests_asset(assets, &data.prefab_asset, prefab_asset, 0, options.max_nesting_depth)?;
                        nests.insert(data.prefab_asset.clone(), hit);
                        hit
                    }
                };
                if hit {
                    targets.push(*root);
                }
            }
            for root in targets {
                if !model.is_valid(root) {
                    continue;
                }
                refreshed.push(instance.refresh_sub_prefab(model, codec, assets, root, options)?);
            }
        }
        tracing::debug!(prefab = %prefab_asset, refreshed = refreshed.len(), "sub-prefab instances refreshed");
        Ok(refreshed)
    }

    /// Deregister instances whose root no longer exists and drop sub-prefab
    /// entries whose root died. Returns how many entries went in total.
    pub fn cleanup_invalid<M: ObjectModel + ?Sized>(&mut self, model: &M) -> usize {
        let before = self.instances.len();
        self.instances.retain(|root, _| model.is_valid(*root));
        let mut removed = before - self.instances.len();
        for instance in self.instances.values_mut() {
            removed += instance.cleanup_invalid(model);
        }
        if removed > 0 {
            tracing::debug!(removed, "invalid prefab instances cleaned up");
        }
        removed
    }
}
