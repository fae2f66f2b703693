//! Editing per-instance overrides against the nested prefab asset.

use std::collections::{BTreeMap, HashMap};

use object_model::{FieldFilter, Guid, NodeId, ObjectModel, ObjectModelError, PropertyCodec};

use crate::asset::{PrefabAsset, PrefabAssetSource};
use crate::config::{LoadOptions, SaveOptions};
use crate::context::{LoadContext, SaveContext};
use crate::deserializer::{destroy_created, Deserializer};
use crate::error::PrefabError;
use crate::records::{ActorRecordBody, OverrideParameterRecord, ReferenceTables};
use crate::serializer::save_prefab;
use crate::sub_prefab::{OverrideSet, SubPrefabData};

const MAX_DEFAULT_DEPTH: usize = 16;

/// Decode the asset's stored values of `fields` for the node known as
/// `guid` inside `path` onto `node`. Returns false when the asset has no
/// record for it.
#[allow(clippy::too_many_arguments)]
fn apply_asset_defaults<M, C>(
    model: &mut M,
    codec: &C,
    assets: &dyn PrefabAssetSource,
    path: &str,
    resolve: &dyn Fn(Guid) -> Option<NodeId>,
    guid: Guid,
    node: NodeId,
    fields: &[String],
    depth: usize,
) -> Result<bool, PrefabError>
where
    M: ObjectModel + ?Sized,
    C: PropertyCodec<M>,
{
    if depth > MAX_DEFAULT_DEPTH {
        return Err(PrefabError::NestingTooDeep { max: MAX_DEFAULT_DEPTH });
    }
    let data = assets.load_asset(path)?.decode()?;
    let ctx = LoadContext {
        node_for: resolve,
        tables: &data.tables,
        strict: false,
    };

    if let Some(ActorRecordBody::Actor { properties, .. }) = data.find_actor(guid).map(|r| &r.body) {
        codec.decode(model, node, properties, FieldFilter::Only(fields), &ctx)?;
        return Ok(true);
    }
    if let Some(object) = data.find_object(guid) {
        codec.decode(model, node, &object.properties, FieldFilter::Only(fields), &ctx)?;
        return Ok(true);
    }

    // The node lives in a sub-prefab of this asset: its defaults are the
    // deeper asset's values with this asset's overrides on top.
    for (record, _) in data.root.walk() {
        let ActorRecordBody::SubPrefab {
            prefab_asset,
            guid_remap,
            overrides,
        } = &record.body
        else {
            continue;
        };
        let Some(deeper) = guid_remap.get(&guid) else {
            continue;
        };
        let deeper_path = data
            .tables
            .asset(*prefab_asset)
            .ok_or_else(|| PrefabError::Corrupt(format!("asset index {prefab_asset} out of range")))?;
        let inverse: HashMap<Guid, Guid> = guid_remap.iter().map(|(outer, inner)| (*inner, *outer)).collect();
        let chained = |g: Guid| inverse.get(&g).and_then(|outer| resolve(*outer));
        apply_asset_defaults(model, codec, assets, deeper_path, &chained, *deeper, node, fields, depth + 1)?;

        if let Some(entry) = overrides.get(&guid) {
            let stored: Vec<String> = entry
                .fields
                .iter()
                .filter_map(|&i| data.tables.name(i).map(str::to_string))
                .filter(|f| fields.contains(f))
                .collect();
            if !stored.is_empty() {
                codec.decode(model, node, &entry.data, FieldFilter::Only(&stored), &ctx)?;
            }
        }
        return Ok(true);
    }
    Ok(false)
}

impl SubPrefabData {
    /// Restore the nested prefab's values of `fields` on `node` and stop
    /// treating them as overridden.
    pub fn revert_override<M, C>(
        &mut self,
        model: &mut M,
        codec: &C,
        assets: &dyn PrefabAssetSource,
        node: NodeId,
        fields: &[String],
    ) -> Result<(), PrefabError>
    where
        M: ObjectModel + ?Sized,
        C: PropertyCodec<M>,
    {
        let guid = self.internal_guid_of(node).ok_or(PrefabError::NotSubPrefab(node))?;
        let instance = &self.instance_map;
        let resolve = |g: Guid| instance.get(&g).copied();
        let found = apply_asset_defaults(model, codec, assets, &self.prefab_asset, &resolve, guid, node, fields, 0)?;
        if !found {
            tracing::warn!(node = %node, prefab = %self.prefab_asset, "nested asset has no record for node, values left as they are");
        }
        for field in fields {
            self.remove_override(node, field);
        }
        tracing::debug!(node = %node, fields = fields.len(), "override reverted");
        Ok(())
    }

    pub fn revert_all_overrides<M, C>(
        &mut self,
        model: &mut M,
        codec: &C,
        assets: &dyn PrefabAssetSource,
    ) -> Result<(), PrefabError>
    where
        M: ObjectModel + ?Sized,
        C: PropertyCodec<M>,
    {
        let entries: Vec<(NodeId, Vec<String>)> = self
            .overrides
            .iter()
            .map(|o| (o.node, o.fields.iter().cloned().collect()))
            .collect();
        for (node, fields) in entries {
            if model.is_valid(node) {
                self.revert_override(model, codec, assets, node, &fields)?;
            }
        }
        self.overrides.clear();
        Ok(())
    }

    /// Encode the current overrides keyed by GUIDs of the nested asset, for
    /// replaying onto a fresh instance of it.
    pub fn capture_overrides<M, C>(&self, model: &M, codec: &C) -> Result<OverrideSet, PrefabError>
    where
        M: ObjectModel + ?Sized,
        C: PropertyCodec<M>,
    {
        let inverse: HashMap<NodeId, Guid> = self.instance_map.iter().map(|(g, n)| (*n, *g)).collect();
        let guid_of = |node: NodeId| inverse.get(&node).copied();
        let mut tables = ReferenceTables::default();
        let mut records = BTreeMap::new();
        for entry in &self.overrides {
            let Some(guid) = guid_of(entry.node) else {
                continue;
            };
            let fields: Vec<String> = entry.fields.iter().cloned().collect();
            let data = {
                let mut ctx = SaveContext {
                    guid_of: &guid_of,
                    tables: &mut tables,
                };
                codec.encode(model, entry.node, FieldFilter::Only(&fields), &mut ctx)?
            };
            let names = fields.iter().map(|f| tables.name_index(f)).collect();
            records.insert(guid, OverrideParameterRecord { fields: names, data });
        }
        Ok(OverrideSet { tables, records })
    }

    /// Write this instance's values of `fields` on `node` into the nested
    /// prefab asset, which then no longer differs from the instance.
    pub fn apply_override_to_asset<M, C>(
        &mut self,
        model: &mut M,
        codec: &C,
        assets: &mut dyn PrefabAssetSource,
        node: NodeId,
        fields: &[String],
        options: &SaveOptions,
    ) -> Result<(), PrefabError>
    where
        M: ObjectModel + ?Sized,
        C: PropertyCodec<M>,
    {
        let guid = self.internal_guid_of(node).ok_or(PrefabError::NotSubPrefab(node))?;
        let world = model.world(node).ok_or(ObjectModelError::NodeNotFound(node))?;
        let asset = assets.load_asset(&self.prefab_asset)?;

        // Values leave the instance keyed by the asset's own GUIDs.
        let inverse: HashMap<NodeId, Guid> = self.instance_map.iter().map(|(g, n)| (*n, *g)).collect();
        let guid_of = |n: NodeId| inverse.get(&n).copied();
        let mut tables = ReferenceTables::default();
        let values = {
            let mut ctx = SaveContext {
                guid_of: &guid_of,
                tables: &mut tables,
            };
            codec.encode(model, node, FieldFilter::Only(fields), &mut ctx)?
        };

        let load_options = LoadOptions::default();
        let mut scratch = Deserializer::new(model, codec, &*assets, &load_options).load(&asset.data, None, world)?;

        let saved = (|| {
            let target = scratch
                .identity
                .node_of(guid)
                .ok_or_else(|| PrefabError::Corrupt(format!("asset {} has no node {guid}", self.prefab_asset)))?;
            let identity = &scratch.identity;
            let node_for = |g: Guid| identity.node_of(g);
            let ctx = LoadContext {
                node_for: &node_for,
                tables: &tables,
                strict: false,
            };
            codec.decode(model, target, &values, FieldFilter::Only(fields), &ctx)?;
            // Interior of a deeper sub-prefab: the change is an override there.
            for nested in scratch.sub_prefabs.values_mut() {
                if nested.contains(target) {
                    for field in fields {
                        nested.add_override(&*model, target, field)?;
                    }
                }
            }
            save_prefab(&*model, codec, scratch.root, &scratch.identity, &scratch.sub_prefabs, options)
        })();
        destroy_created(model, &scratch.actors);
        let saved = saved?;

        assets.store_asset(PrefabAsset::new(self.prefab_asset.clone(), saved.bytes)?)?;
        for field in fields {
            self.remove_override(node, field);
        }
        tracing::info!(prefab = %self.prefab_asset, node = %node, fields = fields.len(), "override applied to nested prefab");
        Ok(())
    }
}
