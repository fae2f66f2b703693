use std::collections::{BTreeMap, BTreeSet};

use object_model::{Guid, NodeId, ObjectModel};

use crate::error::PrefabError;
use crate::records::{OverrideParameterRecord, ReferenceTables};

/// Fields of one interior node that diverge from the nested prefab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectOverride {
    pub node: NodeId,
    pub fields: BTreeSet<String>,
}

/// One live instance of a nested prefab inside a parent prefab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubPrefabData {
    pub prefab_asset: String,
    /// GUID inside the nested asset -> live node.
    pub instance_map: BTreeMap<Guid, NodeId>,
    pub overrides: Vec<ObjectOverride>,
}

/// Sub-prefab instances of one prefab, keyed by instance root.
pub type SubPrefabMap = BTreeMap<NodeId, SubPrefabData>;

/// Override records in some GUID space, with the tables their blobs
/// were encoded against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideSet {
    pub tables: ReferenceTables,
    pub records: BTreeMap<Guid, OverrideParameterRecord>,
}

impl OverrideSet {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl SubPrefabData {
    pub fn new(prefab_asset: impl Into<String>, instance_map: BTreeMap<Guid, NodeId>) -> Self {
        Self {
            prefab_asset: prefab_asset.into(),
            instance_map,
            overrides: Vec::new(),
        }
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.instance_map.values().any(|&n| n == node)
    }

    pub fn internal_guid_of(&self, node: NodeId) -> Option<Guid> {
        self.instance_map
            .iter()
            .find(|(_, n)| **n == node)
            .map(|(guid, _)| *guid)
    }

    pub fn instance_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.instance_map.values().copied()
    }

    pub fn overridden_fields(&self, node: NodeId) -> Option<&BTreeSet<String>> {
        self.overrides
            .iter()
            .find(|o| o.node == node)
            .map(|o| &o.fields)
    }

    pub fn is_overridden(&self, node: NodeId, field: &str) -> bool {
        self.overridden_fields(node)
            .map(|fields| fields.contains(field))
            .unwrap_or(false)
    }

    /// Mark `field` of interior `node` as overridden on this instance.
    pub fn add_override<M: ObjectModel + ?Sized>(
        &mut self,
        model: &M,
        node: NodeId,
        field: &str,
    ) -> Result<(), PrefabError> {
        if !self.contains(node) {
            return Err(PrefabError::NotSubPrefab(node));
        }
        if !model.can_override(node, field) {
            return Err(PrefabError::NotOverridable {
                node,
                field: field.to_string(),
            });
        }
        match self.overrides.iter_mut().find(|o| o.node == node) {
            Some(entry) => {
                entry.fields.insert(field.to_string());
            }
            None => self.overrides.push(ObjectOverride {
                node,
                fields: BTreeSet::from([field.to_string()]),
            }),
        }
        Ok(())
    }

    /// Forget an override without touching the live value.
    pub fn remove_override(&mut self, node: NodeId, field: &str) -> bool {
        let Some(index) = self.overrides.iter().position(|o| o.node == node) else {
            return false;
        };
        let removed = self.overrides[index].fields.remove(field);
        if self.overrides[index].fields.is_empty() {
            self.overrides.remove(index);
        }
        removed
    }

    /// Drop overrides whose node died.
    pub fn retain_valid<M: ObjectModel + ?Sized>(&mut self, model: &M) {
        self.overrides.retain(|o| model.is_valid(o.node));
        self.instance_map.retain(|_, node| model.is_valid(*node));
    }
}
