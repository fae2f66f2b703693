use std::collections::BTreeMap;

use object_model::{Guid, NodeKind};
use serde::{Deserialize, Serialize};

/// Deduplicated string tables referenced by index from records and from
/// encoded property blobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceTables {
    pub classes: Vec<String>,
    pub assets: Vec<String>,
    pub names: Vec<String>,
}

impl ReferenceTables {
    pub fn class_index(&mut self, class: &str) -> u32 {
        find_or_add(&mut self.classes, class)
    }

    pub fn asset_index(&mut self, path: &str) -> u32 {
        find_or_add(&mut self.assets, path)
    }

    pub fn name_index(&mut self, name: &str) -> u32 {
        find_or_add(&mut self.names, name)
    }

    pub fn class(&self, index: u32) -> Option<&str> {
        self.classes.get(index as usize).map(String::as_str)
    }

    pub fn asset(&self, index: u32) -> Option<&str> {
        self.assets.get(index as usize).map(String::as_str)
    }

    pub fn name(&self, index: u32) -> Option<&str> {
        self.names.get(index as usize).map(String::as_str)
    }
}

fn find_or_add(table: &mut Vec<String>, value: &str) -> u32 {
    if let Some(index) = table.iter().position(|v| v == value) {
        return index as u32;
    }
    table.push(value.to_string());
    (table.len() - 1) as u32
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultSubobjectRecord {
    pub guid: Guid,
    pub name: u32,
}

/// Encoded values of the overridden fields of one sub-prefab node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideParameterRecord {
    /// Name-table indices of the overridden fields.
    pub fields: Vec<u32>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorRecordBody {
    Actor {
        class: u32,
        name: u32,
        flags: u32,
        properties: Vec<u8>,
        root_component: Option<Guid>,
        default_subobjects: Vec<DefaultSubobjectRecord>,
    },
    /// Root of a nested prefab instance; the interior lives in the asset.
    SubPrefab {
        prefab_asset: u32,
        /// Parent-prefab GUID -> GUID inside the nested asset.
        guid_remap: BTreeMap<Guid, Guid>,
        /// Keyed by parent-prefab GUID.
        overrides: BTreeMap<Guid, OverrideParameterRecord>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorSaveRecord {
    pub guid: Guid,
    pub label: u32,
    pub body: ActorRecordBody,
    /// Sorted children; parents always precede their children.
    pub children: Vec<ActorSaveRecord>,
}

impl ActorSaveRecord {
    pub fn is_sub_prefab(&self) -> bool {
        matches!(self.body, ActorRecordBody::SubPrefab { .. })
    }

    /// Pre-order walk: each record together with its record-tree parent.
    pub fn walk(&self) -> Vec<(&ActorSaveRecord, Option<&ActorSaveRecord>)> {
        let mut out = Vec::new();
        let mut stack: Vec<(&ActorSaveRecord, Option<&ActorSaveRecord>)> = vec![(self, None)];
        while let Some((record, parent)) = stack.pop() {
            out.push((record, parent));
            for child in record.children.iter().rev() {
                stack.push((child, Some(record)));
            }
        }
        out
    }

    pub fn count(&self) -> usize {
        1 + self.children.iter().map(ActorSaveRecord::count).sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSaveRecord {
    pub guid: Guid,
    pub kind: NodeKind,
    pub class: u32,
    pub name: u32,
    pub flags: u32,
    pub outer: Guid,
    pub properties: Vec<u8>,
    pub scene_parent: Option<Guid>,
    pub default_subobjects: Vec<DefaultSubobjectRecord>,
}

/// Body of a current-format container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefabSaveData {
    pub root: ActorSaveRecord,
    /// In creation order: an object's outer always comes first.
    pub objects: Vec<ObjectSaveRecord>,
    /// Attachment of sub-prefab root components, child GUID -> parent GUID.
    pub scene_parents: BTreeMap<Guid, Guid>,
    pub tables: ReferenceTables,
}

impl PrefabSaveData {
    pub fn find_actor(&self, guid: Guid) -> Option<&ActorSaveRecord> {
        self.root
            .walk()
            .into_iter()
            .map(|(record, _)| record)
            .find(|record| record.guid == guid)
    }

    pub fn find_object(&self, guid: Guid) -> Option<&ObjectSaveRecord> {
        self.objects.iter().find(|o| o.guid == guid)
    }
}
