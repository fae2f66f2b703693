use std::collections::{BTreeMap, HashMap};

use object_model::Guid;
use serde::{Deserialize, Serialize};

use crate::config::{HostVersions, SaveMode};
use crate::error::PrefabError;
use crate::records::{ActorRecordBody, ActorSaveRecord, ObjectSaveRecord, PrefabSaveData, ReferenceTables};

pub const MAGIC: [u8; 4] = *b"LPFB";
/// Nested actor tree, parents before children.
pub const CURRENT_FORMAT_VERSION: u32 = 2;
/// Flat actor list, children before parents, with parent links.
pub const LEGACY_FORMAT_VERSION: u32 = 1;
pub const MIN_FORMAT_VERSION: u32 = LEGACY_FORMAT_VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHeader {
    pub magic: [u8; 4],
    pub format_version: u32,
    pub host: HostVersions,
    pub mode: SaveMode,
}

impl ContainerHeader {
    pub fn current(host: HostVersions, mode: SaveMode) -> Self {
        Self {
            magic: MAGIC,
            format_version: CURRENT_FORMAT_VERSION,
            host,
            mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyActorRecord {
    pub guid: Guid,
    pub parent: Option<Guid>,
    pub label: u32,
    pub body: ActorRecordBody,
}

/// Body of a format-1 container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacySaveData {
    /// Leaf-to-root: every actor appears after all of its descendants.
    pub actors: Vec<LegacyActorRecord>,
    pub objects: Vec<ObjectSaveRecord>,
    pub scene_parents: BTreeMap<Guid, Guid>,
    pub tables: ReferenceTables,
}

impl LegacySaveData {
    /// Flatten a current body into the legacy leaf-to-root layout.
    pub fn from_current(data: &PrefabSaveData) -> Self {
        let mut actors = Vec::new();
        flatten(&data.root, None, &mut actors);
        Self {
            actors,
            objects: data.objects.clone(),
            scene_parents: data.scene_parents.clone(),
            tables: data.tables.clone(),
        }
    }

    /// Rebuild the nested actor tree. Sibling order is the order siblings
    /// appear in the flat list.
    pub fn upgrade(self) -> Result<PrefabSaveData, PrefabError> {
        let mut roots = Vec::new();
        let mut children_of: HashMap<Guid, Vec<Guid>> = HashMap::new();
        let mut records: HashMap<Guid, LegacyActorRecord> = HashMap::new();
        for record in self.actors {
            match record.parent {
                Some(parent) => children_of.entry(parent).or_default().push(record.guid),
                None => roots.push(record.guid),
            }
            if records.insert(record.guid, record).is_some() {
                return Err(PrefabError::Corrupt("duplicate actor GUID in legacy body".into()));
            }
        }
        let root = match roots.as_slice() {
            [root] => *root,
            _ => {
                return Err(PrefabError::Corrupt(format!(
                    "legacy body has {} root actors",
                    roots.len()
                )))
            }
        };
        let total = records.len();
        let tree = build_tree(root, &mut records, &mut children_of)?;
        if tree.count() != total {
            return Err(PrefabError::Corrupt("legacy actor parent links are broken".into()));
        }
        Ok(PrefabSaveData {
            root: tree,
            objects: self.objects,
            scene_parents: self.scene_parents,
            tables: self.tables,
        })
    }
}

fn flatten(record: &ActorSaveRecord, parent: Option<Guid>, out: &mut Vec<LegacyActorRecord>) {
    for child in &record.children {
        flatten(child, Some(record.guid), out);
    }
    out.push(LegacyActorRecord {
        guid: record.guid,
        parent,
        label: record.label,
        body: record.body.clone(),
    });
}

fn build_tree(
    guid: Guid,
    records: &mut HashMap<Guid, LegacyActorRecord>,
    children_of: &mut HashMap<Guid, Vec<Guid>>,
) -> Result<ActorSaveRecord, PrefabError> {
    let record = records
        .remove(&guid)
        .ok_or_else(|| PrefabError::Corrupt(format!("legacy actor {guid} visited twice")))?;
    let mut children = Vec::new();
    for child in children_of.remove(&guid).unwrap_or_default() {
        children.push(build_tree(child, records, children_of)?);
    }
    Ok(ActorSaveRecord {
        guid: record.guid,
        label: record.label,
        body: record.body,
        children,
    })
}

pub fn write_container(header: &ContainerHeader, data: &PrefabSaveData) -> Result<Vec<u8>, PrefabError> {
    let mut bytes = bincode::serialize(header)?;
    bincode::serialize_into(&mut bytes, data)?;
    Ok(bytes)
}

pub fn write_legacy_container(
    host: HostVersions,
    mode: SaveMode,
    data: &LegacySaveData,
) -> Result<Vec<u8>, PrefabError> {
    let header = ContainerHeader {
        format_version: LEGACY_FORMAT_VERSION,
        ..ContainerHeader::current(host, mode)
    };
    let mut bytes = bincode::serialize(&header)?;
    bincode::serialize_into(&mut bytes, data)?;
    Ok(bytes)
}

/// Validate and decode only the header.
pub fn read_header(bytes: &[u8]) -> Result<ContainerHeader, PrefabError> {
    let mut reader = bytes;
    read_header_from(&mut reader)
}

fn read_header_from(reader: &mut &[u8]) -> Result<ContainerHeader, PrefabError> {
    if reader.len() < MAGIC.len() {
        return Err(PrefabError::Corrupt("container shorter than its magic".into()));
    }
    if reader[..MAGIC.len()] != MAGIC {
        let mut found = [0u8; 4];
        found.copy_from_slice(&reader[..MAGIC.len()]);
        return Err(PrefabError::BadMagic(found));
    }
    let header: ContainerHeader = bincode::deserialize_from(&mut *reader)
        .map_err(|e| PrefabError::Corrupt(format!("header: {e}")))?;
    if !(MIN_FORMAT_VERSION..=CURRENT_FORMAT_VERSION).contains(&header.format_version) {
        return Err(PrefabError::UnsupportedVersion {
            got: header.format_version,
            min: MIN_FORMAT_VERSION,
            max: CURRENT_FORMAT_VERSION,
        });
    }
    Ok(header)
}

/// Decode a container, upgrading legacy bodies to the current layout.
pub fn read_container(bytes: &[u8]) -> Result<(ContainerHeader, PrefabSaveData), PrefabError> {
    let mut reader = bytes;
    let header = read_header_from(&mut reader)?;
    let body = |e: bincode::Error| PrefabError::Corrupt(format!("body: {e}"));
    let data = match header.format_version {
        LEGACY_FORMAT_VERSION => {
            let legacy: LegacySaveData = bincode::deserialize_from(&mut reader).map_err(body)?;
            tracing::info!(actors = legacy.actors.len(), "upgrading legacy prefab container");
            legacy.upgrade()?
        }
        _ => bincode::deserialize_from(&mut reader).map_err(body)?,
    };
    if !reader.is_empty() {
        return Err(PrefabError::Corrupt(format!("{} trailing bytes", reader.len())));
    }
    Ok((header, data))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(n: u128, label: u32, children: Vec<ActorSaveRecord>) -> ActorSaveRecord {
        ActorSaveRecord {
            guid: Guid::from_u128(n),
            label,
            body: ActorRecordBody::Actor {
                class: 0,
                name: label,
                flags: 0,
                properties: vec![0; 8],
                root_component: None,
                default_subobjects: Vec::new(),
            },
            children,
        }
    }

    fn sample() -> PrefabSaveData {
        let mut tables = ReferenceTables::default();
        tables.class_index("Actor");
        for name in ["Root", "A", "A1", "B"] {
            tables.name_index(name);
        }
        PrefabSaveData {
            root: actor(1, 0, vec![actor(2, 1, vec![actor(3, 2, vec![])]), actor(4, 3, vec![])]),
            objects: Vec::new(),
            scene_parents: BTreeMap::new(),
            tables,
        }
    }

    #[test]
    fn current_container_roundtrip() {
        let data = sample();
        let header = ContainerHeader::current(HostVersions::default(), SaveMode::Editor);
        let bytes = write_container(&header, &data).unwrap();
        assert_eq!(&bytes[..4], b"LPFB");
        let (read_header, read_data) = read_container(&bytes).unwrap();
        assert_eq!(read_header, header);
        assert_eq!(read_data, data);
    }

    #[test]
    fn legacy_layout_is_leaf_to_root() {
        let legacy = LegacySaveData::from_current(&sample());
        let order: Vec<u128> = legacy.actors.iter().map(|a| a.guid.as_u128()).collect();
        assert_eq!(order, vec![3, 2, 4, 1]);
        assert_eq!(legacy.actors[0].parent, Some(Guid::from_u128(2)));
        assert_eq!(legacy.actors[3].parent, None);
    }

    #[test]
    fn legacy_container_upgrades() {
        let data = sample();
        let bytes = write_legacy_container(
            HostVersions::default(),
            SaveMode::Runtime,
            &LegacySaveData::from_current(&data),
        )
        .unwrap();
        let (header, upgraded) = read_container(&bytes).unwrap();
        assert_eq!(header.format_version, LEGACY_FORMAT_VERSION);
        assert_eq!(upgraded, data);
    }

    #[test]
    fn legacy_with_two_roots_is_corrupt() {
        let mut legacy = LegacySaveData::from_current(&sample());
        legacy.actors[0].parent = None;
        assert!(matches!(legacy.upgrade(), Err(PrefabError::Corrupt(_))));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = write_container(
            &ContainerHeader::current(HostVersions::default(), SaveMode::Editor),
            &sample(),
        )
        .unwrap();
        bytes[0] = b'X';
        assert!(matches!(read_container(&bytes), Err(PrefabError::BadMagic(_))));
        assert!(matches!(read_header(b"LP"), Err(PrefabError::Corrupt(_))));
    }

    #[test]
    fn future_version_is_rejected() {
        let header = ContainerHeader {
            format_version: CURRENT_FORMAT_VERSION + 1,
            ..ContainerHeader::current(HostVersions::default(), SaveMode::Editor)
        };
        let bytes = write_container(&header, &sample()).unwrap();
        assert!(matches!(
            read_container(&bytes),
            Err(PrefabError::UnsupportedVersion { got: 3, min: 1, max: 2 })
        ));
    }

    #[test]
    fn truncated_and_padded_bodies_are_corrupt() {
        let bytes = write_container(
            &ContainerHeader::current(HostVersions::default(), SaveMode::Editor),
            &sample(),
        )
        .unwrap();
        assert!(matches!(
            read_container(&bytes[..bytes.len() - 3]),
            Err(PrefabError::Corrupt(_))
        ));
        let mut padded = bytes.clone();
        padded.push(0);
        assert!(matches!(read_container(&padded), Err(PrefabError::Corrupt(_))));
    }
}
