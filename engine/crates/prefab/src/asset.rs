use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::container::{self, ContainerHeader};
use crate::error::PrefabError;
use crate::records::PrefabSaveData;

/// A saved prefab: container bytes plus bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefabAsset {
    pub path: String,
    pub created_at_unix: u64,
    pub data: Vec<u8>,
}

impl PrefabAsset {
    /// Wrap container bytes, rejecting anything whose header does not parse.
    pub fn new(path: impl Into<String>, data: Vec<u8>) -> Result<Self, PrefabError> {
        container::read_header(&data)?;
        let created_at_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Ok(Self {
            path: path.into(),
            created_at_unix,
            data,
        })
    }

    pub fn header(&self) -> Result<ContainerHeader, PrefabError> {
        container::read_header(&self.data)
    }

    pub fn decode(&self) -> Result<PrefabSaveData, PrefabError> {
        container::read_container(&self.data).map(|(_, data)| data)
    }
}

/// Where nested prefab assets are loaded from and written back to.
pub trait PrefabAssetSource {
    fn load_asset(&self, path: &str) -> Result<PrefabAsset, PrefabError>;
    fn store_asset(&mut self, asset: PrefabAsset) -> Result<(), PrefabError>;
    fn contains(&self, path: &str) -> bool;
}

/// In-memory asset source.
#[derive(Debug, Clone, Default)]
pub struct PrefabLibrary {
    assets: BTreeMap<String, PrefabAsset>,
}

impl PrefabLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, data: Vec<u8>) -> Result<(), PrefabError> {
        self.store_asset(PrefabAsset::new(path, data)?)
    }

    pub fn remove(&mut self, path: &str) -> Option<PrefabAsset> {
        self.assets.remove(path)
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

impl PrefabAssetSource for PrefabLibrary {
    fn load_asset(&self, path: &str) -> Result<PrefabAsset, PrefabError> {
        self.assets
            .get(path)
            .cloned()
            .ok_or_else(|| PrefabError::UnknownAsset(path.to_string()))
    }

    fn store_asset(&mut self, asset: PrefabAsset) -> Result<(), PrefabError> {
        self.assets.insert(asset.path.clone(), asset);
        Ok(())
    }

    fn contains(&self, path: &str) -> bool {
        self.assets.contains_key(path)
    }
}
