use std::path::{Component, Path, PathBuf};

use crate::asset::{PrefabAsset, PrefabAssetSource};
use crate::error::PrefabError;

const EXTENSION: &str = "lprefab";

/// Prefab assets on disk, one file per asset path.
pub struct PrefabStore {
    root_dir: PathBuf,
}

impl PrefabStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// File backing an asset path such as `/Game/Props/Lamp`.
    pub fn file_for(&self, asset_path: &str) -> Result<PathBuf, PrefabError> {
        let relative = Path::new(asset_path.trim_start_matches('/'));
        let plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !plain || relative.as_os_str().is_empty() {
            return Err(PrefabError::UnknownAsset(asset_path.to_string()));
        }
        Ok(self.root_dir.join(format!("{}.{EXTENSION}", relative.display())))
    }
}

impl PrefabAssetSource for PrefabStore {
    fn load_asset(&self, path: &str) -> Result<PrefabAsset, PrefabError> {
        let file = self.file_for(path)?;
        if !file.exists() {
            return Err(PrefabError::UnknownAsset(path.to_string()));
        }
        let bytes = std::fs::read(&file)?;
        let asset: PrefabAsset = bincode::deserialize(&bytes)?;
        if asset.path != path {
            return Err(PrefabError::Corrupt(format!(
                "{} holds asset {}, expected {path}",
                file.display(),
                asset.path
            )));
        }
        asset.header()?;
        tracing::info!(prefab = %path, bytes = bytes.len(), "prefab asset loaded");
        Ok(asset)
    }

    fn store_asset(&mut self, asset: PrefabAsset) -> Result<(), PrefabError> {
        let file = self.file_for(&asset.path)?;
        if let Some(dir) = file.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let bytes = bincode::serialize(&asset)?;

        // Write to a temp file first, then rename over the old asset.
        let tmp = file.with_extension(format!("{EXTENSION}.tmp"));
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &file)?;

        tracing::info!(
            prefab = %asset.path,
            bytes = bytes.len(),
            file = %file.display(),
            "prefab asset saved"
        );
        Ok(())
    }

    fn contains(&self, path: &str) -> bool {
        self.file_for(path).map(|f| f.exists()).unwrap_or(false)
    }
}
