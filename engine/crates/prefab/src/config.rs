use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PrefabError;

/// Editor saves keep editor-only nodes; runtime saves drop them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveMode {
    #[default]
    Editor,
    Runtime,
}

/// Host version numbers stamped into every container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostVersions {
    pub engine_major: u16,
    pub engine_minor: u16,
    pub licensee: u32,
    pub engine_net_protocol: u32,
    pub game_net_protocol: u32,
}

impl Default for HostVersions {
    fn default() -> Self {
        Self {
            engine_major: 5,
            engine_minor: 3,
            licensee: 0,
            engine_net_protocol: 0,
            game_net_protocol: 0,
        }
    }
}

/// Fields of scene components that describe attachment; the container keeps
/// attachment in its own records instead.
pub const DEFAULT_SCENE_EXCLUSIONS: [&str; 3] = ["AttachParent", "AttachSocketName", "AttachChildren"];

#[derive(Debug, Clone)]
pub struct SaveOptions {
    pub mode: SaveMode,
    pub scene_component_excluded_fields: BTreeSet<String>,
    pub host: HostVersions,
    pub slow_save_warn_ms: u64,
}

impl SaveOptions {
    pub fn runtime() -> Self {
        Self {
            mode: SaveMode::Runtime,
            ..Self::default()
        }
    }
}

impl Default for SaveOptions {
    fn default() -> Self {
        SaveSection::default().to_options()
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub max_nesting_depth: usize,
    /// Fail instead of warn when a GUID in a property blob or an attachment
    /// cannot be resolved.
    pub strict_references: bool,
    pub slow_load_warn_ms: u64,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadSection::default().to_options()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SaveSection {
    pub mode: SaveMode,
    pub scene_component_excluded_fields: Vec<String>,
    pub host: HostVersions,
    pub slow_save_warn_ms: u64,
}

impl Default for SaveSection {
    fn default() -> Self {
        Self {
            mode: SaveMode::Editor,
            scene_component_excluded_fields: DEFAULT_SCENE_EXCLUSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            host: HostVersions::default(),
            slow_save_warn_ms: 100,
        }
    }
}

impl SaveSection {
    pub fn to_options(&self) -> SaveOptions {
        SaveOptions {
            mode: self.mode,
            scene_component_excluded_fields: self
                .scene_component_excluded_fields
                .iter()
                .cloned()
                .collect(),
            host: self.host,
            slow_save_warn_ms: self.slow_save_warn_ms,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoadSection {
    pub max_nesting_depth: usize,
    pub strict_references: bool,
    pub slow_load_warn_ms: u64,
}

impl Default for LoadSection {
    fn default() -> Self {
        Self {
            max_nesting_depth: 16,
            strict_references: false,
            slow_load_warn_ms: 100,
        }
    }
}

impl LoadSection {
    pub fn to_options(&self) -> LoadOptions {
        LoadOptions {
            max_nesting_depth: self.max_nesting_depth,
            strict_references: self.strict_references,
            slow_load_warn_ms: self.slow_load_warn_ms,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub asset_dir: String,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            asset_dir: "data/prefabs".to_string(),
        }
    }
}

/// Top-level prefab configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PrefabConfig {
    pub save: SaveSection,
    pub load: LoadSection,
    pub store: StoreSection,
}

impl PrefabConfig {
    /// Load configuration from an optional TOML file path; a missing file
    /// yields the defaults.
    pub fn load(config_path: Option<&Path>) -> Result<Self, PrefabError> {
        let config = match config_path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content)?
            }
            _ => Self::default(),
        };
        Ok(config)
    }

    pub fn save_options(&self) -> SaveOptions {
        self.save.to_options()
    }

    pub fn load_options(&self) -> LoadOptions {
        self.load.to_options()
    }

    pub fn asset_dir(&self) -> PathBuf {
        PathBuf::from(&self.store.asset_dir)
    }
}
