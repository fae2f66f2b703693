use std::io;

use object_model::{CodecError, NodeId, ObjectModelError};

/// Why a root node cannot be saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootRejection {
    Invalid,
    NotAnActor,
    NoWorld,
    Transient,
    EditorOnlyInRuntime,
}

impl std::fmt::Display for RootRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            RootRejection::Invalid => "node is not valid",
            RootRejection::NotAnActor => "node is not an actor",
            RootRejection::NoWorld => "node has no world",
            RootRejection::Transient => "node is transient",
            RootRejection::EditorOnlyInRuntime => "node is editor-only and the save is in runtime mode",
        };
        f.write_str(text)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PrefabError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not a prefab container (magic {0:?})")]
    BadMagic([u8; 4]),

    #[error("unsupported container version {got} (supported {min}..={max})")]
    UnsupportedVersion { got: u32, min: u32, max: u32 },

    #[error("corrupt prefab: {0}")]
    Corrupt(String),

    #[error("cannot save from root {root}: {reason}")]
    InvalidRoot { root: NodeId, reason: RootRejection },

    #[error("node {0} has no GUID in this session")]
    UnmappedNode(NodeId),

    #[error("unknown prefab asset: {0}")]
    UnknownAsset(String),

    #[error("prefab asset {0} contains itself")]
    RecursivePrefab(String),

    #[error("sub-prefab nesting deeper than {max}")]
    NestingTooDeep { max: usize },

    #[error("node {0} is not a sub-prefab root")]
    NotSubPrefab(NodeId),

    #[error("field {field} of node {node} cannot be overridden")]
    NotOverridable { node: NodeId, field: String },

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Host(#[from] ObjectModelError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<bincode::Error> for PrefabError {
    fn from(e: bincode::Error) -> Self {
        PrefabError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for PrefabError {
    fn from(e: toml::de::Error) -> Self {
        PrefabError::Config(e.to_string())
    }
}
