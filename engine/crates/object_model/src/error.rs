use crate::types::{ClassName, Guid, NodeId};

#[derive(Debug, thiserror::Error)]
pub enum ObjectModelError {
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("node {node} is not a {expected}")]
    WrongKind { node: NodeId, expected: &'static str },

    #[error("cannot attach {child} to {parent}: would create a cycle")]
    AttachCycle { child: NodeId, parent: NodeId },

    #[error("class {class} cannot be constructed: {reason}")]
    Construct { class: ClassName, reason: String },
}

/// Failure inside a property codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("name index {0} is not in the name table")]
    MissingName(u32),

    #[error("asset index {0} is not in the asset table")]
    MissingAsset(u32),

    #[error("object reference {0} does not resolve")]
    UnresolvedReference(Guid),
}

impl From<bincode::Error> for CodecError {
    fn from(e: bincode::Error) -> Self {
        CodecError::Serialization(e.to_string())
    }
}
