pub mod types;
pub mod error;
pub mod field;
pub mod host;
pub mod codec;
pub mod scene_world;
pub mod hierarchy;

pub use types::{ClassName, Guid, NodeFlags, NodeId, NodeKind, WorldId};
pub use error::{CodecError, ObjectModelError};
pub use field::FieldValue;
pub use host::{NewNode, ObjectModel};
pub use codec::{DecodeContext, EncodeContext, FieldCodec, FieldFilter, PropertyCodec};
pub use scene_world::{ClassDescriptor, DefaultSubobject, SceneWorld};
