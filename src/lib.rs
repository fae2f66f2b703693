//! Prefab serialization for actor hierarchies: save a live hierarchy into a
//! versioned binary container, load it back with nested prefabs and their
//! per-instance overrides, and keep sequence bindings pointed at the right
//! nodes across reloads.

pub use object_model::{
    ClassDescriptor, ClassName, FieldCodec, FieldValue, Guid, NodeFlags, NodeId, NodeKind,
    ObjectModel, PropertyCodec, SceneWorld, WorldId,
};
pub use prefab::{
    load_prefab, save_prefab, IdentityMap, LoadOptions, LoadedPrefab, OverrideSet, PrefabAsset,
    PrefabAssetSource, PrefabConfig, PrefabError, PrefabInstanceRegistry, PrefabLibrary,
    PrefabStore, SaveMode, SaveOptions, SavedPrefab, SubPrefabData, SubPrefabMap,
};
pub use sequence_binding::{ReferenceState, SequenceBindingMap, SequenceObjectReference};

pub use observability::init_logging;
