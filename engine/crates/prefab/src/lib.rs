pub mod error;
pub mod config;
pub mod identity;
pub mod records;
pub mod container;
pub mod context;
pub mod collector;
pub mod sub_prefab;
pub mod asset;
pub mod serializer;
pub mod deserializer;
pub mod overrides;
pub mod store;
pub mod registry;

pub use error::{PrefabError, RootRejection};
pub use config::{HostVersions, LoadOptions, PrefabConfig, SaveMode, SaveOptions};
pub use identity::IdentityMap;
pub use records::{
    ActorRecordBody, ActorSaveRecord, ObjectSaveRecord, OverrideParameterRecord, PrefabSaveData,
    ReferenceTables,
};
pub use container::{ContainerHeader, CURRENT_FORMAT_VERSION, MIN_FORMAT_VERSION};
pub use collector::{ChildSorter, CollectedGraph, Collector};
pub use sub_prefab::{ObjectOverride, OverrideSet, SubPrefabData, SubPrefabMap};
pub use asset::{PrefabAsset, PrefabAssetSource, PrefabLibrary};
pub use serializer::{save_prefab, SaveStats, SavedPrefab, Serializer};
pub use deserializer::{load_prefab, Deserializer, LoadedPrefab};
pub use store::PrefabStore;
pub use registry::{PrefabInstance, PrefabInstanceRegistry};
