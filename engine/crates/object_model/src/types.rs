use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generational handle to a live node in the host object model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct NodeId {
    pub index: u32,
    pub generation: u32,
}

impl NodeId {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Packed as generation (high half) and index (low half), the layout of
    /// a bevy entity's bits.
    pub(crate) fn to_bits(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub(crate) fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "N({}v{})", self.index, self.generation)
    }
}

/// 128-bit stable identifier of a node inside one prefab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Guid(Uuid);

impl Guid {
    /// Allocate a fresh random id.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    pub fn as_u128(&self) -> u128 {
        self.0.as_u128()
    }
}

impl std::fmt::Display for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Identifies the world (level) a node lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct WorldId(pub u32);

/// Name of a node's class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ClassName(pub String);

impl ClassName {
    /// Class name every plain actor uses.
    pub const ACTOR: &'static str = "Actor";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn actor() -> Self {
        Self::new(Self::ACTOR)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClassName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClassName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Closed set of node kinds the prefab engine distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Actor,
    /// Component with a place in the spatial attachment tree.
    SceneComponent,
    ActorComponent,
    Object,
}

impl NodeKind {
    pub fn is_actor(self) -> bool {
        matches!(self, Self::Actor)
    }

    pub fn is_component(self) -> bool {
        matches!(self, Self::SceneComponent | Self::ActorComponent)
    }

    pub fn is_scene_component(self) -> bool {
        matches!(self, Self::SceneComponent)
    }
}

/// Lifecycle and ownership flags carried by every node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeFlags(pub u32);

impl NodeFlags {
    pub const NONE: NodeFlags = NodeFlags(0);
    pub const PUBLIC: NodeFlags = NodeFlags(1 << 0);
    /// Never persisted.
    pub const TRANSIENT: NodeFlags = NodeFlags(1 << 1);
    /// Dropped when saving for runtime use.
    pub const EDITOR_ONLY: NodeFlags = NodeFlags(1 << 2);
    /// Created implicitly by the outer's class construction.
    pub const DEFAULT_SUBOBJECT: NodeFlags = NodeFlags(1 << 3);
    pub const ARCHETYPE: NodeFlags = NodeFlags(1 << 4);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn contains(self, other: NodeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: NodeFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: NodeFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: NodeFlags) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for NodeFlags {
    type Output = NodeFlags;

    fn bitor(self, rhs: NodeFlags) -> NodeFlags {
        NodeFlags(self.0 | rhs.0)
    }
}
