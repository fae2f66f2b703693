use std::collections::HashMap;

use object_model::{Guid, NodeId, ObjectModel};

use crate::error::PrefabError;

/// Bidirectional node <-> GUID map for one save or load session.
///
/// A node never changes GUID once mapped, and a GUID never points at two
/// nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityMap {
    by_node: HashMap<NodeId, Guid>,
    by_guid: HashMap<Guid, NodeId>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the entries of `previous` whose node is still alive in `model`.
    pub fn seeded_from<M: ObjectModel + ?Sized>(previous: &IdentityMap, model: &M) -> Self {
        let mut map = Self::new();
        let mut dropped = 0usize;
        for (node, guid) in previous.entries() {
            if model.is_valid(node) {
                map.insert(node, guid);
            } else {
                dropped += 1;
            }
        }
        if dropped > 0 {
            tracing::debug!(dropped, "dropped identity entries for dead nodes");
        }
        map
    }

    pub fn get_or_create(&mut self, node: NodeId) -> Guid {
        if let Some(guid) = self.by_node.get(&node) {
            return *guid;
        }
        let mut guid = Guid::new_random();
        while self.by_guid.contains_key(&guid) {
            guid = Guid::new_random();
        }
        self.by_node.insert(node, guid);
        self.by_guid.insert(guid, node);
        guid
    }

    /// Record `node -> guid`. Returns false, leaving the map unchanged, if
    /// either side is already mapped to something else.
    pub fn insert(&mut self, node: NodeId, guid: Guid) -> bool {
        match (self.by_node.get(&node), self.by_guid.get(&guid)) {
            (Some(existing), _) => *existing == guid,
            (None, Some(_)) => false,
            (None, None) => {
                self.by_node.insert(node, guid);
                self.by_guid.insert(guid, node);
                true
            }
        }
    }

    pub fn guid_of(&self, node: NodeId) -> Option<Guid> {
        self.by_node.get(&node).copied()
    }

    pub fn node_of(&self, guid: Guid) -> Option<NodeId> {
        self.by_guid.get(&guid).copied()
    }

    pub fn require(&self, node: NodeId) -> Result<Guid, PrefabError> {
        self.guid_of(node).ok_or(PrefabError::UnmappedNode(node))
    }

    pub fn contains_node(&self, node: NodeId) -> bool {
        self.by_node.contains_key(&node)
    }

    pub fn len(&self) -> usize {
        self.by_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_node.is_empty()
    }

    /// All entries ordered by node id.
    pub fn entries(&self) -> Vec<(NodeId, Guid)> {
        let mut entries: Vec<(NodeId, Guid)> =
            self.by_node.iter().map(|(n, g)| (*n, *g)).collect();
        entries.sort();
        entries
    }

    /// True if every entry of `other` is present here with the same GUID.
    pub fn is_superset_of(&self, other: &IdentityMap) -> bool {
        other
            .by_node
            .iter()
            .all(|(node, guid)| self.by_node.get(node) == Some(guid))
    }
}
