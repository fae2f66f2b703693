//! Codec contexts binding GUID lookups to a container's reference tables.

use object_model::{DecodeContext, EncodeContext, Guid, NodeId};

use crate::records::ReferenceTables;

pub struct SaveContext<'a> {
    pub guid_of: &'a dyn Fn(NodeId) -> Option<Guid>,
    pub tables: &'a mut ReferenceTables,
}

impl EncodeContext for SaveContext<'_> {
    fn node_guid(&self, node: NodeId) -> Option<Guid> {
        (self.guid_of)(node)
    }

    fn asset_index(&mut self, path: &str) -> u32 {
        self.tables.asset_index(path)
    }

    fn name_index(&mut self, name: &str) -> u32 {
        self.tables.name_index(name)
    }
}

pub struct LoadContext<'a> {
    pub node_for: &'a dyn Fn(Guid) -> Option<NodeId>,
    pub tables: &'a ReferenceTables,
    pub strict: bool,
}

impl DecodeContext for LoadContext<'_> {
    fn node_for(&self, guid: Guid) -> Option<NodeId> {
        (self.node_for)(guid)
    }

    fn asset_path(&self, index: u32) -> Option<&str> {
        self.tables.asset(index)
    }

    fn name(&self, index: u32) -> Option<&str> {
        self.tables.name(index)
    }

    fn strict_references(&self) -> bool {
        self.strict
    }
}
