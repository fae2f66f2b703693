use crate::error::ObjectModelError;
use crate::types::{ClassName, NodeFlags, NodeId, NodeKind, WorldId};

/// Everything needed to construct one node.
#[derive(Debug, Clone)]
pub struct NewNode {
    pub kind: NodeKind,
    pub class: ClassName,
    pub name: String,
    /// Owning node; `None` only for actors placed directly in a world.
    pub outer: Option<NodeId>,
    pub world: WorldId,
    pub flags: NodeFlags,
}

impl NewNode {
    pub fn actor(world: WorldId, class: impl Into<ClassName>, name: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Actor,
            class: class.into(),
            name: name.into(),
            outer: None,
            world,
            flags: NodeFlags::PUBLIC,
        }
    }

    pub fn owned(
        kind: NodeKind,
        outer: NodeId,
        world: WorldId,
        class: impl Into<ClassName>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            class: class.into(),
            name: name.into(),
            outer: Some(outer),
            world,
            flags: NodeFlags::NONE,
        }
    }

    pub fn with_flags(mut self, flags: NodeFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// The host object model the prefab engine walks and rebuilds.
///
/// Actor attachment is derived from scene components: an actor is attached
/// to another when its root component's scene parent is owned by that actor.
pub trait ObjectModel {
    fn is_valid(&self, node: NodeId) -> bool;
    fn kind(&self, node: NodeId) -> Option<NodeKind>;
    fn class(&self, node: NodeId) -> Option<ClassName>;
    fn flags(&self, node: NodeId) -> NodeFlags;
    fn name(&self, node: NodeId) -> Option<String>;
    /// Display label of an actor; other nodes have none.
    fn label(&self, node: NodeId) -> Option<String>;
    fn world(&self, node: NodeId) -> Option<WorldId>;
    fn outer(&self, node: NodeId) -> Option<NodeId>;
    /// Nodes whose outer is `node`, in creation order.
    fn inner_objects(&self, node: NodeId) -> Vec<NodeId>;
    fn root_component(&self, actor: NodeId) -> Option<NodeId>;
    fn scene_parent(&self, component: NodeId) -> Option<NodeId>;
    /// Components attached to `component`, in attachment order.
    fn scene_children(&self, component: NodeId) -> Vec<NodeId>;
    /// Whether a field may be overridden per sub-prefab instance.
    fn can_override(&self, node: NodeId, field: &str) -> bool;

    fn construct(&mut self, request: NewNode) -> Result<NodeId, ObjectModelError>;
    /// Destroy a node together with everything it owns.
    fn destroy(&mut self, node: NodeId) -> Result<(), ObjectModelError>;
    fn set_label(&mut self, actor: NodeId, label: &str) -> Result<(), ObjectModelError>;
    fn set_root_component(
        &mut self,
        actor: NodeId,
        component: Option<NodeId>,
    ) -> Result<(), ObjectModelError>;
    fn set_scene_parent(
        &mut self,
        component: NodeId,
        parent: Option<NodeId>,
    ) -> Result<(), ObjectModelError>;

    fn is_transient(&self, node: NodeId) -> bool {
        self.flags(node).contains(NodeFlags::TRANSIENT)
    }

    fn is_editor_only(&self, node: NodeId) -> bool {
        self.flags(node).contains(NodeFlags::EDITOR_ONLY)
    }

    /// The actor at the end of `node`'s outer chain (the node itself for actors).
    fn owning_actor(&self, node: NodeId) -> Option<NodeId> {
        let mut current = Some(node);
        while let Some(n) = current {
            if self.kind(n)?.is_actor() {
                return Some(n);
            }
            current = self.outer(n);
        }
        None
    }

    fn components(&self, actor: NodeId) -> Vec<NodeId> {
        self.inner_objects(actor)
            .into_iter()
            .filter(|&n| self.kind(n).map(NodeKind::is_component).unwrap_or(false))
            .collect()
    }

    fn components_of_class(&self, actor: NodeId, class: &ClassName) -> Vec<NodeId> {
        self.components(actor)
            .into_iter()
            .filter(|&n| self.class(n).as_ref() == Some(class))
            .collect()
    }

    fn default_subobjects(&self, node: NodeId) -> Vec<NodeId> {
        self.inner_objects(node)
            .into_iter()
            .filter(|&n| self.flags(n).contains(NodeFlags::DEFAULT_SUBOBJECT))
            .collect()
    }

    fn find_inner_object(&self, outer: NodeId, name: &str) -> Option<NodeId> {
        self.inner_objects(outer)
            .into_iter()
            .find(|&n| self.name(n).as_deref() == Some(name))
    }

    fn attach_parent_actor(&self, actor: NodeId) -> Option<NodeId> {
        let root = self.root_component(actor)?;
        let parent = self.scene_parent(root)?;
        self.owning_actor(parent)
    }

    /// Actors directly attached beneath `actor`, in attachment order.
    fn attached_actors(&self, actor: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        for comp in self.components(actor) {
            for child in self.scene_children(comp) {
                let Some(owner) = self.owning_actor(child) else {
                    continue;
                };
                if owner != actor
                    && self.root_component(owner) == Some(child)
                    && !result.contains(&owner)
                {
                    result.push(owner);
                }
            }
        }
        result
    }

    /// True if `ancestor` appears anywhere above `actor` in the attachment tree.
    fn is_attached_to(&self, actor: NodeId, ancestor: NodeId) -> bool {
        let mut current = self.attach_parent_actor(actor);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.attach_parent_actor(parent);
        }
        false
    }

    /// Attach `child`'s root component to `parent`'s root component.
    fn attach_actor(&mut self, child: NodeId, parent: NodeId) -> Result<(), ObjectModelError> {
        let child_root = self.root_component(child).ok_or(ObjectModelError::WrongKind {
            node: child,
            expected: "actor with a root component",
        })?;
        let parent_root = self.root_component(parent).ok_or(ObjectModelError::WrongKind {
            node: parent,
            expected: "actor with a root component",
        })?;
        if child == parent || self.is_attached_to(parent, child) {
            return Err(ObjectModelError::AttachCycle { child, parent });
        }
        self.set_scene_parent(child_root, Some(parent_root))
    }

    fn detach_actor(&mut self, actor: NodeId) -> Result<(), ObjectModelError> {
        match self.root_component(actor) {
            Some(root) => self.set_scene_parent(root, None),
            None => Ok(()),
        }
    }
}
