use std::collections::{BTreeMap, BTreeSet, HashMap};

use bevy_ecs::prelude::*;

use crate::error::ObjectModelError;
use crate::field::FieldValue;
use crate::host::{NewNode, ObjectModel};
use crate::types::{ClassName, NodeFlags, NodeId, NodeKind, WorldId};

#[derive(Component, Debug, Clone)]
struct NodeInfo {
    kind: NodeKind,
    class: ClassName,
    name: String,
    flags: NodeFlags,
    world: WorldId,
}

#[derive(Component, Debug)]
struct Outer(NodeId);

#[derive(Component, Debug, Default)]
struct Inner(Vec<NodeId>);

#[derive(Component, Debug)]
struct Label(String);

#[derive(Component, Debug)]
struct RootComponent(NodeId);

#[derive(Component, Debug)]
struct SceneParent(NodeId);

#[derive(Component, Debug, Default)]
struct SceneChildren(Vec<NodeId>);

#[derive(Component, Debug, Default)]
struct Fields(BTreeMap<String, FieldValue>);

/// A sub-object every instance of a class is constructed with.
#[derive(Debug, Clone)]
pub struct DefaultSubobject {
    pub name: String,
    pub class: ClassName,
    pub kind: NodeKind,
    /// Sibling scene component this one is attached to after construction.
    pub attach_to: Option<String>,
}

/// Construction-time description of a class.
#[derive(Debug, Clone)]
pub struct ClassDescriptor {
    pub class: ClassName,
    pub default_subobjects: Vec<DefaultSubobject>,
    /// Name of the default sub-object that becomes the root component.
    pub root_component: Option<String>,
    pub overridable_fields: BTreeSet<String>,
    pub default_fields: BTreeMap<String, FieldValue>,
}

impl ClassDescriptor {
    pub fn new(class: impl Into<ClassName>) -> Self {
        Self {
            class: class.into(),
            default_subobjects: Vec::new(),
            root_component: None,
            overridable_fields: BTreeSet::new(),
            default_fields: BTreeMap::new(),
        }
    }

    pub fn with_subobject(mut self, name: &str, class: &str, kind: NodeKind) -> Self {
        self.default_subobjects.push(DefaultSubobject {
            name: name.to_string(),
            class: ClassName::new(class),
            kind,
            attach_to: None,
        });
        self
    }

    pub fn with_attached_subobject(mut self, name: &str, class: &str, parent: &str) -> Self {
        self.default_subobjects.push(DefaultSubobject {
            name: name.to_string(),
            class: ClassName::new(class),
            kind: NodeKind::SceneComponent,
            attach_to: Some(parent.to_string()),
        });
        self
    }

    pub fn with_root(mut self, name: &str) -> Self {
        self.root_component = Some(name.to_string());
        self
    }

    pub fn with_overridable(mut self, fields: &[&str]) -> Self {
        self.overridable_fields
            .extend(fields.iter().map(|f| f.to_string()));
        self
    }

    pub fn with_default_field(mut self, name: &str, value: FieldValue) -> Self {
        self.default_fields.insert(name.to_string(), value);
        self
    }
}

/// In-memory host object model backed by a bevy `World`. A node id carries
/// its entity's index and generation, so a destroyed node's handle goes
/// stale as soon as bevy recycles the slot.
pub struct SceneWorld {
    world: World,
    classes: HashMap<ClassName, ClassDescriptor>,
}

impl SceneWorld {
    pub fn new() -> Self {
        Self {
            world: World::new(),
            classes: HashMap::new(),
        }
    }

    pub fn register_class(&mut self, descriptor: ClassDescriptor) {
        self.classes.insert(descriptor.class.clone(), descriptor);
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.world
            .iter_entities()
            .filter(|e| e.contains::<NodeInfo>())
            .count()
    }

    /// Spawn an actor with a label equal to its name.
    pub fn spawn_actor(
        &mut self,
        world: WorldId,
        class: &str,
        label: &str,
    ) -> Result<NodeId, ObjectModelError> {
        self.construct(NewNode::actor(world, class, label))
    }

    /// Add a component to an actor, attached under `attach_to` when given.
    pub fn add_component(
        &mut self,
        actor: NodeId,
        kind: NodeKind,
        class: &str,
        name: &str,
        attach_to: Option<NodeId>,
    ) -> Result<NodeId, ObjectModelError> {
        let world = self.world(actor).ok_or(ObjectModelError::NodeNotFound(actor))?;
        let comp = self.construct(NewNode::owned(kind, actor, world, class, name))?;
        if attach_to.is_some() {
            self.set_scene_parent(comp, attach_to)?;
        }
        Ok(comp)
    }

    pub fn field(&self, node: NodeId, name: &str) -> Option<&FieldValue> {
        self.get::<Fields>(node)?.0.get(name)
    }

    pub fn fields(&self, node: NodeId) -> Option<&BTreeMap<String, FieldValue>> {
        self.get::<Fields>(node).map(|f| &f.0)
    }

    pub fn set_field(
        &mut self,
        node: NodeId,
        name: &str,
        value: FieldValue,
    ) -> Result<(), ObjectModelError> {
        let mut fields = self
            .get_mut::<Fields>(node)
            .ok_or(ObjectModelError::NodeNotFound(node))?;
        fields.0.insert(name.to_string(), value);
        Ok(())
    }

    fn entity(&self, node: NodeId) -> Option<Entity> {
        let entity = Entity::try_from_bits(node.to_bits()).ok()?;
        // Generation-checked: a recycled slot does not answer for the old id.
        self.world.get::<NodeInfo>(entity).map(|_| entity)
    }

    fn get<C: Component>(&self, node: NodeId) -> Option<&C> {
        self.world.get::<C>(self.entity(node)?)
    }

    fn get_mut<C: Component>(&mut self, node: NodeId) -> Option<Mut<'_, C>> {
        let entity = self.entity(node)?;
        self.world.get_mut::<C>(entity)
    }

    fn info(&self, node: NodeId) -> Option<&NodeInfo> {
        self.get::<NodeInfo>(node)
    }

    fn require_kind(
        &self,
        node: NodeId,
        check: fn(NodeKind) -> bool,
        expected: &'static str,
    ) -> Result<(), ObjectModelError> {
        let info = self.info(node).ok_or(ObjectModelError::NodeNotFound(node))?;
        if check(info.kind) {
            Ok(())
        } else {
            Err(ObjectModelError::WrongKind { node, expected })
        }
    }

    fn build_defaults(&mut self, node: NodeId, world: WorldId, class: &ClassName) -> Result<(), ObjectModelError> {
        let Some(descriptor) = self.classes.get(class).cloned() else {
            return Ok(());
        };
        let mut built = HashMap::new();
        for sub in &descriptor.default_subobjects {
            let request = NewNode::owned(sub.kind, node, world, sub.class.clone(), sub.name.clone())
                .with_flags(NodeFlags::DEFAULT_SUBOBJECT);
            let id = self.construct(request)?;
            built.insert(sub.name.clone(), id);
        }
        for sub in &descriptor.default_subobjects {
            if let Some(parent) = sub.attach_to.as_ref().and_then(|p| built.get(p)) {
                self.set_scene_parent(built[&sub.name], Some(*parent))?;
            }
        }
        if let Some(root) = descriptor.root_component.as_ref().and_then(|r| built.get(r)) {
            self.set_root_component(node, Some(*root))?;
        }
        Ok(())
    }

    fn unlink_scene_child(&mut self, parent: NodeId, child: NodeId) {
        if let Some(mut children) = self.get_mut::<SceneChildren>(parent) {
            children.0.retain(|&c| c != child);
        }
    }
}

impl Default for SceneWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectModel for SceneWorld {
    fn is_valid(&self, node: NodeId) -> bool {
        self.entity(node).is_some()
    }

    fn kind(&self, node: NodeId) -> Option<NodeKind> {
        self.info(node).map(|i| i.kind)
    }

    fn class(&self, node: NodeId) -> Option<ClassName> {
        self.info(node).map(|i| i.class.clone())
    }

    fn flags(&self, node: NodeId) -> NodeFlags {
        self.info(node).map(|i| i.flags).unwrap_or_default()
    }

    fn name(&self, node: NodeId) -> Option<String> {
        self.info(node).map(|i| i.name.clone())
    }

    fn label(&self, node: NodeId) -> Option<String> {
        self.get::<Label>(node).map(|l| l.0.clone())
    }

    fn world(&self, node: NodeId) -> Option<WorldId> {
        self.info(node).map(|i| i.world)
    }

    fn outer(&self, node: NodeId) -> Option<NodeId> {
        self.get::<Outer>(node).map(|o| o.0)
    }

    fn inner_objects(&self, node: NodeId) -> Vec<NodeId> {
        self.get::<Inner>(node).map(|i| i.0.clone()).unwrap_or_default()
    }

    fn root_component(&self, actor: NodeId) -> Option<NodeId> {
        self.get::<RootComponent>(actor).map(|r| r.0)
    }

    fn scene_parent(&self, component: NodeId) -> Option<NodeId> {
        self.get::<SceneParent>(component).map(|p| p.0)
    }

    fn scene_children(&self, component: NodeId) -> Vec<NodeId> {
        self.get::<SceneChildren>(component)
            .map(|c| c.0.clone())
            .unwrap_or_default()
    }

    fn can_override(&self, node: NodeId, field: &str) -> bool {
        self.info(node)
            .and_then(|info| self.classes.get(&info.class))
            .map(|d| d.overridable_fields.contains(field))
            .unwrap_or(false)
    }

    fn construct(&mut self, request: NewNode) -> Result<NodeId, ObjectModelError> {
        match request.outer {
            Some(outer) if !self.is_valid(outer) => {
                return Err(ObjectModelError::NodeNotFound(outer));
            }
            None if !request.kind.is_actor() => {
                return Err(ObjectModelError::Construct {
                    class: request.class,
                    reason: "only actors may be constructed without an outer".to_string(),
                });
            }
            _ => {}
        }

        let defaults = self
            .classes
            .get(&request.class)
            .map(|d| d.default_fields.clone())
            .unwrap_or_default();
        let mut entity = self.world.spawn((
            NodeInfo {
                kind: request.kind,
                class: request.class.clone(),
                name: request.name.clone(),
                flags: request.flags,
                world: request.world,
            },
            Inner::default(),
            Fields(defaults),
        ));
        if request.kind.is_actor() {
            entity.insert(Label(request.name.clone()));
        }
        if request.kind.is_scene_component() {
            entity.insert(SceneChildren::default());
        }
        if let Some(outer) = request.outer {
            entity.insert(Outer(outer));
        }
        let id = NodeId::from_bits(entity.id().to_bits());

        if let Some(outer) = request.outer {
            if let Some(mut inner) = self.get_mut::<Inner>(outer) {
                inner.0.push(id);
            }
        }

        self.build_defaults(id, request.world, &request.class)?;
        tracing::trace!(node = %id, class = %request.class, "node constructed");
        Ok(id)
    }

    fn destroy(&mut self, node: NodeId) -> Result<(), ObjectModelError> {
        if !self.is_valid(node) {
            return Err(ObjectModelError::NodeNotFound(node));
        }
        for inner in self.inner_objects(node) {
            self.destroy(inner)?;
        }
        if let Some(outer) = self.outer(node) {
            if let Some(mut inner) = self.get_mut::<Inner>(outer) {
                inner.0.retain(|&n| n != node);
            }
            if self.root_component(outer) == Some(node) {
                self.set_root_component(outer, None)?;
            }
        }
        if let Some(parent) = self.scene_parent(node) {
            self.unlink_scene_child(parent, node);
        }
        for child in self.scene_children(node) {
            if let Some(entity) = self.entity(child) {
                self.world.entity_mut(entity).remove::<SceneParent>();
            }
        }

        let entity = self.entity(node).ok_or(ObjectModelError::NodeNotFound(node))?;
        self.world.despawn(entity);
        Ok(())
    }

    fn set_label(&mut self, actor: NodeId, label: &str) -> Result<(), ObjectModelError> {
        let mut current = self.get_mut::<Label>(actor).ok_or(ObjectModelError::WrongKind {
            node: actor,
            expected: "actor",
        })?;
        current.0 = label.to_string();
        Ok(())
    }

    fn set_root_component(
        &mut self,
        actor: NodeId,
        component: Option<NodeId>,
    ) -> Result<(), ObjectModelError> {
        self.require_kind(actor, NodeKind::is_actor, "actor")?;
        let entity = self.entity(actor).ok_or(ObjectModelError::NodeNotFound(actor))?;
        match component {
            Some(comp) => {
                self.require_kind(comp, NodeKind::is_scene_component, "scene component")?;
                self.world.entity_mut(entity).insert(RootComponent(comp));
            }
            None => {
                self.world.entity_mut(entity).remove::<RootComponent>();
            }
        }
        Ok(())
    }

    fn set_scene_parent(
        &mut self,
        component: NodeId,
        parent: Option<NodeId>,
    ) -> Result<(), ObjectModelError> {
        self.require_kind(component, NodeKind::is_scene_component, "scene component")?;
        if let Some(parent) = parent {
            self.require_kind(parent, NodeKind::is_scene_component, "scene component")?;
            let mut cursor = Some(parent);
            while let Some(c) = cursor {
                if c == component {
                    return Err(ObjectModelError::AttachCycle {
                        child: component,
                        parent,
                    });
                }
                cursor = self.scene_parent(c);
            }
        }

        if let Some(old) = self.scene_parent(component) {
            self.unlink_scene_child(old, component);
        }
        let entity = self
            .entity(component)
            .ok_or(ObjectModelError::NodeNotFound(component))?;
        match parent {
            Some(parent) => {
                self.world.entity_mut(entity).insert(SceneParent(parent));
                if let Some(mut children) = self.get_mut::<SceneChildren>(parent) {
                    children.0.push(component);
                }
            }
            None => {
                self.world.entity_mut(entity).remove::<SceneParent>();
            }
        }
        Ok(())
    }
}
