use std::collections::{HashSet, VecDeque};

use object_model::{NodeId, ObjectModel};

use crate::config::SaveMode;
use crate::error::{PrefabError, RootRejection};
use crate::identity::IdentityMap;
use crate::sub_prefab::SubPrefabMap;

/// Hook that reorders an actor's children before they are serialized.
pub trait ChildSorter {
    fn sort_children(&self, parent: NodeId, children: &mut Vec<NodeId>);
}

impl<F> ChildSorter for F
where
    F: Fn(NodeId, &mut Vec<NodeId>),
{
    fn sort_children(&self, parent: NodeId, children: &mut Vec<NodeId>) {
        self(parent, children)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectedKind {
    Full,
    SubPrefab,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedActor {
    pub node: NodeId,
    pub kind: CollectedKind,
    pub children: Vec<CollectedActor>,
}

#[derive(Debug, Clone)]
pub struct CollectedGraph {
    pub root: CollectedActor,
    /// Non-actor nodes of full actors; outers precede inners.
    pub objects: Vec<NodeId>,
    /// Every node that received a GUID in this pass.
    pub session: HashSet<NodeId>,
}

impl CollectedGraph {
    /// Emitted actors in pre-order.
    pub fn actors(&self) -> Vec<&CollectedActor> {
        let mut out = Vec::new();
        let mut stack = vec![&self.root];
        while let Some(actor) = stack.pop() {
            out.push(actor);
            stack.extend(actor.children.iter().rev());
        }
        out
    }
}

/// Check the save preconditions on `root`.
pub fn validate_root<M: ObjectModel + ?Sized>(
    model: &M,
    root: NodeId,
    mode: SaveMode,
) -> Result<(), PrefabError> {
    let reject = |reason| Err(PrefabError::InvalidRoot { root, reason });
    if !model.is_valid(root) {
        return reject(RootRejection::Invalid);
    }
    if !model.kind(root).map(|k| k.is_actor()).unwrap_or(false) {
        return reject(RootRejection::NotAnActor);
    }
    if model.world(root).is_none() {
        return reject(RootRejection::NoWorld);
    }
    if model.is_transient(root) {
        return reject(RootRejection::Transient);
    }
    if mode == SaveMode::Runtime && model.is_editor_only(root) {
        return reject(RootRejection::EditorOnlyInRuntime);
    }
    Ok(())
}

/// Depth-first walk of an actor hierarchy that assigns GUIDs and decides
/// which nodes get full records.
pub struct Collector<'a, M: ?Sized> {
    model: &'a M,
    sub_prefabs: &'a SubPrefabMap,
    mode: SaveMode,
    sorter: Option<&'a dyn ChildSorter>,
    interior: HashSet<NodeId>,
}

impl<'a, M: ObjectModel + ?Sized> Collector<'a, M> {
    pub fn new(model: &'a M, sub_prefabs: &'a SubPrefabMap, mode: SaveMode) -> Self {
        let interior = sub_prefabs
            .iter()
            .flat_map(|(root, data)| data.instance_nodes().filter(move |n| n != root))
            .collect();
        Self {
            model,
            sub_prefabs,
            mode,
            sorter: None,
            interior,
        }
    }

    pub fn with_sorter(mut self, sorter: &'a dyn ChildSorter) -> Self {
        self.sorter = Some(sorter);
        self
    }

    pub fn collect(&self, root: NodeId, identity: &mut IdentityMap) -> Result<CollectedGraph, PrefabError> {
        validate_root(self.model, root, self.mode)?;

        let mut session = HashSet::new();
        let mut emitted = Vec::new();
        self.visit(root, identity, &mut session, &mut emitted);
        let root_actor = match emitted.pop() {
            Some(actor) if emitted.is_empty() => actor,
            _ => {
                return Err(PrefabError::InvalidRoot {
                    root,
                    reason: RootRejection::Invalid,
                })
            }
        };

        let mut graph = CollectedGraph {
            root: root_actor,
            objects: Vec::new(),
            session,
        };
        let full: Vec<NodeId> = graph
            .actors()
            .iter()
            .filter(|a| a.kind == CollectedKind::Full)
            .map(|a| a.node)
            .collect();
        for actor in full {
            self.collect_objects(actor, identity, &mut graph);
        }
        Ok(graph)
    }

    fn skipped(&self, node: NodeId) -> bool {
        !self.model.is_valid(node)
            || self.model.is_transient(node)
            || (self.mode == SaveMode::Runtime && self.model.is_editor_only(node))
    }

    fn sorted_children(&self, actor: NodeId) -> Vec<NodeId> {
        let mut children = self.model.attached_actors(actor);
        match self.sorter {
            Some(sorter) => sorter.sort_children(actor, &mut children),
            None => children.sort_by_key(|c| self.model.label(*c).unwrap_or_default()),
        }
        children
    }

    fn visit(
        &self,
        actor: NodeId,
        identity: &mut IdentityMap,
        session: &mut HashSet<NodeId>,
        out: &mut Vec<CollectedActor>,
    ) {
        if self.skipped(actor) {
            return;
        }
        identity.get_or_create(actor);
        session.insert(actor);

        // Interior actors belong to their nested asset; whatever hangs below
        // them is hoisted into the nearest emitted ancestor.
        if self.interior.contains(&actor) && !self.sub_prefabs.contains_key(&actor) {
            for child in self.sorted_children(actor) {
                self.visit(child, identity, session, out);
            }
            return;
        }

        let kind = match self.sub_prefabs.get(&actor) {
            Some(data) => {
                for node in data.instance_nodes() {
                    if self.model.is_valid(node) {
                        identity.get_or_create(node);
                        session.insert(node);
                    }
                }
                CollectedKind::SubPrefab
            }
            None => CollectedKind::Full,
        };
        let mut collected = CollectedActor {
            node: actor,
            kind,
            children: Vec::new(),
        };
        for child in self.sorted_children(actor) {
            self.visit(child, identity, session, &mut collected.children);
        }
        out.push(collected);
    }

    fn collect_objects(&self, actor: NodeId, identity: &mut IdentityMap, graph: &mut CollectedGraph) {
        let mut queue: VecDeque<NodeId> = self.model.inner_objects(actor).into();
        while let Some(node) = queue.pop_front() {
            if self.skipped(node) || graph.session.contains(&node) {
                continue;
            }
            if self.model.kind(node).map(|k| k.is_actor()).unwrap_or(true) {
                continue;
            }
            identity.get_or_create(node);
            graph.session.insert(node);
            graph.objects.push(node);
            queue.extend(self.model.inner_objects(node));
        }
    }
}
