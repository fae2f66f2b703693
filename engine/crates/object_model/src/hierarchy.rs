//! Attachment-tree walks shared by the prefab engine and its tools.

use crate::error::ObjectModelError;
use crate::host::ObjectModel;
use crate::types::{ClassName, NodeId};

/// Depth-first list of actors attached beneath `actor`, optionally
/// starting with `actor` itself.
pub fn collect_children_actors<M: ObjectModel + ?Sized>(
    model: &M,
    actor: NodeId,
    include_self: bool,
) -> Vec<NodeId> {
    let mut out = Vec::new();
    if include_self {
        out.push(actor);
    }
    let mut stack: Vec<NodeId> = model.attached_actors(actor).into_iter().rev().collect();
    while let Some(next) = stack.pop() {
        out.push(next);
        stack.extend(model.attached_actors(next).into_iter().rev());
    }
    out
}

/// Destroy `actor` and every actor attached beneath it, leaves first.
pub fn destroy_actor_with_hierarchy<M: ObjectModel + ?Sized>(
    model: &mut M,
    actor: NodeId,
) -> Result<(), ObjectModelError> {
    if !model.is_valid(actor) {
        return Err(ObjectModelError::NodeNotFound(actor));
    }
    let all = collect_children_actors(model, actor, true);
    for node in all.into_iter().rev() {
        if model.is_valid(node) {
            model.destroy(node)?;
        }
    }
    Ok(())
}

/// First component of `class` found on `actor` or on one of its attach
/// ancestors, nearest first.
pub fn component_in_parent<M: ObjectModel + ?Sized>(
    model: &M,
    actor: NodeId,
    class: &ClassName,
) -> Option<NodeId> {
    let mut current = Some(actor);
    while let Some(a) = current {
        if let Some(found) = model.components_of_class(a, class).into_iter().next() {
            return Some(found);
        }
        current = model.attach_parent_actor(a);
    }
    None
}
