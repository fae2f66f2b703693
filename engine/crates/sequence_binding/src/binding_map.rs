use std::collections::BTreeMap;

use object_model::{Guid, NodeId, ObjectModel};
use serde::{Deserialize, Serialize};

use crate::reference::SequenceObjectReference;

/// Binding id -> the objects a sequence track animates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceBindingMap {
    bindings: BTreeMap<Guid, Vec<SequenceObjectReference>>,
}

impl SequenceBindingMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn binding_ids(&self) -> impl Iterator<Item = Guid> + '_ {
        self.bindings.keys().copied()
    }

    pub fn references(&self, binding: Guid) -> &[SequenceObjectReference] {
        self.bindings.get(&binding).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_binding(&self, binding: Guid) -> bool {
        self.bindings.contains_key(&binding)
    }

    /// Add `reference` under `binding` unless an equal one is already there.
    pub fn create_binding(&mut self, binding: Guid, reference: SequenceObjectReference) {
        let references = self.bindings.entry(binding).or_default();
        if !references.contains(&reference) {
            references.push(reference);
        }
    }

    pub fn remove_binding(&mut self, binding: Guid) {
        if self.bindings.remove(&binding).is_some() {
            tracing::debug!(binding = %binding, "sequence binding removed");
        }
    }

    /// Live targets of `binding`, skipping references that do not resolve.
    pub fn resolve_binding<M: ObjectModel + ?Sized>(&self, model: &M, binding: Guid) -> Vec<NodeId> {
        self.references(binding)
            .iter()
            .filter_map(|r| r.resolve(model))
            .collect()
    }

    pub fn is_references_good<M: ObjectModel + ?Sized>(&self, model: &M, context: NodeId) -> bool {
        self.all().all(|r| r.is_good(model, context))
    }

    pub fn is_helpers_good<M: ObjectModel + ?Sized>(&self, model: &M, context: NodeId) -> bool {
        self.all().all(|r| r.is_helpers_good(model, context))
    }

    /// Repair every broken reference that still has a usable helper
    /// descriptor. Returns whether anything changed.
    pub fn fix_references<M: ObjectModel + ?Sized>(&mut self, model: &M, context: NodeId) -> bool {
        let mut changed = false;
        for reference in self.bindings.values_mut().flatten() {
            if !reference.is_good(model, context) && reference.can_fix() && reference.fix(model, context) {
                changed = true;
            }
        }
        if changed {
            tracing::info!(context = %context, "sequence references repaired");
        }
        changed
    }

    /// Refresh the helpers of every good reference whose cached path or
    /// label went stale. Returns whether anything changed.
    pub fn fix_helpers<M: ObjectModel + ?Sized>(&mut self, model: &M, context: NodeId) -> bool {
        let mut changed = false;
        for reference in self.bindings.values_mut().flatten() {
            if reference.is_good(model, context)
                && !reference.is_helpers_good(model, context)
                && reference.init_helpers(model, context)
            {
                changed = true;
            }
        }
        changed
    }

    fn all(&self) -> impl Iterator<Item = &SequenceObjectReference> {
        self.bindings.values().flatten()
    }
}
