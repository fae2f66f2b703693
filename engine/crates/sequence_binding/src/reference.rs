use object_model::{ClassName, NodeId, ObjectModel};
use serde::{Deserialize, Serialize};

/// Component name recorded when the bound object is the actor itself.
pub const ACTOR_COMPONENT_NAME: &str = "Actor";

/// Path of `actor` relative to `context`: labels from just below the context
/// down to the actor joined by `/`, `"/"` for the context itself, and an
/// empty string when the actor is not beneath the context.
pub fn relative_path<M: ObjectModel + ?Sized>(model: &M, context: NodeId, actor: NodeId) -> String {
    if actor == context {
        return "/".to_string();
    }
    if !model.is_attached_to(actor, context) {
        return String::new();
    }
    let mut labels = vec![model.label(actor).unwrap_or_default()];
    let mut parent = model.attach_parent_actor(actor);
    while let Some(p) = parent {
        if p == context {
            break;
        }
        labels.push(model.label(p).unwrap_or_default());
        parent = model.attach_parent_actor(p);
    }
    labels.reverse();
    labels.join("/")
}

/// Walk the live attachment tree below `context` label by label.
pub fn actor_by_relative_path<M: ObjectModel + ?Sized>(
    model: &M,
    context: NodeId,
    path: &str,
) -> Option<NodeId> {
    if path == "/" {
        return Some(context);
    }
    if path.is_empty() {
        return None;
    }
    let mut current = context;
    for segment in path.split('/') {
        current = model
            .attached_actors(current)
            .into_iter()
            .find(|&child| model.label(child).as_deref() == Some(segment))?;
    }
    Some(current)
}

/// Where a reference stands relative to a context actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceState {
    /// No live target and nothing to repair from.
    Unresolved,
    /// No live target inside the context, but the helper descriptor can be
    /// replayed with [`SequenceObjectReference::fix`].
    Repairable,
    /// Target is live and inside the context; cached path or label disagree
    /// with the current hierarchy.
    HelpersStale,
    Good,
}

/// Locator for a node bound to a sequence track.
///
/// The direct handle and helper actor are session-local and never
/// persisted; the class, component name, label and relative path are what
/// survive a reload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceObjectReference {
    #[serde(skip)]
    object: Option<NodeId>,
    #[serde(skip)]
    helper_actor: Option<NodeId>,
    /// `Actor` when the target is the helper actor itself, otherwise the
    /// target component's class.
    helper_class: Option<ClassName>,
    helper_component_name: Option<String>,
    helper_actor_label: String,
    helper_actor_path: String,
}

impl SequenceObjectReference {
    /// Reference to `object` with helpers computed against `context`.
    /// `None` when `object` is neither an actor nor a component.
    pub fn create_for_object<M: ObjectModel + ?Sized>(
        model: &M,
        context: NodeId,
        object: NodeId,
    ) -> Option<Self> {
        let mut reference = Self {
            object: Some(object),
            ..Self::default()
        };
        reference.init_helpers(model, context).then_some(reference)
    }

    pub fn helper_actor(&self) -> Option<NodeId> {
        self.helper_actor
    }

    pub fn helper_class(&self) -> Option<&ClassName> {
        self.helper_class.as_ref()
    }

    pub fn helper_component_name(&self) -> Option<&str> {
        self.helper_component_name.as_deref()
    }

    pub fn helper_actor_label(&self) -> &str {
        &self.helper_actor_label
    }

    pub fn helper_actor_path(&self) -> &str {
        &self.helper_actor_path
    }

    /// Recompute the helper descriptor from the current target.
    pub fn init_helpers<M: ObjectModel + ?Sized>(&mut self, model: &M, context: NodeId) -> bool {
        let Some(object) = self.object.filter(|&o| model.is_valid(o)) else {
            return false;
        };
        let Some(kind) = model.kind(object) else {
            return false;
        };
        let (actor, class, component_name) = if kind.is_actor() {
            (object, ClassName::actor(), ACTOR_COMPONENT_NAME.to_string())
        } else if kind.is_component() {
            let Some(owner) = model.owning_actor(object) else {
                return false;
            };
            let Some(class) = model.class(object) else {
                return false;
            };
            (owner, class, model.name(object).unwrap_or_default())
        } else {
            return false;
        };
        self.helper_actor = Some(actor);
        self.helper_class = Some(class);
        self.helper_component_name = Some(component_name);
        self.helper_actor_label = model.label(actor).unwrap_or_default();
        self.helper_actor_path = relative_path(model, context, actor);
        true
    }

    /// The direct handle, if it still points at a live node.
    pub fn try_get_cached<M: ObjectModel + ?Sized>(&self, model: &M) -> Option<NodeId> {
        self.object.filter(|&o| model.is_valid(o))
    }

    /// The direct handle, or the target recomputed from the live helper
    /// actor's components.
    pub fn resolve<M: ObjectModel + ?Sized>(&self, model: &M) -> Option<NodeId> {
        if let Some(object) = self.try_get_cached(model) {
            return Some(object);
        }
        let actor = self.helper_actor.filter(|&a| model.is_valid(a))?;
        let class = self.helper_class.as_ref()?;
        if class.as_str() == ClassName::ACTOR {
            return Some(actor);
        }
        let components = model.components_of_class(actor, class);
        match components.as_slice() {
            [] => None,
            [only] => Some(*only),
            many => many
                .iter()
                .copied()
                .find(|&c| model.name(c).as_deref() == self.helper_component_name.as_deref()),
        }
    }

    /// Store the result of [`resolve`](Self::resolve) as the direct handle.
    pub fn revalidate<M: ObjectModel + ?Sized>(&mut self, model: &M) -> Option<NodeId> {
        self.object = self.resolve(model);
        self.object
    }

    /// True when the target resolves to the context actor or something
    /// attached beneath it in the same world.
    pub fn is_good<M: ObjectModel + ?Sized>(&self, model: &M, context: NodeId) -> bool {
        let Some(target) = self.resolve(model) else {
            return false;
        };
        let Some(actor) = model.owning_actor(target) else {
            return false;
        };
        model.world(actor).is_some()
            && model.world(actor) == model.world(context)
            && (actor == context || model.is_attached_to(actor, context))
    }

    pub fn is_helpers_good<M: ObjectModel + ?Sized>(&self, model: &M, context: NodeId) -> bool {
        let Some(actor) = self.helper_actor.filter(|&a| model.is_valid(a)) else {
            return false;
        };
        self.helper_class.is_some()
            && self.helper_component_name.is_some()
            && self.helper_actor_path == relative_path(model, context, actor)
    }

    pub fn can_fix(&self) -> bool {
        self.helper_class.is_some()
            && self.helper_component_name.is_some()
            && !self.helper_actor_path.is_empty()
    }

    /// Re-find the target by walking the cached relative path from
    /// `context`. Fails when a label on the path changed or the actor moved.
    pub fn fix<M: ObjectModel + ?Sized>(&mut self, model: &M, context: NodeId) -> bool {
        let Some(actor) = actor_by_relative_path(model, context, &self.helper_actor_path) else {
            tracing::debug!(path = %self.helper_actor_path, "sequence reference path no longer resolves");
            return false;
        };
        let Some(class) = self.helper_class.clone() else {
            return false;
        };
        self.helper_actor = Some(actor);
        self.helper_actor_label = model.label(actor).unwrap_or_default();

        if class.as_str() == ClassName::ACTOR {
            self.object = Some(actor);
            return true;
        }
        let components = model.components_of_class(actor, &class);
        let Some(&first) = components.first() else {
            tracing::debug!(actor = %actor, class = %class, "helper actor has no component of bound class");
            return false;
        };
        let named = components
            .iter()
            .copied()
            .find(|&c| model.name(c).as_deref() == self.helper_component_name.as_deref());
        self.object = Some(named.unwrap_or(first));
        true
    }

    pub fn state<M: ObjectModel + ?Sized>(&self, model: &M, context: NodeId) -> ReferenceState {
        if self.is_good(model, context) {
            if self.is_helpers_good(model, context) {
                ReferenceState::Good
            } else {
                ReferenceState::HelpersStale
            }
        } else if self.can_fix() {
            ReferenceState::Repairable
        } else {
            ReferenceState::Unresolved
        }
    }
}
