//! Locators that let animation and sequence tracks find their targets again
//! after the owning hierarchy was reloaded or edited.

pub mod binding_map;
pub mod reference;

pub use binding_map::SequenceBindingMap;
pub use reference::{actor_by_relative_path, relative_path, ReferenceState, SequenceObjectReference};
