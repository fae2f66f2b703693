use serde::{Deserialize, Serialize};

use crate::types::NodeId;

/// A reflected field value as the host stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Vector([f64; 3]),
    /// Reference to another node; `None` is a null reference.
    Object(Option<NodeId>),
    /// Path of an external asset.
    Asset(Option<String>),
    List(Vec<FieldValue>),
}
