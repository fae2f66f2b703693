use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::field::FieldValue;
use crate::scene_world::SceneWorld;
use crate::types::{Guid, NodeId};

/// Which fields an encode or decode pass touches.
#[derive(Debug, Clone, Copy)]
pub enum FieldFilter<'a> {
    All,
    Excluding(&'a BTreeSet<String>),
    Only(&'a [String]),
}

impl FieldFilter<'_> {
    pub fn admits(&self, field: &str) -> bool {
        match self {
            FieldFilter::All => true,
            FieldFilter::Excluding(excluded) => !excluded.contains(field),
            FieldFilter::Only(names) => names.iter().any(|n| n == field),
        }
    }
}

/// Lookups available to a codec while encoding.
pub trait EncodeContext {
    /// GUID of a node inside the current session, if it has one.
    fn node_guid(&self, node: NodeId) -> Option<Guid>;
    fn asset_index(&mut self, path: &str) -> u32;
    fn name_index(&mut self, name: &str) -> u32;
}

/// Lookups available to a codec while decoding.
pub trait DecodeContext {
    fn node_for(&self, guid: Guid) -> Option<NodeId>;
    fn asset_path(&self, index: u32) -> Option<&str>;
    fn name(&self, index: u32) -> Option<&str>;

    /// When true an object reference that does not resolve is an error
    /// instead of a null.
    fn strict_references(&self) -> bool {
        false
    }
}

/// Encodes and decodes the reflected fields of one node.
pub trait PropertyCodec<M: ?Sized> {
    fn encode(
        &self,
        model: &M,
        node: NodeId,
        filter: FieldFilter<'_>,
        ctx: &mut dyn EncodeContext,
    ) -> Result<Vec<u8>, CodecError>;

    /// Writes only the fields present in `bytes` and admitted by `filter`.
    fn decode(
        &self,
        model: &mut M,
        node: NodeId,
        bytes: &[u8],
        filter: FieldFilter<'_>,
        ctx: &dyn DecodeContext,
    ) -> Result<(), CodecError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum WireValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Vector([f64; 3]),
    Object(Option<Guid>),
    Asset(Option<u32>),
    List(Vec<WireValue>),
}

/// Field codec for [`SceneWorld`]: a bincode list of (name index, value)
/// pairs in field-name order.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldCodec;

impl FieldCodec {
    fn to_wire(value: &FieldValue, ctx: &mut dyn EncodeContext) -> WireValue {
        match value {
            FieldValue::Bool(b) => WireValue::Bool(*b),
            FieldValue::Int(i) => WireValue::Int(*i),
            FieldValue::Float(f) => WireValue::Float(*f),
            FieldValue::Text(s) => WireValue::Text(s.clone()),
            FieldValue::Vector(v) => WireValue::Vector(*v),
            FieldValue::Object(target) => {
                let guid = target.and_then(|node| {
                    let guid = ctx.node_guid(node);
                    if guid.is_none() {
                        tracing::debug!(target = %node, "reference leaves the session, written as null");
                    }
                    guid
                });
                WireValue::Object(guid)
            }
            FieldValue::Asset(path) => {
                WireValue::Asset(path.as_deref().map(|p| ctx.asset_index(p)))
            }
            FieldValue::List(items) => {
                WireValue::List(items.iter().map(|i| Self::to_wire(i, ctx)).collect())
            }
        }
    }

    fn from_wire(value: WireValue, ctx: &dyn DecodeContext) -> Result<FieldValue, CodecError> {
        Ok(match value {
            WireValue::Bool(b) => FieldValue::Bool(b),
            WireValue::Int(i) => FieldValue::Int(i),
            WireValue::Float(f) => FieldValue::Float(f),
            WireValue::Text(s) => FieldValue::Text(s),
            WireValue::Vector(v) => FieldValue::Vector(v),
            WireValue::Object(None) => FieldValue::Object(None),
            WireValue::Object(Some(guid)) => match ctx.node_for(guid) {
                Some(node) => FieldValue::Object(Some(node)),
                None if ctx.strict_references() => return Err(CodecError::UnresolvedReference(guid)),
                None => {
                    tracing::warn!(guid = %guid, "unresolved object reference, decoded as null");
                    FieldValue::Object(None)
                }
            },
            WireValue::Asset(index) => match index {
                Some(i) => {
                    let path = ctx.asset_path(i).ok_or(CodecError::MissingAsset(i))?;
                    FieldValue::Asset(Some(path.to_string()))
                }
                None => FieldValue::Asset(None),
            },
            WireValue::List(items) => FieldValue::List(
                items
                    .into_iter()
                    .map(|i| Self::from_wire(i, ctx))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }
}

impl PropertyCodec<SceneWorld> for FieldCodec {
    fn encode(
        &self,
        model: &SceneWorld,
        node: NodeId,
        filter: FieldFilter<'_>,
        ctx: &mut dyn EncodeContext,
    ) -> Result<Vec<u8>, CodecError> {
        let fields = model.fields(node).ok_or(CodecError::NodeNotFound(node))?;
        let mut wire = Vec::new();
        for (name, value) in fields {
            if !filter.admits(name) {
                continue;
            }
            let index = ctx.name_index(name);
            wire.push((index, Self::to_wire(value, ctx)));
        }
        Ok(bincode::serialize(&wire)?)
    }

    fn decode(
        &self,
        model: &mut SceneWorld,
        node: NodeId,
        bytes: &[u8],
        filter: FieldFilter<'_>,
        ctx: &dyn DecodeContext,
    ) -> Result<(), CodecError> {
        if model.fields(node).is_none() {
            return Err(CodecError::NodeNotFound(node));
        }
        let wire: Vec<(u32, WireValue)> = bincode::deserialize(bytes)?;
        for (index, value) in wire {
            let name = ctx.name(index).ok_or(CodecError::MissingName(index))?;
            if !filter.admits(name) {
                continue;
            }
            let value = Self::from_wire(value, ctx)?;
            model
                .set_field(node, name, value)
                .map_err(|_| CodecError::NodeNotFound(node))?;
        }
        Ok(())
    }
}
