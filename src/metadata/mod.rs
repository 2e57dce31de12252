//! Provider data model: endpoint registry, entities and payload decoding.

pub mod api;
mod entity;
mod registry;

pub(crate) use entity::kind_label;
pub use entity::{Entity, EntityKey, FieldValue, InvalidKey, Ref, RefList};
pub use registry::{
  EndpointDescriptor, EntityKind, FieldDescriptor, FieldKind, UnknownEntityKind,
};
