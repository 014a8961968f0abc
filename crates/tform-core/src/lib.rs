#![forbid(unsafe_code)]

//! Core: component kinds, hop paths, path resolution, and the form data store.

pub mod error;
pub mod kind;
pub mod path;
pub mod store;

pub use error::PathError;
pub use kind::ComponentKind;
pub use path::{
    CHILDREN_MARKER, Hop, HopPath, InstancePath, InstanceSegment, ValuePath, ValueSegment,
    is_addressable_name, resolve_instance_path, resolve_value_path,
};
pub use store::{FormDataStore, MemoryStore, StoreCallback, StoreSubscription};

/// Data value held by form stores.
pub type Value = serde_json::Value;
