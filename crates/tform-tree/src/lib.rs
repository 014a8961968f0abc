#![forbid(unsafe_code)]

//! Data-driven instance tree.
//!
//! A [`FormEngine`] turns a descriptor tree into a tree of
//! [`ComponentInstance`]s, expanding array fields once per element held in the
//! owning form's data store, and keeps that tree, the change bus, each form's
//! validation dependency graph, and every instance's lifecycle/computed cache
//! consistent while data changes.
//!
//! # Architecture
//!
//! - [`descriptor`]: immutable author-supplied nodes.
//! - [`builder`]: validates descriptors and expands them into instances.
//! - [`instance`]: runtime nodes, their children, and array elements.
//! - [`control`]: per-instance capability handle bound to the instance's hops.
//! - [`array`]: the array mutators and their in-place reconciliation.
//! - [`form`]: a form root's store handle and dependency graph.
//! - [`hooks`]: attach/update/detach actions and computed values.
//! - [`engine`]: ownership of the root, lookups, change handling.
//!
//! Everything is single-threaded (`Rc`/`RefCell`) and synchronous.

pub mod array;
pub mod builder;
pub mod config;
pub mod control;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod form;
pub mod hooks;
pub mod instance;

pub use array::ArrayControl;
pub use builder::validate_descriptors;
pub use config::{EngineConfig, StoreFactory};
pub use control::Control;
pub use descriptor::{ComputedDecl, Descriptor, LifecycleAction, ValidationSpec, Visibility};
pub use engine::{FormDependencyReport, FormEngine, ValidationReport};
pub use error::{ConfigError, Result};
pub use form::FormControl;
pub use hooks::LifecycleContext;
pub use instance::{ArrayElement, ComponentInstance, ElementKey, InstanceChildren, InstancePatch, InstanceRef};
