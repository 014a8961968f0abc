#![forbid(unsafe_code)]

//! Treeform public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users.

pub use tform_core::{
    ComponentKind, FormDataStore, InstancePath, MemoryStore, PathError, Value, ValuePath,
};
pub use tform_runtime::{ChangeEvent, DependencySpec, LifecyclePhase, PathFilter, Subscription};
pub use tform_tree::{
    ArrayControl, ComponentInstance, ComputedDecl, ConfigError, Control, Descriptor, EngineConfig,
    FormControl, FormEngine, InstancePatch, LifecycleAction, LifecycleContext, ValidationSpec,
    Visibility,
};

pub mod prelude {
    pub use tform_core as core;
    pub use tform_runtime as runtime;
    pub use tform_tree as tree;

    pub use crate::{
        ArrayControl, ComponentKind, ComputedDecl, DependencySpec, Descriptor, EngineConfig,
        FormEngine, InstancePatch, LifecycleAction, LifecyclePhase, PathFilter, Value,
        Visibility,
    };
}
