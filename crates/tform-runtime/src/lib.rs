#![forbid(unsafe_code)]

//! Runtime primitives shared by the instance tree.
//!
//! - [`bus`]: synchronous, re-entrant publish/subscribe keyed by instance path.
//! - [`gate`]: dependency slices and the shallow-compare gate.
//! - [`computed`]: memoized derived values behind a gate.
//! - [`lifecycle`]: which action phases fire on attach, update passes, and detach.
//! - [`graph`]: directed dependency graph with cycle reporting.

pub mod bus;
pub mod computed;
pub mod gate;
pub mod graph;
pub mod lifecycle;

pub use bus::{ChangeBus, ChangeEvent, PathFilter, Subscription};
pub use computed::Computed;
pub use gate::{DepSlices, DependencyChanges, DependencyReading, DependencySpec, Gate, Slice, SliceChange};
pub use graph::{CycleReport, DependencyGraph};
pub use lifecycle::{ActionGate, LifecyclePhase, Trigger};
