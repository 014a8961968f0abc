#![forbid(unsafe_code)]

//! Lifecycle actions and computed values of live instances.
//!
//! Each instance keeps one [`ActionGate`] per lifecycle action and one
//! [`Computed`] per computed declaration. Dependencies are read fresh for every
//! trigger and compared against the memo; user callbacks always run with no
//! engine borrow held, so they may read the tree, write fields, or mutate
//! arrays.
//!
//! A write performed during an evaluation pass schedules another pass instead
//! of recursing. Passes stop once nothing is scheduled, or after
//! [`EngineConfig::max_evaluation_passes`](crate::EngineConfig).

use std::rc::Rc;

use serde_json::Value;
use tform_runtime::{
    ActionGate, Computed, DependencyChanges, DependencyReading, DependencySpec, LifecyclePhase,
    Trigger,
};

use crate::control::Control;
use crate::descriptor::Descriptor;
use crate::engine::EngineShared;
use crate::instance::{InstanceRef, postorder, preorder};

/// What a lifecycle action or compute function sees.
pub struct LifecycleContext<'a> {
    instance: &'a InstanceRef,
    phase: Option<LifecyclePhase>,
    changes: &'a DependencyChanges,
}

impl<'a> LifecycleContext<'a> {
    #[must_use]
    pub fn instance(&self) -> &'a InstanceRef {
        self.instance
    }

    #[must_use]
    pub fn control(&self) -> &'a Rc<Control> {
        self.instance.control()
    }

    /// Phase of the running action; `None` inside a compute function.
    #[must_use]
    pub fn phase(&self) -> Option<LifecyclePhase> {
        self.phase
    }

    /// Previous and new values of every declared slice.
    #[must_use]
    pub fn changes(&self) -> &'a DependencyChanges {
        self.changes
    }

    /// New value of a declared prop dependency.
    #[must_use]
    pub fn prop(&self, key: &str) -> Option<&'a Value> {
        self.changes.props.new_value(key)
    }

    /// New value of a declared field dependency, keyed by its reference.
    #[must_use]
    pub fn field(&self, reference: &str) -> Option<&'a Value> {
        self.changes.fields.new_value(reference)
    }
}

/// Scheduling state of one instance.
#[derive(Debug)]
pub(crate) struct HookState {
    actions: Vec<ActionGate>,
    computed: Vec<Computed<Value>>,
}

impl HookState {
    pub(crate) fn for_descriptor(descriptor: &Descriptor) -> Self {
        Self {
            actions: descriptor
                .lifecycle
                .iter()
                .map(|action| ActionGate::new(action.phase, &action.deps))
                .collect(),
            computed: descriptor
                .computed
                .iter()
                .map(|decl| Computed::new(&decl.deps))
                .collect(),
        }
    }

    pub(crate) fn computed_value(&self, descriptor: &Descriptor, name: &str) -> Option<Value> {
        let slot = descriptor.computed.iter().position(|decl| decl.name == name)?;
        self.computed.get(slot)?.value()
    }

    pub(crate) fn computed_version(&self, descriptor: &Descriptor, name: &str) -> Option<u64> {
        let slot = descriptor.computed.iter().position(|decl| decl.name == name)?;
        Some(self.computed.get(slot)?.version())
    }

    pub(crate) fn action_runs(&self, descriptor: &Descriptor, name: &str) -> Option<u64> {
        let slot = descriptor.lifecycle.iter().position(|action| action.name == name)?;
        Some(self.actions.get(slot)?.runs())
    }
}

/// Current values of the keys `spec` declares. Undeclared slices stay empty;
/// missing keys read as `null`.
fn read_dependencies(
    engine: &EngineShared,
    instance: &InstanceRef,
    spec: &DependencySpec,
) -> DependencyReading {
    let mut reading = DependencyReading::default();
    if let Some(keys) = &spec.props {
        let props = instance.read_props();
        for key in keys {
            reading
                .props
                .insert(key.clone(), props.get(key).cloned().unwrap_or(Value::Null));
        }
    }
    if let Some(keys) = &spec.state {
        let state = instance.read_state();
        for key in keys {
            reading
                .state
                .insert(key.clone(), state.get(key).cloned().unwrap_or(Value::Null));
        }
    }
    if let Some(keys) = &spec.fields {
        let control = instance.control();
        for key in keys {
            reading
                .fields
                .insert(key.clone(), control.field_value(key).unwrap_or(Value::Null));
        }
    }
    if let Some(keys) = &spec.meta {
        let meta = engine.meta.borrow();
        for key in keys {
            reading
                .meta
                .insert(key.clone(), meta.get(key).cloned().unwrap_or(Value::Null));
        }
    }
    reading
}

/// Run whatever `trigger` clears on `instance`.
fn fire(engine: &EngineShared, instance: &InstanceRef, trigger: Trigger) {
    let descriptor = Rc::clone(instance.descriptor());

    for (slot, action) in descriptor.lifecycle.iter().enumerate() {
        if instance.is_detached() && trigger != Trigger::Detach {
            return;
        }
        let wants = instance
            .hooks
            .borrow()
            .actions
            .get(slot)
            .is_some_and(|gate| gate.wants(trigger));
        if !wants {
            continue;
        }
        let reading = read_dependencies(engine, instance, &action.deps);
        let changes = instance
            .hooks
            .borrow_mut()
            .actions
            .get_mut(slot)
            .and_then(|gate| gate.on(trigger, reading));
        if let Some(changes) = changes {
            tracing::trace!(
                message = "hooks.action",
                action = %action.name,
                phase = ?action.phase,
                path = %instance.instance_path()
            );
            (action.run)(&LifecycleContext {
                instance,
                phase: Some(action.phase),
                changes: &changes,
            });
        }
    }

    if trigger == Trigger::Detach {
        return;
    }
    for (slot, decl) in descriptor.computed.iter().enumerate() {
        if instance.is_detached() {
            return;
        }
        let reading = read_dependencies(engine, instance, &decl.deps);
        let changes = instance
            .hooks
            .borrow_mut()
            .computed
            .get_mut(slot)
            .and_then(|computed| computed.poll(reading));
        let Some(changes) = changes else {
            continue;
        };
        let value = (decl.compute)(&LifecycleContext {
            instance,
            phase: None,
            changes: &changes,
        });
        if let Some(computed) = instance.hooks.borrow_mut().computed.get_mut(slot) {
            computed.commit(value);
        }
    }
}

/// Run attach actions over a freshly inserted subtree, parents first.
pub(crate) fn attach_subtree(engine: &EngineShared, root: &InstanceRef) {
    for instance in preorder(root) {
        if instance.mark_attached() {
            fire(engine, &instance, Trigger::Attach);
        }
    }
}

/// Mark a removed subtree detached and run its detach actions, children
/// first.
pub(crate) fn detach_subtree(engine: &EngineShared, root: &InstanceRef) {
    let instances: Vec<(InstanceRef, bool)> = postorder(root)
        .into_iter()
        .map(|instance| {
            let mounted = instance.is_mounted();
            (instance, mounted)
        })
        .collect();
    for (instance, _) in &instances {
        instance.mark_detached();
    }
    for (instance, mounted) in &instances {
        if *mounted {
            fire(engine, instance, Trigger::Detach);
        }
    }
}

struct PassGuard<'a>(&'a EngineShared);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.evaluating.set(false);
    }
}

/// Settle update actions and computed values over the whole tree.
pub(crate) fn evaluate(engine: &EngineShared) {
    if engine.evaluating.get() {
        engine.pending.set(true);
        return;
    }
    engine.evaluating.set(true);
    let _guard = PassGuard(engine);

    let limit = engine.config.max_evaluation_passes.max(1);
    let mut passes = 0usize;
    loop {
        engine.pending.set(false);
        passes += 1;
        let roots = engine.roots.borrow().clone();
        for root in &roots {
            for instance in preorder(root) {
                if instance.is_mounted() {
                    fire(engine, &instance, Trigger::Pass);
                }
            }
        }
        if !engine.pending.get() {
            break;
        }
        if passes >= limit {
            engine.pending.set(false);
            tracing::warn!(message = "hooks.pass_limit", passes, limit);
            break;
        }
    }
    tracing::trace!(message = "hooks.settled", passes);
}
