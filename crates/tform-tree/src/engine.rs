#![forbid(unsafe_code)]

//! The engine: owns the instance tree and keeps it consistent with data.
//!
//! # Change flow
//!
//! A field write (through [`Control::set_value`](crate::Control::set_value) or
//! directly on a form store) is handled in one place:
//!
//! 1. Array fields related to the path are resynchronised when their element
//!    count no longer matches the store.
//! 2. Fields whose validation depends on the written path, on a value inside
//!    it, or on one of its ancestors are revalidated.
//! 3. One change event is published, scoped to the field instance bound to
//!    the path (or to the form root when none is).
//! 4. An evaluation pass runs.
//!
//! Writes the engine performs itself (array mutators, default seeding) are
//! suppressed from this flow so each operation publishes exactly once.

use std::cell::{Cell, RefCell};
use std::fmt::{self, Write as _};
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use serde_json::{Map, Value};
use tform_core::{ComponentKind, HopPath, InstancePath, InstanceSegment, PathError, ValuePath};
use tform_runtime::{ChangeBus, ChangeEvent, PathFilter, Subscription};
use web_time::Instant;

use crate::array;
use crate::builder::{TreeBuilder, validate_descriptors};
use crate::config::EngineConfig;
use crate::descriptor::Descriptor;
use crate::error::Result;
use crate::form::FormControl;
use crate::hooks;
use crate::instance::{ElementKey, InstanceChildren, InstancePatch, InstanceRef, preorder};

/// State shared by the engine handle and every control.
pub(crate) struct EngineShared {
    pub(crate) config: EngineConfig,
    pub(crate) roots: RefCell<Vec<InstanceRef>>,
    descriptors: RefCell<Vec<Rc<Descriptor>>>,
    pub(crate) bus: ChangeBus<Value>,
    pub(crate) meta: RefCell<Map<String, Value>>,
    next_key: Cell<u64>,
    suppress: Cell<usize>,
    pub(crate) evaluating: Cell<bool>,
    pub(crate) pending: Cell<bool>,
    this: Weak<EngineShared>,
}

/// Store notifications are ignored while a guard is alive.
pub(crate) struct SuppressGuard<'a>(&'a Cell<usize>);

impl Drop for SuppressGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

impl EngineShared {
    pub(crate) fn next_element_key(&self) -> ElementKey {
        let key = self.next_key.get();
        self.next_key.set(key + 1);
        ElementKey::new(key)
    }

    pub(crate) fn suppress_store_events(&self) -> SuppressGuard<'_> {
        self.suppress.set(self.suppress.get() + 1);
        SuppressGuard(&self.suppress)
    }

    fn strong(&self) -> Option<Rc<EngineShared>> {
        self.this.upgrade()
    }

    /// Resolve a structured instance path against the live tree.
    pub(crate) fn lookup(&self, path: &InstancePath) -> Option<InstanceRef> {
        let mut segments = path.segments().iter();
        let Some(InstanceSegment::Component(first)) = segments.next() else {
            return None;
        };
        let mut current = self
            .roots
            .borrow()
            .iter()
            .find(|root| root.component_name() == first)
            .cloned()?;
        loop {
            match segments.next() {
                None => return Some(current),
                Some(InstanceSegment::Children) => {}
                Some(_) => return None,
            }
            let next = {
                let children = current.children.borrow();
                let found = match (&*children, segments.next()?) {
                    (InstanceChildren::Named(named), InstanceSegment::Component(name)) => {
                        named.iter().find(|child| child.component_name() == name).cloned()
                    }
                    (InstanceChildren::Elements(elements), InstanceSegment::Element(index)) => {
                        match (elements.get(*index), segments.next()) {
                            (Some(element), Some(InstanceSegment::Component(name))) => {
                                element.child(name).cloned()
                            }
                            _ => None,
                        }
                    }
                    _ => None,
                };
                found
            };
            current = next?;
        }
    }

    pub(crate) fn publish(&self, path: Option<InstancePath>, snapshot: Value) {
        let snapshot = Rc::new(snapshot);
        let event = match path {
            Some(path) => ChangeEvent::scoped(path, snapshot),
            None => ChangeEvent::global(snapshot),
        };
        self.bus.publish(event);
    }

    /// Merge a patch into the instance at `path` and settle.
    pub(crate) fn patch_instance(&self, path: &InstancePath, patch: &InstancePatch) -> bool {
        let Some(target) = self.lookup(path) else {
            tracing::debug!(message = "tree.patch_missing", path = %path);
            return false;
        };
        if target.apply_patch(patch) {
            let snapshot = target
                .control()
                .form()
                .map(|form| form.snapshot())
                .unwrap_or(Value::Null);
            self.publish(Some(target.instance_path()), snapshot);
            hooks::evaluate(self);
        }
        true
    }

    /// Write through a control, bypassing the store's own notification.
    pub(crate) fn write_field(&self, form: &Rc<FormControl>, path: &ValuePath, value: Value) {
        {
            let _quiet = self.suppress_store_events();
            form.store().set_value(path, value);
        }
        self.handle_value_change(form, path);
    }

    /// Store notification entry point.
    pub(crate) fn on_store_change(&self, form: &Rc<FormControl>, path: &ValuePath) {
        if self.suppress.get() > 0 {
            return;
        }
        self.handle_value_change(form, path);
    }

    fn handle_value_change(&self, form: &Rc<FormControl>, path: &ValuePath) {
        let root = form.root();
        let (removed, inserted) = match &root {
            Some(root) => self.resync_arrays(root, form, path),
            None => (Vec::new(), Vec::new()),
        };
        if !removed.is_empty() || !inserted.is_empty() {
            form.reindex_dependencies();
            index_forms(&inserted);
        }

        let dependents = form.affected_dependents(path);
        if !dependents.is_empty() {
            tracing::debug!(message = "form.revalidate", path = %path, dependents = dependents.len());
            form.store().revalidate(&dependents);
        }

        let Some(root) = root else {
            return;
        };

        let scope = form_subtree(&root)
            .into_iter()
            .find(|instance| instance.kind().is_field() && instance.value_path().as_ref() == Some(path))
            .unwrap_or(root);
        self.publish(Some(scope.instance_path()), form.snapshot());

        for instance in &removed {
            hooks::detach_subtree(self, instance);
        }
        for instance in &inserted {
            hooks::attach_subtree(self, instance);
        }
        hooks::evaluate(self);
    }

    /// Rebuild the elements of array fields affected by a write to `path`.
    fn resync_arrays(
        &self,
        root: &InstanceRef,
        form: &Rc<FormControl>,
        path: &ValuePath,
    ) -> (Vec<InstanceRef>, Vec<InstanceRef>) {
        let mut removed = Vec::new();
        let mut inserted = Vec::new();
        let Some(engine) = self.strong() else {
            return (removed, inserted);
        };
        let arrays: Vec<InstanceRef> = form_subtree(root)
            .into_iter()
            .filter(|instance| instance.kind() == ComponentKind::ArrayField)
            .collect();
        for instance in arrays {
            // Arrays inside elements discarded earlier in this loop.
            if !instance.control().is_attached() {
                continue;
            }
            let Some(array_path) = instance.value_path() else {
                continue;
            };
            if !array_path.is_related(path) {
                continue;
            }
            let len = form.store().get_array_length(&array_path).unwrap_or(0);
            let overwritten = array_path.starts_with(path);
            if !overwritten && instance.element_count() == len {
                continue;
            }
            let resynced = {
                let _quiet = self.suppress_store_events();
                array::resync(&engine, &instance, form, &array_path)
            };
            match resynced {
                Ok((gone, fresh)) => {
                    tracing::debug!(
                        message = "array.resync",
                        path = %array_path,
                        removed = gone.len(),
                        inserted = fresh.len()
                    );
                    removed.extend(gone);
                    inserted.extend(fresh);
                }
                Err(err) => {
                    tracing::error!(message = "array.resync_failed", path = %array_path, error = %err);
                }
            }
        }
        (removed, inserted)
    }
}

/// Form controls of every form root in the given subtrees, keyed by
/// instance path.
fn forms_in(roots: &[InstanceRef]) -> AHashMap<InstancePath, Rc<FormControl>> {
    roots
        .iter()
        .flat_map(preorder)
        .filter_map(|instance| {
            let form = instance.form_control()?;
            Some((instance.instance_path(), Rc::clone(form)))
        })
        .collect()
}

/// Re-derive the dependency graph of every form rooted in the given subtrees.
pub(crate) fn index_forms(subtrees: &[InstanceRef]) {
    for instance in subtrees.iter().flat_map(preorder) {
        let Some(form) = instance.form_control() else {
            continue;
        };
        form.reindex_dependencies();
        let report = form.cycle_report();
        if report.has_cycles() {
            tracing::warn!(
                message = "graph.cycle",
                form = %instance.instance_path(),
                cycles = report.cycles.len()
            );
        }
    }
}

/// Instances of the form rooted at `root`, excluding nested forms.
fn form_subtree(root: &InstanceRef) -> Vec<InstanceRef> {
    let mut out = Vec::new();
    let mut stack = vec![Rc::clone(root)];
    while let Some(instance) = stack.pop() {
        let children = instance.children().instances();
        stack.extend(
            children
                .into_iter()
                .rev()
                .filter(|child| child.kind() != ComponentKind::FormRoot),
        );
        out.push(instance);
    }
    out
}

/// Dependency graph summary of one form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormDependencyReport {
    pub form: InstancePath,
    pub edge_count: usize,
    pub cycles: Vec<Vec<ValuePath>>,
}

/// Dependency graph summaries of every form, in tree order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub forms: Vec<FormDependencyReport>,
}

impl ValidationReport {
    #[must_use]
    pub fn has_cycles(&self) -> bool {
        self.forms.iter().any(|form| !form.cycles.is_empty())
    }

    #[must_use]
    pub fn cycle_count(&self) -> usize {
        self.forms.iter().map(|form| form.cycles.len()).sum()
    }

    #[must_use]
    pub fn form(&self, path: &InstancePath) -> Option<&FormDependencyReport> {
        self.forms.iter().find(|form| &form.form == path)
    }
}

/// Owner of the instance tree.
pub struct FormEngine {
    shared: Rc<EngineShared>,
}

impl Default for FormEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl fmt::Debug for FormEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormEngine")
            .field("config", &self.shared.config)
            .field("roots", &self.shared.roots.borrow().len())
            .field("subscribers", &self.shared.bus.subscriber_count())
            .finish()
    }
}

impl FormEngine {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let shared = Rc::new_cyclic(|this| EngineShared {
            config,
            roots: RefCell::new(Vec::new()),
            descriptors: RefCell::new(Vec::new()),
            bus: ChangeBus::new(),
            meta: RefCell::new(Map::new()),
            next_key: Cell::new(0),
            suppress: Cell::new(0),
            evaluating: Cell::new(false),
            pending: Cell::new(false),
            this: this.clone(),
        });
        Self { shared }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Replace the descriptor tree and rebuild every instance.
    ///
    /// Form stores are kept for form roots that reappear at the same instance
    /// path, including forms nested in array elements created since the last
    /// rebuild. On error the previous tree stays in place.
    pub fn rebuild<I>(&self, descriptors: I) -> Result<()>
    where
        I: IntoIterator<Item = Descriptor>,
    {
        let descriptors: Vec<Rc<Descriptor>> = descriptors.into_iter().map(Rc::new).collect();
        let span = tracing::debug_span!(
            "tree.rebuild",
            roots = descriptors.len(),
            instances = tracing::field::Empty,
            build_duration_us = tracing::field::Empty
        );
        let _enter = span.enter();
        let started = Instant::now();

        if let Err(err) = validate_descriptors(&descriptors) {
            tracing::error!(message = "tree.invalid", error = %err);
            return Err(err);
        }

        let shared = &self.shared;
        let reuse = forms_in(&shared.roots.borrow());
        let (built, instances) = {
            let _quiet = shared.suppress_store_events();
            let mut builder = TreeBuilder::new(shared).reusing(reuse);
            let built = builder.build(&descriptors, &HopPath::root(), None);
            (built, builder.instances())
        };
        let roots = match built {
            Ok(roots) => roots,
            Err(err) => {
                tracing::error!(message = "tree.invalid", error = %err);
                return Err(err);
            }
        };

        let old_roots = shared.roots.borrow().clone();
        for old in &old_roots {
            hooks::detach_subtree(shared, old);
        }
        *shared.roots.borrow_mut() = roots.clone();
        *shared.descriptors.borrow_mut() = descriptors;
        index_forms(&roots);

        span.record("instances", instances);
        span.record(
            "build_duration_us",
            u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
        );
        shared.publish(None, Value::Null);

        for root in &roots {
            hooks::attach_subtree(shared, root);
        }
        hooks::evaluate(shared);
        Ok(())
    }

    /// Descriptors of the current tree.
    #[must_use]
    pub fn descriptors(&self) -> Vec<Rc<Descriptor>> {
        self.shared.descriptors.borrow().clone()
    }

    #[must_use]
    pub fn roots(&self) -> Vec<InstanceRef> {
        self.shared.roots.borrow().clone()
    }

    /// Instance at a rendered instance path. Malformed or unknown paths
    /// yield `None`.
    #[must_use]
    pub fn get_component_instance(&self, path: &str) -> Option<InstanceRef> {
        let path: InstancePath = path.parse().ok()?;
        self.shared.lookup(&path)
    }

    #[must_use]
    pub fn get_component_instances<S: AsRef<str>>(&self, paths: &[S]) -> Vec<Option<InstanceRef>> {
        paths
            .iter()
            .map(|path| self.get_component_instance(path.as_ref()))
            .collect()
    }

    #[must_use]
    pub fn instance_at(&self, path: &InstancePath) -> Option<InstanceRef> {
        self.shared.lookup(path)
    }

    /// Merge `patch` into the instance at `path`. Returns `false` when the
    /// path resolves to nothing.
    pub fn set_component_instance(&self, path: &str, patch: InstancePatch) -> bool {
        match path.parse::<InstancePath>() {
            Ok(path) => self.shared.patch_instance(&path, &patch),
            Err(_) => false,
        }
    }

    /// Listen for change events matching `filter`.
    pub fn subscribe(
        &self,
        filter: impl Into<PathFilter>,
        callback: impl Fn(&ChangeEvent<Value>) + 'static,
    ) -> Subscription {
        self.shared.bus.subscribe(filter, callback)
    }

    /// Listen for events scoped to any of `paths` (and global events).
    pub fn subscribe_paths<S: AsRef<str>>(
        &self,
        paths: &[S],
        callback: impl Fn(&ChangeEvent<Value>) + 'static,
    ) -> std::result::Result<Subscription, PathError> {
        let parsed = paths
            .iter()
            .map(|path| path.as_ref().parse::<InstancePath>())
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(self.shared.bus.subscribe(parsed, callback))
    }

    /// Listen for events scoped to exactly `path` (and global events).
    pub fn subscribe_path(
        &self,
        path: &str,
        callback: impl Fn(&ChangeEvent<Value>) + 'static,
    ) -> std::result::Result<Subscription, PathError> {
        let path: InstancePath = path.parse()?;
        Ok(self.shared.bus.subscribe(path, callback))
    }

    #[must_use]
    pub fn bus(&self) -> &ChangeBus<Value> {
        &self.shared.bus
    }

    /// Form control of the form root at `path`.
    #[must_use]
    pub fn form(&self, path: &str) -> Option<Rc<FormControl>> {
        let instance = self.get_component_instance(path)?;
        instance.form_control().cloned()
    }

    /// Dependency graphs of every form in the tree.
    #[must_use]
    pub fn validation_dependency_report(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        for root in self.roots() {
            for instance in preorder(&root) {
                let Some(form) = instance.form_control() else {
                    continue;
                };
                let cycles = form.cycle_report();
                report.forms.push(FormDependencyReport {
                    form: instance.instance_path(),
                    edge_count: cycles.edge_count,
                    cycles: cycles.cycles,
                });
            }
        }
        report
    }

    /// Set a caller-supplied meta value and settle.
    pub fn set_meta(&self, key: impl Into<String>, value: Value) {
        self.shared.meta.borrow_mut().insert(key.into(), value);
        hooks::evaluate(&self.shared);
    }

    #[must_use]
    pub fn meta(&self, key: &str) -> Option<Value> {
        self.shared.meta.borrow().get(key).cloned()
    }

    /// Run an evaluation pass.
    pub fn evaluate(&self) {
        hooks::evaluate(&self.shared);
    }

    /// Indented description of the instance tree: one line per instance,
    /// with its kind and value path. Element keys are omitted, so two builds
    /// over the same data render identically.
    #[must_use]
    pub fn outline(&self) -> String {
        let mut out = String::new();
        for root in self.roots() {
            write_outline(&mut out, &root, 0);
        }
        out
    }
}

fn write_outline(out: &mut String, instance: &InstanceRef, depth: usize) {
    let indent = "  ".repeat(depth);
    let _ = write!(out, "{indent}{} ({})", instance.component_name(), instance.kind());
    if let Some(path) = instance.value_path() {
        let _ = write!(out, " @{path}");
    }
    out.push('\n');
    let children = instance.children().clone();
    match children {
        InstanceChildren::Leaf => {}
        InstanceChildren::Named(named) => {
            for child in &named {
                write_outline(out, child, depth + 1);
            }
        }
        InstanceChildren::Elements(elements) => {
            for (index, element) in elements.iter().enumerate() {
                let _ = writeln!(out, "{indent}  [{index}]");
                for child in element.children() {
                    write_outline(out, child, depth + 2);
                }
            }
        }
    }
}
