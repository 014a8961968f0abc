#![forbid(unsafe_code)]

//! Array field mutators.
//!
//! Every mutator follows the same sequence:
//!
//! 1. Check bounds against the store's current array. A bad index turns the
//!    whole call into a no-op that returns `false`.
//! 2. Write the new array to the form's store, with the engine's own store
//!    notifications suppressed.
//! 3. Reconcile the element list in place, mirroring the data edit. Elements
//!    that only moved keep their instances and controls; the element index in
//!    every descendant hop is rewritten.
//! 4. Re-derive the form's dependency graph, and the graphs of forms nested
//!    in new elements.
//! 5. Publish exactly one change event scoped to the array instance.
//! 6. Detach removed subtrees, attach new ones, then run an evaluation pass.
//!
//! ```
//! use serde_json::json;
//! use tform_tree::{Descriptor, EngineConfig, FormEngine};
//!
//! let engine = FormEngine::new(EngineConfig::default());
//! engine
//!     .rebuild([Descriptor::form("form")
//!         .default_value(json!({ "rows": [] }))
//!         .child(Descriptor::array("rows").child(Descriptor::primitive("name")))])
//!     .unwrap();
//!
//! let rows = engine.get_component_instance("form.__children.rows").unwrap();
//! let array = rows.control().array().unwrap();
//! assert!(array.append(vec![json!({ "name": "a" })]));
//! assert_eq!(array.len(), 1);
//! assert!(!array.remove(4));
//! ```

use std::ops::Range;
use std::rc::Rc;

use serde_json::Value;
use tform_core::ValuePath;

use crate::builder::TreeBuilder;
use crate::control::Control;
use crate::engine::{self, EngineShared};
use crate::error::Result;
use crate::form::FormControl;
use crate::hooks;
use crate::instance::{ArrayElement, ElementKey, InstanceRef};

/// One planned edit, already bounds-checked.
#[derive(Debug, Clone)]
enum Edit {
    Insert { at: usize, values: Vec<Value> },
    /// Sorted, deduplicated.
    Remove { indices: Vec<usize> },
    Swap { a: usize, b: usize },
    Move { from: usize, to: usize },
    Update { index: usize, value: Value },
    Replace { values: Vec<Value> },
}

impl Edit {
    fn name(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Remove { .. } => "remove",
            Self::Swap { .. } => "swap",
            Self::Move { .. } => "move",
            Self::Update { .. } => "update",
            Self::Replace { .. } => "replace",
        }
    }

    fn apply_to_data(&self, data: &mut Vec<Value>) {
        match self {
            Self::Insert { at, values } => {
                data.splice(*at..*at, values.iter().cloned());
            }
            Self::Remove { indices } => {
                for (removed, index) in indices.iter().enumerate() {
                    data.remove(index - removed);
                }
            }
            Self::Swap { a, b } => data.swap(*a, *b),
            Self::Move { from, to } => {
                let item = data.remove(*from);
                data.insert(*to, item);
            }
            Self::Update { index, value } => data[*index] = value.clone(),
            Self::Replace { values } => *data = values.clone(),
        }
    }
}

/// Instances that left and entered the tree during one reconciliation.
#[derive(Default)]
struct Reconciled {
    removed: Vec<InstanceRef>,
    inserted: Vec<InstanceRef>,
}

/// Mutators for one array field instance.
#[derive(Debug, Clone)]
pub struct ArrayControl {
    control: Rc<Control>,
}

impl ArrayControl {
    pub(crate) fn new(control: Rc<Control>) -> Self {
        Self { control }
    }

    #[must_use]
    pub fn control(&self) -> &Rc<Control> {
        &self.control
    }

    /// Number of elements in the store's array.
    #[must_use]
    pub fn len(&self) -> usize {
        match (self.control.form(), self.control.value_path()) {
            (Some(form), Some(path)) => form.store().get_array_length(&path).unwrap_or(0),
            _ => 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element keys, in element order.
    #[must_use]
    pub fn keys(&self) -> Vec<ElementKey> {
        self.control
            .current()
            .map(|instance| instance.element_keys())
            .unwrap_or_default()
    }

    /// Add `values` after the last element.
    pub fn append(&self, values: Vec<Value>) -> bool {
        self.apply(|len| {
            (!values.is_empty()).then(|| Edit::Insert { at: len, values })
        })
    }

    /// Add `values` before the first element.
    pub fn prepend(&self, values: Vec<Value>) -> bool {
        self.apply(|_| (!values.is_empty()).then(|| Edit::Insert { at: 0, values }))
    }

    /// Add `values` so the first lands at `at`. `at == len` appends.
    pub fn insert(&self, at: usize, values: Vec<Value>) -> bool {
        self.apply(|len| (at <= len && !values.is_empty()).then(|| Edit::Insert { at, values }))
    }

    pub fn remove(&self, index: usize) -> bool {
        self.remove_many(&[index])
    }

    /// Remove several elements. Duplicates are ignored; any out-of-range
    /// index rejects the whole call.
    pub fn remove_many(&self, indices: &[usize]) -> bool {
        let mut indices = indices.to_vec();
        indices.sort_unstable();
        indices.dedup();
        self.apply(|len| {
            (!indices.is_empty() && indices.iter().all(|&index| index < len))
                .then(|| Edit::Remove { indices })
        })
    }

    /// Exchange two elements. Both keep their instances.
    pub fn swap(&self, a: usize, b: usize) -> bool {
        self.apply(|len| (a < len && b < len).then_some(Edit::Swap { a, b }))
    }

    /// Relocate the element at `from` so it ends up at `to`.
    pub fn move_item(&self, from: usize, to: usize) -> bool {
        self.apply(|len| (from < len && to < len).then_some(Edit::Move { from, to }))
    }

    /// Replace one element's value and rebuild its subtree.
    pub fn update(&self, index: usize, value: Value) -> bool {
        self.apply(|len| (index < len).then(|| Edit::Update { index, value }))
    }

    /// Replace the whole array and rebuild every element.
    pub fn replace(&self, values: Vec<Value>) -> bool {
        self.apply(|_| Some(Edit::Replace { values }))
    }

    fn apply(&self, plan: impl FnOnce(usize) -> Option<Edit>) -> bool {
        let Some(engine) = self.control.engine() else {
            return false;
        };
        let Some(instance) = self.control.current() else {
            tracing::debug!(message = "array.detached", path = %self.control.instance_path());
            return false;
        };
        let (Some(form), Some(path)) = (self.control.form().cloned(), self.control.value_path())
        else {
            return false;
        };

        let mut data = match form.value(&path) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        let len = data.len();
        let Some(edit) = plan(len) else {
            tracing::debug!(message = "array.rejected", path = %path, len);
            return false;
        };
        edit.apply_to_data(&mut data);
        let new_len = data.len();

        let reconciled = {
            let _quiet = engine.suppress_store_events();
            form.store().set_value(&path, Value::Array(data));
            self.reconcile(&engine, &instance, &form, &path, &edit, len)
        };
        let reconciled = match reconciled {
            Ok(reconciled) => reconciled,
            Err(err) => {
                tracing::error!(message = "array.reconcile_failed", path = %path, error = %err);
                return false;
            }
        };
        form.reindex_dependencies();
        engine::index_forms(&reconciled.inserted);

        tracing::debug!(
            message = "array.mutate",
            op = edit.name(),
            path = %path,
            len = new_len,
            removed = reconciled.removed.len(),
            inserted = reconciled.inserted.len()
        );
        engine.publish(Some(instance.instance_path()), form.snapshot());

        for removed in &reconciled.removed {
            hooks::detach_subtree(&engine, removed);
        }
        for inserted in &reconciled.inserted {
            hooks::attach_subtree(&engine, inserted);
        }
        hooks::evaluate(&engine);
        true
    }

    fn reconcile(
        &self,
        engine: &Rc<EngineShared>,
        instance: &InstanceRef,
        form: &Rc<FormControl>,
        path: &ValuePath,
        edit: &Edit,
        previous_len: usize,
    ) -> Result<Reconciled> {
        let descriptor = Rc::clone(instance.descriptor());
        let hops = self.control.hops();
        let depth = hops.len();
        let mut builder = TreeBuilder::new(engine);
        let mut out = Reconciled::default();

        if instance.element_count() != previous_len {
            tracing::warn!(
                message = "array.resync",
                path = %path,
                elements = instance.element_count(),
                len = previous_len
            );
            return rebuild_elements(engine, instance, form, path);
        }

        match edit {
            Edit::Insert { at, values } => {
                let mut fresh = Vec::with_capacity(values.len());
                for index in *at..*at + values.len() {
                    fresh.push(builder.build_element(&descriptor, &hops, index, form)?);
                }
                out.inserted = element_instances(&fresh);
                let mut children = instance.children.borrow_mut();
                if let Some(elements) = children.elements_mut() {
                    elements.splice(*at..*at, fresh);
                    let end = elements.len();
                    reindex(elements, *at + values.len()..end, depth);
                }
            }
            Edit::Remove { indices } => {
                let mut children = instance.children.borrow_mut();
                if let Some(elements) = children.elements_mut() {
                    for (removed, index) in indices.iter().enumerate() {
                        let element = elements.remove(index - removed);
                        out.removed.extend(element.children().iter().cloned());
                    }
                    let start = indices.first().copied().unwrap_or(0);
                    let end = elements.len();
                    reindex(elements, start..end, depth);
                }
            }
            Edit::Swap { a, b } => {
                let mut children = instance.children.borrow_mut();
                if let Some(elements) = children.elements_mut() {
                    elements.swap(*a, *b);
                    reindex(elements, *a..*a + 1, depth);
                    reindex(elements, *b..*b + 1, depth);
                }
            }
            Edit::Move { from, to } => {
                let mut children = instance.children.borrow_mut();
                if let Some(elements) = children.elements_mut() {
                    let element = elements.remove(*from);
                    elements.insert(*to, element);
                    reindex(elements, *from.min(to)..*from.max(to) + 1, depth);
                }
            }
            Edit::Update { index, .. } => {
                let fresh = builder.build_element(&descriptor, &hops, *index, form)?;
                out.inserted = fresh.children().to_vec();
                let mut children = instance.children.borrow_mut();
                if let Some(slot) = children.elements_mut().and_then(|elements| elements.get_mut(*index)) {
                    let old = std::mem::replace(slot, fresh);
                    out.removed = old.children().to_vec();
                }
            }
            Edit::Replace { .. } => return rebuild_elements(engine, instance, form, path),
        }
        Ok(out)
    }
}

/// Discard every element of `instance` and rebuild from the store.
fn rebuild_elements(
    engine: &Rc<EngineShared>,
    instance: &InstanceRef,
    form: &Rc<FormControl>,
    path: &ValuePath,
) -> Result<Reconciled> {
    let descriptor = Rc::clone(instance.descriptor());
    let hops = instance.control().hops();
    let len = form.store().get_array_length(path).unwrap_or(0);
    let mut builder = TreeBuilder::new(engine);
    let mut fresh = Vec::with_capacity(len);
    for index in 0..len {
        fresh.push(builder.build_element(&descriptor, &hops, index, form)?);
    }
    let inserted = element_instances(&fresh);
    let old = {
        let mut children = instance.children.borrow_mut();
        match children.elements_mut() {
            Some(elements) => std::mem::replace(elements, fresh),
            None => Vec::new(),
        }
    };
    Ok(Reconciled {
        removed: element_instances(&old),
        inserted,
    })
}

pub(crate) fn resync(
    engine: &Rc<EngineShared>,
    instance: &InstanceRef,
    form: &Rc<FormControl>,
    path: &ValuePath,
) -> Result<(Vec<InstanceRef>, Vec<InstanceRef>)> {
    let reconciled = rebuild_elements(engine, instance, form, path)?;
    Ok((reconciled.removed, reconciled.inserted))
}

fn element_instances(elements: &[ArrayElement]) -> Vec<InstanceRef> {
    elements
        .iter()
        .flat_map(|element| element.children().iter().cloned())
        .collect()
}

/// Write each element's position into the array hop of its whole subtree.
fn reindex(elements: &[ArrayElement], range: Range<usize>, depth: usize) {
    for index in range {
        let Some(element) = elements.get(index) else {
            continue;
        };
        for child in element.children() {
            for instance in crate::instance::preorder(child) {
                instance.control().set_hop_index(depth, index);
            }
        }
    }
}
