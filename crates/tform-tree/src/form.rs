#![forbid(unsafe_code)]

//! Form roots: store handle plus validation dependency graph.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;
use tform_core::{ComponentKind, FormDataStore, StoreSubscription, ValuePath};
use tform_runtime::{CycleReport, DependencyGraph};

use crate::engine::EngineShared;
use crate::instance::{ComponentInstance, InstanceRef};

/// Shared state of one form root.
///
/// The dependency graph maps a value path to the field paths whose validation
/// reads it. It is re-derived from the instance tree after every build and
/// array mutation, so array fields contribute one edge set per element.
pub struct FormControl {
    store: Rc<dyn FormDataStore>,
    graph: RefCell<DependencyGraph<ValuePath>>,
    root: RefCell<Weak<ComponentInstance>>,
    watch: RefCell<Option<StoreSubscription>>,
}

impl fmt::Debug for FormControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormControl")
            .field("edges", &self.graph.borrow().edge_count())
            .field("bound", &self.root().is_some())
            .finish_non_exhaustive()
    }
}

impl FormControl {
    pub(crate) fn new(store: Rc<dyn FormDataStore>) -> Rc<Self> {
        Rc::new(Self {
            store,
            graph: RefCell::new(DependencyGraph::new()),
            root: RefCell::new(Weak::new()),
            watch: RefCell::new(None),
        })
    }

    /// Route every change of the form's store back into the engine.
    pub(crate) fn watch(form: &Rc<Self>, engine: Weak<EngineShared>) {
        let weak_form = Rc::downgrade(form);
        let subscription = form.store.subscribe_to_value_change(
            &ValuePath::root(),
            Rc::new(move |path: &ValuePath, _value: &Value| {
                let (Some(engine), Some(form)) = (engine.upgrade(), weak_form.upgrade()) else {
                    return;
                };
                engine.on_store_change(&form, path);
            }),
        );
        *form.watch.borrow_mut() = Some(subscription);
    }

    #[must_use]
    pub fn store(&self) -> &Rc<dyn FormDataStore> {
        &self.store
    }

    #[must_use]
    pub fn value(&self, path: &ValuePath) -> Option<Value> {
        self.store.get_value(path)
    }

    #[must_use]
    pub fn snapshot(&self) -> Value {
        self.store.snapshot()
    }

    /// The form-root instance currently bound to this form.
    #[must_use]
    pub fn root(&self) -> Option<InstanceRef> {
        self.root.borrow().upgrade()
    }

    pub(crate) fn bind_root(&self, instance: &InstanceRef) {
        *self.root.borrow_mut() = Rc::downgrade(instance);
    }

    /// Field paths whose validation directly depends on `path`.
    #[must_use]
    pub fn dependents(&self, path: &ValuePath) -> Vec<ValuePath> {
        self.graph.borrow().dependents(path)
    }

    /// Field paths whose validation directly depends on `path`, on a path
    /// inside it, or on one of its ancestors. Sorted and deduplicated.
    #[must_use]
    pub fn affected_dependents(&self, path: &ValuePath) -> Vec<ValuePath> {
        let graph = self.graph.borrow();
        let affected: BTreeSet<&ValuePath> = graph
            .edges()
            .filter(|(from, _)| from.is_related(path))
            .map(|(_, to)| to)
            .collect();
        affected.into_iter().cloned().collect()
    }

    #[must_use]
    pub fn edges(&self) -> Vec<(ValuePath, ValuePath)> {
        self.graph
            .borrow()
            .edges()
            .map(|(from, to)| (from.clone(), to.clone()))
            .collect()
    }

    #[must_use]
    pub fn cycle_report(&self) -> CycleReport<ValuePath> {
        self.graph.borrow().report()
    }

    /// Rebuild the graph from the bound subtree. Nested forms keep their own
    /// graphs and are skipped.
    pub(crate) fn reindex_dependencies(&self) {
        let mut graph = DependencyGraph::new();
        if let Some(root) = self.root() {
            let mut stack = root.children().instances();
            while let Some(instance) = stack.pop() {
                if instance.kind() == ComponentKind::FormRoot {
                    continue;
                }
                if let (Some(spec), Some(target)) =
                    (&instance.descriptor().validations, instance.value_path())
                {
                    let scope = instance.control().value_scope();
                    for reference in &spec.depends_on {
                        match scope.resolve_reference(reference) {
                            Ok(source) => {
                                graph.add_edge(source, target.clone());
                            }
                            Err(err) => {
                                tracing::debug!(
                                    message = "graph.skip",
                                    reference = %reference,
                                    error = %err
                                );
                            }
                        }
                    }
                }
                stack.extend(instance.children().instances());
            }
        }
        *self.graph.borrow_mut() = graph;
    }
}
