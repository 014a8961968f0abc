#![forbid(unsafe_code)]

//! Form data store contract and an in-memory implementation.
//!
//! The engine never owns field values. Each form root is bound to a
//! [`FormDataStore`] that holds the form's document and notifies listeners when
//! it changes.
//!
//! # Notification rules ([`MemoryStore`])
//!
//! - Value listeners fire when the written path and the listened path are
//!   related (one is a prefix of the other).
//! - Array listeners fire when the exact listened path is written and either
//!   the previous or the new value is an array.
//! - Listeners are held weakly. Dropping the [`StoreSubscription`] detaches the
//!   callback; dead entries are pruned on the next write.
//! - Callbacks run after the store has released its internal borrow, so they
//!   may read or write the store again.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Map;

use crate::Value;
use crate::path::{ValuePath, ValueSegment};

/// Callback invoked with the written path and the value written there.
pub type StoreCallback = Rc<dyn Fn(&ValuePath, &Value)>;

/// RAII guard keeping a store callback alive.
#[must_use = "dropping the subscription detaches the callback"]
pub struct StoreSubscription {
    callback: Option<StoreCallback>,
}

impl StoreSubscription {
    /// Keep `callback` alive for as long as the guard lives.
    pub fn new(callback: StoreCallback) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    /// A guard that holds nothing.
    pub fn inert() -> Self {
        Self { callback: None }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.callback.is_some()
    }

    /// Detach the callback now.
    pub fn unsubscribe(mut self) {
        self.callback = None;
    }
}

impl fmt::Debug for StoreSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSubscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Per-form data store consumed by the engine.
pub trait FormDataStore {
    /// Value at `path`, or `None` when nothing is stored there.
    fn get_value(&self, path: &ValuePath) -> Option<Value>;

    /// Write `value` at `path`, creating intermediate containers as needed.
    fn set_value(&self, path: &ValuePath, value: Value);

    /// Length of the array at `path`; `None` when the value is not an array.
    fn get_array_length(&self, path: &ValuePath) -> Option<usize> {
        match self.get_value(path) {
            Some(Value::Array(items)) => Some(items.len()),
            _ => None,
        }
    }

    /// Call `callback` after every write at `path`, inside it, or at one of
    /// its ancestors. The engine holds one such listener per form, at the
    /// document root, and derives array resynchronisation from it.
    fn subscribe_to_value_change(
        &self,
        path: &ValuePath,
        callback: StoreCallback,
    ) -> StoreSubscription;

    /// Call `callback` after a write at exactly `path` that stores or
    /// replaces an array there.
    /// The engine does not register these; they serve other observers of the
    /// store, such as list widgets that only track length.
    fn subscribe_to_array_change(
        &self,
        path: &ValuePath,
        callback: StoreCallback,
    ) -> StoreSubscription;

    /// Ask the store to re-run validation for `paths`.
    fn revalidate(&self, paths: &[ValuePath]);

    /// Whole document.
    fn snapshot(&self) -> Value {
        self.get_value(&ValuePath::root()).unwrap_or(Value::Null)
    }
}

// ─── MemoryStore ─────────────────────────────────────────────────────────────

struct Listener {
    path: ValuePath,
    callback: Weak<dyn Fn(&ValuePath, &Value)>,
}

impl Listener {
    fn is_live(&self) -> bool {
        self.callback.strong_count() > 0
    }
}

#[derive(Default)]
struct StoreInner {
    document: Value,
    value_listeners: Vec<Listener>,
    array_listeners: Vec<Listener>,
    revalidations: Vec<Vec<ValuePath>>,
    writes: u64,
}

impl StoreInner {
    fn prune(&mut self) {
        self.value_listeners.retain(Listener::is_live);
        self.array_listeners.retain(Listener::is_live);
    }
}

/// In-memory store backed by a single JSON document.
///
/// Cloning creates a new handle to the **same** document.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Rc<RefCell<StoreInner>>,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("MemoryStore")
            .field("document", &inner.document)
            .field("writes", &inner.writes)
            .finish()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new(document: Value) -> Self {
        Self {
            inner: Rc::new(RefCell::new(StoreInner {
                document,
                ..StoreInner::default()
            })),
        }
    }

    /// Copy of the whole document.
    #[must_use]
    pub fn document(&self) -> Value {
        self.inner.borrow().document.clone()
    }

    /// Number of writes performed through [`FormDataStore::set_value`].
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.inner.borrow().writes
    }

    /// Every revalidation request received, oldest first.
    #[must_use]
    pub fn revalidations(&self) -> Vec<Vec<ValuePath>> {
        self.inner.borrow().revalidations.clone()
    }

    /// Drain the revalidation log.
    pub fn take_revalidations(&self) -> Vec<Vec<ValuePath>> {
        std::mem::take(&mut self.inner.borrow_mut().revalidations)
    }

    /// Live listeners of both kinds.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        let inner = self.inner.borrow();
        inner
            .value_listeners
            .iter()
            .chain(inner.array_listeners.iter())
            .filter(|listener| listener.is_live())
            .count()
    }
}

fn lookup<'a>(document: &'a Value, path: &ValuePath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(document, |node, segment| match segment {
            ValueSegment::Field(name) => node.as_object()?.get(name),
            ValueSegment::Index(index) => node.as_array()?.get(*index),
        })
}

fn write_at(node: &mut Value, segments: &[ValueSegment], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    match first {
        ValueSegment::Field(name) => {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            if let Value::Object(map) = node {
                write_at(map.entry(name.clone()).or_insert(Value::Null), rest, value);
            }
        }
        ValueSegment::Index(index) => {
            if !node.is_array() {
                *node = Value::Array(Vec::new());
            }
            if let Value::Array(items) = node {
                if items.len() <= *index {
                    items.resize(*index + 1, Value::Null);
                }
                write_at(&mut items[*index], rest, value);
            }
        }
    }
}

impl FormDataStore for MemoryStore {
    fn get_value(&self, path: &ValuePath) -> Option<Value> {
        lookup(&self.inner.borrow().document, path).cloned()
    }

    fn get_array_length(&self, path: &ValuePath) -> Option<usize> {
        lookup(&self.inner.borrow().document, path)
            .and_then(Value::as_array)
            .map(Vec::len)
    }

    fn set_value(&self, path: &ValuePath, value: Value) {
        let (array_callbacks, value_callbacks) = {
            let mut inner = self.inner.borrow_mut();
            let was_array = lookup(&inner.document, path).is_some_and(Value::is_array);
            write_at(&mut inner.document, path.segments(), value.clone());
            inner.writes += 1;
            inner.prune();

            let array_callbacks: Vec<_> = if was_array || value.is_array() {
                inner
                    .array_listeners
                    .iter()
                    .filter(|listener| listener.path == *path)
                    .filter_map(|listener| listener.callback.upgrade())
                    .collect()
            } else {
                Vec::new()
            };
            let value_callbacks: Vec<_> = inner
                .value_listeners
                .iter()
                .filter(|listener| listener.path.is_related(path))
                .filter_map(|listener| listener.callback.upgrade())
                .collect();
            (array_callbacks, value_callbacks)
        };

        #[cfg(feature = "tracing")]
        tracing::trace!(
            message = "store.set",
            path = %path,
            listeners = array_callbacks.len() + value_callbacks.len()
        );

        for callback in array_callbacks {
            callback(path, &value);
        }
        for callback in value_callbacks {
            callback(path, &value);
        }
    }

    fn subscribe_to_value_change(
        &self,
        path: &ValuePath,
        callback: StoreCallback,
    ) -> StoreSubscription {
        self.inner.borrow_mut().value_listeners.push(Listener {
            path: path.clone(),
            callback: Rc::downgrade(&callback),
        });
        StoreSubscription::new(callback)
    }

    fn subscribe_to_array_change(
        &self,
        path: &ValuePath,
        callback: StoreCallback,
    ) -> StoreSubscription {
        self.inner.borrow_mut().array_listeners.push(Listener {
            path: path.clone(),
            callback: Rc::downgrade(&callback),
        });
        StoreSubscription::new(callback)
    }

    fn revalidate(&self, paths: &[ValuePath]) {
        if paths.is_empty() {
            return;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(message = "store.revalidate", count = paths.len());
        self.inner.borrow_mut().revalidations.push(paths.to_vec());
    }
}
