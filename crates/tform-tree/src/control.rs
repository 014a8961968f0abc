#![forbid(unsafe_code)]

//! Per-instance capability handle.
//!
//! A [`Control`] is created once per instance and shared by everything that
//! acts on the instance's behalf. It owns the instance's hops; array
//! reconciliation rewrites the index carried by the hops instead of creating a
//! new control, so paths derived here always reflect the instance's current
//! position.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;
use tform_core::{ComponentKind, HopPath, InstancePath, ValuePath};

use crate::array::ArrayControl;
use crate::descriptor::Descriptor;
use crate::engine::EngineShared;
use crate::form::FormControl;
use crate::instance::{InstancePatch, InstanceRef};

pub struct Control {
    engine: Weak<EngineShared>,
    component_name: String,
    field_name: Option<String>,
    kind: ComponentKind,
    hops: RefCell<HopPath>,
    form: Option<Rc<FormControl>>,
}

impl fmt::Debug for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Control")
            .field("path", &self.instance_path().to_string())
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl Control {
    pub(crate) fn new(
        engine: Weak<EngineShared>,
        descriptor: &Descriptor,
        hops: HopPath,
        form: Option<Rc<FormControl>>,
    ) -> Rc<Self> {
        Rc::new(Self {
            engine,
            component_name: descriptor.component_name.clone(),
            field_name: descriptor.field_name.clone(),
            kind: descriptor.kind,
            hops: RefCell::new(hops),
            form,
        })
    }

    #[must_use]
    pub fn component_name(&self) -> &str {
        &self.component_name
    }

    #[must_use]
    pub fn field_name(&self) -> Option<&str> {
        self.field_name.as_deref()
    }

    #[must_use]
    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    /// Ancestor hops at the instance's current position.
    #[must_use]
    pub fn hops(&self) -> HopPath {
        self.hops.borrow().clone()
    }

    pub(crate) fn depth(&self) -> usize {
        self.hops.borrow().len()
    }

    pub(crate) fn set_hop_index(&self, depth: usize, index: usize) {
        self.hops.borrow_mut().set_index(depth, index);
    }

    #[must_use]
    pub fn instance_path(&self) -> InstancePath {
        self.hops.borrow().instance_path(&self.component_name)
    }

    /// Store address of the instance: the field's path for field kinds, the
    /// document root for a form root, `None` otherwise.
    #[must_use]
    pub fn value_path(&self) -> Option<ValuePath> {
        match self.kind {
            ComponentKind::FormRoot => Some(ValuePath::root()),
            _ if self.kind.is_field() && self.form.is_some() => {
                Some(self.hops.borrow().value_path(self.field_name.as_deref()))
            }
            _ => None,
        }
    }

    /// Scope that relative field references resolve against.
    #[must_use]
    pub fn value_scope(&self) -> ValuePath {
        match self.kind {
            ComponentKind::FormRoot => ValuePath::root(),
            _ => self.hops.borrow().value_path(None),
        }
    }

    /// The form whose store this instance reads. A form root answers with
    /// its own form.
    #[must_use]
    pub fn form(&self) -> Option<&Rc<FormControl>> {
        self.form.as_ref()
    }

    pub(crate) fn engine(&self) -> Option<Rc<EngineShared>> {
        self.engine.upgrade()
    }

    /// The instance this control belongs to, if it is still in the tree.
    #[must_use]
    pub fn current(&self) -> Option<InstanceRef> {
        let engine = self.engine()?;
        let instance = engine.lookup(&self.instance_path())?;
        std::ptr::eq(Rc::as_ptr(instance.control()), self).then_some(instance)
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.current().is_some()
    }

    /// Visibility of the instance; `false` once it has left the tree.
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.current().is_some_and(|instance| instance.is_visible())
    }

    /// Ancestor instances, root first.
    #[must_use]
    pub fn parents(&self) -> Vec<InstanceRef> {
        let Some(engine) = self.engine() else {
            return Vec::new();
        };
        self.hops
            .borrow()
            .ancestor_paths()
            .iter()
            .filter_map(|path| engine.lookup(path))
            .collect()
    }

    #[must_use]
    pub fn parent(&self) -> Option<InstanceRef> {
        self.parents().pop()
    }

    /// Look up any instance by its rendered instance path.
    #[must_use]
    pub fn component_instance(&self, path: &str) -> Option<InstanceRef> {
        let path: InstancePath = path.parse().ok()?;
        self.engine()?.lookup(&path)
    }

    #[must_use]
    pub fn component_instances<S: AsRef<str>>(&self, paths: &[S]) -> Vec<Option<InstanceRef>> {
        paths
            .iter()
            .map(|path| self.component_instance(path.as_ref()))
            .collect()
    }

    /// Merge `patch` into the instance at `path`. Returns `false` when the
    /// path resolves to nothing.
    pub fn set_component_instance(&self, path: &str, patch: InstancePatch) -> bool {
        let Ok(path) = path.parse::<InstancePath>() else {
            return false;
        };
        match self.engine() {
            Some(engine) => engine.patch_instance(&path, &patch),
            None => false,
        }
    }

    /// Merge `patch` into this control's own instance.
    pub fn update(&self, patch: InstancePatch) -> bool {
        match self.engine() {
            Some(engine) => engine.patch_instance(&self.instance_path(), &patch),
            None => false,
        }
    }

    /// Current field value.
    #[must_use]
    pub fn value(&self) -> Option<Value> {
        let path = self.value_path()?;
        self.form.as_ref()?.value(&path)
    }

    /// Value of a field reference, resolved against [`Control::value_scope`].
    #[must_use]
    pub fn field_value(&self, reference: &str) -> Option<Value> {
        let path = self.value_scope().resolve_reference(reference).ok()?;
        self.form.as_ref()?.value(&path)
    }

    /// Write the field's value and settle the engine. Returns `false` when the
    /// instance is not bound to a form.
    pub fn set_value(&self, value: Value) -> bool {
        let (Some(form), Some(path), Some(engine)) = (self.form.as_ref(), self.value_path(), self.engine()) else {
            return false;
        };
        engine.write_field(form, &path, value);
        true
    }

    /// Array mutators, for an attached array field.
    #[must_use]
    pub fn array(&self) -> Option<ArrayControl> {
        if self.kind != ComponentKind::ArrayField {
            return None;
        }
        let instance = self.current()?;
        Some(ArrayControl::new(Rc::clone(instance.control())))
    }
}
