#![forbid(unsafe_code)]

//! Runtime instances.
//!
//! A [`ComponentInstance`] is built from one [`Descriptor`] at one position.
//! Array fields hold one [`ArrayElement`] per data element; each element
//! carries an [`ElementKey`] that follows the element through swaps and moves
//! so the instances inside it keep their identity.

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value};
use tform_core::{ComponentKind, InstancePath, ValuePath};

use crate::control::Control;
use crate::descriptor::{Descriptor, Visibility};
use crate::form::FormControl;
use crate::hooks::HookState;

pub type InstanceRef = Rc<ComponentInstance>;

/// Opaque identity of an array element, unique within an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementKey(u64);

impl ElementKey {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ElementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Instances created for one element of an array field.
#[derive(Debug, Clone)]
pub struct ArrayElement {
    key: ElementKey,
    children: Vec<InstanceRef>,
}

impl ArrayElement {
    pub(crate) fn new(key: ElementKey, children: Vec<InstanceRef>) -> Self {
        Self { key, children }
    }

    #[must_use]
    pub fn key(&self) -> ElementKey {
        self.key
    }

    #[must_use]
    pub fn children(&self) -> &[InstanceRef] {
        &self.children
    }

    #[must_use]
    pub fn child(&self, name: &str) -> Option<&InstanceRef> {
        self.children.iter().find(|child| child.component_name() == name)
    }
}

/// Children of an instance.
#[derive(Debug, Clone, Default)]
pub enum InstanceChildren {
    #[default]
    Leaf,
    Named(Vec<InstanceRef>),
    Elements(Vec<ArrayElement>),
}

impl InstanceChildren {
    /// Named children, or array elements.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Leaf => 0,
            Self::Named(children) => children.len(),
            Self::Elements(elements) => elements.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn named(&self, name: &str) -> Option<&InstanceRef> {
        match self {
            Self::Named(children) => children.iter().find(|child| child.component_name() == name),
            _ => None,
        }
    }

    #[must_use]
    pub fn elements(&self) -> &[ArrayElement] {
        match self {
            Self::Elements(elements) => elements,
            _ => &[],
        }
    }

    #[must_use]
    pub fn element(&self, index: usize) -> Option<&ArrayElement> {
        self.elements().get(index)
    }

    /// Direct child instances in order; element children are flattened.
    #[must_use]
    pub fn instances(&self) -> Vec<InstanceRef> {
        match self {
            Self::Leaf => Vec::new(),
            Self::Named(children) => children.clone(),
            Self::Elements(elements) => elements
                .iter()
                .flat_map(|element| element.children.iter().cloned())
                .collect(),
        }
    }

    pub(crate) fn elements_mut(&mut self) -> Option<&mut Vec<ArrayElement>> {
        match self {
            Self::Elements(elements) => Some(elements),
            _ => None,
        }
    }
}

/// Props and state to merge into an instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstancePatch {
    pub props: Map<String, Value>,
    pub state: Map<String, Value>,
}

impl InstancePatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn prop(mut self, key: impl Into<String>, value: Value) -> Self {
        self.props.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn state(mut self, key: impl Into<String>, value: Value) -> Self {
        self.state.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.props.is_empty() && self.state.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mount {
    Pending,
    Attached,
    Detached,
}

/// A runtime node.
pub struct ComponentInstance {
    descriptor: Rc<Descriptor>,
    control: Rc<Control>,
    props: RefCell<Map<String, Value>>,
    state: RefCell<Map<String, Value>>,
    pub(crate) children: RefCell<InstanceChildren>,
    pub(crate) hooks: RefCell<HookState>,
    mount: Cell<Mount>,
}

impl fmt::Debug for ComponentInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInstance")
            .field("path", &self.control.instance_path().to_string())
            .field("kind", &self.descriptor.kind)
            .field("children", &self.children.borrow().len())
            .field("mount", &self.mount.get())
            .finish()
    }
}

impl ComponentInstance {
    pub(crate) fn new(
        descriptor: Rc<Descriptor>,
        control: Rc<Control>,
        children: InstanceChildren,
    ) -> InstanceRef {
        Rc::new(Self {
            props: RefCell::new(descriptor.props.clone()),
            state: RefCell::new(descriptor.initial_state.clone()),
            hooks: RefCell::new(HookState::for_descriptor(&descriptor)),
            children: RefCell::new(children),
            mount: Cell::new(Mount::Pending),
            descriptor,
            control,
        })
    }

    #[must_use]
    pub fn descriptor(&self) -> &Rc<Descriptor> {
        &self.descriptor
    }

    #[must_use]
    pub fn kind(&self) -> ComponentKind {
        self.descriptor.kind
    }

    #[must_use]
    pub fn component_name(&self) -> &str {
        &self.descriptor.component_name
    }

    #[must_use]
    pub fn control(&self) -> &Rc<Control> {
        &self.control
    }

    /// The form this instance owns, when it is a form root.
    #[must_use]
    pub fn form_control(&self) -> Option<&Rc<FormControl>> {
        match self.kind() {
            ComponentKind::FormRoot => self.control.form(),
            _ => None,
        }
    }

    #[must_use]
    pub fn instance_path(&self) -> InstancePath {
        self.control.instance_path()
    }

    #[must_use]
    pub fn value_path(&self) -> Option<ValuePath> {
        self.control.value_path()
    }

    #[must_use]
    pub fn props(&self) -> Map<String, Value> {
        self.props.borrow().clone()
    }

    #[must_use]
    pub fn prop(&self, key: &str) -> Option<Value> {
        self.props.borrow().get(key).cloned()
    }

    #[must_use]
    pub fn state(&self) -> Map<String, Value> {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn state_value(&self, key: &str) -> Option<Value> {
        self.state.borrow().get(key).cloned()
    }

    pub(crate) fn read_props(&self) -> Ref<'_, Map<String, Value>> {
        self.props.borrow()
    }

    pub(crate) fn read_state(&self) -> Ref<'_, Map<String, Value>> {
        self.state.borrow()
    }

    #[must_use]
    pub fn children(&self) -> Ref<'_, InstanceChildren> {
        self.children.borrow()
    }

    /// Named child `name`.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<InstanceRef> {
        self.children.borrow().named(name).cloned()
    }

    /// Element `index` of an array field.
    #[must_use]
    pub fn element(&self, index: usize) -> Option<ArrayElement> {
        self.children.borrow().element(index).cloned()
    }

    #[must_use]
    pub fn element_count(&self) -> usize {
        self.children.borrow().elements().len()
    }

    /// Element keys in order.
    #[must_use]
    pub fn element_keys(&self) -> Vec<ElementKey> {
        self.children
            .borrow()
            .elements()
            .iter()
            .map(ArrayElement::key)
            .collect()
    }

    /// Last committed value of the computed named `name`.
    #[must_use]
    pub fn computed(&self, name: &str) -> Option<Value> {
        self.hooks.borrow().computed_value(&self.descriptor, name)
    }

    /// How many times computed `name` has been recomputed.
    #[must_use]
    pub fn computed_version(&self, name: &str) -> Option<u64> {
        self.hooks.borrow().computed_version(&self.descriptor, name)
    }

    /// Number of times lifecycle action `name` has run.
    #[must_use]
    pub fn action_runs(&self, name: &str) -> Option<u64> {
        self.hooks.borrow().action_runs(&self.descriptor, name)
    }

    /// Evaluate the descriptor's visibility against the form's current data.
    #[must_use]
    pub fn is_visible(&self) -> bool {
        match &self.descriptor.visibility {
            None | Some(Visibility::Visible) => true,
            Some(Visibility::Hidden) => false,
            Some(Visibility::WhenEquals { field, value }) => self
                .control
                .field_value(field)
                .is_some_and(|current| current == *value),
        }
    }

    /// Whether this instance has been removed from the tree.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.mount.get() == Mount::Detached
    }

    /// Attached and not yet removed.
    pub(crate) fn is_mounted(&self) -> bool {
        self.mount.get() == Mount::Attached
    }

    /// Returns `false` when the instance was already attached or removed.
    pub(crate) fn mark_attached(&self) -> bool {
        if self.mount.get() != Mount::Pending {
            return false;
        }
        self.mount.set(Mount::Attached);
        true
    }

    pub(crate) fn mark_detached(&self) {
        self.mount.set(Mount::Detached);
    }

    /// Merge `patch`. Returns whether anything changed.
    pub(crate) fn apply_patch(&self, patch: &InstancePatch) -> bool {
        let mut changed = false;
        {
            let mut props = self.props.borrow_mut();
            for (key, value) in &patch.props {
                if props.get(key) != Some(value) {
                    props.insert(key.clone(), value.clone());
                    changed = true;
                }
            }
        }
        let mut state = self.state.borrow_mut();
        for (key, value) in &patch.state {
            if state.get(key) != Some(value) {
                state.insert(key.clone(), value.clone());
                changed = true;
            }
        }
        changed
    }
}

/// Every instance of the subtree rooted at `root`, parents before children.
pub(crate) fn preorder(root: &InstanceRef) -> Vec<InstanceRef> {
    let mut out = Vec::new();
    let mut stack = vec![Rc::clone(root)];
    while let Some(instance) = stack.pop() {
        let children = instance.children().instances();
        stack.extend(children.into_iter().rev());
        out.push(instance);
    }
    out
}

/// Every instance of the subtree rooted at `root`, children before parents.
pub(crate) fn postorder(root: &InstanceRef) -> Vec<InstanceRef> {
    let mut out = preorder(root);
    out.reverse();
    out
}
