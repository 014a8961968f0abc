#![forbid(unsafe_code)]

//! Author-supplied component descriptors.
//!
//! A [`Descriptor`] is immutable once handed to the engine. Children are held
//! behind `Rc` so every instance built from the same node (for example one per
//! array element) shares it.
//!
//! ```
//! use tform_tree::Descriptor;
//!
//! let form = Descriptor::form("form").child(
//!     Descriptor::array("rows").child(Descriptor::primitive("name")),
//! );
//! assert_eq!(form.children.len(), 1);
//! ```

use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value};
use tform_core::ComponentKind;
use tform_runtime::{DependencySpec, LifecyclePhase};

use crate::hooks::LifecycleContext;

/// Side effect run by a lifecycle action.
pub type ActionFn = Rc<dyn Fn(&LifecycleContext<'_>)>;

/// Pure function producing a computed value.
pub type ComputeFn = Rc<dyn Fn(&LifecycleContext<'_>) -> Value>;

/// Validation metadata of a field.
///
/// `depends_on` lists value paths this field's validation reads. Plain
/// references resolve against the field's parent scope (so `start` next to
/// `end` inside an array element means that element's `start`); a leading `/`
/// makes a reference absolute within the form's store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationSpec {
    pub depends_on: Vec<String>,
    pub rules: Map<String, Value>,
}

impl ValidationSpec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn depends_on<I, S>(mut self, references: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(references.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn rule(mut self, name: impl Into<String>, value: Value) -> Self {
        self.rules.insert(name.into(), value);
        self
    }
}

/// Whether an instance is shown.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
    /// Visible while the referenced field equals `value`. The reference
    /// resolves like a validation dependency.
    WhenEquals { field: String, value: Value },
}

/// A side effect bound to a lifecycle phase and gated on its dependencies.
#[derive(Clone)]
pub struct LifecycleAction {
    pub name: String,
    pub phase: LifecyclePhase,
    pub deps: DependencySpec,
    pub run: ActionFn,
}

impl LifecycleAction {
    pub fn new(
        name: impl Into<String>,
        phase: LifecyclePhase,
        run: impl Fn(&LifecycleContext<'_>) + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            phase,
            deps: DependencySpec::none(),
            run: Rc::new(run),
        }
    }

    pub fn on_attach(name: impl Into<String>, run: impl Fn(&LifecycleContext<'_>) + 'static) -> Self {
        Self::new(name, LifecyclePhase::Attach, run)
    }

    pub fn on_detach(name: impl Into<String>, run: impl Fn(&LifecycleContext<'_>) + 'static) -> Self {
        Self::new(name, LifecyclePhase::Detach, run)
    }

    pub fn on_update(name: impl Into<String>, run: impl Fn(&LifecycleContext<'_>) + 'static) -> Self {
        Self::new(name, LifecyclePhase::Update, run)
    }

    pub fn on_attach_or_update(
        name: impl Into<String>,
        run: impl Fn(&LifecycleContext<'_>) + 'static,
    ) -> Self {
        Self::new(name, LifecyclePhase::AttachOrUpdate, run)
    }

    #[must_use]
    pub fn deps(mut self, deps: DependencySpec) -> Self {
        self.deps = deps;
        self
    }
}

impl fmt::Debug for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleAction")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("deps", &self.deps)
            .finish_non_exhaustive()
    }
}

/// A cached value recomputed only when its declared dependencies change.
#[derive(Clone)]
pub struct ComputedDecl {
    pub name: String,
    pub deps: DependencySpec,
    pub compute: ComputeFn,
}

impl ComputedDecl {
    pub fn new(name: impl Into<String>, compute: impl Fn(&LifecycleContext<'_>) -> Value + 'static) -> Self {
        Self {
            name: name.into(),
            deps: DependencySpec::none(),
            compute: Rc::new(compute),
        }
    }

    #[must_use]
    pub fn deps(mut self, deps: DependencySpec) -> Self {
        self.deps = deps;
        self
    }
}

impl fmt::Debug for ComputedDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedDecl")
            .field("name", &self.name)
            .field("deps", &self.deps)
            .finish_non_exhaustive()
    }
}

/// One node of the descriptor tree.
#[derive(Debug, Clone)]
pub struct Descriptor {
    /// Stable identity across edits. Defaults to the component name.
    pub id: String,
    pub component_name: String,
    pub kind: ComponentKind,
    /// Data key; required for field kinds.
    pub field_name: Option<String>,
    pub children: Vec<Rc<Descriptor>>,
    pub validations: Option<ValidationSpec>,
    pub visibility: Option<Visibility>,
    pub lifecycle: Vec<LifecycleAction>,
    pub computed: Vec<ComputedDecl>,
    /// Seeded into the store when the field has no value. On a form root it
    /// becomes the initial document of the default store.
    pub default_value: Option<Value>,
    pub props: Map<String, Value>,
    pub initial_state: Map<String, Value>,
}

impl Descriptor {
    /// A descriptor of `kind`. Field kinds use the component name as their
    /// field name; override with [`Descriptor::field`].
    pub fn new(kind: ComponentKind, component_name: impl Into<String>) -> Self {
        let component_name = component_name.into();
        Self {
            id: component_name.clone(),
            field_name: kind.is_field().then(|| component_name.clone()),
            component_name,
            kind,
            children: Vec::new(),
            validations: None,
            visibility: None,
            lifecycle: Vec::new(),
            computed: Vec::new(),
            default_value: None,
            props: Map::new(),
            initial_state: Map::new(),
        }
    }

    pub fn container(component_name: impl Into<String>) -> Self {
        Self::new(ComponentKind::Container, component_name)
    }

    pub fn form(component_name: impl Into<String>) -> Self {
        Self::new(ComponentKind::FormRoot, component_name)
    }

    pub fn object(component_name: impl Into<String>) -> Self {
        Self::new(ComponentKind::ObjectField, component_name)
    }

    pub fn array(component_name: impl Into<String>) -> Self {
        Self::new(ComponentKind::ArrayField, component_name)
    }

    pub fn primitive(component_name: impl Into<String>) -> Self {
        Self::new(ComponentKind::PrimitiveField, component_name)
    }

    pub fn leaf(component_name: impl Into<String>) -> Self {
        Self::new(ComponentKind::Leaf, component_name)
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Bind to a data key other than the component name.
    #[must_use]
    pub fn field(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = Some(field_name.into());
        self
    }

    #[must_use]
    pub fn without_field(mut self) -> Self {
        self.field_name = None;
        self
    }

    #[must_use]
    pub fn child(mut self, child: Descriptor) -> Self {
        self.children.push(Rc::new(child));
        self
    }

    #[must_use]
    pub fn children<I>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = Descriptor>,
    {
        self.children.extend(children.into_iter().map(Rc::new));
        self
    }

    #[must_use]
    pub fn validations(mut self, validations: ValidationSpec) -> Self {
        self.validations = Some(validations);
        self
    }

    /// Shorthand for validations that only declare dependencies.
    #[must_use]
    pub fn depends_on<I, S>(mut self, references: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = self.validations.take().unwrap_or_default();
        self.validations = Some(spec.depends_on(references));
        self
    }

    #[must_use]
    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    #[must_use]
    pub fn action(mut self, action: LifecycleAction) -> Self {
        self.lifecycle.push(action);
        self
    }

    #[must_use]
    pub fn computed(mut self, computed: ComputedDecl) -> Self {
        self.computed.push(computed);
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    #[must_use]
    pub fn prop(mut self, key: impl Into<String>, value: Value) -> Self {
        self.props.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn state(mut self, key: impl Into<String>, value: Value) -> Self {
        self.initial_state.insert(key.into(), value);
        self
    }

    /// Child descriptor named `name`.
    #[must_use]
    pub fn find_child(&self, name: &str) -> Option<&Rc<Descriptor>> {
        self.children.iter().find(|child| child.component_name == name)
    }

    /// Every reference this node declares against field values: validation
    /// dependencies, visibility, then action and computed `fields` slices.
    pub(crate) fn field_references(&self) -> impl Iterator<Item = &str> {
        let validations = self
            .validations
            .iter()
            .flat_map(|spec| spec.depends_on.iter().map(String::as_str));
        let visibility = match &self.visibility {
            Some(Visibility::WhenEquals { field, .. }) => Some(field.as_str()),
            _ => None,
        };
        let actions = self
            .lifecycle
            .iter()
            .flat_map(|action| action.deps.fields.iter().flatten().map(String::as_str));
        let computed = self
            .computed
            .iter()
            .flat_map(|decl| decl.deps.fields.iter().flatten().map(String::as_str));
        validations.chain(visibility).chain(actions).chain(computed)
    }
}
