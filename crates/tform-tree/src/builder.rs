#![forbid(unsafe_code)]

//! Descriptor validation and instance construction.
//!
//! [`validate_descriptors`] rejects trees that cannot be built before any
//! instance exists, so a failed rebuild leaves the previous tree untouched.
//! [`TreeBuilder`] then expands descriptors top-down: every node receives a
//! [`Control`] bound to its hops, form roots get a [`FormControl`] with an
//! isolated store, and array fields expand once per element currently held in
//! the store.

use std::collections::BTreeSet;
use std::rc::Rc;

use ahash::AHashMap;
use serde_json::Value;
use tform_core::{ComponentKind, Hop, HopPath, InstancePath, ValuePath, is_addressable_name};

use crate::control::Control;
use crate::descriptor::Descriptor;
use crate::engine::EngineShared;
use crate::error::{ConfigError, Result};
use crate::form::FormControl;
use crate::instance::{ArrayElement, ComponentInstance, InstanceChildren, InstanceRef};

/// Check a descriptor forest without building it.
pub fn validate_descriptors(descriptors: &[Rc<Descriptor>]) -> Result<()> {
    validate_level(descriptors, &HopPath::root(), false)
}

fn parent_label(hops: &HopPath) -> String {
    match hops.last() {
        Some(last) => {
            let parent = HopPath::new(hops.as_slice()[..hops.len() - 1].to_vec());
            parent.instance_path(&last.component_name).to_string()
        }
        None => "<root>".to_owned(),
    }
}

fn validate_level(descriptors: &[Rc<Descriptor>], hops: &HopPath, in_form: bool) -> Result<()> {
    let mut seen = BTreeSet::new();
    for descriptor in descriptors {
        let name = descriptor.component_name.as_str();
        if !is_addressable_name(name) {
            return Err(ConfigError::InvalidComponentName {
                name: name.to_owned(),
                parent: parent_label(hops),
            });
        }
        if !seen.insert(name) {
            return Err(ConfigError::DuplicateSibling {
                name: name.to_owned(),
                parent: parent_label(hops),
            });
        }

        let kind = descriptor.kind;
        let path = hops.instance_path(name).to_string();
        if kind.requires_form() && !in_form {
            return Err(ConfigError::OutsideForm { kind, path });
        }
        if kind.is_field()
            && descriptor
                .field_name
                .as_deref()
                .is_none_or(|field| !is_addressable_name(field))
        {
            return Err(ConfigError::MissingFieldName { kind, path });
        }
        if !kind.accepts_children() && !descriptor.children.is_empty() {
            return Err(ConfigError::UnexpectedChildren { kind, path });
        }
        for reference in descriptor.field_references() {
            if let Err(source) = ValuePath::root().resolve_reference(reference) {
                return Err(ConfigError::InvalidReference {
                    path,
                    reference: reference.to_owned(),
                    source,
                });
            }
        }

        let mut hop = Hop::new(name, kind).with_field_opt(descriptor.field_name.clone());
        if kind == ComponentKind::ArrayField {
            hop = hop.with_index(0);
        }
        validate_level(
            &descriptor.children,
            &hops.child(hop),
            in_form || kind == ComponentKind::FormRoot,
        )?;
    }
    Ok(())
}

/// Expands descriptors into instances.
///
/// Callers hold the engine's store-event suppression while building, since
/// default seeding writes to form stores.
pub(crate) struct TreeBuilder<'e> {
    engine: &'e Rc<EngineShared>,
    reuse: AHashMap<InstancePath, Rc<FormControl>>,
    instances: usize,
}

impl<'e> TreeBuilder<'e> {
    pub(crate) fn new(engine: &'e Rc<EngineShared>) -> Self {
        Self {
            engine,
            reuse: AHashMap::new(),
            instances: 0,
        }
    }

    /// Keep form controls (and their stores) of form roots found at the same
    /// instance path.
    pub(crate) fn reusing(mut self, forms: AHashMap<InstancePath, Rc<FormControl>>) -> Self {
        self.reuse = forms;
        self
    }

    /// Number of instances built so far.
    pub(crate) fn instances(&self) -> usize {
        self.instances
    }

    pub(crate) fn build(
        &mut self,
        descriptors: &[Rc<Descriptor>],
        hops: &HopPath,
        scope: Option<&Rc<FormControl>>,
    ) -> Result<Vec<InstanceRef>> {
        let mut built = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            built.push(self.build_node(descriptor, hops, scope)?);
        }
        Ok(built)
    }

    fn build_node(
        &mut self,
        descriptor: &Rc<Descriptor>,
        hops: &HopPath,
        scope: Option<&Rc<FormControl>>,
    ) -> Result<InstanceRef> {
        let kind = descriptor.kind;
        let name = descriptor.component_name.as_str();
        let own_hop = Hop::new(name, kind).with_field_opt(descriptor.field_name.clone());
        let weak = Rc::downgrade(self.engine);
        self.instances += 1;

        let instance = match kind {
            ComponentKind::FormRoot => {
                let form = self.form_for(descriptor, &hops.instance_path(name));
                let control = Control::new(weak, descriptor, hops.clone(), Some(Rc::clone(&form)));
                let children = self.build(&descriptor.children, &hops.child(own_hop), Some(&form))?;
                let instance = ComponentInstance::new(
                    Rc::clone(descriptor),
                    control,
                    InstanceChildren::Named(children),
                );
                form.bind_root(&instance);
                instance
            }
            ComponentKind::Container => {
                let control = Control::new(weak, descriptor, hops.clone(), scope.cloned());
                let children = self.build(&descriptor.children, &hops.child(own_hop), scope)?;
                ComponentInstance::new(Rc::clone(descriptor), control, InstanceChildren::Named(children))
            }
            ComponentKind::Leaf => {
                let control = Control::new(weak, descriptor, hops.clone(), scope.cloned());
                ComponentInstance::new(Rc::clone(descriptor), control, InstanceChildren::Leaf)
            }
            ComponentKind::PrimitiveField => {
                if let Some(form) = scope {
                    self.seed_default(descriptor, form, &hops.value_path(descriptor.field_name.as_deref()));
                }
                let control = Control::new(weak, descriptor, hops.clone(), scope.cloned());
                ComponentInstance::new(Rc::clone(descriptor), control, InstanceChildren::Leaf)
            }
            ComponentKind::ObjectField => {
                let form = require_form(descriptor, hops, scope)?;
                self.seed_default(descriptor, form, &hops.value_path(descriptor.field_name.as_deref()));
                let control = Control::new(weak, descriptor, hops.clone(), Some(Rc::clone(form)));
                let children = self.build(&descriptor.children, &hops.child(own_hop), Some(form))?;
                ComponentInstance::new(Rc::clone(descriptor), control, InstanceChildren::Named(children))
            }
            ComponentKind::ArrayField => {
                let form = require_form(descriptor, hops, scope)?;
                let path = hops.value_path(descriptor.field_name.as_deref());
                self.seed_default(descriptor, form, &path);
                let len = form.store().get_array_length(&path).unwrap_or(0);
                let mut elements = Vec::with_capacity(len);
                for index in 0..len {
                    elements.push(self.build_element(descriptor, hops, index, form)?);
                }
                tracing::trace!(message = "tree.array", path = %path, elements = len);
                let control = Control::new(weak, descriptor, hops.clone(), Some(Rc::clone(form)));
                ComponentInstance::new(Rc::clone(descriptor), control, InstanceChildren::Elements(elements))
            }
        };
        Ok(instance)
    }

    /// Instances for element `index` of the array field built from `array`
    /// whose own ancestor hops are `hops`.
    pub(crate) fn build_element(
        &mut self,
        array: &Rc<Descriptor>,
        hops: &HopPath,
        index: usize,
        form: &Rc<FormControl>,
    ) -> Result<ArrayElement> {
        let hop = Hop::new(array.component_name.as_str(), ComponentKind::ArrayField)
            .with_field_opt(array.field_name.clone())
            .with_index(index);
        let children = self.build(&array.children, &hops.child(hop), Some(form))?;
        Ok(ArrayElement::new(self.engine.next_element_key(), children))
    }

    fn form_for(&mut self, descriptor: &Descriptor, path: &InstancePath) -> Rc<FormControl> {
        if let Some(form) = self.reuse.remove(path) {
            return form;
        }
        let form = FormControl::new(self.engine.config.create_store(descriptor));
        FormControl::watch(&form, Rc::downgrade(self.engine));
        form
    }

    fn seed_default(&self, descriptor: &Descriptor, form: &FormControl, path: &ValuePath) {
        if !self.engine.config.seed_defaults {
            return;
        }
        let Some(default) = &descriptor.default_value else {
            return;
        };
        if matches!(form.value(path), None | Some(Value::Null)) {
            form.store().set_value(path, default.clone());
        }
    }
}

fn require_form<'f>(
    descriptor: &Descriptor,
    hops: &HopPath,
    scope: Option<&'f Rc<FormControl>>,
) -> Result<&'f Rc<FormControl>> {
    scope.ok_or_else(|| ConfigError::OutsideForm {
        kind: descriptor.kind,
        path: hops.instance_path(&descriptor.component_name).to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ValidationSpec;

    fn forest(descriptors: Vec<Descriptor>) -> Vec<Rc<Descriptor>> {
        descriptors.into_iter().map(Rc::new).collect()
    }

    #[test]
    fn accepts_a_well_formed_tree() {
        let tree = forest(vec![Descriptor::container("page").child(
            Descriptor::form("form")
                .child(Descriptor::array("rows").child(Descriptor::primitive("name")))
                .child(Descriptor::object("address").child(Descriptor::primitive("city"))),
        )]);
        assert_eq!(validate_descriptors(&tree), Ok(()));
    }

    #[test]
    fn array_outside_form_is_rejected() {
        let tree = forest(vec![Descriptor::container("page").child(Descriptor::array("rows"))]);
        let err = validate_descriptors(&tree).unwrap_err();
        assert!(matches!(err, ConfigError::OutsideForm { kind: ComponentKind::ArrayField, .. }));
        assert_eq!(err.path(), "page.__children.rows");
    }

    #[test]
    fn primitive_outside_form_is_allowed() {
        let tree = forest(vec![Descriptor::primitive("search")]);
        assert_eq!(validate_descriptors(&tree), Ok(()));
    }

    #[test]
    fn field_without_name_is_rejected() {
        let tree = forest(vec![Descriptor::form("form").child(Descriptor::primitive("x").without_field())]);
        assert!(matches!(
            validate_descriptors(&tree),
            Err(ConfigError::MissingFieldName { .. })
        ));
    }

    #[test]
    fn reserved_and_dotted_names_are_rejected() {
        for name in ["__children", "a.b", "a[0]", ""] {
            let tree = forest(vec![Descriptor::container(name)]);
            assert!(
                matches!(validate_descriptors(&tree), Err(ConfigError::InvalidComponentName { .. })),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn duplicate_siblings_are_rejected() {
        let tree = forest(vec![
            Descriptor::form("form")
                .child(Descriptor::primitive("a"))
                .child(Descriptor::primitive("a").field("b")),
        ]);
        let err = validate_descriptors(&tree).unwrap_err();
        assert_eq!(
            err,
            ConfigError::DuplicateSibling {
                name: "a".into(),
                parent: "form".into()
            }
        );
    }

    #[test]
    fn same_name_in_different_parents_is_fine() {
        let tree = forest(vec![
            Descriptor::form("form")
                .child(Descriptor::object("a").child(Descriptor::primitive("x")))
                .child(Descriptor::object("b").child(Descriptor::primitive("x"))),
        ]);
        assert_eq!(validate_descriptors(&tree), Ok(()));
    }

    #[test]
    fn children_under_leaf_are_rejected() {
        let tree = forest(vec![Descriptor::leaf("label").child(Descriptor::leaf("inner"))]);
        assert!(matches!(
            validate_descriptors(&tree),
            Err(ConfigError::UnexpectedChildren { kind: ComponentKind::Leaf, .. })
        ));
    }

    #[test]
    fn malformed_reference_is_rejected() {
        let tree = forest(vec![Descriptor::form("form").child(
            Descriptor::primitive("end").validations(ValidationSpec::new().depends_on(["rows[x]"])),
        )]);
        let err = validate_descriptors(&tree).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidReference { ref reference, .. } if reference == "rows[x]"));
        assert_eq!(err.path(), "form.__children.end");
    }

    #[test]
    fn nested_array_paths_include_the_element_slot() {
        let tree = forest(vec![Descriptor::form("form").child(
            Descriptor::array("rows").child(Descriptor::array("cells").child(Descriptor::leaf("a.b"))),
        )]);
        let err = validate_descriptors(&tree).unwrap_err();
        assert_eq!(
            err.path(),
            "form.__children.rows.__children[0].cells"
        );
    }
}
