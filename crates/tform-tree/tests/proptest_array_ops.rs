//! Property-based invariant tests for array reconciliation.
//!
//! After any sequence of mutators:
//! 1. The element count equals the store's array length.
//! 2. Element `k` reads store element `k` through its own control.
//! 3. Element keys follow the same permutation as a model vector.
//! 4. Every element is addressable at the path its control reports.

use std::rc::Rc;

use proptest::prelude::*;
use serde_json::{Value, json};
use tform_tree::{Descriptor, ElementKey, FormEngine};

#[derive(Debug, Clone)]
enum Op {
    Append(u8),
    Prepend(u8),
    Insert(usize, u8),
    Remove(usize),
    RemoveMany(Vec<usize>),
    Swap(usize, usize),
    Move(usize, usize),
    Update(usize),
    Replace(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u8..3).prop_map(Op::Append),
        (1u8..3).prop_map(Op::Prepend),
        (0usize..8, 1u8..3).prop_map(|(at, n)| Op::Insert(at, n)),
        (0usize..8).prop_map(Op::Remove),
        prop::collection::vec(0usize..8, 0..4).prop_map(Op::RemoveMany),
        (0usize..8, 0usize..8).prop_map(|(a, b)| Op::Swap(a, b)),
        (0usize..8, 0usize..8).prop_map(|(a, b)| Op::Move(a, b)),
        (0usize..8).prop_map(Op::Update),
        (0u8..4).prop_map(Op::Replace),
    ]
}

/// Model entry: the stored label and the key expected at that slot (`None`
/// for slots whose key is minted by the engine during the op).
type Model = Vec<(u64, Option<ElementKey>)>;

fn values(labels: &[u64]) -> Vec<Value> {
    labels.iter().map(|label| json!({ "label": label })).collect()
}

fn fresh(next: &mut u64, n: u8) -> Vec<u64> {
    (0..n)
        .map(|_| {
            *next += 1;
            *next
        })
        .collect()
}

fn labels(model: &Model) -> Vec<u64> {
    model.iter().map(|(label, _)| *label).collect()
}

proptest! {
    #[test]
    fn elements_mirror_the_store(ops in prop::collection::vec(op(), 1..25)) {
        let engine = FormEngine::default();
        engine
            .rebuild([Descriptor::form("form")
                .default_value(json!({ "rows": [{ "label": 0 }] }))
                .child(Descriptor::array("rows").child(Descriptor::primitive("label")))])
            .unwrap();
        let rows = engine.get_component_instance("form.__children.rows").unwrap();
        let array = rows.control().array().unwrap();
        let mut model: Model = vec![(0, array.keys().first().copied())];
        let mut next = 0u64;

        for op in ops {
            let len = model.len();
            match op {
                Op::Append(n) => {
                    let added = fresh(&mut next, n);
                    prop_assert!(array.append(values(&added)));
                    model.extend(added.into_iter().map(|label| (label, None)));
                }
                Op::Prepend(n) => {
                    let added = fresh(&mut next, n);
                    prop_assert!(array.prepend(values(&added)));
                    model.splice(0..0, added.into_iter().map(|label| (label, None)));
                }
                Op::Insert(at, n) => {
                    let added = fresh(&mut next, n);
                    let ok = array.insert(at, values(&added));
                    prop_assert_eq!(ok, at <= len);
                    if ok {
                        model.splice(at..at, added.into_iter().map(|label| (label, None)));
                    }
                }
                Op::Remove(index) => {
                    let ok = array.remove(index);
                    prop_assert_eq!(ok, index < len);
                    if ok {
                        model.remove(index);
                    }
                }
                Op::RemoveMany(indices) => {
                    let mut sorted = indices.clone();
                    sorted.sort_unstable();
                    sorted.dedup();
                    let expected = !sorted.is_empty() && sorted.iter().all(|&i| i < len);
                    prop_assert_eq!(array.remove_many(&indices), expected);
                    if expected {
                        for (removed, index) in sorted.iter().enumerate() {
                            model.remove(index - removed);
                        }
                    }
                }
                Op::Swap(a, b) => {
                    let ok = array.swap(a, b);
                    prop_assert_eq!(ok, a < len && b < len);
                    if ok {
                        model.swap(a, b);
                    }
                }
                Op::Move(from, to) => {
                    let ok = array.move_item(from, to);
                    prop_assert_eq!(ok, from < len && to < len);
                    if ok {
                        let item = model.remove(from);
                        model.insert(to, item);
                    }
                }
                Op::Update(index) => {
                    let ok = index < len;
                    let label = fresh(&mut next, 1)[0];
                    prop_assert_eq!(array.update(index, json!({ "label": label })), ok);
                    if ok {
                        model[index] = (label, None);
                    }
                }
                Op::Replace(n) => {
                    let added = fresh(&mut next, n);
                    prop_assert!(array.replace(values(&added)));
                    model = added.into_iter().map(|label| (label, None)).collect();
                }
            }

            // Fill in keys minted by this op, then check the permutation.
            let keys = array.keys();
            prop_assert_eq!(keys.len(), model.len());
            for (slot, key) in model.iter_mut().zip(&keys) {
                let expected = slot.1;
                match expected {
                    Some(expected) => prop_assert_eq!(expected, *key),
                    None => slot.1 = Some(*key),
                }
            }

            prop_assert_eq!(array.len(), model.len());
            prop_assert_eq!(rows.element_count(), model.len());
            for (index, label) in labels(&model).into_iter().enumerate() {
                let element = rows.element(index).unwrap();
                let child = Rc::clone(element.child("label").unwrap());
                prop_assert_eq!(child.control().value(), Some(json!(label)));
                let path = child.instance_path().to_string();
                prop_assert_eq!(path, format!("form.__children.rows.__children[{index}].label"));
                let found = engine.get_component_instance(&format!("form.__children.rows.__children[{index}].label")).unwrap();
                prop_assert!(Rc::ptr_eq(&found, &child));
            }
        }
    }

    #[test]
    fn identical_data_builds_identical_outlines(len in 0usize..6) {
        let rows: Vec<Value> = (0..len).map(|i| json!({ "label": i })).collect();
        let form = || {
            Descriptor::form("form")
                .default_value(json!({ "rows": rows.clone() }))
                .child(Descriptor::array("rows").child(Descriptor::primitive("label")))
        };
        let first = FormEngine::default();
        first.rebuild([form()]).unwrap();
        let second = FormEngine::default();
        second.rebuild([form()]).unwrap();
        second.rebuild([form()]).unwrap();
        prop_assert_eq!(first.outline(), second.outline());
    }
}
