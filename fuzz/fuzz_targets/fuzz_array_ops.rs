#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use serde_json::json;
use tform_tree::{Descriptor, FormEngine};

#[derive(Arbitrary, Debug)]
enum FuzzOp {
    Append(u8),
    Prepend(u8),
    Insert(u8, u8),
    Remove(u8),
    RemoveMany(Vec<u8>),
    Swap(u8, u8),
    Move(u8, u8),
    Update(u8),
    Replace(u8),
}

fn items(count: u8) -> Vec<serde_json::Value> {
    (0..count % 4).map(|i| json!({ "name": i })).collect()
}

fuzz_target!(|ops: Vec<FuzzOp>| {
    let engine = FormEngine::default();
    if engine
        .rebuild([Descriptor::form("form")
            .default_value(json!({ "rows": [] }))
            .child(
                Descriptor::array("rows")
                    .child(Descriptor::primitive("name"))
                    .child(Descriptor::array("tags").child(Descriptor::primitive("label"))),
            )])
        .is_err()
    {
        return;
    }
    let Some(rows) = engine
        .get_component_instance("form.__children.rows")
        .and_then(|rows| rows.control().array())
    else {
        return;
    };

    for op in ops.into_iter().take(64) {
        match op {
            FuzzOp::Append(n) => rows.append(items(n)),
            FuzzOp::Prepend(n) => rows.prepend(items(n)),
            FuzzOp::Insert(at, n) => rows.insert(usize::from(at % 8), items(n)),
            FuzzOp::Remove(index) => rows.remove(usize::from(index % 8)),
            FuzzOp::RemoveMany(indices) => {
                let indices: Vec<usize> = indices.iter().map(|i| usize::from(i % 8)).collect();
                rows.remove_many(&indices)
            }
            FuzzOp::Swap(a, b) => rows.swap(usize::from(a % 8), usize::from(b % 8)),
            FuzzOp::Move(from, to) => rows.move_item(usize::from(from % 8), usize::from(to % 8)),
            FuzzOp::Update(index) => rows.update(usize::from(index % 8), json!({ "name": "u" })),
            FuzzOp::Replace(n) => rows.replace(items(n)),
        };
        assert_eq!(rows.keys().len(), rows.len());
    }
});
