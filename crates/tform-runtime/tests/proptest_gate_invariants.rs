//! Property-based invariant tests for dependency gating.
//!
//! 1. A computed recomputes exactly when its declared slice differs from the
//!    previous reading.
//! 2. Changes confined to undeclared slices never recompute.
//! 3. The cached value always reflects the last declared reading.
//! 4. Acyclic chains never report cycles; closing the chain reports one.

use proptest::prelude::*;
use serde_json::json;
use tform_runtime::{Computed, DependencyGraph, DependencyReading, DependencySpec};

fn reading(x: i64, y: i64) -> DependencyReading {
    let mut reading = DependencyReading::default();
    reading.props.insert("x".into(), json!(x));
    reading.state.insert("y".into(), json!(y));
    reading
}

/// Mirror the engine's reader: only declared keys are read.
fn declared_only(x: i64) -> DependencyReading {
    let mut reading = DependencyReading::default();
    reading.props.insert("x".into(), json!(x));
    reading
}

proptest! {
    #[test]
    fn recompute_iff_declared_slice_changed(steps in prop::collection::vec((0i64..3, 0i64..3), 1..40)) {
        let mut computed = Computed::new(&DependencySpec::none().props(["x"]));
        let mut previous: Option<i64> = None;
        for (x, _y) in steps {
            let fired = computed.evaluate(declared_only(x), |changes| {
                changes.props.new_value("x").cloned().unwrap_or_default()
            });
            prop_assert_eq!(fired, previous != Some(x));
            prop_assert_eq!(computed.get(), Some(&json!(x)));
            previous = Some(x);
        }
    }

    #[test]
    fn undeclared_changes_never_recompute(ys in prop::collection::vec(0i64..100, 1..20)) {
        let mut computed = Computed::new(&DependencySpec::none().props(["x"]));
        computed.evaluate(reading(1, 0), |_| ());
        let mut gated = computed;
        for y in ys {
            let mut next = declared_only(1);
            next.state = reading(1, y).state;
            // State slice is undeclared, so only the props slice is compared.
            prop_assert!(!gated.evaluate(next, |_| ()));
        }
    }

    #[test]
    fn chains_are_acyclic_until_closed(len in 2usize..12) {
        let mut graph = DependencyGraph::new();
        for i in 0..len - 1 {
            graph.add_edge(i, i + 1);
        }
        prop_assert!(graph.detect_cycles().is_empty());
        graph.add_edge(len - 1, 0);
        let cycles = graph.detect_cycles();
        prop_assert_eq!(cycles.len(), 1);
        prop_assert_eq!(cycles[0].len(), len);
    }
}
