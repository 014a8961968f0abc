#![forbid(unsafe_code)]

//! Memoized derived values behind a dependency [`Gate`].
//!
//! # Design
//!
//! [`Computed<T>`] pairs a gate with the last derived value. Each evaluation
//! pass offers the current [`DependencyReading`]; the value is recomputed only
//! when the gate fires (or the cache was invalidated), and the last value stays
//! readable on passes where nothing changed.
//!
//! Evaluation is split into [`poll`](Computed::poll) and
//! [`commit`](Computed::commit) so a caller can release its own borrows while
//! running the compute function. [`evaluate`](Computed::evaluate) does both.
//!
//! # Invariants
//!
//! 1. `get()` returns the value produced by the most recent commit.
//! 2. The compute function runs at most once per gate firing.
//! 3. `version` increments by exactly 1 per commit.
//! 4. A computed with no declared dependency recomputes on every pass.
//!
//! # Failure Modes
//!
//! - **Compute function panics**: nothing is committed, the cached value
//!   remains from the last successful computation and the dirty flag stays
//!   set, so the next poll fires again regardless of the gate.

use std::fmt;

use crate::gate::{DependencyChanges, DependencyReading, DependencySpec, Gate};

/// A gated, memoized derived value.
pub struct Computed<T> {
    gate: Gate,
    cached: Option<T>,
    /// Set when the gate fired but nothing was committed yet, or after
    /// [`invalidate`](Computed::invalidate).
    dirty: bool,
    version: u64,
}

impl<T: fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("cached", &self.cached)
            .field("dirty", &self.dirty)
            .field("version", &self.version)
            .finish()
    }
}

impl<T> Computed<T> {
    #[must_use]
    pub fn new(spec: &DependencySpec) -> Self {
        Self {
            gate: Gate::new(spec),
            cached: None,
            dirty: true,
            version: 0,
        }
    }

    /// Decide whether this pass must recompute. On `Some`, the caller must
    /// compute and [`commit`](Computed::commit).
    pub fn poll(&mut self, reading: DependencyReading) -> Option<DependencyChanges> {
        let changes = if self.dirty || self.cached.is_none() {
            Some(self.gate.force(reading))
        } else {
            self.gate.check(reading)
        };
        if changes.is_some() {
            self.dirty = true;
        }
        changes
    }

    /// Store a freshly computed value.
    pub fn commit(&mut self, value: T) {
        self.cached = Some(value);
        self.dirty = false;
        self.version += 1;
    }

    /// Poll and, if the gate fired, compute and commit. Returns whether a
    /// recomputation happened.
    pub fn evaluate(
        &mut self,
        reading: DependencyReading,
        compute: impl FnOnce(&DependencyChanges) -> T,
    ) -> bool {
        match self.poll(reading) {
            Some(changes) => {
                let value = compute(&changes);
                self.commit(value);
                true
            }
            None => false,
        }
    }

    /// Last committed value.
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        self.cached.as_ref()
    }

    /// Whether the next poll fires regardless of the gate.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty || self.cached.is_none()
    }

    /// Force the next poll to fire.
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    /// Number of commits so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }
}

impl<T: Clone> Computed<T> {
    /// Clone of the last committed value.
    #[must_use]
    pub fn value(&self) -> Option<T> {
        self.cached.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn props(pairs: &[(&str, Value)]) -> DependencyReading {
        DependencyReading {
            props: pairs
                .iter()
                .map(|(k, v)| ((*k).to_owned(), v.clone()))
                .collect(),
            ..DependencyReading::default()
        }
    }

    fn doubled(changes: &DependencyChanges) -> i64 {
        changes.props.new_value("x").and_then(Value::as_i64).unwrap_or(0) * 2
    }

    #[test]
    fn first_evaluation_computes() {
        let mut computed = Computed::new(&DependencySpec::none().props(["x"]));
        assert!(computed.is_dirty());
        assert!(computed.evaluate(props(&[("x", json!(10))]), doubled));
        assert_eq!(computed.get(), Some(&20));
        assert_eq!(computed.version(), 1);
    }

    #[test]
    fn memoization() {
        let mut computed = Computed::new(&DependencySpec::none().props(["x"]));
        let mut calls = 0;
        for _ in 0..3 {
            computed.evaluate(props(&[("x", json!(1))]), |c| {
                calls += 1;
                doubled(c)
            });
        }
        assert_eq!(calls, 1);
        assert_eq!(computed.version(), 1);
    }

    #[test]
    fn unrelated_prop_does_not_recompute() {
        let mut computed = Computed::new(&DependencySpec::none().props(["x"]));
        computed.evaluate(props(&[("x", json!(1))]), doubled);
        let mut reading = props(&[("x", json!(1))]);
        reading.state.insert("y".into(), json!(2));
        assert!(!computed.evaluate(reading, doubled));
        assert_eq!(computed.get(), Some(&2));
    }

    #[test]
    fn dependency_change_recomputes_with_previous_and_new() {
        let mut computed = Computed::new(&DependencySpec::none().props(["x"]));
        computed.evaluate(props(&[("x", json!(1))]), doubled);

        let mut seen = None;
        computed.evaluate(props(&[("x", json!(5))]), |c| {
            seen = Some((
                c.props.previous_value("x").cloned(),
                c.props.new_value("x").cloned(),
            ));
            doubled(c)
        });
        assert_eq!(seen, Some((Some(json!(1)), Some(json!(5)))));
        assert_eq!(computed.get(), Some(&10));
        assert_eq!(computed.version(), 2);
    }

    #[test]
    fn no_dependencies_recompute_every_pass() {
        let mut computed = Computed::new(&DependencySpec::none());
        for i in 1..=4 {
            assert!(computed.evaluate(DependencyReading::default(), |_| i));
        }
        assert_eq!(computed.version(), 4);
        assert_eq!(computed.value(), Some(4));
    }

    #[test]
    fn invalidate_forces_recompute() {
        let mut computed = Computed::new(&DependencySpec::none().props(["x"]));
        computed.evaluate(props(&[("x", json!(3))]), doubled);
        computed.invalidate();
        assert!(computed.is_dirty());
        assert!(computed.evaluate(props(&[("x", json!(3))]), doubled));
        assert_eq!(computed.version(), 2);
    }

    #[test]
    fn uncommitted_poll_stays_dirty() {
        let mut computed = Computed::new(&DependencySpec::none().props(["x"]));
        computed.evaluate(props(&[("x", json!(1))]), doubled);

        // Gate fires but the caller never commits (compute failed).
        assert!(computed.poll(props(&[("x", json!(2))])).is_some());
        assert!(computed.is_dirty());
        assert_eq!(computed.get(), Some(&2));

        // Same reading again still fires.
        assert!(computed.poll(props(&[("x", json!(2))])).is_some());
        computed.commit(4);
        assert!(!computed.is_dirty());
    }

    #[test]
    fn debug_format() {
        let mut computed = Computed::new(&DependencySpec::none());
        computed.commit(42);
        let dbg = format!("{computed:?}");
        assert!(dbg.contains("Computed"));
        assert!(dbg.contains("42"));
    }
}
