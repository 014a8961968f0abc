#![forbid(unsafe_code)]

//! Lifecycle phase scheduling.
//!
//! | phase            | attach          | evaluation pass | detach |
//! |------------------|-----------------|-----------------|--------|
//! | `Attach`         | runs once       | -               | -      |
//! | `Detach`         | -               | -               | runs once |
//! | `Update`         | primes the memo | gated           | -      |
//! | `AttachOrUpdate` | runs            | gated           | -      |
//!
//! "Gated" means the action runs only when its [`Gate`] fires.

use crate::gate::{DependencyChanges, DependencyReading, DependencySpec, Gate};

/// When a lifecycle action is meant to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecyclePhase {
    Attach,
    Detach,
    Update,
    AttachOrUpdate,
}

/// What is happening to the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    Attach,
    Pass,
    Detach,
}

/// Per-action scheduling state.
#[derive(Debug, Clone)]
pub struct ActionGate {
    phase: LifecyclePhase,
    gate: Gate,
    attached: bool,
    detached: bool,
}

impl ActionGate {
    #[must_use]
    pub fn new(phase: LifecyclePhase, spec: &DependencySpec) -> Self {
        Self {
            phase,
            gate: Gate::new(spec),
            attached: false,
            detached: false,
        }
    }

    #[must_use]
    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    /// How many times the action has been cleared to run.
    #[must_use]
    pub fn runs(&self) -> u64 {
        self.gate.fired()
    }

    /// Whether `trigger` needs a dependency reading at all. Callers can skip
    /// reading dependencies when this is `false`.
    #[must_use]
    pub fn wants(&self, trigger: Trigger) -> bool {
        if self.detached {
            return false;
        }
        match (self.phase, trigger) {
            (LifecyclePhase::Attach, Trigger::Attach) => !self.attached,
            (LifecyclePhase::Detach, Trigger::Detach) => true,
            (LifecyclePhase::Update | LifecyclePhase::AttachOrUpdate, Trigger::Attach) => {
                !self.attached
            }
            (LifecyclePhase::Update | LifecyclePhase::AttachOrUpdate, Trigger::Pass) => true,
            _ => false,
        }
    }

    /// Decide whether the action runs for `trigger`, updating the memo.
    pub fn on(&mut self, trigger: Trigger, reading: DependencyReading) -> Option<DependencyChanges> {
        if !self.wants(trigger) {
            return None;
        }
        match trigger {
            Trigger::Attach => {
                self.attached = true;
                match self.phase {
                    LifecyclePhase::Update => {
                        self.gate.prime(reading);
                        None
                    }
                    _ => Some(self.gate.force(reading)),
                }
            }
            Trigger::Pass => self.gate.check(reading),
            Trigger::Detach => {
                self.detached = true;
                Some(self.gate.force(reading))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reading(x: i64) -> DependencyReading {
        let mut reading = DependencyReading::default();
        reading.props.insert("x".into(), json!(x));
        reading
    }

    fn spec() -> DependencySpec {
        DependencySpec::none().props(["x"])
    }

    #[test]
    fn attach_runs_exactly_once() {
        let mut action = ActionGate::new(LifecyclePhase::Attach, &spec());
        assert!(action.on(Trigger::Attach, reading(1)).is_some());
        assert!(action.on(Trigger::Attach, reading(2)).is_none());
        assert!(action.on(Trigger::Pass, reading(3)).is_none());
        assert_eq!(action.runs(), 1);
    }

    #[test]
    fn detach_runs_once_on_removal() {
        let mut action = ActionGate::new(LifecyclePhase::Detach, &spec());
        assert!(action.on(Trigger::Attach, reading(1)).is_none());
        assert!(action.on(Trigger::Pass, reading(2)).is_none());
        assert!(action.on(Trigger::Detach, reading(2)).is_some());
        assert!(action.on(Trigger::Detach, reading(2)).is_none());
    }

    #[test]
    fn update_is_primed_at_attach() {
        let mut action = ActionGate::new(LifecyclePhase::Update, &spec());
        assert!(action.on(Trigger::Attach, reading(1)).is_none());
        assert!(action.on(Trigger::Pass, reading(1)).is_none());
        let changes = action.on(Trigger::Pass, reading(2)).unwrap();
        assert_eq!(changes.props.previous_value("x"), Some(&json!(1)));
    }

    #[test]
    fn attach_or_update_runs_at_attach_then_gated() {
        let mut action = ActionGate::new(LifecyclePhase::AttachOrUpdate, &spec());
        assert!(action.on(Trigger::Attach, reading(1)).unwrap().is_initial());
        assert!(action.on(Trigger::Pass, reading(1)).is_none());
        assert!(action.on(Trigger::Pass, reading(4)).is_some());
        assert_eq!(action.runs(), 2);
    }

    #[test]
    fn detach_trigger_only_reaches_detach_actions() {
        let mut action = ActionGate::new(LifecyclePhase::AttachOrUpdate, &DependencySpec::none());
        action.on(Trigger::Attach, reading(1));
        assert!(!action.wants(Trigger::Detach));
        assert!(action.on(Trigger::Detach, reading(1)).is_none());
        assert_eq!(action.runs(), 1);
    }
}
