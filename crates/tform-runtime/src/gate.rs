#![forbid(unsafe_code)]

//! Dependency slices and the gate that decides whether an action re-runs.
//!
//! An action or computed value declares up to four disjoint dependency
//! slices: keys of its own props, keys of its own state, external field value
//! paths, and caller-supplied meta keys. Each evaluation pass reads the
//! current values of the declared keys into a [`DependencyReading`] and hands
//! it to the [`Gate`].
//!
//! # Invariants
//!
//! 1. A gate with no declared slice fires on every check.
//! 2. A gate with declared slices fires only when at least one declared slice
//!    differs from the memo recorded at its last firing (or priming).
//! 3. Undeclared slices never influence the decision.
//! 4. After firing, the memo equals the reading that caused it.
//!
//! A slice declared with an empty key list never changes, so a gate declaring
//! only such slices fires once and then stays quiet.

use std::collections::BTreeMap;

use bitflags::bitflags;
use serde_json::Value;

bitflags! {
    /// Mask of dependency slices.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DepSlices: u8 {
        const PROPS = 1 << 0;
        const STATE = 1 << 1;
        const FIELDS = 1 << 2;
        const META = 1 << 3;
    }
}

/// Values read for one slice, keyed by the declared key. Missing values are
/// recorded as `Value::Null`.
pub type Slice = BTreeMap<String, Value>;

/// Keys an action depends on, per slice. `None` = slice not declared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySpec {
    pub props: Option<Vec<String>>,
    pub state: Option<Vec<String>>,
    pub fields: Option<Vec<String>>,
    pub meta: Option<Vec<String>>,
}

fn keys<I, K>(items: I) -> Option<Vec<String>>
where
    I: IntoIterator<Item = K>,
    K: Into<String>,
{
    Some(items.into_iter().map(Into::into).collect())
}

impl DependencySpec {
    /// No dependencies: the gate is always dirty.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn props<I, K>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.props = keys(items);
        self
    }

    #[must_use]
    pub fn state<I, K>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.state = keys(items);
        self
    }

    /// Field value paths, resolved by the caller.
    #[must_use]
    pub fn fields<I, K>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.fields = keys(items);
        self
    }

    #[must_use]
    pub fn meta<I, K>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.meta = keys(items);
        self
    }

    /// Which slices are declared.
    #[must_use]
    pub fn declared(&self) -> DepSlices {
        let mut mask = DepSlices::empty();
        mask.set(DepSlices::PROPS, self.props.is_some());
        mask.set(DepSlices::STATE, self.state.is_some());
        mask.set(DepSlices::FIELDS, self.fields.is_some());
        mask.set(DepSlices::META, self.meta.is_some());
        mask
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.declared().is_empty()
    }
}

/// Current values of every declared slice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyReading {
    pub props: Slice,
    pub state: Slice,
    pub fields: Slice,
    pub meta: Slice,
}

impl DependencyReading {
    /// The slice selected by a single-flag mask. Unknown masks yield the
    /// props slice.
    #[must_use]
    pub fn slice(&self, which: DepSlices) -> &Slice {
        if which == DepSlices::STATE {
            &self.state
        } else if which == DepSlices::FIELDS {
            &self.fields
        } else if which == DepSlices::META {
            &self.meta
        } else {
            &self.props
        }
    }
}

/// Previous and new values for one slice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SliceChange {
    /// `None` on the first firing.
    pub previous: Option<Slice>,
    pub new: Slice,
}

impl SliceChange {
    #[must_use]
    pub fn changed(&self) -> bool {
        self.previous.as_ref() != Some(&self.new)
    }

    /// Previous value of one key, `None` on first firing or when absent.
    #[must_use]
    pub fn previous_value(&self, key: &str) -> Option<&Value> {
        self.previous.as_ref()?.get(key)
    }

    #[must_use]
    pub fn new_value(&self, key: &str) -> Option<&Value> {
        self.new.get(key)
    }
}

/// `{previous, new}` for every slice, handed to a firing action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyChanges {
    pub props: SliceChange,
    pub state: SliceChange,
    pub fields: SliceChange,
    pub meta: SliceChange,
}

impl DependencyChanges {
    #[must_use]
    pub fn between(previous: Option<&DependencyReading>, new: &DependencyReading) -> Self {
        let change = |pick: fn(&DependencyReading) -> &Slice| SliceChange {
            previous: previous.map(|p| pick(p).clone()),
            new: pick(new).clone(),
        };
        Self {
            props: change(|r| &r.props),
            state: change(|r| &r.state),
            fields: change(|r| &r.fields),
            meta: change(|r| &r.meta),
        }
    }

    /// Whether this is the first firing (no memo existed).
    #[must_use]
    pub fn is_initial(&self) -> bool {
        self.props.previous.is_none()
    }

    /// Mask of slices whose values differ from the previous firing.
    #[must_use]
    pub fn changed_slices(&self) -> DepSlices {
        let mut mask = DepSlices::empty();
        mask.set(DepSlices::PROPS, self.props.changed());
        mask.set(DepSlices::STATE, self.state.changed());
        mask.set(DepSlices::FIELDS, self.fields.changed());
        mask.set(DepSlices::META, self.meta.changed());
        mask
    }
}

/// Shallow-compare gate memoizing the last reading of one action.
#[derive(Debug, Clone, Default)]
pub struct Gate {
    declared: DepSlices,
    memo: Option<DependencyReading>,
    fired: u64,
}

impl Gate {
    #[must_use]
    pub fn new(spec: &DependencySpec) -> Self {
        Self {
            declared: spec.declared(),
            memo: None,
            fired: 0,
        }
    }

    #[must_use]
    pub fn declared(&self) -> DepSlices {
        self.declared
    }

    /// No declared slice: fires on every check.
    #[must_use]
    pub fn is_always_dirty(&self) -> bool {
        self.declared.is_empty()
    }

    #[must_use]
    pub fn memo(&self) -> Option<&DependencyReading> {
        self.memo.as_ref()
    }

    /// How many times the gate has fired.
    #[must_use]
    pub fn fired(&self) -> u64 {
        self.fired
    }

    /// Whether `reading` would fire the gate, without recording anything.
    #[must_use]
    pub fn is_dirty(&self, reading: &DependencyReading) -> bool {
        if self.is_always_dirty() {
            return true;
        }
        match &self.memo {
            None => true,
            Some(memo) => self
                .declared
                .iter()
                .any(|slice| memo.slice(slice) != reading.slice(slice)),
        }
    }

    /// Record `reading` as the baseline without firing.
    pub fn prime(&mut self, reading: DependencyReading) {
        self.memo = Some(reading);
    }

    /// Fire unconditionally.
    pub fn force(&mut self, reading: DependencyReading) -> DependencyChanges {
        let changes = DependencyChanges::between(self.memo.as_ref(), &reading);
        self.memo = Some(reading);
        self.fired += 1;
        changes
    }

    /// Fire when a declared slice changed since the memo.
    pub fn check(&mut self, reading: DependencyReading) -> Option<DependencyChanges> {
        if self.is_dirty(&reading) {
            Some(self.force(reading))
        } else {
            None
        }
    }
}
