#![forbid(unsafe_code)]

//! Synchronous change bus keyed by instance path.
//!
//! Publishers emit a [`ChangeEvent`] carrying the affected instance path (or
//! `None` for a global invalidation) and a shared snapshot. Subscribers declare
//! a [`PathFilter`] and are invoked when the event matches it.
//!
//! # Invariants
//!
//! 1. Every subscriber alive at publish time observes each matching publish
//!    exactly once, in subscription order.
//! 2. A subscriber added during a publish does not observe that publish.
//! 3. A subscriber dropped during a publish is skipped for the rest of it.
//! 4. A publish issued from inside a callback is delivered to completion
//!    before the outer publish continues with its next subscriber.
//!
//! # Failure Modes
//!
//! - **Callback panics**: the nesting depth counter is restored by a drop
//!   guard; remaining subscribers of that publish are not invoked.
//! - **Unbounded re-entrancy**: a callback that always re-publishes recurses
//!   until the stack is exhausted. Nesting depth is reported through
//!   [`ChangeBus::depth`] and the `bus.publish` trace event.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tform_core::InstancePath;

/// One published change.
pub struct ChangeEvent<S> {
    /// `None` means every subscriber is affected.
    pub affected_path: Option<InstancePath>,
    pub snapshot: Rc<S>,
}

impl<S> ChangeEvent<S> {
    #[must_use]
    pub fn global(snapshot: Rc<S>) -> Self {
        Self {
            affected_path: None,
            snapshot,
        }
    }

    #[must_use]
    pub fn scoped(path: InstancePath, snapshot: Rc<S>) -> Self {
        Self {
            affected_path: Some(path),
            snapshot,
        }
    }

    #[must_use]
    pub fn is_global(&self) -> bool {
        self.affected_path.is_none()
    }
}

impl<S> Clone for ChangeEvent<S> {
    fn clone(&self) -> Self {
        Self {
            affected_path: self.affected_path.clone(),
            snapshot: Rc::clone(&self.snapshot),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for ChangeEvent<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeEvent")
            .field(
                "affected_path",
                &self.affected_path.as_ref().map(ToString::to_string),
            )
            .field("snapshot", &self.snapshot)
            .finish()
    }
}

/// Which events a subscriber wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathFilter {
    Everything,
    Exact(InstancePath),
    AnyOf(Vec<InstancePath>),
}

impl PathFilter {
    /// Whether an event with `affected` reaches this filter.
    #[must_use]
    pub fn matches(&self, affected: Option<&InstancePath>) -> bool {
        let Some(path) = affected else {
            return true;
        };
        match self {
            Self::Everything => true,
            Self::Exact(watched) => watched == path,
            Self::AnyOf(watched) => watched.contains(path),
        }
    }
}

impl From<InstancePath> for PathFilter {
    fn from(path: InstancePath) -> Self {
        Self::Exact(path)
    }
}

impl From<Vec<InstancePath>> for PathFilter {
    fn from(paths: Vec<InstancePath>) -> Self {
        Self::AnyOf(paths)
    }
}

struct Listener<S> {
    filter: PathFilter,
    callback: Box<dyn Fn(&ChangeEvent<S>)>,
}

struct BusShared<S> {
    listeners: RefCell<Vec<Weak<Listener<S>>>>,
    published: Cell<u64>,
    depth: Cell<usize>,
}

/// RAII guard returned by [`ChangeBus::subscribe`].
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct Subscription {
    listener: Option<Rc<dyn Any>>,
}

impl Subscription {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.listener.is_some()
    }

    /// Detach now instead of waiting for drop.
    pub fn unsubscribe(mut self) {
        self.listener = None;
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

struct DepthGuard<'a>(&'a Cell<usize>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

/// Publish/subscribe hub. Cloning creates a new handle to the **same** bus.
pub struct ChangeBus<S> {
    shared: Rc<BusShared<S>>,
}

impl<S> Clone for ChangeBus<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<S: 'static> Default for ChangeBus<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for ChangeBus<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeBus")
            .field("listeners", &self.shared.listeners.borrow().len())
            .field("published", &self.shared.published.get())
            .finish()
    }
}

impl<S: 'static> ChangeBus<S> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Rc::new(BusShared {
                listeners: RefCell::new(Vec::new()),
                published: Cell::new(0),
                depth: Cell::new(0),
            }),
        }
    }

    /// Register `callback` for events matching `filter`.
    pub fn subscribe(
        &self,
        filter: impl Into<PathFilter>,
        callback: impl Fn(&ChangeEvent<S>) + 'static,
    ) -> Subscription {
        let listener = Rc::new(Listener {
            filter: filter.into(),
            callback: Box::new(callback),
        });
        self.shared
            .listeners
            .borrow_mut()
            .push(Rc::downgrade(&listener));
        Subscription {
            listener: Some(listener as Rc<dyn Any>),
        }
    }

    /// Deliver `event` to every matching subscriber. Returns how many
    /// callbacks ran.
    pub fn publish(&self, event: ChangeEvent<S>) -> usize {
        let snapshot: Vec<Weak<Listener<S>>> = {
            let mut listeners = self.shared.listeners.borrow_mut();
            listeners.retain(|weak| weak.strong_count() > 0);
            listeners.clone()
        };
        self.shared.published.set(self.shared.published.get() + 1);
        self.shared.depth.set(self.shared.depth.get() + 1);
        let _depth = DepthGuard(&self.shared.depth);

        tracing::trace!(
            message = "bus.publish",
            path = ?event.affected_path.as_ref().map(ToString::to_string),
            listeners = snapshot.len(),
            depth = self.shared.depth.get()
        );

        let mut delivered = 0;
        for weak in snapshot {
            let Some(listener) = weak.upgrade() else {
                continue;
            };
            if listener.filter.matches(event.affected_path.as_ref()) {
                (listener.callback)(&event);
                delivered += 1;
            }
        }
        delivered
    }

    /// Live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared
            .listeners
            .borrow()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Total publishes since creation.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.shared.published.get()
    }

    /// Current publish nesting depth; zero outside any publish.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.shared.depth.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> InstancePath {
        s.parse().unwrap()
    }

    fn recorder() -> (Rc<RefCell<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(&ChangeEvent<u32>)>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_clone = Rc::clone(&log);
        let make = move |tag: &str| {
            let log = Rc::clone(&log_clone);
            let tag = tag.to_owned();
            Box::new(move |event: &ChangeEvent<u32>| {
                log.borrow_mut().push(format!("{tag}:{}", event.snapshot));
            }) as Box<dyn Fn(&ChangeEvent<u32>)>
        };
        (log, make)
    }

    #[test]
    fn exact_filter_matches_only_its_path() {
        let bus = ChangeBus::new();
        let (log, make) = recorder();
        let _a = bus.subscribe(path("form.__children.rows"), make("rows"));
        let _b = bus.subscribe(path("form.__children.title"), make("title"));

        let delivered = bus.publish(ChangeEvent::scoped(path("form.__children.rows"), Rc::new(1)));
        assert_eq!(delivered, 1);
        assert_eq!(*log.borrow(), vec!["rows:1"]);
    }

    #[test]
    fn any_of_filter_matches_members() {
        let bus = ChangeBus::new();
        let (log, make) = recorder();
        let _sub = bus.subscribe(vec![path("a"), path("b")], make("set"));
        bus.publish(ChangeEvent::scoped(path("b"), Rc::new(1)));
        bus.publish(ChangeEvent::scoped(path("c"), Rc::new(2)));
        assert_eq!(*log.borrow(), vec!["set:1"]);
    }

    #[test]
    fn global_events_reach_everyone_in_order() {
        let bus = ChangeBus::new();
        let (log, make) = recorder();
        let _a = bus.subscribe(path("a"), make("a"));
        let _b = bus.subscribe(PathFilter::Everything, make("all"));
        let _c = bus.subscribe(vec![path("z")], make("z"));
        bus.publish(ChangeEvent::global(Rc::new(7)));
        assert_eq!(*log.borrow(), vec!["a:7", "all:7", "z:7"]);
    }

    #[test]
    fn dropped_subscription_stops_delivery() {
        let bus = ChangeBus::new();
        let (log, make) = recorder();
        let sub = bus.subscribe(PathFilter::Everything, make("x"));
        assert_eq!(bus.subscriber_count(), 1);
        sub.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(ChangeEvent::global(Rc::new(1))), 0);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn nested_publish_completes_before_next_subscriber() {
        let bus: ChangeBus<u32> = ChangeBus::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let inner_bus = bus.clone();
        let first_log = Rc::clone(&log);
        let _first = bus.subscribe(PathFilter::Everything, move |event| {
            first_log.borrow_mut().push(format!("first:{}", event.snapshot));
            if *event.snapshot == 1 {
                inner_bus.publish(ChangeEvent::global(Rc::new(2)));
            }
        });
        let second_log = Rc::clone(&log);
        let _second = bus.subscribe(PathFilter::Everything, move |event| {
            second_log.borrow_mut().push(format!("second:{}", event.snapshot));
        });

        bus.publish(ChangeEvent::global(Rc::new(1)));
        assert_eq!(
            *log.borrow(),
            vec!["first:1", "first:2", "second:2", "second:1"]
        );
        assert_eq!(bus.published(), 2);
        assert_eq!(bus.depth(), 0);
    }

    #[test]
    fn subscriber_added_during_publish_waits_for_next() {
        let bus: ChangeBus<u32> = ChangeBus::new();
        let late: Rc<RefCell<Vec<Subscription>>> = Rc::new(RefCell::new(Vec::new()));
        let hits = Rc::new(Cell::new(0u32));

        let bus_clone = bus.clone();
        let late_clone = Rc::clone(&late);
        let hits_clone = Rc::clone(&hits);
        let _adder = bus.subscribe(PathFilter::Everything, move |_| {
            if late_clone.borrow().is_empty() {
                let hits = Rc::clone(&hits_clone);
                let sub = bus_clone.subscribe(PathFilter::Everything, move |_| {
                    hits.set(hits.get() + 1);
                });
                late_clone.borrow_mut().push(sub);
            }
        });

        bus.publish(ChangeEvent::global(Rc::new(1)));
        assert_eq!(hits.get(), 0);
        bus.publish(ChangeEvent::global(Rc::new(2)));
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn subscriber_dropped_during_publish_is_skipped() {
        let bus: ChangeBus<u32> = ChangeBus::new();
        let victim: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let hits = Rc::new(Cell::new(0u32));

        let victim_clone = Rc::clone(&victim);
        let _killer = bus.subscribe(PathFilter::Everything, move |_| {
            victim_clone.borrow_mut().take();
        });
        let hits_clone = Rc::clone(&hits);
        *victim.borrow_mut() = Some(bus.subscribe(PathFilter::Everything, move |_| {
            hits_clone.set(hits_clone.get() + 1);
        }));

        bus.publish(ChangeEvent::global(Rc::new(1)));
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn clone_shares_subscribers() {
        let bus: ChangeBus<u32> = ChangeBus::new();
        let other = bus.clone();
        let _sub = other.subscribe(PathFilter::Everything, |_| {});
        assert_eq!(bus.subscriber_count(), 1);
    }
}
