#![forbid(unsafe_code)]

//! Directed dependency graph with cycle reporting.
//!
//! An edge `from -> to` reads "`to` must be re-checked whenever `from`
//! changes". Nodes and edges are kept in ordered sets so queries and cycle
//! reports are deterministic.
//!
//! # Cycle detection
//!
//! Depth-first search with an on-stack set, driven by an explicit frame stack
//! so long chains do not grow the call stack. Reaching a node that is already
//! on the stack records the stack slice from that node's first occurrence to
//! the current node, then the search continues with the remaining edges and
//! components. Fully explored nodes are not revisited, so each back edge is
//! reported once.

use std::collections::{BTreeMap, BTreeSet};
use std::iter::Flatten;
use std::option;

/// Cycles found in a [`DependencyGraph`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport<K> {
    pub cycles: Vec<Vec<K>>,
    pub edge_count: usize,
}

impl<K: PartialEq> CycleReport<K> {
    #[must_use]
    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }

    /// Whether `node` takes part in any reported cycle.
    #[must_use]
    pub fn involves(&self, node: &K) -> bool {
        self.cycles.iter().any(|cycle| cycle.contains(node))
    }
}

/// Directed graph of "depends on" edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph<K: Ord> {
    edges: BTreeMap<K, BTreeSet<K>>,
}

impl<K: Ord + Clone> Default for DependencyGraph<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone> DependencyGraph<K> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            edges: BTreeMap::new(),
        }
    }

    /// Record `from -> to`. Returns `false` if the edge already existed.
    pub fn add_edge(&mut self, from: K, to: K) -> bool {
        self.edges.entry(from).or_default().insert(to)
    }

    pub fn clear(&mut self) {
        self.edges.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    /// Every edge in `(from, to)` order.
    pub fn edges(&self) -> impl Iterator<Item = (&K, &K)> {
        self.edges
            .iter()
            .flat_map(|(from, targets)| targets.iter().map(move |to| (from, to)))
    }

    /// Nodes that must be re-checked when `node` changes.
    #[must_use]
    pub fn dependents(&self, node: &K) -> Vec<K> {
        self.edges
            .get(node)
            .map(|targets| targets.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every cycle reachable in the graph. Never fails; an empty result means
    /// the graph is acyclic.
    #[must_use]
    pub fn detect_cycles(&self) -> Vec<Vec<K>> {
        let mut path: Vec<&K> = Vec::new();
        let mut on_path: BTreeSet<&K> = BTreeSet::new();
        let mut done: BTreeSet<&K> = BTreeSet::new();
        let mut cycles = Vec::new();

        for root in self.edges.keys() {
            if done.contains(root) {
                continue;
            }
            path.push(root);
            on_path.insert(root);
            let mut frames = vec![(root, self.targets(root))];
            while let Some((node, targets)) = frames.last_mut() {
                match targets.next() {
                    Some(target) if on_path.contains(target) => {
                        let start = path.iter().position(|entry| *entry == target).unwrap_or(0);
                        cycles.push(path[start..].iter().map(|entry| (*entry).clone()).collect());
                    }
                    Some(target) if !done.contains(target) => {
                        path.push(target);
                        on_path.insert(target);
                        frames.push((target, self.targets(target)));
                    }
                    Some(_) => {}
                    None => {
                        let node = *node;
                        frames.pop();
                        path.pop();
                        on_path.remove(node);
                        done.insert(node);
                    }
                }
            }
        }
        cycles
    }

    #[must_use]
    pub fn report(&self) -> CycleReport<K> {
        CycleReport {
            cycles: self.detect_cycles(),
            edge_count: self.edge_count(),
        }
    }

    fn targets<'a>(&'a self, node: &K) -> Flatten<option::IntoIter<&'a BTreeSet<K>>> {
        self.edges.get(node).into_iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&'static str, &'static str)]) -> DependencyGraph<&'static str> {
        let mut graph = DependencyGraph::new();
        for (from, to) in edges {
            graph.add_edge(*from, *to);
        }
        graph
    }

    #[test]
    fn three_cycle_reported_once() {
        let cycles = graph(&[("A", "B"), ("B", "C"), ("C", "A")]).detect_cycles();
        assert_eq!(cycles.len(), 1);
        let members: BTreeSet<_> = cycles[0].iter().copied().collect();
        assert_eq!(members, BTreeSet::from(["A", "B", "C"]));
    }

    #[test]
    fn chain_has_no_cycle() {
        assert!(graph(&[("A", "B"), ("B", "C")]).detect_cycles().is_empty());
    }

    #[test]
    fn self_loop_is_a_cycle() {
        assert_eq!(graph(&[("A", "A")]).detect_cycles(), vec![vec!["A"]]);
    }

    #[test]
    fn scanning_continues_after_first_cycle() {
        let report = graph(&[("A", "B"), ("B", "A"), ("X", "Y"), ("Y", "X"), ("P", "Q")]).report();
        assert_eq!(report.cycles.len(), 2);
        assert!(report.involves(&"A"));
        assert!(report.involves(&"Y"));
        assert!(!report.involves(&"P"));
        assert_eq!(report.edge_count, 5);
    }

    #[test]
    fn cycle_slice_starts_at_reentry_node() {
        let cycles = graph(&[("start", "A"), ("A", "B"), ("B", "A")]).detect_cycles();
        assert_eq!(cycles, vec![vec!["A", "B"]]);
    }

    #[test]
    fn dependents_are_direct_and_sorted() {
        let graph = graph(&[("start", "end"), ("start", "duration"), ("end", "total")]);
        assert_eq!(graph.dependents(&"start"), vec!["duration", "end"]);
        assert!(graph.dependents(&"total").is_empty());
    }

    #[test]
    fn duplicate_edges_collapse() {
        let mut graph = DependencyGraph::new();
        assert!(graph.add_edge(1, 2));
        assert!(!graph.add_edge(1, 2));
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.edges().collect::<Vec<_>>(), vec![(&1, &2)]);
        graph.clear();
        assert!(graph.is_empty());
    }

    #[test]
    fn long_chains_do_not_exhaust_the_stack() {
        let mut chain = DependencyGraph::new();
        for i in 0..200_000u32 {
            chain.add_edge(i, i + 1);
        }
        assert!(chain.detect_cycles().is_empty());

        chain.add_edge(200_000, 0);
        let cycles = chain.detect_cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), 200_001);
        assert_eq!(cycles[0].first(), Some(&0));
    }
}
