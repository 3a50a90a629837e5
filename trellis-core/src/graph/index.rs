//! Reverse Invalidation Index
//!
//! The index answers one question on every write: which computeds might be
//! stale now that the value at some path changed?
//!
//! # Structure
//!
//! - `exact`: raw dependency path → computeds that read exactly that path.
//! - `subtree`: strict prefix of a raw dependency path → computeds that read
//!   something beneath it. A wholesale replacement of `a.b` reaches a
//!   computed that read `a.b.c` through here.
//! - `children` / `parents`: computed → computeds it read, and the reverse.
//!
//! # Algorithm
//!
//! For a changed path `P`:
//!
//! 1. Look up every prefix of `P` in `exact` (dependencies at or above `P`).
//! 2. Look up `P` in `subtree` (dependencies below `P`).
//! 3. Walk `parents` breadth-first from that set, with a visited set, so a
//!    computed that reads a stale computed is stale too.
//!
//! The cost is proportional to the number of affected edges, never to the
//! number of computeds in the store.
//!
//! Every computed's edges reflect its most recent successful evaluation: the
//! memo engine calls [`InvalidationIndex::link`], which unlinks the previous
//! edges before adding the new ones.

use std::collections::{HashMap, VecDeque};

use indexmap::IndexSet;

use super::path::Path;

type Edges = HashMap<Path, IndexSet<Path>>;

/// Raw-path and computed-to-computed reverse edges for one store.
#[derive(Debug, Default)]
pub struct InvalidationIndex {
    exact: Edges,
    subtree: Edges,
    raw_of: Edges,
    children: Edges,
    parents: Edges,
}

fn add_edge(edges: &mut Edges, from: Path, to: &Path) {
    edges.entry(from).or_default().insert(to.clone());
}

fn remove_edge(edges: &mut Edges, from: &Path, to: &Path) {
    if let Some(set) = edges.get_mut(from) {
        set.shift_remove(to);
        if set.is_empty() {
            edges.remove(from);
        }
    }
}

impl InvalidationIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the edges of `computed` with the ones observed in its latest
    /// evaluation.
    pub fn link(&mut self, computed: &Path, raw: IndexSet<Path>, children: IndexSet<Path>) {
        self.unlink(computed);

        for path in &raw {
            add_edge(&mut self.exact, path.clone(), computed);
            for prefix in path.strict_prefixes() {
                add_edge(&mut self.subtree, prefix, computed);
            }
        }
        for child in &children {
            add_edge(&mut self.parents, child.clone(), computed);
        }

        if !raw.is_empty() {
            self.raw_of.insert(computed.clone(), raw);
        }
        if !children.is_empty() {
            self.children.insert(computed.clone(), children);
        }
    }

    /// Remove every edge that originates at `computed`.
    ///
    /// Edges pointing *to* `computed` (its parents) are owned by those parents
    /// and stay until they are relinked.
    pub fn unlink(&mut self, computed: &Path) {
        if let Some(raw) = self.raw_of.remove(computed) {
            for path in &raw {
                remove_edge(&mut self.exact, path, computed);
                for prefix in path.strict_prefixes() {
                    remove_edge(&mut self.subtree, &prefix, computed);
                }
            }
        }
        if let Some(children) = self.children.remove(computed) {
            for child in &children {
                remove_edge(&mut self.parents, child, computed);
            }
        }
    }

    /// Every computed made stale by a change at `changed`, in discovery order.
    pub fn affected_by(&self, changed: &Path) -> IndexSet<Path> {
        let direct: Vec<Path> = changed
            .prefixes()
            .filter_map(|prefix| self.exact.get(&prefix))
            .chain(self.subtree.get(changed))
            .flatten()
            .cloned()
            .collect();
        self.close_over_parents(direct)
    }

    /// `seeds` plus every computed that read one of them, transitively, in
    /// discovery order.
    pub fn close_over_parents(&self, seeds: impl IntoIterator<Item = Path>) -> IndexSet<Path> {
        let mut affected = IndexSet::new();
        let mut queue = VecDeque::new();

        for computed in seeds {
            if affected.insert(computed.clone()) {
                queue.push_back(computed);
            }
        }

        // BFS over reverse computed edges
        while let Some(computed) = queue.pop_front() {
            if let Some(parents) = self.parents.get(&computed) {
                for parent in parents {
                    if affected.insert(parent.clone()) {
                        queue.push_back(parent.clone());
                    }
                }
            }
        }

        affected
    }

    /// Raw paths `computed` read in its latest evaluation.
    pub fn raw_dependencies(&self, computed: &Path) -> Option<&IndexSet<Path>> {
        self.raw_of.get(computed)
    }

    /// Computeds `computed` read in its latest evaluation.
    pub fn children_of(&self, computed: &Path) -> Option<&IndexSet<Path>> {
        self.children.get(computed)
    }

    /// Computeds that read `computed` in their latest evaluation.
    pub fn parents_of(&self, computed: &Path) -> Option<&IndexSet<Path>> {
        self.parents.get(computed)
    }

    /// Computeds registered directly on the raw path `path`.
    pub fn dependents_of(&self, path: &Path) -> Option<&IndexSet<Path>> {
        self.exact.get(path)
    }

    /// Total number of stored edges, across all maps. Used to check that
    /// relinking never accumulates stale entries.
    pub fn edge_count(&self) -> usize {
        [&self.exact, &self.subtree, &self.raw_of, &self.children, &self.parents]
            .iter()
            .map(|edges| edges.values().map(IndexSet::len).sum::<usize>())
            .sum()
    }
}
