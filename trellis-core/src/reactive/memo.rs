//! Computed Memoization
//!
//! A computed is a derived accessor stored in a record slot. The first read
//! evaluates it and caches the result; later reads return the cache until a
//! write invalidates one of the things the evaluation read.
//!
//! # How Computeds Work
//!
//! 1. An entry is created, `Dirty`, the first time a store reads the slot.
//!
//! 2. A read of a `Dirty` entry evaluates it inside its own tracking scope,
//!    relinks the store's reverse index with what the evaluation read, caches
//!    the value, and marks the entry `Clean`.
//!
//! 3. A read of a `Clean` entry returns the cached value without evaluating.
//!
//! 4. A write marks every affected entry `Dirty`. Nothing is recomputed until
//!    the next read.
//!
//! A failed evaluation leaves the entry `Dirty` with its previous value and
//! edges untouched, so the next read retries.
//!
//! # Reads of other stores
//!
//! An evaluation may read stores other than its own. Those reads are kept per
//! entry, outside the reverse index, together with a map from each source store
//! to the entries that read it. When the source store is written it hands the
//! changed paths here, and [`MemoTable::invalidate_foreign`] dirties the
//! matching entries and everything that read them.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

use indexmap::IndexSet;

use crate::error::Result;
use crate::graph::{DepKey, InvalidationIndex, Path};
use crate::store::{Proxy, Value};

use super::context::DependencySet;
use super::subscriber::{Dependency, StoreId};

type Evaluate = dyn Fn(&Proxy) -> Result<Value>;

/// A derived accessor.
///
/// The evaluation function receives the wrapper of the record the accessor is
/// defined on, reads whatever it needs through it, and returns the derived
/// value. It must be free of side effects: it runs lazily, possibly zero or
/// many times between two writes.
///
/// ```rust,ignore
/// let tax = Computed::new(|this| {
///     Ok((this.number("subtotal")? * this.number("taxRate")?).into())
/// });
/// ```
#[derive(Clone)]
pub struct Computed(Rc<Evaluate>);

impl Computed {
    pub fn new<F>(evaluate: F) -> Self
    where
        F: Fn(&Proxy) -> Result<Value> + 'static,
    {
        Self(Rc::new(evaluate))
    }

    pub(crate) fn evaluate(&self, this: &Proxy) -> Result<Value> {
        (self.0)(this)
    }

    /// Whether both handles are the same accessor.
    pub fn ptr_eq(&self, other: &Computed) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Computed(..)")
    }
}

/// Dirty state for a computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoState {
    /// The cached value is up-to-date.
    Clean,

    /// Never evaluated, or something it read has changed since.
    Dirty,
}

/// Cache slot and bookkeeping for one computed.
struct ComputedEntry {
    computed: Computed,
    value: Option<Value>,
    state: MemoState,
    evaluating: bool,
    evaluated_at: Option<Instant>,
    evaluations: u64,
}

impl ComputedEntry {
    fn new(computed: Computed) -> Self {
        Self {
            computed,
            value: None,
            state: MemoState::Dirty,
            evaluating: false,
            evaluated_at: None,
            evaluations: 0,
        }
    }
}

/// What a read should do next with an entry.
pub(crate) enum Lookup {
    /// Clean: here is the cached value.
    Cached(Value),
    /// Dirty: evaluate with this function.
    Evaluate(Computed),
    /// The entry is already on the evaluation stack.
    Cycle,
}

/// A point-in-time view of a computed, for diagnostics and tests.
#[derive(Debug, Clone)]
pub struct ComputedInfo {
    pub path: Path,
    pub state: MemoState,
    pub value: Option<Value>,
    /// Raw paths read in the latest evaluation, including the accessor's own
    /// slot.
    pub raw_dependencies: Vec<Path>,
    /// Computeds read in the latest evaluation.
    pub children: Vec<Path>,
    /// Computeds whose latest evaluation read this one.
    pub parents: Vec<Path>,
    /// Reads of other stores in the latest evaluation.
    pub foreign_dependencies: Vec<Dependency>,
    pub evaluations: u64,
    pub evaluated_at: Option<Instant>,
}

/// All computed entries of one store plus its reverse index.
pub(crate) struct MemoTable {
    store: StoreId,
    entries: HashMap<Path, ComputedEntry>,
    index: InvalidationIndex,
    /// Computed → what its latest evaluation read in other stores.
    foreign: HashMap<Path, Vec<Dependency>>,
    /// Other store → computeds here that read it.
    foreign_readers: HashMap<StoreId, IndexSet<Path>>,
}

impl MemoTable {
    pub fn new(store: StoreId) -> Self {
        Self {
            store,
            entries: HashMap::new(),
            index: InvalidationIndex::new(),
            foreign: HashMap::new(),
            foreign_readers: HashMap::new(),
        }
    }

    /// Make sure an entry exists at `path` for `computed`.
    ///
    /// If the slot now holds a different accessor than the entry was created
    /// for (it was redefined, or its record was replaced), the entry adopts
    /// the new accessor and becomes dirty.
    pub fn ensure(&mut self, path: &Path, computed: &Computed) {
        match self.entries.get_mut(path) {
            Some(entry) if entry.computed.ptr_eq(computed) => {}
            Some(entry) => {
                tracing::trace!(path = %path, "accessor replaced");
                entry.computed = computed.clone();
                entry.state = MemoState::Dirty;
            }
            None => {
                self.entries
                    .insert(path.clone(), ComputedEntry::new(computed.clone()));
            }
        }
    }

    /// Decide what a read of the accessor `computed` at `path` needs. Marks
    /// the entry as evaluating when the answer is [`Lookup::Evaluate`].
    pub fn begin_read(&mut self, path: &Path, computed: &Computed) -> Lookup {
        self.ensure(path, computed);
        let Some(entry) = self.entries.get_mut(path) else {
            return Lookup::Evaluate(computed.clone());
        };
        if entry.evaluating {
            return Lookup::Cycle;
        }
        if entry.state == MemoState::Clean {
            if let Some(value) = &entry.value {
                return Lookup::Cached(value.clone());
            }
        }
        entry.evaluating = true;
        Lookup::Evaluate(entry.computed.clone())
    }

    /// Clear the evaluating mark without touching anything else.
    pub fn abandon(&mut self, path: &Path) {
        if let Some(entry) = self.entries.get_mut(path) {
            entry.evaluating = false;
        }
    }

    /// Store a successful evaluation and relink the index with what it read.
    /// Returns the other stores the evaluation read.
    pub fn commit(&mut self, path: &Path, value: Value, dependencies: &DependencySet) -> IndexSet<StoreId> {
        let mut raw = IndexSet::new();
        let mut children = IndexSet::new();
        let mut foreign = Vec::new();
        for dependency in dependencies {
            if dependency.store != self.store {
                foreign.push(dependency.clone());
                continue;
            }
            match &dependency.key {
                DepKey::Raw(p) => {
                    raw.insert(p.clone());
                }
                DepKey::Computed(p) if p != path => {
                    children.insert(p.clone());
                }
                DepKey::Computed(_) => {}
            }
        }
        // The accessor's own slot: replacing it must dirty the entry.
        raw.insert(path.clone());

        tracing::trace!(
            path = %path,
            raw = raw.len(),
            children = children.len(),
            foreign = foreign.len(),
            "computed evaluated"
        );
        self.index.link(path, raw, children);
        let sources = self.link_foreign(path, foreign);

        if let Some(entry) = self.entries.get_mut(path) {
            entry.value = Some(value);
            entry.state = MemoState::Clean;
            entry.evaluating = false;
            entry.evaluated_at = Some(Instant::now());
            entry.evaluations += 1;
        }
        sources
    }

    /// Replace the foreign reads of `computed`.
    fn link_foreign(&mut self, computed: &Path, foreign: Vec<Dependency>) -> IndexSet<StoreId> {
        if let Some(previous) = self.foreign.remove(computed) {
            for dependency in &previous {
                if let Some(readers) = self.foreign_readers.get_mut(&dependency.store) {
                    readers.shift_remove(computed);
                    if readers.is_empty() {
                        self.foreign_readers.remove(&dependency.store);
                    }
                }
            }
        }

        let sources: IndexSet<StoreId> = foreign.iter().map(|d| d.store).collect();
        for store in &sources {
            self.foreign_readers
                .entry(*store)
                .or_default()
                .insert(computed.clone());
        }
        if !foreign.is_empty() {
            self.foreign.insert(computed.clone(), foreign);
        }
        sources
    }

    /// Mark everything affected by a change at `changed` dirty and return it.
    pub fn invalidate(&mut self, changed: &Path) -> IndexSet<Path> {
        let affected = self.index.affected_by(changed);
        for path in &affected {
            if let Some(entry) = self.entries.get_mut(path) {
                if entry.state == MemoState::Clean {
                    tracing::trace!(path = %path, cause = %changed, "computed marked dirty");
                }
                entry.state = MemoState::Dirty;
            }
        }
        affected
    }

    /// Mark dirty every computed whose foreign reads of `source` are touched by
    /// a write there, plus everything that read those computeds. `changed` are
    /// the written paths in `source`, `affected` the computeds there the write
    /// dirtied.
    ///
    /// Returns only the entries that were clean: a dirty entry's readers were
    /// told when it became dirty.
    pub fn invalidate_foreign(
        &mut self,
        source: StoreId,
        changed: &[Path],
        affected: &IndexSet<Path>,
    ) -> IndexSet<Path> {
        let Some(readers) = self.foreign_readers.get(&source) else {
            return IndexSet::new();
        };
        let touched = |dependency: &Dependency| {
            dependency.store == source
                && match &dependency.key {
                    DepKey::Raw(path) => changed.iter().any(|c| c.is_related(path)),
                    DepKey::Computed(path) => affected.contains(path),
                }
        };
        let seeds: Vec<Path> = readers
            .iter()
            .filter(|path| {
                self.foreign
                    .get(*path)
                    .is_some_and(|reads| reads.iter().any(&touched))
            })
            .cloned()
            .collect();

        let mut dirtied = IndexSet::new();
        for path in self.index.close_over_parents(seeds) {
            if let Some(entry) = self.entries.get_mut(&path) {
                if entry.state == MemoState::Clean {
                    tracing::trace!(path = %path, source = %source, "computed marked dirty by another store");
                    entry.state = MemoState::Dirty;
                    dirtied.insert(path);
                }
            }
        }
        dirtied
    }

    /// What the latest evaluation of `path` read in other stores.
    pub fn foreign_dependencies(&self, path: &Path) -> Vec<Dependency> {
        self.foreign.get(path).cloned().unwrap_or_default()
    }

    /// Raw paths to hand to a reader of `path`.
    pub fn raw_dependencies(&self, path: &Path) -> Vec<Path> {
        self.index
            .raw_dependencies(path)
            .map(|raw| raw.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn state(&self, path: &Path) -> Option<MemoState> {
        self.entries.get(path).map(|entry| entry.state)
    }

    pub fn info(&self, path: &Path) -> Option<ComputedInfo> {
        let entry = self.entries.get(path)?;
        let collect = |set: Option<&IndexSet<Path>>| -> Vec<Path> {
            set.map(|s| s.iter().cloned().collect()).unwrap_or_default()
        };
        Some(ComputedInfo {
            path: path.clone(),
            state: entry.state,
            value: entry.value.clone(),
            raw_dependencies: collect(self.index.raw_dependencies(path)),
            children: collect(self.index.children_of(path)),
            parents: collect(self.index.parents_of(path)),
            foreign_dependencies: self.foreign_dependencies(path),
            evaluations: entry.evaluations,
            evaluated_at: entry.evaluated_at,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn edge_count(&self) -> usize {
        self.index.edge_count()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::subscriber::Dependency;

    fn constant(n: i32) -> Computed {
        Computed::new(move |_| Ok(Value::from(n)))
    }

    fn deps(store: StoreId, raw: &[&str], computed: &[&str]) -> DependencySet {
        raw.iter()
            .map(|k| Dependency::raw(store, Path::from(*k)))
            .chain(computed.iter().map(|k| Dependency::computed(store, Path::from(*k))))
            .collect()
    }

    /// Read, evaluate, and commit `computed` at `path` with the given deps.
    fn settle(table: &mut MemoTable, path: &Path, computed: &Computed, value: i32, read: DependencySet) {
        assert!(matches!(table.begin_read(path, computed), Lookup::Evaluate(_)));
        table.commit(path, Value::from(value), &read);
    }

    #[test]
    fn entries_start_dirty() {
        let store = StoreId::new();
        let mut table = MemoTable::new(store);
        let path = Path::from("total");
        let computed = constant(1);

        table.ensure(&path, &computed);
        assert_eq!(table.state(&path), Some(MemoState::Dirty));
        assert!(matches!(table.begin_read(&path, &computed), Lookup::Evaluate(_)));
    }

    #[test]
    fn commit_makes_entry_clean_and_cached() {
        let store = StoreId::new();
        let mut table = MemoTable::new(store);
        let path = Path::from("total");
        let computed = constant(1);

        settle(&mut table, &path, &computed, 1, deps(store, &["a"], &[]));

        assert_eq!(table.state(&path), Some(MemoState::Clean));
        match table.begin_read(&path, &computed) {
            Lookup::Cached(value) => assert_eq!(value.as_f64(), Some(1.0)),
            _ => panic!("expected cached value"),
        }
        assert_eq!(table.info(&path).unwrap().evaluations, 1);
    }

    #[test]
    fn reentrant_read_is_a_cycle() {
        let store = StoreId::new();
        let mut table = MemoTable::new(store);
        let path = Path::from("loop");
        let computed = constant(1);

        assert!(matches!(table.begin_read(&path, &computed), Lookup::Evaluate(_)));
        assert!(matches!(table.begin_read(&path, &computed), Lookup::Cycle));

        table.abandon(&path);
        assert!(matches!(table.begin_read(&path, &computed), Lookup::Evaluate(_)));
    }

    #[test]
    fn invalidate_marks_dirty_without_evaluating() {
        let store = StoreId::new();
        let mut table = MemoTable::new(store);
        let path = Path::from("double");

        settle(&mut table, &path, &constant(2), 2, deps(store, &["n"], &[]));

        let affected = table.invalidate(&Path::from("n"));
        assert!(affected.contains(&path));
        assert_eq!(table.state(&path), Some(MemoState::Dirty));
        assert_eq!(table.info(&path).unwrap().evaluations, 1);
    }

    #[test]
    fn replacing_the_accessor_dirties_the_entry() {
        let store = StoreId::new();
        let mut table = MemoTable::new(store);
        let path = Path::from("c");

        settle(&mut table, &path, &constant(1), 1, deps(store, &[], &[]));

        table.ensure(&path, &constant(2));
        assert_eq!(table.state(&path), Some(MemoState::Dirty));
    }

    #[test]
    fn parents_are_recorded_from_computed_reads() {
        let store = StoreId::new();
        let mut table = MemoTable::new(store);
        let subtotal = Path::from("subtotal");
        let total = Path::from("total");

        settle(&mut table, &subtotal, &constant(1), 1, deps(store, &["items.0.price"], &[]));
        settle(&mut table, &total, &constant(2), 2, deps(store, &[], &["subtotal"]));

        let info = table.info(&subtotal).unwrap();
        assert_eq!(info.parents, vec![total.clone()]);

        let affected = table.invalidate(&Path::from("items.0.price"));
        assert_eq!(affected.len(), 2);
        assert_eq!(table.state(&total), Some(MemoState::Dirty));
    }

    #[test]
    fn foreign_reads_stay_out_of_the_local_index() {
        let store = StoreId::new();
        let other = StoreId::new();
        let mut table = MemoTable::new(store);
        let path = Path::from("c");

        settle(&mut table, &path, &constant(1), 1, deps(other, &["x"], &[]));

        // A local write to `x` is a different location.
        assert!(table.invalidate(&Path::from("x")).is_empty());
        assert_eq!(table.raw_dependencies(&path), vec![path.clone()]);
        assert_eq!(table.foreign_dependencies(&path), vec![Dependency::raw(other, Path::from("x"))]);
    }

    #[test]
    fn foreign_writes_dirty_readers_and_their_parents() {
        let store = StoreId::new();
        let other = StoreId::new();
        let mut table = MemoTable::new(store);
        let scaled = Path::from("scaled");
        let label = Path::from("label");

        let mut read = deps(store, &["n"], &[]);
        read.insert(Dependency::raw(other, Path::from("rate")));
        read.insert(Dependency::computed(other, Path::from("factor")));
        settle(&mut table, &scaled, &constant(1), 1, read);
        settle(&mut table, &label, &constant(2), 2, deps(store, &[], &["scaled"]));

        let none = IndexSet::new();
        assert!(table
            .invalidate_foreign(other, &[Path::from("unrelated")], &none)
            .is_empty());
        assert!(table
            .invalidate_foreign(StoreId::new(), &[Path::from("rate")], &none)
            .is_empty());

        let dirtied = table.invalidate_foreign(other, &[Path::from("rate")], &none);
        assert_eq!(dirtied.into_iter().collect::<Vec<_>>(), vec![scaled.clone(), label.clone()]);
        assert_eq!(table.state(&label), Some(MemoState::Dirty));

        // Already dirty: nothing new to report.
        let factor: IndexSet<Path> = [Path::from("factor")].into_iter().collect();
        assert!(table.invalidate_foreign(other, &[], &factor).is_empty());
    }

    #[test]
    fn relinking_drops_stale_foreign_reads() {
        let store = StoreId::new();
        let other = StoreId::new();
        let mut table = MemoTable::new(store);
        let path = Path::from("c");

        settle(&mut table, &path, &constant(1), 1, deps(other, &["x"], &[]));
        table.invalidate(&path);
        let sources = {
            assert!(matches!(table.begin_read(&path, &constant(1)), Lookup::Evaluate(_)));
            table.commit(&path, Value::from(1), &deps(store, &["y"], &[]))
        };

        assert!(sources.is_empty());
        assert!(table.foreign_dependencies(&path).is_empty());
        assert!(table
            .invalidate_foreign(other, &[Path::from("x")], &IndexSet::new())
            .is_empty());
    }
}
