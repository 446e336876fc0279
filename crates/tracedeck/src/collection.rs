//! Predicate-indexed queries over entry arrays.
//!
//! An [`EntryRequest`] answers "first/last entry matching X in this
//! window" by scanning the array. A [`Collection`] answers the same
//! question from a cached, ordered index of the visible matching entries,
//! so repeated queries (one per plotted bin, say) never rescan the array.
//!
//! A collection is only valid for the visibility state it was built
//! from. Every visibility change on its stream must reset it; a reset
//! collection rebuilds itself on its next query.

use crate::entry::{Entry, StreamId};
use crate::error::{Error, Result};
use log::debug;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

// ═══════════════════════════════════════════════════════════════════════
//  Matchers
// ═══════════════════════════════════════════════════════════════════════

/// Matching condition: `(entry, stream, args) -> bool`.
pub type MatchFn = fn(&Entry, StreamId, &[i32]) -> bool;

/// A named matching condition. Two matchers are the same predicate when
/// both their names and their function addresses are equal.
///
/// One function can have more than one address, so equal predicates may
/// compare unequal and register two collections. Different functions
/// never compare equal.
#[derive(Clone, Copy)]
pub struct Matcher {
    name: &'static str,
    cond: MatchFn,
}

impl Matcher {
    /// Entry of `stream` whose pid is one of `args`.
    pub const PID: Matcher = Matcher::new("pid", match_pid);
    /// Entry of `stream` whose cpu is one of `args`.
    pub const CPU: Matcher = Matcher::new("cpu", match_cpu);
    /// Entry of `stream` whose event id is one of `args`.
    pub const EVENT_ID: Matcher = Matcher::new("event_id", match_event_id);

    pub const fn new(name: &'static str, cond: MatchFn) -> Self {
        Self { name, cond }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn matches(&self, entry: &Entry, stream: StreamId, args: &[i32]) -> bool {
        (self.cond)(entry, stream, args)
    }

    fn cond_addr(&self) -> usize {
        self.cond as usize
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Matcher({})", self.name)
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.cond_addr() == other.cond_addr()
    }
}

impl Eq for Matcher {}

impl Hash for Matcher {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.cond_addr().hash(state);
    }
}

fn match_pid(entry: &Entry, stream: StreamId, args: &[i32]) -> bool {
    entry.stream == stream && args.contains(&entry.pid)
}

fn match_cpu(entry: &Entry, stream: StreamId, args: &[i32]) -> bool {
    entry.stream == stream && args.contains(&entry.cpu)
}

fn match_event_id(entry: &Entry, stream: StreamId, args: &[i32]) -> bool {
    entry.stream == stream && args.contains(&entry.event_id)
}

// ═══════════════════════════════════════════════════════════════════════
//  Entry requests (linear scan)
// ═══════════════════════════════════════════════════════════════════════

/// Outcome of a front/back search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Index of the matching entry.
    Found(usize),
    /// Matching entries exist in the window but none is visible.
    Filtered,
    /// Nothing in the window matches.
    Empty,
}

impl RequestOutcome {
    pub fn index(self) -> Option<usize> {
        match self {
            RequestOutcome::Found(i) => Some(i),
            _ => None,
        }
    }
}

/// Search window and condition for [`get_entry_front`]/[`get_entry_back`].
#[derive(Debug, Clone)]
pub struct EntryRequest<'a> {
    /// Index where the search starts.
    pub first: usize,
    /// Number of entries to inspect.
    pub n: usize,
    pub matcher: Matcher,
    pub stream: StreamId,
    pub args: &'a [i32],
    /// Only accept entries visible under `vis_mask`.
    pub vis_only: bool,
    pub vis_mask: u8,
}

impl EntryRequest<'_> {
    fn search(&self, entries: &[Entry], indices: impl Iterator<Item = usize>) -> RequestOutcome {
        let mut outcome = RequestOutcome::Empty;
        for i in indices {
            let entry = &entries[i];
            if !self.matcher.matches(entry, self.stream, self.args) {
                continue;
            }
            if self.vis_only && !entry.is_visible(self.vis_mask) {
                outcome = RequestOutcome::Filtered;
            } else {
                return RequestOutcome::Found(i);
            }
        }
        outcome
    }
}

/// Scan `[first, first + n)` towards increasing time.
pub fn get_entry_front(req: &EntryRequest<'_>, entries: &[Entry]) -> RequestOutcome {
    let end = req.first.saturating_add(req.n).min(entries.len());
    req.search(entries, req.first..end)
}

/// Scan from `first` towards decreasing time over `n` entries.
pub fn get_entry_back(req: &EntryRequest<'_>, entries: &[Entry]) -> RequestOutcome {
    if req.n == 0 || req.first >= entries.len() {
        return RequestOutcome::Empty;
    }
    let start = (req.first + 1).saturating_sub(req.n);
    req.search(entries, (start..=req.first).rev())
}

// ═══════════════════════════════════════════════════════════════════════
//  Collections
// ═══════════════════════════════════════════════════════════════════════

/// Window of entry indices a consumer maps one logical bin to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bin {
    pub first: usize,
    pub n: usize,
}

/// Collections over fewer entries than this are candidates for release
/// when they are dense, see [`Collection::is_worth_keeping`].
pub const SMALL_DATASET: usize = 1_000_000;

/// A collection is dense when it holds more than one entry in this many.
pub const DENSE_RATIO: usize = 100;

/// Signature of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionKey {
    pub matcher: Matcher,
    pub stream: StreamId,
    pub args: Vec<i32>,
    /// Visibility bits that count as "visible" for this collection.
    pub vis_mask: u8,
    /// Extra entries a lookup may reach past either edge of its bin, so
    /// a match just outside the bin (the task that was still running,
    /// say) is found without a full scan.
    pub margin: usize,
}

/// Cached, ordered index of the visible entries matching a key.
#[derive(Debug)]
pub struct Collection {
    key: CollectionKey,
    index: Vec<usize>,
    n_entries: usize,
    valid: bool,
}

impl Collection {
    fn build(key: CollectionKey, entries: &[Entry]) -> Result<Self> {
        let mut collection = Self {
            key,
            index: Vec::new(),
            n_entries: 0,
            valid: false,
        };
        collection.rebuild(entries)?;
        Ok(collection)
    }

    fn rebuild(&mut self, entries: &[Entry]) -> Result<()> {
        let key = &self.key;
        let mut index = Vec::new();
        for (i, entry) in entries.iter().enumerate() {
            if key.matcher.matches(entry, key.stream, &key.args) && entry.is_visible(key.vis_mask) {
                index.try_reserve(1)?;
                index.push(i);
            }
        }
        debug!(
            "Collection {}{:?} on {}: {} of {} entries",
            key.matcher.name(),
            key.args,
            key.stream,
            index.len(),
            entries.len()
        );

        self.index = index;
        self.n_entries = entries.len();
        self.valid = true;
        Ok(())
    }

    fn reset(&mut self) {
        self.index = Vec::new();
        self.n_entries = 0;
        self.valid = false;
    }

    fn ensure_fresh(&mut self, entries: &[Entry]) -> Result<()> {
        if !self.valid {
            return self.rebuild(entries);
        }
        if self.n_entries != entries.len() {
            return Err(Error::StaleCollection {
                expected: self.n_entries,
                actual: entries.len(),
            });
        }
        Ok(())
    }

    pub fn key(&self) -> &CollectionKey {
        &self.key
    }

    /// False after a reset, until the next query rebuilds it.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// A dense collection over a small dataset saves little over a
    /// linear scan.
    pub fn is_worth_keeping(&self) -> bool {
        self.n_entries >= SMALL_DATASET
            || self.index.is_empty()
            || self.n_entries / self.index.len() >= DENSE_RATIO
    }

    /// Cached entry indices, ascending.
    pub fn indices(&self) -> &[usize] {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// First cached entry in `[bin.first, bin.first + bin.n + margin)`.
    pub fn front(&self, bin: Bin) -> Option<usize> {
        if bin.n == 0 {
            return None;
        }
        let end = bin.first.saturating_add(bin.n).saturating_add(self.key.margin);
        let pos = self.index.partition_point(|&i| i < bin.first);
        self.index.get(pos).copied().filter(|&i| i < end)
    }

    /// Last cached entry in `(bin.first - bin.n - margin, bin.first]`.
    pub fn back(&self, bin: Bin) -> Option<usize> {
        if bin.n == 0 {
            return None;
        }
        let reach = bin.n.saturating_add(self.key.margin);
        let start = bin.first.saturating_add(1).saturating_sub(reach);
        let pos = self.index.partition_point(|&i| i <= bin.first);
        pos.checked_sub(1)
            .map(|p| self.index[p])
            .filter(|&i| i >= start)
    }
}

/// Registry of collections keyed by signature.
#[derive(Debug, Default)]
pub struct CollectionCache {
    collections: HashMap<CollectionKey, Collection>,
}

impl CollectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and register a collection, or return the key of the one
    /// already registered under the same signature.
    pub fn register(&mut self, key: CollectionKey, entries: &[Entry]) -> Result<CollectionKey> {
        if !self.collections.contains_key(&key) {
            let collection = Collection::build(key.clone(), entries)?;
            self.collections.insert(key.clone(), collection);
        }
        Ok(key)
    }

    pub fn unregister(&mut self, key: &CollectionKey) -> Result<()> {
        self.collections
            .remove(key)
            .map(|_| ())
            .ok_or(Error::UnknownCollection)
    }

    /// Drop the cached index but keep the registration.
    pub fn reset(&mut self, key: &CollectionKey) -> Result<()> {
        self.collections
            .get_mut(key)
            .map(Collection::reset)
            .ok_or(Error::UnknownCollection)
    }

    /// Reset every collection keyed to `stream`.
    pub fn reset_stream(&mut self, stream: StreamId) {
        for collection in self.collections.values_mut() {
            if collection.key.stream == stream {
                collection.reset();
            }
        }
    }

    pub fn reset_all(&mut self) {
        self.collections.values_mut().for_each(Collection::reset);
    }

    /// Release the index of every valid collection that is not worth
    /// keeping. Registrations stay. Returns the number released.
    pub fn release_dense(&mut self) -> usize {
        let mut released = 0;
        for collection in self.collections.values_mut() {
            if collection.valid && !collection.is_worth_keeping() {
                collection.reset();
                released += 1;
            }
        }
        released
    }

    /// Tear down every collection keyed to `stream`.
    pub fn unregister_stream(&mut self, stream: StreamId) {
        self.collections.retain(|key, _| key.stream != stream);
    }

    pub fn get(&self, key: &CollectionKey) -> Option<&Collection> {
        self.collections.get(key)
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    fn fresh(&mut self, key: &CollectionKey, entries: &[Entry]) -> Result<&Collection> {
        let collection = self.collections.get_mut(key).ok_or(Error::UnknownCollection)?;
        collection.ensure_fresh(entries)?;
        Ok(collection)
    }

    /// First visible matching entry in the bin.
    pub fn front(
        &mut self,
        key: &CollectionKey,
        entries: &[Entry],
        bin: Bin,
    ) -> Result<Option<usize>> {
        Ok(self.fresh(key, entries)?.front(bin))
    }

    /// Last visible matching entry in the bin.
    pub fn back(
        &mut self,
        key: &CollectionKey,
        entries: &[Entry],
        bin: Bin,
    ) -> Result<Option<usize>> {
        Ok(self.fresh(key, entries)?.back(bin))
    }
}
