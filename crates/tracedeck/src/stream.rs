//! Open trace streams and the slot table that hands out their handles.

use crate::entry::StreamId;
use crate::error::{Error, Result};
use crate::filter::FilterBank;
use crate::source::{SourceError, TraceSource};
use log::{info, warn};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

// ═══════════════════════════════════════════════════════════════════════
//  Calibration
// ═══════════════════════════════════════════════════════════════════════

/// Pure timestamp transform applied to every ingested entry. Used to
/// align the clock of a second source (e.g. a guest VM) with the first.
#[derive(Debug, Clone)]
pub enum Calibration {
    /// `ts + offset`
    Offset(i64),
    /// `offset + ts * scale`
    Linear { offset: i64, scale: i64 },
    /// Caller-supplied function with its parameter buffer.
    Custom { func: fn(i64, &[i64]) -> i64, params: Vec<i64> },
}

impl Calibration {
    pub fn apply(&self, ts: i64) -> i64 {
        match self {
            Calibration::Offset(offset) => ts.wrapping_add(*offset),
            Calibration::Linear { offset, scale } => offset.wrapping_add(ts.wrapping_mul(*scale)),
            Calibration::Custom { func, params } => func(ts, params),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Task index
// ═══════════════════════════════════════════════════════════════════════

/// Pids observed while ingesting a stream.
#[derive(Debug, Clone, Default)]
pub struct TaskIndex {
    pids: BTreeSet<i32>,
}

impl TaskIndex {
    pub fn add(&mut self, pid: i32) {
        self.pids.insert(pid);
    }

    pub fn contains(&self, pid: i32) -> bool {
        self.pids.contains(&pid)
    }

    pub fn len(&self) -> usize {
        self.pids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }

    /// Pids in ascending order.
    pub fn pids(&self) -> Vec<i32> {
        self.pids.iter().copied().collect()
    }

    pub fn extend(&mut self, other: TaskIndex) {
        self.pids.extend(other.pids);
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Stream
// ═══════════════════════════════════════════════════════════════════════

/// One open trace source with its own filters and task index.
pub struct Stream {
    id: StreamId,
    name: String,
    n_cpus: usize,
    // Sources are not safe for concurrent positioned reads.
    source: Mutex<Box<dyn TraceSource>>,
    pub(crate) filters: FilterBank,
    pub(crate) tasks: TaskIndex,
    pub(crate) calibration: Option<Calibration>,
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("n_cpus", &self.n_cpus)
            .field("filters", &self.filters)
            .field("tasks", &self.tasks.len())
            .field("calibration", &self.calibration)
            .finish()
    }
}

impl Stream {
    fn new(id: StreamId, name: String, source: Box<dyn TraceSource>) -> Self {
        Self {
            id,
            name,
            n_cpus: source.n_cpus(),
            source: Mutex::new(source),
            filters: FilterBank::new(),
            tasks: TaskIndex::default(),
            calibration: None,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn n_cpus(&self) -> usize {
        self.n_cpus
    }

    pub fn filters(&self) -> &FilterBank {
        &self.filters
    }

    pub fn tasks(&self) -> &TaskIndex {
        &self.tasks
    }

    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    /// Exclusive access to the underlying source.
    pub(crate) fn lock_source(&self) -> Result<MutexGuard<'_, Box<dyn TraceSource>>, SourceError> {
        self.source
            .lock()
            .map_err(|_| SourceError::Corrupt(format!("source lock of {} poisoned", self.id)))
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Stream table
// ═══════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct Slot {
    generation: u32,
    stream: Option<Stream>,
}

/// Registry of open streams keyed by small reusable handles.
pub struct StreamTable {
    slots: Vec<Slot>,
    max_streams: usize,
}

impl StreamTable {
    pub fn new(max_streams: usize) -> Self {
        Self {
            slots: Vec::new(),
            max_streams,
        }
    }

    /// Register a source under the lowest free slot.
    pub fn insert(&mut self, name: String, source: Box<dyn TraceSource>) -> Result<StreamId> {
        let slot = match self.slots.iter().position(|s| s.stream.is_none()) {
            Some(slot) => slot,
            None if self.slots.len() < self.max_streams => {
                self.slots.push(Slot::default());
                self.slots.len() - 1
            }
            None => return Err(Error::TooManyStreams(self.max_streams)),
        };
        let index = u16::try_from(slot).map_err(|_| Error::TooManyStreams(self.max_streams))?;

        let free = &mut self.slots[slot];
        let id = StreamId::new(index, free.generation);
        info!("Opened stream {} ({}, {} CPUs)", id, name, source.n_cpus());
        free.stream = Some(Stream::new(id, name, source));
        Ok(id)
    }

    /// Close a stream. Its slot is reused with a new generation.
    pub fn remove(&mut self, id: StreamId) -> Result<Stream> {
        let slot = self
            .slots
            .get_mut(id.slot as usize)
            .filter(|s| s.generation == id.generation && s.stream.is_some())
            .ok_or(Error::InvalidStream(id))?;
        slot.generation = slot.generation.wrapping_add(1);
        let stream = slot.stream.take().ok_or(Error::InvalidStream(id))?;
        info!("Closed stream {} ({})", id, stream.name);
        Ok(stream)
    }

    pub fn get(&self, id: StreamId) -> Result<&Stream> {
        self.slots
            .get(id.slot as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.stream.as_ref())
            .ok_or_else(|| {
                warn!("Stale or unknown stream handle {:?}", id);
                Error::InvalidStream(id)
            })
    }

    pub fn get_mut(&mut self, id: StreamId) -> Result<&mut Stream> {
        self.slots
            .get_mut(id.slot as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.stream.as_mut())
            .ok_or(Error::InvalidStream(id))
    }

    /// Handles of all open streams in slot order.
    pub fn ids(&self) -> Vec<StreamId> {
        self.iter().map(Stream::id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stream> {
        self.slots.iter().filter_map(|s| s.stream.as_ref())
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
