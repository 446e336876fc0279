//! Trace-source collaborator interface.
//!
//! The engine never parses a trace container itself. A [`TraceSource`]
//! hands it raw per-CPU records oldest first and can re-read any record
//! by offset later. [`TraceFile`] is a JSON-backed source used by the
//! command line tool and by tests.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════
//  Error type
// ═══════════════════════════════════════════════════════════════════════

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed trace document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CPU {cpu} out of range (source has {n_cpus} CPUs)")]
    CpuOutOfRange { cpu: usize, n_cpus: usize },

    #[error("No record at offset {0}")]
    OffsetNotFound(u64),

    #[error("Corrupt trace source: {0}")]
    Corrupt(String),
}

// ═══════════════════════════════════════════════════════════════════════
//  Raw record
// ═══════════════════════════════════════════════════════════════════════

/// One record as delivered by a source, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub ts: i64,
    pub cpu: u32,
    /// Pid derived from the record payload.
    pub pid: i32,
    /// Event kind derived from the record payload.
    pub event_id: i32,
    /// Position of the record in the source, usable with
    /// [`TraceSource::read_at`].
    pub offset: u64,
    /// Events dropped by the ring buffer immediately before this record.
    pub missed_events: u64,
    /// Undecoded payload bytes.
    pub data: Vec<u8>,
}

// ═══════════════════════════════════════════════════════════════════════
//  Collaborator traits
// ═══════════════════════════════════════════════════════════════════════

/// A readable trace source with per-CPU ring buffers.
///
/// Implementations are not required to support concurrent positioned
/// reads; the engine serializes all access per stream.
pub trait TraceSource: Send {
    /// Number of per-CPU record sequences.
    fn n_cpus(&self) -> usize;

    /// Rewind `cpu` and return its oldest record.
    fn read_cpu_first(&mut self, cpu: usize) -> Result<Option<RawRecord>, SourceError>;

    /// Next record of `cpu`, or `None` at end of stream.
    fn read_next(&mut self, cpu: usize) -> Result<Option<RawRecord>, SourceError>;

    /// Positioned re-read of the record at `offset`.
    fn read_at(&mut self, offset: u64) -> Result<RawRecord, SourceError>;

    /// Name of an event kind, if the source knows it.
    fn event_name(&self, _event_id: i32) -> Option<String> {
        None
    }

    /// Command name of a task, if the source knows it.
    fn task_name(&self, _pid: i32) -> Option<String> {
        None
    }

    /// Human-readable payload summary of a record.
    fn record_info(&self, _record: &RawRecord) -> String {
        String::new()
    }
}

/// Opens trace sources by path.
pub trait TraceOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn TraceSource>, SourceError>;
}

// ═══════════════════════════════════════════════════════════════════════
//  JSON trace file
// ═══════════════════════════════════════════════════════════════════════

/// One record in a [`TraceFile`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub ts: i64,
    pub cpu: u32,
    pub pid: i32,
    pub event_id: i32,
    #[serde(default)]
    pub missed_events: u64,
    #[serde(default)]
    pub data: Vec<u8>,
    /// Pre-rendered payload summary.
    #[serde(default)]
    pub info: Option<String>,
}

/// A trace stored as a JSON document.
///
/// Records may appear in any order; each CPU's sequence is ordered by
/// timestamp when the source is opened. A record's offset is its index
/// in `records`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceFile {
    pub n_cpus: usize,
    #[serde(default)]
    pub events: BTreeMap<i32, String>,
    #[serde(default)]
    pub tasks: BTreeMap<i32, String>,
    pub records: Vec<FileRecord>,
}

impl TraceFile {
    /// Save trace to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SourceError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load trace from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Turn the document into a readable source.
    pub fn into_source(self) -> Result<TraceFileSource, SourceError> {
        TraceFileSource::new(self)
    }
}

/// [`TraceSource`] over an in-memory [`TraceFile`].
#[derive(Debug)]
pub struct TraceFileSource {
    file: TraceFile,
    /// Record indices per CPU, ordered by timestamp.
    per_cpu: Vec<Vec<usize>>,
    cursor: Vec<usize>,
}

impl TraceFileSource {
    pub fn new(file: TraceFile) -> Result<Self, SourceError> {
        let mut per_cpu = vec![Vec::new(); file.n_cpus];
        for (index, record) in file.records.iter().enumerate() {
            let cpu = record.cpu as usize;
            let list = per_cpu.get_mut(cpu).ok_or_else(|| {
                SourceError::Corrupt(format!(
                    "record {index} on CPU {cpu}, but the trace has {} CPUs",
                    file.n_cpus
                ))
            })?;
            list.push(index);
        }
        for list in &mut per_cpu {
            list.sort_by_key(|&i| file.records[i].ts);
        }
        let cursor = vec![0; file.n_cpus];

        Ok(Self {
            file,
            per_cpu,
            cursor,
        })
    }

    fn raw(&self, index: usize) -> RawRecord {
        let rec = &self.file.records[index];
        RawRecord {
            ts: rec.ts,
            cpu: rec.cpu,
            pid: rec.pid,
            event_id: rec.event_id,
            offset: index as u64,
            missed_events: rec.missed_events,
            data: rec.data.clone(),
        }
    }

    fn cpu_list(&self, cpu: usize) -> Result<&[usize], SourceError> {
        self.per_cpu
            .get(cpu)
            .map(Vec::as_slice)
            .ok_or(SourceError::CpuOutOfRange {
                cpu,
                n_cpus: self.file.n_cpus,
            })
    }
}

impl TraceSource for TraceFileSource {
    fn n_cpus(&self) -> usize {
        self.file.n_cpus
    }

    fn read_cpu_first(&mut self, cpu: usize) -> Result<Option<RawRecord>, SourceError> {
        let first = self.cpu_list(cpu)?.first().copied();
        self.cursor[cpu] = 1;
        Ok(first.map(|i| self.raw(i)))
    }

    fn read_next(&mut self, cpu: usize) -> Result<Option<RawRecord>, SourceError> {
        let pos = self.cursor.get(cpu).copied().unwrap_or(0);
        let next = self.cpu_list(cpu)?.get(pos).copied();
        if next.is_some() {
            self.cursor[cpu] = pos + 1;
        }
        Ok(next.map(|i| self.raw(i)))
    }

    fn read_at(&mut self, offset: u64) -> Result<RawRecord, SourceError> {
        let index = usize::try_from(offset).map_err(|_| SourceError::OffsetNotFound(offset))?;
        if index >= self.file.records.len() {
            return Err(SourceError::OffsetNotFound(offset));
        }
        Ok(self.raw(index))
    }

    fn event_name(&self, event_id: i32) -> Option<String> {
        self.file.events.get(&event_id).cloned()
    }

    fn task_name(&self, pid: i32) -> Option<String> {
        self.file.tasks.get(&pid).cloned()
    }

    fn record_info(&self, record: &RawRecord) -> String {
        usize::try_from(record.offset)
            .ok()
            .and_then(|i| self.file.records.get(i))
            .and_then(|rec| rec.info.clone())
            .unwrap_or_default()
    }
}

/// Opens `.json` trace files.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonOpener;

impl TraceOpener for JsonOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn TraceSource>, SourceError> {
        Ok(Box::new(TraceFile::load(path)?.into_source()?))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn make_record(ts: i64, cpu: u32, pid: i32, event_id: i32) -> FileRecord {
        FileRecord {
            ts,
            cpu,
            pid,
            event_id,
            missed_events: 0,
            data: Vec::new(),
            info: None,
        }
    }

    pub(crate) fn make_trace(n_cpus: usize, records: Vec<FileRecord>) -> TraceFile {
        TraceFile {
            n_cpus,
            events: BTreeMap::from([
                (1, "sched_switch".to_string()),
                (2, "sched_wakeup".to_string()),
            ]),
            tasks: BTreeMap::from([(42, "bash".to_string())]),
            records,
        }
    }

    #[test]
    fn per_cpu_reads_are_time_ordered() {
        let trace = make_trace(
            2,
            vec![
                make_record(30, 0, 1, 1),
                make_record(10, 0, 1, 1),
                make_record(20, 1, 2, 1),
            ],
        );
        let mut src = trace.into_source().unwrap();
        assert_eq!(src.read_cpu_first(0).unwrap().unwrap().ts, 10);
        assert_eq!(src.read_next(0).unwrap().unwrap().ts, 30);
        assert!(src.read_next(0).unwrap().is_none());
        assert!(src.read_next(0).unwrap().is_none());

        // Rewind.
        let again = src.read_cpu_first(0).unwrap().unwrap();
        assert_eq!(again.ts, 10);
        assert_eq!(again.offset, 1);
    }

    #[test]
    fn read_at_returns_record_by_offset() {
        let trace = make_trace(1, vec![make_record(5, 0, 42, 2), make_record(6, 0, 43, 1)]);
        let mut src = trace.into_source().unwrap();
        let rec = src.read_at(1).unwrap();
        assert_eq!(rec.pid, 43);
        assert!(matches!(src.read_at(9), Err(SourceError::OffsetNotFound(9))));
    }

    #[test]
    fn cpu_out_of_range_is_rejected() {
        let trace = make_trace(1, vec![make_record(5, 3, 42, 2)]);
        assert!(matches!(trace.into_source(), Err(SourceError::Corrupt(_))));

        let mut src = make_trace(1, vec![]).into_source().unwrap();
        assert!(matches!(
            src.read_cpu_first(4),
            Err(SourceError::CpuOutOfRange { cpu: 4, n_cpus: 1 })
        ));
    }

    #[test]
    fn names_come_from_the_document() {
        let mut rec = make_record(5, 0, 42, 1);
        rec.info = Some("prev=bash next=idle".into());
        let mut src = make_trace(1, vec![rec]).into_source().unwrap();
        assert_eq!(src.event_name(1).as_deref(), Some("sched_switch"));
        assert_eq!(src.event_name(99), None);
        assert_eq!(src.task_name(42).as_deref(), Some("bash"));
        let rec = src.read_at(0).unwrap();
        assert_eq!(src.record_info(&rec), "prev=bash next=idle");
    }

    #[test]
    fn json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.json");
        make_trace(2, vec![make_record(1, 1, 42, 2)]).save(&path).unwrap();

        let mut src = JsonOpener.open(&path).unwrap();
        assert_eq!(src.n_cpus(), 2);
        assert!(src.read_cpu_first(0).unwrap().is_none());
        assert_eq!(src.read_cpu_first(1).unwrap().unwrap().pid, 42);

        let missing = JsonOpener.open(&dir.path().join("nope.json"));
        assert!(matches!(missing, Err(SourceError::Io(_))));
    }
}
