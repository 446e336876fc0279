//! Record ingest: raw per-CPU records to one ordered entry array.
//!
//! One pass over the source. For each CPU, oldest record first:
//!
//! 1. a record reporting lost events is preceded by a synthetic loss
//!    marker ([`EVENT_OVERFLOW`]) placed [`LOST_EVENT_SHIFT_NS`] earlier,
//!    but not before the previous entry of its CPU, with the loss count
//!    in its `offset` field;
//! 2. the entry is filled from the record and calibrated;
//! 3. plugin handlers run, clearing [`PLUGIN_UNTOUCHED`] if any fired;
//! 4. content and id filters fold into the visibility mask;
//! 5. the pid is recorded in the task index.
//!
//! The per-CPU lists are then k-way merged. Any failure drops every
//! partially built list; no truncated array is returned.

use crate::entry::{
    Entry, StreamId, EVENT_OVERFLOW, LOST_EVENT_SHIFT_NS, PLUGIN_UNTOUCHED, VISIBLE_ALL,
};
use crate::error::Result;
use crate::filter::FilterBank;
use crate::merge::merge_cpu_lists;
use crate::plugin::HandlerTable;
use crate::source::{RawRecord, TraceSource};
use crate::stream::{Calibration, Stream, TaskIndex};
use log::{debug, info};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Everything ingest reads besides the source itself.
pub(crate) struct Ingest<'a> {
    pub stream: StreamId,
    pub filters: &'a FilterBank,
    pub calibration: Option<&'a Calibration>,
    pub handlers: &'a HandlerTable,
    pub filter_mask: u8,
    pub progress: &'a AtomicUsize,
}

/// Output of a successful ingest.
#[derive(Debug)]
pub(crate) struct Loaded {
    pub entries: Vec<Entry>,
    pub tasks: TaskIndex,
}

impl<'a> Ingest<'a> {
    pub fn for_stream(
        stream: &'a Stream,
        handlers: &'a HandlerTable,
        filter_mask: u8,
        progress: &'a AtomicUsize,
    ) -> Self {
        Self {
            stream: stream.id(),
            filters: stream.filters(),
            calibration: stream.calibration(),
            handlers,
            filter_mask,
            progress,
        }
    }

    /// Ingest every CPU of `source` and merge the result.
    pub fn run(&self, source: &mut dyn TraceSource) -> Result<Loaded> {
        let n_cpus = source.n_cpus();
        let mut tasks = TaskIndex::default();
        let mut lists = Vec::new();
        lists.try_reserve_exact(n_cpus)?;

        for cpu in 0..n_cpus {
            let list = self.ingest_cpu(source, cpu, &mut tasks)?;
            debug!("{}: CPU {} yielded {} entries", self.stream, cpu, list.len());
            lists.push(list);
        }

        let entries = merge_cpu_lists(lists)?;
        info!(
            "{}: loaded {} entries from {} CPUs ({} tasks)",
            self.stream,
            entries.len(),
            n_cpus,
            tasks.len()
        );

        Ok(Loaded { entries, tasks })
    }

    fn ingest_cpu(
        &self,
        source: &mut dyn TraceSource,
        cpu: usize,
        tasks: &mut TaskIndex,
    ) -> Result<Vec<Entry>> {
        let mut list: Vec<Entry> = Vec::new();
        let mut next = source.read_cpu_first(cpu)?;

        while let Some(record) = next {
            if record.missed_events > 0 {
                let mut marker = self.lost_marker(&record);
                // Never sort before the previous entry of this CPU.
                if let Some(prev) = list.last() {
                    marker.ts = marker.ts.max(prev.ts);
                }
                push(&mut list, marker)?;
            }

            let entry = self.entry_from(&record);
            tasks.add(entry.pid);
            push(&mut list, entry)?;

            self.progress.fetch_add(1, Ordering::Relaxed);
            next = source.read_next(cpu)?;
        }

        Ok(list)
    }

    fn calibrate(&self, ts: i64) -> i64 {
        self.calibration.map_or(ts, |c| c.apply(ts))
    }

    fn lost_marker(&self, record: &RawRecord) -> Entry {
        Entry {
            stream: self.stream,
            cpu: record.cpu as i32,
            pid: record.pid,
            event_id: EVENT_OVERFLOW,
            ts: self.calibrate(record.ts.saturating_sub(LOST_EVENT_SHIFT_NS)),
            offset: record.missed_events,
            visible: VISIBLE_ALL,
        }
    }

    fn entry_from(&self, record: &RawRecord) -> Entry {
        let mut entry = Entry {
            stream: self.stream,
            cpu: record.cpu as i32,
            pid: record.pid,
            event_id: record.event_id,
            ts: self.calibrate(record.ts),
            offset: record.offset,
            visible: VISIBLE_ALL,
        };

        if self.handlers.process(record, &mut entry) > 0 {
            entry.visible &= !PLUGIN_UNTOUCHED;
        }

        let content_match = self.filters.content_matches(record);
        entry.visible =
            self.filters
                .fold_visibility(entry.visible, &entry, content_match, self.filter_mask);

        entry
    }
}

fn push(list: &mut Vec<Entry>, entry: Entry) -> Result<()> {
    list.try_reserve(1)?;
    list.push(entry);
    Ok(())
}
