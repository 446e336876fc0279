//! The session: explicit context object owning every open stream.
//!
//! A [`Session`] replaces process-wide state. Each operation takes the
//! session and a [`StreamId`] and returns an explicit error when the
//! handle is stale.
//!
//! ```text
//!   open ──► StreamTable ──► load_entries ──► Vec<Entry> ──► collections
//!                 │                │                │
//!            FilterBank       HandlerTable    filter_*_entries
//!            Calibration      (on_record)     (visibility recompute)
//! ```
//!
//! Entry arrays are owned by the caller. The session never holds on to
//! them; collections store indices and refuse queries against an array
//! of a different length.

use crate::collection::{Bin, CollectionCache, CollectionKey, Matcher};
use crate::config::SessionConfig;
use crate::entry::{Entry, StreamId, PLUGIN_UNTOUCHED, VISIBLE_ALL};
use crate::error::{Error, Result};
use crate::filter::{ContentFilter, FilterBank, FilterKind};
use crate::ingest::Ingest;
use crate::merge::merge_streams;
use crate::plugin::{DrawRequest, EventHandler, HandlerTable};
use crate::source::{RawRecord, TraceOpener, TraceSource};
use crate::stream::{Calibration, Stream, StreamTable};
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub struct Session {
    config: SessionConfig,
    streams: StreamTable,
    handlers: HandlerTable,
    collections: CollectionCache,
    progress: Arc<AtomicUsize>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            streams: StreamTable::new(config.max_streams),
            config,
            handlers: HandlerTable::new(),
            collections: CollectionCache::new(),
            progress: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn filter_mask(&self) -> u8 {
        self.config.filter_mask
    }

    /// Change the bits cleared by task and CPU filtering. Takes effect on
    /// the next ingest or recompute.
    pub fn set_filter_mask(&mut self, filter_mask: u8) -> Result<()> {
        let config = SessionConfig {
            filter_mask,
            ..self.config.clone()
        };
        config.validate()?;
        self.config = config;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    //  Streams
    // ═══════════════════════════════════════════════════════════════════

    /// Open a trace file through `opener`.
    pub fn open(&mut self, opener: &dyn TraceOpener, path: impl AsRef<Path>) -> Result<StreamId> {
        let path = path.as_ref();
        let source = opener.open(path).map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })?;
        self.open_source(path.display().to_string(), source)
    }

    /// Register an already opened source.
    pub fn open_source(
        &mut self,
        name: impl Into<String>,
        source: Box<dyn TraceSource>,
    ) -> Result<StreamId> {
        self.streams.insert(name.into(), source)
    }

    /// Close a stream, tearing down its collections and handlers.
    pub fn close(&mut self, sd: StreamId) -> Result<()> {
        self.streams.remove(sd)?;
        self.collections.unregister_stream(sd);
        self.handlers.remove_stream(sd);
        Ok(())
    }

    pub fn close_all(&mut self) -> Result<()> {
        for sd in self.stream_ids() {
            self.close(sd)?;
        }
        Ok(())
    }

    /// Handles of all open streams, in slot order.
    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.streams.ids()
    }

    pub fn stream(&self, sd: StreamId) -> Result<&Stream> {
        self.streams.get(sd)
    }

    // ═══════════════════════════════════════════════════════════════════
    //  Filters and calibration
    // ═══════════════════════════════════════════════════════════════════

    fn filters_mut(&mut self, sd: StreamId) -> Result<&mut FilterBank> {
        Ok(&mut self.streams.get_mut(sd)?.filters)
    }

    pub fn add_filter_id(&mut self, sd: StreamId, kind: FilterKind, id: i32) -> Result<()> {
        self.filters_mut(sd)?.add_id(kind, id);
        Ok(())
    }

    pub fn clear_filter(&mut self, sd: StreamId, kind: FilterKind) -> Result<()> {
        self.filters_mut(sd)?.clear(kind);
        Ok(())
    }

    pub fn filter_ids(&self, sd: StreamId, kind: FilterKind) -> Result<Vec<i32>> {
        Ok(self.streams.get(sd)?.filters.get(kind).ids())
    }

    /// Whether any id filter of the stream is non-empty.
    pub fn filter_is_set(&self, sd: StreamId) -> Result<bool> {
        Ok(self.streams.get(sd)?.filters.is_set())
    }

    /// Install a content filter. Existing entries are only affected by
    /// reloading the stream.
    pub fn set_content_filter(
        &mut self,
        sd: StreamId,
        filter: Box<dyn ContentFilter>,
    ) -> Result<()> {
        self.filters_mut(sd)?.set_content_filter(filter);
        Ok(())
    }

    pub fn clear_content_filter(&mut self, sd: StreamId) -> Result<()> {
        self.filters_mut(sd)?.clear_content_filter();
        Ok(())
    }

    pub fn set_calibration(&mut self, sd: StreamId, calibration: Calibration) -> Result<()> {
        self.streams.get_mut(sd)?.calibration = Some(calibration);
        Ok(())
    }

    pub fn clear_calibration(&mut self, sd: StreamId) -> Result<()> {
        self.streams.get_mut(sd)?.calibration = None;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    //  Plugin handlers
    // ═══════════════════════════════════════════════════════════════════

    pub fn register_handler(
        &mut self,
        event_id: i32,
        sd: StreamId,
        handler: Arc<dyn EventHandler>,
    ) -> Result<()> {
        self.streams.get(sd)?;
        self.handlers.register(event_id, sd, handler);
        Ok(())
    }

    pub fn unregister_handler(
        &mut self,
        event_id: i32,
        sd: StreamId,
        handler: &Arc<dyn EventHandler>,
    ) -> usize {
        self.handlers.unregister(event_id, sd, handler)
    }

    /// Dispatch `on_draw` to the handlers of `(event_id, request.stream)`.
    pub fn draw(&self, event_id: i32, request: &DrawRequest<'_>) -> usize {
        self.handlers.draw(request.stream, event_id, request)
    }

    // ═══════════════════════════════════════════════════════════════════
    //  Loading
    // ═══════════════════════════════════════════════════════════════════

    /// Counter of records ingested by the current load. Safe to poll from
    /// another thread.
    pub fn load_progress(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.progress)
    }

    fn ingest(&mut self, sd: StreamId) -> Result<Vec<Entry>> {
        let filter_mask = self.config.filter_mask;
        let stream = self.streams.get(sd)?;
        let mut source = stream.lock_source()?;
        let ingest = Ingest::for_stream(stream, &self.handlers, filter_mask, &self.progress);
        let loaded = ingest.run(&mut **source)?;
        drop(source);

        self.streams.get_mut(sd)?.tasks.extend(loaded.tasks);
        self.collections.reset_stream(sd);
        Ok(loaded.entries)
    }

    /// Ingest one stream into a time-ordered entry array.
    pub fn load_entries(&mut self, sd: StreamId) -> Result<Vec<Entry>> {
        self.progress.store(0, Ordering::Relaxed);
        self.ingest(sd)
    }

    /// Ingest every open stream and merge them in handle order.
    pub fn load_all_entries(&mut self) -> Result<Vec<Entry>> {
        self.progress.store(0, Ordering::Relaxed);
        let mut merged = Vec::new();
        for sd in self.stream_ids() {
            let entries = self.ingest(sd)?;
            merged = merge_streams(merged, entries)?;
        }
        self.collections.reset_all();
        info!("Loaded {} entries from {} streams", merged.len(), self.streams.len());
        Ok(merged)
    }

    /// Load `sd`, optionally calibrating it first, and merge it into
    /// `prior`. On equal timestamps `prior` entries come first.
    ///
    /// Every index into `prior` moves, so the collections of the streams
    /// it holds are reset along with those of `sd`.
    pub fn append(
        &mut self,
        prior: Vec<Entry>,
        sd: StreamId,
        calibration: Option<Calibration>,
    ) -> Result<Vec<Entry>> {
        if let Some(calibration) = calibration {
            self.set_calibration(sd, calibration)?;
        }
        let entries = self.load_entries(sd)?;
        let prior_streams: BTreeSet<StreamId> = prior.iter().map(|e| e.stream).collect();
        let merged = merge_streams(prior, entries)?;
        for stream in prior_streams {
            self.collections.reset_stream(stream);
        }
        Ok(merged)
    }

    // ═══════════════════════════════════════════════════════════════════
    //  Visibility recompute
    // ═══════════════════════════════════════════════════════════════════

    /// Recompute the visibility of the entries of `sd` from its id
    /// filters. Refused while a content filter is installed.
    pub fn filter_stream_entries(&mut self, sd: StreamId, entries: &mut [Entry]) -> Result<()> {
        let filter_mask = self.config.filter_mask;
        let filters = &self.streams.get(sd)?.filters;
        if filters.has_content_filter() {
            warn!("Refusing visibility recompute on {}: content filter active", sd);
            return Err(Error::ContentFilterActive(sd));
        }

        for entry in entries.iter_mut().filter(|e| e.stream == sd) {
            recompute(filters, entry, filter_mask);
        }
        self.collections.reset_stream(sd);
        Ok(())
    }

    /// Recompute every entry against its own stream's filters.
    pub fn filter_all_entries(&mut self, entries: &mut [Entry]) -> Result<()> {
        let filter_mask = self.config.filter_mask;
        let streams: BTreeSet<StreamId> = entries.iter().map(|e| e.stream).collect();
        for &sd in &streams {
            if self.streams.get(sd)?.filters.has_content_filter() {
                warn!("Refusing visibility recompute on {}: content filter active", sd);
                return Err(Error::ContentFilterActive(sd));
            }
        }

        for entry in entries.iter_mut() {
            recompute(&self.streams.get(entry.stream)?.filters, entry, filter_mask);
        }
        for sd in streams {
            self.collections.reset_stream(sd);
        }
        Ok(())
    }

    /// Drop every filter of every stream and make all entries visible.
    /// The plugin bit of each entry is kept.
    pub fn clear_all_filters(&mut self, entries: &mut [Entry]) {
        for sd in self.stream_ids() {
            if let Ok(stream) = self.streams.get_mut(sd) {
                stream.filters = FilterBank::new();
            }
        }
        for entry in entries.iter_mut() {
            entry.visible = VISIBLE_ALL & (entry.visible | !PLUGIN_UNTOUCHED);
        }
        self.collections.reset_all();
    }

    // ═══════════════════════════════════════════════════════════════════
    //  Queries
    // ═══════════════════════════════════════════════════════════════════

    /// Pids observed while loading `sd`, ascending.
    pub fn task_pids(&self, sd: StreamId) -> Result<Vec<i32>> {
        Ok(self.streams.get(sd)?.tasks.pids())
    }

    /// Name the source gives to `event_id`, if any.
    pub fn event_name(&self, sd: StreamId, event_id: i32) -> Result<Option<String>> {
        let source = self.streams.get(sd)?.lock_source()?;
        Ok(source.event_name(event_id))
    }

    /// Command name the source gives to `pid`, if any.
    pub fn task_name(&self, sd: StreamId, pid: i32) -> Result<Option<String>> {
        let source = self.streams.get(sd)?.lock_source()?;
        Ok(source.task_name(pid))
    }

    /// Re-read the raw record at `offset` under the stream's source lock.
    pub fn read_at(&self, sd: StreamId, offset: u64) -> Result<RawRecord> {
        let stream = self.streams.get(sd)?;
        let mut source = stream.lock_source()?;
        Ok(source.read_at(offset)?)
    }

    /// Pid of the record behind `entry`. The cached value is used unless
    /// a plugin has touched the entry.
    pub fn entry_pid(&self, entry: &Entry) -> Result<i32> {
        if entry.is_plugin_untouched() {
            return Ok(entry.pid);
        }
        Ok(self.read_at(entry.stream, entry.offset)?.pid)
    }

    /// Event id of the record behind `entry`, see [`Session::entry_pid`].
    pub fn entry_event_id(&self, entry: &Entry) -> Result<i32> {
        if entry.is_plugin_untouched() {
            return Ok(entry.event_id);
        }
        Ok(self.read_at(entry.stream, entry.offset)?.event_id)
    }

    /// One-line text form of an entry:
    /// `<ts>; <comm>-<pid>; CPU <cpu>; <event>; <info>; 0x<visible>`.
    pub fn dump_entry(&self, entry: &Entry) -> Result<String> {
        let stream = self.streams.get(entry.stream)?;
        let mut source = stream.lock_source()?;
        let comm = source
            .task_name(entry.pid)
            .unwrap_or_else(|| "<...>".to_string());

        let (event, info) = match entry.lost_count() {
            Some(lost) => ("missed_events".to_string(), format!("missed_events={lost}")),
            None => {
                let record = source.read_at(entry.offset)?;
                let event = source
                    .event_name(entry.event_id)
                    .unwrap_or_else(|| format!("event-{}", entry.event_id));
                (event, source.record_info(&record))
            }
        };

        Ok(format!(
            "{}; {}-{}; CPU {}; {}; {}; 0x{:x}",
            entry.ts, comm, entry.pid, entry.cpu, event, info, entry.visible
        ))
    }

    // ═══════════════════════════════════════════════════════════════════
    //  Collections
    // ═══════════════════════════════════════════════════════════════════

    /// Register a collection of the entries of `sd` matching
    /// `matcher(args)` and visible under `vis_mask`. Lookups reach up to
    /// `margin` entries past either edge of their bin.
    pub fn register_collection(
        &mut self,
        entries: &[Entry],
        matcher: Matcher,
        sd: StreamId,
        args: &[i32],
        vis_mask: u8,
        margin: usize,
    ) -> Result<CollectionKey> {
        self.streams.get(sd)?;
        let key = CollectionKey {
            matcher,
            stream: sd,
            args: args.to_vec(),
            vis_mask,
            margin,
        };
        self.collections.register(key, entries)
    }

    pub fn unregister_collection(&mut self, key: &CollectionKey) -> Result<()> {
        self.collections.unregister(key)
    }

    pub fn reset_collection(&mut self, key: &CollectionKey) -> Result<()> {
        self.collections.reset(key)
    }

    pub fn collection_front(
        &mut self,
        key: &CollectionKey,
        entries: &[Entry],
        bin: Bin,
    ) -> Result<Option<usize>> {
        self.collections.front(key, entries, bin)
    }

    pub fn collection_back(
        &mut self,
        key: &CollectionKey,
        entries: &[Entry],
        bin: Bin,
    ) -> Result<Option<usize>> {
        self.collections.back(key, entries, bin)
    }

    /// Release the indices of dense collections over small datasets. See
    /// [`CollectionCache::release_dense`].
    pub fn release_dense_collections(&mut self) -> usize {
        let released = self.collections.release_dense();
        if released > 0 {
            debug!("Released {} dense collections", released);
        }
        released
    }

    pub fn collections(&self) -> &CollectionCache {
        &self.collections
    }
}

/// Recompute one entry, keeping its plugin bit. Loss markers are never
/// filtered.
fn recompute(filters: &FilterBank, entry: &mut Entry, filter_mask: u8) {
    if entry.is_lost_marker() {
        return;
    }
    let computed = filters.compute_visibility(entry, filter_mask);
    entry.visible = computed & (entry.visible | !PLUGIN_UNTOUCHED);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EVENT_OVERFLOW, EVENT_VIEW, GRAPH_VIEW, TEXT_VIEW};
    use crate::plugin::tests::NextPidHandler;
    use crate::source::tests::{make_record, make_trace};
    use crate::source::{FileRecord, JsonOpener, SourceError};
    use tempfile::tempdir;

    const MASK: u8 = TEXT_VIEW | GRAPH_VIEW | EVENT_VIEW;

    fn make_session() -> Session {
        Session::new(SessionConfig::default()).unwrap()
    }

    fn open(session: &mut Session, n_cpus: usize, records: Vec<FileRecord>) -> StreamId {
        let source = make_trace(n_cpus, records).into_source().unwrap();
        session.open_source("test", Box::new(source)).unwrap()
    }

    /// A host trace of pid 42 at 100 and 300, and a guest trace of pid 43
    /// at 1000 and 1300.
    fn open_host_and_guest(session: &mut Session) -> (StreamId, StreamId) {
        let host = vec![make_record(100, 0, 42, 1), make_record(300, 0, 42, 1)];
        let guest = vec![make_record(1000, 0, 43, 1), make_record(1300, 0, 43, 1)];
        (open(session, 1, host), open(session, 1, guest))
    }

    fn sample_records() -> Vec<FileRecord> {
        vec![
            make_record(10, 0, 42, 1),
            make_record(20, 1, 43, 2),
            make_record(30, 0, 42, 2),
            make_record(40, 1, 44, 1),
        ]
    }

    #[test]
    fn hiding_a_task_clears_exactly_the_filter_mask() {
        let mut session = make_session();
        let sd = open(&mut session, 2, sample_records());
        let mut entries = session.load_entries(sd).unwrap();
        assert!(entries.iter().all(|e| e.visible == VISIBLE_ALL));

        let before = entries.clone();
        session.add_filter_id(sd, FilterKind::HideTask, 43).unwrap();
        assert!(session.filter_is_set(sd).unwrap());
        session.filter_stream_entries(sd, &mut entries).unwrap();

        for (old, new) in before.iter().zip(&entries) {
            if old.pid == 43 {
                assert_eq!(new.visible, old.visible & !MASK);
            } else {
                assert_eq!(new.visible, old.visible);
            }
        }
    }

    #[test]
    fn recompute_refused_while_content_filter_active() {
        let mut session = make_session();
        let sd = open(&mut session, 2, sample_records());
        let mut entries = session.load_entries(sd).unwrap();

        session
            .set_content_filter(sd, Box::new(|r: &RawRecord| r.pid != 42))
            .unwrap();
        let before = entries.clone();
        assert!(matches!(
            session.filter_stream_entries(sd, &mut entries),
            Err(Error::ContentFilterActive(s)) if s == sd
        ));
        assert!(matches!(
            session.filter_all_entries(&mut entries),
            Err(Error::ContentFilterActive(_))
        ));
        assert_eq!(entries, before);

        // Reloading applies it instead.
        let entries = session.load_entries(sd).unwrap();
        let hidden: Vec<i32> = entries
            .iter()
            .filter(|e| !e.is_visible(TEXT_VIEW))
            .map(|e| e.pid)
            .collect();
        assert_eq!(hidden, vec![42, 42]);
    }

    #[test]
    fn open_through_opener_and_report_failures() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trace.json");
        make_trace(2, sample_records()).save(&path).unwrap();

        let mut session = make_session();
        let sd = session.open(&JsonOpener, &path).unwrap();
        assert_eq!(session.load_entries(sd).unwrap().len(), 4);
        assert_eq!(session.task_pids(sd).unwrap(), vec![42, 43, 44]);

        let missing = dir.path().join("missing.json");
        let err = session.open(&JsonOpener, &missing).unwrap_err();
        assert!(matches!(
            err,
            Error::Open { ref path, source: SourceError::Io(_) } if *path == missing
        ));
    }

    #[test]
    fn closed_handles_are_rejected() {
        let mut session = make_session();
        let sd = open(&mut session, 1, vec![make_record(1, 0, 42, 1)]);
        let entries = session.load_entries(sd).unwrap();
        session
            .register_collection(&entries, Matcher::PID, sd, &[42], TEXT_VIEW, 0)
            .unwrap();
        session
            .register_handler(1, sd, Arc::new(NextPidHandler))
            .unwrap();

        session.close(sd).unwrap();
        assert!(session.collections().is_empty());
        assert!(matches!(session.load_entries(sd), Err(Error::InvalidStream(_))));
        assert!(matches!(session.close(sd), Err(Error::InvalidStream(_))));
        assert!(matches!(
            session.register_handler(1, sd, Arc::new(NextPidHandler)),
            Err(Error::InvalidStream(_))
        ));

        let reopened = open(&mut session, 1, vec![]);
        assert_eq!(reopened.slot, sd.slot);
        assert_ne!(reopened, sd);
    }

    #[test]
    fn append_merges_a_calibrated_stream() {
        let mut session = make_session();
        let (host, guest) = open_host_and_guest(&mut session);

        let prior = session.load_entries(host).unwrap();
        let merged = session
            .append(prior, guest, Some(Calibration::Offset(-800)))
            .unwrap();

        let got: Vec<(i64, StreamId)> = merged.iter().map(|e| (e.ts, e.stream)).collect();
        assert_eq!(got, vec![(100, host), (200, guest), (300, host), (500, guest)]);
        assert!(session.stream(guest).unwrap().calibration().is_some());
    }

    #[test]
    fn append_invalidates_collections_of_prior_streams() {
        let mut session = make_session();
        let (host, guest) = open_host_and_guest(&mut session);

        let prior = session.load_entries(host).unwrap();
        let key = session
            .register_collection(&prior, Matcher::PID, host, &[42], TEXT_VIEW, 0)
            .unwrap();
        let last = Bin { first: 1, n: 1 };
        assert_eq!(session.collection_front(&key, &prior, last).unwrap(), Some(1));

        let merged = session
            .append(prior, guest, Some(Calibration::Offset(-800)))
            .unwrap();
        assert!(!session.collections().get(&key).unwrap().is_valid());

        // 300 now sits behind the guest's 200.
        let tail = Bin { first: 1, n: 3 };
        assert_eq!(session.collection_front(&key, &merged, tail).unwrap(), Some(2));
        let back = Bin { first: 3, n: 4 };
        assert_eq!(session.collection_back(&key, &merged, back).unwrap(), Some(2));
    }

    #[test]
    fn load_all_invalidates_every_collection() {
        let mut session = make_session();
        let (host, guest) = open_host_and_guest(&mut session);
        session.set_calibration(guest, Calibration::Offset(-800)).unwrap();

        let alone = session.load_entries(host).unwrap();
        let key = session
            .register_collection(&alone, Matcher::PID, host, &[42], TEXT_VIEW, 0)
            .unwrap();

        let merged = session.load_all_entries().unwrap();
        assert!(!session.collections().get(&key).unwrap().is_valid());
        let all = Bin { first: 0, n: merged.len() };
        assert_eq!(session.collection_front(&key, &merged, all).unwrap(), Some(0));
        let back = Bin { first: 3, n: 4 };
        assert_eq!(session.collection_back(&key, &merged, back).unwrap(), Some(2));
        assert_eq!(session.collections().get(&key).unwrap().len(), 2);
    }

    #[test]
    fn load_all_merges_every_stream() {
        let mut session = make_session();
        let a = open(&mut session, 1, vec![make_record(5, 0, 42, 1), make_record(7, 0, 42, 1)]);
        let b = open(&mut session, 2, vec![make_record(5, 0, 43, 1), make_record(6, 1, 43, 1)]);

        let merged = session.load_all_entries().unwrap();
        let got: Vec<(i64, StreamId)> = merged.iter().map(|e| (e.ts, e.stream)).collect();
        assert_eq!(got, vec![(5, a), (5, b), (6, b), (7, a)]);
        assert_eq!(session.load_progress().load(Ordering::Relaxed), 4);
    }

    #[test]
    fn filter_all_uses_each_streams_bank() {
        let mut session = make_session();
        let a = open(&mut session, 1, vec![make_record(1, 0, 42, 1)]);
        let b = open(&mut session, 1, vec![make_record(2, 0, 42, 1)]);
        let mut entries = session.load_all_entries().unwrap();

        session.add_filter_id(b, FilterKind::HideEvent, 1).unwrap();
        session.filter_all_entries(&mut entries).unwrap();
        assert_eq!(entries[0].stream, a);
        assert_eq!(entries[0].visible, VISIBLE_ALL);
        assert_eq!(entries[1].visible, GRAPH_VIEW | PLUGIN_UNTOUCHED);

        session.clear_all_filters(&mut entries);
        assert!(!session.filter_is_set(b).unwrap());
        assert!(entries.iter().all(|e| e.visible == VISIBLE_ALL));
    }

    #[test]
    fn plugin_touched_entries_reread_the_record() {
        let mut session = make_session();
        let mut switch = make_record(10, 0, 42, 1);
        switch.data = 7i32.to_le_bytes().to_vec();
        let sd = open(&mut session, 1, vec![switch, make_record(20, 0, 42, 2)]);
        session
            .register_handler(1, sd, Arc::new(NextPidHandler))
            .unwrap();

        let mut entries = session.load_entries(sd).unwrap();
        assert_eq!(entries[0].pid, 7);
        assert_eq!(session.entry_pid(&entries[0]).unwrap(), 42);
        assert_eq!(session.entry_event_id(&entries[0]).unwrap(), 1);
        assert_eq!(session.entry_pid(&entries[1]).unwrap(), 42);

        // Recompute keeps the plugin bit cleared.
        session.add_filter_id(sd, FilterKind::HideCpu, 3).unwrap();
        session.filter_stream_entries(sd, &mut entries).unwrap();
        assert!(!entries[0].is_plugin_untouched());
        assert!(entries[1].is_plugin_untouched());
        session.clear_all_filters(&mut entries);
        assert!(!entries[0].is_plugin_untouched());
    }

    #[test]
    fn dump_formats_records_and_markers() {
        let mut session = make_session();
        let mut record = make_record(1000, 0, 42, 1);
        record.missed_events = 3;
        record.info = Some("prev_pid=42".to_string());
        let sd = open(&mut session, 1, vec![record]);

        let entries = session.load_entries(sd).unwrap();
        assert_eq!(session.task_name(sd, 42).unwrap().as_deref(), Some("bash"));
        assert_eq!(session.event_name(sd, 7).unwrap(), None);
        assert_eq!(entries[0].event_id, EVENT_OVERFLOW);
        assert_eq!(
            session.dump_entry(&entries[0]).unwrap(),
            "990; bash-42; CPU 0; missed_events; missed_events=3; 0xff"
        );
        assert_eq!(
            session.dump_entry(&entries[1]).unwrap(),
            "1000; bash-42; CPU 0; sched_switch; prev_pid=42; 0xff"
        );
    }

    #[test]
    fn visibility_changes_invalidate_collections() {
        let mut session = make_session();
        let sd = open(&mut session, 2, sample_records());
        let mut entries = session.load_entries(sd).unwrap();
        let key = session
            .register_collection(&entries, Matcher::CPU, sd, &[1], TEXT_VIEW, 0)
            .unwrap();
        let bin = Bin { first: 0, n: entries.len() };
        assert_eq!(session.collection_front(&key, &entries, bin).unwrap(), Some(1));

        session.add_filter_id(sd, FilterKind::HideTask, 43).unwrap();
        session.filter_stream_entries(sd, &mut entries).unwrap();
        assert!(!session.collections().get(&key).unwrap().is_valid());
        assert_eq!(session.collection_front(&key, &entries, bin).unwrap(), Some(3));
        assert_eq!(session.collection_back(&key, &entries, Bin { first: 2, n: 3 }).unwrap(), None);

        session.unregister_collection(&key).unwrap();
        assert!(matches!(
            session.collection_front(&key, &entries, bin),
            Err(Error::UnknownCollection)
        ));
    }

    #[test]
    fn filter_mask_is_validated() {
        let mut session = make_session();
        session.set_filter_mask(TEXT_VIEW).unwrap();
        assert_eq!(session.filter_mask(), TEXT_VIEW);
        assert!(matches!(
            session.set_filter_mask(PLUGIN_UNTOUCHED),
            Err(Error::Config(_))
        ));
        assert_eq!(session.filter_mask(), TEXT_VIEW);
    }
}
