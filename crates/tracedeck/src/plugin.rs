//! Plugin event handlers.
//!
//! The host application registers [`EventHandler`]s against an
//! `(event id, stream)` pair. Ingest calls `on_record` for each matching
//! record in registration order; the renderer calls `on_draw` through
//! [`HandlerTable::draw`]. Handlers are assumed not to fail.

use crate::entry::{Entry, StreamId};
use crate::source::RawRecord;
use std::fmt;
use std::sync::Arc;

/// Data handed to `on_draw`.
#[derive(Debug, Clone, Copy)]
pub struct DrawRequest<'a> {
    pub stream: StreamId,
    pub entries: &'a [Entry],
    /// First entry index of the region being drawn.
    pub first: usize,
    /// Number of entries in the region.
    pub n: usize,
}

pub trait EventHandler: Send + Sync {
    /// Called during ingest with the raw record and its freshly built
    /// entry. May rewrite derived fields such as `pid`.
    fn on_record(&self, record: &RawRecord, entry: &mut Entry);

    /// Called by the rendering layer.
    fn on_draw(&self, _request: &DrawRequest<'_>) {}
}

struct Registration {
    event_id: i32,
    stream: StreamId,
    handler: Arc<dyn EventHandler>,
}

/// Ordered table of registered handlers.
#[derive(Default)]
pub struct HandlerTable {
    handlers: Vec<Registration>,
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|r| (r.event_id, r.stream)))
            .finish()
    }
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, event_id: i32, stream: StreamId, handler: Arc<dyn EventHandler>) {
        self.handlers.push(Registration {
            event_id,
            stream,
            handler,
        });
    }

    /// Remove every registration of `handler` for `(event_id, stream)`.
    /// Returns the number removed.
    pub fn unregister(
        &mut self,
        event_id: i32,
        stream: StreamId,
        handler: &Arc<dyn EventHandler>,
    ) -> usize {
        let before = self.handlers.len();
        self.handlers.retain(|r| {
            !(r.event_id == event_id && r.stream == stream && Arc::ptr_eq(&r.handler, handler))
        });
        before - self.handlers.len()
    }

    /// Drop all registrations for a stream (used when it is closed).
    pub fn remove_stream(&mut self, stream: StreamId) {
        self.handlers.retain(|r| r.stream != stream);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run every matching `on_record` in registration order.
    ///
    /// Each lookup uses the entry's current event id, so a handler that
    /// retypes an entry hands it on to the handlers of the new kind.
    /// Returns the number of handlers that fired.
    pub fn process(&self, record: &RawRecord, entry: &mut Entry) -> usize {
        let mut fired = 0;
        for reg in &self.handlers {
            if reg.event_id == entry.event_id && reg.stream == entry.stream {
                reg.handler.on_record(record, entry);
                fired += 1;
            }
        }
        fired
    }

    /// Run every matching `on_draw` in registration order.
    pub fn draw(&self, stream: StreamId, event_id: i32, request: &DrawRequest<'_>) -> usize {
        let mut fired = 0;
        for reg in &self.handlers {
            if reg.event_id == event_id && reg.stream == stream {
                reg.handler.on_draw(request);
                fired += 1;
            }
        }
        fired
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::entry::tests::make_entry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const SD: StreamId = StreamId::new(0, 0);

    /// Rewrites the pid from the first four payload bytes, the way a
    /// sched_switch handler attributes the record to the next task.
    pub(crate) struct NextPidHandler;

    impl EventHandler for NextPidHandler {
        fn on_record(&self, record: &RawRecord, entry: &mut Entry) {
            if let Some(bytes) = record.data.get(..4) {
                entry.pid = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            }
        }
    }

    struct Tagger {
        tag: i32,
        log: Arc<Mutex<Vec<i32>>>,
    }

    impl EventHandler for Tagger {
        fn on_record(&self, _record: &RawRecord, _entry: &mut Entry) {
            self.log.lock().unwrap().push(self.tag);
        }
    }

    struct Retyper;

    impl EventHandler for Retyper {
        fn on_record(&self, _record: &RawRecord, entry: &mut Entry) {
            entry.event_id = 2;
        }
    }

    #[derive(Default)]
    struct DrawCounter(AtomicUsize);

    impl EventHandler for DrawCounter {
        fn on_record(&self, _record: &RawRecord, _entry: &mut Entry) {}

        fn on_draw(&self, request: &DrawRequest<'_>) {
            self.0.fetch_add(request.n, Ordering::SeqCst);
        }
    }

    fn make_raw(data: Vec<u8>) -> RawRecord {
        RawRecord {
            ts: 0,
            cpu: 0,
            pid: 1,
            event_id: 1,
            offset: 0,
            missed_events: 0,
            data,
        }
    }

    #[test]
    fn handlers_fire_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut table = HandlerTable::new();
        for tag in [3, 1, 2] {
            table.register(1, SD, Arc::new(Tagger { tag, log: log.clone() }));
        }
        // Different stream and different event: never fire.
        table.register(1, StreamId::new(1, 0), Arc::new(Tagger { tag: 9, log: log.clone() }));
        table.register(5, SD, Arc::new(Tagger { tag: 8, log: log.clone() }));

        let mut e = make_entry(SD, 0, 1);
        assert_eq!(table.process(&make_raw(vec![]), &mut e), 3);
        assert_eq!(*log.lock().unwrap(), vec![3, 1, 2]);
    }

    #[test]
    fn handler_rewrites_pid() {
        let mut table = HandlerTable::new();
        table.register(1, SD, Arc::new(NextPidHandler));
        let mut e = make_entry(SD, 0, 1);
        table.process(&make_raw(77i32.to_le_bytes().to_vec()), &mut e);
        assert_eq!(e.pid, 77);
    }

    #[test]
    fn retyped_entry_reaches_handlers_of_new_kind() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut table = HandlerTable::new();
        table.register(1, SD, Arc::new(Retyper));
        table.register(2, SD, Arc::new(Tagger { tag: 2, log: log.clone() }));
        table.register(1, SD, Arc::new(Tagger { tag: 1, log: log.clone() }));

        let mut e = make_entry(SD, 0, 1);
        assert_eq!(table.process(&make_raw(vec![]), &mut e), 2);
        assert_eq!(*log.lock().unwrap(), vec![2]);
    }

    #[test]
    fn unregister_and_remove_stream() {
        let handler: Arc<dyn EventHandler> = Arc::new(NextPidHandler);
        let mut table = HandlerTable::new();
        table.register(1, SD, handler.clone());
        table.register(2, SD, handler.clone());
        table.register(1, StreamId::new(1, 0), handler.clone());

        assert_eq!(table.unregister(1, SD, &handler), 1);
        assert_eq!(table.len(), 2);
        table.remove_stream(SD);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn draw_dispatches_on_draw() {
        let counter = Arc::new(DrawCounter::default());
        let mut table = HandlerTable::new();
        table.register(1, SD, counter.clone());
        let entries = vec![make_entry(SD, 0, 1); 4];
        let request = DrawRequest {
            stream: SD,
            entries: &entries,
            first: 0,
            n: 4,
        };
        assert_eq!(table.draw(SD, 1, &request), 1);
        assert_eq!(table.draw(SD, 2, &request), 0);
        assert_eq!(counter.0.load(Ordering::SeqCst), 4);
    }
}
