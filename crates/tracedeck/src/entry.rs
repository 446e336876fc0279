//! Normalized in-memory trace entries.
//!
//! An [`Entry`] is the compact form of one trace record: enough fields to
//! sort, filter and plot it, plus the byte offset needed to re-read the
//! full record from its source when more detail is wanted.

use serde::{Deserialize, Serialize};
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════
//  Visibility bits
// ═══════════════════════════════════════════════════════════════════════

/// Entry is shown in the graph (timeline) view.
pub const GRAPH_VIEW: u8 = 1 << 0;
/// Entry is shown in the text (list) view.
pub const TEXT_VIEW: u8 = 1 << 1;
/// Entry is shown in the event-centric view.
pub const EVENT_VIEW: u8 = 1 << 2;
/// Cleared once a plugin handler has touched the entry. While set, the
/// cached `pid` and `event_id` fields are authoritative.
pub const PLUGIN_UNTOUCHED: u8 = 1 << 7;
/// Default mask: visible everywhere, untouched by plugins.
pub const VISIBLE_ALL: u8 = 0xFF;

// ═══════════════════════════════════════════════════════════════════════
//  Reserved ids
// ═══════════════════════════════════════════════════════════════════════

/// Event id of the synthetic "events lost" marker. Every synthetic kind
/// is negative so it can never collide with a real tracepoint id.
pub const EVENT_OVERFLOW: i32 = -75;

/// A loss marker is placed this many nanoseconds before the record that
/// reported the loss.
pub const LOST_EVENT_SHIFT_NS: i64 = 10;

// ═══════════════════════════════════════════════════════════════════════
//  Stream handle
// ═══════════════════════════════════════════════════════════════════════

/// Handle of an open trace stream.
///
/// `slot` is the small integer reused after a stream is closed;
/// `generation` changes on every reuse so a handle kept across a close is
/// detected instead of silently aliasing the new stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId {
    pub slot: u16,
    pub generation: u32,
}

impl StreamId {
    pub const fn new(slot: u16, generation: u32) -> Self {
        Self { slot, generation }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sd{}", self.slot)
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Entry
// ═══════════════════════════════════════════════════════════════════════

/// One trace record in normalized form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Stream this entry was ingested from.
    pub stream: StreamId,
    /// CPU whose ring buffer held the record.
    pub cpu: i32,
    /// Process id, possibly rewritten by a plugin handler.
    pub pid: i32,
    /// Event kind. Negative values are synthetic kinds ([`EVENT_OVERFLOW`]).
    pub event_id: i32,
    /// Timestamp in nanoseconds, after calibration.
    pub ts: i64,
    /// Position of the record in its source. Loss markers store the
    /// number of lost events here instead.
    pub offset: u64,
    /// One bit per consumer view, see [`VISIBLE_ALL`].
    pub visible: u8,
}

impl Entry {
    /// Whether this is a synthetic "events lost" marker.
    pub fn is_lost_marker(&self) -> bool {
        self.event_id == EVENT_OVERFLOW
    }

    /// Number of lost events carried by a loss marker.
    pub fn lost_count(&self) -> Option<u64> {
        self.is_lost_marker().then_some(self.offset)
    }

    /// Whether any of the bits in `mask` is set.
    pub fn is_visible(&self, mask: u8) -> bool {
        self.visible & mask != 0
    }

    /// Whether the cached `pid`/`event_id` can be trusted without
    /// re-reading the raw record.
    pub fn is_plugin_untouched(&self) -> bool {
        self.visible & PLUGIN_UNTOUCHED != 0
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {:>16} cpu={:<3} pid={:<7} event={:<5} vis={:#04x}",
            self.stream, self.ts, self.cpu, self.pid, self.event_id, self.visible
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Time search
// ═══════════════════════════════════════════════════════════════════════

/// Outcome of [`find_entry_by_time`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSearch {
    /// Index of the first entry with `ts >= time`.
    Found(usize),
    /// Every entry is later than the requested time.
    AllGreater,
    /// Every entry is earlier than the requested time (or the array is empty).
    AllSmaller,
}

/// Binary search a time-ordered entry array for the first entry at or
/// after `time`.
pub fn find_entry_by_time(entries: &[Entry], time: i64) -> TimeSearch {
    match (entries.first(), entries.last()) {
        (Some(first), _) if first.ts > time => TimeSearch::AllGreater,
        (_, Some(last)) if last.ts < time => TimeSearch::AllSmaller,
        (None, _) | (_, None) => TimeSearch::AllSmaller,
        _ => TimeSearch::Found(entries.partition_point(|e| e.ts < time)),
    }
}
