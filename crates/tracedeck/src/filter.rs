//! Per-stream show/hide id filters and visibility computation.
//!
//! Each stream owns a [`FilterBank`]: six id filters (show/hide for task,
//! event and cpu) and an optional [`ContentFilter`] that inspects raw
//! record bytes. The bank folds its verdicts into an entry's visibility
//! mask:
//!
//! - an event-kind miss keeps only [`GRAPH_VIEW`], so the timeline still
//!   marks that something happened while every other view drops it;
//! - a task or cpu miss clears exactly the caller-configured filter mask.
//!
//! The content filter needs the raw record, so it is only evaluated at
//! ingest time.

use crate::entry::{Entry, GRAPH_VIEW, PLUGIN_UNTOUCHED, VISIBLE_ALL};
use crate::source::RawRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════
//  Id filter
// ═══════════════════════════════════════════════════════════════════════

/// Which of the six id filters of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterKind {
    ShowTask,
    HideTask,
    ShowEvent,
    HideEvent,
    ShowCpu,
    HideCpu,
}

impl FilterKind {
    pub const ALL: [FilterKind; 6] = [
        FilterKind::ShowTask,
        FilterKind::HideTask,
        FilterKind::ShowEvent,
        FilterKind::HideEvent,
        FilterKind::ShowCpu,
        FilterKind::HideCpu,
    ];
}

/// A set of ids. Empty means "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdFilter {
    ids: BTreeSet<i32>,
}

impl IdFilter {
    pub fn add(&mut self, id: i32) {
        self.ids.insert(id);
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn contains(&self, id: i32) -> bool {
        self.ids.contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Ids in ascending order.
    pub fn ids(&self) -> Vec<i32> {
        self.ids.iter().copied().collect()
    }

    /// A show filter passes listed ids; a hide filter passes unlisted ids.
    fn passes(&self, id: i32, show: bool) -> bool {
        self.is_empty() || self.contains(id) == show
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Content filter
// ═══════════════════════════════════════════════════════════════════════

/// Filter evaluated against the raw record payload.
///
/// Any `Fn(&RawRecord) -> bool` closure is a content filter.
pub trait ContentFilter: Send + Sync {
    /// Whether the record passes (stays visible).
    fn matches(&self, record: &RawRecord) -> bool;
}

impl<F> ContentFilter for F
where
    F: Fn(&RawRecord) -> bool + Send + Sync,
{
    fn matches(&self, record: &RawRecord) -> bool {
        self(record)
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Filter bank
// ═══════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct FilterBank {
    show_task: IdFilter,
    hide_task: IdFilter,
    show_event: IdFilter,
    hide_event: IdFilter,
    show_cpu: IdFilter,
    hide_cpu: IdFilter,
    content: Option<Box<dyn ContentFilter>>,
}

impl fmt::Debug for FilterBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterBank")
            .field("show_task", &self.show_task)
            .field("hide_task", &self.hide_task)
            .field("show_event", &self.show_event)
            .field("hide_event", &self.hide_event)
            .field("show_cpu", &self.show_cpu)
            .field("hide_cpu", &self.hide_cpu)
            .field("content", &self.content.is_some())
            .finish()
    }
}

impl FilterBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: FilterKind) -> &IdFilter {
        match kind {
            FilterKind::ShowTask => &self.show_task,
            FilterKind::HideTask => &self.hide_task,
            FilterKind::ShowEvent => &self.show_event,
            FilterKind::HideEvent => &self.hide_event,
            FilterKind::ShowCpu => &self.show_cpu,
            FilterKind::HideCpu => &self.hide_cpu,
        }
    }

    fn get_mut(&mut self, kind: FilterKind) -> &mut IdFilter {
        match kind {
            FilterKind::ShowTask => &mut self.show_task,
            FilterKind::HideTask => &mut self.hide_task,
            FilterKind::ShowEvent => &mut self.show_event,
            FilterKind::HideEvent => &mut self.hide_event,
            FilterKind::ShowCpu => &mut self.show_cpu,
            FilterKind::HideCpu => &mut self.hide_cpu,
        }
    }

    pub fn add_id(&mut self, kind: FilterKind, id: i32) {
        self.get_mut(kind).add(id);
    }

    pub fn clear(&mut self, kind: FilterKind) {
        self.get_mut(kind).clear();
    }

    /// Whether at least one of the six id filters is non-empty.
    pub fn is_set(&self) -> bool {
        FilterKind::ALL.iter().any(|&k| !self.get(k).is_empty())
    }

    pub fn set_content_filter(&mut self, filter: Box<dyn ContentFilter>) {
        self.content = Some(filter);
    }

    pub fn clear_content_filter(&mut self) {
        self.content = None;
    }

    pub fn has_content_filter(&self) -> bool {
        self.content.is_some()
    }

    pub fn show_task(&self, pid: i32) -> bool {
        self.show_task.passes(pid, true) && self.hide_task.passes(pid, false)
    }

    pub fn show_event(&self, event_id: i32) -> bool {
        self.show_event.passes(event_id, true) && self.hide_event.passes(event_id, false)
    }

    pub fn show_cpu(&self, cpu: i32) -> bool {
        self.show_cpu.passes(cpu, true) && self.hide_cpu.passes(cpu, false)
    }

    /// Content filter verdict for a raw record. Passes when no content
    /// filter is installed.
    pub fn content_matches(&self, record: &RawRecord) -> bool {
        self.content.as_ref().map_or(true, |f| f.matches(record))
    }

    /// Visibility of `entry` under the id filters, starting from
    /// [`VISIBLE_ALL`].
    pub fn compute_visibility(&self, entry: &Entry, filter_mask: u8) -> u8 {
        self.fold_visibility(VISIBLE_ALL, entry, true, filter_mask)
    }

    /// Fold the id-filter verdicts (and an already evaluated content
    /// verdict) into `visible`.
    pub(crate) fn fold_visibility(
        &self,
        visible: u8,
        entry: &Entry,
        content_match: bool,
        filter_mask: u8,
    ) -> u8 {
        let mut visible = visible;

        if !content_match || !self.show_event(entry.event_id) {
            visible = collapse_to_graph(visible);
        }
        if !self.show_cpu(entry.cpu) {
            visible &= !filter_mask;
        }
        if !self.show_task(entry.pid) {
            visible &= !filter_mask;
        }

        visible
    }
}

/// Event-filtered entries survive only in the graph view. The plugin
/// bit is metadata, not a view, and is carried through unchanged.
fn collapse_to_graph(visible: u8) -> u8 {
    visible & (GRAPH_VIEW | PLUGIN_UNTOUCHED)
}
