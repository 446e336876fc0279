//! Time merging of entry sequences.
//!
//! - [`merge_cpu_lists`]: k-way merge of the per-CPU lists built by
//!   ingest, ties going to the lowest CPU index.
//! - [`merge_streams`]: merge of two already ordered arrays (a prior one
//!   and a newly loaded stream), stable on ties, with a bulk copy of the
//!   leading run that precedes the other array entirely.
//!
//! Both consume their inputs: every entry moves into the output exactly
//! once, so no entry is ever reachable from two live arrays.

use crate::entry::Entry;
use crate::error::Result;
use std::iter::Peekable;
use std::vec::IntoIter;

/// Whether `entries` is ordered by non-decreasing timestamp.
pub fn is_time_ordered(entries: &[Entry]) -> bool {
    entries.windows(2).all(|w| w[0].ts <= w[1].ts)
}

// ═══════════════════════════════════════════════════════════════════════
//  k-way merge
// ═══════════════════════════════════════════════════════════════════════

type CpuHead = Peekable<IntoIter<Entry>>;

/// Index of the list whose head has the smallest timestamp. A linear
/// scan: CPU counts are small, and scanning in index order gives the
/// lowest CPU on ties for free.
fn pick_next_cpu(heads: &mut [CpuHead]) -> Option<usize> {
    let mut next: Option<(usize, i64)> = None;
    for (cpu, head) in heads.iter_mut().enumerate() {
        if let Some(entry) = head.peek() {
            if next.map_or(true, |(_, ts)| entry.ts < ts) {
                next = Some((cpu, entry.ts));
            }
        }
    }
    next.map(|(cpu, _)| cpu)
}

/// Merge per-CPU lists, each ordered by timestamp, into one ordered array.
pub fn merge_cpu_lists(lists: Vec<Vec<Entry>>) -> Result<Vec<Entry>> {
    debug_assert!(
        lists.iter().all(|l| is_time_ordered(l)),
        "merge_cpu_lists: unordered per-CPU input"
    );

    let total: usize = lists.iter().map(Vec::len).sum();
    let mut merged = Vec::new();
    merged.try_reserve_exact(total)?;

    let mut heads: Vec<CpuHead> = lists.into_iter().map(|l| l.into_iter().peekable()).collect();
    while let Some(cpu) = pick_next_cpu(&mut heads) {
        merged.extend(heads[cpu].next());
    }

    // Postcondition: nothing lost, output ordered.
    debug_assert_eq!(merged.len(), total);
    debug_assert!(is_time_ordered(&merged), "merge_cpu_lists: unordered output");

    Ok(merged)
}

// ═══════════════════════════════════════════════════════════════════════
//  Pairwise merge
// ═══════════════════════════════════════════════════════════════════════

/// Merge a prior array `a` with a new array `b`. On equal timestamps
/// entries of `a` come first.
pub fn merge_streams(a: Vec<Entry>, b: Vec<Entry>) -> Result<Vec<Entry>> {
    debug_assert!(is_time_ordered(&a) && is_time_ordered(&b));

    let (a_first, b_first) = match (a.first(), b.first()) {
        (Some(x), Some(y)) => (x.ts, y.ts),
        (None, _) => return Ok(b),
        (_, None) => return Ok(a),
    };

    let total = a.len() + b.len();
    let mut merged = Vec::new();
    merged.try_reserve_exact(total)?;

    // Leading run that precedes the other array's first entry.
    let (a_run, b_run) = if a_first < b_first {
        (a.partition_point(|e| e.ts < b_first), 0)
    } else {
        (0, b.partition_point(|e| e.ts < a_first))
    };

    let mut a = a.into_iter().peekable();
    let mut b = b.into_iter().peekable();
    merged.extend(a.by_ref().take(a_run));
    merged.extend(b.by_ref().take(b_run));

    loop {
        let take_a = match (a.peek(), b.peek()) {
            (Some(x), Some(y)) => x.ts <= y.ts,
            _ => break,
        };
        let next = if take_a { a.next() } else { b.next() };
        merged.extend(next);
    }

    // At most one side still has entries.
    merged.extend(a);
    merged.extend(b);

    debug_assert_eq!(merged.len(), total);
    debug_assert!(is_time_ordered(&merged), "merge_streams: unordered output");

    Ok(merged)
}
