//! Timeline slot calculator.
//!
//! A slot is the window from an item's start to the next item's start (or to
//! the end of the video for the last one). Dubbed audio placed inside its slot
//! never runs into the next line.

use serde::Serialize;
use tracing::warn;

use crate::types::Segment;

/// Anything placed on the output timeline.
pub trait Timed {
    fn index(&self) -> u32;
    fn start_ms(&self) -> u64;
    fn end_ms(&self) -> u64;
}

impl Timed for Segment {
    fn index(&self) -> u32 {
        self.segment_index
    }

    fn start_ms(&self) -> u64 {
        self.start_time_ms
    }

    fn end_ms(&self) -> u64 {
        self.end_time_ms
    }
}

/// The window one item may occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimelineSlot {
    pub segment_index: u32,
    pub start_ms: u64,
    /// Clamped to zero when the computed window is empty or negative.
    pub available_ms: u64,
    /// Set when the computed window was `<= 0`; the item's audio can't be
    /// placed without overlap.
    pub conflict: bool,
}

/// Compute slots in start-time order.
///
/// Items are ordered by `(start_ms, index)` first, so out-of-order input is
/// tolerated. `total_duration_ms` defaults to the latest end time.
pub fn compute_slots<T: Timed>(items: &[T], total_duration_ms: Option<u64>) -> Vec<TimelineSlot> {
    let mut ordered: Vec<&T> = items.iter().collect();
    ordered.sort_by_key(|t| (t.start_ms(), t.index()));

    let total = total_duration_ms.unwrap_or_else(|| timeline_end(items));

    ordered
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let window_end = ordered.get(i + 1).map_or(total, |next| next.start_ms());
            let raw = window_end as i128 - item.start_ms() as i128;
            let conflict = raw <= 0;
            if conflict {
                warn!(
                    segment_index = item.index(),
                    start_ms = item.start_ms(),
                    window_ms = raw as i64,
                    "empty timeline slot, audio for this segment will be dropped"
                );
            }
            TimelineSlot {
                segment_index: item.index(),
                start_ms: item.start_ms(),
                available_ms: raw.max(0) as u64,
                conflict,
            }
        })
        .collect()
}

/// Latest end time across `items`, or 0 for none.
pub fn timeline_end<T: Timed>(items: &[T]) -> u64 {
    items.iter().map(Timed::end_ms).max().unwrap_or(0)
}
