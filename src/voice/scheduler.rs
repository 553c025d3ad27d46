//! Gapless playback scheduling on a virtual clock
//!
//! Segments are placed back-to-back in arrival order: each one starts where
//! the previous one ends, or at the current clock time if playback has
//! drained. An interrupt flushes every scheduled segment at once and resets
//! the clock cursor, so the next arrival starts "now".

use std::collections::BTreeMap;
use std::sync::Arc;

use super::frame::PlaybackSegment;

/// Handle identifying a scheduled segment within one session
pub type SegmentId = u64;

/// A segment with its computed start time
#[derive(Debug, Clone)]
pub struct PlaybackQueueEntry {
    /// Handle, unique and increasing within the scheduler
    pub id: SegmentId,
    /// Start time on the playback clock, in seconds
    pub start_time: f64,
    /// Segment length in seconds
    pub duration: f64,
    /// Decoded audio
    pub segment: Arc<PlaybackSegment>,
}

impl PlaybackQueueEntry {
    /// Clock time at which this entry finishes
    #[must_use]
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// Tracks the scheduling cursor and the set of active segments
#[derive(Debug)]
pub struct PlaybackScheduler {
    next_start_time: f64,
    active: BTreeMap<SegmentId, PlaybackQueueEntry>,
    next_id: SegmentId,
}

impl PlaybackScheduler {
    /// Create a scheduler whose cursor starts at the given clock time
    #[must_use]
    pub const fn new(now: f64) -> Self {
        Self {
            next_start_time: now,
            active: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Schedule a segment that arrived at clock time `now`
    ///
    /// The entry starts at `max(cursor, now)` and the cursor advances by the
    /// segment duration.
    pub fn schedule(&mut self, segment: PlaybackSegment, now: f64) -> PlaybackQueueEntry {
        self.next_start_time = self.next_start_time.max(now);

        let duration = segment.duration();
        let entry = PlaybackQueueEntry {
            id: self.next_id,
            start_time: self.next_start_time,
            duration,
            segment: Arc::new(segment),
        };

        self.next_id += 1;
        self.next_start_time += duration;
        self.active.insert(entry.id, entry.clone());

        tracing::trace!(
            id = entry.id,
            start = entry.start_time,
            duration,
            active = self.active.len(),
            "segment scheduled"
        );

        entry
    }

    /// Remove a segment that finished playing
    ///
    /// Returns false if the segment was not active (already flushed).
    pub fn finish(&mut self, id: SegmentId) -> bool {
        self.active.remove(&id).is_some()
    }

    /// Drop every active segment and reset the cursor
    ///
    /// Returns the flushed entries in start order so the caller can stop them.
    pub fn flush(&mut self) -> Vec<PlaybackQueueEntry> {
        self.next_start_time = 0.0;
        std::mem::take(&mut self.active).into_values().collect()
    }

    /// Whether any segment is scheduled or playing
    #[must_use]
    pub fn is_talking(&self) -> bool {
        !self.active.is_empty()
    }

    /// Earliest time the next segment may start
    #[must_use]
    pub const fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Number of active segments
    #[must_use]
    pub fn active_len(&self) -> usize {
        self.active.len()
    }
}
