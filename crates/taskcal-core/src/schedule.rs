//! Interval math for calendar events.
//!
//! Intervals are half-open `[start, end)`: two intervals that only touch at a
//! boundary do not overlap. All-day events are treated like any other interval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{Event, EventConflict};

/// A half-open time interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// `self.start < other.end AND self.end > other.start`
    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// Shared window `[max(starts), min(ends))`, or `None` when disjoint.
    pub fn intersection(&self, other: &TimeInterval) -> Option<TimeInterval> {
        if !self.overlaps(other) {
            return None;
        }
        Some(TimeInterval {
            start: self.start.max(other.start),
            end: self.end.min(other.end),
        })
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

impl From<&Event> for TimeInterval {
    fn from(event: &Event) -> Self {
        TimeInterval::new(event.start_time, event.end_time)
    }
}

/// Check an event's interval: timed events need `start < end`, all-day events
/// may start and end on the same instant.
pub fn validate_event_interval(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    all_day: bool,
) -> Result<()> {
    if all_day {
        if start > end {
            return Err(Error::invalid_field(
                "end_time",
                "All-day event cannot end before it starts",
            ));
        }
    } else if start >= end {
        return Err(Error::invalid_field(
            "end_time",
            "Event end time must be after start time",
        ));
    }
    Ok(())
}

/// Report every event in `candidates` overlapping `window`, skipping
/// `exclude_id`. Order follows the input; conflicts are advisory and nothing is
/// ranked or resolved.
pub fn detect_conflicts(
    window: &TimeInterval,
    candidates: Vec<Event>,
    exclude_id: Option<uuid::Uuid>,
) -> Vec<EventConflict> {
    candidates
        .into_iter()
        .filter(|event| Some(event.id) != exclude_id)
        .filter_map(|event| {
            let overlap = window.intersection(&TimeInterval::from(&event))?;
            Some(EventConflict {
                overlap_start: overlap.start,
                overlap_end: overlap.end,
                overlap_minutes: overlap.duration_minutes(),
                event,
            })
        })
        .collect()
}
