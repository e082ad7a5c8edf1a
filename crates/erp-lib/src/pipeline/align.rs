use crate::error::{PipelineError, Result};
use crate::io::session::EventMarker;
use crate::signal::{AlignedSignal, UnrolledSignal, NO_EVENT};
use log::debug;
use serde::Serialize;

/// Row an event marker was placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventPlacement {
    /// Position of the marker in the session's event list
    pub event: usize,
    pub row: usize,
}

#[derive(Debug)]
pub struct Aligned {
    pub signal: AlignedSignal,
    /// One placement per input event, in input order
    pub placements: Vec<EventPlacement>,
    /// Events that overwrote an earlier event on the same row
    pub collisions: usize,
}

/// First row whose timestamp is at or after `timestamp`, clamped to the last row.
pub fn event_row(timestamps: &[f64], timestamp: f64) -> usize {
    let row = timestamps.partition_point(|&t| t < timestamp);
    row.min(timestamps.len().saturating_sub(1))
}

/// Attach every event marker to a row of the unrolled signal.
///
/// A later event landing on an already labelled row replaces the earlier
/// label; markers are a couple of milliseconds apart at most, so such
/// collisions are only counted.
pub fn align(signal: UnrolledSignal, events: &[EventMarker]) -> Result<Aligned> {
    if signal.is_empty() {
        return Err(PipelineError::EmptySignal);
    }
    let mut labels = vec![NO_EVENT.to_string(); signal.len()];
    let mut placements = Vec::with_capacity(events.len());
    let mut collisions = 0;
    for (i, event) in events.iter().enumerate() {
        let row = event_row(&signal.timestamps, event.timestamp);
        if labels[row] != NO_EVENT {
            debug!(
                "event '{}' replaces '{}' on row {row}",
                event.value, labels[row]
            );
            collisions += 1;
        }
        labels[row] = event.value.clone();
        placements.push(EventPlacement { event: i, row });
    }
    Ok(Aligned {
        signal: AlignedSignal {
            fs: signal.fs,
            timestamps: signal.timestamps,
            channels: signal.channels,
            events: labels,
        },
        placements,
        collisions,
    })
}
