use crate::config::TimestampAnchor;
use crate::error::{PipelineError, Result};
use crate::io::session::EegReading;
use crate::signal::{UnrolledSignal, N_CHANNELS};
use log::{debug, warn};
use std::collections::BTreeMap;

/// Bookkeeping of what the unroller skipped or truncated.
#[derive(Debug, Default)]
pub struct UnrollReport {
    /// Indices some but not all channels reported; skipped
    pub malformed: Vec<PipelineError>,
    /// Indices inside the dense range no channel reported (dropped packets)
    pub gaps: usize,
    /// Indices where some channel delivered zero samples; skipped
    pub empty: usize,
    /// Indices whose channels disagreed on length and were cut to the shortest
    pub truncated: usize,
    /// Readings from electrodes outside the probe range
    pub ignored_readings: usize,
}

#[derive(Debug)]
pub struct Unrolled {
    pub signal: UnrolledSignal,
    pub report: UnrollReport,
}

struct Slot<'a> {
    timestamp: f64,
    samples: [Option<&'a [f64]>; N_CHANNELS],
}

/// Timestamp of sample `j` of an `n`-sample batch stamped `batch_ts`.
pub fn sample_timestamp(batch_ts: f64, fs: f64, n: usize, j: usize, anchor: TimestampAnchor) -> f64 {
    let period = 1000.0 / fs;
    let steps_back = match anchor {
        TimestampAnchor::LastSample => n - 1 - j,
        TimestampAnchor::AfterLastSample => n - j,
    };
    batch_ts - period * steps_back as f64
}

/// Flatten per-electrode sample batches into one row per sample.
///
/// Batches are walked in index order. An index is emitted only when every
/// channel reported it, and then only up to the shortest channel's length.
pub fn unroll(readings: &[EegReading], fs: f64, anchor: TimestampAnchor) -> Result<Unrolled> {
    let mut report = UnrollReport::default();
    let mut slots: BTreeMap<i64, Slot<'_>> = BTreeMap::new();
    for reading in readings {
        if reading.electrode >= N_CHANNELS {
            report.ignored_readings += 1;
            continue;
        }
        let slot = slots.entry(reading.index).or_insert_with(|| Slot {
            timestamp: reading.timestamp,
            samples: [None; N_CHANNELS],
        });
        slot.timestamp = reading.timestamp;
        slot.samples[reading.electrode] = Some(reading.samples.as_slice());
    }
    if report.ignored_readings > 0 {
        debug!(
            "ignored {} reading(s) from auxiliary electrodes",
            report.ignored_readings
        );
    }

    let (first, last) = match (slots.keys().next(), slots.keys().next_back()) {
        (Some(&first), Some(&last)) => (first, last),
        _ => return Err(PipelineError::EmptySignal),
    };
    report.gaps = ((last - first + 1) as usize).saturating_sub(slots.len());

    let mut signal = UnrolledSignal {
        fs,
        ..Default::default()
    };
    for (&index, slot) in &slots {
        let missing: Vec<usize> = (0..N_CHANNELS)
            .filter(|&c| slot.samples[c].is_none())
            .collect();
        if !missing.is_empty() {
            warn!("skipping batch index {index}: channel(s) {missing:?} absent");
            report
                .malformed
                .push(PipelineError::MalformedBatch { index, missing });
            continue;
        }
        let batches: [&[f64]; N_CHANNELS] =
            std::array::from_fn(|c| slot.samples[c].unwrap_or_default());
        let n = batches.iter().map(|b| b.len()).min().unwrap_or(0);
        if n == 0 {
            report.empty += 1;
            continue;
        }
        if batches.iter().any(|b| b.len() != n) {
            report.truncated += 1;
        }
        for j in 0..n {
            signal.batch_index.push(index);
            signal
                .timestamps
                .push(sample_timestamp(slot.timestamp, fs, n, j, anchor));
            for (column, batch) in signal.channels.iter_mut().zip(batches) {
                column.push(batch[j]);
            }
        }
    }

    if signal.is_empty() {
        return Err(PipelineError::EmptySignal);
    }
    debug!(
        "unrolled {} rows from {} batch indices ({} gaps, {} malformed, {} empty, {} truncated)",
        signal.len(),
        slots.len(),
        report.gaps,
        report.malformed.len(),
        report.empty,
        report.truncated
    );
    Ok(Unrolled { signal, report })
}
