use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of physical probes on the headband.
pub const N_CHANNELS: usize = 4;

/// Electrode names in probe order (10-20 positions).
pub const CHANNEL_NAMES: [&str; N_CHANNELS] = ["TP9", "AF7", "AF8", "TP10"];

/// Event label of rows no marker landed on.
pub const NO_EVENT: &str = "none";

/// One row per individual sample with a reconstructed timestamp (ms).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnrolledSignal {
    /// Sampling frequency in Hz
    pub fs: f64,
    /// Batch index each row was unrolled from
    pub batch_index: Vec<i64>,
    pub timestamps: Vec<f64>,
    /// Voltage per probe, one column per channel
    pub channels: [Vec<f64>; N_CHANNELS],
}

impl UnrolledSignal {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// `UnrolledSignal` with the event label assigned to every row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlignedSignal {
    pub fs: f64,
    pub timestamps: Vec<f64>,
    pub channels: [Vec<f64>; N_CHANNELS],
    pub events: Vec<String>,
}

impl AlignedSignal {
    pub fn len(&self) -> usize {
        self.events.len()
    }
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Stack several sessions row-wise, in the given order.
    ///
    /// Returns `None` for an empty input. The sampling rate of the first
    /// signal is kept.
    pub fn concat(signals: Vec<AlignedSignal>) -> Option<AlignedSignal> {
        let mut iter = signals.into_iter();
        let mut out = iter.next()?;
        for signal in iter {
            out.timestamps.extend(signal.timestamps);
            for (dst, src) in out.channels.iter_mut().zip(signal.channels) {
                dst.extend(src);
            }
            out.events.extend(signal.events);
        }
        Some(out)
    }
}

/// Re-referenced, filtered and unmixed active channels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionedSignal {
    pub fs: f64,
    /// Probe indices the two columns were derived from
    pub active: [usize; 2],
    pub channels: [Vec<f64>; 2],
    pub events: Vec<String>,
}

impl ConditionedSignal {
    pub fn len(&self) -> usize {
        self.events.len()
    }
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
    pub fn channel_names(&self) -> [&'static str; 2] {
        [CHANNEL_NAMES[self.active[0]], CHANNEL_NAMES[self.active[1]]]
    }
}

/// Experimental condition an epoch belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Condition {
    A,
    B,
}

impl Condition {
    pub const ALL: [Condition; 2] = [Condition::A, Condition::B];

    /// Numeric class label used in feature matrices.
    pub fn class_label(self) -> u8 {
        match self {
            Condition::A => 0,
            Condition::B => 1,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::A => write!(f, "A"),
            Condition::B => write!(f, "B"),
        }
    }
}

/// Fixed-length, baseline-corrected slice of the conditioned signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epoch {
    pub condition: Condition,
    /// First row of the slice in the conditioned signal
    pub start_row: usize,
    /// Exclusive end row, before truncation
    pub end_row: usize,
    pub channels: [Vec<f64>; 2],
}

impl Epoch {
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }
    pub fn is_empty(&self) -> bool {
        self.channels[0].is_empty()
    }

    /// Both channels back to back, first active channel first.
    pub fn feature_vector(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.channels[0].len() + self.channels[1].len());
        out.extend_from_slice(&self.channels[0]);
        out.extend_from_slice(&self.channels[1]);
        out
    }
}
