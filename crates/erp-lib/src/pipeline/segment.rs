use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::signal::{Condition, ConditionedSignal, Epoch};
use log::{debug, info};
use serde::Serialize;

/// Role of an event label in trial segmentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    FixationStart,
    TrialEnd,
    Other,
}

impl Marker {
    pub fn classify(label: &str) -> Marker {
        if label.contains("fixation_start") {
            Marker::FixationStart
        } else if label.contains("end") && !label.contains("fixation") {
            Marker::TrialEnd
        } else {
            Marker::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    Outside,
    Inside { start: usize },
}

/// What a single row did to the segmenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Stay,
    Open { start: usize },
    /// A new fixation start replaced an epoch that never ended
    Restart { abandoned: usize, start: usize },
    /// Epoch covering `start..end`
    Close { start: usize, end: usize },
    /// Trial end seen with no epoch open
    Dangling,
}

impl SegmentState {
    /// Transition table of the segmenter.
    pub fn step(self, marker: Marker, row: usize) -> (SegmentState, Transition) {
        use SegmentState::*;
        match (self, marker) {
            (_, Marker::Other) => (self, Transition::Stay),
            (Outside, Marker::FixationStart) => {
                (Inside { start: row }, Transition::Open { start: row })
            }
            (Inside { start }, Marker::FixationStart) => (
                Inside { start: row },
                Transition::Restart {
                    abandoned: start,
                    start: row,
                },
            ),
            (Inside { start }, Marker::TrialEnd) => (
                Outside,
                Transition::Close {
                    start,
                    end: row + 1,
                },
            ),
            (Outside, Marker::TrialEnd) => (Outside, Transition::Dangling),
        }
    }
}

/// Epochs dropped by the artifact thresholds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RejectionTally {
    pub amplitude: usize,
    pub gradient: usize,
}

impl RejectionTally {
    pub fn total(&self) -> usize {
        self.amplitude + self.gradient
    }
}

#[derive(Debug, Default)]
pub struct Segmentation {
    pub a: Vec<Epoch>,
    pub b: Vec<Epoch>,
    pub rejected: RejectionTally,
    /// Fixation starts superseded before their trial ended
    pub abandoned: usize,
    /// Per-epoch failures; none of them stop segmentation
    pub errors: Vec<PipelineError>,
}

impl Segmentation {
    pub fn epochs(&self, condition: Condition) -> &[Epoch] {
        match condition {
            Condition::A => &self.a,
            Condition::B => &self.b,
        }
    }

    fn push(&mut self, epoch: Epoch) {
        match epoch.condition {
            Condition::A => self.a.push(epoch),
            Condition::B => self.b.push(epoch),
        }
    }

    /// Fold another session's segmentation into this one.
    pub fn merge(&mut self, other: Segmentation) {
        self.a.extend(other.a);
        self.b.extend(other.b);
        self.rejected.amplitude += other.rejected.amplitude;
        self.rejected.gradient += other.rejected.gradient;
        self.abandoned += other.abandoned;
        self.errors.extend(other.errors);
    }
}

/// Sample gradient: central differences inside, one-sided at the ends.
pub fn gradient(x: &[f64]) -> Vec<f64> {
    let n = x.len();
    if n < 2 {
        return vec![0.0; n];
    }
    let mut out = Vec::with_capacity(n);
    out.push(x[1] - x[0]);
    for i in 1..n - 1 {
        out.push((x[i + 1] - x[i - 1]) / 2.0);
    }
    out.push(x[n - 1] - x[n - 2]);
    out
}

fn baseline_correct(x: &[f64], rows: usize) -> Vec<f64> {
    let window = &x[..rows.min(x.len())];
    let mean = window.iter().sum::<f64>() / window.len().max(1) as f64;
    x.iter().map(|v| v - mean).collect()
}

enum Verdict {
    Keep([Vec<f64>; 2]),
    Amplitude,
    Gradient,
}

fn screen(slice: [Vec<f64>; 2], cfg: &PipelineConfig) -> Verdict {
    let seg = &cfg.segment;
    if slice
        .iter()
        .flatten()
        .any(|v| v.abs() > seg.amplitude_limit)
    {
        return Verdict::Amplitude;
    }
    if slice
        .iter()
        .any(|ch| gradient(ch).iter().any(|g| g.abs() > seg.gradient_limit))
    {
        return Verdict::Gradient;
    }
    Verdict::Keep(slice)
}

/// Cut the conditioned signal into labelled, baseline-corrected epochs.
pub fn segment(signal: &ConditionedSignal, cfg: &PipelineConfig) -> Segmentation {
    let seg = &cfg.segment;
    let mut out = Segmentation::default();
    let mut state = SegmentState::Outside;
    for (row, label) in signal.events.iter().enumerate() {
        let (next, transition) = state.step(Marker::classify(label), row);
        state = next;
        let (start, end) = match transition {
            Transition::Close { start, end } => (start, end),
            Transition::Restart { abandoned, start } => {
                debug!("fixation start at row {start} supersedes open epoch from row {abandoned}");
                out.abandoned += 1;
                continue;
            }
            Transition::Dangling => {
                out.errors.push(PipelineError::DanglingTrialEnd {
                    row,
                    label: label.clone(),
                });
                continue;
            }
            Transition::Open { .. } | Transition::Stay => continue,
        };

        let slice: [Vec<f64>; 2] = std::array::from_fn(|c| {
            baseline_correct(&signal.channels[c][start..end], seg.baseline_rows)
        });
        let mut channels = match screen(slice, cfg) {
            Verdict::Keep(channels) => channels,
            Verdict::Amplitude => {
                debug!("epoch {start}..{end} rejected: amplitude");
                out.rejected.amplitude += 1;
                continue;
            }
            Verdict::Gradient => {
                debug!("epoch {start}..{end} rejected: gradient");
                out.rejected.gradient += 1;
                continue;
            }
        };
        if end - start < seg.epoch_rows {
            out.errors.push(PipelineError::ShortEpoch {
                rows: end - start,
                required: seg.epoch_rows,
            });
            continue;
        }
        channels.iter_mut().for_each(|ch| ch.truncate(seg.epoch_rows));
        let Some(condition) = cfg.condition_for(label) else {
            out.errors.push(PipelineError::UnknownCondition {
                label: label.clone(),
            });
            continue;
        };
        out.push(Epoch {
            condition,
            start_row: start,
            end_row: end,
            channels,
        });
    }
    if let SegmentState::Inside { start } = state {
        debug!("epoch opened at row {start} never ended");
        out.abandoned += 1;
    }
    info!(
        "segmented {} A / {} B epoch(s); rejected {} (amplitude {}, gradient {}); {} error(s)",
        out.a.len(),
        out.b.len(),
        out.rejected.total(),
        out.rejected.amplitude,
        out.rejected.gradient,
        out.errors.len()
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::NO_EVENT;

    fn quiet(n: usize) -> ConditionedSignal {
        ConditionedSignal {
            fs: 256.0,
            active: [1, 2],
            channels: [
                (0..n).map(|i| (i as f64 * 0.1).sin()).collect(),
                (0..n).map(|i| (i as f64 * 0.05).cos()).collect(),
            ],
            events: vec![NO_EVENT.to_string(); n],
        }
    }

    fn mark(signal: &mut ConditionedSignal, row: usize, label: &str) {
        signal.events[row] = label.to_string();
    }

    #[test]
    fn classifies_markers() {
        assert_eq!(Marker::classify("fixation_start"), Marker::FixationStart);
        assert_eq!(Marker::classify("assets/A.png_trial_ended"), Marker::TrialEnd);
        assert_eq!(Marker::classify("fixation_end"), Marker::Other);
        assert_eq!(Marker::classify(NO_EVENT), Marker::Other);
    }

    #[test]
    fn transition_table() {
        use SegmentState::*;
        assert_eq!(
            Outside.step(Marker::FixationStart, 3),
            (Inside { start: 3 }, Transition::Open { start: 3 })
        );
        assert_eq!(
            Inside { start: 3 }.step(Marker::TrialEnd, 9),
            (Outside, Transition::Close { start: 3, end: 10 })
        );
        assert_eq!(
            Inside { start: 3 }.step(Marker::FixationStart, 5),
            (Inside { start: 5 }, Transition::Restart { abandoned: 3, start: 5 })
        );
        assert_eq!(Outside.step(Marker::TrialEnd, 9), (Outside, Transition::Dangling));
        assert_eq!(
            Inside { start: 3 }.step(Marker::Other, 4),
            (Inside { start: 3 }, Transition::Stay)
        );
    }

    #[test]
    fn single_trial_yields_one_truncated_epoch() {
        let mut signal = quiet(400);
        mark(&mut signal, 5, "fixation_start");
        mark(&mut signal, 300, "A.png_trial_ended");
        let out = segment(&signal, &PipelineConfig::default());
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        assert_eq!(out.a.len(), 1);
        assert!(out.b.is_empty());
        let epoch = &out.a[0];
        assert_eq!(epoch.condition, Condition::A);
        assert_eq!((epoch.start_row, epoch.end_row), (5, 301));
        assert_eq!(epoch.len(), 291);
        assert_eq!(epoch.channels[1].len(), 291);
    }

    #[test]
    fn epoch_is_baseline_corrected() {
        let mut signal = quiet(400);
        signal.channels[0].iter_mut().for_each(|v| *v += 40.0);
        mark(&mut signal, 0, "fixation_start");
        mark(&mut signal, 320, "assets/B.png_trial_ended");
        let out = segment(&signal, &PipelineConfig::default());
        let epoch = &out.b[0];
        let baseline: f64 = epoch.channels[0][..31].iter().sum::<f64>() / 31.0;
        assert!(baseline.abs() < 1e-9);
        let raw = signal.channels[0][7] - signal.channels[0][..31].iter().sum::<f64>() / 31.0;
        assert!((epoch.channels[0][7] - raw).abs() < 1e-12);
    }

    #[test]
    fn amplitude_outlier_is_rejected_and_counted() {
        let mut signal = quiet(400);
        mark(&mut signal, 5, "fixation_start");
        mark(&mut signal, 300, "A.png_trial_ended");
        signal.channels[1][150] = 150.0;
        let out = segment(&signal, &PipelineConfig::default());
        assert!(out.a.is_empty());
        assert_eq!(out.rejected.amplitude, 1);
        assert_eq!(out.rejected.total(), 1);
        assert!(out.errors.is_empty());
    }

    #[test]
    fn steep_step_is_rejected_by_gradient() {
        let mut signal = quiet(400);
        mark(&mut signal, 5, "fixation_start");
        mark(&mut signal, 300, "A.png_trial_ended");
        signal.channels[0][200..].iter_mut().for_each(|v| *v += 30.0);
        let out = segment(&signal, &PipelineConfig::default());
        assert!(out.a.is_empty());
        assert_eq!(out.rejected.gradient, 1);
        assert_eq!(out.rejected.amplitude, 0);
    }

    #[test]
    fn trial_end_without_start_is_an_error_not_a_stale_epoch() {
        let mut signal = quiet(800);
        mark(&mut signal, 5, "fixation_start");
        mark(&mut signal, 300, "A.png_trial_ended");
        // no fixation start before this one
        mark(&mut signal, 700, "B.png_trial_ended");
        let out = segment(&signal, &PipelineConfig::default());
        assert_eq!(out.a.len(), 1);
        assert!(out.b.is_empty());
        assert_eq!(out.errors.len(), 1);
        assert!(matches!(
            out.errors[0],
            PipelineError::DanglingTrialEnd { row: 700, .. }
        ));
    }

    #[test]
    fn unknown_label_fails_only_that_epoch() {
        let mut signal = quiet(1000);
        mark(&mut signal, 5, "fixation_start");
        mark(&mut signal, 300, "assets/C.png_trial_ended");
        mark(&mut signal, 400, "fixation_start");
        mark(&mut signal, 720, "assets/B.png_trial_ended");
        let out = segment(&signal, &PipelineConfig::default());
        assert_eq!(out.b.len(), 1);
        assert_eq!(out.b[0].start_row, 400);
        assert!(matches!(
            &out.errors[..],
            [PipelineError::UnknownCondition { label }] if label == "assets/C.png_trial_ended"
        ));
    }

    #[test]
    fn short_epoch_is_malformed() {
        let mut signal = quiet(400);
        mark(&mut signal, 5, "fixation_start");
        mark(&mut signal, 100, "A.png_trial_ended");
        let out = segment(&signal, &PipelineConfig::default());
        assert!(out.a.is_empty());
        assert!(matches!(
            out.errors[..],
            [PipelineError::ShortEpoch { rows: 96, required: 291 }]
        ));
    }

    #[test]
    fn later_fixation_start_restarts_the_epoch() {
        let mut signal = quiet(800);
        mark(&mut signal, 5, "fixation_start");
        mark(&mut signal, 50, "fixation_start");
        mark(&mut signal, 400, "A.png_trial_ended");
        let out = segment(&signal, &PipelineConfig::default());
        assert_eq!(out.abandoned, 1);
        assert_eq!(out.a[0].start_row, 50);
    }

    #[test]
    fn gradient_matches_central_differences() {
        assert_eq!(gradient(&[1.0, 2.0, 4.0, 7.0]), vec![1.0, 1.5, 2.5, 3.0]);
        assert_eq!(gradient(&[5.0]), vec![0.0]);
    }
}
