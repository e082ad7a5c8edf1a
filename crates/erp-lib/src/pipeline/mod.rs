//! Stage orchestration: a session file goes through unroll, align,
//! condition and segment; a batch runs that over many files.

pub mod align;
pub mod condition;
pub mod segment;
pub mod unroll;

use crate::config::PipelineConfig;
use crate::dsp::ica::UnmixSummary;
use crate::error::Result;
use crate::io::session::{load_session, RawSession};
use crate::signal::AlignedSignal;
use log::{info, warn};
use segment::Segmentation;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// What loading, unrolling and aligning one session produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSummary {
    pub subject_id: String,
    pub trial_index: u64,
    pub readings: usize,
    pub events: usize,
    pub rows: usize,
    pub gaps: usize,
    pub empty: usize,
    pub truncated: usize,
    pub ignored_readings: usize,
    /// Batch indices skipped for a missing channel, as messages
    pub malformed: Vec<String>,
    pub collisions: usize,
}

/// Unroll and align a loaded session.
pub fn prepare_session(
    session: &RawSession,
    cfg: &PipelineConfig,
) -> Result<(AlignedSignal, SessionSummary)> {
    cfg.validate()?;
    let unrolled = unroll::unroll(&session.eeg, cfg.sampling_rate, cfg.timestamp_anchor)?;
    let report = unrolled.report;
    let aligned = align::align(unrolled.signal, &session.events)?;
    let summary = SessionSummary {
        subject_id: session.subject_id.clone(),
        trial_index: session.trial_index,
        readings: session.eeg.len(),
        events: session.events.len(),
        rows: aligned.signal.len(),
        gaps: report.gaps,
        empty: report.empty,
        truncated: report.truncated,
        ignored_readings: report.ignored_readings,
        malformed: report.malformed.iter().map(ToString::to_string).collect(),
        collisions: aligned.collisions,
    };
    Ok((aligned.signal, summary))
}

/// Full pipeline for one session already in memory.
pub fn run_session(
    session: &RawSession,
    cfg: &PipelineConfig,
) -> Result<(SessionSummary, UnmixSummary, Segmentation)> {
    let (aligned, summary) = prepare_session(session, cfg)?;
    let conditioned = condition::condition(aligned, cfg)?;
    let segmentation = segment::segment(&conditioned.signal, cfg);
    Ok((summary, conditioned.unmix, segmentation))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<SessionSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub sessions: Vec<SessionReport>,
    /// One entry per conditioning run: per session, or a single one when pooled
    pub unmix: Vec<UnmixSummary>,
    pub segmentation: Segmentation,
    /// Sampling rate and active probes of the conditioned output
    pub fs: f64,
    pub channel_names: [&'static str; 2],
}

/// Serializable digest of a batch run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub sessions: Vec<SessionReport>,
    pub unmix: Vec<UnmixSummary>,
    pub epochs_a: usize,
    pub epochs_b: usize,
    pub rejected_amplitude: usize,
    pub rejected_gradient: usize,
    pub abandoned: usize,
    pub errors: Vec<String>,
}

impl BatchOutcome {
    pub fn report(&self) -> BatchReport {
        let seg = &self.segmentation;
        BatchReport {
            sessions: self.sessions.clone(),
            unmix: self.unmix.clone(),
            epochs_a: seg.a.len(),
            epochs_b: seg.b.len(),
            rejected_amplitude: seg.rejected.amplitude,
            rejected_gradient: seg.rejected.gradient,
            abandoned: seg.abandoned,
            errors: seg.errors.iter().map(ToString::to_string).collect(),
        }
    }
}

fn failed(path: &Path, summary: Option<SessionSummary>, err: impl ToString) -> SessionReport {
    let error = err.to_string();
    warn!("skipping {}: {error}", path.display());
    SessionReport {
        path: path.to_path_buf(),
        summary,
        error: Some(error),
    }
}

/// Run every session file through the pipeline.
///
/// Sessions that fail to load or process are reported and skipped. With
/// `pool_sessions` the aligned sessions are concatenated in input order and
/// conditioned as one recording.
pub fn run_batch(paths: &[PathBuf], cfg: &PipelineConfig) -> Result<BatchOutcome> {
    cfg.validate()?;
    let channel_names = cfg.reference.active.map(|c| crate::signal::CHANNEL_NAMES[c]);
    let mut outcome = BatchOutcome {
        fs: cfg.sampling_rate,
        channel_names,
        ..Default::default()
    };
    let mut pooled = Vec::new();
    let mut pooled_reports = Vec::new();
    for path in paths {
        let prepared = load_session(path).and_then(|session| prepare_session(&session, cfg));
        let (aligned, summary) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                outcome.sessions.push(failed(path, None, err));
                continue;
            }
        };
        if cfg.pool_sessions {
            pooled.push(aligned);
            pooled_reports.push(outcome.sessions.len());
            outcome.sessions.push(SessionReport {
                path: path.clone(),
                summary: Some(summary),
                error: None,
            });
            continue;
        }
        match condition::condition(aligned, cfg) {
            Ok(conditioned) => {
                outcome
                    .segmentation
                    .merge(segment::segment(&conditioned.signal, cfg));
                outcome.unmix.push(conditioned.unmix);
                outcome.sessions.push(SessionReport {
                    path: path.clone(),
                    summary: Some(summary),
                    error: None,
                });
            }
            Err(err) => outcome.sessions.push(failed(path, Some(summary), err)),
        }
    }
    if let Some(signal) = AlignedSignal::concat(pooled) {
        info!("conditioning {} pooled row(s)", signal.len());
        match condition::condition(signal, cfg) {
            Ok(conditioned) => {
                outcome.segmentation = segment::segment(&conditioned.signal, cfg);
                outcome.unmix.push(conditioned.unmix);
            }
            Err(err) => {
                let error = format!("pooled conditioning failed: {err}");
                warn!("{error}");
                for &i in &pooled_reports {
                    outcome.sessions[i].error = Some(error.clone());
                }
            }
        }
    }
    info!(
        "batch of {} session(s): {} A / {} B epoch(s)",
        paths.len(),
        outcome.segmentation.a.len(),
        outcome.segmentation.b.len()
    );
    Ok(outcome)
}
