use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors raised while turning a recorded session into epochs.
///
/// Some variants are fatal for a whole session (`Io`, `Parse`, `EmptySignal`),
/// others only for one batch index or one epoch and are collected into the
/// stage reports instead of being returned.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse session {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("batch index {index} is missing channel(s) {missing:?} reported by other channels")]
    MalformedBatch { index: i64, missing: Vec<usize> },
    #[error("no condition mapping for trial-end label '{label}'")]
    UnknownCondition { label: String },
    #[error("trial end '{label}' at row {row} has no preceding fixation start")]
    DanglingTrialEnd { row: usize, label: String },
    #[error("epoch has {rows} rows, at least {required} are required")]
    ShortEpoch { rows: usize, required: usize },
    #[error("session contains no usable samples")]
    EmptySignal,
    #[error("unmixing failed: {0}")]
    Ica(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }
}
