use crate::error::{PipelineError, Result};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// One block of samples delivered by a single electrode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EegReading {
    pub index: i64,
    pub electrode: usize,
    /// Device timestamp of the block in milliseconds
    pub timestamp: f64,
    pub samples: Vec<f64>,
}

/// Marker injected by the stimulus software.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMarker {
    pub timestamp: f64,
    pub value: String,
}

/// On-disk layout written by the ingestion endpoint.
#[derive(Debug, Deserialize)]
struct SessionRecord {
    #[serde(rename = "_eeg")]
    eeg: Vec<EegReading>,
    #[serde(rename = "_events")]
    events: Vec<EventMarker>,
    #[serde(rename = "_trialData")]
    trial_data: Vec<Value>,
}

/// One recorded run, as read from disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSession {
    pub eeg: Vec<EegReading>,
    pub events: Vec<EventMarker>,
    pub subject_id: String,
    pub trial_index: u64,
}

/// Subject and trial index of a session record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMeta {
    pub subject_id: String,
    pub trial_index: u64,
}

fn session_meta(trial_data: &[Value]) -> std::result::Result<SessionMeta, String> {
    let first = trial_data.first().ok_or("`_trialData` is empty")?;
    let last = trial_data.last().ok_or("`_trialData` is empty")?;
    let subject_id = match first.get("subject_id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err("first `_trialData` row has no subject_id".into()),
    };
    let trial_index = last
        .get("trial_index")
        .and_then(Value::as_u64)
        .ok_or("last `_trialData` row has no numeric trial_index")?;
    Ok(SessionMeta {
        subject_id,
        trial_index,
    })
}

/// Parse a session record; `origin` only labels errors.
pub fn parse_session(text: &str, origin: &Path) -> Result<RawSession> {
    let record: SessionRecord =
        serde_json::from_str(text).map_err(|err| PipelineError::parse(origin, err.to_string()))?;
    let meta = session_meta(&record.trial_data).map_err(|msg| PipelineError::parse(origin, msg))?;
    Ok(RawSession {
        eeg: record.eeg,
        events: record.events,
        subject_id: meta.subject_id,
        trial_index: meta.trial_index,
    })
}

/// Read a stored session file into a `RawSession`.
pub fn load_session(path: &Path) -> Result<RawSession> {
    let text = fs::read_to_string(path).map_err(|err| PipelineError::io(path, err))?;
    let session = parse_session(&text, path)?;
    info!(
        "loaded {} (subject={}, trial={}, readings={}, events={})",
        path.display(),
        session.subject_id,
        session.trial_index,
        session.eeg.len(),
        session.events.len()
    );
    Ok(session)
}

/// All `*.json` session files of a directory, sorted by name.
pub fn list_session_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|err| PipelineError::io(dir, err))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|err| PipelineError::io(dir, err))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Receive time as the endpoint writes it: shortest round-trip digits, and
/// a trailing `.0` when the value is whole.
fn format_received_ms(received_ms: f64) -> String {
    if received_ms.is_finite() && received_ms.fract() == 0.0 {
        format!("{received_ms:.1}")
    } else {
        received_ms.to_string()
    }
}

/// File name the ingestion endpoint uses for a received body.
pub fn session_file_name(meta: &SessionMeta, received_ms: f64, suffix: Option<&str>) -> String {
    let received = format_received_ms(received_ms);
    match suffix {
        Some(suffix) => format!(
            "{}_{}_{}_{}.json",
            meta.subject_id, meta.trial_index, received, suffix
        ),
        None => format!("{}_{}_{}.json", meta.subject_id, meta.trial_index, received),
    }
}

/// Persist a posted session body verbatim under the endpoint's naming scheme.
///
/// The body must parse as a session record; nothing is written otherwise.
pub fn store_session(
    body: &[u8],
    out_dir: &Path,
    received_ms: f64,
    suffix: Option<&str>,
) -> Result<PathBuf> {
    let text = std::str::from_utf8(body)
        .map_err(|err| PipelineError::parse(out_dir, format!("body is not UTF-8: {err}")))?;
    let record: SessionRecord = serde_json::from_str(text)
        .map_err(|err| PipelineError::parse(out_dir, err.to_string()))?;
    let meta = session_meta(&record.trial_data).map_err(|msg| PipelineError::parse(out_dir, msg))?;
    fs::create_dir_all(out_dir).map_err(|err| PipelineError::io(out_dir, err))?;
    let path = out_dir.join(session_file_name(&meta, received_ms, suffix));
    fs::write(&path, body).map_err(|err| PipelineError::io(&path, err))?;
    info!("stored session body at {}", path.display());
    Ok(path)
}
