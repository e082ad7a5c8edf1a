use crate::error::{PipelineError, Result};
use crate::signal::{Condition, N_CHANNELS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Which sample of a batch carries the batch timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimestampAnchor {
    /// Sample `n-1` is stamped with the batch timestamp itself.
    LastSample,
    /// Every sample sits one period earlier, so sample `n-1` is `T - 1000/fs`.
    AfterLastSample,
}

/// Notch filter against line-frequency interference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotchConfig {
    pub freq_hz: f64,
    /// Quality factor (center frequency / -3 dB bandwidth)
    pub quality: f64,
}

impl Default for NotchConfig {
    fn default() -> Self {
        Self {
            freq_hz: 60.0,
            quality: 30.0,
        }
    }
}

/// Butterworth bandpass applied after the notch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandpassConfig {
    pub order: usize,
    pub low_hz: f64,
    pub high_hz: f64,
}

impl Default for BandpassConfig {
    fn default() -> Self {
        Self {
            order: 4,
            low_hz: 0.1,
            high_hz: 30.0,
        }
    }
}

/// Probe roles for re-referencing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    /// Probes averaged into the reference (mastoids)
    pub channels: [usize; 2],
    /// Probes kept as active channels
    pub active: [usize; 2],
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            channels: [0, 3],
            active: [1, 2],
        }
    }
}

/// What the unmixing stage does with the estimated components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactPolicy {
    /// Reconstruct through the full mixing matrix.
    Reconstruct,
    /// Zero the component with the highest excess kurtosis first.
    DropMostKurtotic,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcaConfig {
    pub seed: u64,
    pub max_iter: usize,
    pub tol: f64,
    pub artifact_policy: ArtifactPolicy,
}

impl Default for IcaConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            max_iter: 200,
            tol: 1e-4,
            artifact_policy: ArtifactPolicy::Reconstruct,
        }
    }
}

/// Epoch slicing, baseline and rejection thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Leading rows averaged for baseline correction
    pub baseline_rows: usize,
    /// Absolute amplitude above which an epoch is rejected (µV)
    pub amplitude_limit: f64,
    /// Absolute sample gradient above which an epoch is rejected
    pub gradient_limit: f64,
    /// Rows kept per epoch
    pub epoch_rows: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            baseline_rows: 31,
            amplitude_limit: 100.0,
            gradient_limit: 10.0,
            epoch_rows: 291,
        }
    }
}

/// Full configuration of the session-to-epochs pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Nominal device sampling rate in Hz
    pub sampling_rate: f64,
    pub timestamp_anchor: TimestampAnchor,
    pub notch: NotchConfig,
    pub bandpass: BandpassConfig,
    pub reference: ReferenceConfig,
    pub ica: IcaConfig,
    pub segment: SegmentConfig,
    /// Trial-end label suffix to condition
    pub conditions: BTreeMap<String, Condition>,
    /// Condition all sessions of a batch as one concatenated recording
    pub pool_sessions: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut conditions = BTreeMap::new();
        conditions.insert("A.png_trial_ended".to_string(), Condition::A);
        conditions.insert("B.png_trial_ended".to_string(), Condition::B);
        Self {
            sampling_rate: 256.0,
            timestamp_anchor: TimestampAnchor::LastSample,
            notch: NotchConfig::default(),
            bandpass: BandpassConfig::default(),
            reference: ReferenceConfig::default(),
            ica: IcaConfig::default(),
            segment: SegmentConfig::default(),
            conditions,
            pool_sessions: false,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: PipelineConfig =
            toml::from_str(text).map_err(|err| PipelineError::Config(err.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| PipelineError::io(path, err))?;
        Self::from_toml_str(&text)
    }

    /// Map a trial-end label to its condition.
    ///
    /// An exact key match wins; otherwise the longest key the label ends with.
    pub fn condition_for(&self, label: &str) -> Option<Condition> {
        if let Some(condition) = self.conditions.get(label) {
            return Some(*condition);
        }
        self.conditions
            .iter()
            .filter(|(suffix, _)| label.ends_with(suffix.as_str()))
            .max_by_key(|(suffix, _)| suffix.len())
            .map(|(_, condition)| *condition)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(PipelineError::Config(msg));
        if !(self.sampling_rate > 0.0) {
            return fail(format!("sampling_rate must be positive, got {}", self.sampling_rate));
        }
        let nyquist = self.sampling_rate / 2.0;
        if !(self.notch.freq_hz > 0.0 && self.notch.freq_hz < nyquist) {
            return fail(format!(
                "notch frequency {} Hz must lie in (0, {nyquist})",
                self.notch.freq_hz
            ));
        }
        if !(self.notch.quality > 0.0) {
            return fail("notch quality must be positive".into());
        }
        let bp = &self.bandpass;
        if bp.order == 0 {
            return fail("bandpass order must be at least 1".into());
        }
        if !(bp.low_hz > 0.0 && bp.low_hz < bp.high_hz && bp.high_hz < nyquist) {
            return fail(format!(
                "bandpass {}..{} Hz must satisfy 0 < low < high < {nyquist}",
                bp.low_hz, bp.high_hz
            ));
        }
        let mut probes = self.reference.channels.to_vec();
        probes.extend_from_slice(&self.reference.active);
        if probes.iter().any(|&p| p >= N_CHANNELS) {
            return fail(format!("probe indices must be below {N_CHANNELS}: {probes:?}"));
        }
        probes.sort_unstable();
        probes.dedup();
        if probes.len() != 4 {
            return fail("reference and active probes must be distinct".into());
        }
        if self.segment.epoch_rows == 0 {
            return fail("epoch_rows must be non-zero".into());
        }
        if self.segment.baseline_rows == 0 || self.segment.baseline_rows > self.segment.epoch_rows
        {
            return fail(format!(
                "baseline_rows must be in 1..={}",
                self.segment.epoch_rows
            ));
        }
        if self.ica.max_iter == 0 || !(self.ica.tol > 0.0) {
            return fail("ica max_iter and tol must be positive".into());
        }
        Ok(())
    }
}
