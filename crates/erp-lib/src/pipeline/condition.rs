use crate::config::{PipelineConfig, ReferenceConfig};
use crate::dsp::filters::{butter_bandpass, iir_notch, Sos};
use crate::dsp::ica::{unmix, UnmixSummary};
use crate::error::Result;
use crate::signal::{AlignedSignal, ConditionedSignal, N_CHANNELS};

#[derive(Debug)]
pub struct Conditioned {
    pub signal: ConditionedSignal,
    pub unmix: UnmixSummary,
}

/// Notch and bandpass filters built from the configuration.
pub struct FilterBank {
    notch: Sos,
    bandpass: Sos,
}

impl FilterBank {
    pub fn new(cfg: &PipelineConfig) -> Self {
        Self {
            notch: iir_notch(cfg.notch.freq_hz, cfg.notch.quality, cfg.sampling_rate),
            bandpass: butter_bandpass(
                cfg.bandpass.order,
                cfg.bandpass.low_hz,
                cfg.bandpass.high_hz,
                cfg.sampling_rate,
            ),
        }
    }

    /// Zero-phase notch, then zero-phase bandpass.
    pub fn apply(&self, channel: &[f64]) -> Vec<f64> {
        self.bandpass.filtfilt(&self.notch.filtfilt(channel))
    }
}

/// Subtract the mean of the two reference probes from each active probe.
pub fn rereference(channels: &[Vec<f64>; N_CHANNELS], reference: &ReferenceConfig) -> [Vec<f64>; 2] {
    let [r0, r1] = reference.channels;
    std::array::from_fn(|k| {
        channels[reference.active[k]]
            .iter()
            .zip(&channels[r0])
            .zip(&channels[r1])
            .map(|((active, a), b)| active - (a + b) / 2.0)
            .collect()
    })
}

/// Filter every probe, re-reference, and pass the active pair through the
/// unmixing stage. Reference columns do not survive this stage.
pub fn condition(signal: AlignedSignal, cfg: &PipelineConfig) -> Result<Conditioned> {
    cfg.validate()?;
    let bank = FilterBank::new(cfg);
    let filtered: [Vec<f64>; N_CHANNELS] = std::array::from_fn(|c| bank.apply(&signal.channels[c]));
    let active = rereference(&filtered, &cfg.reference);
    let (channels, unmix) = unmix([&active[0], &active[1]], &cfg.ica)?;
    Ok(Conditioned {
        signal: ConditionedSignal {
            fs: signal.fs,
            active: cfg.reference.active,
            channels,
            events: signal.events,
        },
        unmix,
    })
}
