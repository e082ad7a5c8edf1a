use crate::pipeline::segment::Segmentation;
use crate::signal::Condition;
use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};

/// Conventional EEG bands in Hz, `[low, high)`.
pub const FREQUENCY_BANDS: [(&str, f64, f64); 5] = [
    ("delta", 1.0, 4.0),
    ("theta", 4.0, 8.0),
    ("alpha", 7.5, 13.0),
    ("beta", 13.0, 30.0),
    ("gamma", 30.0, 44.0),
];

/// Absolute power per band (signal units squared).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BandPowers {
    pub delta: f64,
    pub theta: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl BandPowers {
    fn slot(&mut self, name: &str) -> Option<&mut f64> {
        match name {
            "delta" => Some(&mut self.delta),
            "theta" => Some(&mut self.theta),
            "alpha" => Some(&mut self.alpha),
            "beta" => Some(&mut self.beta),
            "gamma" => Some(&mut self.gamma),
            _ => None,
        }
    }
}

/// Integrate the one-sided periodogram of `data` over each band.
pub fn band_powers(data: &[f64], fs: f64) -> BandPowers {
    let n = data.len();
    let mut out = BandPowers::default();
    if n < 2 {
        return out;
    }
    let mut planner = RealFftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);
    let mut buffer = data.to_vec();
    let mut spectrum = fft.make_output_vec();
    if fft.process(&mut buffer, &mut spectrum).is_err() {
        return out;
    }
    let df = fs / n as f64;
    for (k, bin) in spectrum.iter().enumerate() {
        let freq = k as f64 * df;
        // DC and Nyquist bins have no mirrored half
        let one_sided = if k == 0 || (n % 2 == 0 && k == n / 2) { 1.0 } else { 2.0 };
        let power = one_sided * bin.norm_sqr() / (fs * n as f64) * df;
        for (name, low, high) in FREQUENCY_BANDS {
            if freq >= low && freq < high {
                if let Some(slot) = out.slot(name) {
                    *slot += power;
                }
            }
        }
    }
    out
}

/// Band powers of both channels of one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochBands {
    pub condition: Condition,
    pub start_row: usize,
    pub channels: [BandPowers; 2],
}

pub fn epoch_band_powers(segmentation: &Segmentation, fs: f64) -> Vec<EpochBands> {
    Condition::ALL
        .iter()
        .flat_map(|&c| segmentation.epochs(c))
        .map(|epoch| EpochBands {
            condition: epoch.condition,
            start_row: epoch.start_row,
            channels: [
                band_powers(&epoch.channels[0], fs),
                band_powers(&epoch.channels[1], fs),
            ],
        })
        .collect()
}
