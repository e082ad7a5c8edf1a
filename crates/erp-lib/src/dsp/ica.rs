//! Two-channel FastICA on top of `linfa-ica`, with least-squares
//! back-projection of the sources onto the channels.

use crate::config::{ArtifactPolicy, IcaConfig};
use crate::error::{PipelineError, Result};
use linfa::prelude::*;
use linfa_ica::fast_ica::FastIca;
use log::debug;
use ndarray::{Array2, Axis};
use serde::Serialize;

pub type Mat2 = [[f64; 2]; 2];

fn mean(x: &[f64]) -> f64 {
    x.iter().sum::<f64>() / x.len() as f64
}

/// Excess kurtosis (0 for a Gaussian).
pub fn excess_kurtosis(x: &[f64]) -> f64 {
    let mu = mean(x);
    let m2 = x.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / x.len() as f64;
    if m2 == 0.0 {
        return 0.0;
    }
    let m4 = x.iter().map(|v| (v - mu).powi(4)).sum::<f64>() / x.len() as f64;
    m4 / (m2 * m2) - 3.0
}

fn invert(m: &Mat2) -> Option<Mat2> {
    let det = m[0][0] * m[1][1] - m[0][1] * m[1][0];
    let scale = m.iter().flatten().fold(0.0f64, |acc, v| acc.max(v.abs()));
    if det.abs() <= f64::EPSILON * scale * scale {
        return None;
    }
    Some([
        [m[1][1] / det, -m[0][1] / det],
        [-m[1][0] / det, m[0][0] / det],
    ])
}

fn gram(a: &Array2<f64>, b: &Array2<f64>) -> Mat2 {
    let g = a.t().dot(b);
    [[g[[0, 0]], g[[0, 1]]], [g[[1, 0]], g[[1, 1]]]]
}

/// Reject channel pairs whose covariance is (numerically) rank one.
fn check_rank(centered: &Array2<f64>) -> Result<()> {
    let cov = gram(centered, centered);
    let half_trace = (cov[0][0] + cov[1][1]) / 2.0;
    let det = cov[0][0] * cov[1][1] - cov[0][1] * cov[1][0];
    let spread = (half_trace * half_trace - det).max(0.0).sqrt();
    let (small, large) = (half_trace - spread, half_trace + spread);
    if !(large > 0.0) || small <= large * 1e-12 {
        return Err(PipelineError::Ica(
            "channels are linearly dependent; cannot whiten".into(),
        ));
    }
    Ok(())
}

/// Sources of two channels and how each loads back onto them.
#[derive(Debug, Clone, PartialEq)]
pub struct Decomposition {
    pub mean: [f64; 2],
    pub sources: [Vec<f64>; 2],
    /// Row `k` holds the weights of source `k` on each channel
    pub loadings: Mat2,
}

impl Decomposition {
    /// Estimate sources with FastICA (logcosh contrast, seeded start) and fit
    /// the loadings by least squares of the centered channels on them.
    pub fn fit(x: [&[f64]; 2], cfg: &IcaConfig) -> Result<Self> {
        let n = x[0].len();
        if n < 2 || x[1].len() != n {
            return Err(PipelineError::Ica(format!(
                "need two equally long channels with at least 2 samples, got {} and {}",
                x[0].len(),
                x[1].len()
            )));
        }
        let data = Array2::from_shape_fn((n, 2), |(i, c)| x[c][i]);
        let mu = [mean(x[0]), mean(x[1])];
        let centered = Array2::from_shape_fn((n, 2), |(i, c)| x[c][i] - mu[c]);
        check_rank(&centered)?;

        let dataset = DatasetBase::from(data.clone());
        let model = FastIca::<f64>::params()
            .ncomponents(2)
            .max_iter(cfg.max_iter)
            .tol(cfg.tol)
            .random_state(cfg.seed as usize)
            .fit(&dataset)
            .map_err(|err| PipelineError::Ica(format!("FastICA failed: {err}")))?;
        let sources = model.predict(&data);
        debug!(
            "FastICA fitted {} sample(s), seed {}",
            sources.len_of(Axis(0)),
            cfg.seed
        );

        let loadings = invert(&gram(&sources, &sources))
            .map(|inv| {
                let cross = gram(&sources, &centered);
                std::array::from_fn(|k| {
                    std::array::from_fn(|c| inv[k][0] * cross[0][c] + inv[k][1] * cross[1][c])
                })
            })
            .ok_or_else(|| PipelineError::Ica("sources are linearly dependent".into()))?;
        Ok(Self {
            mean: mu,
            sources: std::array::from_fn(|k| sources.column(k).to_vec()),
            loadings,
        })
    }

    /// Centered channels rebuilt from the sources flagged in `keep`.
    pub fn rebuild(&self, keep: [bool; 2]) -> [Vec<f64>; 2] {
        let n = self.sources[0].len();
        std::array::from_fn(|c| {
            (0..n)
                .map(|i| {
                    (0..2)
                        .filter(|&k| keep[k])
                        .map(|k| self.sources[k][i] * self.loadings[k][c])
                        .sum::<f64>()
                })
                .collect()
        })
    }
}

/// Outcome of the artifact-removal stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmixSummary {
    pub loadings: Mat2,
    pub source_kurtosis: [f64; 2],
    /// Component zeroed before reconstruction, if any
    pub dropped: Option<usize>,
}

/// Decompose two channels and rebuild them from the kept sources.
pub fn unmix(x: [&[f64]; 2], cfg: &IcaConfig) -> Result<([Vec<f64>; 2], UnmixSummary)> {
    let decomposition = Decomposition::fit(x, cfg)?;
    let source_kurtosis = [
        excess_kurtosis(&decomposition.sources[0]),
        excess_kurtosis(&decomposition.sources[1]),
    ];
    let dropped = match cfg.artifact_policy {
        ArtifactPolicy::Reconstruct => None,
        ArtifactPolicy::DropMostKurtotic => {
            let k = if source_kurtosis[0] >= source_kurtosis[1] { 0 } else { 1 };
            debug!(
                "dropping component {k} (excess kurtosis {:.2})",
                source_kurtosis[k]
            );
            Some(k)
        }
    };
    let keep = [dropped != Some(0), dropped != Some(1)];
    Ok((
        decomposition.rebuild(keep),
        UnmixSummary {
            loadings: decomposition.loadings,
            source_kurtosis,
            dropped,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::f64::consts::PI;

    fn correlation(a: &[f64], b: &[f64]) -> f64 {
        let (ma, mb) = (mean(a), mean(b));
        let cov: f64 = a.iter().zip(b).map(|(x, y)| (x - ma) * (y - mb)).sum();
        let va: f64 = a.iter().map(|x| (x - ma).powi(2)).sum();
        let vb: f64 = b.iter().map(|y| (y - mb).powi(2)).sum();
        cov / (va * vb).sqrt()
    }

    fn sine(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * PI * 10.0 * i as f64 / 256.0).sin())
            .collect()
    }

    fn uniform_noise(n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }

    fn blinks(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let phase = (i % 250) as f64 - 125.0;
                20.0 * (-(phase * phase) / (2.0 * 5.0 * 5.0)).exp()
            })
            .collect()
    }

    fn mix(a: &[f64], b: &[f64], m: Mat2) -> [Vec<f64>; 2] {
        std::array::from_fn(|i| {
            a.iter()
                .zip(b)
                .map(|(x, y)| m[i][0] * x + m[i][1] * y)
                .collect()
        })
    }

    #[test]
    fn separates_independent_sources() {
        let n = 2000;
        let s0 = sine(n);
        let s1 = uniform_noise(n, 3);
        let x = mix(&s0, &s1, [[1.0, 0.6], [0.4, 1.0]]);
        let est = Decomposition::fit([&x[0], &x[1]], &IcaConfig::default()).unwrap();
        let best = |truth: &[f64]| {
            est.sources
                .iter()
                .map(|e| correlation(e, truth).abs())
                .fold(0.0, f64::max)
        };
        assert!(best(&s0) > 0.95, "sine recovered at {}", best(&s0));
        assert!(best(&s1) > 0.95, "noise recovered at {}", best(&s1));
    }

    #[test]
    fn full_reconstruction_returns_centered_input() {
        let n = 1000;
        let x = mix(&sine(n), &uniform_noise(n, 9), [[2.0, 0.5], [0.3, 1.0]]);
        let shifted = [
            x[0].iter().map(|v| v + 5.0).collect::<Vec<_>>(),
            x[1].iter().map(|v| v - 2.0).collect::<Vec<_>>(),
        ];
        let (rebuilt, summary) = unmix([&shifted[0], &shifted[1]], &IcaConfig::default()).unwrap();
        assert!(summary.dropped.is_none());
        for c in 0..2 {
            let mu = mean(&shifted[c]);
            for (r, s) in rebuilt[c].iter().zip(&shifted[c]) {
                assert!((r - (s - mu)).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn same_seed_gives_identical_decomposition() {
        let n = 800;
        let x = mix(&sine(n), &uniform_noise(n, 1), [[1.0, 0.2], [0.7, 1.0]]);
        let cfg = IcaConfig {
            seed: 11,
            ..IcaConfig::default()
        };
        let a = Decomposition::fit([&x[0], &x[1]], &cfg).unwrap();
        let b = Decomposition::fit([&x[0], &x[1]], &cfg).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn dropping_kurtotic_component_removes_blinks() {
        let n = 2000;
        let s = sine(n);
        let b = blinks(n);
        let x = mix(&s, &b, [[1.0, 1.0], [0.3, 0.9]]);
        let cfg = IcaConfig {
            artifact_policy: ArtifactPolicy::DropMostKurtotic,
            ..IcaConfig::default()
        };
        let (cleaned, summary) = unmix([&x[0], &x[1]], &cfg).unwrap();
        let dropped = summary.dropped.expect("a component is dropped");
        assert!(summary.source_kurtosis[dropped] > summary.source_kurtosis[1 - dropped]);
        let peak = |v: &[f64]| v.iter().fold(0.0f64, |m, x| m.max(x.abs()));
        assert!(peak(&x[0]) > 15.0);
        assert!(peak(&cleaned[0]) < 4.0, "residual peak {}", peak(&cleaned[0]));
        assert!(peak(&cleaned[1]) < 4.0, "residual peak {}", peak(&cleaned[1]));
    }

    #[test]
    fn identical_channels_cannot_be_whitened() {
        let s = sine(500);
        let err = Decomposition::fit([&s, &s], &IcaConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Ica(_)));
    }

    #[test]
    fn kurtosis_of_spiky_signal_exceeds_sine() {
        let n = 1000;
        assert!(excess_kurtosis(&blinks(n)) > 3.0);
        // a sine is sub-Gaussian
        assert!((excess_kurtosis(&sine(n)) + 1.5).abs() < 0.1);
        assert_eq!(excess_kurtosis(&[2.0; 10]), 0.0);
    }
}
