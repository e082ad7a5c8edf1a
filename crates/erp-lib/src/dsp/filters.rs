//! IIR filter design and zero-phase (forward-backward) filtering.
//!
//! Filters are cascades of second-order sections in transposed direct
//! form II. A 0.1 Hz edge at 256 Hz puts poles very close to z = 1.

use num_complex::Complex64;
use std::f64::consts::PI;

/// Second-order section normalised so that `a0 == 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    /// Numerator `b0, b1, b2`
    pub b: [f64; 3],
    /// Denominator `a1, a2`
    pub a: [f64; 2],
}

impl Biquad {
    /// State that makes the section's response to a unit step start at steady state.
    fn step_state(&self) -> [f64; 2] {
        let [b0, b1, b2] = self.b;
        let [a1, a2] = self.a;
        let r0 = b1 - a1 * b0;
        let r1 = b2 - a2 * b0;
        let det = 1.0 + a1 + a2;
        [(r0 + r1) / det, ((1.0 + a1) * r1 - a2 * r0) / det]
    }

    fn dc_gain(&self) -> f64 {
        self.b.iter().sum::<f64>() / (1.0 + self.a[0] + self.a[1])
    }

    fn run(&self, data: &mut [f64], state: [f64; 2]) {
        let [b0, b1, b2] = self.b;
        let [a1, a2] = self.a;
        let [mut z0, mut z1] = state;
        for x in data.iter_mut() {
            let input = *x;
            let y = b0 * input + z0;
            z0 = b1 * input - a1 * y + z1;
            z1 = b2 * input - a2 * y;
            *x = y;
        }
    }
}

/// Cascade of second-order sections.
#[derive(Debug, Clone, PartialEq)]
pub struct Sos {
    sections: Vec<Biquad>,
}

impl Sos {
    pub fn new(sections: Vec<Biquad>) -> Self {
        Self { sections }
    }

    #[cfg(test)]
    pub(crate) fn sections(&self) -> &[Biquad] {
        &self.sections
    }

    /// Chain two cascades; `self` runs first.
    pub fn then(mut self, other: Sos) -> Sos {
        self.sections.extend(other.sections);
        self
    }

    /// Causal filtering from rest.
    #[cfg(test)]
    pub(crate) fn filter(&self, data: &[f64]) -> Vec<f64> {
        let mut out = data.to_vec();
        for section in &self.sections {
            section.run(&mut out, [0.0; 2]);
        }
        out
    }

    fn filter_from(&self, data: &mut [f64], start: f64) {
        let mut scale = 1.0;
        for section in &self.sections {
            let zi = section.step_state();
            section.run(data, [zi[0] * scale * start, zi[1] * scale * start]);
            scale *= section.dc_gain();
        }
    }

    /// Edge padding used by `filtfilt`: three times the number of filter taps.
    pub fn pad_len(&self) -> usize {
        let n = self.sections.len();
        let trailing_b = self.sections.iter().filter(|s| s.b[2] == 0.0).count();
        let trailing_a = self.sections.iter().filter(|s| s.a[1] == 0.0).count();
        3 * (2 * n + 1 - trailing_b.min(trailing_a))
    }

    /// Zero-phase filtering: forward pass, then backward pass over the result.
    ///
    /// The signal is extended at both ends by odd reflection and each pass
    /// starts from the steady state of its first sample, which keeps edge
    /// transients out of the returned samples.
    pub fn filtfilt(&self, data: &[f64]) -> Vec<f64> {
        let n = data.len();
        if n < 2 || self.sections.is_empty() {
            return data.to_vec();
        }
        let pad = self.pad_len().min(n - 1);
        let first = data[0];
        let last = data[n - 1];
        let mut ext = Vec::with_capacity(n + 2 * pad);
        ext.extend((1..=pad).rev().map(|i| 2.0 * first - data[i]));
        ext.extend_from_slice(data);
        ext.extend((1..=pad).map(|i| 2.0 * last - data[n - 1 - i]));

        let start = ext[0];
        self.filter_from(&mut ext, start);
        ext.reverse();
        let start = ext[0];
        self.filter_from(&mut ext, start);
        ext.reverse();
        ext[pad..pad + n].to_vec()
    }

    /// Magnitude of the frequency response at `freq_hz`.
    #[cfg(test)]
    pub(crate) fn magnitude(&self, freq_hz: f64, fs: f64) -> f64 {
        let w = 2.0 * PI * freq_hz / fs;
        let z1 = Complex64::from_polar(1.0, -w);
        let z2 = z1 * z1;
        self.sections
            .iter()
            .map(|s| {
                let num = s.b[0] + z1 * s.b[1] + z2 * s.b[2];
                let den = 1.0 + z1 * s.a[0] + z2 * s.a[1];
                (num / den).norm()
            })
            .product()
    }
}

/// Second-order IIR notch at `freq_hz` with quality factor `quality`.
pub fn iir_notch(freq_hz: f64, quality: f64, fs: f64) -> Sos {
    let w0 = 2.0 * PI * freq_hz / fs;
    let bw = w0 / quality;
    // -3 dB bandwidth edges
    let beta = (bw / 2.0).tan();
    let gain = 1.0 / (1.0 + beta);
    let cos_w0 = w0.cos();
    Sos::new(vec![Biquad {
        b: [gain, -2.0 * gain * cos_w0, gain],
        a: [-2.0 * gain * cos_w0, 2.0 * gain - 1.0],
    }])
}

/// Digital Butterworth bandpass of the given prototype order.
///
/// Designed in the analog domain (lowpass prototype, lowpass-to-bandpass
/// transform on prewarped edges) and mapped with the bilinear transform.
/// The result has `order` sections and is -3 dB at both edges.
pub fn butter_bandpass(order: usize, low_hz: f64, high_hz: f64, fs: f64) -> Sos {
    let fs2 = 2.0 * fs;
    let warp = |f: f64| fs2 * (PI * f / fs).tan();
    let (wl, wh) = (warp(low_hz), warp(high_hz));
    let bw = wh - wl;
    let w0 = (wl * wh).sqrt();

    let mut analog = Vec::with_capacity(2 * order);
    for k in 0..order {
        let m = 2.0 * k as f64 - order as f64 + 1.0;
        let proto = -Complex64::from_polar(1.0, PI * m / (2.0 * order as f64));
        let scaled = proto * (bw / 2.0);
        let root = (scaled * scaled - w0 * w0).sqrt();
        analog.push(scaled + root);
        analog.push(scaled - root);
    }

    // analog zeros: `order` at s = 0
    let mut gain = Complex64::new((bw * fs2).powi(order as i32), 0.0);
    let mut digital = Vec::with_capacity(analog.len());
    for &p in &analog {
        gain /= fs2 - p;
        digital.push((fs2 + p) / (fs2 - p));
    }
    // zeros: `order` at z = 1 and `order` at z = -1, one of each per section
    let mut sections = pole_sections(&digital);
    if let Some(first) = sections.first_mut() {
        first.b = [gain.re, 0.0, -gain.re];
    }
    Sos::new(sections)
}

/// Group conjugate pole pairs (and leftover real poles) into sections with
/// numerator `1 - z^-2`.
fn pole_sections(poles: &[Complex64]) -> Vec<Biquad> {
    const REAL_TOL: f64 = 1e-10;
    let mut sections = Vec::new();
    let mut real = Vec::new();
    for p in poles {
        if p.im.abs() <= REAL_TOL * p.norm().max(1.0) {
            real.push(p.re);
        } else if p.im > 0.0 {
            sections.push(Biquad {
                b: [1.0, 0.0, -1.0],
                a: [-2.0 * p.re, p.norm_sqr()],
            });
        }
    }
    for pair in real.chunks(2) {
        let a = match pair {
            [p, q] => [-(p + q), p * q],
            [p] => [-p, 0.0],
            _ => unreachable!("chunks(2) yields one or two poles"),
        };
        sections.push(Biquad {
            b: [1.0, 0.0, -1.0],
            a,
        });
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    const FS: f64 = 256.0;

    fn cross_correlation_peak(a: &[f64], b: &[f64], max_lag: isize) -> isize {
        let n = a.len() as isize;
        (-max_lag..=max_lag)
            .map(|lag| {
                let mut acc = 0.0;
                for i in 0..n {
                    let j = i + lag;
                    if (0..n).contains(&j) {
                        acc += a[i as usize] * b[j as usize];
                    }
                }
                (lag, acc)
            })
            .max_by(|x, y| x.1.total_cmp(&y.1))
            .map(|(lag, _)| lag)
            .unwrap_or(0)
    }

    fn gaussian_burst(n: usize, freq_hz: f64) -> Vec<f64> {
        let center = n as f64 / 2.0;
        (0..n)
            .map(|i| {
                let t = i as f64 - center;
                (-(t * t) / (2.0 * 40.0 * 40.0)).exp() * (2.0 * PI * freq_hz * t / FS).cos()
            })
            .collect()
    }

    #[test]
    fn notch_removes_line_frequency() {
        let notch = iir_notch(60.0, 30.0, FS);
        assert!(notch.magnitude(60.0, FS) < 1e-9);
        assert!((notch.magnitude(10.0, FS) - 1.0).abs() < 1e-2);
        assert!((notch.magnitude(0.0, FS) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn bandpass_is_half_power_at_both_edges() {
        let bp = butter_bandpass(4, 0.1, 30.0, FS);
        assert_eq!(bp.sections().len(), 4);
        let half_power = std::f64::consts::FRAC_1_SQRT_2;
        assert!((bp.magnitude(30.0, FS) - half_power).abs() < 1e-3);
        assert!((bp.magnitude(0.1, FS) - half_power).abs() < 1e-3);
        assert!((bp.magnitude(8.0, FS) - 1.0).abs() < 1e-2);
        assert!(bp.magnitude(100.0, FS) < 1e-2);
        assert!(bp.magnitude(0.0, FS) < 1e-9);
    }

    #[test]
    fn odd_order_bandpass_has_order_sections() {
        let bp = butter_bandpass(3, 1.0, 40.0, FS);
        assert_eq!(bp.sections().len(), 3);
        assert!((bp.magnitude(10.0, FS) - 1.0).abs() < 1e-2);
    }

    #[test]
    fn filtfilt_does_not_shift_a_symmetric_burst() {
        let x = gaussian_burst(1024, 10.0);
        let chain = iir_notch(60.0, 30.0, FS).then(butter_bandpass(4, 0.1, 30.0, FS));
        let y = chain.filtfilt(&x);
        assert_eq!(y.len(), x.len());
        assert_eq!(cross_correlation_peak(&x, &y, 20), 0);
        // passband content survives
        let peak = y.iter().cloned().fold(f64::MIN, f64::max);
        assert!((peak - 1.0).abs() < 0.05, "peak {peak}");
    }

    #[test]
    fn causal_filter_delays_the_burst() {
        let x = gaussian_burst(1024, 10.0);
        let y = butter_bandpass(4, 0.1, 30.0, FS).filter(&x);
        assert!(cross_correlation_peak(&x, &y, 40) > 0);
    }

    #[test]
    fn constant_input_is_removed_without_edge_transient() {
        let x = vec![50.0; 600];
        let y = butter_bandpass(4, 0.1, 30.0, FS).filtfilt(&x);
        assert!(y.iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn notch_passes_constant_unchanged() {
        let x = vec![3.0; 100];
        let y = iir_notch(60.0, 30.0, FS).filtfilt(&x);
        assert!(y.iter().all(|v| (v - 3.0).abs() < 1e-9));
    }

    #[test]
    fn short_inputs_are_handled() {
        let chain = butter_bandpass(4, 0.1, 30.0, FS);
        assert!(chain.filtfilt(&[]).is_empty());
        assert_eq!(chain.filtfilt(&[1.5]), vec![1.5]);
        assert_eq!(chain.filtfilt(&[1.0, 2.0, 3.0]).len(), 3);
        assert_eq!(chain.pad_len(), 27);
    }
}
