//! One-sided periodogram
//!
//! Power spectral density estimate of a real signal, computed with a single
//! FFT over the whole (optionally tapered) record. The frequency-estimation
//! stage of RANSynCoders ranks the bins of this estimate to pick the
//! oscillations worth synchronising.

use crate::{Result, SignalError};
use num_complex::Complex64;
use rustfft::FftPlanner;
use std::f64::consts::PI;

/// Taper applied to the record before the transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Taper {
    /// No taper
    Rectangular,
    /// Symmetric Hann taper
    #[default]
    Hann,
}

impl Taper {
    fn coefficients(self, n: usize) -> Vec<f64> {
        match self {
            Taper::Rectangular => vec![1.0; n],
            Taper::Hann if n == 1 => vec![1.0],
            Taper::Hann => {
                let denom = (n - 1) as f64;
                (0..n)
                    .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / denom).cos()))
                    .collect()
            }
        }
    }
}

/// Result of a periodogram.
#[derive(Debug, Clone)]
pub struct Periodogram {
    /// Power per bin, DC to Nyquist. Interior bins carry the folded
    /// negative-frequency power.
    pub psd: Vec<f64>,
    /// Bin centre frequencies in the unit of the sampling rate
    pub frequencies: Vec<f64>,
    /// Sampling rate the estimate was computed with
    pub sampling: f64,
}

impl Periodogram {
    /// Number of one-sided bins.
    pub fn len(&self) -> usize {
        self.psd.len()
    }

    /// True when no bins were produced.
    pub fn is_empty(&self) -> bool {
        self.psd.is_empty()
    }

    /// Bin with the largest power, if any.
    pub fn dominant_bin(&self) -> Option<usize> {
        self.psd
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_finite())
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(i, _)| i)
    }
}

/// Hann-tapered one-sided periodogram of `signal` sampled at `sampling`.
pub fn periodogram(signal: &[f64], sampling: f64) -> Result<Periodogram> {
    periodogram_with(signal, sampling, Taper::Hann)
}

/// One-sided periodogram with an explicit taper.
///
/// Power is `|X_k|² / N`; every bin except DC (and Nyquist for even `N`) is
/// doubled so the one-sided estimate carries the total power.
pub fn periodogram_with(signal: &[f64], sampling: f64, taper: Taper) -> Result<Periodogram> {
    if !(sampling.is_finite() && sampling > 0.0) {
        return Err(SignalError::InvalidSamplingRate(sampling));
    }
    let n = signal.len();
    if n < 2 {
        return Err(SignalError::SignalTooShort { needed: 2, len: n });
    }
    if let Some(index) = signal.iter().position(|v| !v.is_finite()) {
        return Err(SignalError::NonFinite { index });
    }

    let window = taper.coefficients(n);
    let mut buffer: Vec<Complex64> = signal
        .iter()
        .zip(window.iter())
        .map(|(&s, &w)| Complex64::new(s * w, 0.0))
        .collect();

    let mut planner = FftPlanner::new();
    planner.plan_fft_forward(n).process(&mut buffer);

    let n_bins = n / 2 + 1;
    let nyquist = if n % 2 == 0 { Some(n / 2) } else { None };
    let psd = (0..n_bins)
        .map(|k| {
            let p = buffer[k].norm_sqr() / n as f64;
            if k == 0 || Some(k) == nyquist {
                p
            } else {
                2.0 * p
            }
        })
        .collect();
    let frequencies = (0..n_bins).map(|k| k as f64 * sampling / n as f64).collect();

    Ok(Periodogram {
        psd,
        frequencies,
        sampling,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(n: usize, cycles: f64) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * PI * cycles * i as f64 / n as f64).sin())
            .collect()
    }

    #[test]
    fn bin_count_even_and_odd() {
        assert_eq!(periodogram(&tone(64, 3.0), 1.0).unwrap().len(), 33);
        assert_eq!(periodogram(&tone(63, 3.0), 1.0).unwrap().len(), 32);
    }

    #[test]
    fn frequencies_follow_sampling_rate() {
        let p = periodogram(&tone(100, 5.0), 200.0).unwrap();
        assert!((p.frequencies[1] - 2.0).abs() < 1e-12);
        assert!((p.frequencies[50] - 100.0).abs() < 1e-12);
    }

    #[test]
    fn dominant_bin_matches_tone() {
        let p = periodogram_with(&tone(256, 12.0), 1.0, Taper::Rectangular).unwrap();
        assert_eq!(p.dominant_bin(), Some(12));
        // Rectangular taper on an exact-bin tone: all power in one bin.
        let total: f64 = p.psd.iter().sum();
        assert!((p.psd[12] / total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            periodogram(&[1.0], 1.0),
            Err(SignalError::SignalTooShort { .. })
        ));
        assert!(matches!(
            periodogram(&[1.0, 2.0], 0.0),
            Err(SignalError::InvalidSamplingRate(_))
        ));
        assert!(matches!(
            periodogram(&[1.0, f64::NAN, 2.0], 1.0),
            Err(SignalError::NonFinite { index: 1 })
        ));
    }
}
