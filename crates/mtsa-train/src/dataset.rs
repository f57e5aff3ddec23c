//! Input preparation for both detectors.
//!
//! Raw input is a slice of series, each an `Array2<f32>` shaped
//! `(time, channels)`. This module turns that into what the models consume:
//!
//! - [`GanfWindows`]: per-series global standardisation followed by sliding
//!   windows shaped `(n_windows, channels, window, 1)`.
//! - [`prepare_signal`]: optional mono down-mix and truncation used by
//!   RANSynCoders before scaling.
//! - [`batch_ranges`]: sequential mini-batches (no shuffling; both training
//!   loops walk each series in time order).
//! - [`SyntheticSeries`]: deterministic periodic series with square-wave
//!   anomalies, for smoke runs and tests.
//!
//! # Example
//!
//! ```rust
//! use mtsa_train::dataset::{GanfWindows, SyntheticConfig, SyntheticSeries};
//!
//! let data = SyntheticSeries::generate(&SyntheticConfig::default());
//! let windows = GanfWindows::build(&data.series, 12, 10).unwrap();
//! assert_eq!(windows.n_channels(), 4);
//! assert_eq!(windows.series(0).dim(), (99, 4, 12, 1));
//! ```

use ndarray::{Array2, Array4, ArrayD, Axis, Ix1, Ix2};
use std::f64::consts::PI;
use std::ops::Range;
use std::path::Path;
use tracing::debug;

use mtsa_signal::{sliding_windows, standardize};

use crate::error::{DatasetError, TrainResult};

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check that `series` is non-empty, every series has samples and all share
/// one channel count. Returns that channel count.
pub fn check_series(series: &[Array2<f32>]) -> Result<usize, DatasetError> {
    let first = series.first().ok_or(DatasetError::Empty)?;
    let channels = first.ncols();
    for (index, s) in series.iter().enumerate() {
        if s.nrows() == 0 || s.ncols() == 0 {
            return Err(DatasetError::EmptySeries { index });
        }
        if s.ncols() != channels {
            return Err(DatasetError::channel_mismatch(channels, s.ncols()));
        }
    }
    Ok(channels)
}

// ---------------------------------------------------------------------------
// GANF windows
// ---------------------------------------------------------------------------

/// Standardised, windowed view of a list of series.
#[derive(Debug, Clone)]
pub struct GanfWindows {
    windows: Vec<Array4<f32>>,
    n_channels: usize,
}

impl GanfWindows {
    /// Standardise each series on its own global mean / std, then cut windows
    /// of `window` steps every `stride` steps.
    pub fn build(series: &[Array2<f32>], window: usize, stride: usize) -> TrainResult<Self> {
        let n_channels = check_series(series)?;
        let mut windows = Vec::with_capacity(series.len());
        for (index, s) in series.iter().enumerate() {
            if s.nrows() < window {
                return Err(DatasetError::SeriesTooShort {
                    index,
                    len: s.nrows(),
                    needed: window,
                }
                .into());
            }
            let w = sliding_windows(&standardize(s), window, stride)?;
            debug!(series = index, windows = w.len_of(Axis(0)), "series windowed");
            windows.push(w);
        }
        Ok(GanfWindows { windows, n_channels })
    }

    /// Number of series.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// True when no series were windowed.
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Channel (sensor) count shared by all series.
    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    /// Windows of series `idx`, `(n_windows, channels, window, 1)`.
    pub fn series(&self, idx: usize) -> &Array4<f32> {
        &self.windows[idx]
    }

    /// Iterate over the per-series window tensors.
    pub fn iter(&self) -> impl Iterator<Item = &Array4<f32>> {
        self.windows.iter()
    }
}

// ---------------------------------------------------------------------------
// RANSynCoders input
// ---------------------------------------------------------------------------

/// Down-mix to one channel when `mono` is set, then keep at most `max_len`
/// samples.
pub fn prepare_signal(series: &Array2<f32>, mono: bool, max_len: usize) -> Array2<f32> {
    let len = series.nrows().min(max_len);
    let head = series.slice(ndarray::s![..len, ..]);
    if mono && head.ncols() > 1 {
        head.mean_axis(Axis(1))
            .map(|m| m.insert_axis(Axis(1)))
            .unwrap_or_else(|| Array2::zeros((len, 1)))
    } else {
        head.to_owned()
    }
}

/// Sequential batch index ranges covering `0..n`; the last batch may be short.
pub fn batch_ranges(n: usize, batch_size: usize) -> impl Iterator<Item = Range<usize>> {
    let step = batch_size.max(1);
    (0..n).step_by(step).map(move |start| start..(start + step).min(n))
}

// ---------------------------------------------------------------------------
// .npy loading
// ---------------------------------------------------------------------------

/// Load one series from a `.npy` file.
///
/// Accepts `float32` or `float64`, 1-D (one channel) or 2-D
/// `(time, channels)` arrays.
pub fn load_npy_series(path: &Path) -> Result<Array2<f32>, DatasetError> {
    use ndarray_npy::ReadNpyExt;

    let open = || {
        std::fs::File::open(path)
            .map_err(|e| DatasetError::npy_read(path, format!("cannot open: {e}")))
    };
    let arr: ArrayD<f32> = match ArrayD::<f32>::read_npy(open()?) {
        Ok(a) => a,
        Err(_) => ArrayD::<f64>::read_npy(open()?)
            .map_err(|e| DatasetError::npy_read(path, e.to_string()))?
            .mapv(|v| v as f32),
    };

    match arr.ndim() {
        1 => {
            let a = arr
                .into_dimensionality::<Ix1>()
                .map_err(|e| DatasetError::npy_read(path, e.to_string()))?;
            Ok(a.insert_axis(Axis(1)))
        }
        2 => arr
            .into_dimensionality::<Ix2>()
            .map_err(|e| DatasetError::npy_read(path, e.to_string())),
        n => Err(DatasetError::npy_read(
            path,
            format!("expected a 1-D or 2-D array, got {n} dimensions"),
        )),
    }
}

// ---------------------------------------------------------------------------
// SyntheticSeries
// ---------------------------------------------------------------------------

/// Configuration for [`SyntheticSeries`].
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Number of series. Default: **40**.
    pub n_series: usize,
    /// Samples per series. Default: **1000**.
    pub n_samples: usize,
    /// Channels per series. Default: **4**.
    pub n_channels: usize,
    /// Full periods of the base oscillation per series. Default: **8**.
    pub cycles: f64,
    /// Fraction of series that carry an anomaly. Default: **0.05**.
    pub anomaly_fraction: f64,
    /// Fraction of an anomalous series replaced by a square wave.
    /// Default: **0.5**.
    pub anomaly_span: f64,
    /// Square-wave amplitude, relative to the unit sine. Default: **3.0**.
    pub anomaly_amplitude: f32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        SyntheticConfig {
            n_series: 40,
            n_samples: 1000,
            n_channels: 4,
            cycles: 8.0,
            anomaly_fraction: 0.05,
            anomaly_span: 0.5,
            anomaly_amplitude: 3.0,
        }
    }
}

/// Deterministic multi-channel periodic series with labelled anomalies.
///
/// Channel `k` of series `s` at step `i` is
///
/// ```text
/// x = sin(2π·cycles·i/n + 0.4·k + 0.05·s) + 0.05·sin(i·12.9898 + k·78.233)
/// ```
///
/// Anomalous series are spread evenly through the list; in each, a centred
/// block of `anomaly_span·n` steps becomes a square wave of period 20 with
/// amplitude `anomaly_amplitude` on every channel.
#[derive(Debug, Clone)]
pub struct SyntheticSeries {
    /// `(n_samples, n_channels)` series.
    pub series: Vec<Array2<f32>>,
    /// `true` for series that carry an anomaly.
    pub labels: Vec<bool>,
}

impl SyntheticSeries {
    /// Generate the series described by `cfg`.
    pub fn generate(cfg: &SyntheticConfig) -> Self {
        let n_anomalous = (cfg.n_series as f64 * cfg.anomaly_fraction).round() as usize;
        let mut labels = vec![false; cfg.n_series];
        if n_anomalous > 0 {
            let spacing = (cfg.n_series / n_anomalous).max(1);
            for j in 1..=n_anomalous.min(cfg.n_series) {
                labels[(j * spacing).min(cfg.n_series) - 1] = true;
            }
        }

        let span = (cfg.n_samples as f64 * cfg.anomaly_span) as usize;
        let start = (cfg.n_samples - span.min(cfg.n_samples)) / 2;

        let series = labels
            .iter()
            .enumerate()
            .map(|(s, &anomalous)| {
                Array2::from_shape_fn((cfg.n_samples, cfg.n_channels), |(i, k)| {
                    if anomalous && (start..start + span).contains(&i) {
                        let high = (i / 10) % 2 == 0;
                        return if high { cfg.anomaly_amplitude } else { -cfg.anomaly_amplitude };
                    }
                    let phase = 2.0 * PI * cfg.cycles * i as f64 / cfg.n_samples as f64;
                    let base = (phase + 0.4 * k as f64 + 0.05 * s as f64).sin();
                    let jitter = 0.05 * (i as f64 * 12.9898 + k as f64 * 78.233).sin();
                    (base + jitter) as f32
                })
            })
            .collect();

        SyntheticSeries { series, labels }
    }

    /// Series without anomalies, for fitting.
    pub fn normal(&self) -> Vec<Array2<f32>> {
        self.series
            .iter()
            .zip(&self.labels)
            .filter_map(|(s, &l)| (!l).then(|| s.clone()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;
    use tempfile::tempdir;

    #[test]
    fn check_series_rejects_mixed_channels() {
        let a = Array2::<f32>::zeros((10, 3));
        let b = Array2::<f32>::zeros((10, 2));
        assert!(matches!(
            check_series(&[a, b]),
            Err(DatasetError::ChannelMismatch { expected: 3, found: 2 })
        ));
        assert!(matches!(check_series(&[]), Err(DatasetError::Empty)));
    }

    #[test]
    fn ganf_windows_standardise_each_series() {
        let s = Array2::from_shape_fn((30, 2), |(t, k)| (t + 100 * k) as f32);
        let w = GanfWindows::build(&[s], 12, 10).unwrap();
        assert_eq!(w.series(0).dim(), (2, 2, 12, 1));
        let mean: f32 = w.series(0).iter().sum::<f32>() / w.series(0).len() as f32;
        assert!(mean.abs() < 1.0, "windows should be roughly centred, got {mean}");
    }

    #[test]
    fn ganf_windows_reject_short_series() {
        let s = Array2::<f32>::zeros((5, 2));
        assert!(GanfWindows::build(&[s], 12, 10).is_err());
    }

    #[test]
    fn prepare_signal_downmixes_and_truncates() {
        let s = Array2::from_shape_fn((10, 2), |(t, k)| (t * 2 + k) as f32);
        let mono = prepare_signal(&s, true, 4);
        assert_eq!(mono.dim(), (4, 1));
        assert_eq!(mono[[3, 0]], 6.5);

        let multi = prepare_signal(&s, false, 100);
        assert_eq!(multi.dim(), (10, 2));
    }

    #[test]
    fn batch_ranges_cover_everything() {
        let ranges: Vec<_> = batch_ranges(7, 3).collect();
        assert_eq!(ranges, vec![0..3, 3..6, 6..7]);
        assert_eq!(batch_ranges(0, 3).count(), 0);
    }

    #[test]
    fn synthetic_labels_match_fraction() {
        let data = SyntheticSeries::generate(&SyntheticConfig::default());
        assert_eq!(data.series.len(), 40);
        assert_eq!(data.labels.iter().filter(|&&l| l).count(), 2);
        assert_eq!(data.normal().len(), 38);
        assert_eq!(data.series[0].dim(), (1000, 4));
    }

    #[test]
    fn npy_round_trip_1d_and_2d() {
        use ndarray_npy::WriteNpyExt;
        let tmp = tempdir().unwrap();

        let p1 = tmp.path().join("one.npy");
        let a1 = Array1::from(vec![1.0_f64, 2.0, 3.0]);
        a1.write_npy(std::fs::File::create(&p1).unwrap()).unwrap();
        assert_eq!(load_npy_series(&p1).unwrap().dim(), (3, 1));

        let p2 = tmp.path().join("two.npy");
        let a2 = Array2::<f32>::ones((5, 4));
        a2.write_npy(std::fs::File::create(&p2).unwrap()).unwrap();
        assert_eq!(load_npy_series(&p2).unwrap(), a2);
    }
}
