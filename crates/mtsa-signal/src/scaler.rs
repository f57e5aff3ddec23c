//! Scaling of channel-indexed series (time × channels).

use crate::{Result, SignalError};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

/// Ranges narrower than this are treated as constant channels.
const RANGE_EPS: f32 = 1e-12;

/// Per-channel min-max scaler mapping each fitted channel onto [0, 1].
///
/// Constant channels are shifted to zero and left unscaled. The fitted state
/// is serialisable so a trained model can carry it in its bundle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    min: Option<Vec<f32>>,
    scale: Option<Vec<f32>>,
}

impl MinMaxScaler {
    /// Unfitted scaler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `fit` has been called.
    pub fn is_fitted(&self) -> bool {
        self.min.is_some()
    }

    /// Number of channels seen at fit time.
    pub fn n_channels(&self) -> Option<usize> {
        self.min.as_ref().map(Vec::len)
    }

    /// Learn per-channel minimum and range. Replaces any previous fit.
    pub fn fit(&mut self, series: &Array2<f32>) -> Result<&mut Self> {
        if series.nrows() == 0 {
            return Err(SignalError::SignalTooShort { needed: 1, len: 0 });
        }
        if let Some(index) = series.iter().position(|v| !v.is_finite()) {
            return Err(SignalError::NonFinite { index });
        }

        let mut min = Vec::with_capacity(series.ncols());
        let mut scale = Vec::with_capacity(series.ncols());
        for column in series.axis_iter(Axis(1)) {
            let lo = column.iter().copied().fold(f32::INFINITY, f32::min);
            let hi = column.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let range = hi - lo;
            min.push(lo);
            scale.push(if range > RANGE_EPS { 1.0 / range } else { 1.0 });
        }
        self.min = Some(min);
        self.scale = Some(scale);
        Ok(self)
    }

    /// Apply the fitted scaling. Values outside the fitted range map outside
    /// [0, 1].
    pub fn transform(&self, series: &Array2<f32>) -> Result<Array2<f32>> {
        let (min, scale) = match (&self.min, &self.scale) {
            (Some(m), Some(s)) => (m, s),
            _ => return Err(SignalError::NotFitted("MinMaxScaler")),
        };
        if series.ncols() != min.len() {
            return Err(SignalError::ChannelMismatch {
                expected: min.len(),
                found: series.ncols(),
            });
        }

        let mut out = series.clone();
        for (c, mut column) in out.axis_iter_mut(Axis(1)).enumerate() {
            column.mapv_inplace(|v| (v - min[c]) * scale[c]);
        }
        Ok(out)
    }

    /// `fit` followed by `transform` on the same series.
    pub fn fit_transform(&mut self, series: &Array2<f32>) -> Result<Array2<f32>> {
        self.fit(series)?;
        self.transform(series)
    }

    /// Map scaled values back to the original units.
    pub fn inverse_transform(&self, scaled: &Array2<f32>) -> Result<Array2<f32>> {
        let (min, scale) = match (&self.min, &self.scale) {
            (Some(m), Some(s)) => (m, s),
            _ => return Err(SignalError::NotFitted("MinMaxScaler")),
        };
        if scaled.ncols() != min.len() {
            return Err(SignalError::ChannelMismatch {
                expected: min.len(),
                found: scaled.ncols(),
            });
        }
        let mut out = scaled.clone();
        for (c, mut column) in out.axis_iter_mut(Axis(1)).enumerate() {
            column.mapv_inplace(|v| v / scale[c] + min[c]);
        }
        Ok(out)
    }
}

/// Standardise a whole series with one global mean and standard deviation
/// (population estimate). A flat series is only centred.
pub fn standardize(series: &Array2<f32>) -> Array2<f32> {
    let n = series.len();
    if n == 0 {
        return series.clone();
    }
    let mean = series.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    let var = series
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n as f64;
    let std = var.sqrt();
    let std = if std > RANGE_EPS as f64 { std } else { 1.0 };
    series.mapv(|v| ((v as f64 - mean) / std) as f32)
}
