//! Quantile (pinball) loss.
//!
//! `ρ_q(e) = max(q·e, (q − 1)·e)` with `e = y − f`, averaged over the last
//! axis. `q = 0.5` gives half the absolute error (median regression); the
//! bound ensemble uses `q = 1 − δ` for the upper and `q = δ` for the lower
//! bound.
//!
//! The `ndarray` version is always available; the tensor version used inside
//! training loops needs the `tch-backend` feature.

use ndarray::{Array, Axis, Dimension, RemoveAxis};

use crate::error::{DatasetError, TrainResult};

/// Pinball loss of a single residual.
#[inline]
pub fn pinball(q: f32, e: f32) -> f32 {
    (q * e).max((q - 1.0) * e)
}

/// Quantile loss of `f` against `y`, averaged over the last axis.
///
/// # Errors
///
/// [`DatasetError::ShapeMismatch`] when the shapes differ or the arrays are
/// zero-dimensional.
pub fn quantile_loss<D>(q: f32, y: &Array<f32, D>, f: &Array<f32, D>) -> TrainResult<Array<f32, D::Smaller>>
where
    D: Dimension + RemoveAxis,
{
    if y.shape() != f.shape() || y.ndim() == 0 {
        return Err(DatasetError::ShapeMismatch {
            expected: y.shape().to_vec(),
            actual: f.shape().to_vec(),
        }
        .into());
    }
    let last = Axis(y.ndim() - 1);
    let mut residual = y - f;
    residual.mapv_inplace(|e| pinball(q, e));
    residual.mean_axis(last).ok_or_else(|| {
        DatasetError::ShapeMismatch {
            expected: vec![1],
            actual: vec![0],
        }
        .into()
    })
}

/// Tensor quantile loss, averaged over the last axis (no reduction over the
/// leading axes).
#[cfg(feature = "tch-backend")]
pub fn quantile_loss_t(q: f64, y: &tch::Tensor, f: &tch::Tensor) -> tch::Tensor {
    let e = y - f;
    let upper = &e * q;
    let lower = &e * (q - 1.0);
    upper
        .maximum(&lower)
        .mean_dim(&[-1_i64][..], false, tch::Kind::Float)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn pinball_is_asymmetric() {
        assert_eq!(pinball(0.9, 1.0), 0.9);
        assert!((pinball(0.9, -1.0) - 0.1).abs() < 1e-6);
        assert_eq!(pinball(0.5, 0.0), 0.0);
    }

    #[test]
    fn reduces_last_axis() {
        let y = array![[1.0_f32, 2.0, 3.0], [0.0, 0.0, 0.0]];
        let f = array![[0.0_f32, 2.0, 4.0], [0.0, 0.0, 0.0]];
        let l = quantile_loss(0.5, &y, &f).unwrap();
        assert_eq!(l.shape(), &[2]);
        assert!((l[0] - (0.5 + 0.0 + 0.5) / 3.0).abs() < 1e-6);
        assert_eq!(l[1], 0.0);
    }

    #[test]
    fn shape_mismatch_is_an_error() {
        let y = array![[1.0_f32, 2.0]];
        let f = array![[1.0_f32], [2.0]];
        assert!(quantile_loss(0.5, &y, &f).is_err());
    }
}
