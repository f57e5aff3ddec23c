//! Bound-violation scoring.

use ndarray::{Array2, Array3, Axis, Zip};

use crate::error::{DatasetError, TrainResult};

/// Fraction of `(sample, member, channel)` cells where `x` lies outside
/// `[lower, upper]`.
///
/// `x` is `(samples, channels)`; the bounds are `(samples, members,
/// channels)`. The result is in `[0, 1]`; higher means more anomalous.
pub fn bound_flag_rate(x: &Array2<f32>, upper: &Array3<f32>, lower: &Array3<f32>) -> TrainResult<f32> {
    let (n, _, d) = upper.dim();
    if lower.dim() != upper.dim() || x.dim() != (n, d) {
        return Err(DatasetError::ShapeMismatch {
            expected: vec![n, d],
            actual: x.shape().to_vec(),
        }
        .into());
    }
    if upper.is_empty() {
        return Err(DatasetError::Empty.into());
    }

    let xb = x.view().insert_axis(Axis(1));
    let xb = xb
        .broadcast(upper.raw_dim())
        .ok_or_else(|| DatasetError::ShapeMismatch {
            expected: upper.shape().to_vec(),
            actual: x.shape().to_vec(),
        })?;

    let mut flagged = 0usize;
    Zip::from(&xb).and(upper).and(lower).for_each(|&v, &hi, &lo| {
        if v < lo || v > hi {
            flagged += 1;
        }
    });
    Ok(flagged as f32 / upper.len() as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_cells_outside_bounds() {
        let x = Array2::from_shape_vec((2, 2), vec![0.5_f32, 2.0, -1.0, 0.5]).unwrap();
        let upper = Array3::<f32>::ones((2, 3, 2));
        let lower = Array3::<f32>::zeros((2, 3, 2));
        // two of four (sample, channel) cells violate, for every member
        assert_eq!(bound_flag_rate(&x, &upper, &lower).unwrap(), 0.5);
    }

    #[test]
    fn boundary_values_are_inside() {
        let x = Array2::from_elem((1, 1), 1.0_f32);
        let upper = Array3::<f32>::ones((1, 2, 1));
        let lower = Array3::<f32>::zeros((1, 2, 1));
        assert_eq!(bound_flag_rate(&x, &upper, &lower).unwrap(), 0.0);
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let x = Array2::<f32>::zeros((3, 2));
        let b = Array3::<f32>::zeros((2, 1, 2));
        assert!(bound_flag_rate(&x, &b, &b).is_err());
    }
}
