//! Sliding windows and time grids over (time × channels) series.

use crate::{Result, SignalError};
use ndarray::{s, Array2, Array4};

/// Cut `series` (T × K) into windows of `window` steps taken every `stride`
/// steps.
///
/// The result has shape `(n_windows, K, window, 1)`: one entity row per
/// channel, time along the third axis and a unit feature axis. The last
/// window starts at or before `T − window`.
pub fn sliding_windows(series: &Array2<f32>, window: usize, stride: usize) -> Result<Array4<f32>> {
    if window == 0 {
        return Err(SignalError::InvalidWindow("window length must be > 0".into()));
    }
    if stride == 0 {
        return Err(SignalError::InvalidWindow("stride must be > 0".into()));
    }
    let (t, k) = series.dim();
    if t < window {
        return Err(SignalError::SignalTooShort {
            needed: window,
            len: t,
        });
    }

    let n = (t - window) / stride + 1;
    let mut out = Array4::<f32>::zeros((n, k, window, 1));
    for w in 0..n {
        let start = w * stride;
        let chunk = series.slice(s![start..start + window, ..]);
        // (window, K) -> (K, window)
        out.slice_mut(s![w, .., .., 0]).assign(&chunk.t());
    }
    Ok(out)
}

/// Time grid `t[i, c] = i / sampling_rate`, repeated over `channels` columns.
pub fn time_index(len: usize, channels: usize, sampling_rate: f64) -> Result<Array2<f32>> {
    if !(sampling_rate.is_finite() && sampling_rate > 0.0) {
        return Err(SignalError::InvalidSamplingRate(sampling_rate));
    }
    Ok(Array2::from_shape_fn((len, channels), |(i, _)| {
        (i as f64 / sampling_rate) as f32
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_shape_and_content() {
        let series = Array2::from_shape_fn((25, 3), |(t, c)| (t * 10 + c) as f32);
        let w = sliding_windows(&series, 12, 10).unwrap();
        assert_eq!(w.dim(), (2, 3, 12, 1));
        // second window starts at t = 10, channel 2
        assert_eq!(w[[1, 2, 0, 0]], 102.0);
        assert_eq!(w[[1, 2, 11, 0]], 212.0);
    }

    #[test]
    fn unit_window_covers_every_step() {
        let series = Array2::<f32>::zeros((7, 2));
        assert_eq!(sliding_windows(&series, 1, 1).unwrap().dim(), (7, 2, 1, 1));
    }

    #[test]
    fn too_short_or_degenerate() {
        let series = Array2::<f32>::zeros((5, 2));
        assert!(sliding_windows(&series, 6, 1).is_err());
        assert!(sliding_windows(&series, 0, 1).is_err());
        assert!(sliding_windows(&series, 2, 0).is_err());
    }

    #[test]
    fn time_index_in_seconds() {
        let t = time_index(4, 2, 2.0).unwrap();
        assert_eq!(t.column(0).to_vec(), vec![0.0, 0.5, 1.0, 1.5]);
        assert_eq!(t.column(1), t.column(0));
        assert!(time_index(4, 2, 0.0).is_err());
    }
}
