//! Sinusoidal phase synchronisation.
//!
//! A fitted [`SinusoidParams`] describes every channel `d` as
//!
//! ```text
//! s_d(t) = Σ_f amp[d,f] · sin(ω_f · t + wb[d,f]) + disp[d]
//! ```
//!
//! with frequencies `ω` shared by all channels. Synchronisation shifts each
//! channel's sinusoids onto the phase of the first frequency and rescales the
//! residual, so that the bound ensemble sees channels that oscillate together.
//! Desynchronisation maps ensemble bounds back to the raw-signal frame.
//!
//! All computations here are plain `ndarray`; the parameters are copied out
//! of the sinusoid network after each step.

use ndarray::{Array1, Array2, Array3, Axis, Zip};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

use crate::error::{DatasetError, TrainResult};

/// Parameters of a fitted sinusoid bank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinusoidParams {
    /// Amplitudes, `(channels, freqs)`.
    pub amp: Array2<f32>,
    /// Phase terms `ω·b`, `(channels, freqs)`.
    pub wb: Array2<f32>,
    /// Vertical displacement, `(channels)`.
    pub disp: Array1<f32>,
    /// Angular frequencies, `(freqs)`.
    pub freq: Array1<f32>,
}

impl SinusoidParams {
    /// Build and shape-check a parameter set.
    ///
    /// Every frequency must be non-zero since phase shifts are `wb / ω`.
    pub fn new(
        amp: Array2<f32>,
        wb: Array2<f32>,
        disp: Array1<f32>,
        freq: Array1<f32>,
    ) -> TrainResult<Self> {
        let (d, f) = amp.dim();
        if wb.dim() != (d, f) {
            return Err(DatasetError::ShapeMismatch {
                expected: vec![d, f],
                actual: wb.shape().to_vec(),
            }
            .into());
        }
        if disp.len() != d || freq.len() != f || f == 0 {
            return Err(DatasetError::ShapeMismatch {
                expected: vec![d, f],
                actual: vec![disp.len(), freq.len()],
            }
            .into());
        }
        if freq.iter().any(|w| *w == 0.0 || !w.is_finite()) {
            return Err(DatasetError::ShapeMismatch {
                expected: vec![f],
                actual: vec![0],
            }
            .into());
        }
        Ok(SinusoidParams { amp, wb, disp, freq })
    }

    /// Number of channels.
    pub fn n_channels(&self) -> usize {
        self.amp.nrows()
    }

    /// Number of sinusoids per channel.
    pub fn n_freqs(&self) -> usize {
        self.freq.len()
    }

    /// Sinusoid model evaluated on a time grid `t`, `(samples, channels)`.
    pub fn evaluate(&self, t: &Array2<f32>) -> TrainResult<Array2<f32>> {
        self.check_channels(t.ncols())?;
        let mut s = Array2::<f32>::zeros(t.raw_dim());
        Zip::indexed(&mut s).and(t).for_each(|(_, d), out, &ti| {
            let mut acc = self.disp[d];
            for f in 0..self.n_freqs() {
                acc += self.amp[[d, f]] * (self.freq[f] * ti + self.wb[[d, f]]).sin();
            }
            *out = acc;
        });
        Ok(s)
    }

    /// Phase shifts `b = wb / ω`, `(channels, freqs)`.
    pub fn phase_shifts(&self) -> Array2<f32> {
        let mut b = self.wb.clone();
        for (f, mut col) in b.axis_iter_mut(Axis(1)).enumerate() {
            col.mapv_inplace(|v| v / self.freq[f]);
        }
        b
    }

    /// Synchronise `x` sampled on grid `t` (both `(samples, channels)`).
    ///
    /// Each channel's sinusoids are re-phased by `b − b[:, 0]` and the
    /// residual `x − s` is scaled by `sin(ω₀·(π/(2ω₀) − b₀))`.
    pub fn synchronize(&self, x: &Array2<f32>, t: &Array2<f32>) -> TrainResult<Array2<f32>> {
        if x.dim() != t.dim() {
            return Err(DatasetError::ShapeMismatch {
                expected: x.shape().to_vec(),
                actual: t.shape().to_vec(),
            }
            .into());
        }
        let s = self.evaluate(t)?;
        let b = self.phase_shifts();
        let w0 = self.freq[0];
        let noise_gain: Array1<f32> = b
            .column(0)
            .mapv(|b0| (w0 * (PI / (2.0 * w0) - b0)).sin());

        let mut out = Array2::<f32>::zeros(x.raw_dim());
        Zip::indexed(&mut out)
            .and(x)
            .and(t)
            .and(&s)
            .for_each(|(_, d), out, &xi, &ti, &si| {
                let mut acc = self.disp[d];
                for f in 0..self.n_freqs() {
                    let b_sync = b[[d, f]] - b[[d, 0]];
                    acc += self.amp[[d, f]] * (self.freq[f] * (ti + b_sync)).sin();
                }
                *out = acc + (xi - si) * noise_gain[d];
            });
        Ok(out)
    }

    /// Per-channel factor `sin(ω₀·(π/(2ω₀) + b₀))` undoing synchronisation.
    pub fn desync_gain(&self) -> Array1<f32> {
        let w0 = self.freq[0];
        self.phase_shifts()
            .column(0)
            .mapv(|b0| (w0 * (PI / (2.0 * w0) + b0)).sin())
    }

    /// Multiply the channel (last) axis of `e` by [`desync_gain`](Self::desync_gain).
    pub fn desynchronize(&self, e: &Array3<f32>) -> TrainResult<Array3<f32>> {
        self.check_channels(e.len_of(Axis(2)))?;
        let gain = self.desync_gain();
        let mut out = e.clone();
        for mut lane in out.lanes_mut(Axis(2)) {
            lane *= &gain;
        }
        Ok(out)
    }

    /// Map synchronised-frame bounds back to raw-signal space.
    ///
    /// `x` and `x_sync` are `(samples, channels)`; `upper` / `lower` are
    /// `(samples, members, channels)`. The expected value `(hi + lo)/2` is
    /// re-expressed as `x − desync(x_sync − E)` and the half-width as
    /// `|desync((hi − lo)/2)|`.
    pub fn predict_desynchronize(
        &self,
        x: &Array2<f32>,
        x_sync: &Array2<f32>,
        upper: &Array3<f32>,
        lower: &Array3<f32>,
    ) -> TrainResult<(Array3<f32>, Array3<f32>)> {
        let (n, _, d) = upper.dim();
        if lower.dim() != upper.dim() || x.dim() != (n, d) || x_sync.dim() != (n, d) {
            return Err(DatasetError::ShapeMismatch {
                expected: upper.shape().to_vec(),
                actual: lower.shape().to_vec(),
            }
            .into());
        }

        let expected = (upper + lower) / 2.0;
        let x_sync_b = x_sync.view().insert_axis(Axis(1));
        let deviation = self.desynchronize(&(&x_sync_b - &expected))?;
        let x_b = x.view().insert_axis(Axis(1));
        let centre = &x_b - &deviation;

        let half = self.desynchronize(&((upper - lower) / 2.0))?.mapv(f32::abs);
        Ok((&centre + &half, &centre - &half))
    }

    /// Make every first-frequency amplitude non-negative.
    ///
    /// A negative `amp[d, 0]` is negated and its phase moved by half a cycle:
    /// `wb + π`, or `wb − π` when `wb + π` would exceed `2π`. Channels that
    /// are already non-negative are left as they are, so applying this twice
    /// changes nothing. `disp` is never adjusted, so a flipped channel keeps
    /// its displacement rather than being shifted by `−|a|`.
    pub fn normalize_signs(&mut self) {
        let two_pi = 2.0 * PI;
        for d in 0..self.n_channels() {
            let a = self.amp[[d, 0]];
            if a < 0.0 {
                self.amp[[d, 0]] = -a;
                let wb = self.wb[[d, 0]];
                let shifted = wb + PI;
                self.wb[[d, 0]] = if shifted > two_pi { wb - PI } else { shifted };
            }
        }
    }

    fn check_channels(&self, found: usize) -> TrainResult<()> {
        if found != self.n_channels() {
            return Err(DatasetError::channel_mismatch(self.n_channels(), found).into());
        }
        Ok(())
    }
}
