//! Trainable sinusoid bank with frequencies shared across channels.

use ndarray::{Array1, Array2};
use tch::nn::VarStore;
use tch::{Device, Kind, Tensor};

use crate::bundle::{Architecture, NetworkRecord};
use crate::error::{TrainError, TrainResult};
use crate::nn::{export_weights, import_weights, to_array1, to_array2, to_tensor};
use crate::sync::SinusoidParams;

/// Bundle name of the sinusoid coder.
pub const NAME: &str = "sinusoidalcoder";

/// `s(t)[d] = Σ_f amp[d,f]·sin(freq[f]·t[d] + wb[d,f]) + disp[d]`.
///
/// Amplitude and phase start at zero. `freq` is fixed unless
/// `trainable_freq` is set; `disp` stays at zero unless `bias` is set.
pub struct SinusoidalCoder {
    vs: VarStore,
    amp: Tensor,
    wb: Tensor,
    disp: Tensor,
    freq: Tensor,
    n_channels: usize,
    freq_init: Vec<f64>,
    trainable_freq: bool,
    bias: bool,
}

impl SinusoidalCoder {
    /// Fresh bank for `n_channels` channels at angular frequencies
    /// `freq_init`.
    pub fn new(n_channels: usize, freq_init: &[f64], trainable_freq: bool, bias: bool, device: Device) -> Self {
        let vs = VarStore::new(device);
        let root = vs.root();
        let d = n_channels as i64;
        let f = freq_init.len() as i64;

        let amp = root.zeros("amp", &[d, f]);
        let wb = root.zeros("wb", &[d, f]);
        let disp = if bias {
            root.zeros("disp", &[d])
        } else {
            root.zeros_no_train("disp", &[d])
        };
        let init: Vec<f32> = freq_init.iter().map(|&w| w as f32).collect();
        let init = Tensor::from_slice(&init).to_device(device);
        let freq = if trainable_freq {
            root.var_copy("freq", &init)
        } else {
            let mut fixed = root.zeros_no_train("freq", &[f]);
            tch::no_grad(|| fixed.copy_(&init));
            fixed
        };

        SinusoidalCoder {
            vs,
            amp,
            wb,
            disp,
            freq,
            n_channels,
            freq_init: freq_init.to_vec(),
            trainable_freq,
            bias,
        }
    }

    /// Variables, for building an optimiser.
    pub fn var_store(&self) -> &VarStore {
        &self.vs
    }

    /// Evaluate on a time grid `(B, D)`.
    pub fn forward(&self, t: &Tensor) -> Tensor {
        let theta = self.freq.view([1, 1, -1]) * t.unsqueeze(-1) + self.wb.unsqueeze(0);
        (self.amp.unsqueeze(0) * theta.sin()).sum_dim_intlist(&[-1_i64][..], false, Kind::Float) + &self.disp
    }

    /// Copy the current parameters out.
    pub fn params(&self) -> TrainResult<SinusoidParams> {
        let freq = to_array1(&self.freq)?;
        SinusoidParams::new(
            to_array2(&self.amp)?,
            to_array2(&self.wb)?,
            to_array1(&self.disp)?,
            freq,
        )
    }

    /// Overwrite amplitude, phase and displacement (frequencies stay).
    pub fn set_params(&self, params: &SinusoidParams) -> TrainResult<()> {
        if params.n_channels() != self.n_channels || params.n_freqs() != self.freq_init.len() {
            return Err(TrainError::shape_mismatch(
                vec![self.n_channels, self.freq_init.len()],
                vec![params.n_channels(), params.n_freqs()],
            ));
        }
        let device = self.vs.device();
        let pairs: [(&Tensor, Tensor); 3] = [
            (&self.amp, to_tensor(&params.amp, device)),
            (&self.wb, to_tensor(&params.wb, device)),
            (&self.disp, to_tensor(&params.disp, device)),
        ];
        tch::no_grad(|| {
            for (dst, src) in pairs {
                let mut dst = dst.shallow_clone();
                dst.copy_(&src);
            }
        });
        Ok(())
    }

    /// Serialisable snapshot.
    pub fn to_record(&self) -> TrainResult<NetworkRecord> {
        Ok(NetworkRecord {
            name: NAME.to_string(),
            architecture: Architecture::SinusoidalCoder {
                n_channels: self.n_channels,
                freq_init: self.freq_init.clone(),
                trainable_freq: self.trainable_freq,
                bias: self.bias,
            },
            weights: export_weights(&self.vs)?,
        })
    }

    /// Rebuild from a bundle record.
    pub fn from_record(record: &NetworkRecord, device: Device) -> TrainResult<Self> {
        match &record.architecture {
            Architecture::SinusoidalCoder {
                n_channels,
                freq_init,
                trainable_freq,
                bias,
            } => {
                let coder = SinusoidalCoder::new(*n_channels, freq_init, *trainable_freq, *bias, device);
                import_weights(&coder.vs, &record.weights)?;
                Ok(coder)
            }
            other => Err(TrainError::bundle(
                format!("`{}` is not a sinusoid coder: {other:?}", record.name),
                None,
            )),
        }
    }
}

/// Flat parameter set (zero amplitude, phase and displacement) at `freq`.
pub fn zero_params(n_channels: usize, freq: &[f64]) -> TrainResult<SinusoidParams> {
    SinusoidParams::new(
        Array2::zeros((n_channels, freq.len())),
        Array2::zeros((n_channels, freq.len())),
        Array1::zeros(n_channels),
        freq.iter().map(|&w| w as f32).collect(),
    )
}
