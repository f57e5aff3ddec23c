//! One-unit linear autoencoder used to estimate the dominant oscillation.

use ndarray::Array2;
use tch::nn::{self, Module, VarStore};
use tch::{Device, Tensor};

use crate::bundle::{Architecture, NetworkRecord};
use crate::error::{TrainError, TrainResult};
use crate::nn::{export_weights, import_weights, to_tensor, to_vec};

/// Bundle name of the frequency coder.
pub const NAME: &str = "frequencycoder";

/// `x → z = W_e·x + b_e → x̂ = W_d·z + b_d` with a scalar latent `z`.
pub struct FrequencyCoder {
    vs: VarStore,
    encoder: nn::Linear,
    decoder: nn::Linear,
    n_channels: usize,
}

impl FrequencyCoder {
    /// Fresh coder for `n_channels` inputs.
    pub fn new(n_channels: usize, device: Device) -> Self {
        let vs = VarStore::new(device);
        let root = vs.root();
        let d = n_channels as i64;
        let encoder = nn::linear(&root / "encoder", d, 1, Default::default());
        let decoder = nn::linear(&root / "decoder", 1, d, Default::default());
        FrequencyCoder {
            vs,
            encoder,
            decoder,
            n_channels,
        }
    }

    /// Variables, for building an optimiser.
    pub fn var_store(&self) -> &VarStore {
        &self.vs
    }

    /// Latent `(B, 1)` and reconstruction `(B, D)`.
    pub fn forward(&self, x: &Tensor) -> (Tensor, Tensor) {
        let z = self.encoder.forward(x);
        let x_hat = self.decoder.forward(&z);
        (z, x_hat)
    }

    /// Latent trace over a whole `(time, channels)` series, in time order.
    pub fn latent(&self, x: &Array2<f32>) -> TrainResult<Vec<f64>> {
        let input = to_tensor(x, self.vs.device());
        let z = tch::no_grad(|| self.encoder.forward(&input));
        Ok(to_vec(&z)?.into_iter().map(f64::from).collect())
    }

    /// Serialisable snapshot.
    pub fn to_record(&self) -> TrainResult<NetworkRecord> {
        Ok(NetworkRecord {
            name: NAME.to_string(),
            architecture: Architecture::FrequencyCoder {
                n_channels: self.n_channels,
            },
            weights: export_weights(&self.vs)?,
        })
    }

    /// Rebuild from a bundle record.
    pub fn from_record(record: &NetworkRecord, device: Device) -> TrainResult<Self> {
        match &record.architecture {
            Architecture::FrequencyCoder { n_channels } => {
                let coder = FrequencyCoder::new(*n_channels, device);
                import_weights(&coder.vs, &record.weights)?;
                Ok(coder)
            }
            other => Err(TrainError::bundle(
                format!("`{}` is not a frequency coder: {other:?}", record.name),
                None,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn latent_has_one_value_per_step() {
        let coder = FrequencyCoder::new(3, Device::Cpu);
        let x = Array2::from_shape_fn((50, 3), |(i, d)| (i + d) as f32 * 0.01);
        assert_eq!(coder.latent(&x).unwrap().len(), 50);
        let (z, x_hat) = coder.forward(&to_tensor(&x, Device::Cpu));
        assert_eq!(z.size(), vec![50, 1]);
        assert_eq!(x_hat.size(), vec![50, 3]);
    }

    #[test]
    fn record_round_trip_keeps_latent() {
        let coder = FrequencyCoder::new(2, Device::Cpu);
        let rebuilt = FrequencyCoder::from_record(&coder.to_record().unwrap(), Device::Cpu).unwrap();
        let x = Array2::from_shape_fn((10, 2), |(i, d)| (i * 2 + d) as f32 * 0.1);
        assert_eq!(coder.latent(&x).unwrap(), rebuilt.latent(&x).unwrap());
    }
}
