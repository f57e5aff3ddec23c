//! LSTM temporal encoder.

use tch::nn::{self, RNN};
use tch::Tensor;

use crate::error::{ConfigError, TrainResult};

/// Single-layer batch-first LSTM mapping `(entities, time, input)` to
/// `(entities, time, hidden)`.
pub struct TemporalEncoder {
    lstm: nn::LSTM,
    input_size: i64,
    hidden_size: i64,
}

impl TemporalEncoder {
    /// Register the LSTM weights under `p`.
    pub fn new(p: nn::Path, input_size: i64, hidden_size: i64) -> Self {
        let cfg = nn::RNNConfig {
            batch_first: true,
            ..Default::default()
        };
        TemporalEncoder {
            lstm: nn::lstm(p, input_size, hidden_size, cfg),
            input_size,
            hidden_size,
        }
    }

    /// Hidden width.
    pub fn hidden_size(&self) -> i64 {
        self.hidden_size
    }

    /// Hidden state at every step. State does not carry across entities.
    pub fn forward(&self, x: &Tensor) -> TrainResult<Tensor> {
        let size = x.size();
        if size.len() != 3 || size[2] != self.input_size {
            return Err(ConfigError::invalid_value(
                "input_size",
                format!("encoder expects {} features per step, input has shape {:?}", self.input_size, size),
            )
            .into());
        }
        let (out, _) = self.lstm.seq(x);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{nn::VarStore, Device, Kind};

    #[test]
    fn keeps_time_axis_and_widens_features() {
        let vs = VarStore::new(Device::Cpu);
        let enc = TemporalEncoder::new(vs.root() / "rnn", 1, 8);
        let x = Tensor::randn([5, 12, 1], (Kind::Float, Device::Cpu));
        assert_eq!(enc.forward(&x).unwrap().size(), vec![5, 12, 8]);
    }

    #[test]
    fn wrong_feature_width_is_a_config_error() {
        let vs = VarStore::new(Device::Cpu);
        let enc = TemporalEncoder::new(vs.root() / "rnn", 1, 8);
        let x = Tensor::randn([5, 12, 3], (Kind::Float, Device::Cpu));
        assert!(enc.forward(&x).is_err());
    }
}
