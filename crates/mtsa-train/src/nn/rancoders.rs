//! Random-subspace quantile autoencoder ensemble.
//!
//! Every member sees a random subset of `max_features` channels, compresses
//! it to a small latent code and decodes two full-width outputs: an upper and
//! a lower quantile of every channel.

use rand::seq::index;
use rand::Rng;
use tch::nn::{self, Module, VarStore};
use tch::{Device, Kind, Tensor};

use crate::bundle::{Architecture, NetworkRecord};
use crate::config::{Activation, RanSynConfig};
use crate::error::{TrainError, TrainResult};
use crate::nn::{activate, export_weights, import_weights};

/// Bundle name of the bound ensemble.
pub const NAME: &str = "rancoders";

/// Draw `n_estimators` channel subsets of size `max_features`, each without
/// replacement and sorted.
pub fn draw_subsets<R: Rng>(rng: &mut R, n_channels: usize, n_estimators: usize, max_features: usize) -> Vec<Vec<usize>> {
    (0..n_estimators)
        .map(|_| {
            let mut subset = index::sample(rng, n_channels, max_features).into_vec();
            subset.sort_unstable();
            subset
        })
        .collect()
}

/// Dense stack with one activation for all layers but the last.
struct Stack {
    layers: Vec<nn::Linear>,
    hidden: Activation,
    output: Activation,
}

impl Stack {
    fn new(p: nn::Path, widths: &[i64], hidden: Activation, output: Activation) -> Self {
        let layers = widths
            .windows(2)
            .enumerate()
            .map(|(i, w)| nn::linear(&p / format!("dense{i}"), w[0], w[1], Default::default()))
            .collect();
        Stack { layers, hidden, output }
    }

    fn forward(&self, x: &Tensor) -> Tensor {
        let last = self.layers.len().saturating_sub(1);
        self.layers.iter().enumerate().fold(x.shallow_clone(), |h, (i, layer)| {
            let act = if i == last { self.output } else { self.hidden };
            activate(act, &layer.forward(&h))
        })
    }
}

struct Member {
    subset: Tensor,
    encoder: Stack,
    upper: Stack,
    lower: Stack,
}

/// Ensemble of `n_estimators` bound autoencoders.
pub struct RanCoders {
    vs: VarStore,
    members: Vec<Member>,
    n_channels: usize,
    feature_subsets: Vec<Vec<usize>>,
    config: RanSynConfig,
}

impl RanCoders {
    /// Build the ensemble for `n_channels` channels over the given subsets.
    pub fn new(config: &RanSynConfig, n_channels: usize, feature_subsets: Vec<Vec<usize>>, device: Device) -> TrainResult<Self> {
        if feature_subsets.len() != config.n_estimators {
            return Err(TrainError::shape_mismatch(
                vec![config.n_estimators],
                vec![feature_subsets.len()],
            ));
        }
        if let Some(bad) = feature_subsets
            .iter()
            .find(|s| s.len() != config.max_features || s.iter().any(|&c| c >= n_channels))
        {
            return Err(TrainError::shape_mismatch(vec![config.max_features], vec![bad.len()]));
        }

        let vs = VarStore::new(device);
        let root = vs.root();
        let latent = config.latent_dim as i64;
        let d = n_channels as i64;

        let mut enc_widths = vec![config.max_features as i64];
        enc_widths.extend((0..config.encoding_depth).map(|i| latent << (config.encoding_depth - i)));
        enc_widths.push(latent);

        let mut dec_widths = vec![latent];
        dec_widths.extend((0..config.decoding_depth).map(|i| latent << (i + 1)));
        dec_widths.push(d);

        let members = feature_subsets
            .iter()
            .enumerate()
            .map(|(e, subset)| {
                let p = &root / format!("member{e}");
                let idx: Vec<i64> = subset.iter().map(|&c| c as i64).collect();
                Member {
                    subset: Tensor::from_slice(&idx).to_device(device),
                    encoder: Stack::new(&p / "encoder", &enc_widths, config.activation, config.activation),
                    upper: Stack::new(&p / "upper", &dec_widths, config.activation, config.output_activation),
                    lower: Stack::new(&p / "lower", &dec_widths, config.activation, config.output_activation),
                }
            })
            .collect();

        Ok(RanCoders {
            vs,
            members,
            n_channels,
            feature_subsets,
            config: config.clone(),
        })
    }

    /// Variables, for building an optimiser.
    pub fn var_store(&self) -> &VarStore {
        &self.vs
    }

    /// Channel subset of every member.
    pub fn feature_subsets(&self) -> &[Vec<usize>] {
        &self.feature_subsets
    }

    /// Upper and lower bounds for a batch `(B, D)`, each `(E, B, D)`.
    pub fn forward(&self, x: &Tensor) -> (Tensor, Tensor) {
        let (hi, lo): (Vec<Tensor>, Vec<Tensor>) = self
            .members
            .iter()
            .map(|m| {
                let z = m.encoder.forward(&x.index_select(1, &m.subset));
                (m.upper.forward(&z), m.lower.forward(&z))
            })
            .unzip();
        (Tensor::stack(&hi, 0), Tensor::stack(&lo, 0))
    }

    /// Serialisable snapshot.
    pub fn to_record(&self) -> TrainResult<NetworkRecord> {
        Ok(NetworkRecord {
            name: NAME.to_string(),
            architecture: Architecture::RanCoders {
                n_channels: self.n_channels,
                n_estimators: self.config.n_estimators,
                max_features: self.config.max_features,
                encoding_depth: self.config.encoding_depth,
                latent_dim: self.config.latent_dim,
                decoding_depth: self.config.decoding_depth,
                activation: self.config.activation,
                output_activation: self.config.output_activation,
                feature_subsets: self.feature_subsets.clone(),
            },
            weights: export_weights(&self.vs)?,
        })
    }

    /// Rebuild from a bundle record.
    pub fn from_record(record: &NetworkRecord, device: Device) -> TrainResult<Self> {
        match &record.architecture {
            Architecture::RanCoders {
                n_channels,
                n_estimators,
                max_features,
                encoding_depth,
                latent_dim,
                decoding_depth,
                activation,
                output_activation,
                feature_subsets,
            } => {
                let config = RanSynConfig {
                    n_estimators: *n_estimators,
                    max_features: *max_features,
                    encoding_depth: *encoding_depth,
                    latent_dim: *latent_dim,
                    decoding_depth: *decoding_depth,
                    activation: *activation,
                    output_activation: *output_activation,
                    ..Default::default()
                };
                let coders = RanCoders::new(&config, *n_channels, feature_subsets.clone(), device)?;
                import_weights(&coders.vs, &record.weights)?;
                Ok(coders)
            }
            other => Err(TrainError::bundle(
                format!("`{}` is not a bound ensemble: {other:?}", record.name),
                None,
            )),
        }
    }
}

/// Mean of a loss over every axis, as `f64`.
pub(crate) fn scalar(t: &Tensor) -> TrainResult<f64> {
    Ok(t.mean(Kind::Float).f_double_value(&[])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn config() -> RanSynConfig {
        RanSynConfig {
            n_estimators: 3,
            max_features: 2,
            encoding_depth: 1,
            latent_dim: 2,
            decoding_depth: 2,
            ..Default::default()
        }
    }

    #[test]
    fn subsets_are_distinct_and_in_range() {
        let mut rng = StdRng::seed_from_u64(0);
        let subsets = draw_subsets(&mut rng, 6, 10, 4);
        assert_eq!(subsets.len(), 10);
        for s in &subsets {
            assert_eq!(s.len(), 4);
            assert!(s.windows(2).all(|w| w[0] < w[1]));
            assert!(s.iter().all(|&c| c < 6));
        }
    }

    #[test]
    fn bounds_have_ensemble_shape() {
        let cfg = config();
        let mut rng = StdRng::seed_from_u64(1);
        let coders = RanCoders::new(&cfg, 4, draw_subsets(&mut rng, 4, 3, 2), Device::Cpu).unwrap();
        let x = Tensor::rand([7, 4], (Kind::Float, Device::Cpu));
        let (hi, lo) = coders.forward(&x);
        assert_eq!(hi.size(), vec![3, 7, 4]);
        assert_eq!(lo.size(), vec![3, 7, 4]);
        // sigmoid output
        assert!(hi.min().double_value(&[]) >= 0.0);
        assert!(lo.max().double_value(&[]) <= 1.0);
    }

    #[test]
    fn wrong_subset_size_is_rejected() {
        let cfg = config();
        let subsets = vec![vec![0, 1, 2]; 3];
        assert!(RanCoders::new(&cfg, 4, subsets, Device::Cpu).is_err());
    }

    #[test]
    fn record_round_trip_keeps_outputs() {
        let cfg = config();
        let mut rng = StdRng::seed_from_u64(2);
        let coders = RanCoders::new(&cfg, 3, draw_subsets(&mut rng, 3, 3, 2), Device::Cpu).unwrap();
        let rebuilt = RanCoders::from_record(&coders.to_record().unwrap(), Device::Cpu).unwrap();
        assert_eq!(rebuilt.feature_subsets(), coders.feature_subsets());
        let x = Tensor::rand([5, 3], (Kind::Float, Device::Cpu));
        let (a, _) = coders.forward(&x);
        let (b, _) = rebuilt.forward(&x);
        assert!(a.allclose(&b, 1e-6, 1e-6, false));
    }
}
