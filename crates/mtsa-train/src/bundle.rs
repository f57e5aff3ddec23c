//! Gzip-compressed JSON model bundles.
//!
//! A [`ModelBundle`] carries everything needed to rebuild a fitted
//! RANSynCoders model: the configuration, the fitted preprocessing and
//! synchronisation state, and for each sub-network an architecture
//! description plus its named weight arrays. Nothing in the bundle depends
//! on the tensor backend, so bundles can be inspected without libtorch.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use mtsa_signal::MinMaxScaler;

use crate::config::{Activation, RanSynConfig};
use crate::error::{TrainError, TrainResult};
use crate::sync::SinusoidParams;

/// Bundle layout version written by this crate.
pub const BUNDLE_VERSION: u32 = 1;

/// A named, shaped, row-major weight array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightRecord {
    /// Variable name inside the network.
    pub name: String,
    /// Dimensions.
    pub shape: Vec<usize>,
    /// Values in row-major order.
    pub data: Vec<f32>,
}

impl WeightRecord {
    /// Check that `data` fills `shape` exactly.
    pub fn is_consistent(&self) -> bool {
        self.shape.iter().product::<usize>() == self.data.len()
    }
}

/// Enough structure to rebuild a sub-network before loading its weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Architecture {
    /// One-unit autoencoder used for frequency estimation.
    FrequencyCoder {
        /// Input width.
        n_channels: usize,
    },
    /// Shared-frequency sinusoid bank.
    SinusoidalCoder {
        /// Channels modelled.
        n_channels: usize,
        /// Angular frequencies the bank was built with.
        freq_init: Vec<f64>,
        /// Whether the frequencies are optimised.
        trainable_freq: bool,
        /// Whether the displacement is fitted.
        bias: bool,
    },
    /// Random-subspace quantile autoencoder ensemble.
    RanCoders {
        /// Input and output width.
        n_channels: usize,
        /// Ensemble size.
        n_estimators: usize,
        /// Channels per member.
        max_features: usize,
        /// Encoder hidden layers.
        encoding_depth: usize,
        /// Latent width.
        latent_dim: usize,
        /// Decoder hidden layers.
        decoding_depth: usize,
        /// Hidden activation.
        activation: Activation,
        /// Output activation.
        output_activation: Activation,
        /// Channel subset read by each member.
        feature_subsets: Vec<Vec<usize>>,
    },
}

/// One serialised sub-network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkRecord {
    /// Role of the network (`"frequencycoder"`, `"sinusoidalcoder"`,
    /// `"rancoders"`).
    pub name: String,
    /// How to rebuild it.
    pub architecture: Architecture,
    /// Its variables, sorted by name.
    pub weights: Vec<WeightRecord>,
}

/// State learned during `fit` outside the networks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedState {
    /// Channel count after mono down-mix.
    pub n_channels: usize,
    /// Scaler as fitted on the last training series.
    pub scaler: MinMaxScaler,
    /// Whether synchronisation survived frequency selection.
    pub synchronize: bool,
    /// Angular frequencies in use, if any.
    pub freq_init: Option<Vec<f64>>,
    /// Sinusoid parameters at the end of training, when synchronising.
    pub sinusoid: Option<SinusoidParams>,
}

/// Complete saved model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    /// Layout version, see [`BUNDLE_VERSION`].
    pub version: u32,
    /// Crate version that wrote the bundle.
    pub crate_version: String,
    /// Hyper-parameters.
    pub config: RanSynConfig,
    /// Fitted non-network state.
    pub state: FittedState,
    /// Sub-networks.
    pub networks: Vec<NetworkRecord>,
}

impl ModelBundle {
    /// Assemble a bundle for the current crate version.
    pub fn new(config: RanSynConfig, state: FittedState, networks: Vec<NetworkRecord>) -> Self {
        ModelBundle {
            version: BUNDLE_VERSION,
            crate_version: crate::VERSION.to_string(),
            config,
            state,
            networks,
        }
    }

    /// Look up a sub-network by name.
    pub fn network(&self, name: &str) -> Option<&NetworkRecord> {
        self.networks.iter().find(|n| n.name == name)
    }

    /// Write the bundle as gzip-compressed JSON.
    pub fn save(&self, path: &Path) -> TrainResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = BufWriter::new(File::create(path)?);
        let mut encoder = GzEncoder::new(file, Compression::default());
        serde_json::to_writer(&mut encoder, self)?;
        encoder.finish()?.flush()?;
        Ok(())
    }

    /// Read a bundle written by [`save`](Self::save).
    pub fn load(path: &Path) -> TrainResult<Self> {
        let file = BufReader::new(File::open(path)?);
        let bundle: ModelBundle = serde_json::from_reader(GzDecoder::new(file))?;
        if bundle.version != BUNDLE_VERSION {
            return Err(TrainError::bundle(
                format!(
                    "unsupported bundle version {} (expected {})",
                    bundle.version, BUNDLE_VERSION
                ),
                Some(path.to_path_buf()),
            ));
        }
        for net in &bundle.networks {
            if let Some(w) = net.weights.iter().find(|w| !w.is_consistent()) {
                return Err(TrainError::bundle(
                    format!("weight `{}` of `{}` does not match its shape", w.name, net.name),
                    Some(path.to_path_buf()),
                ));
            }
        }
        Ok(bundle)
    }
}
