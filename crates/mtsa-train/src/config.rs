//! Model configuration.
//!
//! [`GanfConfig`] and [`RanSynConfig`] carry every hyper-parameter of the two
//! detectors. Both are serializable via [`serde`] so a run can be reproduced
//! from a JSON file, and both are stored inside saved models.
//!
//! # Example
//!
//! ```rust
//! use mtsa_train::config::{GanfConfig, RanSynConfig};
//!
//! let ganf = GanfConfig::default();
//! ganf.validate().expect("default GANF config is valid");
//! assert_eq!(ganf.n_blocks, 6);
//!
//! let ran = RanSynConfig::default();
//! ran.validate().expect("default RANSynCoders config is valid");
//! assert_eq!(ran.n_estimators, 5);
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Density estimator used by GANF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowKind {
    /// Masked autoregressive flow.
    #[serde(rename = "MAF")]
    Maf,
    /// Affine coupling flow with alternating masks.
    #[serde(rename = "RealNVP")]
    RealNvp,
}

/// Element-wise activation of a dense layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// `max(0, x)`
    Relu,
    /// `1 / (1 + e^-x)`
    Sigmoid,
    /// `tanh(x)`
    Tanh,
    /// Identity.
    Linear,
}

// ---------------------------------------------------------------------------
// GanfConfig
// ---------------------------------------------------------------------------

/// Hyper-parameters of the graph-augmented normalizing flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GanfConfig {
    // -----------------------------------------------------------------------
    // Architecture
    // -----------------------------------------------------------------------
    /// Number of flow blocks. Default: **6**.
    pub n_blocks: usize,
    /// Feature dimension of each sensor reading. Default: **1**.
    pub input_size: usize,
    /// LSTM hidden size and flow conditioning width. Default: **32**.
    pub hidden_size: usize,
    /// Hidden layers inside each flow block; `0` connects the conditioned
    /// input layer straight to the output layer. Default: **1**.
    pub n_hidden: usize,
    /// Dropout on the LSTM hidden states before graph propagation, active in
    /// training only. The encoder has a single layer, so this is the only
    /// place it can act. Default: **0.0**.
    pub dropout: f64,
    /// Flow family. Default: **MAF**.
    pub flow: FlowKind,
    /// Insert a flow batch-norm layer after every block. Default: **false**.
    pub batch_norm: bool,

    // -----------------------------------------------------------------------
    // Augmented Lagrangian
    // -----------------------------------------------------------------------
    /// Initial penalty weight ρ. Default: **1.0**.
    pub rho: f64,
    /// Upper bound on ρ; reaching it stops training. Default: **1e16**.
    pub rho_max: f64,
    /// Initial Lagrange multiplier α. Default: **0.0**.
    pub alpha: f64,
    /// Outer dual-ascent iterations. Default: **2**.
    pub max_iterations: usize,
    /// Factor applied to ρ when `h` fails to halve. Default: **10.0**.
    pub rho_growth: f64,
    /// Training stops once `h` falls to this value. Default: **1e-6**.
    pub h_tol: f64,

    // -----------------------------------------------------------------------
    // Optimisation
    // -----------------------------------------------------------------------
    /// Adam learning rate. Default: **1e-3**.
    pub learning_rate: f64,
    /// Weight decay on network parameters (never on the adjacency).
    /// Default: **5e-4**.
    pub weight_decay: f64,
    /// Epochs per inner penalty pass. Default: **20**.
    pub epochs: usize,
    /// Mini-batch size in windows. Default: **32**.
    pub batch_size: usize,
    /// Gradient values are clipped to `±grad_clip`. Default: **1.0**.
    pub grad_clip: f64,

    // -----------------------------------------------------------------------
    // Windowing
    // -----------------------------------------------------------------------
    /// Training window length. Default: **12**.
    pub window_size: usize,
    /// Step between training windows. Default: **10**.
    pub stride: usize,

    // -----------------------------------------------------------------------
    // Runtime
    // -----------------------------------------------------------------------
    /// Seed for weight initialisation and the adjacency draw. Default: **10**.
    pub seed: u64,
    /// Train on CUDA when available. Default: **false**.
    pub use_gpu: bool,
}

impl Default for GanfConfig {
    fn default() -> Self {
        GanfConfig {
            n_blocks: 6,
            input_size: 1,
            hidden_size: 32,
            n_hidden: 1,
            dropout: 0.0,
            flow: FlowKind::Maf,
            batch_norm: false,
            rho: 1.0,
            rho_max: 1e16,
            alpha: 0.0,
            max_iterations: 2,
            rho_growth: 10.0,
            h_tol: 1e-6,
            learning_rate: 1e-3,
            weight_decay: 5e-4,
            epochs: 20,
            batch_size: 32,
            grad_clip: 1.0,
            window_size: 12,
            stride: 10,
            seed: 10,
            use_gpu: false,
        }
    }
}

impl GanfConfig {
    /// Load and validate a [`GanfConfig`] from a JSON file.
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let cfg: GanfConfig = read_json(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Write this configuration as pretty-printed JSON.
    pub fn to_json(&self, path: &Path) -> Result<(), ConfigError> {
        write_json(self, path)
    }

    /// Validate all fields and return the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_blocks == 0 {
            return Err(ConfigError::invalid_value("n_blocks", "must be > 0"));
        }
        if self.input_size == 0 {
            return Err(ConfigError::invalid_value("input_size", "must be > 0"));
        }
        if self.hidden_size == 0 {
            return Err(ConfigError::invalid_value("hidden_size", "must be > 0"));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ConfigError::invalid_value("dropout", "must be in [0.0, 1.0)"));
        }

        if !(self.rho.is_finite() && self.rho > 0.0) {
            return Err(ConfigError::invalid_value("rho", "must be a finite value > 0.0"));
        }
        if !(self.rho_max > self.rho) {
            return Err(ConfigError::invalid_value("rho_max", "must be greater than rho"));
        }
        if !self.alpha.is_finite() {
            return Err(ConfigError::invalid_value("alpha", "must be finite"));
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::invalid_value("max_iterations", "must be > 0"));
        }
        if !(self.rho_growth > 1.0) {
            return Err(ConfigError::invalid_value("rho_growth", "must be > 1.0"));
        }
        if !(self.h_tol >= 0.0) {
            return Err(ConfigError::invalid_value("h_tol", "must be >= 0.0"));
        }

        if !(self.learning_rate > 0.0) {
            return Err(ConfigError::invalid_value("learning_rate", "must be > 0.0"));
        }
        if !(self.weight_decay >= 0.0) {
            return Err(ConfigError::invalid_value("weight_decay", "must be >= 0.0"));
        }
        if self.epochs == 0 {
            return Err(ConfigError::invalid_value("epochs", "must be > 0"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid_value("batch_size", "must be > 0"));
        }
        if !(self.grad_clip > 0.0) {
            return Err(ConfigError::invalid_value("grad_clip", "must be > 0.0"));
        }

        if self.window_size == 0 {
            return Err(ConfigError::invalid_value("window_size", "must be > 0"));
        }
        if self.stride == 0 {
            return Err(ConfigError::invalid_value("stride", "must be > 0"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RanSynConfig
// ---------------------------------------------------------------------------

/// Hyper-parameters of RANSynCoders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RanSynConfig {
    // -----------------------------------------------------------------------
    // Ensemble
    // -----------------------------------------------------------------------
    /// Number of ensemble members. Default: **5**.
    pub n_estimators: usize,
    /// Channels drawn (without replacement) per member. Default: **5**.
    pub max_features: usize,
    /// Encoder hidden layers before the latent layer. Default: **1**.
    pub encoding_depth: usize,
    /// Width of the latent layer. Default: **1**.
    pub latent_dim: usize,
    /// Decoder hidden layers before the output layer. Default: **2**.
    pub decoding_depth: usize,
    /// Activation of the hidden layers. Default: **relu**.
    pub activation: Activation,
    /// Activation of the decoder output layer. Default: **sigmoid**.
    pub output_activation: Activation,
    /// Quantile half-width: bounds regress the `1 − δ` and `δ` quantiles.
    /// Default: **0.05**.
    pub delta: f64,

    // -----------------------------------------------------------------------
    // Synchronisation
    // -----------------------------------------------------------------------
    /// Attempt phase synchronisation. Default: **true**.
    pub synchronize: bool,
    /// Keep synchronising when the strongest peak sits below `min_periods`.
    /// Default: **true**.
    pub force_synchronization: bool,
    /// Minimum periodogram bin for a usable oscillation. Default: **3**.
    pub min_periods: usize,
    /// Angular frequencies to use instead of estimating them. Default: none.
    pub freq_init: Option<Vec<f64>>,
    /// Maximum number of sinusoids. Default: **5**.
    pub max_freqs: usize,
    /// Minimum bin distance between periodogram peaks. Default: **60**.
    pub min_dist: usize,
    /// Let the optimiser move the frequencies. Default: **false**.
    pub trainable_freq: bool,
    /// Fit a per-channel vertical displacement. Default: **true**.
    pub bias: bool,
    /// Make every first-frequency amplitude non-negative after the sinusoid
    /// warm-up. Default: **true**.
    pub pos_amp: bool,

    // -----------------------------------------------------------------------
    // Input
    // -----------------------------------------------------------------------
    /// Samples per second; also the per-series truncation length.
    /// Default: **16000**.
    pub sampling_rate: usize,
    /// Down-mix multi-channel input to one channel. Requires
    /// `max_features == 1`. Default: **false**.
    pub mono: bool,

    // -----------------------------------------------------------------------
    // Optimisation
    // -----------------------------------------------------------------------
    /// Mini-batch size. Default: **180**.
    pub batch_size: usize,
    /// Adam learning rate of the frequency and sinusoid coders.
    /// Default: **1e-3**.
    pub learning_rate: f64,
    /// Adam learning rate of the bound ensemble. Default: **1e-2**.
    pub bounds_learning_rate: f64,
    /// Training epochs per series. Default: **10**.
    pub epochs: usize,
    /// Frequency-coder warm-up epochs. Default: **5**.
    pub freq_warmup: usize,
    /// Sinusoid-coder warm-up epochs. Default: **5**.
    pub sin_warmup: usize,

    // -----------------------------------------------------------------------
    // Runtime
    // -----------------------------------------------------------------------
    /// Seed for weight initialisation and feature subsets. Default: **10**.
    pub seed: u64,
    /// Train on CUDA when available. Default: **false**.
    pub use_gpu: bool,
}

impl Default for RanSynConfig {
    fn default() -> Self {
        RanSynConfig {
            n_estimators: 5,
            max_features: 5,
            encoding_depth: 1,
            latent_dim: 1,
            decoding_depth: 2,
            activation: Activation::Relu,
            output_activation: Activation::Sigmoid,
            delta: 0.05,
            synchronize: true,
            force_synchronization: true,
            min_periods: 3,
            freq_init: None,
            max_freqs: 5,
            min_dist: 60,
            trainable_freq: false,
            bias: true,
            pos_amp: true,
            sampling_rate: 16_000,
            mono: false,
            batch_size: 180,
            learning_rate: 1e-3,
            bounds_learning_rate: 1e-2,
            epochs: 10,
            freq_warmup: 5,
            sin_warmup: 5,
            seed: 10,
            use_gpu: false,
        }
    }
}

impl RanSynConfig {
    /// Load and validate a [`RanSynConfig`] from a JSON file.
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let cfg: RanSynConfig = read_json(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Write this configuration as pretty-printed JSON.
    pub fn to_json(&self, path: &Path) -> Result<(), ConfigError> {
        write_json(self, path)
    }

    /// Validate all fields and return the first problem found.
    ///
    /// `max_features` is checked against the channel count at fit time, when
    /// the channel count is known.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_estimators == 0 {
            return Err(ConfigError::invalid_value("n_estimators", "must be > 0"));
        }
        if self.max_features == 0 {
            return Err(ConfigError::invalid_value("max_features", "must be > 0"));
        }
        if self.latent_dim == 0 {
            return Err(ConfigError::invalid_value("latent_dim", "must be > 0"));
        }
        if self.mono && self.max_features > 1 {
            return Err(ConfigError::invalid_value(
                "max_features",
                "must be 1 when `mono` down-mixes to a single channel",
            ));
        }
        if !(self.delta > 0.0 && self.delta < 0.5) {
            return Err(ConfigError::invalid_value("delta", "must be in (0.0, 0.5)"));
        }

        if self.max_freqs == 0 {
            return Err(ConfigError::invalid_value("max_freqs", "must be > 0"));
        }
        if self.min_dist == 0 {
            return Err(ConfigError::invalid_value("min_dist", "must be > 0"));
        }
        if let Some(freqs) = &self.freq_init {
            if freqs.is_empty() {
                return Err(ConfigError::invalid_value(
                    "freq_init",
                    "must contain at least one frequency when set",
                ));
            }
            if freqs.iter().any(|f| !(f.is_finite() && *f > 0.0)) {
                return Err(ConfigError::invalid_value(
                    "freq_init",
                    "angular frequencies must be finite and > 0.0",
                ));
            }
        }

        if self.sampling_rate == 0 {
            return Err(ConfigError::invalid_value("sampling_rate", "must be > 0"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid_value("batch_size", "must be > 0"));
        }
        if !(self.learning_rate > 0.0) {
            return Err(ConfigError::invalid_value("learning_rate", "must be > 0.0"));
        }
        if !(self.bounds_learning_rate > 0.0) {
            return Err(ConfigError::invalid_value(
                "bounds_learning_rate",
                "must be > 0.0",
            ));
        }
        if self.epochs == 0 {
            return Err(ConfigError::invalid_value("epochs", "must be > 0"));
        }
        Ok(())
    }

    /// Check `max_features` against the channel count of the training data.
    pub fn validate_channels(&self, n_channels: usize) -> Result<(), ConfigError> {
        if self.max_features > n_channels {
            return Err(ConfigError::invalid_value(
                "max_features",
                format!(
                    "{} exceeds the {} available channels",
                    self.max_features, n_channels
                ),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON helpers
// ---------------------------------------------------------------------------

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::ParseError {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::FileRead {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| ConfigError::invalid_value("(serialization)", e.to_string()))?;
    std::fs::write(path, json).map_err(|source| ConfigError::FileRead {
        path: path.to_path_buf(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        GanfConfig::default().validate().expect("GANF defaults");
        RanSynConfig::default().validate().expect("RANSynCoders defaults");
    }

    #[test]
    fn ganf_json_round_trip() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested").join("ganf.json");

        let mut original = GanfConfig::default();
        original.flow = FlowKind::RealNvp;
        original.batch_norm = true;
        original.to_json(&path).unwrap();

        let loaded = GanfConfig::from_json(&path).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn flow_kind_uses_model_names() {
        let json = serde_json::to_string(&FlowKind::RealNvp).unwrap();
        assert_eq!(json, "\"RealNVP\"");
        let kind: FlowKind = serde_json::from_str("\"MAF\"").unwrap();
        assert_eq!(kind, FlowKind::Maf);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: RanSynConfig = serde_json::from_str(r#"{"n_estimators": 3}"#).unwrap();
        assert_eq!(cfg.n_estimators, 3);
        assert_eq!(cfg.min_dist, 60);
        assert_eq!(cfg.output_activation, Activation::Sigmoid);
    }

    #[test]
    fn rejects_bad_delta() {
        let mut cfg = RanSynConfig::default();
        cfg.delta = 0.5;
        assert!(cfg.validate().is_err());
        cfg.delta = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_empty_or_negative_freq_init() {
        let mut cfg = RanSynConfig::default();
        cfg.freq_init = Some(vec![]);
        assert!(cfg.validate().is_err());
        cfg.freq_init = Some(vec![6.28, -1.0]);
        assert!(cfg.validate().is_err());
        cfg.freq_init = Some(vec![6.28]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_non_growing_penalty() {
        let mut cfg = GanfConfig::default();
        cfg.rho_growth = 1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn max_features_checked_against_channels() {
        let cfg = RanSynConfig::default();
        assert!(cfg.validate_channels(4).is_err());
        assert!(cfg.validate_channels(5).is_ok());
    }

    #[test]
    fn missing_file_is_file_read_error() {
        let tmp = tempdir().unwrap();
        let err = GanfConfig::from_json(&tmp.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }
}
