//! # MTSA Training
//!
//! Two unsupervised anomaly detectors for multivariate time series and audio:
//!
//! - **GANF**: an LSTM encoder and a graph layer over a learned adjacency
//!   condition a normalizing flow; the adjacency is pushed towards a DAG by an
//!   augmented-Lagrangian penalty. Scores are negative log-likelihoods.
//! - **RANSynCoders**: series are min-max scaled, optionally phase-aligned to
//!   a fitted bank of sinusoids, and bounded by an ensemble of random-subspace
//!   quantile autoencoders. Scores are bound-violation rates in `[0, 1]`.
//!
//! ## Architecture
//!
//! ```text
//! GanfConfig ──► Ganf ──► GanfWindows (standardize + sliding windows)
//!                  │
//!                  ├── TemporalEncoder (LSTM)
//!                  ├── GraphPropagation (adjacency A)
//!                  ├── ConditionalFlow (MAF | RealNVP)
//!                  └── AugmentedLagrangian (ρ, α, h(A))
//!
//! RanSynConfig ──► RanSynCoders ──► MinMaxScaler
//!                  │
//!                  ├── FrequencyCoder ──► select_frequencies (mtsa-signal)
//!                  ├── SinusoidalCoder ──► SinusoidParams (synchronize)
//!                  ├── RanCoders (quantile bounds)
//!                  └── ModelBundle (gzip JSON)
//! ```
//!
//! The pure numerical pieces (acyclicity, penalty schedule, quantile loss,
//! synchronisation, frequency selection, scoring, persistence) are always
//! built. The networks and training loops in [`nn`] need the `tch-backend`
//! feature.
//!
//! ## Quick Start
//!
//! ```rust
//! use mtsa_train::config::RanSynConfig;
//! use mtsa_train::dataset::{SyntheticConfig, SyntheticSeries};
//!
//! let config = RanSynConfig::default();
//! config.validate().unwrap();
//!
//! let data = SyntheticSeries::generate(&SyntheticConfig::default());
//! assert_eq!(data.series.len(), data.labels.len());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod acyclicity;
pub mod bundle;
pub mod config;
pub mod dataset;
pub mod error;
pub mod experiment;
pub mod frequency;
pub mod losses;
pub mod pipeline;
pub mod scoring;
pub mod sync;

#[cfg(feature = "tch-backend")]
pub mod nn;

// Convenient re-exports at the crate root.
pub use acyclicity::{acyclicity, AugmentedLagrangian, PenaltyStep};
pub use bundle::ModelBundle;
pub use config::{Activation, FlowKind, GanfConfig, RanSynConfig};
pub use dataset::{GanfWindows, SyntheticConfig, SyntheticSeries};
pub use error::{ConfigError, DatasetError, TrainError, TrainResult};
pub use experiment::{EpochRecord, ExperimentLog, Stage};
pub use frequency::{select_frequencies, FrequencyDecision, FrequencySearch};
pub use pipeline::{Detector, Pipeline, Transformer};
pub use sync::SinusoidParams;

#[cfg(feature = "tch-backend")]
pub use nn::{ganf::Ganf, ransyncoders::RanSynCoders};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
