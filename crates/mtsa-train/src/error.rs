//! Error types for the anomaly-detection training crate.
//!
//! Every module that can fail imports its error type from here, so the
//! hierarchy stays in one place.
//!
//! ## Hierarchy
//!
//! ```text
//! TrainError (top-level)
//! ├── ConfigError      (hyper-parameter validation / config file loading)
//! ├── DatasetError     (input shapes, empty series, channel mismatches)
//! ├── SignalError      (periodogram / scaler failures from mtsa-signal)
//! ├── NumericDivergence, NotFitted, SynchronizationDisabled
//! └── Bundle / Io / Json / Tch (persistence and backend failures)
//! ```

use std::path::PathBuf;
use thiserror::Error;

pub use mtsa_signal::SignalError;

// ---------------------------------------------------------------------------
// TrainResult
// ---------------------------------------------------------------------------

/// Convenient `Result` alias used by fit / predict / persistence functions.
pub type TrainResult<T> = Result<T, TrainError>;

// ---------------------------------------------------------------------------
// TrainError
// ---------------------------------------------------------------------------

/// Top-level error type.
///
/// Lower-level functions return [`ConfigError`], [`DatasetError`] or
/// [`SignalError`]; all of them convert into `TrainError` through [`From`].
#[derive(Debug, Error)]
pub enum TrainError {
    /// A configuration validation or loading error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Input data has the wrong shape or is empty.
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    /// Signal processing failed (scaling, periodogram, windowing).
    #[error("Signal error: {0}")]
    Signal(#[from] SignalError),

    /// A loss or constraint value became NaN or infinite during training.
    #[error("Numeric divergence: {quantity} = {value}")]
    NumericDivergence {
        /// Name of the diverging quantity (e.g. `"h(A)"`).
        quantity: &'static str,
        /// The offending value.
        value: f64,
    },

    /// `predict` / `score_samples` called on a model that was never fitted.
    #[error("Model has not been fitted")]
    NotFitted,

    /// A synchronisation-only method was called while synchronisation is off.
    #[error("Synchronization is disabled for this model; `{method}` is unavailable")]
    SynchronizationDisabled {
        /// Name of the rejected method.
        method: &'static str,
    },

    /// A saved bundle is inconsistent with the network it is loaded into.
    #[error("Bundle error: {message} (path: {path:?})")]
    Bundle {
        /// Human-readable description.
        message: String,
        /// Bundle path, when known.
        path: Option<PathBuf>,
    },

    /// Low-level I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A libtorch call failed.
    #[cfg(feature = "tch-backend")]
    #[error("Backend error: {0}")]
    Tch(#[from] tch::TchError),
}

impl TrainError {
    /// Construct a [`TrainError::NumericDivergence`].
    pub fn divergence(quantity: &'static str, value: f64) -> Self {
        TrainError::NumericDivergence { quantity, value }
    }

    /// Construct a [`TrainError::SynchronizationDisabled`].
    pub fn sync_disabled(method: &'static str) -> Self {
        TrainError::SynchronizationDisabled { method }
    }

    /// Construct a [`TrainError::Bundle`].
    pub fn bundle<S: Into<String>>(msg: S, path: Option<PathBuf>) -> Self {
        TrainError::Bundle { message: msg.into(), path }
    }

    /// Construct a [`DatasetError::ShapeMismatch`] wrapped in `TrainError`.
    pub fn shape_mismatch(expected: Vec<usize>, actual: Vec<usize>) -> Self {
        TrainError::Dataset(DatasetError::ShapeMismatch { expected, actual })
    }
}

/// Return `Err(NumericDivergence)` when `value` is NaN or infinite.
pub fn ensure_finite(quantity: &'static str, value: f64) -> TrainResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(TrainError::divergence(quantity, value))
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors produced when loading or validating a model configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field has an invalid value.
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// Name of the field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// A configuration file could not be read or written.
    #[error("Cannot access config file `{path}`: {source}")]
    FileRead {
        /// Path that was being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file contains malformed JSON.
    #[error("Cannot parse config file `{path}`: {source}")]
    ParseError {
        /// Path that was being parsed.
        path: PathBuf,
        /// Underlying JSON parse error.
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    /// Construct a [`ConfigError::InvalidValue`].
    pub fn invalid_value<S: Into<String>>(field: &'static str, reason: S) -> Self {
        ConfigError::InvalidValue { field, reason: reason.into() }
    }
}

// ---------------------------------------------------------------------------
// DatasetError
// ---------------------------------------------------------------------------

/// Errors produced while turning raw series into training or scoring input.
///
/// A channel count that changes between `fit` and `predict` is always fatal;
/// nothing is reshaped or padded silently.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// No series were supplied.
    #[error("No series supplied")]
    Empty,

    /// A series has no samples.
    #[error("Series {index} has no samples")]
    EmptySeries {
        /// Position of the empty series in the input slice.
        index: usize,
    },

    /// A series is shorter than the model needs.
    #[error("Series {index} has {len} samples, at least {needed} required")]
    SeriesTooShort {
        /// Position of the offending series.
        index: usize,
        /// Samples available.
        len: usize,
        /// Samples required.
        needed: usize,
    },

    /// Channel count differs from the one seen at fit time.
    #[error("Channel mismatch: model expects {expected} channels, got {found}")]
    ChannelMismatch {
        /// Channels seen at fit time.
        expected: usize,
        /// Channels in the offending input.
        found: usize,
    },

    /// Feature dimension of a windowed sample differs from the encoder input.
    #[error("Feature mismatch: encoder expects {expected} features, got {found}")]
    FeatureMismatch {
        /// Configured `input_size`.
        expected: usize,
        /// Feature axis of the input.
        found: usize,
    },

    /// Two arrays that must agree in shape do not.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        actual: Vec<usize>,
    },

    /// A `.npy` file could not be parsed.
    #[error("NumPy read error in `{path}`: {message}")]
    NpyReadError {
        /// Path of the `.npy` file.
        path: PathBuf,
        /// Error description.
        message: String,
    },
}

impl DatasetError {
    /// Construct a [`DatasetError::ChannelMismatch`].
    pub fn channel_mismatch(expected: usize, found: usize) -> Self {
        DatasetError::ChannelMismatch { expected, found }
    }

    /// Construct a [`DatasetError::NpyReadError`].
    pub fn npy_read<S: Into<String>>(path: impl Into<PathBuf>, msg: S) -> Self {
        DatasetError::NpyReadError { path: path.into(), message: msg.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_finite_rejects_nan_and_inf() {
        assert_eq!(ensure_finite("loss", 1.5).unwrap(), 1.5);
        assert!(matches!(
            ensure_finite("loss", f64::NAN),
            Err(TrainError::NumericDivergence { quantity: "loss", .. })
        ));
        assert!(ensure_finite("h(A)", f64::INFINITY).is_err());
    }

    #[test]
    fn nested_errors_convert() {
        let e: TrainError = ConfigError::invalid_value("delta", "must be in (0, 0.5)").into();
        assert!(e.to_string().contains("delta"));
        let e: TrainError = SignalError::NotFitted("MinMaxScaler").into();
        assert!(matches!(e, TrainError::Signal(_)));
    }
}
