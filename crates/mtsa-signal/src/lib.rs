//! MTSA Signal Utilities
//!
//! CPU-side signal processing shared by the anomaly-detection models in
//! `mtsa-train`. Nothing in this crate touches an autograd backend; all
//! routines work on plain slices and `ndarray` buffers on the CPU.
//!
//! # Features
//!
//! - **Periodogram**: one-sided power spectral density via `rustfft`
//! - **Peak search**: local maxima with height and minimum-distance filters
//! - **Scaling**: per-channel min-max scaling and global standardisation
//! - **Windowing**: sliding windows over channel-indexed series and time grids
//! - **Metrics**: ROC-AUC for labelled score vectors
//!
//! # Example
//!
//! ```rust
//! use mtsa_signal::{find_peaks, periodogram, PeakConfig};
//!
//! let n = 512;
//! let signal: Vec<f64> = (0..n)
//!     .map(|i| (2.0 * std::f64::consts::PI * 8.0 * i as f64 / n as f64).sin())
//!     .collect();
//!
//! let p = periodogram(&signal, 1.0).unwrap();
//! let peaks = find_peaks(&p.psd, &PeakConfig { distance: 4, min_height: 1.0 });
//! assert_eq!(peaks, vec![8]);
//! ```

pub mod metrics;
pub mod peaks;
pub mod periodogram;
pub mod scaler;
pub mod window;

pub use metrics::roc_auc;
pub use peaks::{find_peaks, PeakConfig};
pub use periodogram::{periodogram, periodogram_with, Periodogram, Taper};
pub use scaler::{standardize, MinMaxScaler};
pub use window::{sliding_windows, time_index};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common result type for signal operations
pub type Result<T> = std::result::Result<T, SignalError>;

/// Unified error type for signal operations
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// The input signal is too short for the requested operation
    #[error("Signal too short: need at least {needed} samples, got {len}")]
    SignalTooShort {
        /// Minimum number of samples required
        needed: usize,
        /// Number of samples supplied
        len: usize,
    },

    /// The signal contains NaN or infinite samples
    #[error("Signal contains a non-finite sample at index {index}")]
    NonFinite {
        /// Position of the first offending sample
        index: usize,
    },

    /// Sampling rate must be strictly positive
    #[error("Invalid sampling rate: {0}")]
    InvalidSamplingRate(f64),

    /// Window parameters are inconsistent
    #[error("Invalid window: {0}")]
    InvalidWindow(String),

    /// Channel count differs from what a fitted transform expects
    #[error("Channel mismatch: fitted on {expected} channels, got {found}")]
    ChannelMismatch {
        /// Channels seen at fit time
        expected: usize,
        /// Channels in the offending input
        found: usize,
    },

    /// A transform was used before `fit`
    #[error("{0} used before fit")]
    NotFitted(&'static str),
}
