//! Dominant-frequency selection for synchronisation.
//!
//! The one-unit frequency coder compresses the training series into a single
//! latent trace `z`. Its periodogram tells whether the channels share
//! oscillations strong enough to synchronise on, and at which angular
//! frequencies.

use std::f64::consts::PI;

use mtsa_signal::{find_peaks, periodogram, PeakConfig};
use tracing::{info, warn};

use crate::config::RanSynConfig;
use crate::error::TrainResult;

const FLAT_EPS: f64 = 1e-12;

/// Peak-selection parameters, taken from [`RanSynConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencySearch {
    /// Lowest periodogram bin accepted as an oscillation.
    pub min_periods: usize,
    /// Maximum number of frequencies returned.
    pub max_freqs: usize,
    /// Minimum bin distance between peaks.
    pub min_dist: usize,
    /// Keep going when the strongest peak is below `min_periods`.
    pub force: bool,
    /// Samples per second of `z`.
    pub sampling_rate: f64,
}

impl FrequencySearch {
    /// Extract the search parameters from a model configuration.
    pub fn from_config(cfg: &RanSynConfig) -> Self {
        FrequencySearch {
            min_periods: cfg.min_periods,
            max_freqs: cfg.max_freqs,
            min_dist: cfg.min_dist,
            force: cfg.force_synchronization,
            sampling_rate: cfg.sampling_rate as f64,
        }
    }
}

/// Result of the frequency search.
#[derive(Debug, Clone, PartialEq)]
pub enum FrequencyDecision {
    /// Synchronise on these angular frequencies (rad/s), strongest first.
    Synchronize {
        /// `2π·f` for each selected peak.
        angular: Vec<f64>,
    },
    /// No usable common oscillation; synchronisation is switched off.
    Disable {
        /// Why the search gave up.
        reason: &'static str,
    },
}

/// Pick synchronisation frequencies from the latent trace `z`.
///
/// `z` is rescaled to `[−1, 1]`, its Hann periodogram computed and peaks at
/// least `min_dist` bins apart located. The `min_periods + max_freqs`
/// strongest peaks are ranked by power. If the strongest sits below
/// `min_periods` and `force` is off, or none of the first `min_periods`
/// ranked peaks reaches bin `min_periods`, synchronisation is disabled.
/// Otherwise up to `max_freqs` ranked peaks at bin `min_periods` or above
/// are returned.
///
/// The periodogram runs at `search.sampling_rate`, so bin `k` of an
/// `n`-sample trace maps to `2π·k·sampling_rate/n` rad/s. That is the unit
/// of [`time_index`](mtsa_signal::time_index) built at the same rate; with a
/// rate of `1.0` both sides count in samples instead of seconds.
pub fn select_frequencies(z: &[f64], search: &FrequencySearch) -> TrainResult<FrequencyDecision> {
    let lo = z.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = z.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(hi - lo > FLAT_EPS) {
        warn!("latent trace is flat, switching off synchronisation");
        return Ok(FrequencyDecision::Disable {
            reason: "latent trace is flat",
        });
    }
    let scaled: Vec<f64> = z.iter().map(|v| (v - lo) / (hi - lo) * 2.0 - 1.0).collect();

    let p = periodogram(&scaled, search.sampling_rate)?;
    let mut ranked = find_peaks(
        &p.psd,
        &PeakConfig {
            distance: search.min_dist,
            min_height: 0.0,
        },
    );
    ranked.sort_by(|&a, &b| p.psd[b].total_cmp(&p.psd[a]).then(a.cmp(&b)));
    ranked.truncate(search.min_periods + search.max_freqs);

    let Some(&strongest) = ranked.first() else {
        warn!("no periodogram peaks found, switching off synchronisation");
        return Ok(FrequencyDecision::Disable {
            reason: "no periodogram peaks",
        });
    };

    if strongest < search.min_periods && !search.force {
        warn!(bin = strongest, "dominant oscillation too slow, switching off synchronisation");
        return Ok(FrequencyDecision::Disable {
            reason: "dominant oscillation below min_periods",
        });
    }

    let qualifies = ranked
        .iter()
        .take(search.min_periods.max(1))
        .any(|&bin| bin >= search.min_periods);
    if !qualifies {
        warn!("no common oscillations found, switching off synchronisation");
        return Ok(FrequencyDecision::Disable {
            reason: "no peak at or above min_periods",
        });
    }

    let hz: Vec<f64> = ranked
        .iter()
        .filter(|&&bin| bin >= search.min_periods)
        .take(search.max_freqs)
        .map(|&bin| p.frequencies[bin])
        .collect();
    info!(frequencies_hz = ?hz, "common oscillations found");

    Ok(FrequencyDecision::Synchronize {
        angular: hz.iter().map(|f| 2.0 * PI * f).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search(force: bool) -> FrequencySearch {
        FrequencySearch {
            min_periods: 3,
            max_freqs: 2,
            min_dist: 5,
            force,
            sampling_rate: 1000.0,
        }
    }

    fn tones(n: usize, fs: f64, parts: &[(f64, f64)]) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let t = i as f64 / fs;
                parts.iter().map(|(f, a)| a * (2.0 * PI * f * t).sin()).sum()
            })
            .collect()
    }

    #[test]
    fn picks_strongest_tones_as_angular_frequencies() {
        let z = tones(1000, 1000.0, &[(50.0, 1.0), (120.0, 0.5)]);
        match select_frequencies(&z, &search(false)).unwrap() {
            FrequencyDecision::Synchronize { angular } => {
                assert_eq!(angular.len(), 2);
                assert!((angular[0] - 2.0 * PI * 50.0).abs() < 1e-6);
                assert!((angular[1] - 2.0 * PI * 120.0).abs() < 1e-6);
            }
            other => panic!("expected synchronisation, got {other:?}"),
        }
    }

    #[test]
    fn angular_frequencies_share_the_time_index_unit() {
        let z = tones(1000, 1000.0, &[(50.0, 1.0)]);
        for fs in [1.0, 1000.0] {
            let search = FrequencySearch { sampling_rate: fs, ..search(false) };
            let FrequencyDecision::Synchronize { angular } = select_frequencies(&z, &search).unwrap() else {
                panic!("expected synchronisation at rate {fs}");
            };
            // the tone completes 50 cycles over the 1000 grid points
            let t = mtsa_signal::time_index(1000, 1, fs).unwrap();
            let rebuilt: Vec<f64> = t.column(0).iter().map(|&ti| (angular[0] * f64::from(ti)).sin()).collect();
            for (a, b) in rebuilt.iter().zip(z.iter()) {
                assert!((a - b).abs() < 1e-3, "rate {fs}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn flat_trace_disables() {
        let z = vec![0.3; 256];
        assert!(matches!(
            select_frequencies(&z, &search(true)).unwrap(),
            FrequencyDecision::Disable { .. }
        ));
    }

    #[test]
    fn slow_dominant_oscillation_disables_unless_forced() {
        // one cycle over the record: the dominant peak sits in bin 1
        let z = tones(1000, 1000.0, &[(1.0, 1.0)]);
        assert!(matches!(
            select_frequencies(&z, &search(false)).unwrap(),
            FrequencyDecision::Disable { .. }
        ));
    }

    #[test]
    fn forced_search_uses_qualifying_secondary_peak() {
        let z = tones(1000, 1000.0, &[(1.0, 1.0), (80.0, 0.3)]);
        match select_frequencies(&z, &search(true)).unwrap() {
            FrequencyDecision::Synchronize { angular } => {
                assert!((angular[0] - 2.0 * PI * 80.0).abs() < 1e-6);
            }
            other => panic!("expected synchronisation, got {other:?}"),
        }
    }
}
