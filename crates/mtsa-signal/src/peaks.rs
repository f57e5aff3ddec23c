//! Peak search
//!
//! Local maxima of a 1-D sequence with a minimum-height filter and a minimum
//! index separation. Flat peaks (plateaus) report their midpoint; when two
//! peaks are closer than `distance`, the lower one is dropped.

/// Peak search parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakConfig {
    /// Minimum index separation between retained peaks (values below 2 keep
    /// every local maximum)
    pub distance: usize,
    /// Peaks lower than this are discarded
    pub min_height: f64,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            distance: 1,
            min_height: f64::NEG_INFINITY,
        }
    }
}

/// Indices of the retained peaks in ascending order.
pub fn find_peaks(x: &[f64], config: &PeakConfig) -> Vec<usize> {
    let peaks: Vec<usize> = local_maxima(x)
        .into_iter()
        .filter(|&p| x[p] >= config.min_height)
        .collect();

    if config.distance < 2 || peaks.len() < 2 {
        return peaks;
    }
    select_by_distance(x, &peaks, config.distance)
}

/// Strict local maxima; a plateau counts once, at its (lower) midpoint.
/// The first and last samples are never peaks.
fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if x.len() < 3 {
        return peaks;
    }
    let i_max = x.len() - 1;
    let mut i = 1;
    while i < i_max {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < i_max && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

fn select_by_distance(x: &[f64], peaks: &[usize], distance: usize) -> Vec<usize> {
    let n = peaks.len();
    let mut keep = vec![true; n];

    // Ascending by height; equal heights favour the later peak.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| x[peaks[a]].total_cmp(&x[peaks[b]]).then(a.cmp(&b)));

    for &j in order.iter().rev() {
        if !keep[j] {
            continue;
        }
        let mut k = j;
        while k > 0 && peaks[j] - peaks[k - 1] < distance {
            keep[k - 1] = false;
            k -= 1;
        }
        let mut k = j + 1;
        while k < n && peaks[k] - peaks[j] < distance {
            keep[k] = false;
            k += 1;
        }
    }

    peaks
        .iter()
        .zip(keep)
        .filter_map(|(&p, kept)| kept.then_some(p))
        .collect()
}
