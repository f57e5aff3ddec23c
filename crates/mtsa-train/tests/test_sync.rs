//! Integration tests for [`mtsa_train::sync`] and the frequency search.

use approx::assert_abs_diff_eq;
use ndarray::{array, Array2, Array3};
use std::f64::consts::PI;

use mtsa_signal::time_index;
use mtsa_train::frequency::{select_frequencies, FrequencyDecision, FrequencySearch};
use mtsa_train::sync::SinusoidParams;

fn params() -> SinusoidParams {
    SinusoidParams::new(
        array![[1.0, 0.3], [-0.5, 0.2], [-2.0, 0.1]],
        array![[0.1, 0.0], [2.0, 0.5], [6.0, 1.0]],
        array![0.0, 0.5, -0.1],
        array![3.0, 9.0],
    )
    .unwrap()
}

#[test]
fn sign_normalisation_is_idempotent() {
    let mut once = params();
    once.normalize_signs();
    let mut twice = once.clone();
    twice.normalize_signs();
    assert_eq!(once, twice);
    assert!(once.amp.column(0).iter().all(|&a| a >= 0.0));
}

#[test]
fn sign_normalisation_keeps_the_modelled_signal() {
    let t = time_index(200, 3, 50.0).unwrap();
    let before = params().evaluate(&t).unwrap();
    let mut p = params();
    p.normalize_signs();
    let after = p.evaluate(&t).unwrap();
    for (a, b) in before.iter().zip(after.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-4);
    }
    // flipped channels 1 and 2 keep their displacement
    assert_eq!(p.disp, params().disp);
}

#[test]
fn synchronised_channels_share_first_phase() {
    let p = SinusoidParams::new(
        array![[1.0], [1.0]],
        array![[0.0], [1.5]],
        array![0.0, 0.0],
        array![2.0],
    )
    .unwrap();
    let t = time_index(100, 2, 20.0).unwrap();
    let x = p.evaluate(&t).unwrap();
    let synced = p.synchronize(&x, &t).unwrap();
    for row in synced.rows() {
        assert_abs_diff_eq!(row[0], row[1], epsilon = 1e-5);
    }
}

#[test]
fn desynchronize_is_per_channel_gain() {
    let p = params();
    let gain = p.desync_gain();
    let e = Array3::<f32>::ones((4, 2, 3));
    let out = p.desynchronize(&e).unwrap();
    for lane in out.lanes(ndarray::Axis(2)) {
        assert_eq!(lane.to_owned(), gain);
    }
    assert!(p.desynchronize(&Array3::ones((1, 1, 2))).is_err());
}

#[test]
fn frequency_search_finds_dominant_oscillation() {
    let fs = 100.0;
    let hz = 5.0;
    let z: Vec<f64> = (0..1000).map(|i| (2.0 * PI * hz * i as f64 / fs).sin()).collect();
    let search = FrequencySearch {
        min_periods: 3,
        max_freqs: 1,
        min_dist: 5,
        force: false,
        sampling_rate: fs,
    };
    match select_frequencies(&z, &search).unwrap() {
        FrequencyDecision::Synchronize { angular } => {
            assert_eq!(angular.len(), 1);
            assert_abs_diff_eq!(angular[0], 2.0 * PI * hz, epsilon = 2.0 * PI * 0.2);
        }
        other => panic!("expected synchronisation, got {other:?}"),
    }
}

#[test]
fn flat_trace_disables_synchronisation() {
    let search = FrequencySearch {
        min_periods: 3,
        max_freqs: 5,
        min_dist: 5,
        force: true,
        sampling_rate: 100.0,
    };
    let decision = select_frequencies(&vec![0.25; 500], &search).unwrap();
    assert!(matches!(decision, FrequencyDecision::Disable { .. }));
}

#[test]
fn shape_mismatch_is_rejected() {
    let p = params();
    let x = Array2::<f32>::zeros((10, 3));
    let t = Array2::<f32>::zeros((9, 3));
    assert!(p.synchronize(&x, &t).is_err());
}
