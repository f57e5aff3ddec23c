//! End-to-end tests for [`mtsa_train::nn::ganf::Ganf`].
//!
//! Every test needs the `tch-backend` feature and runs on the CPU with a
//! deliberately small network.

#[cfg(feature = "tch-backend")]
mod tch_tests {
    use mtsa_train::config::{FlowKind, GanfConfig};
    use mtsa_train::dataset::{SyntheticConfig, SyntheticSeries};
    use mtsa_train::error::{DatasetError, TrainError};
    use mtsa_train::experiment::Stage;
    use mtsa_train::nn::ganf::Ganf;
    use ndarray::Array2;
    use tempfile::tempdir;

    fn data() -> SyntheticSeries {
        SyntheticSeries::generate(&SyntheticConfig {
            n_series: 4,
            n_samples: 120,
            n_channels: 3,
            anomaly_fraction: 0.25,
            ..Default::default()
        })
    }

    fn small(flow: FlowKind) -> GanfConfig {
        GanfConfig {
            n_blocks: 2,
            hidden_size: 8,
            flow,
            epochs: 1,
            max_iterations: 1,
            rho_max: 100.0,
            batch_size: 16,
            ..Default::default()
        }
    }

    fn assert_projected(a: &Array2<f32>) {
        assert!(a.diag().iter().all(|&v| v == 0.0), "diagonal must be zero");
        assert!(a.iter().all(|&v| (0.0..=1.0).contains(&v)), "entries must be in [0, 1]");
    }

    #[test]
    fn learned_adjacency_is_projected() {
        let data = data();
        let mut model = Ganf::new(small(FlowKind::Maf)).unwrap();
        model.fit(&data.normal()).unwrap();

        assert_eq!(model.n_channels(), Some(3));
        let best = model.get_adjacent_matrix().unwrap();
        assert_eq!(best.dim(), (3, 3));
        assert_projected(best);
        assert_projected(&model.final_adjacency().unwrap());

        assert!(model.log().stage(Stage::Flow).count() >= data.normal().len());
        assert!(model.log().rows().iter().all(|r| r.rho.is_some() && r.h.is_some()));
    }

    #[test]
    fn scores_are_finite_for_both_flows() {
        let data = data();
        for flow in [FlowKind::Maf, FlowKind::RealNvp] {
            let cfg = GanfConfig { batch_norm: flow == FlowKind::RealNvp, ..small(flow) };
            let mut model = Ganf::new(cfg).unwrap();
            model.fit(&data.normal()).unwrap();
            let scores = model.score_samples(&data.series).unwrap();
            assert_eq!(scores.len(), data.series.len());
            assert!(scores.iter().all(|s| s.is_finite()), "{flow:?}: {scores:?}");
        }
    }

    #[test]
    fn flows_without_hidden_layers_train() {
        let data = data();
        for flow in [FlowKind::Maf, FlowKind::RealNvp] {
            let mut model = Ganf::new(GanfConfig { n_hidden: 0, ..small(flow) }).unwrap();
            model.fit(&data.normal()).unwrap();
            let scores = model.score_samples(&data.series).unwrap();
            assert!(scores.iter().all(|s| s.is_finite()), "{flow:?}: {scores:?}");
        }
    }

    #[test]
    fn encoder_dropout_only_acts_in_training() {
        let data = data();
        let mut model = Ganf::new(GanfConfig { dropout: 0.5, ..small(FlowKind::Maf) }).unwrap();
        model.fit(&data.normal()).unwrap();
        let first = model.score_samples(&data.series).unwrap();
        let second = model.score_samples(&data.series).unwrap();
        assert!(first.iter().all(|s| s.is_finite()));
        assert_eq!(first, second);
    }

    #[test]
    fn scoring_before_fit_fails() {
        let model = Ganf::new(small(FlowKind::Maf)).unwrap();
        assert!(matches!(model.score_samples(&data().series), Err(TrainError::NotFitted)));
    }

    #[test]
    fn channel_mismatch_is_fatal() {
        let data = data();
        let mut model = Ganf::new(small(FlowKind::Maf)).unwrap();
        model.fit(&data.normal()).unwrap();
        let wide = Array2::<f32>::ones((50, 4));
        assert!(matches!(
            model.score_samples(&[wide]),
            Err(TrainError::Dataset(DatasetError::ChannelMismatch { .. }))
        ));
    }

    #[test]
    fn save_load_and_export_round_trip() {
        let data = data();
        let cfg = small(FlowKind::Maf);
        let mut model = Ganf::new(cfg.clone()).unwrap();
        model.fit(&data.normal()).unwrap();

        let dir = tempdir().unwrap();
        let weights = dir.path().join("ganf.ot");
        model.save(&weights).unwrap();
        let restored = Ganf::load(cfg, &weights).unwrap();
        assert_eq!(restored.get_adjacent_matrix(), model.get_adjacent_matrix());

        let before = model.score_samples(&data.series).unwrap();
        let after = restored.score_samples(&data.series).unwrap();
        for (a, b) in before.iter().zip(after.iter()) {
            assert!((a - b).abs() <= 1e-5, "{a} vs {b}");
        }

        let json = dir.path().join("adjacency.json");
        model.export_adjacency(&json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(parsed["best"].as_array().map(Vec::len), Some(3));
        assert_eq!(parsed["last"].as_array().map(Vec::len), Some(3));
    }
}

#[cfg(not(feature = "tch-backend"))]
#[test]
fn tch_backend_not_enabled() {
    // Passes trivially; the model tests above are compiled out.
}
