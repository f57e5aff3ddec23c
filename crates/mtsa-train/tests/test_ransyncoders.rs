//! End-to-end tests for [`mtsa_train::nn::ransyncoders::RanSynCoders`].
//!
//! Every test needs the `tch-backend` feature and runs on the CPU.

#[cfg(feature = "tch-backend")]
mod tch_tests {
    use mtsa_signal::roc_auc;
    use mtsa_train::bundle::ModelBundle;
    use mtsa_train::config::RanSynConfig;
    use mtsa_train::dataset::{SyntheticConfig, SyntheticSeries};
    use mtsa_train::error::TrainError;
    use mtsa_train::experiment::Stage;
    use mtsa_train::nn::ransyncoders::RanSynCoders;
    use mtsa_train::nn::sincoder;
    use mtsa_train::pipeline::{Detector, MinMaxScale, Pipeline};
    use ndarray::Array3;
    use tempfile::tempdir;

    fn synthetic() -> SyntheticSeries {
        SyntheticSeries::generate(&SyntheticConfig::default())
    }

    fn unsynchronised() -> RanSynConfig {
        RanSynConfig {
            synchronize: false,
            mono: false,
            max_features: 3,
            n_estimators: 5,
            latent_dim: 2,
            epochs: 3,
            ..Default::default()
        }
    }

    #[test]
    fn separates_square_wave_anomalies() {
        let data = synthetic();
        let mut model = RanSynCoders::new(unsynchronised()).unwrap();
        model.fit(&data.normal()).unwrap();

        let scores = model.score_samples(&data.series).unwrap();
        assert_eq!(scores.len(), data.series.len());
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));

        let scores: Vec<f64> = scores.iter().map(|&s| f64::from(s)).collect();
        let auc = roc_auc(&scores, &data.labels).unwrap();
        assert!(auc > 0.8, "AUC = {auc}");
    }

    fn synchronised() -> RanSynConfig {
        RanSynConfig {
            mono: false,
            max_features: 2,
            n_estimators: 3,
            epochs: 2,
            sin_warmup: 2,
            freq_init: Some(vec![2.0 * std::f64::consts::PI * 128.0]),
            ..Default::default()
        }
    }

    #[test]
    fn synchronised_training_yields_unit_interval_scores() {
        let data = synthetic();
        let train: Vec<_> = data.normal().into_iter().take(3).collect();
        let mut model = RanSynCoders::new(synchronised()).unwrap();
        model.fit(&train).unwrap();

        assert_eq!(model.synchronizes(), Some(true));
        assert_eq!(model.frequencies().map(<[f64]>::len), Some(1));
        assert_eq!(model.log().stage(Stage::FrequencyWarmup).count(), 0);
        assert_eq!(model.log().stage(Stage::SineWarmup).count(), 3 * 2);
        assert_eq!(model.log().stage(Stage::Bounds).count(), 3 * 2);

        let series = &data.series[0];
        let (upper, lower) = model.predict_desynchronize(series).unwrap();
        let members = model.config().n_estimators;
        assert_eq!(upper.dim(), (series.nrows(), members, series.ncols()));
        assert_eq!(lower.dim(), upper.dim());
        assert!(upper.iter().chain(lower.iter()).all(|v| v.is_finite()));

        let p = model.predict(series).unwrap();
        assert!(p.sinusoid.is_some());
        assert_eq!(p.synchronized.dim(), p.input.dim());

        let scores = model.score_samples(&data.series[..4]).unwrap();
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn sinusoid_trains_at_bound_rate_after_warmup() {
        let data = synthetic();
        let train: Vec<_> = data.normal().into_iter().take(2).collect();
        let cfg = RanSynConfig {
            learning_rate: 1e-3,
            bounds_learning_rate: 1e-2,
            ..synchronised()
        };
        let mut model = RanSynCoders::new(cfg).unwrap();
        model.fit(&train).unwrap();

        let warmup: Vec<_> = model.log().stage(Stage::SineWarmup).collect();
        assert!(!warmup.is_empty());
        assert!(warmup.iter().all(|r| r.sine_learning_rate == Some(1e-3)));
        let bounds: Vec<_> = model.log().stage(Stage::Bounds).collect();
        assert!(!bounds.is_empty());
        assert!(bounds.iter().all(|r| r.sine_learning_rate == Some(1e-2)));
    }

    #[test]
    fn unsynchronised_model_refuses_desynchronisation() {
        let data = synthetic();
        let train: Vec<_> = data.normal().into_iter().take(2).collect();
        let cfg = RanSynConfig { epochs: 1, ..unsynchronised() };
        let mut model = RanSynCoders::new(cfg).unwrap();
        model.fit(&train).unwrap();

        assert_eq!(model.synchronizes(), Some(false));
        assert!(model.log().stage(Stage::Bounds).all(|r| r.sine_learning_rate.is_none()));
        assert!(matches!(
            model.predict_desynchronize(&data.series[0]),
            Err(TrainError::SynchronizationDisabled { .. })
        ));
        let e = Array3::<f32>::zeros((3, 5, data.series[0].ncols()));
        assert!(matches!(model.desynchronize(&e), Err(TrainError::SynchronizationDisabled { .. })));
    }

    #[test]
    fn bundle_round_trip_reproduces_scores() {
        let data = synthetic();
        let train: Vec<_> = data.normal().into_iter().take(2).collect();
        let cfg = RanSynConfig {
            mono: false,
            max_features: 2,
            n_estimators: 2,
            epochs: 1,
            sin_warmup: 1,
            freq_init: Some(vec![2.0 * std::f64::consts::PI * 128.0]),
            ..Default::default()
        };
        let mut model = RanSynCoders::new(cfg).unwrap();
        model.fit(&train).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("model.json.gz");
        model.save(&path).unwrap();
        let restored = RanSynCoders::load(&path).unwrap();

        assert_eq!(restored.synchronizes(), model.synchronizes());
        assert_eq!(restored.frequencies(), model.frequencies());
        let before = model.score_samples(&data.series[..5]).unwrap();
        let after = restored.score_samples(&data.series[..5]).unwrap();
        for (a, b) in before.iter().zip(after.iter()) {
            assert!((a - b).abs() <= 1e-5, "{a} vs {b}");
        }

        let p = model.predict(&data.series[0]).unwrap();
        let q = restored.predict(&data.series[0]).unwrap();
        for (a, b) in p.upper.iter().zip(q.upper.iter()) {
            assert!((a - b).abs() <= 1e-5);
        }
    }

    #[test]
    fn sinusoid_is_rebuilt_from_stored_parameters() {
        let data = synthetic();
        let train: Vec<_> = data.normal().into_iter().take(2).collect();
        let cfg = RanSynConfig { epochs: 1, ..synchronised() };
        let mut model = RanSynCoders::new(cfg).unwrap();
        model.fit(&train).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("model.json.gz");
        model.save(&path).unwrap();
        let mut bundle = ModelBundle::load(&path).unwrap();
        assert!(bundle.state.sinusoid.is_some());
        bundle.networks.retain(|n| n.name != sincoder::NAME);
        bundle.save(&path).unwrap();

        let restored = RanSynCoders::load(&path).unwrap();
        assert_eq!(
            restored.sinusoid_params().unwrap(),
            model.sinusoid_params().unwrap()
        );
        let before = model.score_samples(&data.series[..3]).unwrap();
        let after = restored.score_samples(&data.series[..3]).unwrap();
        for (a, b) in before.iter().zip(after.iter()) {
            assert!((a - b).abs() <= 1e-5, "{a} vs {b}");
        }

        bundle.state.sinusoid = None;
        bundle.save(&path).unwrap();
        assert!(matches!(RanSynCoders::load(&path), Err(TrainError::Bundle { .. })));
    }

    #[test]
    fn runs_behind_a_pipeline() {
        let data = synthetic();
        let cfg = RanSynConfig { epochs: 1, ..unsynchronised() };
        let mut pipeline = Pipeline::new(RanSynCoders::new(cfg).unwrap()).with_stage(MinMaxScale::default());
        let train: Vec<_> = data.normal().into_iter().take(4).collect();
        pipeline.fit(&train).unwrap();
        assert_eq!(pipeline.stage_names(), vec!["min_max_scale"]);
        let scores = pipeline.score_samples(&data.series[..3]).unwrap();
        assert_eq!(scores.len(), 3);
    }

    #[test]
    fn load_of_missing_file_fails() {
        let dir = tempdir().unwrap();
        assert!(RanSynCoders::load(&dir.path().join("absent.json.gz")).is_err());
    }
}

#[cfg(not(feature = "tch-backend"))]
#[test]
fn tch_backend_not_enabled() {
    // Passes trivially; the model tests above are compiled out.
}
