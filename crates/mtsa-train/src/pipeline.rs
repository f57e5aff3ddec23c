//! Typed preprocessing + detector pipelines.
//!
//! A [`Pipeline`] is an ordered list of [`Transformer`] stages followed by a
//! single [`Detector`]. Stages are fitted in order on the output of the
//! previous stage, then the detector is fitted on the fully transformed
//! series. Scoring replays the fitted stages before calling the detector.

use ndarray::{concatenate, Array2, ArrayView2, Axis};

use mtsa_signal::{standardize, MinMaxScaler};

use crate::dataset::check_series;
use crate::error::{TrainError, TrainResult};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A fitted-then-applied series transform.
pub trait Transformer {
    /// Short stage name used in logs.
    fn name(&self) -> &'static str;

    /// Learn any state from the training series.
    fn fit(&mut self, series: &[Array2<f32>]) -> TrainResult<()>;

    /// Apply the transform to one `(time, channels)` series.
    fn transform(&self, series: &Array2<f32>) -> TrainResult<Array2<f32>>;
}

/// An unsupervised anomaly detector over whole series.
pub trait Detector {
    /// Fit on normal training series.
    fn fit(&mut self, series: &[Array2<f32>]) -> TrainResult<()>;

    /// One score per series; higher means more anomalous.
    fn score_samples(&self, series: &[Array2<f32>]) -> TrainResult<Vec<f32>>;
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Per-series standardisation (global mean and standard deviation).
#[derive(Debug, Clone, Copy, Default)]
pub struct Standardize;

impl Transformer for Standardize {
    fn name(&self) -> &'static str {
        "standardize"
    }

    fn fit(&mut self, _series: &[Array2<f32>]) -> TrainResult<()> {
        Ok(())
    }

    fn transform(&self, series: &Array2<f32>) -> TrainResult<Array2<f32>> {
        Ok(standardize(series))
    }
}

/// Per-channel min-max scaling to `[0, 1]`, fitted on all training series
/// stacked along time.
#[derive(Debug, Clone, Default)]
pub struct MinMaxScale {
    scaler: MinMaxScaler,
}

impl MinMaxScale {
    /// Unfitted stage.
    pub fn new() -> Self {
        Self::default()
    }

    /// The underlying scaler.
    pub fn scaler(&self) -> &MinMaxScaler {
        &self.scaler
    }
}

impl Transformer for MinMaxScale {
    fn name(&self) -> &'static str {
        "min_max_scale"
    }

    fn fit(&mut self, series: &[Array2<f32>]) -> TrainResult<()> {
        let channels = check_series(series)?;
        let views: Vec<ArrayView2<f32>> = series.iter().map(|s| s.view()).collect();
        let stacked = concatenate(Axis(0), &views)
            .map_err(|_| TrainError::shape_mismatch(vec![channels], series[0].shape().to_vec()))?;
        self.scaler.fit(&stacked)?;
        Ok(())
    }

    fn transform(&self, series: &Array2<f32>) -> TrainResult<Array2<f32>> {
        Ok(self.scaler.transform(series)?)
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Ordered transforms feeding a detector.
pub struct Pipeline<D: Detector> {
    stages: Vec<Box<dyn Transformer>>,
    detector: D,
}

impl<D: Detector> Pipeline<D> {
    /// Pipeline with no preprocessing.
    pub fn new(detector: D) -> Self {
        Pipeline {
            stages: Vec::new(),
            detector,
        }
    }

    /// Append a stage; stages run in the order they are added.
    pub fn with_stage<T: Transformer + 'static>(mut self, stage: T) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// The wrapped detector.
    pub fn detector(&self) -> &D {
        &self.detector
    }

    /// Mutable access to the wrapped detector.
    pub fn detector_mut(&mut self) -> &mut D {
        &mut self.detector
    }

    /// Run every fitted stage over `series`.
    pub fn transform(&self, series: &[Array2<f32>]) -> TrainResult<Vec<Array2<f32>>> {
        series
            .iter()
            .map(|s| {
                self.stages
                    .iter()
                    .try_fold(s.clone(), |acc, stage| stage.transform(&acc))
            })
            .collect()
    }
}

impl<D: Detector> Detector for Pipeline<D> {
    fn fit(&mut self, series: &[Array2<f32>]) -> TrainResult<()> {
        let mut current: Vec<Array2<f32>> = series.to_vec();
        for stage in self.stages.iter_mut() {
            tracing::debug!(stage = stage.name(), "fitting pipeline stage");
            stage.fit(&current)?;
            current = current
                .iter()
                .map(|s| stage.transform(s))
                .collect::<TrainResult<_>>()?;
        }
        self.detector.fit(&current)
    }

    fn score_samples(&self, series: &[Array2<f32>]) -> TrainResult<Vec<f32>> {
        let transformed = self.transform(series)?;
        self.detector.score_samples(&transformed)
    }
}
