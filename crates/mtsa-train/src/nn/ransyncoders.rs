//! RANSynCoders: synchronised random-subspace quantile autoencoders.
//!
//! Training runs per series, in stages:
//!
//! 1. min-max scale the series (the scaler is refitted per series);
//! 2. on the first series, unless `freq_init` is given, warm up a
//!    [`FrequencyCoder`] and pick common oscillations from the periodogram
//!    of its latent trace;
//! 3. warm up the [`SinusoidalCoder`] and optionally make the first
//!    amplitudes non-negative;
//! 4. for every batch of every epoch take one sinusoid step, synchronise the
//!    batch with the updated parameters and take one bound step.
//!
//! When synchronisation is off (configured, or no usable oscillation was
//! found) stages 2 and 3 are skipped and the bounds see the scaled input.

use std::path::Path;

use ndarray::{s, Array2, Array3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tch::nn::{self, OptimizerConfig};
use tch::{Device, Kind, Tensor};
use tracing::{debug, info, warn};

use mtsa_signal::{time_index, MinMaxScaler};

use crate::bundle::{FittedState, ModelBundle};
use crate::config::RanSynConfig;
use crate::dataset::{batch_ranges, check_series, prepare_signal};
use crate::error::{ensure_finite, DatasetError, TrainError, TrainResult};
use crate::experiment::{EpochRecord, ExperimentLog, Stage};
use crate::frequency::{select_frequencies, FrequencyDecision, FrequencySearch};
use crate::losses::quantile_loss_t;
use crate::nn::freqcoder::{self, FrequencyCoder};
use crate::nn::rancoders::{self, draw_subsets, scalar, RanCoders};
use crate::nn::sincoder::{self, SinusoidalCoder};
use crate::nn::{select_device, to_array3, to_tensor};
use crate::pipeline::Detector;
use crate::scoring::bound_flag_rate;
use crate::sync::SinusoidParams;

/// Output of [`RanSynCoders::predict`] for one series.
#[derive(Debug, Clone)]
pub struct Prediction {
    /// Fitted sinusoid on the series' time grid, `(samples, channels)`;
    /// `None` without synchronisation.
    pub sinusoid: Option<Array2<f32>>,
    /// Input as seen by the bounds (synchronised, or just scaled),
    /// `(samples, channels)`.
    pub synchronized: Array2<f32>,
    /// Scaled input before synchronisation, `(samples, channels)`.
    pub input: Array2<f32>,
    /// Upper bounds, `(samples, members, channels)`.
    pub upper: Array3<f32>,
    /// Lower bounds, `(samples, members, channels)`.
    pub lower: Array3<f32>,
}

struct Fitted {
    n_channels: usize,
    scaler: MinMaxScaler,
    synchronize: bool,
    freq_init: Option<Vec<f64>>,
    freqcoder: Option<FrequencyCoder>,
    sincoder: Option<SinusoidalCoder>,
    rancoders: RanCoders,
}

fn mean(v: &[f64]) -> f64 {
    if v.is_empty() {
        0.0
    } else {
        v.iter().sum::<f64>() / v.len() as f64
    }
}

/// The full detector.
///
/// ```no_run
/// use mtsa_train::config::RanSynConfig;
/// use mtsa_train::dataset::{SyntheticConfig, SyntheticSeries};
/// use mtsa_train::nn::ransyncoders::RanSynCoders;
///
/// let data = SyntheticSeries::generate(&SyntheticConfig::default());
/// let config = RanSynConfig { mono: false, max_features: 2, ..Default::default() };
/// let mut model = RanSynCoders::new(config).unwrap();
/// model.fit(&data.normal()).unwrap();
/// let scores = model.score_samples(&data.series).unwrap();
/// assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
/// ```
pub struct RanSynCoders {
    config: RanSynConfig,
    device: Device,
    state: Option<Fitted>,
    log: ExperimentLog,
}

impl RanSynCoders {
    /// Unfitted model.
    pub fn new(config: RanSynConfig) -> TrainResult<Self> {
        config.validate()?;
        let device = select_device(config.use_gpu);
        Ok(RanSynCoders {
            config,
            device,
            state: None,
            log: ExperimentLog::new(),
        })
    }

    /// Hyper-parameters.
    pub fn config(&self) -> &RanSynConfig {
        &self.config
    }

    /// Per-epoch metrics of the last `fit`.
    pub fn log(&self) -> &ExperimentLog {
        &self.log
    }

    /// Whether the fitted model synchronises its input. `None` before `fit`.
    pub fn synchronizes(&self) -> Option<bool> {
        self.state.as_ref().map(|s| s.synchronize)
    }

    /// Angular frequencies in use, if synchronising.
    pub fn frequencies(&self) -> Option<&[f64]> {
        self.state.as_ref().and_then(|s| s.freq_init.as_deref())
    }

    /// Current sinusoid parameters, if synchronising.
    pub fn sinusoid_params(&self) -> TrainResult<Option<SinusoidParams>> {
        let state = self.state.as_ref().ok_or(TrainError::NotFitted)?;
        state.sincoder.as_ref().map(SinusoidalCoder::params).transpose()
    }

    /// Train on `series`, each `(time, channels)`.
    pub fn fit(&mut self, series: &[Array2<f32>]) -> TrainResult<()> {
        let cfg = self.config.clone();
        let prepared: Vec<Array2<f32>> = series
            .iter()
            .map(|s| prepare_signal(s, cfg.mono, cfg.sampling_rate))
            .collect();
        let d = check_series(&prepared)?;
        cfg.validate_channels(d)?;

        tch::manual_seed(cfg.seed as i64);
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let subsets = draw_subsets(&mut rng, d, cfg.n_estimators, cfg.max_features);
        let ran = RanCoders::new(&cfg, d, subsets, self.device)?;
        let mut ran_opt = nn::Adam::default().build(ran.var_store(), cfg.bounds_learning_rate)?;

        let mut log = ExperimentLog::new();
        let mut scaler = MinMaxScaler::new();
        let mut synchronize = cfg.synchronize;
        let mut freqs = cfg.freq_init.clone();
        let mut freqcoder = None;
        let mut sincoder: Option<(SinusoidalCoder, nn::Optimizer)> = None;
        let delta = cfg.delta;

        info!(series = prepared.len(), channels = d, members = cfg.n_estimators, "RANSynCoders training started");

        for (ds, raw) in prepared.iter().enumerate() {
            let x = scaler.fit_transform(raw)?;
            let n = x.nrows();
            let t = time_index(n, d, cfg.sampling_rate as f64)?;

            if synchronize && freqs.is_none() {
                let (coder, decision) = self.estimate_frequencies(&x, ds, &mut log)?;
                freqcoder = Some(coder);
                match decision {
                    FrequencyDecision::Synchronize { angular } => freqs = Some(angular),
                    FrequencyDecision::Disable { reason } => {
                        warn!(reason, "synchronisation disabled");
                        synchronize = false;
                    }
                }
            }

            if synchronize {
                if let Some(w) = freqs.as_deref() {
                    if sincoder.is_none() {
                        let coder = SinusoidalCoder::new(d, w, cfg.trainable_freq, cfg.bias, self.device);
                        let opt = nn::Adam::default().build(coder.var_store(), cfg.learning_rate)?;
                        sincoder = Some((coder, opt));
                    }
                }
                if let Some((coder, opt)) = sincoder.as_mut() {
                    opt.set_lr(cfg.learning_rate);
                    for epoch in 1..=cfg.sin_warmup {
                        let mut losses = Vec::new();
                        for range in batch_ranges(n, cfg.batch_size) {
                            let xb = to_tensor(&x.slice(s![range.clone(), ..]), self.device);
                            let tb = to_tensor(&t.slice(s![range, ..]), self.device);
                            let loss = quantile_loss_t(0.5, &xb, &coder.forward(&tb)).mean(Kind::Float);
                            opt.zero_grad();
                            loss.backward();
                            opt.step();
                            losses.push(ensure_finite("sine_loss", scalar(&loss)?)?);
                        }
                        debug!(dataset = ds, epoch, loss = mean(&losses), "sinusoid warm-up");
                        let mut row = EpochRecord::new(ds, epoch, Stage::SineWarmup, mean(&losses));
                        row.sine_learning_rate = Some(cfg.learning_rate);
                        log.push(row);
                    }
                    if cfg.pos_amp {
                        let mut params = coder.params()?;
                        params.normalize_signs();
                        coder.set_params(&params)?;
                    }
                }
            }

            // the sinusoid follows the bounds at their learning rate
            if let Some((_, opt)) = sincoder.as_mut() {
                opt.set_lr(cfg.bounds_learning_rate);
            }
            let sine_lr = sincoder.as_ref().map(|_| cfg.bounds_learning_rate);

            for epoch in 1..=cfg.epochs {
                let (mut sine, mut upper, mut lower) = (Vec::new(), Vec::new(), Vec::new());
                for range in batch_ranges(n, cfg.batch_size) {
                    let xa = x.slice(s![range.clone(), ..]).to_owned();
                    let synced = match sincoder.as_mut() {
                        Some((coder, opt)) => {
                            let ta = t.slice(s![range, ..]).to_owned();
                            let xb = to_tensor(&xa, self.device);
                            let loss = quantile_loss_t(0.5, &xb, &coder.forward(&to_tensor(&ta, self.device)))
                                .mean(Kind::Float);
                            opt.zero_grad();
                            loss.backward();
                            opt.step();
                            sine.push(ensure_finite("sine_loss", scalar(&loss)?)?);
                            coder.params()?.synchronize(&xa, &ta)?
                        }
                        None => xa,
                    };

                    let yb = to_tensor(&synced, self.device);
                    let (hi, lo) = ran.forward(&yb);
                    let y = yb.unsqueeze(0);
                    let up = quantile_loss_t(1.0 - delta, &y, &hi).mean(Kind::Float);
                    let low = quantile_loss_t(delta, &y, &lo).mean(Kind::Float);
                    let total = &up + &low;
                    ran_opt.zero_grad();
                    total.backward();
                    ran_opt.step();
                    upper.push(ensure_finite("upper_bound_loss", scalar(&up)?)?);
                    lower.push(ensure_finite("lower_bound_loss", scalar(&low)?)?);
                }

                let mut row = EpochRecord::new(ds, epoch, Stage::Bounds, mean(&upper) + mean(&lower));
                row.upper_bound_loss = Some(mean(&upper));
                row.lower_bound_loss = Some(mean(&lower));
                row.sine_learning_rate = sine_lr;
                info!(
                    dataset = ds,
                    epoch,
                    sine_loss = mean(&sine),
                    upper = mean(&upper),
                    lower = mean(&lower),
                    "epoch finished"
                );
                log.push(row);
            }
        }

        info!(synchronize, "RANSynCoders training finished");
        self.state = Some(Fitted {
            n_channels: d,
            scaler,
            synchronize,
            freq_init: if synchronize { freqs } else { None },
            freqcoder,
            sincoder: sincoder.map(|(coder, _)| coder).filter(|_| synchronize),
            rancoders: ran,
        });
        self.log = log;
        Ok(())
    }

    fn estimate_frequencies(
        &self,
        x: &Array2<f32>,
        ds: usize,
        log: &mut ExperimentLog,
    ) -> TrainResult<(FrequencyCoder, FrequencyDecision)> {
        let cfg = &self.config;
        let coder = FrequencyCoder::new(x.ncols(), self.device);
        let mut opt = nn::Adam::default().build(coder.var_store(), cfg.learning_rate)?;
        for epoch in 1..=cfg.freq_warmup {
            let mut losses = Vec::new();
            for range in batch_ranges(x.nrows(), cfg.batch_size) {
                let xb = to_tensor(&x.slice(s![range, ..]), self.device);
                let (_, x_hat) = coder.forward(&xb);
                let loss = quantile_loss_t(0.5, &xb, &x_hat).mean(Kind::Float);
                opt.zero_grad();
                loss.backward();
                opt.step();
                losses.push(ensure_finite("reconstruction_loss", scalar(&loss)?)?);
            }
            debug!(dataset = ds, epoch, loss = mean(&losses), "frequency warm-up");
            log.push(EpochRecord::new(ds, epoch, Stage::FrequencyWarmup, mean(&losses)));
        }
        let z = coder.latent(x)?;
        let decision = select_frequencies(&z, &FrequencySearch::from_config(cfg))?;
        Ok((coder, decision))
    }

    /// Scale, synchronise and bound one series.
    pub fn predict(&self, series: &Array2<f32>) -> TrainResult<Prediction> {
        let state = self.state.as_ref().ok_or(TrainError::NotFitted)?;
        let raw = prepare_signal(series, self.config.mono, self.config.sampling_rate);
        if raw.ncols() != state.n_channels {
            return Err(DatasetError::channel_mismatch(state.n_channels, raw.ncols()).into());
        }
        if raw.nrows() == 0 {
            return Err(DatasetError::EmptySeries { index: 0 }.into());
        }
        let input = state.scaler.transform(&raw)?;
        let (n, d) = input.dim();

        let (sinusoid, synchronized) = match &state.sincoder {
            Some(coder) => {
                let t = time_index(n, d, self.config.sampling_rate as f64)?;
                let params = coder.params()?;
                (Some(params.evaluate(&t)?), params.synchronize(&input, &t)?)
            }
            None => (None, input.clone()),
        };

        let (hi, lo) = tch::no_grad(|| -> TrainResult<(Tensor, Tensor)> {
            let (mut his, mut los) = (Vec::new(), Vec::new());
            for range in batch_ranges(n, self.config.batch_size) {
                let (hi, lo) = state
                    .rancoders
                    .forward(&to_tensor(&synchronized.slice(s![range, ..]), self.device));
                his.push(hi);
                los.push(lo);
            }
            Ok((Tensor::cat(&his, 1), Tensor::cat(&los, 1)))
        })?;

        // (E, N, D) -> (N, E, D)
        let reorder = |t: &Tensor| -> TrainResult<Array3<f32>> { to_array3(&t.permute([1, 0, 2]).contiguous()) };
        Ok(Prediction {
            sinusoid,
            synchronized,
            input,
            upper: reorder(&hi)?,
            lower: reorder(&lo)?,
        })
    }

    /// Bounds of `series` mapped back to the scaled, unsynchronised frame,
    /// as `(upper, lower)`.
    pub fn predict_desynchronize(&self, series: &Array2<f32>) -> TrainResult<(Array3<f32>, Array3<f32>)> {
        let params = self.require_sync("predict_desynchronize")?;
        let p = self.predict(series)?;
        params.predict_desynchronize(&p.input, &p.synchronized, &p.upper, &p.lower)
    }

    /// Scale the channel axis of `e` `(samples, members, channels)` back to
    /// the unsynchronised frame.
    pub fn desynchronize(&self, e: &Array3<f32>) -> TrainResult<Array3<f32>> {
        self.require_sync("desynchronize")?.desynchronize(e)
    }

    fn require_sync(&self, method: &'static str) -> TrainResult<SinusoidParams> {
        let state = self.state.as_ref().ok_or(TrainError::NotFitted)?;
        match &state.sincoder {
            Some(coder) if state.synchronize => coder.params(),
            _ => Err(TrainError::sync_disabled(method)),
        }
    }

    /// Bound-violation rate per series, in `[0, 1]`.
    pub fn score_samples(&self, series: &[Array2<f32>]) -> TrainResult<Vec<f32>> {
        series
            .iter()
            .map(|s| {
                let p = self.predict(s)?;
                bound_flag_rate(&p.synchronized, &p.upper, &p.lower)
            })
            .collect()
    }

    /// Write the fitted model as a gzip-compressed JSON bundle.
    pub fn save(&self, path: &Path) -> TrainResult<()> {
        let state = self.state.as_ref().ok_or(TrainError::NotFitted)?;
        let mut networks = Vec::new();
        if let Some(coder) = &state.freqcoder {
            networks.push(coder.to_record()?);
        }
        if let Some(coder) = &state.sincoder {
            networks.push(coder.to_record()?);
        }
        networks.push(state.rancoders.to_record()?);

        let fitted = FittedState {
            n_channels: state.n_channels,
            scaler: state.scaler.clone(),
            synchronize: state.synchronize,
            freq_init: state.freq_init.clone(),
            sinusoid: self.sinusoid_params()?,
        };
        ModelBundle::new(self.config.clone(), fitted, networks).save(path)?;
        info!(path = %path.display(), "bundle saved");
        Ok(())
    }

    /// Rebuild a fitted model from a bundle written by [`save`](Self::save).
    pub fn load(path: &Path) -> TrainResult<Self> {
        let bundle = ModelBundle::load(path)?;
        let mut model = RanSynCoders::new(bundle.config.clone())?;
        let device = model.device;
        let missing = |name: &str| TrainError::bundle(format!("missing network `{name}`"), Some(path.to_path_buf()));

        let freqcoder = bundle
            .network(freqcoder::NAME)
            .map(|r| FrequencyCoder::from_record(r, device))
            .transpose()?;
        // the coder comes from its network record when present, otherwise it
        // is rebuilt from the stored parameters
        let sincoder = if bundle.state.synchronize {
            let params = bundle.state.sinusoid.as_ref();
            let coder = match (bundle.network(sincoder::NAME), params) {
                (Some(record), _) => SinusoidalCoder::from_record(record, device)?,
                (None, Some(p)) => {
                    let freq: Vec<f64> = p.freq.iter().map(|&w| f64::from(w)).collect();
                    let cfg = &bundle.config;
                    SinusoidalCoder::new(p.n_channels(), &freq, cfg.trainable_freq, cfg.bias, device)
                }
                (None, None) => return Err(missing(sincoder::NAME)),
            };
            if let Some(p) = params {
                coder.set_params(p)?;
            }
            Some(coder)
        } else {
            None
        };
        let record = bundle.network(rancoders::NAME).ok_or_else(|| missing(rancoders::NAME))?;
        let rancoders = RanCoders::from_record(record, device)?;

        let state = bundle.state;
        model.state = Some(Fitted {
            n_channels: state.n_channels,
            scaler: state.scaler,
            synchronize: state.synchronize,
            freq_init: state.freq_init,
            freqcoder,
            sincoder,
            rancoders,
        });
        Ok(model)
    }
}

impl Detector for RanSynCoders {
    fn fit(&mut self, series: &[Array2<f32>]) -> TrainResult<()> {
        RanSynCoders::fit(self, series)
    }

    fn score_samples(&self, series: &[Array2<f32>]) -> TrainResult<Vec<f32>> {
        RanSynCoders::score_samples(self, series)
    }
}
