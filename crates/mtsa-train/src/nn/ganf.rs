//! Graph-augmented normalizing flow and its constrained training loop.
//!
//! Each training window `(batch, sensors, time, 1)` is encoded per sensor by
//! an LSTM, mixed across sensors by one round of message passing over the
//! learned adjacency `A`, and scored by a conditional flow. Training
//! minimises
//!
//! ```text
//! −log p + ½·ρ·h(A)² + α·h(A),   h(A) = tr(exp(A ∘ A)) − K
//! ```
//!
//! with ρ and α driven by [`AugmentedLagrangian`]. After every optimiser
//! step `A` is clamped to `[0, 1]` with a zero diagonal.

use std::path::Path;

use ndarray::{s, Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tch::nn::{self, OptimizerConfig, VarStore};
use tch::{Device, Kind, Tensor};
use tracing::{debug, info, warn};

use crate::acyclicity::{init_adjacency, AugmentedLagrangian, PenaltyStep};
use crate::config::GanfConfig;
use crate::dataset::{batch_ranges, GanfWindows};
use crate::error::{ensure_finite, DatasetError, TrainError, TrainResult};
use crate::experiment::{EpochRecord, ExperimentLog, Stage};
use crate::nn::encoder::TemporalEncoder;
use crate::nn::flow::{ConditionalFlow, FlowSpec};
use crate::nn::gnn::GraphPropagation;
use crate::nn::{select_device, to_array2, to_tensor};
use crate::pipeline::Detector;

const ADJACENCY: &str = "adjacency";
const BEST_ADJACENCY: &str = "best_adjacency";

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

struct GanfNetwork {
    vs: VarStore,
    encoder: TemporalEncoder,
    gnn: GraphPropagation,
    flow: ConditionalFlow,
    adjacency: Tensor,
    best: Tensor,
    network_params: Vec<Tensor>,
    hidden_size: i64,
    dropout: f64,
    n_channels: usize,
}

impl GanfNetwork {
    fn new(config: &GanfConfig, device: Device, init: &Array2<f32>) -> Self {
        let vs = VarStore::new(device);
        let root = vs.root();
        let input_size = config.input_size as i64;
        let hidden_size = config.hidden_size as i64;
        let k = init.nrows() as i64;

        let encoder = TemporalEncoder::new(&root / "rnn", input_size, hidden_size);
        let gnn = GraphPropagation::new(&root / "gcn", hidden_size, hidden_size);
        let flow = ConditionalFlow::new(
            &root / "nf",
            FlowSpec {
                kind: config.flow,
                n_blocks: config.n_blocks,
                input_size,
                hidden_size,
                n_hidden: config.n_hidden,
                cond_size: hidden_size,
                batch_norm: config.batch_norm,
            },
        );
        // group 1 carries no weight decay
        let adjacency = root.set_group(1).var_copy(ADJACENCY, &to_tensor(init, device));
        let best = root.zeros_no_train(BEST_ADJACENCY, &[k, k]);

        let network_params = vs
            .variables()
            .into_iter()
            .filter(|(name, t)| name != ADJACENCY && t.requires_grad())
            .map(|(_, t)| t)
            .collect();

        GanfNetwork {
            vs,
            encoder,
            gnn,
            flow,
            adjacency,
            best,
            network_params,
            hidden_size,
            dropout: config.dropout,
            n_channels: init.nrows(),
        }
    }

    /// Mean log-likelihood of a `(N, K, L, D)` batch under adjacency `a`.
    fn log_prob(&self, x: &Tensor, a: &Tensor, train: bool) -> TrainResult<Tensor> {
        let size = x.size();
        let (n, k, l, d) = (size[0], size[1], size[2], size[3]);
        let h = self.encoder.forward(&x.reshape([n * k, l, d]))?;
        // single-layer LSTM: dropout goes on its output, not between layers
        let h = h.dropout(self.dropout, train).reshape([n, k, l, self.hidden_size]);
        let h = self.gnn.forward(&h, a);

        let cond = h.reshape([-1, self.hidden_size]);
        let values = x.reshape([-1, d]);
        let per_window = self
            .flow
            .log_prob(&values, &cond, train)
            .reshape([n, -1])
            .mean_dim(&[1_i64][..], false, Kind::Float);
        Ok(per_window.mean(Kind::Float))
    }

    fn acyclicity(&self) -> Tensor {
        (&self.adjacency * &self.adjacency).linalg_matrix_exp().trace() - self.n_channels as f64
    }

    fn clip_network_grads(&self, clip: f64) {
        tch::no_grad(|| {
            for p in &self.network_params {
                let mut g = p.grad();
                if g.defined() {
                    let _ = g.clamp_(-clip, clip);
                }
            }
        });
    }

    fn project_adjacency(&self) {
        let mut a = self.adjacency.shallow_clone();
        tch::no_grad(|| {
            let _ = a.clamp_(0.0, 1.0);
            let _ = a.fill_diagonal_(0.0, false);
        });
    }

    fn store_best(&self, best: &Array2<f32>) {
        let src = to_tensor(best, self.best.device());
        let mut dst = self.best.shallow_clone();
        tch::no_grad(|| dst.copy_(&src));
    }
}

// ---------------------------------------------------------------------------
// Ganf
// ---------------------------------------------------------------------------

/// Graph-augmented normalizing flow anomaly detector.
///
/// ```rust,no_run
/// use mtsa_train::config::GanfConfig;
/// use mtsa_train::dataset::{SyntheticConfig, SyntheticSeries};
/// use mtsa_train::nn::ganf::Ganf;
///
/// let data = SyntheticSeries::generate(&SyntheticConfig::default());
/// let mut model = Ganf::new(GanfConfig { epochs: 2, ..Default::default() }).unwrap();
/// model.fit(&data.normal()).unwrap();
/// let scores = model.score_samples(&data.series).unwrap();
/// assert_eq!(scores.len(), data.series.len());
/// ```
pub struct Ganf {
    config: GanfConfig,
    device: Device,
    network: Option<GanfNetwork>,
    best_adjacency: Option<Array2<f32>>,
    log: ExperimentLog,
}

#[derive(Serialize)]
struct AdjacencyExport {
    best: Vec<Vec<f32>>,
    last: Vec<Vec<f32>>,
}

fn rows(a: &Array2<f32>) -> Vec<Vec<f32>> {
    a.rows().into_iter().map(|r| r.to_vec()).collect()
}

fn mean(v: &[f64]) -> f64 {
    if v.is_empty() {
        0.0
    } else {
        v.iter().sum::<f64>() / v.len() as f64
    }
}

impl Ganf {
    /// Unfitted model.
    pub fn new(config: GanfConfig) -> TrainResult<Self> {
        config.validate()?;
        let device = select_device(config.use_gpu);
        Ok(Ganf {
            config,
            device,
            network: None,
            best_adjacency: None,
            log: ExperimentLog::new(),
        })
    }

    /// Hyper-parameters.
    pub fn config(&self) -> &GanfConfig {
        &self.config
    }

    /// Per-epoch metrics of the last `fit`.
    pub fn log(&self) -> &ExperimentLog {
        &self.log
    }

    /// Sensor count seen during `fit`, if fitted.
    pub fn n_channels(&self) -> Option<usize> {
        self.network.as_ref().map(|n| n.n_channels)
    }

    /// Adjacency with the lowest running training loss.
    pub fn get_adjacent_matrix(&self) -> Option<&Array2<f32>> {
        self.best_adjacency.as_ref()
    }

    /// Adjacency as left by the last optimiser step.
    pub fn final_adjacency(&self) -> TrainResult<Array2<f32>> {
        let net = self.network.as_ref().ok_or(TrainError::NotFitted)?;
        to_array2(&net.adjacency)
    }

    /// Train on `series`, each `(time, sensors)`.
    pub fn fit(&mut self, series: &[Array2<f32>]) -> TrainResult<()> {
        let cfg = self.config.clone();
        let data = GanfWindows::build(series, cfg.window_size, cfg.stride)?;
        let k = data.n_channels();

        tch::manual_seed(cfg.seed as i64);
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let init = init_adjacency(k, &mut rng);
        let net = GanfNetwork::new(&cfg, self.device, &init);

        let mut lagrangian = AugmentedLagrangian::new(&cfg);
        let mut log = ExperimentLog::new();
        let mut best = init;
        let mut best_loss = f64::INFINITY;
        let mut h_last = crate::acyclicity::acyclicity(&best.mapv(f64::from));
        let mut epoch = 0usize;

        info!(series = data.len(), sensors = k, flow = ?cfg.flow, "GANF training started");

        for iteration in 0..cfg.max_iterations {
            info!(iteration = iteration + 1, of = cfg.max_iterations, "dual ascent iteration");

            while lagrangian.inner_loop_active() {
                let mut opt = nn::Adam::default().build(&net.vs, cfg.learning_rate)?;
                opt.set_weight_decay_group(0, cfg.weight_decay);
                opt.set_weight_decay_group(1, 0.0);

                for _ in 0..cfg.epochs {
                    epoch += 1;
                    let mut epoch_losses = Vec::new();

                    for (ds, windows) in data.iter().enumerate() {
                        let mut ds_losses = Vec::new();
                        for range in batch_ranges(windows.len_of(Axis(0)), cfg.batch_size) {
                            let x = to_tensor(&windows.slice(s![range, .., .., ..]), self.device);

                            opt.zero_grad();
                            let nll = -net.log_prob(&x, &net.adjacency, true)?;
                            let h = net.acyclicity();
                            let total = &nll + &h * &h * (0.5 * lagrangian.rho()) + &h * lagrangian.alpha();

                            let nll_v = ensure_finite("-log_prob", nll.f_double_value(&[])?)?;
                            let total_v = ensure_finite("total_loss", total.f_double_value(&[])?)?;
                            h_last = ensure_finite("h(A)", h.f_double_value(&[])?)?;

                            total.backward();
                            net.clip_network_grads(cfg.grad_clip);
                            opt.step();
                            net.project_adjacency();

                            epoch_losses.push(nll_v);
                            ds_losses.push(nll_v);
                            let running = mean(&epoch_losses);
                            if running < best_loss {
                                best_loss = running;
                                best = to_array2(&net.adjacency)?;
                            }
                            debug!(epoch, dataset = ds, nll = nll_v, total = total_v, h = h_last, "step");
                        }

                        let mut row = EpochRecord::new(ds, epoch, Stage::Flow, mean(&ds_losses));
                        row.rho = Some(lagrangian.rho());
                        row.alpha = Some(lagrangian.alpha());
                        row.h = Some(h_last);
                        log.push(row);
                    }

                    info!(
                        epoch,
                        neg_log_prob = mean(&epoch_losses),
                        h = h_last,
                        rho = lagrangian.rho(),
                        "epoch finished"
                    );
                }

                match lagrangian.check_progress(h_last)? {
                    PenaltyStep::Escalated { rho } => {
                        if !lagrangian.inner_loop_active() {
                            warn!(rho, "penalty reached rho_max, stopping inner loop");
                        }
                    }
                    PenaltyStep::Accepted => break,
                }
            }

            lagrangian.update_dual(h_last);
            if lagrangian.converged() {
                info!(h = lagrangian.h_prev(), rho = lagrangian.rho(), "acyclicity loop converged");
                break;
            }
        }

        net.store_best(&best);
        info!(best_neg_log_prob = best_loss, "GANF training finished");
        self.best_adjacency = Some(best);
        self.network = Some(net);
        self.log = log;
        Ok(())
    }

    /// Mean negative log-likelihood per series; higher is more anomalous.
    ///
    /// Each series is standardised and cut into single-step windows; the
    /// score is the negated mean of the per-batch log-likelihoods under the
    /// best adjacency.
    pub fn score_samples(&self, series: &[Array2<f32>]) -> TrainResult<Vec<f32>> {
        let net = self.network.as_ref().ok_or(TrainError::NotFitted)?;
        let best = self.best_adjacency.as_ref().ok_or(TrainError::NotFitted)?;
        let data = GanfWindows::build(series, 1, 1)?;
        if data.n_channels() != net.n_channels {
            return Err(DatasetError::channel_mismatch(net.n_channels, data.n_channels()).into());
        }
        let a = to_tensor(best, self.device);

        tch::no_grad(|| {
            data.iter()
                .map(|windows| -> TrainResult<f32> {
                    let mut batch_means = Vec::new();
                    for range in batch_ranges(windows.len_of(Axis(0)), self.config.batch_size) {
                        let x = to_tensor(&windows.slice(s![range, .., .., ..]), self.device);
                        batch_means.push(net.log_prob(&x, &a, false)?.f_double_value(&[])?);
                    }
                    Ok(-mean(&batch_means) as f32)
                })
                .collect()
        })
    }

    /// Write the best and final adjacency matrices as JSON.
    pub fn export_adjacency(&self, path: &Path) -> TrainResult<()> {
        let best = self.best_adjacency.as_ref().ok_or(TrainError::NotFitted)?;
        let export = AdjacencyExport {
            best: rows(best),
            last: rows(&self.final_adjacency()?),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&export)?)?;
        Ok(())
    }

    /// Save all network variables, both adjacencies included, in libtorch
    /// format.
    pub fn save(&self, path: &Path) -> TrainResult<()> {
        let net = self.network.as_ref().ok_or(TrainError::NotFitted)?;
        net.vs.save(path)?;
        Ok(())
    }

    /// Rebuild a fitted model from [`save`](Self::save) output. `config` must
    /// describe the same architecture.
    pub fn load(config: GanfConfig, path: &Path) -> TrainResult<Self> {
        let mut model = Ganf::new(config)?;
        let k = Tensor::load_multi(path)?
            .iter()
            .find(|(name, _)| name == ADJACENCY)
            .map(|(_, t)| t.size()[0] as usize)
            .ok_or_else(|| TrainError::bundle("weight file has no adjacency", Some(path.to_path_buf())))?;

        let mut net = GanfNetwork::new(&model.config, model.device, &Array2::zeros((k, k)));
        net.vs.load(path)?;
        model.best_adjacency = Some(to_array2(&net.best)?);
        model.network = Some(net);
        Ok(model)
    }
}

impl Detector for Ganf {
    fn fit(&mut self, series: &[Array2<f32>]) -> TrainResult<()> {
        Ganf::fit(self, series)
    }

    fn score_samples(&self, series: &[Array2<f32>]) -> TrainResult<Vec<f32>> {
        Ganf::score_samples(self, series)
    }
}
