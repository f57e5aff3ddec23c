//! Conditional normalizing flows: MAF and RealNVP.
//!
//! Both map `x` (`rows × D`) to a standard-normal `u` through a stack of
//! invertible blocks conditioned on `cond` (`rows × H`), accumulating
//! `log |det J|` so that
//!
//! ```text
//! log p(x | cond) = Σ_d [ −u_d² / 2 − log(2π) / 2 ] + Σ_blocks log |det J|
//! ```
//!
//! Blocks may be interleaved with a flow batch-norm that uses batch
//! statistics in training and running statistics otherwise.

use std::f64::consts::PI;

use tch::nn::{self, Module};
use tch::{Kind, Tensor};

use crate::config::{Activation, FlowKind};
use crate::nn::activate;

// ---------------------------------------------------------------------------
// MADE
// ---------------------------------------------------------------------------

/// Degrees of the input, hidden and output units of a MADE block.
///
/// With a single input dimension the hidden units get degree −1, so they
/// never see `x` and the output depends on the conditioning only.
pub fn made_degrees(input_size: usize, hidden_size: usize, input_degrees: Option<&[i64]>) -> (Vec<i64>, Vec<i64>, Vec<i64>) {
    let d = input_size as i64;
    let input: Vec<i64> = match input_degrees {
        Some(deg) => deg.to_vec(),
        None => (0..d).collect(),
    };
    let hidden: Vec<i64> = (0..hidden_size as i64)
        .map(|i| if d > 1 { i % (d - 1) } else { -1 })
        .collect();
    let output: Vec<i64> = input.iter().map(|&v| v % d - 1).collect();
    (input, hidden, output)
}

/// Connectivity mask `out × in`: 1 where the output degree is at least the
/// input degree.
pub fn degree_mask(from: &[i64], to: &[i64]) -> Vec<f32> {
    to.iter()
        .flat_map(|&o| from.iter().map(move |&i| if o >= i { 1.0 } else { 0.0 }))
        .collect()
}

struct MaskedLinear {
    linear: nn::Linear,
    mask: Tensor,
    cond_w: Option<Tensor>,
}

impl MaskedLinear {
    fn new(p: nn::Path, in_dim: i64, out_dim: i64, mask: Vec<f32>, cond_size: Option<i64>) -> Self {
        let mask = Tensor::from_slice(&mask).view([out_dim, in_dim]).to_device(p.device());
        let cond_w = cond_size.map(|c| {
            p.var(
                "cond_label_w",
                &[out_dim, c],
                nn::Init::Uniform {
                    lo: 0.0,
                    up: 1.0 / (c as f64).sqrt(),
                },
            )
        });
        MaskedLinear {
            linear: nn::linear(&p / "linear", in_dim, out_dim, Default::default()),
            mask,
            cond_w,
        }
    }

    fn forward(&self, x: &Tensor, cond: Option<&Tensor>) -> Tensor {
        let w = &self.linear.ws * &self.mask;
        let mut out = x.matmul(&w.tr());
        if let Some(b) = &self.linear.bs {
            out = out + b;
        }
        match (cond, &self.cond_w) {
            (Some(c), Some(cw)) => out + c.matmul(&cw.tr()),
            _ => out,
        }
    }
}

/// Masked autoencoder for distribution estimation with an affine output.
pub struct Made {
    input: MaskedLinear,
    hidden: Vec<MaskedLinear>,
    output: MaskedLinear,
    activation: Activation,
    input_degrees: Vec<i64>,
}

impl Made {
    /// Build a block; `input_degrees` defaults to `0..D`.
    pub fn new(
        p: nn::Path,
        input_size: i64,
        hidden_size: i64,
        n_hidden: usize,
        cond_size: i64,
        activation: Activation,
        input_degrees: Option<&[i64]>,
    ) -> Self {
        let (inp, hid, out) = made_degrees(input_size as usize, hidden_size as usize, input_degrees);
        let hidden = (0..n_hidden)
            .map(|i| {
                MaskedLinear::new(
                    &p / format!("hidden{i}"),
                    hidden_size,
                    hidden_size,
                    degree_mask(&hid, &hid),
                    None,
                )
            })
            .collect();
        let mut out_mask = degree_mask(&hid, &out);
        out_mask.extend_from_within(..);
        Made {
            input: MaskedLinear::new(&p / "input", input_size, hidden_size, degree_mask(&inp, &hid), Some(cond_size)),
            hidden,
            output: MaskedLinear::new(&p / "output", hidden_size, 2 * input_size, out_mask, None),
            activation,
            input_degrees: inp,
        }
    }

    /// Degrees of this block's inputs.
    pub fn input_degrees(&self) -> &[i64] {
        &self.input_degrees
    }

    /// `u = (x − m)·exp(−log a)`, `log |det J| = −log a`.
    pub fn forward(&self, x: &Tensor, cond: &Tensor) -> (Tensor, Tensor) {
        let mut h = self.input.forward(x, Some(cond));
        for layer in &self.hidden {
            h = layer.forward(&activate(self.activation, &h), None);
        }
        let out = self.output.forward(&activate(self.activation, &h), None);
        let parts = out.chunk(2, 1);
        let (m, log_a) = (&parts[0], &parts[1]);
        let u = (x - m) * (-log_a).exp();
        (u, -log_a)
    }
}

// ---------------------------------------------------------------------------
// RealNVP coupling
// ---------------------------------------------------------------------------

/// Affine coupling layer with a fixed binary mask.
pub struct Coupling {
    s_net: Vec<nn::Linear>,
    t_net: Vec<nn::Linear>,
    mask: Tensor,
    inv_mask: Tensor,
}

fn coupling_net(p: nn::Path, input_size: i64, hidden_size: i64, n_hidden: usize, cond_size: i64) -> Vec<nn::Linear> {
    let mut layers = vec![nn::linear(&p / "0", input_size + cond_size, hidden_size, Default::default())];
    for i in 0..n_hidden {
        layers.push(nn::linear(&p / (i + 1), hidden_size, hidden_size, Default::default()));
    }
    layers.push(nn::linear(&p / (n_hidden + 1), hidden_size, input_size, Default::default()));
    layers
}

fn run_net(layers: &[nn::Linear], x: &Tensor, activation: Activation) -> Tensor {
    let mut h = layers[0].forward(x);
    for layer in &layers[1..] {
        h = layer.forward(&activate(activation, &h));
    }
    h
}

impl Coupling {
    /// `mask[d] = 1` marks dimensions passed through unchanged.
    pub fn new(p: nn::Path, input_size: i64, hidden_size: i64, n_hidden: usize, cond_size: i64, mask: &[f32]) -> Self {
        let mask = Tensor::from_slice(mask).to_device(p.device());
        let inv_mask = mask.ones_like() - &mask;
        Coupling {
            s_net: coupling_net(&p / "s_net", input_size, hidden_size, n_hidden, cond_size),
            t_net: coupling_net(&p / "t_net", input_size, hidden_size, n_hidden, cond_size),
            mask,
            inv_mask,
        }
    }

    /// `u = m·x + (1 − m)·(x − t)·exp(−s)`, `log |det J| = −(1 − m)·s`.
    pub fn forward(&self, x: &Tensor, cond: &Tensor) -> (Tensor, Tensor) {
        let mx = x * &self.mask;
        let inp = Tensor::cat(&[cond, &mx], 1);
        let s = run_net(&self.s_net, &inp, Activation::Tanh);
        let t = run_net(&self.t_net, &inp, Activation::Relu);
        let u = &mx + &self.inv_mask * (x - t) * (-&s).exp();
        (u, -(&self.inv_mask * s))
    }
}

// ---------------------------------------------------------------------------
// Flow batch-norm
// ---------------------------------------------------------------------------

const BN_MOMENTUM: f64 = 0.9;
const BN_EPS: f64 = 1e-5;

/// Invertible batch normalisation with a learned scale and shift.
pub struct FlowBatchNorm {
    log_gamma: Tensor,
    beta: Tensor,
    running_mean: Tensor,
    running_var: Tensor,
}

impl FlowBatchNorm {
    /// Zero-initialised scale and shift, unit running variance.
    pub fn new(p: nn::Path, input_size: i64) -> Self {
        FlowBatchNorm {
            log_gamma: p.zeros("log_gamma", &[input_size]),
            beta: p.zeros("beta", &[input_size]),
            running_mean: p.zeros_no_train("running_mean", &[input_size]),
            running_var: p.ones_no_train("running_var", &[input_size]),
        }
    }

    /// Normalise `x`; in training mode the running statistics are updated.
    pub fn forward_t(&self, x: &Tensor, train: bool) -> (Tensor, Tensor) {
        let (mean, var) = if train {
            let mean = x.mean_dim(&[0_i64][..], false, Kind::Float);
            let var = x.var_dim(&[0_i64][..], true, false);
            let mut rm = self.running_mean.shallow_clone();
            let mut rv = self.running_var.shallow_clone();
            tch::no_grad(|| {
                let m = &rm * BN_MOMENTUM + mean.detach() * (1.0 - BN_MOMENTUM);
                let v = &rv * BN_MOMENTUM + var.detach() * (1.0 - BN_MOMENTUM);
                rm.copy_(&m);
                rv.copy_(&v);
            });
            (mean, var)
        } else {
            (self.running_mean.shallow_clone(), self.running_var.shallow_clone())
        };
        let x_hat = (x - &mean) / (&var + BN_EPS).sqrt();
        let y = self.log_gamma.exp() * x_hat + &self.beta;
        let log_det = &self.log_gamma - (&var + BN_EPS).log() * 0.5;
        (y, log_det.expand_as(x))
    }
}

// ---------------------------------------------------------------------------
// ConditionalFlow
// ---------------------------------------------------------------------------

enum Block {
    Made(Made),
    Coupling(Coupling),
    Norm(FlowBatchNorm),
}

/// Stack of MAF or RealNVP blocks giving exact conditional log-densities.
pub struct ConditionalFlow {
    blocks: Vec<Block>,
}

/// Shape of a [`ConditionalFlow`].
#[derive(Debug, Clone, Copy)]
pub struct FlowSpec {
    /// MAF or RealNVP.
    pub kind: FlowKind,
    /// Number of MADE or coupling blocks.
    pub n_blocks: usize,
    /// Dimension `D` of the modelled values.
    pub input_size: i64,
    /// Hidden width of each block.
    pub hidden_size: i64,
    /// Hidden-to-hidden layers per block.
    pub n_hidden: usize,
    /// Width of the conditioning vectors.
    pub cond_size: i64,
    /// Insert a flow batch-norm after every block.
    pub batch_norm: bool,
}

impl ConditionalFlow {
    /// Register all blocks under `p`.
    pub fn new(p: nn::Path, spec: FlowSpec) -> Self {
        let mut blocks = Vec::new();
        let mut degrees: Option<Vec<i64>> = None;
        let mut mask: Vec<f32> = (0..spec.input_size).map(|d| (d % 2) as f32).collect();
        for i in 0..spec.n_blocks {
            let bp = &p / format!("block{i}");
            match spec.kind {
                FlowKind::Maf => {
                    let made = Made::new(
                        bp,
                        spec.input_size,
                        spec.hidden_size,
                        spec.n_hidden,
                        spec.cond_size,
                        Activation::Tanh,
                        degrees.as_deref(),
                    );
                    degrees = Some(made.input_degrees().iter().rev().copied().collect());
                    blocks.push(Block::Made(made));
                }
                FlowKind::RealNvp => {
                    blocks.push(Block::Coupling(Coupling::new(
                        bp,
                        spec.input_size,
                        spec.hidden_size,
                        spec.n_hidden,
                        spec.cond_size,
                        &mask,
                    )));
                    mask.iter_mut().for_each(|m| *m = 1.0 - *m);
                }
            }
            if spec.batch_norm {
                blocks.push(Block::Norm(FlowBatchNorm::new(&p / format!("norm{i}"), spec.input_size)));
            }
        }
        ConditionalFlow { blocks }
    }

    /// Map `x` to the base space; returns `u` and the summed `log |det J|`
    /// per element.
    pub fn forward_t(&self, x: &Tensor, cond: &Tensor, train: bool) -> (Tensor, Tensor) {
        let mut u = x.shallow_clone();
        let mut log_det = x.zeros_like();
        for block in &self.blocks {
            let (next, ld) = match block {
                Block::Made(m) => m.forward(&u, cond),
                Block::Coupling(c) => c.forward(&u, cond),
                Block::Norm(n) => n.forward_t(&u, train),
            };
            u = next;
            log_det = log_det + ld;
        }
        (u, log_det)
    }

    /// `log p(x | cond)` per row.
    pub fn log_prob(&self, x: &Tensor, cond: &Tensor, train: bool) -> Tensor {
        let (u, log_det) = self.forward_t(x, cond, train);
        let base = u.square() * -0.5 - 0.5 * (2.0 * PI).ln();
        (base + log_det).sum_dim_intlist(&[1_i64][..], false, Kind::Float)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{nn::VarStore, Device};

    fn spec(kind: FlowKind, input_size: i64, batch_norm: bool) -> FlowSpec {
        FlowSpec {
            kind,
            n_blocks: 3,
            input_size,
            hidden_size: 16,
            n_hidden: 1,
            cond_size: 8,
            batch_norm,
        }
    }

    #[test]
    fn masks_are_autoregressive() {
        let (inp, hid, out) = made_degrees(3, 4, None);
        assert_eq!(inp, vec![0, 1, 2]);
        assert_eq!(hid, vec![0, 1, 0, 1]);
        assert_eq!(out, vec![-1, 0, 1]);
        // output 0 sees no hidden unit, output 2 sees all of them
        let m = degree_mask(&hid, &out);
        assert_eq!(&m[0..4], &[0.0, 0.0, 0.0, 0.0]);
        assert_eq!(&m[8..12], &[1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn single_dimension_output_depends_on_condition_only() {
        let (inp, hid, out) = made_degrees(1, 4, None);
        assert!(degree_mask(&inp, &hid).iter().all(|&v| v == 0.0));
        assert!(degree_mask(&hid, &out).iter().all(|&v| v == 1.0));
    }

    #[test]
    fn log_prob_is_per_row_and_finite() {
        for kind in [FlowKind::Maf, FlowKind::RealNvp] {
            for bn in [false, true] {
                let vs = VarStore::new(Device::Cpu);
                let flow = ConditionalFlow::new(vs.root() / "nf", spec(kind, 1, bn));
                let x = Tensor::randn([20, 1], (Kind::Float, Device::Cpu));
                let c = Tensor::randn([20, 8], (Kind::Float, Device::Cpu));
                let lp = flow.log_prob(&x, &c, true);
                assert_eq!(lp.size(), vec![20]);
                assert!(lp.isfinite().all().int64_value(&[]) == 1);
            }
        }
    }

    #[test]
    fn identity_initialised_maf_matches_gaussian_density() {
        // zero weights everywhere make every MADE block the identity
        let vs = VarStore::new(Device::Cpu);
        let flow = ConditionalFlow::new(vs.root() / "nf", spec(FlowKind::Maf, 2, false));
        tch::no_grad(|| {
            for (_, mut v) in vs.variables() {
                let _ = v.zero_();
            }
        });
        let x = Tensor::from_slice(&[0.0_f32, 0.0, 1.0, -1.0]).view([2, 2]);
        let c = Tensor::zeros([2, 8], (Kind::Float, Device::Cpu));
        let lp = flow.log_prob(&x, &c, false);
        let half_log_2pi = 0.5 * (2.0 * PI).ln();
        assert!((lp.double_value(&[0]) + 2.0 * half_log_2pi).abs() < 1e-5);
        assert!((lp.double_value(&[1]) + 1.0 + 2.0 * half_log_2pi).abs() < 1e-5);
    }
}
