//! Acyclicity constraint and the augmented-Lagrangian schedule.
//!
//! The learned adjacency `A` is pushed towards a DAG through
//! `h(A) = tr(exp(A ∘ A)) − K`, which is zero exactly when the weighted graph
//! has no cycles. [`AugmentedLagrangian`] owns the penalty weight ρ, the
//! multiplier α and the previous accepted `h`; the GANF trainer drives it.

use ndarray::Array2;
use rand::Rng;
use tracing::debug;

use crate::config::GanfConfig;
use crate::error::{ensure_finite, TrainResult};

// ---------------------------------------------------------------------------
// Matrix exponential and h(A)
// ---------------------------------------------------------------------------

const TAYLOR_TERMS: usize = 24;

/// Matrix exponential by scaling and squaring with a truncated Taylor series.
pub fn expm(a: &Array2<f64>) -> Array2<f64> {
    let n = a.nrows();
    let norm = a
        .rows()
        .into_iter()
        .map(|row| row.iter().map(|v| v.abs()).sum::<f64>())
        .fold(0.0_f64, f64::max);

    // scale so that ||A / 2^s|| <= 0.5
    let squarings = if norm > 0.5 {
        (norm / 0.5).log2().ceil() as i32
    } else {
        0
    };
    let scaled = a / 2f64.powi(squarings);

    let mut result = Array2::<f64>::eye(n);
    let mut term = Array2::<f64>::eye(n);
    for k in 1..=TAYLOR_TERMS {
        term = term.dot(&scaled) / k as f64;
        result += &term;
        if term.iter().all(|v| v.abs() < f64::EPSILON) {
            break;
        }
    }
    for _ in 0..squarings {
        result = result.dot(&result);
    }
    result
}

/// `tr(exp(A ∘ A)) − K`. Non-negative; zero iff the graph of `A` is acyclic.
pub fn acyclicity(a: &Array2<f64>) -> f64 {
    let squared = a.mapv(|v| v * v);
    expm(&squared).diag().sum() - a.nrows() as f64
}

// ---------------------------------------------------------------------------
// Adjacency helpers
// ---------------------------------------------------------------------------

/// Initial adjacency: absolute Xavier-uniform draw with a zero diagonal.
pub fn init_adjacency<R: Rng>(k: usize, rng: &mut R) -> Array2<f32> {
    let bound = if k == 0 {
        0.0
    } else {
        (6.0 / (2 * k) as f32).sqrt()
    };
    Array2::from_shape_fn((k, k), |(i, j)| {
        let v: f32 = rng.gen_range(-bound..=bound);
        if i == j {
            0.0
        } else {
            v.abs()
        }
    })
}

/// Clamp every entry to `[0, 1]` and zero the diagonal, in place.
pub fn project_adjacency(a: &mut Array2<f32>) {
    a.mapv_inplace(|v| v.clamp(0.0, 1.0));
    a.diag_mut().fill(0.0);
}

// ---------------------------------------------------------------------------
// AugmentedLagrangian
// ---------------------------------------------------------------------------

/// Outcome of comparing a pass's `h` against the last accepted value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PenaltyStep {
    /// `h` did not halve; ρ was multiplied and the pass must be repeated.
    Escalated {
        /// The new penalty weight.
        rho: f64,
    },
    /// `h` made enough progress; the inner loop ends.
    Accepted,
}

/// Penalty state of the constrained optimisation.
#[derive(Debug, Clone)]
pub struct AugmentedLagrangian {
    rho: f64,
    alpha: f64,
    rho_max: f64,
    growth: f64,
    h_tol: f64,
    h_prev: f64,
}

impl AugmentedLagrangian {
    /// Start from the configured ρ and α, with no accepted `h` yet.
    pub fn new(config: &GanfConfig) -> Self {
        AugmentedLagrangian {
            rho: config.rho,
            alpha: config.alpha,
            rho_max: config.rho_max,
            growth: config.rho_growth,
            h_tol: config.h_tol,
            h_prev: f64::INFINITY,
        }
    }

    /// Current penalty weight.
    pub fn rho(&self) -> f64 {
        self.rho
    }

    /// Current Lagrange multiplier.
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Last accepted `h` (infinite before the first dual update).
    pub fn h_prev(&self) -> f64 {
        self.h_prev
    }

    /// `0.5·ρ·h² + α·h`, the term added to the likelihood loss.
    pub fn penalty(&self, h: f64) -> f64 {
        0.5 * self.rho * h * h + self.alpha * h
    }

    /// Whether another inner pass is allowed (`ρ < ρ_max`).
    pub fn inner_loop_active(&self) -> bool {
        self.rho < self.rho_max
    }

    /// Compare the end-of-pass `h` with the last accepted one and escalate ρ
    /// when it has not at least halved.
    pub fn check_progress(&mut self, h: f64) -> TrainResult<PenaltyStep> {
        let h = ensure_finite("h(A)", h)?;
        if h > 0.5 * self.h_prev {
            self.rho *= self.growth;
            debug!(h, rho = self.rho, "acyclicity stalled, penalty escalated");
            Ok(PenaltyStep::Escalated { rho: self.rho })
        } else {
            Ok(PenaltyStep::Accepted)
        }
    }

    /// Dual ascent after the inner loop: `h_prev ← h`, `α ← α + ρ·h`.
    pub fn update_dual(&mut self, h: f64) {
        self.h_prev = h;
        self.alpha += self.rho * h;
    }

    /// Stop condition of the outer loop.
    pub fn converged(&self) -> bool {
        self.h_prev <= self.h_tol || self.rho >= self.rho_max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn expm_of_zero_is_identity() {
        let e = expm(&Array2::zeros((3, 3)));
        assert_eq!(e, Array2::<f64>::eye(3));
    }

    #[test]
    fn expm_of_diagonal() {
        let a = array![[1.0, 0.0], [0.0, -2.0]];
        let e = expm(&a);
        assert_abs_diff_eq!(e[[0, 0]], 1f64.exp(), epsilon = 1e-10);
        assert_abs_diff_eq!(e[[1, 1]], (-2f64).exp(), epsilon = 1e-10);
        assert_abs_diff_eq!(e[[0, 1]], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn expm_large_norm_uses_squaring() {
        let a = array![[0.0, 6.0], [6.0, 0.0]];
        let e = expm(&a);
        assert_abs_diff_eq!(e[[0, 0]] / 6f64.cosh(), 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(e[[0, 1]] / 6f64.sinh(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn init_adjacency_is_projected() {
        let mut rng = StdRng::seed_from_u64(10);
        let a = init_adjacency(5, &mut rng);
        for i in 0..5 {
            assert_eq!(a[[i, i]], 0.0);
        }
        assert!(a.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn project_clamps_and_zeroes_diagonal() {
        let mut a = array![[0.7_f32, -0.2], [1.4, 0.3]];
        project_adjacency(&mut a);
        assert_eq!(a, array![[0.0_f32, 0.0], [1.0, 0.0]]);
    }

    #[test]
    fn first_pass_is_always_accepted() {
        let mut al = AugmentedLagrangian::new(&GanfConfig::default());
        assert_eq!(al.check_progress(123.0).unwrap(), PenaltyStep::Accepted);
        al.update_dual(0.25);
        assert_eq!(al.h_prev(), 0.25);
        assert_eq!(al.alpha(), 0.25);
    }

    #[test]
    fn non_finite_h_is_fatal() {
        let mut al = AugmentedLagrangian::new(&GanfConfig::default());
        assert!(al.check_progress(f64::NAN).is_err());
    }
}
