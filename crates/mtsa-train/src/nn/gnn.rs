//! One round of message passing over the learned adjacency.

use tch::nn::{self, Module};
use tch::Tensor;

/// Graph propagation over `(batch, sensors, time, hidden)` states.
///
/// ```text
/// h_n[n, j, l] = W_n · Σ_k h[n, k, l] · A[k, j]
/// h_n[:, :, 1:] += W_r · h[:, :, :-1]
/// out = W_2 · relu(h_n)
/// ```
pub struct GraphPropagation {
    lin_n: nn::Linear,
    lin_r: nn::Linear,
    lin_2: nn::Linear,
}

impl GraphPropagation {
    /// Register the three projections under `p`.
    pub fn new(p: nn::Path, input_size: i64, hidden_size: i64) -> Self {
        let no_bias = nn::LinearConfig {
            bias: false,
            ..Default::default()
        };
        GraphPropagation {
            lin_n: nn::linear(&p / "lin_n", input_size, hidden_size, Default::default()),
            lin_r: nn::linear(&p / "lin_r", input_size, hidden_size, no_bias),
            lin_2: nn::linear(&p / "lin_2", hidden_size, hidden_size, Default::default()),
        }
    }

    /// Propagate `h` along `a` (`K × K`, row = source, column = target).
    pub fn forward(&self, h: &Tensor, a: &Tensor) -> Tensor {
        let steps = h.size()[2];
        // (N, K, L, H) -> (N, L, H, K) @ A -> (N, J, L, H)
        let aggregated = h.permute([0, 2, 3, 1]).matmul(a).permute([0, 3, 1, 2]);
        let mut h_n = self.lin_n.forward(&aggregated);
        if steps > 1 {
            let h_r = self.lin_r.forward(&h.narrow(2, 0, steps - 1));
            let first = h_r.narrow(2, 0, 1).zeros_like();
            h_n = h_n + Tensor::cat(&[first, h_r], 2);
        }
        self.lin_2.forward(&h_n.relu())
    }
}
