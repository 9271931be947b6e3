//! Loss functions selectable by name at compile time.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::config::LossKind;

/// Probabilities are clipped to `[EPSILON, 1 - EPSILON]` before taking logs.
pub const EPSILON: f32 = 1e-7;

impl LossKind {
    /// Mean loss over the batch. `output` and `targets` are both `[N, K]`.
    pub fn compute<B: Backend>(&self, output: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
        match self {
            LossKind::CategoricalCrossentropy => {
                let log_probs = output.clamp(EPSILON, 1.0 - EPSILON).log();
                (targets * log_probs).sum_dim(1).mean().neg()
            }
            LossKind::BinaryCrossentropy => {
                let probs = output.clamp(EPSILON, 1.0 - EPSILON);
                let log_p = probs.clone().log();
                let log_not_p = probs.neg().add_scalar(1.0).log();
                let not_targets = targets.clone().neg().add_scalar(1.0);
                (targets * log_p + not_targets * log_not_p).mean().neg()
            }
            LossKind::MeanSquaredError => (output - targets).powf_scalar(2.0).mean(),
        }
    }
}
