//! # Training Orchestrator
//!
//! Compile options (optimizer, loss, metrics), fit options, the mini-batch
//! training loop and the per-epoch [`History`] it produces.

mod config;
mod fit;
mod history;
mod loss;
mod metrics;

pub use config::{CompileOptions, FitOptions, LossKind, MetricKind, OptimizerKind, TrainingConfig};
pub use fit::Evaluation;
pub use history::{EpochRecord, History};
pub use loss::EPSILON;

pub(crate) use fit::{evaluate_batches, fit_network};
