//! Error types shared by every module of the crate.

use thiserror::Error;

use crate::arena::TensorId;

/// Crate-wide error.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid layer or training parameters, caught before any device work.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("shape error: {0}")]
    Shape(#[from] ShapeError),

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("dataset schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("training error: {0}")]
    Training(#[from] TrainingError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to record model weights: {0}")]
    Recorder(#[from] burn::record::RecorderError),

    #[error("failed to serialize model description: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("arena error: {0}")]
    Arena(#[from] ArenaError),
}

impl Error {
    /// Shorthand for [`Error::Config`].
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Whether the error belongs to the persistence (I/O) family.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Recorder(_) | Error::Serialization(_)
        )
    }
}

/// Layer or tensor shape incompatibility.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("layer {index} ({layer}): {reason}")]
    Layer {
        index: usize,
        layer: &'static str,
        reason: String,
    },

    #[error("expected at least {expected} dimensions, got shape {shape:?}")]
    Rank { expected: usize, shape: Vec<usize> },

    #[error("{what}: expected {expected:?}, got {got:?}")]
    Mismatch {
        what: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
}

/// Dataset adapter input is missing required fields or is inconsistent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("label map has {labels} entries but labels are {width} wide")]
    LabelWidth { labels: usize, width: usize },
}

/// Failures of a `fit` call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrainingError {
    #[error("model is not compiled")]
    NotCompiled,

    #[error("features have {features} examples but labels have {labels}")]
    ExampleCountMismatch { features: usize, labels: usize },

    #[error("batch size {batch_size} exceeds the {examples} training examples")]
    BatchTooLarge { batch_size: usize, examples: usize },

    #[error("{partition} partition is empty")]
    EmptyPartition { partition: &'static str },

    #[error("non-finite loss {loss} at epoch {epoch}, batch {batch}")]
    NonFiniteLoss { epoch: usize, batch: usize, loss: f64 },

    #[error("training task failed: {0}")]
    Task(String),
}

/// Scope-discipline violations. These are programming errors in the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArenaError {
    #[error("end_scope called with no open scope")]
    NoOpenScope,

    #[error("tensor {0} is not tracked (never registered or already disposed)")]
    UnknownTensor(TensorId),

    #[error("tensor {0} does not have the requested rank or kind")]
    KindMismatch(TensorId),

    #[error("scoped closure closed its own scope (depth {found}, expected {expected})")]
    ScopeClosedByClosure { expected: usize, found: usize },
}

/// Convenience Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
