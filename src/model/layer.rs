//! Layer descriptions. These are plain values; weights are created when the
//! model is built.

use std::fmt;
use std::str::FromStr;

use burn::tensor::activation;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Keras default batch-norm momentum (running = m * running + (1 - m) * batch).
pub const BATCH_NORM_MOMENTUM: f64 = 0.99;
pub const BATCH_NORM_EPSILON: f64 = 1e-3;

/// Element-wise activation applied after a conv or dense layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Sigmoid,
    Tanh,
    /// Softmax over the feature axis (dim 1).
    Softmax,
}

impl Activation {
    pub fn name(&self) -> &'static str {
        match self {
            Activation::Linear => "linear",
            Activation::Relu => "relu",
            Activation::Sigmoid => "sigmoid",
            Activation::Tanh => "tanh",
            Activation::Softmax => "softmax",
        }
    }

    pub fn apply<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Linear => x,
            Activation::Relu => activation::relu(x),
            Activation::Sigmoid => activation::sigmoid(x),
            Activation::Tanh => activation::tanh(x),
            Activation::Softmax => activation::softmax(x, 1),
        }
    }
}

impl FromStr for Activation {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "linear" | "none" => Ok(Activation::Linear),
            "relu" => Ok(Activation::Relu),
            "sigmoid" => Ok(Activation::Sigmoid),
            "tanh" => Ok(Activation::Tanh),
            "softmax" => Ok(Activation::Softmax),
            other => Err(Error::config(format!("unknown activation `{other}`"))),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Convolution border handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Padding {
    /// No padding; output shrinks by `kernel - 1`.
    #[default]
    Valid,
    /// Zero padding that preserves the spatial size (odd kernels only).
    Same,
}

impl FromStr for Padding {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "valid" => Ok(Padding::Valid),
            "same" => Ok(Padding::Same),
            other => Err(Error::config(format!("unknown padding `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conv2dSpec {
    /// Number of output channels
    pub filters: usize,
    /// Square kernel side
    pub kernel_size: usize,
    #[serde(default)]
    pub padding: Padding,
    #[serde(default)]
    pub activation: Activation,
    /// Per-example `[H, W, C]` when this is the first layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_shape: Option<Vec<usize>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaxPool2dSpec {
    /// Window `[height, width]`; the stride equals the window.
    pub pool_size: [usize; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchNormSpec {
    /// Running-statistics decay, Keras convention
    pub momentum: f64,
    /// Added to the variance before the square root
    pub epsilon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropoutSpec {
    /// Fraction of activations zeroed during training, in `[0, 1]`
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseSpec {
    /// Output width
    pub units: usize,
    #[serde(default)]
    pub activation: Activation,
    /// Per-example `[F]` when this is the first layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_shape: Option<Vec<usize>>,
}

/// One stage of a [`Sequential`](super::Sequential) model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Layer {
    Conv2d(Conv2dSpec),
    MaxPool2d(MaxPool2dSpec),
    Flatten,
    BatchNorm(BatchNormSpec),
    Dropout(DropoutSpec),
    Dense(DenseSpec),
}

impl Layer {
    /// Square `kernel_size` convolution with `filters` output channels and
    /// valid padding.
    pub fn conv2d(filters: usize, kernel_size: usize, activation: &str) -> Result<Self> {
        if filters == 0 {
            return Err(Error::config("conv2d filters must be > 0"));
        }
        if kernel_size == 0 {
            return Err(Error::config("conv2d kernel_size must be > 0"));
        }
        Ok(Layer::Conv2d(Conv2dSpec {
            filters,
            kernel_size,
            padding: Padding::Valid,
            activation: activation.parse()?,
            input_shape: None,
        }))
    }

    pub fn max_pool2d(pool_size: [usize; 2]) -> Result<Self> {
        if pool_size.contains(&0) {
            return Err(Error::config("max_pool2d pool_size must be > 0"));
        }
        Ok(Layer::MaxPool2d(MaxPool2dSpec { pool_size }))
    }

    pub fn flatten() -> Self {
        Layer::Flatten
    }

    /// Batch normalization with Keras defaults.
    pub fn batch_norm() -> Self {
        Layer::BatchNorm(BatchNormSpec {
            momentum: BATCH_NORM_MOMENTUM,
            epsilon: BATCH_NORM_EPSILON,
        })
    }

    pub fn batch_norm_with(momentum: f64, epsilon: f64) -> Result<Self> {
        if !(0.0..1.0).contains(&momentum) {
            return Err(Error::config("batch_norm momentum must be in [0, 1)"));
        }
        if !epsilon.is_finite() || epsilon <= 0.0 {
            return Err(Error::config("batch_norm epsilon must be > 0"));
        }
        Ok(Layer::BatchNorm(BatchNormSpec { momentum, epsilon }))
    }

    /// Dropout with `rate` in `[0, 1]`.
    pub fn dropout(rate: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(Error::config(format!(
                "dropout rate must be in [0, 1], got {rate}"
            )));
        }
        Ok(Layer::Dropout(DropoutSpec { rate }))
    }

    pub fn dense(units: usize, activation: &str) -> Result<Self> {
        if units == 0 {
            return Err(Error::config("dense units must be > 0"));
        }
        Ok(Layer::Dense(DenseSpec {
            units,
            activation: activation.parse()?,
            input_shape: None,
        }))
    }

    /// Declare the per-example input shape: `[H, W, C]` for conv2d, `[F]`
    /// for dense. Other layers cannot start a model.
    pub fn with_input_shape(self, shape: impl Into<Vec<usize>>) -> Result<Self> {
        let shape = shape.into();
        if shape.is_empty() || shape.contains(&0) {
            return Err(Error::config(format!(
                "input shape must be non-empty with positive dims, got {shape:?}"
            )));
        }
        match self {
            Layer::Conv2d(mut spec) if shape.len() == 3 => {
                spec.input_shape = Some(shape);
                Ok(Layer::Conv2d(spec))
            }
            Layer::Dense(mut spec) if shape.len() == 1 => {
                spec.input_shape = Some(shape);
                Ok(Layer::Dense(spec))
            }
            Layer::Conv2d(_) => Err(Error::config("conv2d input shape must be [height, width, channels]")),
            Layer::Dense(_) => Err(Error::config("dense input shape must be [features]")),
            other => Err(Error::config(format!(
                "{} layers cannot declare an input shape",
                other.kind()
            ))),
        }
    }

    /// Set conv2d padding. Same padding requires an odd kernel.
    pub fn with_padding(self, padding: Padding) -> Result<Self> {
        match self {
            Layer::Conv2d(mut spec) => {
                if padding == Padding::Same && spec.kernel_size % 2 == 0 {
                    return Err(Error::config(format!(
                        "same padding needs an odd kernel, got {}",
                        spec.kernel_size
                    )));
                }
                spec.padding = padding;
                Ok(Layer::Conv2d(spec))
            }
            other => Err(Error::config(format!(
                "{} layers have no padding",
                other.kind()
            ))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Layer::Conv2d(_) => "conv2d",
            Layer::MaxPool2d(_) => "max_pool2d",
            Layer::Flatten => "flatten",
            Layer::BatchNorm(_) => "batch_norm",
            Layer::Dropout(_) => "dropout",
            Layer::Dense(_) => "dense",
        }
    }

    pub fn input_shape(&self) -> Option<&[usize]> {
        match self {
            Layer::Conv2d(spec) => spec.input_shape.as_deref(),
            Layer::Dense(spec) => spec.input_shape.as_deref(),
            _ => None,
        }
    }
}
