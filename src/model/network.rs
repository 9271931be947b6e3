//! Burn module backing a [`Sequential`](super::Sequential) model.
//!
//! Inputs arrive flattened as `[N, features]` and are reshaped to the
//! declared per-example shape. Spatial data is kept channels-first
//! internally and permuted back to channels-last before flattening, so
//! flattened feature order matches `[H, W, C]`.

use burn::module::{Ignored, Module};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{
    BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::layer::{Layer, Padding};
use crate::error::{Result, ShapeError};

/// Weights of a single layer. Exactly the field matching the layer kind
/// (and input rank, for batch norm) is populated.
#[derive(Module, Debug)]
pub struct Block<B: Backend> {
    conv: Option<Conv2d<B>>,
    pool: Option<MaxPool2d>,
    norm_spatial: Option<BatchNorm<B, 2>>,
    norm_flat: Option<BatchNorm<B, 0>>,
    dropout: Option<Dropout>,
    dense: Option<Linear<B>>,
    layer: Ignored<Layer>,
}

enum Features<B: Backend> {
    /// `[N, C, H, W]`
    Spatial(Tensor<B, 4>),
    /// `[N, F]`
    Flat(Tensor<B, 2>),
}

impl<B: Backend> Features<B> {
    fn describe(&self) -> String {
        match self {
            Features::Spatial(x) => format!("spatial {:?}", x.dims()),
            Features::Flat(x) => format!("flat {:?}", x.dims()),
        }
    }
}

impl<B: Backend> Block<B> {
    /// Initialize weights for `layer` given its per-example input shape.
    pub fn new(layer: &Layer, input: &[usize], device: &B::Device) -> Self {
        let mut block = Self {
            conv: None,
            pool: None,
            norm_spatial: None,
            norm_flat: None,
            dropout: None,
            dense: None,
            layer: Ignored(layer.clone()),
        };
        let features = input.last().copied().unwrap_or(0);

        match layer {
            Layer::Conv2d(spec) => {
                let padding = match spec.padding {
                    Padding::Valid => PaddingConfig2d::Valid,
                    Padding::Same => PaddingConfig2d::Same,
                };
                block.conv = Some(
                    Conv2dConfig::new(
                        [features, spec.filters],
                        [spec.kernel_size, spec.kernel_size],
                    )
                    .with_padding(padding)
                    .init(device),
                );
            }
            Layer::MaxPool2d(spec) => {
                block.pool = Some(
                    MaxPool2dConfig::new(spec.pool_size)
                        .with_strides(spec.pool_size)
                        .init(),
                );
            }
            Layer::BatchNorm(spec) => {
                let config = BatchNormConfig::new(features)
                    .with_momentum(1.0 - spec.momentum)
                    .with_epsilon(spec.epsilon);
                if input.len() == 3 {
                    block.norm_spatial = Some(config.init(device));
                } else {
                    block.norm_flat = Some(config.init(device));
                }
            }
            Layer::Dropout(spec) => {
                block.dropout = Some(DropoutConfig::new(spec.rate).init());
            }
            Layer::Dense(spec) => {
                block.dense = Some(LinearConfig::new(features, spec.units).init(device));
            }
            Layer::Flatten => {}
        }
        block
    }

    pub fn layer(&self) -> &Layer {
        &self.layer.0
    }

    fn forward(&self, index: usize, features: Features<B>) -> Result<Features<B>> {
        let layer = &self.layer.0;
        let unbuilt = || ShapeError::Layer {
            index,
            layer: layer.kind(),
            reason: "weights are not initialized for this input".to_string(),
        };

        let output = match (layer, features) {
            (Layer::Conv2d(spec), Features::Spatial(x)) => {
                let conv = self.conv.as_ref().ok_or_else(unbuilt)?;
                Features::Spatial(spec.activation.apply(conv.forward(x)))
            }
            (Layer::MaxPool2d(_), Features::Spatial(x)) => {
                let pool = self.pool.as_ref().ok_or_else(unbuilt)?;
                Features::Spatial(pool.forward(x))
            }
            (Layer::Flatten, Features::Spatial(x)) => {
                Features::Flat(x.permute([0, 2, 3, 1]).flatten::<2>(1, 3))
            }
            (Layer::Flatten, flat @ Features::Flat(_)) => flat,
            (Layer::BatchNorm(_), Features::Spatial(x)) => {
                let norm = self.norm_spatial.as_ref().ok_or_else(unbuilt)?;
                Features::Spatial(norm.forward(x))
            }
            (Layer::BatchNorm(_), Features::Flat(x)) => {
                let norm = self.norm_flat.as_ref().ok_or_else(unbuilt)?;
                Features::Flat(norm.forward(x))
            }
            (Layer::Dropout(spec), Features::Spatial(x)) => {
                Features::Spatial(self.apply_dropout(spec.rate, x))
            }
            (Layer::Dropout(spec), Features::Flat(x)) => Features::Flat(self.apply_dropout(spec.rate, x)),
            (Layer::Dense(spec), Features::Flat(x)) => {
                let dense = self.dense.as_ref().ok_or_else(unbuilt)?;
                Features::Flat(spec.activation.apply(dense.forward(x)))
            }
            (layer, features) => {
                return Err(ShapeError::Layer {
                    index,
                    layer: layer.kind(),
                    reason: format!("cannot consume {} input", features.describe()),
                }
                .into());
            }
        };
        Ok(output)
    }

    fn apply_dropout<const D: usize>(&self, rate: f64, x: Tensor<B, D>) -> Tensor<B, D> {
        if rate >= 1.0 {
            // burn's dropout divides by (1 - rate)
            return if B::ad_enabled() { x.zeros_like() } else { x };
        }
        match &self.dropout {
            Some(dropout) => dropout.forward(x),
            None => x,
        }
    }
}

/// Ordered stack of [`Block`]s plus the per-example input shape.
#[derive(Module, Debug)]
pub struct Network<B: Backend> {
    blocks: Vec<Block<B>>,
    input_shape: Ignored<Vec<usize>>,
}

impl<B: Backend> Network<B> {
    pub fn new(input_shape: Vec<usize>) -> Self {
        Self {
            blocks: Vec::new(),
            input_shape: Ignored(input_shape),
        }
    }

    pub fn push(&mut self, block: Block<B>) {
        self.blocks.push(block);
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape.0
    }

    /// Flattened feature count of one example.
    pub fn input_features(&self) -> usize {
        self.input_shape.0.iter().product()
    }

    /// `[N, features]` in, `[N, outputs]` out.
    pub fn forward(&self, x: Tensor<B, 2>) -> Result<Tensor<B, 2>> {
        let [batch, features] = x.dims();
        if features != self.input_features() {
            return Err(ShapeError::Mismatch {
                what: "input features",
                expected: vec![self.input_features()],
                got: vec![features],
            }
            .into());
        }

        let mut state = match self.input_shape.0.as_slice() {
            &[h, w, c] => Features::Spatial(x.reshape([batch, h, w, c]).permute([0, 3, 1, 2])),
            _ => Features::Flat(x),
        };
        for (index, block) in self.blocks.iter().enumerate() {
            state = block.forward(index, state)?;
        }

        match state {
            Features::Flat(output) => Ok(output),
            Features::Spatial(output) => Err(ShapeError::Mismatch {
                what: "network output rank",
                expected: vec![batch, 0],
                got: output.dims().to_vec(),
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::shape::infer_shapes;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn build(layers: &[Layer]) -> Network<TestBackend> {
        let device = Default::default();
        let shapes = infer_shapes(layers, None).unwrap();
        let mut network = Network::new(shapes[0].input.clone());
        for (layer, shape) in layers.iter().zip(&shapes) {
            network.push(Block::new(layer, &shape.input, &device));
        }
        network
    }

    #[test]
    fn test_forward_matches_inferred_shape() {
        let layers = vec![
            Layer::conv2d(4, 3, "relu")
                .unwrap()
                .with_input_shape([10, 10, 2])
                .unwrap(),
            Layer::batch_norm(),
            Layer::max_pool2d([2, 2]).unwrap(),
            Layer::flatten(),
            Layer::dropout(0.3).unwrap(),
            Layer::dense(5, "softmax").unwrap(),
        ];
        let network = build(&layers);
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::ones([3, 200], &device);
        let y = network.forward(x).unwrap();
        assert_eq!(y.dims(), [3, 5]);

        let rows = y.sum_dim(1).into_data().to_vec::<f32>().unwrap();
        for row in rows {
            approx::assert_relative_eq!(row, 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_flat_batch_norm() {
        let layers = vec![
            Layer::dense(6, "tanh").unwrap().with_input_shape([4]).unwrap(),
            Layer::batch_norm(),
            Layer::dense(2, "linear").unwrap(),
        ];
        let network = build(&layers);
        let device = Default::default();
        let y = network
            .forward(Tensor::<TestBackend, 2>::zeros([7, 4], &device))
            .unwrap();
        assert_eq!(y.dims(), [7, 2]);
    }

    #[test]
    fn test_wrong_feature_count() {
        let layers = vec![Layer::dense(2, "relu").unwrap().with_input_shape([3]).unwrap()];
        let network = build(&layers);
        let device = Default::default();
        let err = network
            .forward(Tensor::<TestBackend, 2>::zeros([1, 4], &device))
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::Shape(ShapeError::Mismatch { .. })));
    }
}
