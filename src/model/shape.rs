//! Static shape inference over a layer stack. Shapes are per example, in
//! `[height, width, channels]` (spatial) or `[features]` (flat) form.

use super::layer::{Layer, Padding};
use crate::error::ShapeError;

/// Input and output shape of one layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerShape {
    pub input: Vec<usize>,
    pub output: Vec<usize>,
}

fn layer_error(index: usize, layer: &Layer, reason: impl Into<String>) -> ShapeError {
    ShapeError::Layer {
        index,
        layer: layer.kind(),
        reason: reason.into(),
    }
}

/// Resolve every layer's shapes. `base` is an input shape supplied outside
/// the layers (e.g. by a loaded model); otherwise the first layer must
/// declare one.
pub fn infer_shapes(layers: &[Layer], base: Option<&[usize]>) -> Result<Vec<LayerShape>, ShapeError> {
    let mut current: Option<Vec<usize>> = base.map(<[usize]>::to_vec);
    let mut shapes = Vec::with_capacity(layers.len());

    for (index, layer) in layers.iter().enumerate() {
        if let Some(declared) = layer.input_shape() {
            match &current {
                Some(actual) if actual.as_slice() != declared => {
                    return Err(layer_error(
                        index,
                        layer,
                        format!("declares input shape {declared:?} but receives {actual:?}"),
                    ));
                }
                Some(_) => {}
                None => current = Some(declared.to_vec()),
            }
        }
        let Some(input) = current.take() else {
            return Err(layer_error(
                index,
                layer,
                "the first layer must declare an input shape",
            ));
        };

        let output = output_shape(index, layer, &input)?;
        current = Some(output.clone());
        shapes.push(LayerShape { input, output });
    }
    Ok(shapes)
}

/// Output shape of `layer` for a given per-example input shape.
pub fn output_shape(index: usize, layer: &Layer, input: &[usize]) -> Result<Vec<usize>, ShapeError> {
    match layer {
        Layer::Conv2d(spec) => {
            let [h, w, _] = spatial(index, layer, input)?;
            match spec.padding {
                Padding::Same => Ok(vec![h, w, spec.filters]),
                Padding::Valid => {
                    let k = spec.kernel_size;
                    if k > h || k > w {
                        return Err(layer_error(
                            index,
                            layer,
                            format!("kernel {k}x{k} does not fit a {h}x{w} input"),
                        ));
                    }
                    Ok(vec![h - k + 1, w - k + 1, spec.filters])
                }
            }
        }
        Layer::MaxPool2d(spec) => {
            let [h, w, c] = spatial(index, layer, input)?;
            let [ph, pw] = spec.pool_size;
            if ph > h || pw > w {
                return Err(layer_error(
                    index,
                    layer,
                    format!("pool window {ph}x{pw} does not fit a {h}x{w} input"),
                ));
            }
            Ok(vec![(h - ph) / ph + 1, (w - pw) / pw + 1, c])
        }
        Layer::Flatten => Ok(vec![input.iter().product()]),
        Layer::BatchNorm(_) | Layer::Dropout(_) => match input.len() {
            1 | 3 => Ok(input.to_vec()),
            _ => Err(layer_error(
                index,
                layer,
                format!("unsupported input shape {input:?}"),
            )),
        },
        Layer::Dense(spec) => {
            if input.len() != 1 {
                return Err(layer_error(
                    index,
                    layer,
                    format!("expects a flat input but receives {input:?}; add a flatten layer first"),
                ));
            }
            Ok(vec![spec.units])
        }
    }
}

fn spatial(index: usize, layer: &Layer, input: &[usize]) -> Result<[usize; 3], ShapeError> {
    match input {
        &[h, w, c] => Ok([h, w, c]),
        _ => Err(layer_error(
            index,
            layer,
            format!("expects a [height, width, channels] input but receives {input:?}"),
        )),
    }
}

/// `(trainable, non_trainable)` parameter counts of a layer.
pub fn param_counts(layer: &Layer, input: &[usize]) -> (usize, usize) {
    match layer {
        Layer::Conv2d(spec) => {
            let channels = input.last().copied().unwrap_or(0);
            let k = spec.kernel_size;
            (k * k * channels * spec.filters + spec.filters, 0)
        }
        Layer::Dense(spec) => {
            let features = input.first().copied().unwrap_or(0);
            (features * spec.units + spec.units, 0)
        }
        Layer::BatchNorm(_) => {
            let features = input.last().copied().unwrap_or(0);
            // gamma and beta, plus running mean and variance
            (2 * features, 2 * features)
        }
        Layer::MaxPool2d(_) | Layer::Flatten | Layer::Dropout(_) => (0, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mnist_stack() -> Vec<Layer> {
        vec![
            Layer::conv2d(8, 3, "relu")
                .unwrap()
                .with_input_shape([28, 28, 1])
                .unwrap(),
            Layer::max_pool2d([2, 2]).unwrap(),
            Layer::flatten(),
            Layer::dense(10, "softmax").unwrap(),
        ]
    }

    #[test]
    fn test_conv_pool_flatten_dense() {
        let shapes = infer_shapes(&mnist_stack(), None).unwrap();
        let outputs: Vec<Vec<usize>> = shapes.into_iter().map(|s| s.output).collect();
        assert_eq!(
            outputs,
            vec![vec![26, 26, 8], vec![13, 13, 8], vec![1352], vec![10]]
        );
    }

    #[test]
    fn test_same_padding_keeps_size() {
        let layer = Layer::conv2d(4, 3, "relu")
            .unwrap()
            .with_padding(Padding::Same)
            .unwrap();
        assert_eq!(output_shape(0, &layer, &[9, 7, 2]).unwrap(), vec![9, 7, 4]);
    }

    #[test]
    fn test_pool_floors_odd_sizes() {
        let pool = Layer::max_pool2d([2, 2]).unwrap();
        assert_eq!(output_shape(0, &pool, &[5, 5, 3]).unwrap(), vec![2, 2, 3]);
    }

    #[test]
    fn test_missing_input_shape() {
        let layers = vec![Layer::dense(3, "relu").unwrap()];
        let err = infer_shapes(&layers, None).unwrap_err();
        assert!(matches!(err, ShapeError::Layer { index: 0, .. }));
        assert!(infer_shapes(&layers, Some(&[4][..])).is_ok());
    }

    #[test]
    fn test_dense_on_spatial_input_fails() {
        let layers = vec![
            Layer::conv2d(8, 3, "relu")
                .unwrap()
                .with_input_shape([8, 8, 1])
                .unwrap(),
            Layer::dense(10, "softmax").unwrap(),
        ];
        let err = infer_shapes(&layers, None).unwrap_err();
        assert!(matches!(err, ShapeError::Layer { index: 1, layer: "dense", .. }));
    }

    #[test]
    fn test_kernel_larger_than_input() {
        let layers = vec![Layer::conv2d(8, 5, "relu")
            .unwrap()
            .with_input_shape([3, 3, 1])
            .unwrap()];
        assert!(infer_shapes(&layers, None).is_err());
    }

    #[test]
    fn test_conflicting_declared_shape() {
        let layers = vec![
            Layer::dense(4, "relu").unwrap().with_input_shape([3]).unwrap(),
            Layer::dense(2, "relu").unwrap().with_input_shape([5]).unwrap(),
        ];
        let err = infer_shapes(&layers, None).unwrap_err();
        assert!(matches!(err, ShapeError::Layer { index: 1, .. }));
    }

    #[test]
    fn test_param_counts() {
        let stack = mnist_stack();
        let shapes = infer_shapes(&stack, None).unwrap();
        let counts: Vec<(usize, usize)> = stack
            .iter()
            .zip(&shapes)
            .map(|(layer, shape)| param_counts(layer, &shape.input))
            .collect();
        assert_eq!(counts, vec![(80, 0), (0, 0), (0, 0), (13530, 0)]);

        assert_eq!(param_counts(&Layer::batch_norm(), &[4, 4, 16]), (32, 32));
    }
}
