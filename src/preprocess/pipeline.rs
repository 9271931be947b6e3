//! Configurable decode-to-tensor pipeline run inside an arena scope.

use burn::tensor::backend::Backend;
use burn::tensor::{Float, Tensor};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::augment::Augmentation;
use super::transform::{decode, expand_dims, normalize, resize_nearest, to_float, PIXEL_SCALE};
use crate::arena::{TensorArena, TensorId};
use crate::error::{Error, Result};

/// Encoded bytes to a model-ready `[1, S, S, C]` float tensor.
///
/// Stages run in a fixed order: decode, resize, cast to float, augment
/// (pixel range), normalize, add the batch axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagePipeline {
    /// Square target size; `None` keeps the decoded size.
    pub size: Option<usize>,
    /// Divisor applied after augmentation.
    pub scale: f32,
    /// Training-time augmentation; leave `None` for inference.
    pub augmentation: Option<Augmentation>,
}

impl Default for ImagePipeline {
    fn default() -> Self {
        Self {
            size: None,
            scale: PIXEL_SCALE,
            augmentation: None,
        }
    }
}

impl ImagePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_augmentation(mut self, augmentation: Augmentation) -> Self {
        self.augmentation = Some(augmentation);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.size == Some(0) {
            return Err(Error::config("pipeline size must be > 0"));
        }
        if !self.scale.is_finite() || self.scale == 0.0 {
            return Err(Error::config("pipeline scale must be finite and non-zero"));
        }
        if let Some(augmentation) = &self.augmentation {
            augmentation.validate()?;
        }
        Ok(())
    }

    /// Run the pipeline inside a scope of `arena`. Only the final tensor
    /// survives; it is owned by the caller's current scope.
    pub fn process_in<B: Backend>(
        &self,
        arena: &mut TensorArena<B>,
        bytes: &[u8],
        device: &B::Device,
    ) -> Result<TensorId> {
        self.validate()?;

        arena.scoped(|arena| {
            let pixels = decode::<B>(bytes, device)?;
            arena.track(pixels.clone());
            let pixels = match self.size {
                Some(size) => {
                    let resized = resize_nearest(pixels, size)?;
                    arena.track(resized.clone());
                    resized
                }
                None => pixels,
            };

            let mut image = to_float(pixels);
            arena.track(image.clone());
            if let Some(augmentation) = &self.augmentation {
                image = augmentation.apply(image)?;
                arena.track(image.clone());
            }

            let image = normalize(image, self.scale)?;
            arena.track(image.clone());
            let batched = expand_dims(image);
            trace!(shape = ?batched.dims(), "image preprocessed");
            Ok(arena.track(batched))
        })
    }

    /// Run the pipeline with a private arena and return the tensor directly.
    pub fn process<B: Backend>(&self, bytes: &[u8], device: &B::Device) -> Result<Tensor<B, 4>> {
        let mut arena = TensorArena::new();
        let id = self.process_in(&mut arena, bytes, device)?;
        Ok(arena.take::<4, Float>(id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::png_rgba;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_process_produces_batched_unit_range() {
        let device = Default::default();
        let pipeline = ImagePipeline::new().with_size(8);
        let tensor = pipeline.process::<TestBackend>(&png_rgba(20, 10), &device).unwrap();

        assert_eq!(tensor.dims(), [1, 8, 8, 3]);
        let values: Vec<f32> = tensor.into_data().to_vec().unwrap();
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_process_in_leaves_only_result() {
        let device = Default::default();
        let mut arena = TensorArena::<TestBackend>::new();
        arena.start_scope();
        let pipeline = ImagePipeline::new()
            .with_size(4)
            .with_augmentation(Augmentation {
                noise_level: 3.0,
                flip_probability: 0.5,
            });
        let id = pipeline.process_in(&mut arena, &png_rgba(6, 6), &device).unwrap();

        assert_eq!(arena.stats().live_tensors, 1);
        assert!(arena.contains(id));
        arena.end_scope().unwrap();
        assert!(!arena.contains(id));
    }

    #[test]
    fn test_decode_failure_leaks_nothing() {
        let device = Default::default();
        let mut arena = TensorArena::<TestBackend>::new();
        let err = ImagePipeline::new()
            .with_size(4)
            .process_in(&mut arena, b"nope", &device)
            .unwrap_err();

        assert!(matches!(err, Error::Decode(_)));
        assert_eq!(arena.stats().live_tensors, 0);
        assert_eq!(arena.depth(), 0);
    }

    #[test]
    fn test_invalid_scale_rejected() {
        let device = Default::default();
        let result = ImagePipeline::new()
            .with_scale(0.0)
            .process::<TestBackend>(&png_rgba(2, 2), &device);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
