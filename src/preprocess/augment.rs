//! Training-time augmentation. Never applied at inference.

use burn::tensor::backend::Backend;
use burn::tensor::{BasicOps, Distribution, Tensor};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const PIXEL_MIN: f32 = 0.0;
pub const PIXEL_MAX: f32 = 255.0;

/// Add zero-mean Gaussian noise with standard deviation `noise_level`, then
/// clamp to the pixel range `[0, 255]`.
pub fn add_noise<B: Backend, const D: usize>(image: Tensor<B, D>, noise_level: f32) -> Result<Tensor<B, D>> {
    if !noise_level.is_finite() || noise_level < 0.0 {
        return Err(Error::config(format!(
            "noise level must be finite and >= 0, got {noise_level}"
        )));
    }
    if noise_level == 0.0 {
        return Ok(image.clamp(PIXEL_MIN, PIXEL_MAX));
    }

    let noise = Tensor::<B, D>::random(
        image.shape(),
        Distribution::Normal(0.0, noise_level as f64),
        &image.device(),
    );
    Ok((image + noise).clamp(PIXEL_MIN, PIXEL_MAX))
}

/// Mirror an `[H, W, C]` image along its width axis.
pub fn flip_horizontal<B: Backend, K: BasicOps<B>>(image: Tensor<B, 3, K>) -> Tensor<B, 3, K> {
    image.flip([1])
}

/// Randomized augmentation applied by the image pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Augmentation {
    /// Standard deviation of the pixel noise (in pixel units, 0 disables).
    pub noise_level: f32,
    /// Probability of mirroring an image.
    pub flip_probability: f64,
}

impl Default for Augmentation {
    fn default() -> Self {
        Self {
            noise_level: 8.0,
            flip_probability: 0.5,
        }
    }
}

impl Augmentation {
    pub fn validate(&self) -> Result<()> {
        if !self.noise_level.is_finite() || self.noise_level < 0.0 {
            return Err(Error::config("noise_level must be finite and >= 0"));
        }
        if !(0.0..=1.0).contains(&self.flip_probability) {
            return Err(Error::config("flip_probability must be in [0, 1]"));
        }
        Ok(())
    }

    /// Apply to a float image still in pixel range.
    pub fn apply<B: Backend>(&self, image: Tensor<B, 3>) -> Result<Tensor<B, 3>> {
        let mut rng = rand::thread_rng();
        let image = if self.flip_probability > 0.0 && rng.gen::<f64>() < self.flip_probability {
            flip_horizontal(image)
        } else {
            image
        };

        if self.noise_level > 0.0 {
            add_noise(image, self.noise_level)
        } else {
            Ok(image)
        }
    }
}
