//! # Image Preprocessing
//!
//! Pure tensor functions turning encoded image bytes into model inputs,
//! plus the randomized augmentations used during training.
//!
//! Every function returns a new tensor and leaves its input untouched.
//! [`ImagePipeline`] chains them and registers the intermediates in a
//! [`TensorArena`](crate::arena::TensorArena) scope so they are released
//! as soon as the final tensor exists.

mod augment;
mod transform;
mod pipeline;

pub use augment::{add_noise, flip_horizontal, Augmentation, PIXEL_MAX, PIXEL_MIN};
pub use transform::{decode, expand_dims, is_image_shape, normalize, resize_nearest, to_float, PIXEL_SCALE};
pub use pipeline::ImagePipeline;

#[cfg(test)]
pub(crate) use transform::tests::png_rgba;
