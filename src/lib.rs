//! # CNN Image Trainer
//!
//! Build small convolutional image classifiers layer by layer, turn image
//! files into tensors, and train with mini-batch gradient descent on top of
//! [Burn](https://burn.dev).
//!
//! ## Modules
//!
//! - `model` - Sequential layer stack, shape inference, summary, save/load
//! - `training` - Compile and fit options, training loop, history
//! - `preprocess` - Image decode/resize/normalize and augmentation
//! - `data` - Dataset schema adapter, image folder loader, batching
//! - `arena` - Scoped ownership of intermediate tensors
//!
//! ## Example
//!
//! ```ignore
//! use burn::backend::{Autodiff, NdArray};
//! use cnn_image_trainer::prelude::*;
//!
//! type B = Autodiff<NdArray<f32>>;
//!
//! let device = Default::default();
//! let pipeline = ImagePipeline::new().with_size(28);
//! let images = load_image_folder::<B>("data/digits", &pipeline, &device).await?;
//! let dataset = to_trainable(images)?;
//!
//! let mut model = Sequential::<B>::new()
//!     .add(Layer::conv2d(8, 3, "relu")?.with_input_shape([28, 28, 3])?)
//!     .add(Layer::max_pool2d([2, 2])?)
//!     .add(Layer::flatten())
//!     .add(Layer::dense(dataset.num_classes(), "softmax")?);
//! model.compile(CompileOptions::new("adam", "categoricalCrossentropy", &["accuracy"])?)?;
//! let history = model.fit(&dataset, &FitOptions::new(10, 5, 0.2))?;
//! model.save("out/model").await?;
//! ```

pub mod arena;
pub mod data;
pub mod error;
pub mod model;
pub mod preprocess;
pub mod training;

pub use arena::{TensorArena, TensorId};
pub use data::{load_image_folder, to_trainable, Dataset, LabeledImages};
pub use error::{Error, Result};
pub use model::{Layer, Sequential};
pub use preprocess::ImagePipeline;
pub use training::{CompileOptions, FitOptions, History, TrainingConfig};

/// Commonly used types in one import.
pub mod prelude {
    pub use crate::arena::{Retained, TensorArena, TensorId};
    pub use crate::data::{load_image_folder, one_hot, to_trainable, Dataset, LabeledImages, RawDataset};
    pub use crate::error::{Error, Result};
    pub use crate::model::{Activation, Layer, ModelSummary, Padding, Sequential};
    pub use crate::preprocess::{Augmentation, ImagePipeline};
    pub use crate::training::{CompileOptions, FitOptions, History, TrainingConfig};
}
