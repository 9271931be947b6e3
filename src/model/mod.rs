//! # Sequential Model Builder
//!
//! A model is an ordered list of [`Layer`] descriptions. Shapes are checked
//! statically when the model is built and the layers are then backed by
//! burn modules (see [`Network`]).
//!
//! ```ignore
//! let mut model = Sequential::<B>::new()
//!     .add(Layer::conv2d(8, 3, "relu")?.with_input_shape([28, 28, 1])?)
//!     .add(Layer::max_pool2d([2, 2])?)
//!     .add(Layer::flatten())
//!     .add(Layer::dense(10, "softmax")?);
//! model.compile(CompileOptions::new("adam", "categoricalCrossentropy", &["accuracy"])?)?;
//! ```

mod layer;
mod network;
mod persist;
mod sequential;
mod shape;
mod summary;

pub use layer::{
    Activation, BatchNormSpec, Conv2dSpec, DenseSpec, DropoutSpec, Layer, MaxPool2dSpec, Padding,
    BATCH_NORM_EPSILON, BATCH_NORM_MOMENTUM,
};
pub use network::{Block, Network};
pub use persist::{Architecture, SavedModel, ARCHITECTURE_FILE, FORMAT_VERSION, WEIGHTS_STEM};
pub use sequential::Sequential;
pub use shape::{infer_shapes, output_shape, param_counts, LayerShape};
pub use summary::{LayerSummary, ModelSummary};
