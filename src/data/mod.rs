//! # Dataset Adapter
//!
//! Collected examples ([`LabeledImages`], or anything implementing
//! [`DatasetSource`]) are mapped to the `{xs, ys, label_map}` schema the
//! trainer consumes by [`to_trainable`].

mod collector;
mod dataset;
mod folder;
mod sampler;

pub use collector::{one_hot, LabeledImages};
pub use dataset::{to_trainable, Dataset, DatasetSource, RawDataset};
pub use folder::load_image_folder;
pub use sampler::BatchSampler;
