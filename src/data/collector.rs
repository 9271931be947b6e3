//! Collects preprocessed examples with string labels into a dataset.

use std::collections::BTreeMap;

use burn::tensor::backend::Backend;
use burn::tensor::{Float, Tensor, TensorData};

use super::dataset::{DatasetSource, RawDataset};
use crate::arena::{TensorArena, TensorId};
use crate::error::{Error, Result, ShapeError};

/// One-hot encode class indices into a `[N, classes]` float tensor.
pub fn one_hot<B: Backend>(indices: &[usize], classes: usize, device: &B::Device) -> Result<Tensor<B, 2>> {
    if classes == 0 {
        return Err(Error::config("one_hot needs at least one class"));
    }
    let mut values = vec![0.0f32; indices.len() * classes];
    for (row, &index) in indices.iter().enumerate() {
        if index >= classes {
            return Err(Error::config(format!(
                "class index {index} out of range for {classes} classes"
            )));
        }
        values[row * classes + index] = 1.0;
    }
    Ok(Tensor::from_data(
        TensorData::new(values, [indices.len(), classes]),
        device,
    ))
}

/// Accumulates preprocessed `[1, H, W, C]` examples with their label names.
///
/// Labels get indices in order of first appearance unless a fixed label
/// list was given up front.
#[derive(Debug)]
pub struct LabeledImages<B: Backend> {
    examples: Vec<Tensor<B, 4>>,
    labels: Vec<usize>,
    label_map: Vec<String>,
    fixed_labels: bool,
    example_shape: Option<[usize; 4]>,
    device: B::Device,
}

impl<B: Backend> LabeledImages<B> {
    pub fn new(device: &B::Device) -> Self {
        Self {
            examples: Vec::new(),
            labels: Vec::new(),
            label_map: Vec::new(),
            fixed_labels: false,
            example_shape: None,
            device: device.clone(),
        }
    }

    /// Collector that only accepts the given labels, in the given order.
    pub fn with_labels(device: &B::Device, labels: Vec<String>) -> Self {
        Self {
            label_map: labels,
            fixed_labels: true,
            ..Self::new(device)
        }
    }

    /// Add one example; returns the class index assigned to `label`.
    pub fn push(&mut self, example: Tensor<B, 4>, label: &str) -> Result<usize> {
        let dims = example.dims();
        if dims[0] != 1 {
            return Err(ShapeError::Mismatch {
                what: "example batch dimension",
                expected: vec![1],
                got: dims.to_vec(),
            }
            .into());
        }
        match self.example_shape {
            Some(shape) if shape != dims => {
                return Err(ShapeError::Mismatch {
                    what: "example shape",
                    expected: shape.to_vec(),
                    got: dims.to_vec(),
                }
                .into());
            }
            Some(_) => {}
            None => self.example_shape = Some(dims),
        }

        let index = match self.label_map.iter().position(|l| l == label) {
            Some(index) => index,
            None if self.fixed_labels => {
                return Err(Error::config(format!("unknown label `{label}`")));
            }
            None => {
                self.label_map.push(label.to_string());
                self.label_map.len() - 1
            }
        };

        self.examples.push(example);
        self.labels.push(index);
        Ok(index)
    }

    /// Move a preprocessed tensor out of `arena` into the collection.
    pub fn push_from_arena(&mut self, arena: &mut TensorArena<B>, id: TensorId, label: &str) -> Result<usize> {
        let example = arena.take::<4, Float>(id)?;
        self.push(example, label)
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn label_map(&self) -> &[String] {
        &self.label_map
    }

    /// Number of examples per label name.
    pub fn class_counts(&self) -> BTreeMap<String, usize> {
        let mut counts: BTreeMap<String, usize> = self
            .label_map
            .iter()
            .map(|label| (label.clone(), 0))
            .collect();
        for &index in &self.labels {
            *counts.entry(self.label_map[index].clone()).or_default() += 1;
        }
        counts
    }
}

impl<B: Backend> DatasetSource<B> for LabeledImages<B> {
    fn into_raw(self) -> Result<RawDataset<B>> {
        let raw = RawDataset::new().with_label_map(self.label_map.clone());
        if self.examples.is_empty() {
            return Ok(raw);
        }
        let ys = one_hot(&self.labels, self.label_map.len(), &self.device)?;
        let xs = Tensor::cat(self.examples, 0);
        Ok(raw.with_xs(xs).with_ys(ys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::to_trainable;
    use crate::error::SchemaError;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn example(fill: f32) -> Tensor<TestBackend, 4> {
        let device = Default::default();
        Tensor::ones([1, 2, 2, 1], &device).mul_scalar(fill)
    }

    #[test]
    fn test_one_hot_rows() {
        let device = Default::default();
        let encoded = one_hot::<TestBackend>(&[2, 0], 3, &device).unwrap();
        let values: Vec<f32> = encoded.into_data().to_vec().unwrap();
        assert_eq!(values, vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0]);

        assert!(one_hot::<TestBackend>(&[3], 3, &device).is_err());
    }

    #[test]
    fn test_labels_indexed_by_first_appearance() {
        let device = Default::default();
        let mut images = LabeledImages::<TestBackend>::new(&device);
        assert_eq!(images.push(example(0.1), "dog").unwrap(), 0);
        assert_eq!(images.push(example(0.2), "cat").unwrap(), 1);
        assert_eq!(images.push(example(0.3), "dog").unwrap(), 0);

        assert_eq!(images.class_counts()["dog"], 2);
        let dataset = to_trainable(images).unwrap();
        assert_eq!(dataset.label_map, vec!["dog", "cat"]);
        assert_eq!(dataset.xs.dims(), [3, 2, 2, 1]);

        let labels: Vec<f32> = dataset.ys.into_data().to_vec().unwrap();
        assert_eq!(labels, vec![1.0, 0.0, 0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_fixed_labels_reject_unknown() {
        let device = Default::default();
        let mut images =
            LabeledImages::<TestBackend>::with_labels(&device, vec!["a".into(), "b".into()]);
        assert_eq!(images.push(example(1.0), "b").unwrap(), 1);
        assert!(matches!(images.push(example(1.0), "c"), Err(Error::Config(_))));
    }

    #[test]
    fn test_inconsistent_shapes_rejected() {
        let device = Default::default();
        let mut images = LabeledImages::<TestBackend>::new(&device);
        images.push(example(1.0), "a").unwrap();
        let wrong = Tensor::<TestBackend, 4>::zeros([1, 3, 3, 1], &device);
        assert!(matches!(images.push(wrong, "a"), Err(Error::Shape(_))));
    }

    #[test]
    fn test_empty_collection_lacks_xs() {
        let device = Default::default();
        let images = LabeledImages::<TestBackend>::new(&device);
        assert!(matches!(
            to_trainable(images),
            Err(Error::Schema(SchemaError::MissingField("xs")))
        ));
    }

    #[test]
    fn test_push_from_arena_takes_ownership() {
        let device = Default::default();
        let mut arena = TensorArena::<TestBackend>::new();
        arena.start_scope();
        let id = arena.track(example(0.5));

        let mut images = LabeledImages::new(&device);
        images.push_from_arena(&mut arena, id, "x").unwrap();
        let report = arena.end_scope().unwrap();

        assert_eq!(report.disposed, 0);
        assert_eq!(images.len(), 1);
    }
}
