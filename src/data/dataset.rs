//! Dataset adapter
//!
//! Converts loosely-typed collected data into a training-ready [`Dataset`].

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::error::{Result, SchemaError};

/// Training-ready examples: `xs` is `[N, H, W, C]`, `ys` is one-hot `[N, K]`
/// and `label_map[i]` names class `i`.
#[derive(Debug, Clone)]
pub struct Dataset<B: Backend> {
    /// Features `[N, H, W, C]`
    pub xs: Tensor<B, 4>,
    /// One-hot labels `[N, K]`
    pub ys: Tensor<B, 2>,
    /// Class name per label index
    pub label_map: Vec<String>,
}

impl<B: Backend> Dataset<B> {
    /// Assemble without checks. Prefer [`to_trainable`] for collected data.
    pub fn new(xs: Tensor<B, 4>, ys: Tensor<B, 2>, label_map: Vec<String>) -> Self {
        Self { xs, ys, label_map }
    }

    pub fn num_examples(&self) -> usize {
        self.xs.dims()[0]
    }

    pub fn num_classes(&self) -> usize {
        self.ys.dims()[1]
    }

    /// Per-example shape `[H, W, C]`.
    pub fn example_shape(&self) -> [usize; 3] {
        let [_, height, width, channels] = self.xs.dims();
        [height, width, channels]
    }

    pub fn label_index(&self, name: &str) -> Option<usize> {
        self.label_map.iter().position(|label| label == name)
    }
}

/// Loosely-typed collected data, as produced by an ingestion step. Every
/// field may be missing; [`to_trainable`] checks them.
#[derive(Debug, Clone)]
pub struct RawDataset<B: Backend> {
    pub xs: Option<Tensor<B, 4>>,
    pub ys: Option<Tensor<B, 2>>,
    pub label_map: Option<Vec<String>>,
}

impl<B: Backend> Default for RawDataset<B> {
    fn default() -> Self {
        Self {
            xs: None,
            ys: None,
            label_map: None,
        }
    }
}

impl<B: Backend> RawDataset<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_xs(mut self, xs: Tensor<B, 4>) -> Self {
        self.xs = Some(xs);
        self
    }

    pub fn with_ys(mut self, ys: Tensor<B, 2>) -> Self {
        self.ys = Some(ys);
        self
    }

    pub fn with_label_map(mut self, label_map: Vec<String>) -> Self {
        self.label_map = Some(label_map);
        self
    }
}

/// Anything that can hand over collected examples.
pub trait DatasetSource<B: Backend> {
    fn into_raw(self) -> Result<RawDataset<B>>;
}

impl<B: Backend> DatasetSource<B> for RawDataset<B> {
    fn into_raw(self) -> Result<RawDataset<B>> {
        Ok(self)
    }
}

impl<B: Backend> DatasetSource<B> for Dataset<B> {
    fn into_raw(self) -> Result<RawDataset<B>> {
        Ok(RawDataset {
            xs: Some(self.xs),
            ys: Some(self.ys),
            label_map: Some(self.label_map),
        })
    }
}

/// Map collected data to the training schema. Tensors are moved, not copied.
pub fn to_trainable<B: Backend, S: DatasetSource<B>>(source: S) -> Result<Dataset<B>> {
    let raw = source.into_raw()?;
    let xs = raw.xs.ok_or(SchemaError::MissingField("xs"))?;
    let ys = raw.ys.ok_or(SchemaError::MissingField("ys"))?;
    let label_map = raw.label_map.ok_or(SchemaError::MissingField("label_map"))?;

    let width = ys.dims()[1];
    if label_map.len() != width {
        return Err(SchemaError::LabelWidth {
            labels: label_map.len(),
            width,
        }
        .into());
    }
    Ok(Dataset::new(xs, ys, label_map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn raw(n: usize, k: usize) -> RawDataset<TestBackend> {
        let device = Default::default();
        RawDataset::new()
            .with_xs(Tensor::zeros([n, 4, 4, 1], &device))
            .with_ys(Tensor::zeros([n, k], &device))
    }

    #[test]
    fn test_to_trainable_moves_fields() {
        let labels = vec!["cat".to_string(), "dog".to_string()];
        let dataset = to_trainable(raw(3, 2).with_label_map(labels.clone())).unwrap();

        assert_eq!(dataset.num_examples(), 3);
        assert_eq!(dataset.num_classes(), 2);
        assert_eq!(dataset.example_shape(), [4, 4, 1]);
        assert_eq!(dataset.label_map, labels);
        assert_eq!(dataset.label_index("dog"), Some(1));
    }

    #[test]
    fn test_missing_label_map_is_schema_error() {
        let err = to_trainable(raw(3, 2)).unwrap_err();
        assert!(matches!(
            err,
            Error::Schema(SchemaError::MissingField("label_map"))
        ));
    }

    #[test]
    fn test_missing_xs_is_schema_error() {
        let device = Default::default();
        let source = RawDataset::<TestBackend>::new()
            .with_ys(Tensor::zeros([1, 1], &device))
            .with_label_map(vec!["a".into()]);
        assert!(matches!(
            to_trainable(source),
            Err(Error::Schema(SchemaError::MissingField("xs")))
        ));
    }

    #[test]
    fn test_label_width_must_match() {
        let err = to_trainable(raw(2, 3).with_label_map(vec!["a".into()])).unwrap_err();
        assert!(matches!(
            err,
            Error::Schema(SchemaError::LabelWidth {
                labels: 1,
                width: 3
            })
        ));
    }
}
