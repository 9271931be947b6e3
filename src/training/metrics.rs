//! Evaluation metrics and epoch-level averaging.

use std::collections::BTreeMap;

use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor};

use super::config::MetricKind;

impl MetricKind {
    /// Batch mean of the metric.
    pub fn compute<B: Backend>(&self, output: Tensor<B, 2>, targets: Tensor<B, 2>) -> f64 {
        let [batch, width] = output.dims();
        if batch == 0 {
            return 0.0;
        }
        match self {
            MetricKind::Accuracy => {
                let correct = if width == 1 {
                    output
                        .greater_equal_elem(0.5)
                        .equal(targets.greater_equal_elem(0.5))
                } else {
                    output.argmax(1).equal(targets.argmax(1))
                };
                let correct = correct.int().sum().into_scalar().elem::<f64>();
                correct / batch as f64
            }
            MetricKind::Mse => (output - targets)
                .powf_scalar(2.0)
                .mean()
                .into_scalar()
                .elem::<f64>(),
            MetricKind::Mae => (output - targets).abs().mean().into_scalar().elem::<f64>(),
        }
    }
}

/// Example-weighted running means of the loss and metrics over one epoch.
#[derive(Debug, Clone)]
pub(crate) struct EpochAccumulator {
    metrics: Vec<MetricKind>,
    loss_sum: f64,
    metric_sums: Vec<f64>,
    examples: usize,
    batches: usize,
}

impl EpochAccumulator {
    pub fn new(metrics: &[MetricKind]) -> Self {
        Self {
            metrics: metrics.to_vec(),
            loss_sum: 0.0,
            metric_sums: vec![0.0; metrics.len()],
            examples: 0,
            batches: 0,
        }
    }

    pub fn add<B: Backend>(&mut self, loss: f64, output: Tensor<B, 2>, targets: Tensor<B, 2>) {
        let size = output.dims()[0];
        self.loss_sum += loss * size as f64;
        for (sum, metric) in self.metric_sums.iter_mut().zip(&self.metrics) {
            *sum += metric.compute(output.clone(), targets.clone()) * size as f64;
        }
        self.examples += size;
        self.batches += 1;
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn examples(&self) -> usize {
        self.examples
    }

    pub fn mean_loss(&self) -> f64 {
        if self.examples == 0 {
            return 0.0;
        }
        self.loss_sum / self.examples as f64
    }

    pub fn finish(&self) -> (f64, BTreeMap<String, f64>) {
        let denom = self.examples.max(1) as f64;
        let metrics = self
            .metrics
            .iter()
            .zip(&self.metric_sums)
            .map(|(metric, sum)| (metric.key().to_string(), sum / denom))
            .collect();
        (self.mean_loss(), metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type TestBackend = NdArray<f32>;

    fn tensor(values: Vec<f32>, shape: [usize; 2]) -> Tensor<TestBackend, 2> {
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    #[test]
    fn test_categorical_accuracy() {
        let output = tensor(vec![0.9, 0.1, 0.3, 0.7, 0.6, 0.4, 0.2, 0.8], [4, 2]);
        let targets = tensor(vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 1.0], [4, 2]);
        approx::assert_relative_eq!(MetricKind::Accuracy.compute(output, targets), 0.75);
    }

    #[test]
    fn test_binary_accuracy_thresholds() {
        let output = tensor(vec![0.9, 0.4, 0.6], [3, 1]);
        let targets = tensor(vec![1.0, 0.0, 0.0], [3, 1]);
        approx::assert_relative_eq!(
            MetricKind::Accuracy.compute(output, targets),
            2.0 / 3.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_error_metrics() {
        let output = tensor(vec![1.0, 3.0], [1, 2]);
        let targets = tensor(vec![0.0, 1.0], [1, 2]);
        approx::assert_relative_eq!(
            MetricKind::Mse.compute(output.clone(), targets.clone()),
            2.5
        );
        approx::assert_relative_eq!(MetricKind::Mae.compute(output, targets), 1.5);
    }

    #[test]
    fn test_accumulator_weights_by_examples() {
        let mut acc = EpochAccumulator::new(&[MetricKind::Accuracy]);
        // batch of 3 all correct, batch of 1 wrong
        acc.add(
            1.0,
            tensor(vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0], [3, 2]),
            tensor(vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0], [3, 2]),
        );
        acc.add(
            5.0,
            tensor(vec![1.0, 0.0], [1, 2]),
            tensor(vec![0.0, 1.0], [1, 2]),
        );

        let (loss, metrics) = acc.finish();
        approx::assert_relative_eq!(loss, 2.0);
        approx::assert_relative_eq!(metrics["accuracy"], 0.75);
        assert_eq!(acc.batches(), 2);
        assert_eq!(acc.examples(), 4);
    }
}
