//! `Sequential` model: layer stack, build/compile lifecycle, training,
//! inference and persistence.

use std::collections::HashMap;
use std::path::Path;

use burn::module::{AutodiffModule, Module};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Tensor;
use tracing::info;

use super::layer::Layer;
use super::network::{Block, Network};
use super::persist::{self, Architecture, SavedModel, FORMAT_VERSION};
use super::shape::{infer_shapes, param_counts, LayerShape};
use super::summary::{LayerSummary, ModelSummary};
use crate::data::Dataset;
use crate::error::{Error, Result, ShapeError, TrainingError};
use crate::training::{
    evaluate_batches, fit_network, CompileOptions, Evaluation, FitOptions, History,
};

/// Linear stack of layers with Keras-like build, compile and fit.
///
/// Layers are plain descriptions until the model is built (implicitly by
/// [`compile`](Self::compile)); building resolves every shape and creates
/// weights. Building again after appending layers only initializes the new
/// ones.
#[derive(Debug)]
pub struct Sequential<B: AutodiffBackend> {
    layers: Vec<Layer>,
    base_shape: Option<Vec<usize>>,
    network: Option<Network<B>>,
    compiled: Option<CompileOptions>,
    device: B::Device,
}

impl<B: AutodiffBackend> Default for Sequential<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: AutodiffBackend> Sequential<B> {
    /// Empty model on the backend's default device.
    pub fn new() -> Self {
        Self::with_device(B::Device::default())
    }

    pub fn with_device(device: B::Device) -> Self {
        Self {
            layers: Vec::new(),
            base_shape: None,
            network: None,
            compiled: None,
            device,
        }
    }

    /// Supply the per-example input shape outside of the first layer.
    pub fn with_input_shape(mut self, shape: impl Into<Vec<usize>>) -> Result<Self> {
        let shape = shape.into();
        if !matches!(shape.len(), 1 | 3) || shape.contains(&0) {
            return Err(Error::config(format!(
                "input shape must be [features] or [height, width, channels], got {shape:?}"
            )));
        }
        if self.network.is_some() {
            return Err(Error::config("input shape cannot change once the model is built"));
        }
        self.base_shape = Some(shape);
        Ok(self)
    }

    /// Append a layer, builder style.
    pub fn add(mut self, layer: Layer) -> Self {
        self.push(layer);
        self
    }

    /// Append a layer in place.
    pub fn push(&mut self, layer: Layer) -> &mut Self {
        self.layers.push(layer);
        self
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn infer_shapes(&self) -> Result<Vec<LayerShape>> {
        Ok(infer_shapes(&self.layers, self.base_shape.as_deref())?)
    }

    pub fn input_shape(&self) -> Result<Vec<usize>> {
        self.infer_shapes()?
            .into_iter()
            .next()
            .map(|shape| shape.input)
            .ok_or_else(|| Error::config("model has no layers"))
    }

    pub fn output_shape(&self) -> Result<Vec<usize>> {
        self.infer_shapes()?
            .pop()
            .map(|shape| shape.output)
            .ok_or_else(|| Error::config("model has no layers"))
    }

    /// Resolve shapes and initialize weights for layers not built yet.
    pub fn build(&mut self) -> Result<&mut Self> {
        if self.layers.is_empty() {
            return Err(Error::config("model has no layers"));
        }
        let shapes = self.infer_shapes()?;
        let last = self.layers.len() - 1;
        if shapes[last].output.len() != 1 {
            return Err(ShapeError::Layer {
                index: last,
                layer: self.layers[last].kind(),
                reason: format!(
                    "model output must be flat, got {:?}; end with flatten or dense",
                    shapes[last].output
                ),
            }
            .into());
        }

        let input = shapes[0].input.clone();
        let mut network = match self.network.take() {
            Some(network) if network.input_shape() == input.as_slice() => network,
            _ => Network::new(input),
        };
        for index in network.len()..self.layers.len() {
            network.push(Block::new(
                &self.layers[index],
                &shapes[index].input,
                &self.device,
            ));
        }
        self.network = Some(network);
        Ok(self)
    }

    /// Bind optimizer, loss and metrics. Builds the model if needed; existing
    /// weights are kept.
    pub fn compile(&mut self, options: CompileOptions) -> Result<&mut Self> {
        options.validate()?;
        self.build()?;
        info!(
            "Model compiled: optimizer={}, loss={}, params={}",
            options.optimizer.name(),
            options.loss.name(),
            self.num_params()
        );
        self.compiled = Some(options);
        Ok(self)
    }

    pub fn is_built(&self) -> bool {
        self.network.is_some()
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    pub fn compile_options(&self) -> Option<&CompileOptions> {
        self.compiled.as_ref()
    }

    pub fn network(&self) -> Option<&Network<B>> {
        self.network.as_ref()
    }

    /// Parameter count of the built network (0 before build).
    pub fn num_params(&self) -> usize {
        self.network
            .as_ref()
            .map(|network| network.num_params())
            .unwrap_or(0)
    }

    pub fn describe(&self) -> Result<ModelSummary> {
        let shapes = self.infer_shapes()?;
        let mut seen: HashMap<&'static str, usize> = HashMap::new();
        let layers = self
            .layers
            .iter()
            .zip(&shapes)
            .map(|(layer, shape)| {
                let count = seen.entry(layer.kind()).or_insert(0);
                *count += 1;
                let (trainable, non_trainable) = param_counts(layer, &shape.input);
                LayerSummary {
                    name: format!("{}_{}", layer.kind(), count),
                    kind: layer.kind(),
                    output_shape: shape.output.clone(),
                    trainable_params: trainable,
                    non_trainable_params: non_trainable,
                }
            })
            .collect();
        Ok(ModelSummary {
            input_shape: shapes.first().map(|s| s.input.clone()).unwrap_or_default(),
            layers,
        })
    }

    /// Log the layer table.
    pub fn summary(&self) -> Result<&Self> {
        let summary = self.describe()?;
        for line in summary.to_string().lines() {
            info!("{}", line);
        }
        Ok(self)
    }

    fn training_parts(&self) -> Result<(Network<B>, CompileOptions, usize)> {
        let compile = self.compiled.clone().ok_or(TrainingError::NotCompiled)?;
        let network = self.network.clone().ok_or(TrainingError::NotCompiled)?;
        let output_width = self.output_shape()?.iter().product();
        Ok((network, compile, output_width))
    }

    /// Train on `dataset`. Weights are replaced only when every epoch
    /// completes; on error the model keeps its pre-fit weights.
    pub fn fit(&mut self, dataset: &Dataset<B>, options: &FitOptions) -> Result<History> {
        let (network, compile, output_width) = self.training_parts()?;
        let (network, history) = fit_network(network, &compile, dataset, options, output_width)?;
        self.network = Some(network);
        Ok(history)
    }

    /// [`fit`](Self::fit) on the blocking thread pool.
    pub async fn fit_async(&mut self, dataset: Dataset<B>, options: FitOptions) -> Result<History> {
        let (network, compile, output_width) = self.training_parts()?;
        let (network, history) = tokio::task::spawn_blocking(move || {
            fit_network(network, &compile, &dataset, &options, output_width)
        })
        .await
        .map_err(|err| TrainingError::Task(err.to_string()))??;
        self.network = Some(network);
        Ok(history)
    }

    /// Inference on `[N, H, W, C]` inputs; dropout off, batch norm uses
    /// running statistics.
    pub fn predict(&self, xs: Tensor<B, 4>) -> Result<Tensor<B::InnerBackend, 2>> {
        let network = self.network.as_ref().ok_or(TrainingError::NotCompiled)?;
        let [n, h, w, c] = xs.dims();
        network.valid().forward(xs.inner().reshape([n, h * w * c]))
    }

    /// Loss and compiled metrics over the whole dataset, without training.
    pub fn evaluate(&self, dataset: &Dataset<B>, batch_size: usize) -> Result<Evaluation> {
        let compile = self.compiled.as_ref().ok_or(TrainingError::NotCompiled)?;
        let network = self.network.as_ref().ok_or(TrainingError::NotCompiled)?;
        let [n, h, w, c] = dataset.xs.dims();
        let xs = dataset.xs.clone().inner().reshape([n, h * w * c]);
        let ys = dataset.ys.clone().inner();
        evaluate_batches(
            &network.valid(),
            &xs,
            &ys,
            batch_size,
            None,
            compile.loss,
            &compile.metrics,
        )
    }

    /// Write `model.json` and `weights.mpk` into `dir`.
    pub async fn save(&self, dir: impl AsRef<Path>) -> Result<SavedModel> {
        let network = self
            .network
            .clone()
            .ok_or_else(|| Error::config("model must be built before saving"))?;
        let architecture = Architecture {
            format_version: FORMAT_VERSION,
            input_shape: network.input_shape().to_vec(),
            layers: self.layers.clone(),
            compile: self.compiled.clone(),
        };
        persist::write(dir.as_ref(), &architecture, network).await
    }

    /// Rebuild a model written by [`save`](Self::save).
    pub async fn load(dir: impl AsRef<Path>, device: &B::Device) -> Result<Self> {
        let dir = dir.as_ref();
        let architecture = persist::read_architecture(dir).await?;

        let mut model = Self::with_device(device.clone()).with_input_shape(architecture.input_shape)?;
        for layer in architecture.layers {
            model.push(layer);
        }
        model.build()?;
        if let Some(compile) = architecture.compile {
            compile.validate()?;
            model.compiled = Some(compile);
        }

        let network = model
            .network
            .take()
            .ok_or_else(|| Error::config("loaded model has no layers"))?;
        model.network = Some(persist::read_weights(dir, network, device).await?);
        info!("Model loaded from {}", dir.display());
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::{Distribution, TensorData};

    type TestBackend = Autodiff<NdArray<f32>>;

    fn mlp() -> Sequential<TestBackend> {
        Sequential::new()
            .add(Layer::dense(8, "relu").unwrap().with_input_shape([4]).unwrap())
            .add(Layer::dense(2, "softmax").unwrap())
    }

    /// Two separable classes over a 2x2x1 "image": bright vs dark.
    fn toy_dataset(n: usize) -> Dataset<TestBackend> {
        let device = Default::default();
        let mut xs = Vec::with_capacity(n * 4);
        let mut ys = Vec::with_capacity(n * 2);
        for i in 0..n {
            let bright = i % 2 == 0;
            let level = if bright { 0.9 } else { 0.1 };
            xs.extend([level; 4]);
            ys.extend(if bright { [1.0, 0.0] } else { [0.0, 1.0] });
        }
        Dataset::new(
            Tensor::from_data(TensorData::new(xs, [n, 2, 2, 1]), &device),
            Tensor::from_data(TensorData::new(ys, [n, 2]), &device),
            vec!["bright".into(), "dark".into()],
        )
    }

    fn compiled_mlp() -> Sequential<TestBackend> {
        let mut model = mlp();
        model
            .compile(CompileOptions::new("adam", "categoricalCrossentropy", &["accuracy"]).unwrap())
            .unwrap();
        model
    }

    #[test]
    fn test_fit_before_compile() {
        let mut model = mlp();
        let err = model.fit(&toy_dataset(8), &FitOptions::new(4, 1, 0.0)).unwrap_err();
        assert!(matches!(err, Error::Training(TrainingError::NotCompiled)));
    }

    #[test]
    fn test_fit_records_every_epoch() {
        let mut model = compiled_mlp();
        let options = FitOptions::new(4, 3, 0.25).with_seed(1);
        let history = model.fit(&toy_dataset(16), &options).unwrap();

        assert_eq!(history.len(), 3);
        assert_eq!(history.series("val_loss").unwrap().len(), 3);
        assert!(history.series("accuracy").is_some());
        for record in history.epochs() {
            assert!(record.loss.is_finite());
            let acc = record.metrics["accuracy"];
            assert!((0.0..=1.0).contains(&acc));
        }
    }

    #[test]
    fn test_no_validation_without_split() {
        let mut model = compiled_mlp();
        let history = model
            .fit(&toy_dataset(8), &FitOptions::new(4, 1, 0.0))
            .unwrap();
        assert!(history.epochs()[0].val_loss.is_none());
    }

    #[test]
    fn test_count_mismatch_keeps_weights() {
        let mut model = compiled_mlp();
        let device = Default::default();
        let probe = Tensor::<TestBackend, 4>::random([3, 2, 2, 1], Distribution::Default, &device);
        let before: Vec<f32> = model.predict(probe.clone()).unwrap().into_data().to_vec().unwrap();

        let good = toy_dataset(8);
        let bad = Dataset::new(good.xs.clone(), good.ys.slice([0..5, 0..2]), good.label_map.clone());
        let err = model.fit(&bad, &FitOptions::new(2, 1, 0.0)).unwrap_err();
        assert!(matches!(
            err,
            Error::Training(TrainingError::ExampleCountMismatch { features: 8, labels: 5 })
        ));

        let after: Vec<f32> = model.predict(probe).unwrap().into_data().to_vec().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_batch_larger_than_training_partition() {
        let mut model = compiled_mlp();
        // 10 examples, 2 held out: 8 left for training
        let err = model
            .fit(&toy_dataset(10), &FitOptions::new(9, 1, 0.2))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Training(TrainingError::BatchTooLarge { batch_size: 9, examples: 8 })
        ));
    }

    #[test]
    fn test_split_too_small_for_validation() {
        let mut model = compiled_mlp();
        let err = model
            .fit(&toy_dataset(4), &FitOptions::new(2, 1, 0.1))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Training(TrainingError::EmptyPartition { .. })
        ));
    }

    #[test]
    fn test_label_width_mismatch() {
        let mut model = Sequential::<TestBackend>::new()
            .add(Layer::dense(3, "softmax").unwrap().with_input_shape([4]).unwrap());
        model
            .compile(CompileOptions::new("sgd", "categoricalCrossentropy", &[]).unwrap())
            .unwrap();
        let err = model
            .fit(&toy_dataset(4), &FitOptions::new(2, 1, 0.0))
            .unwrap_err();
        assert!(matches!(err, Error::Shape(ShapeError::Mismatch { .. })));
    }

    #[test]
    fn test_recompile_keeps_weights() {
        let mut model = compiled_mlp();
        model.fit(&toy_dataset(8), &FitOptions::new(4, 1, 0.0)).unwrap();
        let device = Default::default();
        let probe = Tensor::<TestBackend, 4>::ones([1, 2, 2, 1], &device);
        let before: Vec<f32> = model.predict(probe.clone()).unwrap().into_data().to_vec().unwrap();

        model
            .compile(CompileOptions::new("sgd", "meanSquaredError", &["mae"]).unwrap())
            .unwrap();
        let after: Vec<f32> = model.predict(probe).unwrap().into_data().to_vec().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_steps_per_epoch_cycles() {
        let mut model = compiled_mlp();
        let options = FitOptions {
            batch_size: 4,
            epochs: 2,
            validation_split: 0.25,
            steps_per_epoch: Some(5),
            validation_steps: Some(1),
            seed: Some(3),
            ..Default::default()
        };
        let history = model.fit(&toy_dataset(8), &options).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.last().unwrap().val_loss.is_some());
    }

    #[test]
    fn test_summary_counts() {
        let model = mlp();
        let summary = model.describe().unwrap();
        assert_eq!(summary.layers[0].name, "dense_1");
        assert_eq!(summary.layers[1].name, "dense_2");
        assert_eq!(summary.total_params(), (4 * 8 + 8) + (8 * 2 + 2));
        assert!(summary.to_string().contains("Total params: 58"));
    }

    #[test]
    fn test_num_params_matches_summary() {
        let model = compiled_mlp();
        assert_eq!(model.num_params(), model.describe().unwrap().total_params());
    }

    #[test]
    fn test_spatial_output_cannot_compile() {
        let mut model = Sequential::<TestBackend>::new().add(
            Layer::conv2d(2, 3, "relu")
                .unwrap()
                .with_input_shape([5, 5, 1])
                .unwrap(),
        );
        let err = model
            .compile(CompileOptions::new("adam", "mse", &[]).unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::Shape(ShapeError::Layer { index: 0, .. })));
    }

    #[test]
    fn test_evaluate() {
        let model = compiled_mlp();
        let evaluation = model.evaluate(&toy_dataset(6), 4).unwrap();
        assert_eq!(evaluation.examples, 6);
        assert!(evaluation.loss.is_finite());
        assert!(evaluation.metrics.contains_key("accuracy"));
    }

    #[test]
    fn test_mixed_add_and_push_count_layers() {
        let mut model = Sequential::<TestBackend>::new()
            .add(Layer::dense(8, "relu").unwrap().with_input_shape([4]).unwrap())
            .add(Layer::dropout(0.5).unwrap());
        model
            .push(Layer::dense(4, "relu").unwrap())
            .push(Layer::batch_norm());
        model.push(Layer::dense(2, "softmax").unwrap());
        assert_eq!(model.len(), 5);

        model
            .compile(CompileOptions::new("adam", "categoricalCrossentropy", &[]).unwrap())
            .unwrap();
        assert_eq!(model.network().unwrap().len(), 5);
        assert_eq!(model.infer_shapes().unwrap().len(), 5);
    }

    #[test]
    fn test_full_dropout_freezes_following_weights() {
        let device = Default::default();
        let mut model = Sequential::<TestBackend>::new()
            .add(Layer::dense(8, "relu").unwrap().with_input_shape([4]).unwrap())
            .add(Layer::dropout(1.0).unwrap())
            .add(Layer::dense(2, "linear").unwrap());
        model
            .compile(CompileOptions::new("adam", "meanSquaredError", &["mse"]).unwrap())
            .unwrap();

        // with a linear head, output differences only depend on the weights
        let a = Tensor::<TestBackend, 4>::random([3, 2, 2, 1], Distribution::Default, &device);
        let b = Tensor::<TestBackend, 4>::random([3, 2, 2, 1], Distribution::Default, &device);
        let spread = |model: &Sequential<TestBackend>| -> Vec<f32> {
            let diff = model.predict(a.clone()).unwrap() - model.predict(b.clone()).unwrap();
            diff.into_data().to_vec().unwrap()
        };
        let before = spread(&model);

        let history = model
            .fit(&toy_dataset(8), &FitOptions::new(4, 2, 0.0).with_seed(1))
            .unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.epochs().iter().all(|record| record.loss.is_finite()));

        // nothing before the head gets gradients and its weights see zero input
        for (x, y) in before.iter().zip(spread(&model)) {
            assert!((x - y).abs() < 1e-6, "weights changed: {x} vs {y}");
        }
    }
}
