//! Compile and fit parameters, plus a file-backed configuration combining
//! both.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Gradient-based optimizer selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Adam,
    Sgd,
    RmsProp,
}

impl OptimizerKind {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "adam" => Ok(OptimizerKind::Adam),
            "sgd" => Ok(OptimizerKind::Sgd),
            "rmsprop" => Ok(OptimizerKind::RmsProp),
            other => Err(Error::config(format!("unknown optimizer `{other}`"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OptimizerKind::Adam => "adam",
            OptimizerKind::Sgd => "sgd",
            OptimizerKind::RmsProp => "rmsprop",
        }
    }

    /// Learning rate used when none is given.
    pub fn default_learning_rate(&self) -> f64 {
        match self {
            OptimizerKind::Adam => 1e-3,
            OptimizerKind::Sgd => 1e-2,
            OptimizerKind::RmsProp => 1e-3,
        }
    }
}

/// Training objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LossKind {
    CategoricalCrossentropy,
    BinaryCrossentropy,
    MeanSquaredError,
}

impl LossKind {
    /// Accepts camelCase (`categoricalCrossentropy`) and snake_case names.
    pub fn parse(name: &str) -> Result<Self> {
        let key: String = name
            .trim()
            .chars()
            .filter(|c| *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "categoricalcrossentropy" => Ok(LossKind::CategoricalCrossentropy),
            "binarycrossentropy" => Ok(LossKind::BinaryCrossentropy),
            "meansquarederror" | "mse" => Ok(LossKind::MeanSquaredError),
            _ => Err(Error::config(format!("unknown loss `{name}`"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LossKind::CategoricalCrossentropy => "categoricalCrossentropy",
            LossKind::BinaryCrossentropy => "binaryCrossentropy",
            LossKind::MeanSquaredError => "meanSquaredError",
        }
    }
}

/// Metric reported per epoch alongside the loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Accuracy,
    Mse,
    Mae,
}

impl MetricKind {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "accuracy" | "acc" => Ok(MetricKind::Accuracy),
            "mse" | "meansquarederror" => Ok(MetricKind::Mse),
            "mae" | "meanabsoluteerror" => Ok(MetricKind::Mae),
            other => Err(Error::config(format!("unknown metric `{other}`"))),
        }
    }

    /// History key of the metric.
    pub fn key(&self) -> &'static str {
        match self {
            MetricKind::Accuracy => "accuracy",
            MetricKind::Mse => "mse",
            MetricKind::Mae => "mae",
        }
    }
}

/// Options bound to a model by `compile`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileOptions {
    pub optimizer: OptimizerKind,
    pub loss: LossKind,
    pub metrics: Vec<MetricKind>,
    /// Falls back to the optimizer default when `None`.
    pub learning_rate: Option<f64>,
}

impl CompileOptions {
    /// Resolve options from names, e.g. `("adam", "categoricalCrossentropy", &["accuracy"])`.
    pub fn new(optimizer: &str, loss: &str, metrics: &[&str]) -> Result<Self> {
        let metrics = metrics
            .iter()
            .map(|name| MetricKind::parse(name))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            optimizer: OptimizerKind::parse(optimizer)?,
            loss: LossKind::parse(loss)?,
            metrics,
            learning_rate: None,
        })
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = Some(learning_rate);
        self
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
            .unwrap_or_else(|| self.optimizer.default_learning_rate())
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(lr) = self.learning_rate {
            if !lr.is_finite() || lr <= 0.0 {
                return Err(Error::config(format!(
                    "learning rate must be finite and > 0, got {lr}"
                )));
            }
        }
        let mut seen = Vec::new();
        for metric in &self.metrics {
            if seen.contains(metric) {
                return Err(Error::config(format!(
                    "metric `{}` listed twice",
                    metric.key()
                )));
            }
            seen.push(*metric);
        }
        Ok(())
    }
}

/// Options of a single `fit` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitOptions {
    pub batch_size: usize,
    pub epochs: usize,
    /// Fraction of examples, taken from the end, held out for validation.
    pub validation_split: f64,
    /// Reshuffle the training partition every epoch.
    pub shuffle: bool,
    /// Seed for the shuffle order; random when `None`.
    pub seed: Option<u64>,
    /// Fixed number of batches per epoch, cycling through the data.
    pub steps_per_epoch: Option<usize>,
    /// Cap on validation batches per epoch.
    pub validation_steps: Option<usize>,
    /// Log running loss every N batches.
    pub log_interval: usize,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            batch_size: 32,
            epochs: 10,
            validation_split: 0.2,
            shuffle: true,
            seed: None,
            steps_per_epoch: None,
            validation_steps: None,
            log_interval: 10,
        }
    }
}

impl FitOptions {
    pub fn new(batch_size: usize, epochs: usize, validation_split: f64) -> Self {
        Self {
            batch_size,
            epochs,
            validation_split,
            ..Default::default()
        }
    }

    /// Step-driven profile: 30 epochs of 100 batches, 50 validation batches.
    pub fn streamed() -> Self {
        Self {
            epochs: 30,
            steps_per_epoch: Some(100),
            validation_steps: Some(50),
            ..Default::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::config("batch_size must be > 0"));
        }
        if self.epochs == 0 {
            return Err(Error::config("epochs must be > 0"));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(Error::config(format!(
                "validation_split must be in [0, 1), got {}",
                self.validation_split
            )));
        }
        if self.steps_per_epoch == Some(0) {
            return Err(Error::config("steps_per_epoch must be > 0"));
        }
        if self.validation_steps == Some(0) {
            return Err(Error::config("validation_steps must be > 0"));
        }
        Ok(())
    }
}

/// Training configuration as stored on disk. Identifiers are plain names so
/// the file stays readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// `adam`, `sgd` or `rmsprop`
    pub optimizer: String,
    /// Loss name, camel or snake case
    pub loss: String,
    /// Metric names reported per epoch
    pub metrics: Vec<String>,
    /// Overrides the optimizer's default rate
    pub learning_rate: Option<f64>,
    /// Batch size
    pub batch_size: usize,
    /// Number of epochs
    pub epochs: usize,
    /// Fraction of examples held out for validation
    pub validation_split: f64,
    /// Shuffle training examples every epoch
    pub shuffle: bool,
    /// Seed for shuffling
    pub seed: Option<u64>,
    /// Fixed batches per epoch, cycling over the training data
    pub steps_per_epoch: Option<usize>,
    /// Cap on validation batches
    pub validation_steps: Option<usize>,
    /// Batches between debug log lines
    pub log_interval: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        let fit = FitOptions::default();
        Self {
            optimizer: "adam".to_string(),
            loss: "categoricalCrossentropy".to_string(),
            metrics: vec!["accuracy".to_string()],
            learning_rate: None,
            batch_size: fit.batch_size,
            epochs: fit.epochs,
            validation_split: fit.validation_split,
            shuffle: fit.shuffle,
            seed: fit.seed,
            steps_per_epoch: fit.steps_per_epoch,
            validation_steps: fit.validation_steps,
            log_interval: fit.log_interval,
        }
    }
}

impl TrainingConfig {
    /// Short run for smoke tests.
    pub fn quick() -> Self {
        Self {
            epochs: 2,
            batch_size: 16,
            ..Default::default()
        }
    }

    /// Step-driven profile, see [`FitOptions::streamed`].
    pub fn streamed() -> Self {
        let fit = FitOptions::streamed();
        Self {
            epochs: fit.epochs,
            steps_per_epoch: fit.steps_per_epoch,
            validation_steps: fit.validation_steps,
            ..Default::default()
        }
    }

    pub fn compile_options(&self) -> Result<CompileOptions> {
        let metrics: Vec<&str> = self.metrics.iter().map(String::as_str).collect();
        let mut options = CompileOptions::new(&self.optimizer, &self.loss, &metrics)?;
        options.learning_rate = self.learning_rate;
        Ok(options)
    }

    pub fn fit_options(&self) -> FitOptions {
        FitOptions {
            batch_size: self.batch_size,
            epochs: self.epochs,
            validation_split: self.validation_split,
            shuffle: self.shuffle,
            seed: self.seed,
            steps_per_epoch: self.steps_per_epoch,
            validation_steps: self.validation_steps,
            log_interval: self.log_interval,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.compile_options()?.validate()?;
        self.fit_options().validate()
    }

    /// Load from a TOML file and validate.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::config(format!("failed to parse TOML config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file and validate.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_toml_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("failed to serialize TOML config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
