//! Train a small CNN on a directory of labelled images
//!
//! Usage:
//! ```bash
//! cargo run --release --bin train_folder -- --data ./images --output ./model
//! ```
//!
//! The data directory holds one sub-directory per class.

use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::backend::{Autodiff, NdArray};
use clap::Parser;
use cnn_image_trainer::{
    data::{load_image_folder, to_trainable},
    model::{Layer, Sequential},
    preprocess::{Augmentation, ImagePipeline},
    training::TrainingConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

type Backend = Autodiff<NdArray<f32>>;

#[derive(Parser, Debug)]
#[command(name = "train_folder")]
#[command(about = "Train a CNN image classifier on a folder of labelled images")]
struct Args {
    /// Directory with one sub-directory per class
    #[arg(short, long)]
    data: PathBuf,

    /// Where to write model.json and weights.mpk
    #[arg(short, long, default_value = "model")]
    output: PathBuf,

    /// Square size images are resized to
    #[arg(long, default_value_t = 28)]
    size: usize,

    /// TOML or JSON training config (defaults used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use the step-driven profile (30 epochs x 100 steps)
    #[arg(long)]
    streamed: bool,

    /// Apply noise and random flips while loading
    #[arg(long)]
    augment: bool,

    /// Dropout rate before the classifier
    #[arg(long, default_value_t = 0.25)]
    dropout: f64,
}

fn load_config(args: &Args) -> Result<TrainingConfig> {
    let config = match &args.config {
        Some(path) if path.extension().is_some_and(|e| e == "json") => {
            TrainingConfig::from_json_file(path)?
        }
        Some(path) => TrainingConfig::from_toml_file(path)?,
        None if args.streamed => TrainingConfig::streamed(),
        None => TrainingConfig::default(),
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let device = Default::default();

    let mut pipeline = ImagePipeline::new().with_size(args.size);
    if args.augment {
        pipeline = pipeline.with_augmentation(Augmentation::default());
    }

    info!("Loading images from {}", args.data.display());
    let images = load_image_folder::<Backend>(&args.data, &pipeline, &device)
        .await
        .with_context(|| format!("failed to load {}", args.data.display()))?;
    for (label, count) in images.class_counts() {
        info!("  {}: {} images", label, count);
    }
    let dataset = to_trainable(images)?;
    let [height, width, channels] = dataset.example_shape();

    let mut model = Sequential::<Backend>::with_device(device)
        .add(Layer::conv2d(16, 3, "relu")?.with_input_shape([height, width, channels])?)
        .add(Layer::batch_norm())
        .add(Layer::max_pool2d([2, 2])?)
        .add(Layer::conv2d(32, 3, "relu")?)
        .add(Layer::max_pool2d([2, 2])?)
        .add(Layer::flatten())
        .add(Layer::dropout(args.dropout)?)
        .add(Layer::dense(dataset.num_classes(), "softmax")?);
    model.compile(config.compile_options()?)?;
    model.summary()?;

    let history = model.fit_async(dataset, config.fit_options()).await?;
    if let Some(last) = history.last() {
        info!(
            "Final epoch {}: loss={:.4}, val_loss={}",
            last.epoch,
            last.loss,
            last.val_loss
                .map(|v| format!("{v:.4}"))
                .unwrap_or_else(|| "n/a".to_string())
        );
    }

    let saved = model.save(&args.output).await?;
    std::fs::write(saved.directory.join("history.json"), history.to_json()?)?;
    info!("Saved model to {}", saved.directory.display());

    Ok(())
}
