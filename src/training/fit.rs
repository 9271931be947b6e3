//! Mini-batch training loop behind `Sequential::fit`.

use std::collections::BTreeMap;

use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer, RmsPropConfig, SgdConfig};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Int, Tensor, TensorData};
use tracing::{debug, info};

use super::config::{CompileOptions, FitOptions, LossKind, MetricKind, OptimizerKind};
use super::history::{EpochRecord, History};
use super::metrics::EpochAccumulator;
use crate::data::{BatchSampler, Dataset};
use crate::error::{Result, ShapeError, TrainingError};
use crate::model::Network;

/// Loss and metric means over an evaluated set.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub loss: f64,
    pub metrics: BTreeMap<String, f64>,
    pub examples: usize,
}

/// Training and validation partitions, flattened to `[N, features]`.
struct Partitions<B: AutodiffBackend> {
    train_x: Tensor<B, 2>,
    train_y: Tensor<B, 2>,
    train_count: usize,
    val: Option<(Tensor<B::InnerBackend, 2>, Tensor<B::InnerBackend, 2>)>,
}

/// Check `dataset` against the network and split off the validation tail.
fn partition<B: AutodiffBackend>(
    network: &Network<B>,
    dataset: &Dataset<B>,
    options: &FitOptions,
    output_width: usize,
) -> Result<Partitions<B>> {
    let [examples, height, width, channels] = dataset.xs.dims();
    let [labels, label_width] = dataset.ys.dims();
    if examples != labels {
        return Err(TrainingError::ExampleCountMismatch {
            features: examples,
            labels,
        }
        .into());
    }

    let example_shape = vec![height, width, channels];
    let input_shape = network.input_shape();
    let compatible = if input_shape.len() == 3 {
        input_shape == example_shape.as_slice()
    } else {
        network.input_features() == height * width * channels
    };
    if !compatible {
        return Err(ShapeError::Mismatch {
            what: "example shape",
            expected: input_shape.to_vec(),
            got: example_shape,
        }
        .into());
    }
    if label_width != output_width {
        return Err(ShapeError::Mismatch {
            what: "label width",
            expected: vec![output_width],
            got: vec![label_width],
        }
        .into());
    }

    let val_count = (examples as f64 * options.validation_split).floor() as usize;
    let train_count = examples - val_count;
    if train_count == 0 {
        return Err(TrainingError::EmptyPartition {
            partition: "training",
        }
        .into());
    }
    if options.validation_split > 0.0 && val_count == 0 {
        return Err(TrainingError::EmptyPartition {
            partition: "validation",
        }
        .into());
    }
    if options.batch_size > train_count {
        return Err(TrainingError::BatchTooLarge {
            batch_size: options.batch_size,
            examples: train_count,
        }
        .into());
    }

    let features = height * width * channels;
    let xs = dataset.xs.clone().reshape([examples, features]);
    let ys = dataset.ys.clone();
    let val = (val_count > 0).then(|| {
        (
            xs.clone().slice([train_count..examples, 0..features]).inner(),
            ys.clone().slice([train_count..examples, 0..label_width]).inner(),
        )
    });

    Ok(Partitions {
        train_x: xs.slice([0..train_count, 0..features]),
        train_y: ys.slice([0..train_count, 0..label_width]),
        train_count,
        val,
    })
}

/// Train `network` in place of the caller. On error the partially trained
/// network is dropped; callers keep their own pre-fit copy.
pub(crate) fn fit_network<B: AutodiffBackend>(
    network: Network<B>,
    compile: &CompileOptions,
    dataset: &Dataset<B>,
    options: &FitOptions,
    output_width: usize,
) -> Result<(Network<B>, History)> {
    compile.validate()?;
    options.validate()?;
    let data = partition(&network, dataset, options, output_width)?;

    info!(
        "Starting training for {} epochs ({} train / {} validation examples)",
        options.epochs,
        data.train_count,
        data.val.as_ref().map(|(x, _)| x.dims()[0]).unwrap_or(0)
    );
    info!(
        "Optimizer: {} (lr={}), loss: {}",
        compile.optimizer.name(),
        compile.learning_rate(),
        compile.loss.name()
    );

    // fresh optimizer state on every call
    let (network, records) = match compile.optimizer {
        OptimizerKind::Adam => {
            let optimizer = AdamConfig::new().init::<B, Network<B>>();
            train_epochs(network, optimizer, compile, options, &data)?
        }
        OptimizerKind::Sgd => {
            let optimizer = SgdConfig::new().init::<B, Network<B>>();
            train_epochs(network, optimizer, compile, options, &data)?
        }
        OptimizerKind::RmsProp => {
            let optimizer = RmsPropConfig::new().init::<B, Network<B>>();
            train_epochs(network, optimizer, compile, options, &data)?
        }
    };

    let history = History::from_records(records);
    if let Some(last) = history.last() {
        info!("Training completed. Final loss: {:.4}", last.loss);
    }
    Ok((network, history))
}

fn train_epochs<B, O>(
    mut network: Network<B>,
    mut optimizer: O,
    compile: &CompileOptions,
    options: &FitOptions,
    data: &Partitions<B>,
) -> Result<(Network<B>, Vec<EpochRecord>)>
where
    B: AutodiffBackend,
    O: Optimizer<Network<B>, B>,
{
    let device = data.train_x.device();
    let learning_rate = compile.learning_rate();
    let log_interval = options.log_interval.max(1);
    let mut sampler = BatchSampler::new(
        (0..data.train_count).collect(),
        options.batch_size,
        options.shuffle,
        options.seed,
    );
    let steps = options
        .steps_per_epoch
        .unwrap_or_else(|| sampler.num_batches());
    let mut records = Vec::with_capacity(options.epochs);

    for epoch in 1..=options.epochs {
        sampler.reset();
        let mut accumulator = EpochAccumulator::new(&compile.metrics);

        for step in 1..=steps {
            let batch = match options.steps_per_epoch {
                Some(_) => sampler.next_cycling(),
                None => match sampler.next_batch() {
                    Some(batch) => batch,
                    None => break,
                },
            };
            let indices = index_tensor::<B>(&batch, &device);
            let x = data.train_x.clone().select(0, indices.clone());
            let y = data.train_y.clone().select(0, indices);

            let output = network.forward(x)?;
            let loss = compile.loss.compute(output.clone(), y.clone());
            let loss_value = loss.clone().into_scalar().elem::<f64>();
            if !loss_value.is_finite() {
                return Err(TrainingError::NonFiniteLoss {
                    epoch,
                    batch: step,
                    loss: loss_value,
                }
                .into());
            }

            let grads = GradientsParams::from_grads(loss.backward(), &network);
            network = optimizer.step(learning_rate, network, grads);
            accumulator.add(loss_value, output.inner(), y.inner());

            if step % log_interval == 0 {
                debug!(
                    "Epoch {} Batch {}: loss={:.4}",
                    epoch,
                    step,
                    accumulator.mean_loss()
                );
            }
        }

        let (loss, metrics) = accumulator.finish();
        let (val_loss, val_metrics) = match &data.val {
            Some((val_x, val_y)) => {
                let evaluation = evaluate_batches(
                    &network.valid(),
                    val_x,
                    val_y,
                    options.batch_size,
                    options.validation_steps,
                    compile.loss,
                    &compile.metrics,
                )?;
                (Some(evaluation.loss), evaluation.metrics)
            }
            None => (None, BTreeMap::new()),
        };

        info!(
            "Epoch {}/{}: loss={:.4}{}{}",
            epoch,
            options.epochs,
            loss,
            format_metrics("", &metrics),
            match val_loss {
                Some(val) => format!(", val_loss={val:.4}{}", format_metrics("val_", &val_metrics)),
                None => String::new(),
            }
        );

        records.push(EpochRecord {
            epoch,
            loss,
            metrics,
            val_loss,
            val_metrics,
        });
    }

    Ok((network, records))
}

/// Forward `xs` in sequential batches without gradients.
pub(crate) fn evaluate_batches<B: Backend>(
    network: &Network<B>,
    xs: &Tensor<B, 2>,
    ys: &Tensor<B, 2>,
    batch_size: usize,
    max_batches: Option<usize>,
    loss: LossKind,
    metrics: &[MetricKind],
) -> Result<Evaluation> {
    let [examples, features] = xs.dims();
    let [_, width] = ys.dims();
    let batch_size = batch_size.max(1);
    let mut accumulator = EpochAccumulator::new(metrics);

    let mut start = 0;
    while start < examples {
        if max_batches.is_some_and(|max| accumulator.batches() >= max) {
            break;
        }
        let end = (start + batch_size).min(examples);
        let x = xs.clone().slice([start..end, 0..features]);
        let y = ys.clone().slice([start..end, 0..width]);

        let output = network.forward(x)?;
        let value = loss
            .compute(output.clone(), y.clone())
            .into_scalar()
            .elem::<f64>();
        accumulator.add(value, output, y);
        start = end;
    }

    let (loss, metrics) = accumulator.finish();
    Ok(Evaluation {
        loss,
        metrics,
        examples: accumulator.examples(),
    })
}

fn index_tensor<B: Backend>(indices: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let values: Vec<i64> = indices.iter().map(|&i| i as i64).collect();
    Tensor::from_data(TensorData::new(values, [indices.len()]), device)
}

fn format_metrics(prefix: &str, metrics: &BTreeMap<String, f64>) -> String {
    metrics
        .iter()
        .map(|(name, value)| format!(", {prefix}{name}={value:.4}"))
        .collect()
}
