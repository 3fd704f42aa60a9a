//! Build the `ResNet-50` training / inference graph and drive it with a synthetic batch.
//!
//! ```text
//! $ resnet50_graph --mode train --num-steps 4 --logdir /tmp/resnet50
//! $ resnet50_graph --mode inference --logdir /tmp/resnet50
//! ```
//!
//! Writes to ``logdir``:
//! * ``config.json`` - the graph config;
//! * ``graph.json`` - the layer-by-layer graph summary;
//! * ``metrics.json`` - per-step training metrics;
//! * ``model.mpk`` - the trained model record.

use anyhow::Context;
use burn::backend::{Autodiff, NdArray};
use burn::config::Config;
use burn::module::Module;
use burn::optim::AdamConfig;
use burn::prelude::{Backend, Int, Tensor};
use burn::record::CompactRecorder;
use burn::tensor::Distribution;
use clap::{Parser, ValueEnum};
use resnet50::models::resnet50::{
    ClassificationBatch, InferenceGraph, ResNet50, ResNet50Config, StepMetrics,
    adam_training_graph, summarize, write_graph_summary,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const CONFIG_FILE: &str = "config.json";
const METRICS_FILE: &str = "metrics.json";
const MODEL_FILE: &str = "model";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Train on a synthetic batch, then evaluate the frozen model.
    Train,

    /// Load (or initialize) a model and run inference.
    Inference,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Graph mode.
    #[arg(long, value_enum, default_value = "train")]
    mode: Mode,

    /// Random seed for reproducibility.
    #[arg(short, long, default_value = "0")]
    seed: u64,

    /// Batch size.
    #[arg(long, default_value = "8")]
    batch_size: usize,

    /// Image height.
    #[arg(long, default_value = "64")]
    height: usize,

    /// Image width.
    #[arg(long, default_value = "64")]
    width: usize,

    /// Image channels.
    #[arg(long, default_value = "3")]
    channels: usize,

    /// Number of classes.
    #[arg(long, default_value = "6")]
    num_classes: usize,

    /// Learning rate.
    #[arg(long, default_value = "1.0e-3")]
    learning_rate: f64,

    /// Number of training steps.
    #[arg(long, default_value = "2")]
    num_steps: usize,

    /// Directory for the config, graph summary, metrics, and model.
    #[arg(long, default_value = "/tmp/resnet50")]
    logdir: String,
}

/// Everything needed to rebuild the graph.
#[derive(Config)]
pub struct GraphConfig {
    /// The model.
    pub model: ResNet50Config,

    /// The Adam optimizer.
    pub optimizer: AdamConfig,

    /// Batch size.
    pub batch_size: usize,

    /// Learning rate.
    pub learning_rate: f64,

    /// Random seed.
    pub seed: u64,
}

#[derive(Debug, Serialize)]
struct MetricsRecord {
    step: usize,
    #[serde(flatten)]
    metrics: StepMetrics,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let logdir = PathBuf::from(&args.logdir);
    std::fs::create_dir_all(&logdir)
        .with_context(|| format!("creating log directory {}", logdir.display()))?;

    let config = GraphConfig::new(
        ResNet50Config::new(args.num_classes)
            .with_in_channels(args.channels)
            .with_image_resolution([args.height, args.width]),
        AdamConfig::new(),
        args.batch_size,
        args.learning_rate,
        args.seed,
    );
    config
        .model
        .try_validate()
        .map_err(|err| anyhow::anyhow!("invalid model config: {err}"))?;

    let config = match args.mode {
        Mode::Train => {
            config
                .save(logdir.join(CONFIG_FILE))
                .with_context(|| format!("saving {CONFIG_FILE}"))?;
            config
        }
        Mode::Inference => match GraphConfig::load(logdir.join(CONFIG_FILE)) {
            Ok(saved) => {
                tracing::info!("using saved config");
                saved
            }
            Err(_) => config,
        },
    };

    let summary = summarize(&config.model, config.batch_size);
    write_graph_summary(&summary, &logdir)?;
    tracing::info!(
        input = ?summary.input_shape,
        output = ?summary.output_shape(),
        layers = summary.layers.len(),
        "graph"
    );

    match args.mode {
        Mode::Train => {
            train::<Autodiff<NdArray<f32>>>(&config, args.num_steps, &logdir, &Default::default())
        }
        Mode::Inference => infer::<NdArray<f32>>(&config, &logdir, &Default::default()),
    }
}

fn synthetic_batch<B: Backend>(
    config: &GraphConfig,
    device: &B::Device,
) -> ClassificationBatch<B> {
    let [height, width] = config.model.image_resolution;
    let images = Tensor::random(
        [config.batch_size, config.model.in_channels, height, width],
        Distribution::Normal(0.0, 1.0),
        device,
    );
    let labels: Tensor<B, 1, Int> = Tensor::random(
        [config.batch_size],
        Distribution::Uniform(0.0, config.model.num_classes as f64),
        device,
    );
    ClassificationBatch::new(images, labels)
}

fn train<B: burn::tensor::backend::AutodiffBackend>(
    config: &GraphConfig,
    num_steps: usize,
    logdir: &Path,
    device: &B::Device,
) -> anyhow::Result<()> {
    B::seed(config.seed);

    let model: ResNet50<B> = config.model.init(device);
    let mut graph = adam_training_graph(model, &config.optimizer);
    let batch = synthetic_batch::<B>(config, device);

    let mut history = Vec::with_capacity(num_steps);
    for _ in 0..num_steps {
        let step = graph.steps();
        let metrics = graph.step(batch.clone(), config.learning_rate);
        tracing::info!(step, loss = metrics.loss, accuracy = metrics.accuracy, "train");
        history.push(MetricsRecord { step, metrics });
    }

    let path = logdir.join(METRICS_FILE);
    std::fs::write(&path, serde_json::to_string_pretty(&history)?)
        .with_context(|| format!("writing {}", path.display()))?;

    let inference = graph.into_inference();
    let batch = ClassificationBatch::new(
        batch.images.inner(),
        batch.labels.inner(),
    );
    let metrics = inference.evaluate(batch);
    tracing::info!(loss = metrics.loss, accuracy = metrics.accuracy, "evaluate");

    let path = logdir.join(MODEL_FILE);
    inference
        .model()
        .clone()
        .save_file(&path, &CompactRecorder::new())
        .map_err(|err| anyhow::anyhow!("saving model to {}: {err:?}", path.display()))?;
    tracing::info!(path = %path.display(), "saved model");

    Ok(())
}

fn infer<B: Backend>(
    config: &GraphConfig,
    logdir: &Path,
    device: &B::Device,
) -> anyhow::Result<()> {
    B::seed(config.seed);

    let model: ResNet50<B> = config.model.init(device);
    let path = logdir.join(MODEL_FILE);
    let model = match model
        .clone()
        .load_file(&path, &CompactRecorder::new(), device)
    {
        Ok(loaded) => {
            tracing::info!(path = %path.display(), "loaded model");
            loaded
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), ?err, "no saved model; using initial weights");
            model
        }
    };

    let graph = InferenceGraph::new(model);
    let batch = synthetic_batch::<B>(config, device);

    let classes = graph.classify(batch.images.clone());
    let metrics = graph.evaluate(batch);
    tracing::info!(loss = metrics.loss, accuracy = metrics.accuracy, "evaluate");

    let classes = classes
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|err| anyhow::anyhow!("reading predictions: {err:?}"))?;
    println!("{classes:?}");

    Ok(())
}
