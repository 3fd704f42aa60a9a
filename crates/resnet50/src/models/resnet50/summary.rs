//! # Graph Summary
//!
//! A static, tensor-free trace of the [`ResNet50`](super::model::ResNet50) graph:
//! every layer, in execution order, with its name and output shape.
//!
//! Shapes are channels-first, ``[batch, channels, height, width]``.

use crate::models::resnet50::conv_block::ConvBlockMeta;
use crate::models::resnet50::identity_block::IdentityBlockMeta;
use crate::models::resnet50::model::ResNet50Config;
use crate::models::resnet50::naming::{
    BlockNames, Branch, STEM_CONV_NAME, STEM_NORM_NAME, fc_name,
};
use crate::models::resnet50::stage::StageMeta;
use anyhow::Context;
use serde::Serialize;
use std::fs::{File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};

/// File name of the graph summary within a log directory.
pub const GRAPH_SUMMARY_FILE: &str = "graph.json";

/// Kind of a graph layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// Zero padding.
    ZeroPadding,
    /// 2d convolution.
    Conv2d,
    /// Batch normalization.
    BatchNorm,
    /// ReLU activation.
    Relu,
    /// Max pooling.
    MaxPool,
    /// Residual addition.
    Add,
    /// Average pooling.
    AvgPool,
    /// Flatten to ``[batch, features]``.
    Flatten,
    /// Fully-connected layer.
    Dense,
    /// Softmax.
    Softmax,
}

/// One layer of the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerSummary {
    /// Layer name.
    pub name: String,

    /// Layer kind.
    pub kind: LayerKind,

    /// Output shape.
    pub output_shape: Vec<usize>,
}

/// The whole graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphSummary {
    /// Input shape.
    pub input_shape: Vec<usize>,

    /// Layers in execution order.
    pub layers: Vec<LayerSummary>,
}

impl GraphSummary {
    /// Layers of a given kind.
    pub fn layers_of(
        &self,
        kind: LayerKind,
    ) -> impl Iterator<Item = &LayerSummary> {
        self.layers.iter().filter(move |l| l.kind == kind)
    }

    /// Find a layer by name.
    pub fn layer(
        &self,
        name: &str,
    ) -> Option<&LayerSummary> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// The output shape of the graph.
    pub fn output_shape(&self) -> &[usize] {
        match self.layers.last() {
            Some(layer) => &layer.output_shape,
            None => &self.input_shape,
        }
    }
}

struct Tracer {
    batch: usize,
    layers: Vec<LayerSummary>,
}

impl Tracer {
    fn push(
        &mut self,
        name: impl Into<String>,
        kind: LayerKind,
        output_shape: Vec<usize>,
    ) {
        self.layers.push(LayerSummary {
            name: name.into(),
            kind,
            output_shape,
        });
    }

    fn push_map(
        &mut self,
        name: impl Into<String>,
        kind: LayerKind,
        channels: usize,
        [h, w]: [usize; 2],
    ) {
        let batch = self.batch;
        self.push(name, kind, vec![batch, channels, h, w]);
    }

    fn unit(
        &mut self,
        names: &BlockNames,
        branch: Branch,
        channels: usize,
        resolution: [usize; 2],
        relu: bool,
    ) {
        self.push_map(names.conv(branch), LayerKind::Conv2d, channels, resolution);
        self.push_map(names.norm(branch), LayerKind::BatchNorm, channels, resolution);
        if relu {
            self.push_map(
                format!("{}_relu", names.conv(branch)),
                LayerKind::Relu,
                channels,
                resolution,
            );
        }
    }

    fn merge(
        &mut self,
        names: &BlockNames,
        channels: usize,
        resolution: [usize; 2],
    ) {
        let base = format!("res{}{}", names.stage, names.block);
        self.push_map(format!("{base}_add"), LayerKind::Add, channels, resolution);
        self.push_map(format!("{base}_relu"), LayerKind::Relu, channels, resolution);
    }
}

/// Trace the graph of a [`ResNet50Config`] for a given batch size.
///
/// # Panics
///
/// If the config is invalid.
pub fn summarize(
    config: &ResNet50Config,
    batch_size: usize,
) -> GraphSummary {
    config.expect_valid();

    let mut tracer = Tracer {
        batch: batch_size,
        layers: Vec::new(),
    };

    let stem = config.stem();
    tracer.push_map(
        "zero_padding",
        LayerKind::ZeroPadding,
        config.in_channels,
        stem.padded_resolution(config.image_resolution),
    );
    let conv = stem.conv_resolution(config.image_resolution);
    tracer.push_map(STEM_CONV_NAME, LayerKind::Conv2d, stem.out_channels, conv);
    tracer.push_map(STEM_NORM_NAME, LayerKind::BatchNorm, stem.out_channels, conv);
    tracer.push_map("conv1_relu", LayerKind::Relu, stem.out_channels, conv);
    let mut resolution = stem.output_resolution(config.image_resolution);
    tracer.push_map("max_pool", LayerKind::MaxPool, stem.out_channels, resolution);

    for stage in config.stages() {
        let conv_block = stage.conv_block();
        let names = conv_block.names();
        let [f1, f2, f3] = conv_block.filters();
        let out = stage.output_resolution(resolution);
        tracer.unit(&names, Branch::MainA, f1, out, true);
        tracer.unit(&names, Branch::MainB, f2, out, true);
        tracer.unit(&names, Branch::MainC, f3, out, false);
        tracer.unit(&names, Branch::Shortcut, f3, out, false);
        tracer.merge(&names, f3, out);
        resolution = out;

        for block in stage.identity_blocks() {
            let names = block.names();
            let [f1, f2, f3] = block.filters();
            tracer.unit(&names, Branch::MainA, f1, resolution, true);
            tracer.unit(&names, Branch::MainB, f2, resolution, true);
            tracer.unit(&names, Branch::MainC, f3, resolution, false);
            tracer.merge(&names, f3, resolution);
        }
    }

    let channels = config.stage_filters[3][2];
    let (_, pooled) = match config.try_trace_resolutions() {
        Ok(trace) => trace,
        Err(err) => panic!("{err}"),
    };
    tracer.push_map("avg_pool", LayerKind::AvgPool, channels, pooled);
    tracer.push(
        "flatten",
        LayerKind::Flatten,
        vec![batch_size, config.flat_features()],
    );
    tracer.push(
        fc_name(config.num_classes),
        LayerKind::Dense,
        vec![batch_size, config.num_classes],
    );
    tracer.push(
        "softmax",
        LayerKind::Softmax,
        vec![batch_size, config.num_classes],
    );

    let [h, w] = config.image_resolution;
    GraphSummary {
        input_shape: vec![batch_size, config.in_channels, h, w],
        layers: tracer.layers,
    }
}

/// Write a [`GraphSummary`] as pretty JSON to ``{logdir}/graph.json``.
///
/// Creates `logdir` if needed.
///
/// # Returns
///
/// The path written.
pub fn write_graph_summary<P: AsRef<Path>>(
    summary: &GraphSummary,
    logdir: P,
) -> anyhow::Result<PathBuf> {
    let logdir = logdir.as_ref();
    create_dir_all(logdir)
        .with_context(|| format!("creating log directory {}", logdir.display()))?;

    let path = logdir.join(GRAPH_SUMMARY_FILE);
    let json = serde_json::to_string_pretty(summary)?;
    let mut file =
        File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    file.write_all(json.as_bytes())?;

    tracing::info!(path = %path.display(), layers = summary.layers.len(), "wrote graph summary");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::resnet50::model::ResNet50;
    use burn::backend::NdArray;
    use burn::prelude::Tensor;
    use burn::tensor::Distribution;

    #[test]
    fn test_summary_resnet50() {
        let config = ResNet50Config::new(6);
        let summary = summarize(&config, 8);

        assert_eq!(summary.input_shape, vec![8, 3, 64, 64]);
        assert_eq!(summary.layers_of(LayerKind::Conv2d).count(), 53);
        assert_eq!(summary.layers_of(LayerKind::BatchNorm).count(), 53);
        assert_eq!(summary.layers_of(LayerKind::Add).count(), 16);
        assert_eq!(summary.output_shape(), &[8, 6]);

        let expect = |name: &str, shape: &[usize]| {
            let layer = summary
                .layer(name)
                .unwrap_or_else(|| panic!("missing layer {name}"));
            assert_eq!(layer.output_shape, shape, "{name}");
        };
        expect("zero_padding", &[8, 3, 70, 70]);
        expect("conv1", &[8, 64, 32, 32]);
        expect("max_pool", &[8, 64, 15, 15]);
        expect("res2a_branch1", &[8, 256, 15, 15]);
        expect("res2c_relu", &[8, 256, 15, 15]);
        expect("res3a_branch2a", &[8, 128, 8, 8]);
        expect("res3d_relu", &[8, 512, 8, 8]);
        expect("res4f_relu", &[8, 1024, 4, 4]);
        expect("res5c_relu", &[8, 2048, 2, 2]);
        expect("avg_pool", &[8, 2048, 1, 1]);
        expect("flatten", &[8, 2048]);
        expect("fc6", &[8, 6]);

        // Shortcut follows the main path.
        let names: Vec<&str> = summary
            .layers_of(LayerKind::Conv2d)
            .map(|l| l.name.as_str())
            .take(5)
            .collect();
        assert_eq!(
            names,
            vec![
                "conv1",
                "res2a_branch2a",
                "res2a_branch2b",
                "res2a_branch2c",
                "res2a_branch1"
            ]
        );
    }

    #[test]
    fn test_summary_matches_model() {
        type B = NdArray<f32>;
        let device = Default::default();

        let config = ResNet50Config::new(5)
            .with_image_resolution([48, 40])
            .with_stem_filters(4)
            .with_stage_filters([[2, 2, 4], [2, 2, 8], [2, 2, 8], [4, 4, 8]])
            .with_identity_blocks([1, 0, 2, 1]);
        let summary = summarize(&config, 2);

        let model: ResNet50<B> = config.init(&device);
        let outputs = model.forward_stages(Tensor::random(
            [2, 3, 48, 40],
            Distribution::Default,
            &device,
        ));

        let mut expected = vec![summary.layer("max_pool").unwrap().output_shape.clone()];
        for (stage, n) in [(2, 1), (3, 0), (4, 2), (5, 1)] {
            let last = crate::models::resnet50::naming::block_letter(n);
            expected.push(
                summary
                    .layer(&format!("res{stage}{last}_relu"))
                    .unwrap()
                    .output_shape
                    .clone(),
            );
        }
        let actual: Vec<Vec<usize>> = outputs.iter().map(|t| t.dims().to_vec()).collect();
        assert_eq!(actual, expected);

        let logits = model.forward(Tensor::zeros([2, 3, 48, 40], &device));
        assert_eq!(logits.dims().to_vec(), summary.output_shape());
    }

    #[test]
    fn test_write_graph_summary() {
        let dir = tempfile::tempdir().unwrap();
        let logdir = dir.path().join("logs");

        let summary = summarize(&ResNet50Config::new(6), 1);
        let path = write_graph_summary(&summary, &logdir).unwrap();
        assert_eq!(path, logdir.join(GRAPH_SUMMARY_FILE));

        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        let layers = value["layers"].as_array().unwrap();
        assert_eq!(layers.len(), summary.layers.len());
        assert_eq!(layers[1]["name"], "conv1");
        assert_eq!(layers[1]["kind"], "conv2d");
    }
}
