//! # `ResNet-50`
//!
//! * [`stem`] - stage 1; padding, ``7x7/2`` conv, norm, relu, ``3x3/2`` max pool.
//! * [`conv_block`] - the projection-shortcut residual block.
//! * [`identity_block`] - the identity-shortcut residual block.
//! * [`stage`] - a conv block followed by identity blocks.
//! * [`model`] - the full network.
//! * [`graph`] - loss, accuracy, and the training / inference graphs.
//! * [`summary`] - static layer-by-layer graph trace.

pub mod conv_block;
pub mod graph;
pub mod identity_block;
pub mod model;
pub mod naming;
pub mod stage;
pub mod stem;
pub mod summary;

pub use conv_block::{ConvBlock, ConvBlockConfig, ConvBlockMeta, conv_block};
pub use graph::{
    ClassificationBatch, ClassificationOutput, InferenceGraph, StepMetrics, TrainingGraph,
    adam_training_graph, top_k_accuracy,
};
pub use identity_block::{IdentityBlock, IdentityBlockConfig, IdentityBlockMeta};
pub use model::{
    RESNET50_FILTERS, RESNET50_IDENTITY_BLOCKS, RESNET50_STRIDES, ResNet50, ResNet50Config,
};
pub use stage::{Stage, StageConfig, StageMeta};
pub use summary::{GraphSummary, LayerKind, LayerSummary, summarize, write_graph_summary};
