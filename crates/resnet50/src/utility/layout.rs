//! # Image Tensor Layouts
//!
//! `burn` convolutions are channels-first (``NCHW``); image pipelines and
//! Keras-style graphs are often channels-last (``NHWC``).

use burn::prelude::{Backend, Tensor};

/// ``[batch, height, width, channels]`` -> ``[batch, channels, height, width]``.
pub fn channels_last_to_first<B: Backend>(input: Tensor<B, 4>) -> Tensor<B, 4> {
    input.permute([0, 3, 1, 2])
}

/// ``[batch, channels, height, width]`` -> ``[batch, height, width, channels]``.
pub fn channels_first_to_last<B: Backend>(input: Tensor<B, 4>) -> Tensor<B, 4> {
    input.permute([0, 2, 3, 1])
}
