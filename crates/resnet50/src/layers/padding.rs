//! # Zero Padding
//!
//! `burn`'s [`burn::nn::PaddingConfig2d::Same`] only supports odd kernels and
//! symmetric padding; TensorFlow's ``SAME`` pads asymmetrically for even kernels.
//! These helpers pad the input explicitly so the wrapped op can run ``VALID``.

use crate::compat::conv_shape::{get_same_padding, split_same_padding};
use burn::prelude::{Backend, Tensor};

/// Dynamically pad a ``[batch, channels, height, width]`` input with ``SAME`` padding.
///
/// # Arguments
///
/// - `input`: the input tensor.
/// - `kernel_size`: ``[kernel_height, kernel_width]``.
/// - `stride`: ``[stride_height, stride_width]``.
/// - `value`: the fill value.
///
/// # Returns
///
/// The padded tensor; the odd remainder of each dim is placed after the input.
pub fn pad_same<B: Backend>(
    input: Tensor<B, 4>,
    kernel_size: [usize; 2],
    stride: [usize; 2],
    value: f32,
) -> Tensor<B, 4> {
    let [_, _, ih, iw] = input.dims();
    let (top, bottom) = split_same_padding(get_same_padding(ih, kernel_size[0], stride[0], 1));
    let (left, right) = split_same_padding(get_same_padding(iw, kernel_size[1], stride[1], 1));
    if top + bottom + left + right == 0 {
        return input;
    }
    input.pad((left, right, top, bottom), value)
}

/// Symmetrically zero-pad the spatial dims of a ``[batch, channels, height, width]`` input.
///
/// Batch and channel dims are never padded.
pub fn zero_pad_2d<B: Backend>(
    input: Tensor<B, 4>,
    padding: usize,
) -> Tensor<B, 4> {
    if padding == 0 {
        return input;
    }
    input.pad((padding, padding, padding, padding), 0.0)
}
