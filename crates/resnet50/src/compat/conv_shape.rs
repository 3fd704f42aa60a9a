//! # Convolution Shape Utilities
//!
//! Utilities for computing the output shape of convolution and pooling operations,
//! under both ``VALID`` and TensorFlow-style ``SAME`` padding.

use serde::{Deserialize, Serialize};

/// Padding mode of a windowed operation (conv / pool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaddingMode {
    /// No padding; windows must fit entirely inside the input.
    Valid,

    /// Zero-pad so that ``out_size = ceil(in_size / stride)``.
    ///
    /// Padding which cannot be split evenly goes after the input,
    /// matching TensorFlow.
    Same,
}

/// Predict the output size of a 1D convolution operation.
///
/// ```text
/// out_size = floor( ((in_size + 2*padding - dilation*(kernel_size-1) - 1) / stride) + 1 )
/// ```
///
/// # Reference
///
/// - [conv_arithmetic diagram](https://github.com/vdumoulin/conv_arithmetic/blob/master/README.md)
///   visual explanations of these convolution parameters.
///
/// # Arguments
///
/// - `input_size`: The input dimension size, must be > 0.
/// - `kernel_size`: The kernel size, must be > 0.
/// - `stride`: The stride of the convolution, must be > 0.
/// - `padding`: The padding of the convolution, added evenly to both sides of the input.
/// - `dilation`: The dilation of the convolution, must be > 0.
///
/// # Returns
///
/// An `Option<usize>` representing the output size; or `None` for <= 0.
pub fn maybe_conv1d_output_size(
    input_size: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
) -> Option<usize> {
    assert!(input_size > 0);
    assert!(kernel_size > 0);
    assert!(stride > 0);
    assert!(dilation > 0);

    let effective_size = input_size + 2 * padding;
    let pos = effective_size + stride;
    let kernel_width = 1 + dilation * (kernel_size - 1);

    if pos < kernel_width {
        return None;
    }
    let x = (pos - kernel_width) / stride;
    if x < 1 { None } else { Some(x) }
}

/// Calculate the total asymmetric TensorFlow-like ``SAME`` padding for a dimension.
///
/// ```text
/// pad = max((ceil(size / stride) - 1) * stride + (kernel_size - 1) * dilation + 1 - size, 0)
/// ```
pub fn get_same_padding(
    size: usize,
    kernel_size: usize,
    stride: usize,
    dilation: usize,
) -> usize {
    assert!(stride > 0);
    let out = size.div_ceil(stride);
    let needed = (out.max(1) - 1) * stride + (kernel_size - 1) * dilation + 1;
    needed.saturating_sub(size)
}

/// Split a ``SAME`` padding total into ``(before, after)``.
///
/// The odd remainder goes after.
pub fn split_same_padding(total: usize) -> (usize, usize) {
    (total / 2, total - total / 2)
}

/// Predict the output size of a 1D windowed op under a [`PaddingMode`].
///
/// # Returns
///
/// An `Option<usize>` representing the output size; or `None` for <= 0.
pub fn maybe_window1d_output_size(
    input_size: usize,
    kernel_size: usize,
    stride: usize,
    mode: PaddingMode,
) -> Option<usize> {
    match mode {
        PaddingMode::Valid => maybe_conv1d_output_size(input_size, kernel_size, stride, 0, 1),
        PaddingMode::Same => {
            assert!(stride > 0);
            if input_size == 0 {
                None
            } else {
                Some(input_size.div_ceil(stride))
            }
        }
    }
}

/// Predict the output resolution of a square-kernel 2D windowed op.
///
/// # Arguments
///
/// - `input_resolution`: ``[height, width]``.
/// - `kernel_size`: square kernel size.
/// - `stride`: square stride.
/// - `mode`: the padding mode.
///
/// # Returns
///
/// ``Some([out_height, out_width])``; or `None` if either dim would be <= 0.
pub fn maybe_window2d_output_resolution(
    input_resolution: [usize; 2],
    kernel_size: usize,
    stride: usize,
    mode: PaddingMode,
) -> Option<[usize; 2]> {
    let [height, width] = input_resolution;
    Some([
        maybe_window1d_output_size(height, kernel_size, stride, mode)?,
        maybe_window1d_output_size(width, kernel_size, stride, mode)?,
    ])
}

/// Predict the output resolution of a square-kernel 2D windowed op.
///
/// This is the ``panic``-ing variant of [`maybe_window2d_output_resolution`].
///
/// # Panics
///
/// If the output size would be <= 0.
pub fn expect_window2d_output_resolution(
    input_resolution: [usize; 2],
    kernel_size: usize,
    stride: usize,
    mode: PaddingMode,
) -> [usize; 2] {
    match maybe_window2d_output_resolution(input_resolution, kernel_size, stride, mode) {
        Some(resolution) => resolution,
        None => panic!(
            "No legal output size for window op with:\n input_resolution:{input_resolution:?}\n kernel_size:{kernel_size}\n stride:{stride}\n mode:{mode:?}",
        ),
    }
}
