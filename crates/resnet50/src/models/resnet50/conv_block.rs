//! # Convolutional Block for `ResNet-50`
//!
//! [`ConvBlock`] is the residual unit whose shortcut carries a strided
//! ``1x1`` projection, so it can change both resolution and channel count.
//!
//! ```text
//! x ─┬─ res_branch2a (1x1/s, VALID) ─ bn ─ relu
//!    │  res_branch2b (fxf/1, SAME)  ─ bn ─ relu
//!    │  res_branch2c (1x1/1, VALID) ─ bn ──────────┐
//!    └─ res_branch1  (1x1/s, VALID) ─ bn ───────── + ─ relu
//! ```
//!
//! [`ConvBlockMeta`] defines a common meta API for [`ConvBlock`]
//! and [`ConvBlockConfig`].
//!
//! [`ConvBlockConfig`] implements [`Config`], and provides
//! [`ConvBlockConfig::init`] to initialize a [`ConvBlock`].

use crate::compat::conv_shape::{PaddingMode, expect_window2d_output_resolution};
use crate::layers::conv_norm::{ConvNorm2d, ConvNorm2dConfig, ConvNorm2dMeta};
use crate::models::resnet50::naming::{BlockNames, Branch, block_index, block_letter};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::Relu;
use burn::prelude::{Backend, Config, Module, Tensor};

/// Default stride of a [`ConvBlock`].
pub const CONV_BLOCK_DEFAULT_STRIDE: usize = 2;

/// Default middle kernel size.
pub const DEFAULT_KERNEL_SIZE: usize = 3;

/// Build the three main-path unit configs shared by residual blocks.
///
/// Only the first unit is strided; the middle unit is ``SAME``-padded.
pub(crate) fn main_path_configs(
    in_channels: usize,
    filters: [usize; 3],
    kernel_size: usize,
    stride: usize,
) -> [ConvNorm2dConfig; 3] {
    let [f1, f2, f3] = filters;
    [
        ConvNorm2dConfig::new(in_channels, f1, 1).with_stride(stride),
        ConvNorm2dConfig::new(f1, f2, kernel_size).with_padding(PaddingMode::Same),
        ConvNorm2dConfig::new(f2, f3, 1),
    ]
}

/// Validate a filter triple.
pub(crate) fn validate_filters(filters: &[usize; 3]) -> Result<(), String> {
    if filters.contains(&0) {
        return Err(format!("filters must all be > 0: {filters:?}"));
    }
    Ok(())
}

/// [`ConvBlock`] Meta trait.
pub trait ConvBlockMeta {
    /// The number of input channels.
    fn in_channels(&self) -> usize;

    /// The main-path filter counts ``[F1, F2, F3]``.
    fn filters(&self) -> [usize; 3];

    /// The number of output channels; ``F3``.
    fn out_channels(&self) -> usize {
        self.filters()[2]
    }

    /// The middle conv kernel size.
    fn kernel_size(&self) -> usize;

    /// The stride of the first main-path conv and the shortcut.
    fn stride(&self) -> usize;

    /// Stage number, for naming.
    fn stage(&self) -> usize;

    /// Block letter, for naming.
    fn block(&self) -> char;

    /// The naming basis of the block.
    fn names(&self) -> BlockNames {
        BlockNames::new(self.stage(), self.block())
    }

    /// Get the output resolution for a given input resolution.
    ///
    /// ``out = floor((in - 1) / stride) + 1``
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        expect_window2d_output_resolution(input_resolution, 1, self.stride(), PaddingMode::Valid)
    }
}

/// [`ConvBlock`] Config.
///
/// Implements [`ConvBlockMeta`].
#[derive(Config, Debug)]
pub struct ConvBlockConfig {
    /// The number of input channels.
    pub in_channels: usize,

    /// The main-path filter counts ``[F1, F2, F3]``.
    pub filters: [usize; 3],

    /// Stage number, for naming.
    pub stage: usize,

    /// Block letter, for naming.
    pub block: char,

    /// The middle conv kernel size.
    #[config(default = "DEFAULT_KERNEL_SIZE")]
    pub kernel_size: usize,

    /// The stride of the first main-path conv and the shortcut.
    #[config(default = "CONV_BLOCK_DEFAULT_STRIDE")]
    pub stride: usize,
}

impl ConvBlockMeta for ConvBlockConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn filters(&self) -> [usize; 3] {
        self.filters
    }

    fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn stage(&self) -> usize {
        self.stage
    }

    fn block(&self) -> char {
        self.block
    }
}

impl ConvBlockConfig {
    /// Check if the config is valid.
    ///
    /// # Returns
    ///
    /// A `Result<(), String>`
    pub fn try_validate(&self) -> Result<(), String> {
        if self.in_channels == 0 {
            return Err("in_channels must be > 0".to_string());
        }
        validate_filters(&self.filters)?;
        if self.kernel_size == 0 {
            return Err("kernel_size must be > 0".to_string());
        }
        if self.stride == 0 {
            return Err("stride must be > 0".to_string());
        }
        if block_index(self.block).is_none() {
            return Err(format!("block must be a lowercase letter: {:?}", self.block));
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{err}");
        }
    }

    /// Initialize a [`ConvBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ConvBlock<B> {
        self.expect_valid();

        let [branch2a, branch2b, branch2c] =
            main_path_configs(self.in_channels, self.filters, self.kernel_size, self.stride);

        let branch1 =
            ConvNorm2dConfig::new(self.in_channels, self.out_channels(), 1).with_stride(self.stride);

        ConvBlock {
            stage: self.stage,
            block: block_index(self.block).unwrap_or_default(),

            branch2a: branch2a.init(device),
            branch2b: branch2b.init(device),
            branch2c: branch2c.init(device),
            branch1: branch1.init(device),

            relu: Relu::new(),
        }
    }
}

/// Convolutional Block for `ResNet-50`.
///
/// Maps ``[batch, in_channels, in_height, in_width]`` to
/// ``[batch, F3, floor((in_height-1)/stride)+1, floor((in_width-1)/stride)+1]``.
///
/// Implements [`ConvBlockMeta`].
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    stage: usize,
    block: usize,

    /// First main-path conv/norm; ``1x1``, strided.
    pub branch2a: ConvNorm2d<B>,

    /// Second main-path conv/norm; ``fxf``, ``SAME``.
    pub branch2b: ConvNorm2d<B>,

    /// Third main-path conv/norm; ``1x1``.
    pub branch2c: ConvNorm2d<B>,

    /// Shortcut projection conv/norm; ``1x1``, strided.
    pub branch1: ConvNorm2d<B>,

    relu: Relu,
}

impl<B: Backend> ConvBlockMeta for ConvBlock<B> {
    fn in_channels(&self) -> usize {
        self.branch2a.in_channels()
    }

    fn filters(&self) -> [usize; 3] {
        [
            self.branch2a.out_channels(),
            self.branch2b.out_channels(),
            self.branch2c.out_channels(),
        ]
    }

    fn kernel_size(&self) -> usize {
        self.branch2b.kernel_size()
    }

    fn stride(&self) -> usize {
        self.branch2a.stride()
    }

    fn stage(&self) -> usize {
        self.stage
    }

    fn block(&self) -> char {
        block_letter(self.block)
    }
}

impl<B: Backend> ConvBlock<B> {
    /// The conv/norm units in graph order, with their branch.
    pub fn units(&self) -> [(Branch, &ConvNorm2d<B>); 4] {
        [
            (Branch::MainA, &self.branch2a),
            (Branch::MainB, &self.branch2b),
            (Branch::MainC, &self.branch2c),
            (Branch::Shortcut, &self.branch1),
        ]
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, F3, out_height, out_width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, in_height, in_width] = unpack_shape_contract!(
            ["batch", "in_channels", "in_height", "in_width"],
            &input,
            &["batch", "in_height", "in_width"],
            &[("in_channels", self.in_channels())],
        );
        let out_resolution = self.output_resolution([in_height, in_width]);

        let shortcut = self.branch1.forward(input.clone());

        let x = self.branch2a.forward(input);
        let x = self.relu.forward(x);

        let x = self.branch2b.forward(x);
        let x = self.relu.forward(x);

        let x = self.branch2c.forward(x);

        let x = self.relu.forward(x + shortcut);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_height", out_resolution[0]),
                ("out_width", out_resolution[1])
            ]
        );

        x
    }
}

/// Build and apply a fresh [`ConvBlock`] to `input`.
///
/// The input channel count is read from `input`.
///
/// # Arguments
///
/// - `input`: ``[batch, in_channels, in_height, in_width]``.
/// - `kernel_size`: the middle conv kernel size, ``f``.
/// - `filters`: ``[F1, F2, F3]``.
/// - `stage`: stage number, for naming.
/// - `block`: block letter, for naming.
/// - `stride`: the block stride, ``s``.
/// - `device`: the device to initialize the block on.
///
/// # Returns
///
/// The output tensor, and the initialized block.
pub fn conv_block<B: Backend>(
    input: Tensor<B, 4>,
    kernel_size: usize,
    filters: [usize; 3],
    stage: usize,
    block: char,
    stride: usize,
    device: &B::Device,
) -> (Tensor<B, 4>, ConvBlock<B>) {
    let [_, in_channels, _, _] = input.dims();
    let layer: ConvBlock<B> = ConvBlockConfig::new(in_channels, filters, stage, block)
        .with_kernel_size(kernel_size)
        .with_stride(stride)
        .init(device);
    (layer.forward(input), layer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utility::layout::{channels_first_to_last, channels_last_to_first};
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    #[test]
    fn test_conv_block_config() {
        let config = ConvBlockConfig::new(6, [2, 4, 6], 1, 'a');
        assert_eq!(config.in_channels(), 6);
        assert_eq!(config.out_channels(), 6);
        assert_eq!(config.kernel_size(), 3);
        assert_eq!(config.stride(), 2);
        assert_eq!(config.output_resolution([4, 4]), [2, 2]);
        assert_eq!(config.output_resolution([15, 15]), [8, 8]);
        assert_eq!(config.names().conv(Branch::Shortcut), "res1a_branch1");

        let config = config.with_stride(1);
        assert_eq!(config.output_resolution([15, 15]), [15, 15]);
    }

    #[test]
    fn test_conv_block_validate() {
        assert!(ConvBlockConfig::new(6, [2, 4, 6], 1, 'a').try_validate().is_ok());
        assert!(ConvBlockConfig::new(6, [2, 0, 6], 1, 'a').try_validate().is_err());
        assert!(ConvBlockConfig::new(0, [2, 4, 6], 1, 'a').try_validate().is_err());
        assert!(ConvBlockConfig::new(6, [2, 4, 6], 1, 'A').try_validate().is_err());
        assert!(
            ConvBlockConfig::new(6, [2, 4, 6], 1, 'a')
                .with_stride(0)
                .try_validate()
                .is_err()
        );
    }

    #[test]
    fn test_conv_block_meta() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: ConvBlock<B> = ConvBlockConfig::new(64, [64, 64, 256], 2, 'a')
            .with_stride(1)
            .init(&device);

        assert_eq!(block.in_channels(), 64);
        assert_eq!(block.filters(), [64, 64, 256]);
        assert_eq!(block.out_channels(), 256);
        assert_eq!(block.kernel_size(), 3);
        assert_eq!(block.stride(), 1);
        assert_eq!(block.stage(), 2);
        assert_eq!(block.block(), 'a');

        let names: Vec<String> = block
            .units()
            .iter()
            .map(|(branch, _)| block.names().conv(*branch))
            .collect();
        assert_eq!(
            names,
            vec![
                "res2a_branch2a",
                "res2a_branch2b",
                "res2a_branch2c",
                "res2a_branch1"
            ]
        );
    }

    #[test]
    fn test_conv_block_channels_last_smoke() {
        type B = NdArray<f32>;
        let device = Default::default();
        B::seed(1);

        // (m, n_H_prev, n_W_prev, n_C_prev) = (3, 4, 4, 6)
        let a_prev: Tensor<B, 4> = Tensor::random([3, 4, 4, 6], Distribution::Normal(0.0, 1.0), &device);

        let (a, layer) = conv_block(
            channels_last_to_first(a_prev),
            2,
            [2, 4, 6],
            1,
            'a',
            2,
            &device,
        );
        let a = channels_first_to_last(a);

        assert_eq!(a.dims(), [3, 2, 2, 6]);
        assert_eq!(layer.names().conv(Branch::MainB), "res1a_branch2b");

        // Post-ReLU.
        let min = a.min().into_scalar();
        assert!(min >= 0.0);
    }

    #[test]
    fn test_conv_block_forward_matches_units() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: ConvBlock<B> = ConvBlockConfig::new(4, [2, 2, 8], 3, 'a')
            .with_kernel_size(3)
            .init(&device);

        let input: Tensor<B, 4> = Tensor::random([2, 4, 9, 7], Distribution::Default, &device);
        let output = block.forward(input.clone());
        assert_eq!(output.dims(), [2, 8, 5, 4]);

        let expected = {
            let relu = Relu::new();
            let shortcut = block.branch1.forward(input.clone());
            let x = relu.forward(block.branch2a.forward(input));
            let x = relu.forward(block.branch2b.forward(x));
            let x = block.branch2c.forward(x);
            relu.forward(x + shortcut)
        };
        output.to_data().assert_eq(&expected.to_data(), true);
    }

    #[test]
    #[should_panic(expected = "!~ in_channels")]
    fn test_conv_block_channel_mismatch() {
        type B = NdArray<f32>;
        let device = Default::default();

        let block: ConvBlock<B> = ConvBlockConfig::new(6, [2, 4, 6], 1, 'a').init(&device);
        let input: Tensor<B, 4> = Tensor::zeros([3, 5, 4, 4], &device);
        block.forward(input);
    }

    #[test]
    fn test_conv_block_autodiff() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let block: ConvBlock<B> = ConvBlockConfig::new(3, [2, 2, 4], 2, 'a')
            .with_stride(1)
            .init(&device);

        let input: Tensor<B, 4> = Tensor::random([2, 3, 5, 5], Distribution::Default, &device);
        let output = block.forward(input);
        assert_eq!(output.dims(), [2, 4, 5, 5]);

        let grads = output.sum().backward();
        let weight_grad = block.branch2a.conv.weight.grad(&grads);
        assert!(weight_grad.is_some());
    }
}
