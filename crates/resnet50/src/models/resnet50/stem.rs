//! # Input Stem (stage 1)
//!
//! ```text
//! zero_pad(3) ─ conv1 (7x7/2, VALID) ─ bn_conv1 ─ relu ─ max_pool (3x3/2, VALID)
//! ```

use crate::compat::conv_shape::{PaddingMode, expect_window2d_output_resolution};
use crate::layers::conv_norm::{ConvNorm2d, ConvNorm2dConfig, ConvNorm2dMeta};
use crate::layers::padding::zero_pad_2d;
use burn::config::Config;
use burn::module::Module;
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{PaddingConfig2d, Relu};
use burn::prelude::{Backend, Tensor};

/// [`Stem`] Config.
#[derive(Config, Debug)]
pub struct StemConfig {
    /// The number of image channels.
    #[config(default = 3)]
    pub in_channels: usize,

    /// The number of stem filters.
    #[config(default = 64)]
    pub out_channels: usize,

    /// Zero padding applied to height and width before the conv.
    #[config(default = 3)]
    pub padding: usize,

    /// The stem conv kernel size.
    #[config(default = 7)]
    pub kernel_size: usize,

    /// The stem conv stride.
    #[config(default = 2)]
    pub stride: usize,

    /// The max pool window.
    #[config(default = 3)]
    pub pool_size: usize,

    /// The max pool stride.
    #[config(default = 2)]
    pub pool_stride: usize,
}

impl StemConfig {
    /// The stem conv/norm config.
    pub fn conv_norm(&self) -> ConvNorm2dConfig {
        ConvNorm2dConfig::new(self.in_channels, self.out_channels, self.kernel_size)
            .with_stride(self.stride)
    }

    /// Resolution after the padding.
    pub fn padded_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        input_resolution.map(|d| d + 2 * self.padding)
    }

    /// Resolution after the conv.
    ///
    /// # Panics
    ///
    /// If the padded input is smaller than the kernel.
    pub fn conv_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        self.conv_norm()
            .output_resolution(self.padded_resolution(input_resolution))
    }

    /// Resolution after the pool.
    ///
    /// # Panics
    ///
    /// If any intermediate is smaller than its window.
    pub fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        expect_window2d_output_resolution(
            self.conv_resolution(input_resolution),
            self.pool_size,
            self.pool_stride,
            PaddingMode::Valid,
        )
    }

    /// Initialize a [`Stem`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Stem<B> {
        Stem {
            padding: self.padding,
            conv_norm: self.conv_norm().init(device),
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([self.pool_size, self.pool_size])
                .with_strides([self.pool_stride, self.pool_stride])
                .with_padding(PaddingConfig2d::Valid)
                .init(),
        }
    }
}

/// Stem impl.
#[derive(Module, Debug)]
pub struct Stem<B: Backend> {
    padding: usize,

    /// ``conv1`` / ``bn_conv1``.
    pub conv_norm: ConvNorm2d<B>,

    relu: Relu,

    /// The max pool.
    pub pool: MaxPool2d,
}

impl<B: Backend> Stem<B> {
    /// The zero padding applied to height and width.
    pub fn padding(&self) -> usize {
        self.padding
    }

    /// The number of image channels.
    pub fn in_channels(&self) -> usize {
        self.conv_norm.in_channels()
    }

    /// The number of output channels.
    pub fn out_channels(&self) -> usize {
        self.conv_norm.out_channels()
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_channels, out_height, out_width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let x = zero_pad_2d(input, self.padding);
        let x = self.conv_norm.forward(x);
        let x = self.relu.forward(x);
        self.pool.forward(x)
    }
}
