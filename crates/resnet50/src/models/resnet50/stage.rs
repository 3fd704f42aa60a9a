//! # `ResNet-50` Stage
//!
//! A [`Stage`] is one [`ConvBlock`] (block `a`) followed by a run of
//! [`IdentityBlock`]s (blocks `b`, `c`, ...).
//!
//! [`StageMeta`] defines a common meta API for [`Stage`] and [`StageConfig`].

use crate::models::resnet50::conv_block::{
    CONV_BLOCK_DEFAULT_STRIDE, ConvBlock, ConvBlockConfig, ConvBlockMeta, DEFAULT_KERNEL_SIZE,
};
use crate::models::resnet50::identity_block::{
    IdentityBlock, IdentityBlockConfig, IdentityBlockMeta,
};
use crate::models::resnet50::naming::block_letter;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::prelude::{Backend, Module, Tensor};

/// [`Stage`] Meta API.
pub trait StageMeta {
    /// Stage number, for naming.
    fn stage(&self) -> usize;

    /// The number of blocks; ``1 + num_identity_blocks``.
    fn len(&self) -> usize;

    /// Check if the stage is empty; never true for a built stage.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of input channels.
    fn in_channels(&self) -> usize;

    /// The number of output channels.
    fn out_channels(&self) -> usize;

    /// The stride of the leading conv block.
    fn stride(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    ///
    /// Only the leading conv block changes the resolution.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2];
}

/// [`Stage`] Configuration.
#[derive(Config, Debug)]
pub struct StageConfig {
    /// Stage number, for naming.
    pub stage: usize,

    /// The number of input channels.
    pub in_channels: usize,

    /// The main-path filter counts ``[F1, F2, F3]``; shared by every block.
    pub filters: [usize; 3],

    /// The number of identity blocks after the conv block.
    pub num_identity_blocks: usize,

    /// The stride of the leading conv block.
    #[config(default = "CONV_BLOCK_DEFAULT_STRIDE")]
    pub stride: usize,

    /// The middle conv kernel size.
    #[config(default = "DEFAULT_KERNEL_SIZE")]
    pub kernel_size: usize,
}

impl StageConfig {
    /// The leading conv block config.
    pub fn conv_block(&self) -> ConvBlockConfig {
        ConvBlockConfig::new(self.in_channels, self.filters, self.stage, block_letter(0))
            .with_kernel_size(self.kernel_size)
            .with_stride(self.stride)
    }

    /// The identity block configs, in order.
    pub fn identity_blocks(&self) -> Vec<IdentityBlockConfig> {
        (1..=self.num_identity_blocks)
            .map(|idx| {
                IdentityBlockConfig::new(self.filters, self.stage, block_letter(idx))
                    .with_kernel_size(self.kernel_size)
            })
            .collect()
    }

    /// Check if the config is valid.
    ///
    /// # Returns
    ///
    /// A `Result<(), String>`
    pub fn try_validate(&self) -> Result<(), String> {
        // block letters run out at 'z'.
        if self.num_identity_blocks >= 26 {
            return Err(format!(
                "stage {} has too many identity blocks: {}",
                self.stage, self.num_identity_blocks
            ));
        }
        self.conv_block()
            .try_validate()
            .map_err(|err| format!("stage {} conv block: {err}", self.stage))?;
        for block in self.identity_blocks() {
            block
                .try_validate()
                .map_err(|err| format!("stage {} block {}: {err}", self.stage, block.block))?;
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        match self.try_validate() {
            Ok(_) => (),
            Err(err) => panic!("{}", err),
        }
    }

    /// Initialize a new [`Stage`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Stage<B> {
        self.expect_valid();

        Stage {
            conv_block: self.conv_block().init(device),
            identity_blocks: self
                .identity_blocks()
                .iter()
                .map(|block| block.init(device))
                .collect(),
        }
    }
}

impl StageMeta for StageConfig {
    fn stage(&self) -> usize {
        self.stage
    }

    fn len(&self) -> usize {
        1 + self.num_identity_blocks
    }

    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        self.filters[2]
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        self.conv_block().output_resolution(input_resolution)
    }
}

/// `ResNet-50` stage.
#[derive(Module, Debug)]
pub struct Stage<B: Backend> {
    /// The leading conv block.
    pub conv_block: ConvBlock<B>,

    /// The trailing identity blocks.
    pub identity_blocks: Vec<IdentityBlock<B>>,
}

impl<B: Backend> StageMeta for Stage<B> {
    fn stage(&self) -> usize {
        self.conv_block.stage()
    }

    fn len(&self) -> usize {
        1 + self.identity_blocks.len()
    }

    fn in_channels(&self) -> usize {
        self.conv_block.in_channels()
    }

    fn out_channels(&self) -> usize {
        match self.identity_blocks.last() {
            Some(block) => block.channels(),
            None => self.conv_block.out_channels(),
        }
    }

    fn stride(&self) -> usize {
        self.conv_block.stride()
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        self.conv_block.output_resolution(input_resolution)
    }
}

impl<B: Backend> Stage<B> {
    /// Apply the stage.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_channels, out_height, out_width]`` tensor.
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

        let x = self.conv_block.forward(input);
        let x = self
            .identity_blocks
            .iter()
            .fold(x, |x, block| block.forward(x));

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

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    #[test]
    fn test_stage_config() {
        let config = StageConfig::new(3, 256, [128, 128, 512], 3);
        config.expect_valid();

        assert_eq!(config.stage(), 3);
        assert_eq!(config.len(), 4);
        assert_eq!(config.in_channels(), 256);
        assert_eq!(config.out_channels(), 512);
        assert_eq!(config.stride(), 2);
        assert_eq!(config.output_resolution([15, 15]), [8, 8]);

        let conv = config.conv_block();
        assert_eq!(conv.block, 'a');
        assert_eq!(conv.in_channels, 256);

        let letters: Vec<char> = config.identity_blocks().iter().map(|b| b.block).collect();
        assert_eq!(letters, vec!['b', 'c', 'd']);
    }

    #[test]
    fn test_stage_config_invalid() {
        let config = StageConfig::new(3, 256, [128, 0, 512], 3);
        let err = config.try_validate().unwrap_err();
        assert!(err.contains("stage 3 conv block"), "{err}");

        let config = StageConfig::new(3, 256, [128, 128, 512], 26);
        assert!(config.try_validate().is_err());
    }

    #[test]
    fn test_stage_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let config = StageConfig::new(2, 4, [2, 2, 8], 2).with_stride(1);
        let stage: Stage<B> = config.init(&device);

        assert_eq!(stage.stage(), 2);
        assert_eq!(stage.len(), 3);
        assert_eq!(stage.in_channels(), 4);
        assert_eq!(stage.out_channels(), 8);
        assert_eq!(stage.stride(), 1);

        let input: Tensor<B, 4> = Tensor::random([2, 4, 6, 6], Distribution::Default, &device);
        let output = stage.forward(input.clone());
        assert_eq!(output.dims(), [2, 8, 6, 6]);

        let mut expected = stage.conv_block.forward(input);
        for block in stage.identity_blocks.iter() {
            expected = block.forward(expected);
        }
        output.to_data().assert_eq(&expected.to_data(), true);
    }

    #[test]
    #[should_panic(expected = "!~ in_channels")]
    fn test_stage_channel_mismatch() {
        type B = NdArray<f32>;
        let device = Default::default();

        let stage: Stage<B> = StageConfig::new(2, 4, [2, 2, 8], 1).init(&device);
        let input: Tensor<B, 4> = Tensor::zeros([1, 8, 6, 6], &device);
        stage.forward(input);
    }

    #[test]
    fn test_stage_forward_strided() {
        type B = NdArray<f32>;
        let device = Default::default();

        let stage: Stage<B> = StageConfig::new(3, 8, [4, 4, 16], 1).init(&device);
        assert_eq!(stage.output_resolution([7, 7]), [4, 4]);

        let input: Tensor<B, 4> = Tensor::random([1, 8, 7, 7], Distribution::Default, &device);
        assert_eq!(stage.forward(input).dims(), [1, 16, 4, 4]);
    }
}
