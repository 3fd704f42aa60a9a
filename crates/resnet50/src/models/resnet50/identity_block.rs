//! # Identity Block for `ResNet-50`
//!
//! [`IdentityBlock`] is the residual unit with an un-projected shortcut;
//! it preserves resolution and channel count.
//!
//! ```text
//! x ─┬─ res_branch2a (1x1, VALID) ─ bn ─ relu
//!    │  res_branch2b (fxf, SAME)  ─ bn ─ relu
//!    │  res_branch2c (1x1, VALID) ─ bn ─┐
//!    └───────────────────────────────── + ─ relu
//! ```

use crate::layers::conv_norm::{ConvNorm2d, ConvNorm2dMeta};
use crate::models::resnet50::conv_block::{
    DEFAULT_KERNEL_SIZE, main_path_configs, validate_filters,
};
use crate::models::resnet50::naming::{BlockNames, Branch, block_index, block_letter};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::Relu;
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`IdentityBlock`] Meta trait.
pub trait IdentityBlockMeta {
    /// The main-path filter counts ``[F1, F2, F3]``.
    fn filters(&self) -> [usize; 3];

    /// The number of input (and output) channels; ``F3``.
    fn channels(&self) -> usize {
        self.filters()[2]
    }

    /// The middle conv kernel size.
    fn kernel_size(&self) -> usize;

    /// Stage number, for naming.
    fn stage(&self) -> usize;

    /// Block letter, for naming.
    fn block(&self) -> char;

    /// The naming basis of the block.
    fn names(&self) -> BlockNames {
        BlockNames::new(self.stage(), self.block())
    }
}

/// [`IdentityBlock`] Config.
///
/// Implements [`IdentityBlockMeta`].
#[derive(Config, Debug)]
pub struct IdentityBlockConfig {
    /// The main-path filter counts ``[F1, F2, F3]``.
    pub filters: [usize; 3],

    /// Stage number, for naming.
    pub stage: usize,

    /// Block letter, for naming.
    pub block: char,

    /// The middle conv kernel size.
    #[config(default = "DEFAULT_KERNEL_SIZE")]
    pub kernel_size: usize,
}

impl IdentityBlockMeta for IdentityBlockConfig {
    fn filters(&self) -> [usize; 3] {
        self.filters
    }

    fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    fn stage(&self) -> usize {
        self.stage
    }

    fn block(&self) -> char {
        self.block
    }
}

impl IdentityBlockConfig {
    /// Check if the config is valid.
    ///
    /// # Returns
    ///
    /// A `Result<(), String>`
    pub fn try_validate(&self) -> Result<(), String> {
        validate_filters(&self.filters)?;
        if self.kernel_size == 0 {
            return Err("kernel_size must be > 0".to_string());
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

    /// Initialize an [`IdentityBlock`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> IdentityBlock<B> {
        self.expect_valid();

        let [branch2a, branch2b, branch2c] =
            main_path_configs(self.channels(), self.filters, self.kernel_size, 1);

        IdentityBlock {
            stage: self.stage,
            block: block_index(self.block).unwrap_or_default(),

            branch2a: branch2a.init(device),
            branch2b: branch2b.init(device),
            branch2c: branch2c.init(device),

            relu: Relu::new(),
        }
    }
}

/// Identity Block for `ResNet-50`.
///
/// Maps ``[batch, F3, height, width]`` to ``[batch, F3, height, width]``.
///
/// Implements [`IdentityBlockMeta`].
#[derive(Module, Debug)]
pub struct IdentityBlock<B: Backend> {
    stage: usize,
    block: usize,

    /// First main-path conv/norm; ``1x1``.
    pub branch2a: ConvNorm2d<B>,

    /// Second main-path conv/norm; ``fxf``, ``SAME``.
    pub branch2b: ConvNorm2d<B>,

    /// Third main-path conv/norm; ``1x1``.
    pub branch2c: ConvNorm2d<B>,

    relu: Relu,
}

impl<B: Backend> IdentityBlockMeta for IdentityBlock<B> {
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

    fn stage(&self) -> usize {
        self.stage
    }

    fn block(&self) -> char {
        block_letter(self.block)
    }
}

impl<B: Backend> IdentityBlock<B> {
    /// The conv/norm units in graph order, with their branch.
    pub fn units(&self) -> [(Branch, &ConvNorm2d<B>); 3] {
        [
            (Branch::MainA, &self.branch2a),
            (Branch::MainB, &self.branch2b),
            (Branch::MainC, &self.branch2c),
        ]
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, F3, height, width]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, F3, height, width]`` tensor.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, in_height, in_width] = unpack_shape_contract!(
            ["batch", "in_channels", "in_height", "in_width"],
            &input,
            &["batch", "in_height", "in_width"],
            &[("in_channels", self.channels())],
        );

        let shortcut = input.clone();

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
                ("out_channels", self.channels()),
                ("out_height", in_height),
                ("out_width", in_width)
            ]
        );

        x
    }
}
