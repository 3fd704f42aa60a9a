//! # `ConvNorm` Module
//!
//! A [`ConvNorm2d`] module is a [`Conv2d`] layer followed by a [`BatchNorm`] layer.
//!
//! The convolution is always run ``VALID``; ``SAME`` padding is applied
//! explicitly first via [`pad_same`], so even kernels pad the way TensorFlow does.

use crate::compat::conv_shape::{PaddingMode, expect_window2d_output_resolution};
use crate::layers::padding::pad_same;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::{Module, Param};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d};
use burn::prelude::{Backend, Tensor};

/// Glorot (Xavier) uniform initializer; the Keras default for conv kernels.
pub const GLOROT_UNIFORM: Initializer = Initializer::XavierUniform { gain: 1.0 };

/// Keras `BatchNormalization` default epsilon.
pub const KERAS_BATCH_NORM_EPSILON: f64 = 1e-3;

/// Keras `BatchNormalization` default momentum (0.99), in `burn` convention.
///
/// `burn` weights the *new* batch statistic by `momentum`; Keras weights the
/// running statistic.
pub const KERAS_BATCH_NORM_MOMENTUM: f64 = 0.01;

/// Zero a layer bias; Keras initializes biases to zeros.
pub fn zeros_bias<B: Backend>(
    bias: Option<Param<Tensor<B, 1>>>,
) -> Option<Param<Tensor<B, 1>>> {
    bias.map(|param| param.map(|b| b.zeros_like()))
}

/// [`ConvNorm2d`] Meta.
pub trait ConvNorm2dMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// Square kernel size.
    fn kernel_size(&self) -> usize;

    /// Square stride.
    fn stride(&self) -> usize;

    /// Padding mode.
    fn padding(&self) -> PaddingMode;

    /// Get the output resolution for a given input resolution.
    ///
    /// # Panics
    ///
    /// If the input is smaller than the kernel under ``VALID`` padding.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        expect_window2d_output_resolution(
            input_resolution,
            self.kernel_size(),
            self.stride(),
            self.padding(),
        )
    }
}

/// [`ConvNorm2d`] Config.
#[derive(Config, Debug)]
pub struct ConvNorm2dConfig {
    /// Number of input channels.
    pub in_channels: usize,

    /// Number of output channels (filters).
    pub out_channels: usize,

    /// Square kernel size.
    pub kernel_size: usize,

    /// Square stride.
    #[config(default = 1)]
    pub stride: usize,

    /// Padding mode.
    #[config(default = "PaddingMode::Valid")]
    pub padding: PaddingMode,

    /// Whether the conv has a bias.
    #[config(default = true)]
    pub bias: bool,

    /// The conv kernel initializer.
    #[config(default = "GLOROT_UNIFORM")]
    pub initializer: Initializer,

    /// Batch norm epsilon.
    #[config(default = "KERAS_BATCH_NORM_EPSILON")]
    pub norm_epsilon: f64,

    /// Batch norm momentum.
    #[config(default = "KERAS_BATCH_NORM_MOMENTUM")]
    pub norm_momentum: f64,
}

impl ConvNorm2dMeta for ConvNorm2dConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        self.out_channels
    }

    fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn padding(&self) -> PaddingMode {
        self.padding
    }
}

impl ConvNorm2dConfig {
    /// Check if the config is valid.
    ///
    /// # Returns
    ///
    /// A `Result<(), String>`
    pub fn try_validate(&self) -> Result<(), String> {
        if self.in_channels == 0 || self.out_channels == 0 {
            return Err(format!(
                "channels must be > 0: in_channels={}, out_channels={}",
                self.in_channels, self.out_channels
            ));
        }
        if self.kernel_size == 0 {
            return Err("kernel_size must be > 0".to_string());
        }
        if self.stride == 0 {
            return Err("stride must be > 0".to_string());
        }
        Ok(())
    }

    /// Initialize a [`ConvNorm2d`].
    ///
    /// # Panics
    ///
    /// If the config is invalid.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ConvNorm2d<B> {
        if let Err(err) = self.try_validate() {
            panic!("{err}");
        }

        let mut conv: Conv2d<B> = Conv2dConfig::new(
            [self.in_channels, self.out_channels],
            [self.kernel_size, self.kernel_size],
        )
        .with_stride([self.stride, self.stride])
        .with_padding(PaddingConfig2d::Valid)
        .with_bias(self.bias)
        .with_initializer(self.initializer.clone())
        .init(device);
        conv.bias = zeros_bias(conv.bias);

        ConvNorm2d {
            conv,
            norm: BatchNormConfig::new(self.out_channels)
                .with_epsilon(self.norm_epsilon)
                .with_momentum(self.norm_momentum)
                .init(device),

            same_padding: self.padding == PaddingMode::Same,
        }
    }
}

/// Grouped [`Conv2d`] and [`BatchNorm`] layer.
///
/// Maps ``[batch, in_channels, in_height, in_width]`` to
/// ``[batch, out_channels, out_height, out_width]``.
#[derive(Module, Debug)]
pub struct ConvNorm2d<B: Backend> {
    /// Internal Conv2d layer.
    pub conv: Conv2d<B>,

    /// Internal Norm Layer.
    pub norm: BatchNorm<B, 2>,

    same_padding: bool,
}

impl<B: Backend> ConvNorm2dMeta for ConvNorm2d<B> {
    fn in_channels(&self) -> usize {
        self.conv.weight.shape().dims[1]
    }

    fn out_channels(&self) -> usize {
        self.conv.weight.shape().dims[0]
    }

    fn kernel_size(&self) -> usize {
        self.conv.kernel_size[0]
    }

    fn stride(&self) -> usize {
        self.conv.stride[0]
    }

    fn padding(&self) -> PaddingMode {
        if self.same_padding {
            PaddingMode::Same
        } else {
            PaddingMode::Valid
        }
    }
}

impl<B: Backend> ConvNorm2d<B> {
    /// Forward Pass.
    ///
    /// # Panics
    ///
    /// If the input channel count does not match ``in_channels``.
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
        let [out_height, out_width] = self.output_resolution([in_height, in_width]);

        let x = match self.padding() {
            PaddingMode::Same => pad_same(
                input,
                self.conv.kernel_size,
                self.conv.stride,
                0.0,
            ),
            PaddingMode::Valid => input,
        };
        let x = self.conv.forward(x);

        let x = self.norm.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_height", out_height),
                ("out_width", out_width)
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
    use hamcrest::prelude::*;

    #[test]
    fn test_conv_norm_config() {
        let config = ConvNorm2dConfig::new(2, 4, 3);
        assert_eq!(config.in_channels(), 2);
        assert_eq!(config.out_channels(), 4);
        assert_eq!(config.kernel_size(), 3);
        assert_eq!(config.stride(), 1);
        assert_eq!(config.padding(), PaddingMode::Valid);
        assert!(config.bias);
        assert_that!(config.norm_epsilon, close_to(1e-3, 1e-12));
        assert_that!(config.norm_momentum, close_to(0.01, 1e-12));
        assert_eq!(config.output_resolution([8, 8]), [6, 6]);

        let config = config.with_stride(2).with_padding(PaddingMode::Same);
        assert_eq!(config.output_resolution([8, 8]), [4, 4]);
        assert_eq!(config.output_resolution([7, 7]), [4, 4]);
    }

    #[test]
    fn test_conv_norm_validate() {
        assert!(ConvNorm2dConfig::new(2, 4, 3).try_validate().is_ok());
        assert!(ConvNorm2dConfig::new(0, 4, 3).try_validate().is_err());
        assert!(ConvNorm2dConfig::new(2, 4, 0).try_validate().is_err());
        assert!(
            ConvNorm2dConfig::new(2, 4, 3)
                .with_stride(0)
                .try_validate()
                .is_err()
        );
    }

    #[test]
    #[should_panic(expected = "stride must be > 0")]
    fn test_conv_norm_init_invalid() {
        type B = NdArray<f32>;
        let device = Default::default();
        let _layer: ConvNorm2d<B> = ConvNorm2dConfig::new(2, 4, 3)
            .with_stride(0)
            .init(&device);
    }

    #[test]
    fn test_conv_norm_init_zero_bias() {
        type B = NdArray<f32>;
        let device = Default::default();

        let layer: ConvNorm2d<B> = ConvNorm2dConfig::new(6, 4, 1).init(&device);

        let bias = layer.conv.bias.as_ref().unwrap().val();
        assert_eq!(bias.dims(), [4]);
        assert_eq!(bias.abs().sum().into_scalar(), 0.0);

        let weight = layer.conv.weight.val();
        assert!(weight.abs().sum().into_scalar() > 0.0);

        let layer: ConvNorm2d<B> = ConvNorm2dConfig::new(6, 4, 1)
            .with_bias(false)
            .init(&device);
        assert!(layer.conv.bias.is_none());
    }

    #[test]
    fn test_conv_norm_meta() {
        type B = NdArray<f32>;
        let device = Default::default();

        let layer: ConvNorm2d<B> = ConvNorm2dConfig::new(2, 4, 2)
            .with_stride(1)
            .with_padding(PaddingMode::Same)
            .init(&device);

        assert_eq!(layer.in_channels(), 2);
        assert_eq!(layer.out_channels(), 4);
        assert_eq!(layer.kernel_size(), 2);
        assert_eq!(layer.stride(), 1);
        assert_eq!(layer.padding(), PaddingMode::Same);
    }

    #[test]
    fn test_conv_norm_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let layer: ConvNorm2d<B> = ConvNorm2dConfig::new(6, 4, 2)
            .with_padding(PaddingMode::Same)
            .init(&device);

        let input: Tensor<B, 4> = Tensor::random([3, 6, 4, 4], Distribution::Default, &device);
        let output = layer.forward(input.clone());
        assert_eq!(output.dims(), [3, 4, 4, 4]);

        let expected = {
            let x = pad_same(input, [2, 2], [1, 1], 0.0);
            let x = layer.conv.forward(x);
            layer.norm.forward(x)
        };
        output.to_data().assert_eq(&expected.to_data(), true);

        let layer: ConvNorm2d<B> = ConvNorm2dConfig::new(6, 4, 1)
            .with_stride(2)
            .init(&device);
        let input: Tensor<B, 4> = Tensor::random([3, 6, 5, 5], Distribution::Default, &device);
        assert_eq!(layer.forward(input).dims(), [3, 4, 3, 3]);
    }

    #[test]
    #[should_panic(expected = "!~ in_channels")]
    fn test_conv_norm_forward_wrong_channels() {
        type B = NdArray<f32>;
        let device = Default::default();

        let layer: ConvNorm2d<B> = ConvNorm2dConfig::new(6, 4, 1).init(&device);
        let input: Tensor<B, 4> = Tensor::zeros([1, 5, 4, 4], &device);
        layer.forward(input);
    }
}
