//! # `ResNet-50` Core Model
//!
//! ```text
//! stem ─ stage2 ─ stage3 ─ stage4 ─ stage5 ─ avg_pool (2x2/2) ─ flatten ─ fc ─ [softmax]
//! ```

use crate::compat::conv_shape::{PaddingMode, maybe_window2d_output_resolution};
use crate::layers::conv_norm::{GLOROT_UNIFORM, zeros_bias};
use crate::models::resnet50::conv_block::{ConvBlockMeta, DEFAULT_KERNEL_SIZE};
use crate::models::resnet50::identity_block::IdentityBlockMeta;
use crate::models::resnet50::naming::{Branch, STEM_CONV_NAME, STEM_NORM_NAME, fc_name};
use crate::models::resnet50::stage::{Stage, StageConfig, StageMeta};
use crate::models::resnet50::stem::{Stem, StemConfig};
use crate::utility::layout::channels_last_to_first;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::pool::{AvgPool2d, AvgPool2dConfig};
use burn::nn::{Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::softmax;

/// Stage number of the first residual stage; the stem is stage 1.
pub const FIRST_RESIDUAL_STAGE: usize = 2;

/// `ResNet-50` main-path filters, per stage.
pub const RESNET50_FILTERS: [[usize; 3]; 4] = [
    [64, 64, 256],
    [128, 128, 512],
    [256, 256, 1024],
    [512, 512, 2048],
];

/// `ResNet-50` identity blocks, per stage.
pub const RESNET50_IDENTITY_BLOCKS: [usize; 4] = [2, 3, 5, 2];

/// `ResNet-50` conv block strides, per stage.
pub const RESNET50_STRIDES: [usize; 4] = [1, 2, 2, 2];

/// Default image resolution, ``[height, width]``.
pub const DEFAULT_IMAGE_RESOLUTION: [usize; 2] = [64, 64];

/// [`ResNet50`] Config.
#[derive(Config, Debug)]
pub struct ResNet50Config {
    /// The number of output classes.
    pub num_classes: usize,

    /// The number of image channels.
    #[config(default = 3)]
    pub in_channels: usize,

    /// The image resolution, ``[height, width]``.
    ///
    /// Fixes the size of the flattened features fed to the classifier.
    #[config(default = "DEFAULT_IMAGE_RESOLUTION")]
    pub image_resolution: [usize; 2],

    /// The number of stem filters.
    #[config(default = 64)]
    pub stem_filters: usize,

    /// Main-path filters, per residual stage.
    #[config(default = "RESNET50_FILTERS")]
    pub stage_filters: [[usize; 3]; 4],

    /// Identity blocks, per residual stage.
    #[config(default = "RESNET50_IDENTITY_BLOCKS")]
    pub identity_blocks: [usize; 4],

    /// The head average pool window and stride.
    #[config(default = 2)]
    pub avg_pool_size: usize,
}

impl ResNet50Config {
    /// The stem config.
    pub fn stem(&self) -> StemConfig {
        StemConfig::new()
            .with_in_channels(self.in_channels)
            .with_out_channels(self.stem_filters)
    }

    /// The residual stage configs, in order.
    pub fn stages(&self) -> Vec<StageConfig> {
        let mut in_channels = self.stem_filters;
        (0..4)
            .map(|idx| {
                let config = StageConfig::new(
                    FIRST_RESIDUAL_STAGE + idx,
                    in_channels,
                    self.stage_filters[idx],
                    self.identity_blocks[idx],
                )
                .with_stride(RESNET50_STRIDES[idx])
                .with_kernel_size(DEFAULT_KERNEL_SIZE);
                in_channels = config.out_channels();
                config
            })
            .collect()
    }

    /// The head average pool config.
    pub fn avg_pool(&self) -> AvgPool2dConfig {
        AvgPool2dConfig::new([self.avg_pool_size, self.avg_pool_size])
            .with_strides([self.avg_pool_size, self.avg_pool_size])
            .with_padding(PaddingConfig2d::Valid)
    }

    /// Trace the feature resolution through stem, stages, and pool.
    ///
    /// # Returns
    ///
    /// ``Ok((stage_resolutions, pooled_resolution))``; where `stage_resolutions`
    /// holds the stem output followed by each residual stage output.
    pub fn try_trace_resolutions(&self) -> Result<(Vec<[usize; 2]>, [usize; 2]), String> {
        let stem = self.stem();
        let padded = stem.padded_resolution(self.image_resolution);
        let conv = maybe_window2d_output_resolution(
            padded,
            stem.kernel_size,
            stem.stride,
            PaddingMode::Valid,
        )
        .ok_or_else(|| format!("image {:?} is too small for the stem conv", self.image_resolution))?;
        let pooled = maybe_window2d_output_resolution(
            conv,
            stem.pool_size,
            stem.pool_stride,
            PaddingMode::Valid,
        )
        .ok_or_else(|| format!("image {:?} is too small for the stem pool", self.image_resolution))?;

        let mut resolutions = vec![pooled];
        let mut resolution = pooled;
        for stage in self.stages() {
            resolution = stage.output_resolution(resolution);
            resolutions.push(resolution);
        }

        let head = maybe_window2d_output_resolution(
            resolution,
            self.avg_pool_size,
            self.avg_pool_size,
            PaddingMode::Valid,
        )
        .ok_or_else(|| {
            format!(
                "image {:?} is too small: final stage resolution {:?} < avg pool {}",
                self.image_resolution, resolution, self.avg_pool_size
            )
        })?;

        Ok((resolutions, head))
    }

    /// The size of the flattened features fed to the classifier.
    ///
    /// # Panics
    ///
    /// If the image resolution is too small for the network.
    pub fn flat_features(&self) -> usize {
        let (_, [h, w]) = match self.try_trace_resolutions() {
            Ok(trace) => trace,
            Err(err) => panic!("{err}"),
        };
        self.stage_filters[3][2] * h * w
    }

    /// Check if the config is valid.
    ///
    /// # Returns
    ///
    /// A `Result<(), String>`
    pub fn try_validate(&self) -> Result<(), String> {
        if self.num_classes == 0 {
            return Err("num_classes must be > 0".to_string());
        }
        if self.in_channels == 0 || self.stem_filters == 0 {
            return Err("in_channels and stem_filters must be > 0".to_string());
        }
        if self.image_resolution.contains(&0) {
            return Err(format!(
                "image_resolution must be > 0: {:?}",
                self.image_resolution
            ));
        }
        if self.avg_pool_size == 0 {
            return Err("avg_pool_size must be > 0".to_string());
        }
        for stage in self.stages() {
            stage.try_validate()?;
        }
        self.try_trace_resolutions()?;
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{err}");
        }
    }

    /// Initialize a [`ResNet50`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResNet50<B> {
        self.expect_valid();

        let [image_height, image_width] = self.image_resolution;

        ResNet50 {
            image_height,
            image_width,
            stem: self.stem().init(device),
            stages: self.stages().iter().map(|s| s.init(device)).collect(),
            avg_pool: self.avg_pool().init(),
            fc: init_classifier(self.flat_features(), self.num_classes, device),
        }
    }
}

/// Glorot-uniform kernel, zero bias.
fn init_classifier<B: Backend>(
    d_input: usize,
    num_classes: usize,
    device: &B::Device,
) -> Linear<B> {
    let mut fc: Linear<B> = LinearConfig::new(d_input, num_classes)
        .with_initializer(GLOROT_UNIFORM)
        .init(device);
    fc.bias = zeros_bias(fc.bias);
    fc
}

/// `ResNet-50` model.
///
/// Maps ``[batch, in_channels, height, width]`` images to ``[batch, num_classes]`` logits.
#[derive(Module, Debug)]
pub struct ResNet50<B: Backend> {
    image_height: usize,
    image_width: usize,

    /// Stage 1.
    pub stem: Stem<B>,

    /// Stages 2 through 5.
    pub stages: Vec<Stage<B>>,

    /// The head pool.
    pub avg_pool: AvgPool2d,

    /// The classifier.
    pub fc: Linear<B>,
}

impl<B: Backend> ResNet50<B> {
    /// The image resolution the classifier was sized for.
    pub fn image_resolution(&self) -> [usize; 2] {
        [self.image_height, self.image_width]
    }

    /// The number of output classes.
    pub fn num_classes(&self) -> usize {
        self.fc.weight.shape().dims[1]
    }

    /// Replace the classifier with a fresh one for `num_classes`.
    pub fn with_classes(
        self,
        num_classes: usize,
    ) -> Self {
        let [d_input, _] = self.fc.weight.dims();
        let device = self.fc.weight.device();
        Self {
            fc: init_classifier(d_input, num_classes, &device),
            ..self
        }
    }

    /// Conv / batch norm layer names, in graph order.
    ///
    /// Within a conv block the shortcut follows the main path.
    pub fn layer_names(&self) -> Vec<(String, String)> {
        let mut names = vec![(STEM_CONV_NAME.to_string(), STEM_NORM_NAME.to_string())];
        for stage in &self.stages {
            let conv_block = &stage.conv_block;
            for (branch, _) in conv_block.units() {
                names.push((conv_block.names().conv(branch), conv_block.names().norm(branch)));
            }
            for block in &stage.identity_blocks {
                for branch in Branch::MAIN {
                    names.push((block.names().conv(branch), block.names().norm(branch)));
                }
            }
        }
        names
    }

    /// Forward pass through stem and each stage, keeping every stage output.
    ///
    /// # Returns
    ///
    /// The stem output followed by the output of each residual stage.
    pub fn forward_stages(
        &self,
        input: Tensor<B, 4>,
    ) -> Vec<Tensor<B, 4>> {
        let mut outputs = Vec::with_capacity(1 + self.stages.len());
        let mut x = self.stem.forward(input);
        outputs.push(x.clone());
        for stage in &self.stages {
            x = stage.forward(x);
            outputs.push(x.clone());
        }
        outputs
    }

    /// Forward pass to the flattened, pooled features.
    ///
    /// # Returns
    ///
    /// A ``[batch, flat_features]`` tensor.
    ///
    /// # Panics
    ///
    /// If the input channels or resolution differ from the config.
    pub fn forward_features(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let [image_height, image_width] = self.image_resolution();
        let [batch] = unpack_shape_contract!(
            ["batch", "in_channels", "height", "width"],
            &input,
            &["batch"],
            &[
                ("in_channels", self.stem.in_channels()),
                ("height", image_height),
                ("width", image_width)
            ],
        );

        let x = self.stem.forward(input);
        let x = self.stages.iter().fold(x, |x, stage| stage.forward(x));
        let x = self.avg_pool.forward(x);
        let x: Tensor<B, 2> = x.flatten(1, 3);

        let [features, _] = self.fc.weight.dims();
        assert_shape_contract_periodically!(
            ["batch", "features"],
            &x,
            &[("batch", batch), ("features", features)]
        );

        x
    }

    /// `ResNet-50` forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]`` images.
    ///
    /// # Returns
    ///
    /// ``[batch, num_classes]`` logits.
    #[tracing::instrument(level = "debug", skip_all, fields(input = ?input.dims()))]
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let x = self.forward_features(input);
        self.fc.forward(x)
    }

    /// Forward pass over channels-last ``[batch, height, width, channels]`` images.
    pub fn forward_channels_last(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        self.forward(channels_last_to_first(input))
    }

    /// Class probabilities; softmax over the logits.
    ///
    /// # Returns
    ///
    /// ``[batch, num_classes]`` probabilities.
    pub fn predict(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        softmax(self.forward(input), 1)
    }
}
