//! Run a single `ResNet-50` convolutional block over a random channels-last batch.
//!
//! ```text
//! $ conv_block --seed 1 --shape 3,4,4,6 --kernel-size 2 --filters 2,4,6
//! ```

use burn::backend::NdArray;
use burn::prelude::{Backend, Tensor};
use burn::tensor::Distribution;
use clap::Parser;
use resnet50::models::resnet50::naming::Branch;
use resnet50::models::resnet50::{ConvBlockMeta, conv_block};
use resnet50::utility::layout::{channels_first_to_last, channels_last_to_first};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Random seed for reproducibility.
    #[arg(short, long, default_value = "1")]
    seed: u64,

    /// Input shape, channels-last: ``batch,height,width,channels``.
    #[arg(long, value_delimiter = ',', num_args = 4, default_value = "3,4,4,6")]
    shape: Vec<usize>,

    /// Middle conv kernel size.
    #[arg(short = 'f', long, default_value = "2")]
    kernel_size: usize,

    /// Main-path filters: ``F1,F2,F3``.
    #[arg(long, value_delimiter = ',', num_args = 3, default_value = "2,4,6")]
    filters: Vec<usize>,

    /// Stage number, for naming.
    #[arg(long, default_value = "1")]
    stage: usize,

    /// Block letter, for naming.
    #[arg(long, default_value = "a")]
    block: char,

    /// Block stride.
    #[arg(short = 's', long, default_value = "2")]
    stride: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    run::<NdArray<f32>>(&args, &Default::default())
}

fn run<B: Backend>(
    args: &Args,
    device: &B::Device,
) -> anyhow::Result<()> {
    let shape: [usize; 4] = args
        .shape
        .clone()
        .try_into()
        .map_err(|shape| anyhow::anyhow!("expected 4 dims, got {shape:?}"))?;
    let filters: [usize; 3] = args
        .filters
        .clone()
        .try_into()
        .map_err(|filters| anyhow::anyhow!("expected 3 filters, got {filters:?}"))?;

    B::seed(args.seed);

    let a_prev: Tensor<B, 4> = Tensor::random(shape, Distribution::Normal(0.0, 1.0), device);

    let (a, layer) = conv_block(
        channels_last_to_first(a_prev),
        args.kernel_size,
        filters,
        args.stage,
        args.block,
        args.stride,
        device,
    );
    let a = channels_first_to_last(a);

    for branch in [Branch::MainA, Branch::MainB, Branch::MainC, Branch::Shortcut] {
        tracing::info!(
            conv = %layer.names().conv(branch),
            norm = %layer.names().norm(branch),
            "layer"
        );
    }
    tracing::info!(input = ?shape, output = ?a.dims(), "conv block");

    // A[1, 1, 0]
    if shape[0] > 1 && a.dims()[1] > 1 {
        let [_, _, _, channels] = a.dims();
        let row = a.slice([1..2, 1..2, 0..1, 0..channels]).reshape([channels]);
        let row = row
            .into_data()
            .to_vec::<f32>()
            .map_err(|err| anyhow::anyhow!("reading A[1, 1, 0]: {err:?}"))?;
        println!("{row:?}");
    }

    Ok(())
}
