mod args;
mod data;
mod loss;
mod trainer;

use std::error::Error;

use args::Args;
use candle_core::{Device, Result as CandleResult};
use candle_nn::{AdamW, ParamsAdamW};
use clap::Parser;
use data::SeriesGenerator;
use log::LevelFilter;
use nhits::activation::ActivationKind;
use nhits::basis::InterpolationMode;
use nhits::block::{LayerMode, OutputLayerMode};
use nhits::init::Initialization;
use nhits::model::StackType;
use nhits::pooling::PoolingMode;
use nhits::{Batch, Nhits, NhitsConfig};
use simplelog::{Config, SimpleLogger};
use trainer::Trainer;

fn main() -> Result<(), Box<dyn Error>> {
    let args = init()?;
    let config = build_config(&args)?;

    let device = Device::cuda_if_available(0)?;
    if device.is_cuda() {
        log::info!("Using CUDA");
    } else {
        log::info!("Using CPU");
    }

    log::info!(
        "Creating model: horizon {}, input {}, {} stacks",
        config.horizon,
        config.input_size,
        config.stack_types.len()
    );
    let model = Nhits::new(&config, &device)?;

    let mut optimizer = AdamW::new(
        model.parameters(),
        ParamsAdamW {
            lr: args.learning_rate,
            weight_decay: args.weight_decay,
            ..ParamsAdamW::default()
        },
    )?;

    log::info!("Generating synthetic series");
    let mut generator = SeriesGenerator::new(config.input_size, config.horizon, args.seed);
    let train = batches(&mut generator, args.batches_per_epoch, args.batch_size, &device)?;
    let valid = batches(&mut generator, args.validation_batches, args.batch_size, &device)?;

    log::info!("Training model");
    let trainer = Trainer::new(&args);
    let best_val_loss = trainer.fit(
        &model,
        &mut optimizer,
        loss::masked_mae,
        loss::masked_mae,
        &train,
        &valid,
    )?;

    log::info!(
        "Done! Best validation loss {:.5}, model saved to {}",
        best_val_loss,
        args.model_path
    );
    Ok(())
}

fn init() -> Result<Args, Box<dyn Error>> {
    let args = Args::parse();
    SimpleLogger::init(LevelFilter::Info, Config::default())?;
    Ok(args)
}

fn build_config(args: &Args) -> Result<NhitsConfig, Box<dyn Error>> {
    let n_stacks = args.blocks.len();

    let activation = ActivationKind::from_name(&args.activation)?;
    // SELU pairs with lecun_normal, as in the reference hyperparameter space.
    let initialization = if activation == ActivationKind::Selu {
        Initialization::LecunNormal
    } else {
        Initialization::from_name(&args.initialization)?
    };

    let mut config = NhitsConfig::new(args.input_multiplier * args.horizon, args.horizon);
    config.stack_types = vec![StackType::Identity; n_stacks];
    config.n_blocks = args.blocks.clone();
    config.n_layers = vec![args.layers; n_stacks];
    config.hidden_sizes = vec![vec![args.hidden_size; args.layers]; n_stacks];
    config.pool_kernel_sizes = args.pool_kernel_sizes.clone();
    config.freq_downsamples = args.freq_downsamples.clone();
    config.pooling_mode = PoolingMode::from_name(&args.pooling_mode)?;
    config.layer_mode = LayerMode::from_name(&args.layer_mode)?;
    config.output_mode = OutputLayerMode::from_name(&args.output_mode)?;
    config.interpolation = InterpolationMode::from_name(&args.interpolation)?;
    config.dropout = args.dropout;
    config.activation = activation;
    config.initialization = initialization;
    config.batch_normalization = args.batch_normalization;
    config.shared_weights = args.shared_weights;
    config.seed = args.seed;
    Ok(config)
}

fn batches(
    generator: &mut SeriesGenerator,
    count: usize,
    batch_size: usize,
    device: &Device,
) -> CandleResult<Vec<Batch>> {
    (0..count)
        .map(|_| generator.batch(batch_size, device))
        .collect()
}
