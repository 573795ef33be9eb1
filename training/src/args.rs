use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "N-HiTS Trainer")]
#[command(version = "0.1.0")]
pub struct Args {
    /// Forecast horizon (time steps).
    #[arg(long, default_value_t = 24)]
    pub horizon: usize,

    /// Insample window length, as a multiple of the horizon.
    #[arg(long, default_value_t = 5)]
    pub input_multiplier: usize,

    /// Blocks per stack; the list length sets the stack count.
    #[arg(long, value_delimiter = ',', default_values_t = vec![1, 1, 1])]
    pub blocks: Vec<usize>,

    /// Projection layers per block.
    #[arg(long, default_value_t = 2)]
    pub layers: usize,

    /// Hidden width of every projection layer.
    #[arg(long, default_value_t = 512)]
    pub hidden_size: usize,

    /// Input pooling kernel per stack.
    #[arg(long, value_delimiter = ',', default_values_t = vec![4, 2, 1])]
    pub pool_kernel_sizes: Vec<usize>,

    /// Forecast frequency downsample per stack.
    #[arg(long, value_delimiter = ',', default_values_t = vec![4, 2, 1])]
    pub freq_downsamples: Vec<usize>,

    /// Input pooling mode: max, stochastic, conv or none.
    #[arg(long, default_value = "max")]
    pub pooling_mode: String,

    /// Hidden layer mode: linear or conv.
    #[arg(long, default_value = "linear")]
    pub layer_mode: String,

    /// Output layer mode: linear, conv or max.
    #[arg(long, default_value = "linear")]
    pub output_mode: String,

    /// Knot interpolation: nearest, linear or cubic-<batch>.
    #[arg(long, default_value = "linear")]
    pub interpolation: String,

    /// Activation for block hidden layers.
    #[arg(long, default_value = "ReLU")]
    pub activation: String,

    /// Weight initialization scheme.
    #[arg(long, default_value = "lecun_normal")]
    pub initialization: String,

    /// Dropout probability inside projection layers.
    #[arg(long, default_value_t = 0.0)]
    pub dropout: f32,

    /// Apply batch normalization on the first block.
    #[arg(long)]
    pub batch_normalization: bool,

    /// Reuse the first block's weights across each stack.
    #[arg(long)]
    pub shared_weights: bool,

    /// Seed for weight init, stochastic pooling and the demo data.
    #[arg(long, default_value_t = 1)]
    pub seed: u64,

    /// Series per training batch.
    #[arg(long, default_value_t = 256)]
    pub batch_size: usize,

    /// Training batches per epoch.
    #[arg(long, default_value_t = 32)]
    pub batches_per_epoch: usize,

    /// Validation batches.
    #[arg(long, default_value_t = 4)]
    pub validation_batches: usize,

    /// Maximum number of training epochs.
    #[arg(long, default_value_t = 50)]
    pub epochs: usize,

    /// Initial learning rate for the optimizer.
    #[arg(long, default_value_t = 0.001)]
    pub learning_rate: f64,

    /// L2 penalty for the optimizer.
    #[arg(long, default_value_t = 0.0)]
    pub weight_decay: f64,

    /// Learning rate decay factor.
    #[arg(long, default_value_t = 0.5)]
    pub lr_decay: f64,

    /// Epochs between learning rate decays.
    #[arg(long, default_value_t = 10)]
    pub lr_decay_step_size: usize,

    /// Epochs without improvement before early stopping.
    #[arg(long, default_value_t = 5)]
    pub patience: u64,

    /// Where the best checkpoint is written.
    #[arg(long, default_value = "model.safetensors")]
    pub model_path: String,
}
