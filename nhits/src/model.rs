use std::path::Path;
use std::sync::Arc;

use candle_core::{bail, Device, Result, Tensor, Var};

use crate::activation::ActivationKind;
use crate::basis::{IdentityBasis, InterpolationMode};
use crate::block::{Block, BlockConfig, LayerMode, OutputLayerMode};
use crate::init::{Initialization, ParamStore};
use crate::pooling::PoolingMode;

/// Families of basis functions a stack can be built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackType {
    Identity,
}

impl StackType {
    pub fn from_name(name: &str) -> Result<Self> {
        Ok(match name {
            "identity" => Self::Identity,
            _ => bail!("stack type '{name}' is not one of identity"),
        })
    }
}

/// Full configuration surface of the model. Per-stack parameters are lists
/// indexed by stack, broadcast across every block of that stack.
#[derive(Debug, Clone)]
pub struct NhitsConfig {
    pub input_size: usize,
    pub horizon: usize,
    /// Exogenous covariate channels; both windows are flattened into the
    /// projection input.
    pub n_exogenous: usize,
    /// Reserved for basis families that encode covariates; identity stacks
    /// consume the flattened covariates directly.
    pub exogenous_hidden_size: usize,
    pub n_static: usize,
    pub static_hidden_size: usize,
    pub stack_types: Vec<StackType>,
    pub n_blocks: Vec<usize>,
    pub n_layers: Vec<usize>,
    pub hidden_sizes: Vec<Vec<usize>>,
    pub pool_kernel_sizes: Vec<usize>,
    pub freq_downsamples: Vec<usize>,
    pub pooling_mode: PoolingMode,
    pub layer_mode: LayerMode,
    pub output_mode: OutputLayerMode,
    pub interpolation: InterpolationMode,
    pub dropout: f32,
    pub activation: ActivationKind,
    pub initialization: Initialization,
    pub batch_normalization: bool,
    pub shared_weights: bool,
    pub seed: u64,
}

impl NhitsConfig {
    /// Canonical three-stack setup, sized for the given windows.
    pub fn new(input_size: usize, horizon: usize) -> Self {
        Self {
            input_size,
            horizon,
            n_exogenous: 0,
            exogenous_hidden_size: 0,
            n_static: 0,
            static_hidden_size: 0,
            stack_types: vec![StackType::Identity; 3],
            n_blocks: vec![1; 3],
            n_layers: vec![2; 3],
            hidden_sizes: vec![vec![512, 512]; 3],
            pool_kernel_sizes: vec![4, 2, 1],
            freq_downsamples: vec![4, 2, 1],
            pooling_mode: PoolingMode::Max,
            layer_mode: LayerMode::Linear,
            output_mode: OutputLayerMode::Linear,
            interpolation: InterpolationMode::Linear,
            dropout: 0.0,
            activation: ActivationKind::Relu,
            initialization: Initialization::LecunNormal,
            batch_normalization: false,
            shared_weights: false,
            seed: 1,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.stack_types.is_empty() {
            bail!("at least one stack is required");
        }
        let n = self.stack_types.len();
        if self.n_blocks.len() != n
            || self.n_layers.len() != n
            || self.hidden_sizes.len() != n
            || self.pool_kernel_sizes.len() != n
            || self.freq_downsamples.len() != n
        {
            bail!("per-stack parameter lists must all have {n} entries");
        }
        if self.n_blocks.iter().any(|&blocks| blocks == 0) {
            bail!("every stack needs at least one block");
        }
        if self.freq_downsamples.iter().any(|&freq| freq == 0) {
            bail!("frequency downsample factors must be positive");
        }
        Ok(())
    }
}

/// One batch, keyed the way the collaborating data pipeline provides it.
/// The target, covariates and masks span both windows; the model slices
/// them into insample/outsample parts.
pub struct Batch {
    /// Target series: (batch, input + horizon).
    pub target: Tensor,
    /// Exogenous covariates: (batch, channels, input + horizon).
    pub exogenous: Option<Tensor>,
    /// Per-series static covariates: (batch, n_static).
    pub statics: Option<Tensor>,
    /// Data-availability mask over the series, {0, 1}.
    pub available_mask: Tensor,
    /// Sample mask selecting outsample positions that count, {0, 1}.
    pub sample_mask: Tensor,
}

/// Output of one forward pass.
pub struct Prediction {
    /// Ground truth over the forecast window: (batch, horizon).
    pub target: Tensor,
    /// Accumulated forecast: (batch, horizon).
    pub forecast: Tensor,
    /// Per-block contributions, naive level first:
    /// (batch, blocks + 1, horizon). Only recorded in decomposition mode.
    pub block_forecasts: Option<Tensor>,
    /// Sample mask over the forecast window: (batch, horizon).
    pub mask: Tensor,
}

/// N-HiTS: stacks of interpolation blocks composed in a doubly-residual
/// chain. Each block reconstructs part of the (time-reversed) input and
/// contributes one frequency band of the forecast.
pub struct Nhits {
    input_size: usize,
    horizon: usize,
    n_exogenous: usize,
    blocks: Vec<Arc<Block>>,
    params: ParamStore,
}

impl Nhits {
    pub fn new(config: &NhitsConfig, device: &Device) -> Result<Self> {
        config.validate()?;
        let mut store = ParamStore::new(config.initialization, config.seed, device);
        let mut blocks: Vec<Arc<Block>> = Vec::new();

        for (stack_id, stack_type) in config.stack_types.iter().enumerate() {
            for block_id in 0..config.n_blocks[stack_id] {
                // Weight sharing aliases every later block of the stack to
                // its first; gradients accumulate on the one parameter set.
                if config.shared_weights && block_id > 0 {
                    blocks.push(blocks[blocks.len() - 1].clone());
                    continue;
                }

                // Batch norm only ever applies to the model's first block.
                let batch_normalization = blocks.is_empty() && config.batch_normalization;

                let block = match stack_type {
                    StackType::Identity => {
                        let knots_size =
                            (config.horizon / config.freq_downsamples[stack_id]).max(1);
                        let basis = IdentityBasis::new(
                            config.input_size,
                            knots_size,
                            config.horizon,
                            config.interpolation,
                            device,
                        )?;
                        let block_config = BlockConfig {
                            input_size: config.input_size,
                            horizon: config.horizon,
                            n_exogenous: config.n_exogenous,
                            n_static: config.n_static,
                            static_hidden_size: config.static_hidden_size,
                            n_theta: config.input_size + knots_size,
                            n_layers: config.n_layers[stack_id],
                            hidden_sizes: config.hidden_sizes[stack_id].clone(),
                            pool_kernel_size: config.pool_kernel_sizes[stack_id],
                            pooling_mode: config.pooling_mode,
                            layer_mode: config.layer_mode,
                            output_mode: config.output_mode,
                            batch_normalization,
                            dropout: config.dropout,
                            activation: config.activation,
                        };
                        Block::new(
                            &block_config,
                            basis,
                            &format!("stack{stack_id}.block{block_id}"),
                            &mut store,
                        )?
                    }
                };
                blocks.push(Arc::new(block));
            }
        }

        log::debug!(
            "built {} blocks over {} stacks ({} parameter tensors)",
            blocks.len(),
            config.stack_types.len(),
            store.len()
        );

        Ok(Self {
            input_size: config.input_size,
            horizon: config.horizon,
            n_exogenous: config.n_exogenous,
            blocks,
            params: store,
        })
    }

    /// Trainable variables, for an externally constructed optimizer.
    pub fn parameters(&self) -> Vec<Var> {
        self.params.all_vars()
    }

    pub fn blocks(&self) -> &[Arc<Block>] {
        &self.blocks
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.params.save(path)
    }

    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.params.load(path)
    }

    pub fn forward(&self, batch: &Batch, train: bool) -> Result<Prediction> {
        self.run(batch, train, false)
    }

    /// Like [`forward`](Self::forward), additionally recording every block's
    /// forecast contribution. The aggregate forecast is unchanged.
    pub fn forward_decomposed(&self, batch: &Batch, train: bool) -> Result<Prediction> {
        self.run(batch, train, true)
    }

    fn run(&self, batch: &Batch, train: bool, decompose: bool) -> Result<Prediction> {
        let (_, len) = batch.target.dims2()?;
        if len != self.input_size + self.horizon {
            bail!(
                "target length {len} does not match input {} + horizon {}",
                self.input_size,
                self.horizon
            );
        }

        let insample_y = batch.target.narrow(1, 0, self.input_size)?;
        let outsample_y = batch.target.narrow(1, self.input_size, self.horizon)?;
        let insample_mask = batch.available_mask.narrow(1, 0, self.input_size)?;
        let outsample_mask = batch.sample_mask.narrow(1, self.input_size, self.horizon)?;

        let (insample_x, outsample_x) = match (&batch.exogenous, self.n_exogenous) {
            (_, 0) => (None, None),
            (Some(exogenous), _) => (
                Some(reverse(&exogenous.narrow(2, 0, self.input_size)?, 2)?),
                Some(exogenous.narrow(2, self.input_size, self.horizon)?),
            ),
            (None, _) => {
                bail!("the model is configured for exogenous covariates but the batch has none")
            }
        };

        // Most-recent-first residual signal, re-masked after every block so
        // unavailable positions never feed the next one.
        let mut residuals = reverse(&insample_y, 1)?;
        let insample_mask = reverse(&insample_mask, 1)?;

        // Naive1 level: the forecast starts at the last observed value.
        let level = insample_y.narrow(1, self.input_size - 1, 1)?;
        let mut forecast = level.repeat((1, self.horizon))?;

        let mut parts = decompose.then(|| vec![forecast.clone()]);

        for block in &self.blocks {
            let (backcast, block_forecast) = block.forward(
                &residuals,
                insample_x.as_ref(),
                outsample_x.as_ref(),
                batch.statics.as_ref(),
                train,
            )?;
            residuals = ((residuals - backcast)? * &insample_mask)?;
            forecast = (forecast + &block_forecast)?;
            if let Some(parts) = parts.as_mut() {
                parts.push(block_forecast);
            }
        }

        let block_forecasts = match parts {
            Some(parts) => Some(Tensor::stack(&parts, 1)?),
            None => None,
        };

        Ok(Prediction {
            target: outsample_y,
            forecast,
            block_forecasts,
            mask: outsample_mask,
        })
    }
}

/// Reverses a tensor along one dimension.
fn reverse(xs: &Tensor, dim: usize) -> Result<Tensor> {
    let len = xs.dim(dim)?;
    let idx: Vec<u32> = (0..len as u32).rev().collect();
    xs.index_select(&Tensor::from_vec(idx, len, xs.device())?, dim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    #[test]
    fn test_unknown_stack_type_is_rejected() {
        assert!(StackType::from_name("seasonality").is_err());
    }

    #[test]
    fn test_reverse_flips_the_requested_dim() -> Result<()> {
        let xs = Tensor::from_vec(vec![1f32, 2.0, 3.0, 4.0], (2, 2), &Device::Cpu)?;
        let out = reverse(&xs, 1)?.to_vec2::<f32>()?;
        assert_eq!(out, vec![vec![2.0, 1.0], vec![4.0, 3.0]]);
        Ok(())
    }

    #[test]
    fn test_config_validation() {
        let device = Device::Cpu;

        let mut config = NhitsConfig::new(24, 12);
        config.freq_downsamples = vec![4, 0, 1];
        assert!(Nhits::new(&config, &device).is_err());

        let mut config = NhitsConfig::new(24, 12);
        config.n_blocks = vec![1, 1];
        assert!(Nhits::new(&config, &device).is_err());

        let mut config = NhitsConfig::new(24, 12);
        config.stack_types = Vec::new();
        config.n_blocks = Vec::new();
        config.n_layers = Vec::new();
        config.hidden_sizes = Vec::new();
        config.pool_kernel_sizes = Vec::new();
        config.freq_downsamples = Vec::new();
        assert!(Nhits::new(&config, &device).is_err());
    }

    #[test]
    fn test_target_length_mismatch_is_rejected() -> Result<()> {
        let device = Device::Cpu;
        let model = Nhits::new(&small_config(), &device)?;
        let batch = Batch {
            target: Tensor::zeros((2, 30), DType::F32, &device)?,
            exogenous: None,
            statics: None,
            available_mask: Tensor::ones((2, 30), DType::F32, &device)?,
            sample_mask: Tensor::ones((2, 30), DType::F32, &device)?,
        };
        assert!(model.forward(&batch, false).is_err());
        Ok(())
    }

    fn small_config() -> NhitsConfig {
        let mut config = NhitsConfig::new(24, 12);
        config.stack_types = vec![StackType::Identity];
        config.n_blocks = vec![1];
        config.n_layers = vec![2];
        config.hidden_sizes = vec![vec![32, 32]];
        config.pool_kernel_sizes = vec![2];
        config.freq_downsamples = vec![2];
        config
    }
}
