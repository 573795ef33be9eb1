use candle_core::{bail, Result, Tensor};

use crate::activation::ActivationKind;
use crate::basis::IdentityBasis;
use crate::encoders::{DownSampleEncoder, LinearEncoder, StaticFeaturesEncoder, UpSampleEncoder};
use crate::init::ParamStore;
use crate::pooling::{MaxPool1d, PoolingMode, StochasticPool1d};

/// How consecutive hidden widths are bridged in the projection network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerMode {
    Linear,
    Conv,
}

impl LayerMode {
    pub fn from_name(name: &str) -> Result<Self> {
        Ok(match name {
            "linear" => Self::Linear,
            "conv" => Self::Conv,
            _ => bail!("layer mode '{name}' is not one of linear, conv"),
        })
    }
}

/// Shape of the final projection onto the coefficient vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayerMode {
    Linear,
    Conv,
    Max,
}

impl OutputLayerMode {
    pub fn from_name(name: &str) -> Result<Self> {
        Ok(match name {
            "linear" => Self::Linear,
            "conv" => Self::Conv,
            "max" => Self::Max,
            _ => bail!("output layer mode '{name}' is not one of linear, conv, max"),
        })
    }
}

/// Immutable hyperparameters of one block, fixed at construction.
#[derive(Debug, Clone)]
pub struct BlockConfig {
    pub input_size: usize,
    pub horizon: usize,
    pub n_exogenous: usize,
    pub n_static: usize,
    pub static_hidden_size: usize,
    pub n_theta: usize,
    pub n_layers: usize,
    pub hidden_sizes: Vec<usize>,
    pub pool_kernel_size: usize,
    pub pooling_mode: PoolingMode,
    pub layer_mode: LayerMode,
    pub output_mode: OutputLayerMode,
    pub batch_normalization: bool,
    pub dropout: f32,
    pub activation: ActivationKind,
}

impl BlockConfig {
    /// Insample length after pooling. Max/stochastic pooling keep a trailing
    /// partial window; conv pooling follows the strided-conv width formula.
    pub fn pooled_size(&self) -> usize {
        match self.pooling_mode {
            PoolingMode::Max | PoolingMode::Stochastic => {
                self.input_size.div_ceil(self.pool_kernel_size)
            }
            PoolingMode::Conv => (self.input_size - self.pool_kernel_size) / self.pool_kernel_size + 1,
            PoolingMode::None => self.input_size,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.input_size == 0 || self.horizon == 0 {
            bail!("input size and horizon must be positive");
        }
        if self.n_theta == 0 {
            bail!("the block must emit at least one coefficient");
        }
        if self.pool_kernel_size == 0 {
            bail!("pooling kernel size must be positive");
        }
        if self.pooling_mode == PoolingMode::Conv && self.pool_kernel_size > self.input_size {
            bail!(
                "conv pooling kernel {} exceeds the input window {}",
                self.pool_kernel_size,
                self.input_size
            );
        }
        if self.hidden_sizes.len() != self.n_layers {
            bail!(
                "expected {} hidden widths, got {}",
                self.n_layers,
                self.hidden_sizes.len()
            );
        }
        if self.hidden_sizes.iter().any(|&w| w == 0) {
            bail!("hidden layer widths must be positive");
        }
        if !(0.0..1.0).contains(&self.dropout) {
            bail!("dropout probability {} is outside [0, 1)", self.dropout);
        }
        Ok(())
    }
}

enum Pooling {
    Max(MaxPool1d),
    Stochastic(StochasticPool1d),
    Conv(DownSampleEncoder),
    None,
}

enum ProjectionLayer {
    Linear(LinearEncoder),
    Down(DownSampleEncoder),
    Up(UpSampleEncoder),
    MaxPool(MaxPool1d),
}

impl ProjectionLayer {
    fn forward(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        match self {
            Self::Linear(encoder) => encoder.forward(xs, train),
            Self::Down(encoder) => encoder.forward(xs, train),
            Self::Up(encoder) => encoder.forward(xs, train),
            Self::MaxPool(pool) => pool.forward(xs),
        }
    }
}

/// Kernel/stride for a width-reducing convolution, plus the width it
/// actually produces. A ratio of at least two pools whole strides (the
/// produced width may overshoot the target); otherwise a stride-one kernel
/// hits the target exactly.
fn downsample_geometry(w_in: usize, w_out: usize) -> Result<(usize, usize, usize)> {
    if w_out == 0 || w_in <= w_out {
        bail!("cannot downsample width {w_in} to {w_out}");
    }
    let ratio = w_in / w_out;
    if ratio >= 2 {
        let actual = (w_in - ratio) / ratio + 1;
        if actual == 0 {
            bail!("downsampling width {w_in} to {w_out} collapses to an empty signal");
        }
        Ok((ratio, ratio, actual))
    } else {
        Ok((w_in - w_out + 1, 1, w_out))
    }
}

/// Transposed counterpart of [`downsample_geometry`].
fn upsample_geometry(w_in: usize, w_out: usize) -> Result<(usize, usize, usize)> {
    if w_in == 0 || w_in >= w_out {
        bail!("cannot upsample width {w_in} to {w_out}");
    }
    let ratio = w_out / w_in;
    if ratio >= 2 {
        Ok((ratio, ratio, ratio * w_in))
    } else {
        Ok((w_out - w_in + 1, 1, w_out))
    }
}

/// One unit of a stack: pools its input, concatenates exogenous and static
/// features, projects through the hidden chain into coefficient space, and
/// expands the coefficients through the basis into (backcast, forecast).
pub struct Block {
    n_exogenous: usize,
    pooling: Pooling,
    static_encoder: Option<StaticFeaturesEncoder>,
    layers: Vec<ProjectionLayer>,
    basis: IdentityBasis,
}

impl Block {
    pub fn new(
        config: &BlockConfig,
        basis: IdentityBasis,
        name: &str,
        store: &mut ParamStore,
    ) -> Result<Self> {
        config.validate()?;
        if basis.n_theta() != config.n_theta {
            bail!(
                "basis consumes {} coefficients but the block is configured for {}",
                basis.n_theta(),
                config.n_theta
            );
        }

        // One activation instance per block; layers share it (and with it the
        // PReLU slope, when that is the chosen kind).
        let activ = config.activation.build(name, store)?;

        let kernel = config.pool_kernel_size;
        let pooling = match config.pooling_mode {
            PoolingMode::Max => Pooling::Max(MaxPool1d::with_ceil(kernel, kernel)),
            PoolingMode::Stochastic => {
                Pooling::Stochastic(StochasticPool1d::new(kernel, store.fork_seed()))
            }
            PoolingMode::Conv => Pooling::Conv(DownSampleEncoder::new(
                &format!("{name}.pool"),
                kernel,
                kernel,
                config.pooled_size(),
                None,
                store,
            )?),
            PoolingMode::None => Pooling::None,
        };

        let static_hidden = if config.n_static > 0 {
            config.static_hidden_size
        } else {
            0
        };
        let input_width = config.pooled_size()
            + (config.input_size + config.horizon) * config.n_exogenous
            + static_hidden;

        // Widths of the projection chain; conv bridging rewrites an entry
        // when the derived geometry cannot produce the configured width.
        let mut widths = Vec::with_capacity(config.n_layers + 1);
        widths.push(input_width);
        widths.extend_from_slice(&config.hidden_sizes);

        let mut layers = Vec::new();
        for i in 0..config.n_layers {
            let lname = format!("{name}.fc{i}");
            match config.layer_mode {
                LayerMode::Linear => {
                    layers.push(ProjectionLayer::Linear(LinearEncoder::new(
                        &lname,
                        widths[i],
                        widths[i + 1],
                        Some(activ.clone()),
                        config.batch_normalization,
                        config.dropout,
                        store,
                    )?));
                }
                LayerMode::Conv if widths[i] > widths[i + 1] => {
                    let (kernel, stride, actual) = downsample_geometry(widths[i], widths[i + 1])?;
                    widths[i + 1] = actual;
                    layers.push(ProjectionLayer::Down(DownSampleEncoder::new(
                        &lname,
                        kernel,
                        stride,
                        actual,
                        Some(activ.clone()),
                        store,
                    )?));
                }
                LayerMode::Conv if widths[i] < widths[i + 1] => {
                    let (kernel, stride, actual) = upsample_geometry(widths[i], widths[i + 1])?;
                    widths[i + 1] = actual;
                    layers.push(ProjectionLayer::Up(UpSampleEncoder::new(
                        &lname,
                        kernel,
                        stride,
                        actual,
                        Some(activ.clone()),
                        store,
                    )?));
                }
                // Equal widths in conv mode: nothing to bridge.
                LayerMode::Conv => {}
            }
        }

        let last = widths[config.n_layers];
        let n_theta = config.n_theta;
        match config.output_mode {
            OutputLayerMode::Linear => {
                layers.push(ProjectionLayer::Linear(LinearEncoder::new(
                    &format!("{name}.out"),
                    last,
                    n_theta,
                    None,
                    false,
                    0.0,
                    store,
                )?));
            }
            OutputLayerMode::Conv if last > n_theta => {
                let (kernel, stride, actual) = downsample_geometry(last, n_theta)?;
                if actual != n_theta {
                    // The conv overshoots; an activation-free linear finishes
                    // the exact mapping.
                    layers.push(ProjectionLayer::Down(DownSampleEncoder::new(
                        &format!("{name}.out0"),
                        kernel,
                        stride,
                        actual,
                        Some(activ.clone()),
                        store,
                    )?));
                    layers.push(ProjectionLayer::Linear(LinearEncoder::new(
                        &format!("{name}.out1"),
                        actual,
                        n_theta,
                        None,
                        false,
                        0.0,
                        store,
                    )?));
                } else {
                    layers.push(ProjectionLayer::Down(DownSampleEncoder::new(
                        &format!("{name}.out"),
                        kernel,
                        stride,
                        actual,
                        None,
                        store,
                    )?));
                }
            }
            OutputLayerMode::Conv if last < n_theta => {
                let (kernel, stride, actual) = upsample_geometry(last, n_theta)?;
                if actual != n_theta {
                    layers.push(ProjectionLayer::Up(UpSampleEncoder::new(
                        &format!("{name}.out0"),
                        kernel,
                        stride,
                        actual,
                        Some(activ.clone()),
                        store,
                    )?));
                    layers.push(ProjectionLayer::Linear(LinearEncoder::new(
                        &format!("{name}.out1"),
                        actual,
                        n_theta,
                        None,
                        false,
                        0.0,
                        store,
                    )?));
                } else {
                    layers.push(ProjectionLayer::Up(UpSampleEncoder::new(
                        &format!("{name}.out"),
                        kernel,
                        stride,
                        actual,
                        None,
                        store,
                    )?));
                }
            }
            OutputLayerMode::Conv => {
                layers.push(ProjectionLayer::Linear(LinearEncoder::new(
                    &format!("{name}.out"),
                    last,
                    n_theta,
                    None,
                    false,
                    0.0,
                    store,
                )?));
            }
            OutputLayerMode::Max if last > n_theta => {
                let (kernel, stride, actual) = downsample_geometry(last, n_theta)?;
                layers.push(ProjectionLayer::MaxPool(MaxPool1d::new(kernel, stride)));
                if actual != n_theta {
                    layers.push(ProjectionLayer::Linear(LinearEncoder::new(
                        &format!("{name}.out"),
                        actual,
                        n_theta,
                        None,
                        false,
                        0.0,
                        store,
                    )?));
                }
            }
            OutputLayerMode::Max => {
                layers.push(ProjectionLayer::Linear(LinearEncoder::new(
                    &format!("{name}.out"),
                    last,
                    n_theta,
                    None,
                    false,
                    0.0,
                    store,
                )?));
            }
        }

        let static_encoder = if config.n_static > 0 && config.static_hidden_size > 0 {
            Some(StaticFeaturesEncoder::new(
                &format!("{name}.static"),
                config.n_static,
                config.static_hidden_size,
                store,
            )?)
        } else {
            None
        };

        Ok(Self {
            n_exogenous: config.n_exogenous,
            pooling,
            static_encoder,
            layers,
            basis,
        })
    }

    /// Runs the block on a (batch, input window) residual signal. Exogenous
    /// tensors are expected flattened-ready, i.e. (batch, channels, window),
    /// with the insample one already time-reversed by the caller.
    pub fn forward(
        &self,
        insample_y: &Tensor,
        insample_x: Option<&Tensor>,
        outsample_x: Option<&Tensor>,
        statics: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let pooled = match &self.pooling {
            Pooling::Max(pool) => pool.forward(insample_y)?,
            Pooling::Stochastic(pool) => pool.forward(insample_y)?,
            Pooling::Conv(encoder) => encoder.forward(insample_y, train)?,
            Pooling::None => insample_y.clone(),
        };

        let mut features = pooled;
        if self.n_exogenous > 0 {
            let (Some(insample_x), Some(outsample_x)) = (insample_x, outsample_x) else {
                bail!("the block is configured for exogenous covariates but received none");
            };
            features = Tensor::cat(
                &[
                    &features,
                    &insample_x.flatten_from(1)?,
                    &outsample_x.flatten_from(1)?,
                ],
                1,
            )?;
        }
        if let Some(encoder) = &self.static_encoder {
            let Some(statics) = statics else {
                bail!("the block is configured for static covariates but received none");
            };
            features = Tensor::cat(&[&features, &encoder.forward(statics, train)?], 1)?;
        }

        let mut theta = features;
        for layer in &self.layers {
            theta = layer.forward(&theta, train)?;
        }

        self.basis.forward(&theta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downsample_geometry() {
        // Whole-stride pooling, exact landing.
        assert_eq!(downsample_geometry(64, 8).unwrap(), (8, 8, 8));
        // Whole-stride pooling that overshoots the target.
        assert_eq!(downsample_geometry(15, 4).unwrap(), (3, 3, 5));
        // Ratio below two: stride-one kernel, always exact.
        assert_eq!(downsample_geometry(52, 32).unwrap(), (21, 1, 32));
        assert!(downsample_geometry(8, 0).is_err());
        assert!(downsample_geometry(8, 8).is_err());
    }

    #[test]
    fn test_upsample_geometry() {
        assert_eq!(upsample_geometry(8, 16).unwrap(), (2, 2, 16));
        // Whole-stride expansion that undershoots the target.
        assert_eq!(upsample_geometry(7, 30).unwrap(), (4, 4, 28));
        assert_eq!(upsample_geometry(16, 30).unwrap(), (15, 1, 30));
        assert!(upsample_geometry(0, 8).is_err());
    }

    #[test]
    fn test_config_rejects_degenerate_widths() {
        let config = BlockConfig {
            input_size: 24,
            horizon: 12,
            n_exogenous: 0,
            n_static: 0,
            static_hidden_size: 0,
            n_theta: 30,
            n_layers: 2,
            hidden_sizes: vec![16, 0],
            pool_kernel_size: 2,
            pooling_mode: PoolingMode::Max,
            layer_mode: LayerMode::Linear,
            output_mode: OutputLayerMode::Linear,
            batch_normalization: false,
            dropout: 0.0,
            activation: ActivationKind::Relu,
        };
        assert!(config.validate().is_err());

        let mismatched = BlockConfig {
            hidden_sizes: vec![16],
            ..config
        };
        assert!(mismatched.validate().is_err());
    }
}
