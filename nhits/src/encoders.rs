use candle_core::{DType, Result, Tensor};
use candle_nn::{
    BatchNorm, Conv1d, Conv1dConfig, ConvTranspose1d, ConvTranspose1dConfig, Dropout, Linear,
    Module, ModuleT,
};

use crate::activation::Activation;
use crate::init::{ParamStore, WeightKind};

const STATIC_DROPOUT: f32 = 0.5;
const BATCH_NORM_EPS: f64 = 1e-5;

fn batch_norm(name: &str, features: usize, store: &mut ParamStore) -> Result<BatchNorm> {
    let weight = store.ones(&format!("{name}.weight"), features)?;
    let bias = store.zeros(&format!("{name}.bias"), features)?;
    let running_mean = Tensor::zeros(features, DType::F32, store.device())?;
    let running_var = Tensor::ones(features, DType::F32, store.device())?;
    BatchNorm::new(features, running_mean, running_var, weight, bias, BATCH_NORM_EPS)
}

/// Encodes per-series static covariates before they join the block input:
/// dropout -> linear -> ReLU. Kept on the engine-default init; the configured
/// scheme only covers the projection chain.
pub struct StaticFeaturesEncoder {
    dropout: Dropout,
    linear: Linear,
}

impl StaticFeaturesEncoder {
    pub fn new(
        name: &str,
        in_features: usize,
        out_features: usize,
        store: &mut ParamStore,
    ) -> Result<Self> {
        let weight = store.default_weight(&format!("{name}.weight"), out_features, in_features)?;
        let bias = store.bias(&format!("{name}.bias"), out_features, in_features)?;
        Ok(Self {
            dropout: Dropout::new(STATIC_DROPOUT),
            linear: Linear::new(weight, Some(bias)),
        })
    }

    pub fn forward(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        self.dropout.forward(xs, train)?.apply(&self.linear)?.relu()
    }
}

/// Hidden-layer encoder: dropout -> linear -> batch-norm -> activation, with
/// every part but the linear optional.
pub struct LinearEncoder {
    dropout: Option<Dropout>,
    linear: Linear,
    norm: Option<BatchNorm>,
    activ: Option<Activation>,
}

impl LinearEncoder {
    pub fn new(
        name: &str,
        in_features: usize,
        out_features: usize,
        activ: Option<Activation>,
        batch_normalization: bool,
        dropout_prob: f32,
        store: &mut ParamStore,
    ) -> Result<Self> {
        let weight = store.weight(
            &format!("{name}.weight"),
            WeightKind::Linear,
            &[out_features, in_features],
        )?;
        let bias = store.bias(&format!("{name}.bias"), out_features, in_features)?;
        let norm = if batch_normalization {
            Some(batch_norm(&format!("{name}.norm"), out_features, store)?)
        } else {
            None
        };
        Ok(Self {
            dropout: (dropout_prob > 0.0).then(|| Dropout::new(dropout_prob)),
            linear: Linear::new(weight, Some(bias)),
            norm,
            activ,
        })
    }

    pub fn forward(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let mut xs = xs.clone();
        if let Some(dropout) = &self.dropout {
            xs = dropout.forward(&xs, train)?;
        }
        xs = xs.apply(&self.linear)?;
        if let Some(norm) = &self.norm {
            xs = norm.forward_t(&xs, train)?;
        }
        match &self.activ {
            Some(activ) => activ.forward(&xs),
            None => Ok(xs),
        }
    }
}

/// Strided 1-D convolution that reduces feature width. The kernel/stride
/// pair is derived by the caller from the width mismatch, never configured
/// directly. Batch-norm and activation apply together, and only when the
/// layer has an activation; as a pure width adapter it is a bare convolution.
pub struct DownSampleEncoder {
    conv: Conv1d,
    norm: Option<BatchNorm>,
    activ: Option<Activation>,
}

impl DownSampleEncoder {
    pub fn new(
        name: &str,
        kernel_size: usize,
        stride: usize,
        out_features: usize,
        activ: Option<Activation>,
        store: &mut ParamStore,
    ) -> Result<Self> {
        let weight = store.weight(
            &format!("{name}.weight"),
            WeightKind::Conv,
            &[1, 1, kernel_size],
        )?;
        let bias = store.bias(&format!("{name}.bias"), 1, kernel_size)?;
        let norm = match activ {
            Some(_) => Some(batch_norm(&format!("{name}.norm"), out_features, store)?),
            None => None,
        };
        Ok(Self {
            conv: Conv1d::new(
                weight,
                Some(bias),
                Conv1dConfig {
                    stride,
                    ..Default::default()
                },
            ),
            norm,
            activ,
        })
    }

    pub fn forward(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let xs = xs.unsqueeze(1)?.apply(&self.conv)?.squeeze(1)?;
        match (&self.norm, &self.activ) {
            (Some(norm), Some(activ)) => activ.forward(&norm.forward_t(&xs, train)?),
            _ => Ok(xs),
        }
    }
}

/// Transposed counterpart of [`DownSampleEncoder`]: expands feature width
/// through a strided 1-D transposed convolution.
pub struct UpSampleEncoder {
    conv: ConvTranspose1d,
    norm: Option<BatchNorm>,
    activ: Option<Activation>,
}

impl UpSampleEncoder {
    pub fn new(
        name: &str,
        kernel_size: usize,
        stride: usize,
        out_features: usize,
        activ: Option<Activation>,
        store: &mut ParamStore,
    ) -> Result<Self> {
        let weight = store.weight(
            &format!("{name}.weight"),
            WeightKind::ConvTranspose,
            &[1, 1, kernel_size],
        )?;
        let bias = store.bias(&format!("{name}.bias"), 1, kernel_size)?;
        let norm = match activ {
            Some(_) => Some(batch_norm(&format!("{name}.norm"), out_features, store)?),
            None => None,
        };
        Ok(Self {
            conv: ConvTranspose1d::new(
                weight,
                Some(bias),
                ConvTranspose1dConfig {
                    stride,
                    ..Default::default()
                },
            ),
            norm,
            activ,
        })
    }

    pub fn forward(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let xs = xs.unsqueeze(1)?.apply(&self.conv)?.squeeze(1)?;
        match (&self.norm, &self.activ) {
            (Some(norm), Some(activ)) => activ.forward(&norm.forward_t(&xs, train)?),
            _ => Ok(xs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init::Initialization;
    use candle_core::Device;

    #[test]
    fn test_down_sample_encoder_output_width() -> Result<()> {
        let mut store = ParamStore::new(Initialization::HeUniform, 3, &Device::Cpu);
        let encoder = DownSampleEncoder::new("down", 4, 4, 6, None, &mut store)?;
        let xs = Tensor::zeros((2, 24), DType::F32, &Device::Cpu)?;
        // floor((24 - 4) / 4) + 1 = 6
        assert_eq!(encoder.forward(&xs, false)?.dims(), &[2, 6]);
        Ok(())
    }

    #[test]
    fn test_up_sample_encoder_output_width() -> Result<()> {
        let mut store = ParamStore::new(Initialization::HeUniform, 3, &Device::Cpu);
        let encoder = UpSampleEncoder::new("up", 3, 3, 18, None, &mut store)?;
        let xs = Tensor::zeros((2, 6), DType::F32, &Device::Cpu)?;
        // (6 - 1) * 3 + 3 = 18
        assert_eq!(encoder.forward(&xs, false)?.dims(), &[2, 18]);
        Ok(())
    }

    #[test]
    fn test_static_encoder_is_inactive_at_eval() -> Result<()> {
        let mut store = ParamStore::new(Initialization::HeUniform, 3, &Device::Cpu);
        let encoder = StaticFeaturesEncoder::new("static", 4, 8, &mut store)?;
        let xs = Tensor::ones((3, 4), DType::F32, &Device::Cpu)?;
        let a = encoder.forward(&xs, false)?.to_vec2::<f32>()?;
        let b = encoder.forward(&xs, false)?.to_vec2::<f32>()?;
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
        assert_eq!(a[0].len(), 8);
        Ok(())
    }
}
