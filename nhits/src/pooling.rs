use std::sync::Mutex;

use candle_core::{bail, Error, Result, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// How a block reduces input resolution before its projection network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolingMode {
    Max,
    Stochastic,
    Conv,
    None,
}

impl PoolingMode {
    pub fn from_name(name: &str) -> Result<Self> {
        Ok(match name {
            "max" => Self::Max,
            "stochastic" => Self::Stochastic,
            "conv" => Self::Conv,
            "none" => Self::None,
            _ => bail!("pooling mode '{name}' is not one of max, stochastic, conv, none"),
        })
    }
}

/// Non-overlapping 1-D max pooling over the last dimension of a
/// (batch, length) tensor.
///
/// `with_ceil` keeps a trailing partial window (padded with -inf), so the
/// output length is ceil(length / stride); the default drops it.
pub struct MaxPool1d {
    kernel_size: usize,
    stride: usize,
    ceil_mode: bool,
}

impl MaxPool1d {
    pub fn new(kernel_size: usize, stride: usize) -> Self {
        Self {
            kernel_size,
            stride,
            ceil_mode: false,
        }
    }

    pub fn with_ceil(kernel_size: usize, stride: usize) -> Self {
        Self {
            kernel_size,
            stride,
            ceil_mode: true,
        }
    }

    pub fn output_size(&self, len: usize) -> usize {
        if self.ceil_mode {
            len.div_ceil(self.stride)
        } else {
            (len - self.kernel_size) / self.stride + 1
        }
    }

    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (batch, len) = xs.dims2()?;
        let mut xs = xs.clone();
        let mut len = len;
        if self.ceil_mode && len % self.stride != 0 {
            let pad = self.stride - len % self.stride;
            let fill = Tensor::full(f32::NEG_INFINITY, (batch, pad), xs.device())?;
            xs = Tensor::cat(&[&xs, &fill], 1)?;
            len += pad;
        }
        let pooled = xs
            .reshape((batch, 1, 1, len))?
            .max_pool2d_with_stride((1, self.kernel_size), (1, self.stride))?;
        let width = pooled.dim(3)?;
        pooled.reshape((batch, width))
    }
}

/// Randomized downsampling: each non-overlapping window contributes one
/// element at a uniformly drawn position, independently per window and batch
/// element. A regularizer, not an aggregate like max or mean pooling.
///
/// Draws come from a per-layer generator seeded at construction, so runs are
/// reproducible for a fixed model seed.
pub struct StochasticPool1d {
    kernel_size: usize,
    rng: Mutex<StdRng>,
}

impl StochasticPool1d {
    pub fn new(kernel_size: usize, seed: u64) -> Self {
        Self {
            kernel_size,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn output_size(&self, len: usize) -> usize {
        len.div_ceil(self.kernel_size)
    }

    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (batch, len) = xs.dims2()?;
        let windows = len.div_ceil(self.kernel_size);

        let mut rng = self
            .rng
            .lock()
            .map_err(|_| Error::Msg("stochastic pool generator poisoned".to_string()))?;
        let mut idx = Vec::with_capacity(batch * windows);
        for _ in 0..batch {
            for w in 0..windows {
                let start = w * self.kernel_size;
                let width = self.kernel_size.min(len - start);
                idx.push((start + rng.gen_range(0..width)) as u32);
            }
        }
        drop(rng);

        let idx = Tensor::from_vec(idx, (batch, windows), xs.device())?;
        xs.gather(&idx, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_unknown_pooling_name_is_rejected() {
        assert!(PoolingMode::from_name("avg").is_err());
    }

    #[test]
    fn test_max_pool_values_and_ceil_length() -> Result<()> {
        let xs = Tensor::from_vec(vec![1f32, 3.0, 2.0, 8.0, 5.0], (1, 5), &Device::Cpu)?;
        let pool = MaxPool1d::with_ceil(2, 2);
        assert_eq!(pool.output_size(5), 3);
        let out = pool.forward(&xs)?.to_vec2::<f32>()?;
        // Trailing partial window keeps its own max.
        assert_eq!(out, vec![vec![3.0, 8.0, 5.0]]);
        Ok(())
    }

    #[test]
    fn test_max_pool_floor_drops_partial_window() -> Result<()> {
        let xs = Tensor::from_vec(vec![1f32, 3.0, 2.0, 8.0, 5.0], (1, 5), &Device::Cpu)?;
        let pool = MaxPool1d::new(2, 2);
        assert_eq!(pool.output_size(5), 2);
        let out = pool.forward(&xs)?.to_vec2::<f32>()?;
        assert_eq!(out, vec![vec![3.0, 8.0]]);
        Ok(())
    }

    #[test]
    fn test_stochastic_pool_picks_in_window_values() -> Result<()> {
        let xs = Tensor::from_vec(
            vec![0f32, 1.0, 10.0, 11.0, 20.0, 21.0, 30.0],
            (1, 7),
            &Device::Cpu,
        )?;
        let pool = StochasticPool1d::new(2, 99);
        let out = pool.forward(&xs)?.to_vec2::<f32>()?[0].clone();
        assert_eq!(out.len(), 4);
        let windows: [&[f32]; 4] = [&[0.0, 1.0], &[10.0, 11.0], &[20.0, 21.0], &[30.0]];
        for (w, value) in out.iter().enumerate() {
            assert!(windows[w].contains(value), "window {w} produced {value}");
        }
        Ok(())
    }

    #[test]
    fn test_stochastic_pool_is_seed_deterministic() -> Result<()> {
        let xs = Tensor::from_vec((0..12).map(|v| v as f32).collect(), (2, 6), &Device::Cpu)?;
        let a = StochasticPool1d::new(3, 7).forward(&xs)?.to_vec2::<f32>()?;
        let b = StochasticPool1d::new(3, 7).forward(&xs)?.to_vec2::<f32>()?;
        assert_eq!(a, b);
        Ok(())
    }
}
