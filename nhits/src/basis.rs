use candle_core::{bail, Device, Result, Tensor};

// Keys cubic convolution kernel coefficient, as used by bicubic resampling.
const CUBIC_A: f64 = -0.75;

/// Interpolation used to expand forecast knots to the full horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpolationMode {
    Nearest,
    Linear,
    /// Cubic interpolation, evaluated in row chunks of `batch_size` to bound
    /// peak memory.
    Cubic { batch_size: usize },
}

impl InterpolationMode {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "nearest" => return Ok(Self::Nearest),
            "linear" => return Ok(Self::Linear),
            _ => {}
        }
        if let Some(suffix) = name.strip_prefix("cubic-") {
            return match suffix.parse::<usize>() {
                Ok(batch_size) if batch_size > 0 => Ok(Self::Cubic { batch_size }),
                _ => bail!("cubic interpolation needs a positive sub-batch size, got '{name}'"),
            };
        }
        bail!("interpolation mode '{name}' is not one of nearest, linear, cubic-<batch>")
    }
}

/// Identity basis: the coefficient vector splits into a raw backcast segment
/// and a set of knots that are interpolated up to the forecast horizon.
///
/// Every mode is a fixed linear map from knots to horizon, so the expansion
/// is a matmul against a matrix precomputed at construction.
pub struct IdentityBasis {
    backcast_size: usize,
    knots_size: usize,
    mode: InterpolationMode,
    weights: Tensor,
}

impl IdentityBasis {
    pub fn new(
        backcast_size: usize,
        knots_size: usize,
        forecast_size: usize,
        mode: InterpolationMode,
        device: &Device,
    ) -> Result<Self> {
        if backcast_size == 0 || knots_size == 0 || forecast_size == 0 {
            bail!(
                "basis sizes must be positive, got backcast {backcast_size}, \
                 knots {knots_size}, forecast {forecast_size}"
            );
        }
        let weights = interpolation_matrix(knots_size, forecast_size, mode);
        let weights = Tensor::from_vec(weights, (knots_size, forecast_size), device)?;
        Ok(Self {
            backcast_size,
            knots_size,
            mode,
            weights,
        })
    }

    /// Coefficient count this basis consumes per forward call.
    pub fn n_theta(&self) -> usize {
        self.backcast_size + self.knots_size
    }

    pub fn forward(&self, theta: &Tensor) -> Result<(Tensor, Tensor)> {
        let backcast = theta.narrow(1, 0, self.backcast_size)?;
        let knots = theta.narrow(1, self.backcast_size, self.knots_size)?;

        let forecast = match self.mode {
            InterpolationMode::Cubic { batch_size } => {
                let rows = knots.dim(0)?;
                let mut parts = Vec::with_capacity(rows.div_ceil(batch_size));
                let mut start = 0;
                while start < rows {
                    let len = batch_size.min(rows - start);
                    parts.push(knots.narrow(0, start, len)?.matmul(&self.weights)?);
                    start += len;
                }
                Tensor::cat(&parts, 0)?
            }
            _ => knots.matmul(&self.weights)?,
        };

        Ok((backcast, forecast))
    }
}

// Source positions follow the half-pixel convention (align_corners = false):
// a target index j reads from (j + 0.5) * in/out - 0.5.
fn interpolation_matrix(in_size: usize, out_size: usize, mode: InterpolationMode) -> Vec<f32> {
    let mut weights = vec![0f32; in_size * out_size];
    let scale = in_size as f64 / out_size as f64;

    for j in 0..out_size {
        match mode {
            InterpolationMode::Nearest => {
                let src = ((j as f64 * scale) as usize).min(in_size - 1);
                weights[src * out_size + j] = 1.0;
            }
            InterpolationMode::Linear => {
                let real = ((j as f64 + 0.5) * scale - 0.5).max(0.0);
                let x0 = real.floor() as usize;
                let x1 = (x0 + 1).min(in_size - 1);
                let frac = (real - x0 as f64) as f32;
                weights[x0 * out_size + j] += 1.0 - frac;
                weights[x1 * out_size + j] += frac;
            }
            InterpolationMode::Cubic { .. } => {
                let real = (j as f64 + 0.5) * scale - 0.5;
                let base = real.floor();
                for (tap, coeff) in cubic_coeffs(real - base).into_iter().enumerate() {
                    let src =
                        (base as isize + tap as isize - 1).clamp(0, in_size as isize - 1) as usize;
                    weights[src * out_size + j] += coeff as f32;
                }
            }
        }
    }
    weights
}

fn cubic_coeffs(t: f64) -> [f64; 4] {
    let a = CUBIC_A;
    let c0 = ((a * (t + 1.0) - 5.0 * a) * (t + 1.0) + 8.0 * a) * (t + 1.0) - 4.0 * a;
    let c1 = ((a + 2.0) * t - (a + 3.0)) * t * t + 1.0;
    let u = 1.0 - t;
    let c2 = ((a + 2.0) * u - (a + 3.0)) * u * u + 1.0;
    [c0, c1, c2, 1.0 - c0 - c1 - c2]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn theta(backcast: &[f32], knots: &[f32], device: &Device) -> Result<Tensor> {
        let mut data = backcast.to_vec();
        data.extend_from_slice(knots);
        let len = data.len();
        Tensor::from_vec(data, (1, len), device)
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(
            InterpolationMode::from_name("nearest").unwrap(),
            InterpolationMode::Nearest
        );
        assert_eq!(
            InterpolationMode::from_name("cubic-512").unwrap(),
            InterpolationMode::Cubic { batch_size: 512 }
        );
        assert!(InterpolationMode::from_name("cubic").is_err());
        assert!(InterpolationMode::from_name("cubic-0").is_err());
        assert!(InterpolationMode::from_name("bilinear").is_err());
    }

    #[test]
    fn test_backcast_is_identity() -> Result<()> {
        let device = Device::Cpu;
        let basis = IdentityBasis::new(3, 2, 4, InterpolationMode::Nearest, &device)?;
        let theta = theta(&[7.0, 8.0, 9.0], &[1.0, 2.0], &device)?;
        let (backcast, forecast) = basis.forward(&theta)?;
        assert_eq!(backcast.to_vec2::<f32>()?, vec![vec![7.0, 8.0, 9.0]]);
        assert_eq!(forecast.dims(), &[1, 4]);
        Ok(())
    }

    #[test]
    fn test_nearest_with_full_knots_is_identity() -> Result<()> {
        let device = Device::Cpu;
        let basis = IdentityBasis::new(2, 4, 4, InterpolationMode::Nearest, &device)?;
        let theta = theta(&[0.0, 0.0], &[1.0, 2.0, 3.0, 4.0], &device)?;
        let (_, forecast) = basis.forward(&theta)?;
        assert_eq!(forecast.to_vec2::<f32>()?, vec![vec![1.0, 2.0, 3.0, 4.0]]);
        Ok(())
    }

    #[test]
    fn test_nearest_doubling_repeats_knots() -> Result<()> {
        let device = Device::Cpu;
        let basis = IdentityBasis::new(1, 2, 4, InterpolationMode::Nearest, &device)?;
        let theta = theta(&[0.0], &[5.0, 6.0], &device)?;
        let (_, forecast) = basis.forward(&theta)?;
        assert_eq!(forecast.to_vec2::<f32>()?, vec![vec![5.0, 5.0, 6.0, 6.0]]);
        Ok(())
    }

    #[test]
    fn test_linear_doubling_interpolates_half_pixel() -> Result<()> {
        let device = Device::Cpu;
        let basis = IdentityBasis::new(1, 2, 4, InterpolationMode::Linear, &device)?;
        let theta = theta(&[0.0], &[0.0, 1.0], &device)?;
        let (_, forecast) = basis.forward(&theta)?;
        let out = forecast.to_vec2::<f32>()?[0].clone();
        let expected = [0.0f32, 0.25, 0.75, 1.0];
        for (got, want) in out.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-6, "{out:?}");
        }
        Ok(())
    }

    #[test]
    fn test_cubic_preserves_constant_signals() -> Result<()> {
        let device = Device::Cpu;
        let basis = IdentityBasis::new(1, 5, 12, InterpolationMode::Cubic { batch_size: 4 }, &device)?;
        let theta = theta(&[0.0], &[3.0; 5], &device)?;
        let (_, forecast) = basis.forward(&theta)?;
        for value in forecast.to_vec2::<f32>()?[0].iter() {
            assert!((value - 3.0).abs() < 1e-5, "{value}");
        }
        Ok(())
    }

    #[test]
    fn test_cubic_sub_batching_does_not_change_results() -> Result<()> {
        let device = Device::Cpu;
        let knots: Vec<f32> = (0..6 * 9).map(|v| (v as f32 * 0.37).sin()).collect();
        let theta = Tensor::from_vec(knots, (9, 6), &device)?;
        let theta = Tensor::cat(&[&Tensor::zeros((9, 2), candle_core::DType::F32, &device)?, &theta], 1)?;

        let mut outputs = Vec::new();
        for batch_size in [1, 4, 9, 64] {
            let basis =
                IdentityBasis::new(2, 6, 24, InterpolationMode::Cubic { batch_size }, &device)?;
            outputs.push(basis.forward(&theta)?.1.to_vec2::<f32>()?);
        }
        for other in &outputs[1..] {
            assert_eq!(&outputs[0], other);
        }
        Ok(())
    }
}
