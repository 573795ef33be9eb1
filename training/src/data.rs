use std::f64::consts::TAU;

use candle_core::{DType, Device, Result, Tensor};
use nhits::Batch;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Generates batches of noisy level + trend + seasonality series for demo
/// training runs. Real pipelines plug in through the same `Batch` contract.
pub struct SeriesGenerator {
    input_size: usize,
    horizon: usize,
    rng: StdRng,
}

impl SeriesGenerator {
    pub fn new(input_size: usize, horizon: usize, seed: u64) -> Self {
        Self {
            input_size,
            horizon,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn batch(&mut self, batch_size: usize, device: &Device) -> Result<Batch> {
        let total = self.input_size + self.horizon;
        let mut data = Vec::with_capacity(batch_size * total);
        for _ in 0..batch_size {
            let level = self.rng.gen_range(5.0..15.0);
            let trend = self.rng.gen_range(-0.02..0.02);
            let amplitude = self.rng.gen_range(0.5..3.0);
            let period = self.rng.gen_range(12.0..48.0);
            let phase = self.rng.gen_range(0.0..TAU);
            for t in 0..total {
                let seasonal = amplitude * (TAU * t as f64 / period + phase).sin();
                let noise = self.rng.gen_range(-0.1..0.1);
                data.push((level + trend * t as f64 + seasonal + noise) as f32);
            }
        }

        let ones = Tensor::ones((batch_size, total), DType::F32, device)?;
        Ok(Batch {
            target: Tensor::from_vec(data, (batch_size, total), device)?,
            exogenous: None,
            statics: None,
            available_mask: ones.clone(),
            sample_mask: ones,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batches_have_the_contracted_shape() -> Result<()> {
        let mut generator = SeriesGenerator::new(48, 12, 3);
        let batch = generator.batch(8, &Device::Cpu)?;
        assert_eq!(batch.target.dims(), &[8, 60]);
        assert_eq!(batch.available_mask.dims(), &[8, 60]);
        Ok(())
    }
}
