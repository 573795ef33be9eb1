use candle_core::{Result, Tensor};

/// Loss contract the model binds to: (actual, predicted, outsample mask,
/// insample actual) -> scalar. The insample window is only consumed by
/// scale-normalized losses.
pub type LossFn = fn(&Tensor, &Tensor, &Tensor, &Tensor) -> Result<Tensor>;

/// Mean absolute error over masked positions.
pub fn masked_mae(
    y: &Tensor,
    y_hat: &Tensor,
    mask: &Tensor,
    _y_insample: &Tensor,
) -> Result<Tensor> {
    let errors = ((y - y_hat)?.abs()? * mask)?;
    errors.sum_all()? / count(mask)?
}

/// Mean squared error over masked positions.
pub fn masked_mse(
    y: &Tensor,
    y_hat: &Tensor,
    mask: &Tensor,
    _y_insample: &Tensor,
) -> Result<Tensor> {
    let errors = ((y - y_hat)?.sqr()? * mask)?;
    errors.sum_all()? / count(mask)?
}

fn count(mask: &Tensor) -> Result<f64> {
    let total = mask.sum_all()?.to_scalar::<f32>()? as f64;
    Ok(total.max(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_masked_positions_are_ignored() -> Result<()> {
        let device = Device::Cpu;
        let y = Tensor::from_vec(vec![1f32, 2.0, 3.0, 4.0], (1, 4), &device)?;
        let y_hat = Tensor::from_vec(vec![1f32, 2.0, 0.0, 0.0], (1, 4), &device)?;
        let mask = Tensor::from_vec(vec![1f32, 1.0, 0.0, 0.0], (1, 4), &device)?;

        let loss = masked_mae(&y, &y_hat, &mask, &y)?.to_scalar::<f32>()?;
        assert!(loss.abs() < 1e-6, "masked errors leaked into the loss: {loss}");

        let mse = masked_mse(&y, &y_hat, &mask, &y)?.to_scalar::<f32>()?;
        assert!(mse.abs() < 1e-6);
        Ok(())
    }
}
