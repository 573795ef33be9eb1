use candle_core::{bail, Result, Tensor};
use candle_nn::Module;

use crate::init::ParamStore;

/// Frequency scale for the periodic activation in block hidden layers.
pub const SINE_W0: f64 = 30.0;

const LEAKY_RELU_SLOPE: f64 = 0.01;

// SELU constants (Klambauer et al., 2017).
const SELU_ALPHA: f64 = 1.6732632423543772;
const SELU_SCALE: f64 = 1.0507009873554805;

/// Nonlinearities available to block hidden layers, selected by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationKind {
    Relu,
    Softplus,
    Tanh,
    Selu,
    LeakyRelu,
    PRelu,
    Sigmoid,
    Sin,
}

impl ActivationKind {
    pub fn from_name(name: &str) -> Result<Self> {
        Ok(match name {
            "ReLU" => Self::Relu,
            "Softplus" => Self::Softplus,
            "Tanh" => Self::Tanh,
            "SELU" => Self::Selu,
            "LeakyReLU" => Self::LeakyRelu,
            "PReLU" => Self::PRelu,
            "Sigmoid" => Self::Sigmoid,
            "Sin" => Self::Sin,
            _ => bail!(
                "activation '{name}' is not one of \
                 ReLU, Softplus, Tanh, SELU, LeakyReLU, PReLU, Sigmoid, Sin"
            ),
        })
    }

    /// Builds the activation, registering its parameters (PReLU slope) under
    /// the given name. One instance is built per block and shared by all of
    /// the block's layers.
    pub(crate) fn build(self, name: &str, store: &mut ParamStore) -> Result<Activation> {
        Ok(match self {
            Self::Relu => Activation::Relu,
            Self::Softplus => Activation::Softplus,
            Self::Tanh => Activation::Tanh,
            Self::Selu => Activation::Selu,
            Self::LeakyRelu => Activation::LeakyRelu,
            Self::PRelu => {
                let slope = store.scalar(&format!("{name}.prelu"), 0.25)?;
                Activation::PRelu(candle_nn::PReLU::new(slope, true))
            }
            Self::Sigmoid => Activation::Sigmoid,
            Self::Sin => Activation::Sine(Sine::new(SINE_W0)),
        })
    }
}

/// Periodic activation `sin(w0 * x)`.
#[derive(Debug, Clone)]
pub struct Sine {
    w0: f64,
}

impl Sine {
    pub fn new(w0: f64) -> Self {
        Self { w0 }
    }
}

impl Module for Sine {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        (xs * self.w0)?.sin()
    }
}

/// A built activation function. Stateless except for the PReLU slope, which
/// is a trainable scalar shared wherever the instance is cloned.
#[derive(Clone)]
pub enum Activation {
    Relu,
    Softplus,
    Tanh,
    Selu,
    LeakyRelu,
    PRelu(candle_nn::PReLU),
    Sigmoid,
    Sine(Sine),
}

impl Module for Activation {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            Self::Relu => xs.relu(),
            Self::Softplus => softplus(xs),
            Self::Tanh => xs.tanh(),
            Self::Selu => xs.elu(SELU_ALPHA)? * SELU_SCALE,
            Self::LeakyRelu => candle_nn::ops::leaky_relu(xs, LEAKY_RELU_SLOPE),
            Self::PRelu(prelu) => prelu.forward(xs),
            Self::Sigmoid => candle_nn::ops::sigmoid(xs),
            Self::Sine(sine) => sine.forward(xs),
        }
    }
}

// Overflow-safe form: softplus(x) = relu(x) + ln(1 + exp(-|x|)).
fn softplus(xs: &Tensor) -> Result<Tensor> {
    let linear_part = xs.relu()?;
    let decay = (xs.abs()?.neg()?.exp()? + 1.0)?.log()?;
    linear_part + decay
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_unknown_activation_name_is_rejected() {
        assert!(ActivationKind::from_name("GELU").is_err());
        assert!(ActivationKind::from_name("relu").is_err());
    }

    #[test]
    fn test_sine_applies_frequency_scale() -> Result<()> {
        let xs = Tensor::from_vec(vec![0.0f32, 0.1, -0.1], 3, &Device::Cpu)?;
        let out = Sine::new(30.0).forward(&xs)?.to_vec1::<f32>()?;
        let expected = [0.0f32, 3.0f32.sin(), (-3.0f32).sin()];
        for (got, want) in out.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-6, "{got} vs {want}");
        }
        Ok(())
    }

    #[test]
    fn test_softplus_matches_reference_values() -> Result<()> {
        let xs = Tensor::from_vec(vec![-20.0f32, 0.0, 1.0, 20.0], 4, &Device::Cpu)?;
        let out = softplus(&xs)?.to_vec1::<f32>()?;
        // softplus(0) = ln 2; large inputs approach identity.
        assert!(out[0] >= 0.0 && out[0] < 1e-6);
        assert!((out[1] - 2.0f32.ln()).abs() < 1e-6);
        assert!((out[2] - 1.3132617f32).abs() < 1e-5);
        assert!((out[3] - 20.0).abs() < 1e-5);
        Ok(())
    }
}
