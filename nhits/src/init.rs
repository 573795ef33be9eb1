use std::collections::HashMap;
use std::path::Path;

use candle_core::{bail, Device, Result, Tensor, Var};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Weight initialization schemes, selected by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initialization {
    Orthogonal,
    HeUniform,
    HeNormal,
    GlorotUniform,
    GlorotNormal,
    /// Siren scheme: U(±sqrt(6 / fan_in)), paired with the Sin activation.
    Sin,
    /// Placeholder: weights keep the engine default init.
    LecunNormal,
}

impl Initialization {
    pub fn from_name(name: &str) -> Result<Self> {
        Ok(match name {
            "orthogonal" => Self::Orthogonal,
            "he_uniform" => Self::HeUniform,
            "he_normal" => Self::HeNormal,
            "glorot_uniform" => Self::GlorotUniform,
            "glorot_normal" => Self::GlorotNormal,
            "Sin" => Self::Sin,
            "lecun_normal" => Self::LecunNormal,
            _ => bail!(
                "initialization '{name}' is not one of orthogonal, he_uniform, he_normal, \
                 glorot_uniform, glorot_normal, Sin, lecun_normal"
            ),
        })
    }
}

/// Kind of a weight-bearing module, fixed when the weight is created.
///
/// The configured scheme applies to linear weights only; convolution weights
/// always use He-uniform with a ReLU gain, whatever the scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightKind {
    Linear,
    Conv,
    ConvTranspose,
}

/// Owns every trainable variable of a model.
///
/// Layers receive tensor handles that share storage with the stored vars, so
/// gradients reach the optimizer through `all_vars` while save/load works
/// over the recorded names. All random draws come from one seeded generator,
/// making construction reproducible.
pub struct ParamStore {
    device: Device,
    scheme: Initialization,
    rng: StdRng,
    vars: Vec<(String, Var)>,
}

impl ParamStore {
    pub fn new(scheme: Initialization, seed: u64, device: &Device) -> Self {
        Self {
            device: device.clone(),
            scheme,
            rng: StdRng::seed_from_u64(seed),
            vars: Vec::new(),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Derives an independent seed, e.g. for stochastic pooling layers.
    pub fn fork_seed(&mut self) -> u64 {
        self.rng.gen()
    }

    pub fn all_vars(&self) -> Vec<Var> {
        self.vars.iter().map(|(_, var)| var.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Creates a weight tensor initialized for the given module kind under
    /// the configured scheme.
    pub fn weight(&mut self, name: &str, kind: WeightKind, shape: &[usize]) -> Result<Tensor> {
        let (fan_in, fan_out) = fan(kind, shape)?;
        let n = shape.iter().product();
        let data = match (kind, self.scheme) {
            (WeightKind::Linear, Initialization::Orthogonal) => {
                self.orthogonal(shape[0], shape[1])?
            }
            (WeightKind::Linear, Initialization::HeUniform) => {
                self.uniform(n, (6.0 / fan_in as f64).sqrt())
            }
            (WeightKind::Linear, Initialization::HeNormal) => {
                self.normal(n, (2.0 / fan_in as f64).sqrt())?
            }
            (WeightKind::Linear, Initialization::GlorotUniform) => {
                self.uniform(n, (6.0 / (fan_in + fan_out) as f64).sqrt())
            }
            (WeightKind::Linear, Initialization::GlorotNormal) => {
                self.normal(n, (2.0 / (fan_in + fan_out) as f64).sqrt())?
            }
            (WeightKind::Linear, Initialization::Sin) => {
                self.uniform(n, (6.0 / fan_in as f64).sqrt())
            }
            (WeightKind::Linear, Initialization::LecunNormal) => {
                self.uniform(n, 1.0 / (fan_in as f64).sqrt())
            }
            (WeightKind::Conv | WeightKind::ConvTranspose, _) => {
                self.uniform(n, (6.0 / fan_in as f64).sqrt())
            }
        };
        self.register(name, data, shape)
    }

    /// Creates a weight with the engine-default U(±1/sqrt(fan_in)) init,
    /// outside the configured scheme (static-feature encoder).
    pub fn default_weight(
        &mut self,
        name: &str,
        out_features: usize,
        in_features: usize,
    ) -> Result<Tensor> {
        let data = self.uniform(out_features * in_features, 1.0 / (in_features as f64).sqrt());
        self.register(name, data, &[out_features, in_features])
    }

    /// Bias init U(±1/sqrt(fan_in)), matching the engine default.
    pub fn bias(&mut self, name: &str, len: usize, fan_in: usize) -> Result<Tensor> {
        let data = self.uniform(len, 1.0 / (fan_in as f64).sqrt());
        self.register(name, data, &[len])
    }

    /// Trainable scalar (PReLU slope).
    pub fn scalar(&mut self, name: &str, value: f32) -> Result<Tensor> {
        let tensor = Tensor::new(value, &self.device)?;
        self.track(name, &tensor)
    }

    /// Trainable vector of ones (batch-norm scale).
    pub fn ones(&mut self, name: &str, len: usize) -> Result<Tensor> {
        self.register(name, vec![1f32; len], &[len])
    }

    /// Trainable vector of zeros (batch-norm shift).
    pub fn zeros(&mut self, name: &str, len: usize) -> Result<Tensor> {
        self.register(name, vec![0f32; len], &[len])
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let tensors: HashMap<String, Tensor> = self
            .vars
            .iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect();
        candle_core::safetensors::save(&tensors, path.as_ref())
    }

    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let tensors = candle_core::safetensors::load(path.as_ref(), &self.device)?;
        for (name, var) in &self.vars {
            match tensors.get(name) {
                Some(tensor) => var.set(tensor)?,
                None => bail!("checkpoint is missing tensor '{name}'"),
            }
        }
        Ok(())
    }

    fn register(&mut self, name: &str, data: Vec<f32>, shape: &[usize]) -> Result<Tensor> {
        let tensor = Tensor::from_vec(data, shape, &self.device)?;
        self.track(name, &tensor)
    }

    fn track(&mut self, name: &str, tensor: &Tensor) -> Result<Tensor> {
        if self.vars.iter().any(|(existing, _)| existing == name) {
            bail!("parameter '{name}' is already registered");
        }
        let var = Var::from_tensor(tensor)?;
        let handle = var.as_tensor().clone();
        self.vars.push((name.to_string(), var));
        Ok(handle)
    }

    fn uniform(&mut self, n: usize, bound: f64) -> Vec<f32> {
        (0..n)
            .map(|_| self.rng.gen_range(-bound..bound) as f32)
            .collect()
    }

    fn normal(&mut self, n: usize, std: f64) -> Result<Vec<f32>> {
        let dist = match Normal::new(0f64, std) {
            Ok(dist) => dist,
            Err(_) => bail!("invalid standard deviation {std} for normal init"),
        };
        Ok((0..n).map(|_| dist.sample(&mut self.rng) as f32).collect())
    }

    // QR factor (positive diagonal) of a Gaussian matrix, the classical
    // orthogonal init. For wide matrices the factorization runs on the
    // transpose so the rows come out orthonormal.
    fn orthogonal(&mut self, rows: usize, cols: usize) -> Result<Vec<f32>> {
        let transpose = rows < cols;
        let (r, c) = if transpose { (cols, rows) } else { (rows, cols) };

        let mut m = self.normal(r * c, 1.0)?;

        // Modified Gram-Schmidt over columns; r >= c keeps them independent.
        for j in 0..c {
            for k in 0..j {
                let dot: f32 = (0..r).map(|i| m[i * c + j] * m[i * c + k]).sum();
                for i in 0..r {
                    m[i * c + j] -= dot * m[i * c + k];
                }
            }
            let norm = (0..r)
                .map(|i| m[i * c + j] * m[i * c + j])
                .sum::<f32>()
                .sqrt();
            if norm < 1e-6 {
                bail!("orthogonal init drew a degenerate matrix");
            }
            for i in 0..r {
                m[i * c + j] /= norm;
            }
        }

        if !transpose {
            return Ok(m);
        }
        let mut t = vec![0f32; rows * cols];
        for i in 0..r {
            for j in 0..c {
                t[j * cols + i] = m[i * c + j];
            }
        }
        Ok(t)
    }
}

// Fan counts following the usual convention: dim 1 (times the receptive
// field for convolutions) feeds fan_in.
fn fan(kind: WeightKind, shape: &[usize]) -> Result<(usize, usize)> {
    match (kind, shape) {
        (WeightKind::Linear, [out, inp]) => Ok((*inp, *out)),
        (WeightKind::Conv, [out_c, in_c, k]) => Ok((in_c * k, out_c * k)),
        (WeightKind::ConvTranspose, [in_c, out_c, k]) => Ok((out_c * k, in_c * k)),
        _ => bail!("weight shape {shape:?} does not match its module kind"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_initialization_name_is_rejected() {
        assert!(Initialization::from_name("xavier").is_err());
        assert!(Initialization::from_name("He_Uniform").is_err());
    }

    #[test]
    fn test_orthogonal_rows_are_orthonormal() -> Result<()> {
        let mut store = ParamStore::new(Initialization::Orthogonal, 7, &Device::Cpu);
        // Wide matrix: rows must come out orthonormal.
        let (rows, cols) = (4, 9);
        let m = store.orthogonal(rows, cols)?;
        for a in 0..rows {
            for b in 0..rows {
                let dot: f32 = (0..cols).map(|j| m[a * cols + j] * m[b * cols + j]).sum();
                let want = if a == b { 1.0 } else { 0.0 };
                assert!((dot - want).abs() < 1e-4, "rows {a},{b}: {dot}");
            }
        }
        Ok(())
    }

    #[test]
    fn test_same_seed_reproduces_weights() -> Result<()> {
        let build = || -> Result<Vec<f32>> {
            let mut store = ParamStore::new(Initialization::HeNormal, 42, &Device::Cpu);
            store
                .weight("w", WeightKind::Linear, &[8, 16])?
                .flatten_all()?
                .to_vec1::<f32>()
        };
        assert_eq!(build()?, build()?);
        Ok(())
    }

    #[test]
    fn test_duplicate_parameter_name_is_rejected() {
        let mut store = ParamStore::new(Initialization::HeUniform, 1, &Device::Cpu);
        store.weight("w", WeightKind::Linear, &[2, 2]).unwrap();
        assert!(store.weight("w", WeightKind::Linear, &[2, 2]).is_err());
    }
}
