//! SwitchTab network.
//!
//! An encoder maps a row to a latent vector that two projectors split into
//! a *salient* part (sample specific) and a *mutual* part (shared across
//! samples). The decoder reconstructs a row from `[mutual, salient]`;
//! swapping the mutual parts of two rows must still reconstruct each row
//! from its own salient part. The predictor works on the salient part only.
use candle_core::{DType, Device, Module, Result, Tensor, Var};
use candle_nn::{Linear, VarBuilder, VarMap};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwitchTabConfig {
    pub feature_size: usize,
    pub num_classes: usize,
    pub hidden_dim: usize,
    /// Weight of the supervised term in the training loss.
    pub alpha: f64,
}

/// Outputs of a paired forward pass.
pub struct SwitchOutput {
    pub x1_recon: Tensor,
    pub x2_recon: Tensor,
    pub x1_switched: Tensor,
    pub x2_switched: Tensor,
    pub x1_pred: Tensor,
    pub x2_pred: Tensor,
}

pub struct SwitchTab {
    encoder_in: Linear,
    encoder_out: Linear,
    projector_s: Linear,
    projector_m: Linear,
    decoder: Linear,
    predictor: Linear,
    alpha: f64,
}

/// (name, in_features, out_features) of every linear layer.
fn layer_shapes(config: &SwitchTabConfig) -> Vec<(&'static str, usize, usize)> {
    let d = config.feature_size;
    vec![
        ("encoder.0", d, config.hidden_dim),
        ("encoder.2", config.hidden_dim, d),
        ("projector_s", d, d),
        ("projector_m", d, d),
        ("decoder", 2 * d, d),
        ("predictor", d, config.num_classes),
    ]
}

/// Populate `var_map` with uniformly initialised weights drawn from `seed`,
/// bound `1 / sqrt(fan_in)` for weights and biases.
pub fn create_var_map(var_map: &VarMap, config: &SwitchTabConfig, seed: u64, device: &Device) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut ws = var_map
        .data()
        .lock()
        .map_err(|_| candle_core::Error::Msg("var map lock poisoned".into()))?;

    for (name, fan_in, fan_out) in layer_shapes(config) {
        let bound = 1.0 / (fan_in.max(1) as f64).sqrt();
        let weight: Vec<f64> = (0..fan_in * fan_out)
            .map(|_| rng.gen_range(-bound..=bound))
            .collect();
        let bias: Vec<f64> = (0..fan_out).map(|_| rng.gen_range(-bound..=bound)).collect();
        ws.insert(
            format!("{}.weight", name),
            Var::from_tensor(&Tensor::from_vec(weight, (fan_out, fan_in), device)?)?,
        );
        ws.insert(
            format!("{}.bias", name),
            Var::from_tensor(&Tensor::from_vec(bias, fan_out, device)?)?,
        );
    }
    Ok(())
}

impl SwitchTab {
    /// Build the network on top of variables already present in `var_map`.
    pub fn from_var_map(var_map: &VarMap, config: &SwitchTabConfig, device: &Device) -> Result<Self> {
        let vb = VarBuilder::from_varmap(var_map, DType::F64, device);
        let shapes = layer_shapes(config);
        let mut layers = Vec::with_capacity(shapes.len());
        for (name, fan_in, fan_out) in shapes {
            let weight = vb.get((fan_out, fan_in), &format!("{}.weight", name))?;
            let bias = vb.get(fan_out, &format!("{}.bias", name))?;
            layers.push(Linear::new(weight, Some(bias)));
        }
        let mut layers = layers.into_iter();
        let mut next = || {
            layers
                .next()
                .ok_or_else(|| candle_core::Error::Msg("missing SwitchTab layer".into()))
        };
        Ok(SwitchTab {
            encoder_in: next()?,
            encoder_out: next()?,
            projector_s: next()?,
            projector_m: next()?,
            decoder: next()?,
            predictor: next()?,
            alpha: config.alpha,
        })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    fn encode(&self, x: &Tensor) -> Result<(Tensor, Tensor)> {
        let h = self.encoder_in.forward(x)?.relu()?;
        let z = self.encoder_out.forward(&h)?;
        let salient = self.projector_s.forward(&z)?;
        let mutual = self.projector_m.forward(&z)?;
        Ok((salient, mutual))
    }

    fn decode(&self, mutual: &Tensor, salient: &Tensor) -> Result<Tensor> {
        self.decoder.forward(&Tensor::cat(&[mutual, salient], 1)?)
    }

    pub fn forward_pair(&self, x1: &Tensor, x2: &Tensor) -> Result<SwitchOutput> {
        let (s1, m1) = self.encode(x1)?;
        let (s2, m2) = self.encode(x2)?;
        Ok(SwitchOutput {
            x1_recon: self.decode(&m1, &s1)?,
            x2_recon: self.decode(&m2, &s2)?,
            x1_switched: self.decode(&m2, &s1)?,
            x2_switched: self.decode(&m1, &s2)?,
            x1_pred: self.predictor.forward(&s1)?,
            x2_pred: self.predictor.forward(&s2)?,
        })
    }

    /// Prediction head output for a batch, `(b, num_classes)`.
    pub fn predict(&self, x: &Tensor) -> Result<Tensor> {
        let (salient, _) = self.encode(x)?;
        self.predictor.forward(&salient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SwitchTabConfig {
        SwitchTabConfig {
            feature_size: 4,
            num_classes: 3,
            hidden_dim: 8,
            alpha: 1.0,
        }
    }

    #[test]
    fn seeded_init_is_reproducible() -> Result<()> {
        let device = Device::Cpu;
        let a = VarMap::new();
        let b = VarMap::new();
        create_var_map(&a, &config(), 7, &device)?;
        create_var_map(&b, &config(), 7, &device)?;
        let x = Tensor::ones((2, 4), DType::F64, &device)?;
        let pa = SwitchTab::from_var_map(&a, &config(), &device)?.predict(&x)?;
        let pb = SwitchTab::from_var_map(&b, &config(), &device)?.predict(&x)?;
        assert_eq!(pa.to_vec2::<f64>()?, pb.to_vec2::<f64>()?);
        assert_eq!(pa.dims(), &[2, 3]);
        Ok(())
    }

    #[test]
    fn paired_outputs_have_input_width() -> Result<()> {
        let device = Device::Cpu;
        let vm = VarMap::new();
        create_var_map(&vm, &config(), 0, &device)?;
        let net = SwitchTab::from_var_map(&vm, &config(), &device)?;
        let x = Tensor::zeros((5, 4), DType::F64, &device)?;
        let out = net.forward_pair(&x, &x)?;
        assert_eq!(out.x1_switched.dims(), &[5, 4]);
        assert_eq!(out.x2_pred.dims(), &[5, 3]);
        Ok(())
    }
}
