//! RMSprop for candle variables.
use candle_core::backprop::GradStore;
use candle_core::{Result, Var};
use candle_nn::Optimizer;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamsRmsProp {
    pub lr: f64,
    /// Smoothing constant of the squared-gradient average.
    pub alpha: f64,
    pub eps: f64,
    /// L2 penalty added to the gradient.
    pub weight_decay: f64,
}

impl Default for ParamsRmsProp {
    fn default() -> Self {
        Self {
            lr: 0.01,
            alpha: 0.99,
            eps: 1e-8,
            weight_decay: 0.0,
        }
    }
}

#[derive(Debug)]
struct VarRmsProp {
    var: Var,
    square_avg: Var,
}

#[derive(Debug)]
pub struct RmsProp {
    vars: Vec<VarRmsProp>,
    params: ParamsRmsProp,
}

impl Optimizer for RmsProp {
    type Config = ParamsRmsProp;

    fn new(vars: Vec<Var>, params: ParamsRmsProp) -> Result<Self> {
        let vars = vars
            .into_iter()
            .filter(|var| var.dtype().is_float())
            .map(|var| {
                let square_avg = Var::zeros(var.shape(), var.dtype(), var.device())?;
                Ok(VarRmsProp { var, square_avg })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { vars, params })
    }

    fn learning_rate(&self) -> f64 {
        self.params.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.params.lr = lr
    }

    fn step(&mut self, grads: &GradStore) -> Result<()> {
        let ParamsRmsProp {
            lr,
            alpha,
            eps,
            weight_decay,
        } = self.params;
        for v in self.vars.iter() {
            let theta = &v.var;
            if let Some(g) = grads.get(theta) {
                let g = if weight_decay != 0.0 {
                    g.add(&theta.as_tensor().affine(weight_decay, 0.0)?)?
                } else {
                    g.clone()
                };
                let square_avg = v
                    .square_avg
                    .as_tensor()
                    .affine(alpha, 0.0)?
                    .add(&g.sqr()?.affine(1.0 - alpha, 0.0)?)?;
                let denom = square_avg.sqrt()?.affine(1.0, eps)?;
                let update = g.div(&denom)?.affine(lr, 0.0)?;
                theta.set(&theta.as_tensor().sub(&update)?)?;
                v.square_avg.set(&square_avg)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn rmsprop_moves_against_gradient() -> Result<()> {
        let w = Var::new(&[1.0f64, -2.0], &Device::Cpu)?;
        let mut opt = RmsProp::new(
            vec![w.clone()],
            ParamsRmsProp {
                lr: 0.1,
                ..Default::default()
            },
        )?;
        // loss = sum(w^2), gradient 2w
        let loss = w.as_tensor().sqr()?.sum_all()?;
        opt.backward_step(&loss)?;
        let after = w.as_tensor().to_vec1::<f64>()?;
        assert!(after[0] < 1.0);
        assert!(after[1] > -2.0);
        Ok(())
    }
}
