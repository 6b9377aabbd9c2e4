use burn::config::Config;
use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::tensor::activation;
use burn::tensor::{backend::Backend, Tensor};

use crate::modules::activation::{Activation, ActivationConfig, ActivationKind};

use super::glu::{GatedLinearUnit, GatedLinearUnitConfig};

/// Gate, add and normalize: `norm(residual + GLU(dropout(x)))`.
///
/// `x` and `residual` may come from different sources, which lets callers whose
/// transform changed the input width supply their own projection as residual.
#[derive(Module, Debug)]
pub struct ResidualConnection<B: Backend> {
    dropout: Dropout,
    glu: GatedLinearUnit<B>,
    norm: LayerNorm<B>,
}

impl<B: Backend> ResidualConnection<B> {
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>, residual: Tensor<B, D>) -> Tensor<B, D> {
        let x = self.glu.forward(self.dropout.forward(x));
        self.norm.forward(residual + x)
    }
}

#[derive(Config, Debug)]
pub struct ResidualConnectionConfig {
    d_model: usize,

    #[config(default = 0.0)]
    dropout: f64,
}

impl ResidualConnectionConfig {
    pub fn init<B: Backend>(&self) -> ResidualConnection<B> {
        ResidualConnection {
            dropout: DropoutConfig::new(self.dropout).init(),
            glu: GatedLinearUnitConfig::new(self.d_model).init(),
            norm: LayerNormConfig::new(self.d_model).init(),
        }
    }
}

/// `norm(x + GLU(W2 ELU(W1 x)))`, dimension preserving.
#[derive(Module, Debug)]
pub struct GatedResidualNetwork<B: Backend> {
    mlp_input_linear: Linear<B>,
    mlp_elu: Activation,
    mlp_output_linear: Linear<B>,
    residual: ResidualConnection<B>,
}

impl<B: Backend> GatedResidualNetwork<B> {
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let eta = self.mlp_input_linear.forward(x.clone());
        let eta = self.mlp_elu.forward(eta);
        let eta = self.mlp_output_linear.forward(eta);

        self.residual.forward(eta, x)
    }
}

#[derive(Config, Debug)]
pub struct GatedResidualNetworkConfig {
    d_model: usize,

    #[config(default = 0.0)]
    dropout: f64,
}

impl GatedResidualNetworkConfig {
    pub fn init<B: Backend>(&self) -> GatedResidualNetwork<B> {
        assert!(self.d_model > 0, "d_model must be positive");

        GatedResidualNetwork {
            mlp_input_linear: LinearConfig::new(self.d_model, self.d_model).init(),
            mlp_elu: ActivationConfig::new().with_kind(ActivationKind::Elu).init(),
            mlp_output_linear: LinearConfig::new(self.d_model, self.d_model).init(),
            residual: ResidualConnectionConfig::new(self.d_model)
                .with_dropout(self.dropout)
                .init(),
        }
    }
}

/// Turns flattened variable embeddings `[.., num_vars * d_model]` into selection
/// weights `[.., num_vars]` that sum to one over the last axis.
#[derive(Module, Debug)]
pub struct FlattenGrn<B: Backend> {
    skip_proj: Linear<B>,
    skip_dropout: Dropout,
    mlp_input_linear: Linear<B>,
    mlp_elu: Activation,
    mlp_output_linear: Linear<B>,
    residual: ResidualConnection<B>,
}

impl<B: Backend> FlattenGrn<B> {
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let skip = self.skip_dropout.forward(self.skip_proj.forward(x.clone()));

        let eta = self.mlp_input_linear.forward(x);
        let eta = self.mlp_elu.forward(eta);
        let eta = self.mlp_output_linear.forward(eta);

        let logits = self.residual.forward(eta, skip);
        activation::softmax(logits, D - 1)
    }
}

#[derive(Config, Debug)]
pub struct FlattenGrnConfig {
    d_model: usize,
    num_vars: usize,

    #[config(default = 0.0)]
    dropout: f64,
}

impl FlattenGrnConfig {
    pub fn init<B: Backend>(&self) -> FlattenGrn<B> {
        assert!(self.num_vars > 0, "variable selection needs at least one variable");

        let d_flat = self.d_model * self.num_vars;
        let d_mid = (self.d_model + self.num_vars) / 2;

        FlattenGrn {
            skip_proj: LinearConfig::new(d_flat, self.num_vars)
                .with_bias(false)
                .init(),
            skip_dropout: DropoutConfig::new(self.dropout).init(),
            mlp_input_linear: LinearConfig::new(d_flat, d_mid).with_bias(false).init(),
            mlp_elu: ActivationConfig::new().with_kind(ActivationKind::Elu).init(),
            mlp_output_linear: LinearConfig::new(d_mid, self.num_vars)
                .with_bias(false)
                .init(),
            residual: ResidualConnectionConfig::new(self.num_vars)
                .with_dropout(self.dropout)
                .init(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::float_tensor;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn ramp(shape: [usize; 3]) -> Tensor<TestBackend, 3> {
        let len = shape.iter().product();
        let values = (0..len).map(|v| (v as f32 * 0.37).sin()).collect();
        float_tensor(values, shape, &Default::default())
    }

    #[test]
    fn grn_preserves_shape() {
        for d_model in [1, 2, 8] {
            let grn: GatedResidualNetwork<TestBackend> = GatedResidualNetworkConfig::new(d_model).init();

            assert_eq!(grn.forward(ramp([3, 5, d_model])).dims(), [3, 5, d_model]);
        }
    }

    #[test]
    fn residual_connection_normalizes_output() {
        let res: ResidualConnection<TestBackend> = ResidualConnectionConfig::new(6).init();

        let out = res.forward(ramp([2, 3, 6]), ramp([2, 3, 6]) * 2.0);

        let means = out.mean_dim(2).abs().into_data().convert::<f32>().value;
        assert!(means.iter().all(|m| *m < 1e-4));
    }

    #[test]
    fn flatten_grn_produces_normalized_weights() {
        let flat: FlattenGrn<TestBackend> = FlattenGrnConfig::new(4, 3).init();

        let weights = flat.forward(ramp([2, 5, 12]));

        assert_eq!(weights.dims(), [2, 5, 3]);
        let sums = weights.clone().sum_dim(2).into_data().convert::<f32>().value;
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-5));
        let min = weights.min().into_data().convert::<f32>().value[0];
        assert!(min >= 0.0);
    }
}
