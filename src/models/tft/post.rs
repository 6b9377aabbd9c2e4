use burn::config::Config;
use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, LayerNorm, LayerNormConfig};
use burn::tensor::{backend::Backend, Tensor};

use super::glu::{GatedLinearUnit, GatedLinearUnitConfig};
use super::grn::{GatedResidualNetwork, GatedResidualNetworkConfig};

/// Final gating stack after attention. The second residual goes back to the tensor
/// that entered the attention block, not to the intermediate one.
#[derive(Module, Debug)]
pub struct PostTransformer<B: Backend> {
    dropout: Dropout,
    glu1: GatedLinearUnit<B>,
    norm1: LayerNorm<B>,
    grn: GatedResidualNetwork<B>,
    glu2: GatedLinearUnit<B>,
    norm2: LayerNorm<B>,
}

impl<B: Backend> PostTransformer<B> {
    pub fn forward(&self, x: Tensor<B, 3>, pre_transformer: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = self.dropout.forward(x);
        let x = self.norm1.forward(x.clone() + self.glu1.forward(x));
        let x = self.grn.forward(x);

        self.norm2.forward(pre_transformer + self.glu2.forward(x))
    }
}

#[derive(Config, Debug)]
pub struct PostTransformerConfig {
    d_model: usize,

    #[config(default = 0.0)]
    dropout: f64,
}

impl PostTransformerConfig {
    pub fn init<B: Backend>(&self) -> PostTransformer<B> {
        PostTransformer {
            dropout: DropoutConfig::new(self.dropout).init(),
            glu1: GatedLinearUnitConfig::new(self.d_model).init(),
            norm1: LayerNormConfig::new(self.d_model).init(),
            grn: GatedResidualNetworkConfig::new(self.d_model)
                .with_dropout(self.dropout)
                .init(),
            glu2: GatedLinearUnitConfig::new(self.d_model).init(),
            norm2: LayerNormConfig::new(self.d_model).init(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::float_tensor;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn output_depends_on_pre_transformer_input() {
        let device = Default::default();
        let post: PostTransformer<TestBackend> = PostTransformerConfig::new(4).init();
        let x = float_tensor::<TestBackend, 3>((0..24).map(|v| (v as f32).cos()).collect(), [2, 3, 4], &device);
        let pre_a = float_tensor::<TestBackend, 3>((0..24).map(|v| (v as f32).sin()).collect(), [2, 3, 4], &device);
        let pre_b = pre_a.clone() * -1.0;

        let out_a = post.forward(x.clone(), pre_a);
        let out_b = post.forward(x, pre_b);

        assert_eq!(out_a.dims(), [2, 3, 4]);
        let diff = (out_a - out_b).abs().sum().into_data().convert::<f32>().value[0];
        assert!(diff > 0.0);
    }
}
