use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::activation;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// `sigmoid(W1 x) * (W2 x)`, dimension preserving.
#[derive(Module, Debug)]
pub struct GatedLinearUnit<B: Backend> {
    gate: Linear<B>,
    value: Linear<B>,
}

impl<B: Backend> GatedLinearUnit<B> {
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let gate = activation::sigmoid(self.gate.forward(x.clone()));
        let value = self.value.forward(x);

        gate * value
    }
}

#[derive(Config, Debug)]
pub struct GatedLinearUnitConfig {
    d_model: usize,

    #[config(default = false)]
    bias: bool,
}

impl GatedLinearUnitConfig {
    pub fn init<B: Backend>(&self) -> GatedLinearUnit<B> {
        GatedLinearUnit {
            gate: LinearConfig::new(self.d_model, self.d_model)
                .with_bias(self.bias)
                .init(),
            value: LinearConfig::new(self.d_model, self.d_model)
                .with_bias(self.bias)
                .init(),
        }
    }
}
