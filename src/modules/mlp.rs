use burn::config::Config;
use burn::module::Module;
use burn::nn::{BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig};
use burn::tensor::{backend::Backend, Tensor};

use super::activation::{Activation, ActivationConfig, ActivationKind};

/// Linear layers with activation and dropout in between. The first `norms.len()`
/// hidden layers use batch norm instead of dropout.
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    layers: Vec<Linear<B>>,
    norms: Vec<BatchNorm<B, 1>>,
    activation: Activation,
    dropout: Dropout,
}

impl<B: Backend> Mlp<B> {
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let last = self.layers.len() - 1;

        self.layers
            .iter()
            .enumerate()
            .fold(x, |x, (idx, layer)| {
                let x = layer.forward(x);
                if idx == last {
                    return x;
                }
                let x = self.activation.forward(x);
                match self.norms.get(idx) {
                    Some(norm) => normalize_features(norm, x),
                    None => self.dropout.forward(x),
                }
            })
    }
}

// Batch norm over the last axis, every leading position counted as a sample.
fn normalize_features<B: Backend, const D: usize>(norm: &BatchNorm<B, 1>, x: Tensor<B, D>) -> Tensor<B, D> {
    let dims = x.dims();
    let features = dims[D - 1];
    let rows = dims.iter().product::<usize>() / features;

    norm.forward(x.reshape([rows, features, 1])).reshape(dims)
}

#[derive(Config, Debug)]
pub struct MlpConfig {
    /// Widths of every layer boundary, input first: `[d_in, d_1, ..., d_out]`.
    dims: Vec<usize>,

    #[config(default = "ActivationKind::Relu")]
    activation: ActivationKind,

    #[config(default = 0.0)]
    dropout: f64,

    #[config(default = 0)]
    batch_norm_layers: usize,
}

impl MlpConfig {
    pub fn init<B: Backend>(&self) -> Mlp<B> {
        assert!(self.dims.len() >= 2, "an MLP needs an input and an output width");
        assert!(
            self.dims.iter().all(|d| *d > 0),
            "MLP widths must be positive, got {:?}",
            self.dims
        );

        assert!(
            self.batch_norm_layers < self.dims.len() - 1,
            "only hidden layers can be batch normalized"
        );

        let layers = self
            .dims
            .windows(2)
            .map(|pair| LinearConfig::new(pair[0], pair[1]).init())
            .collect();
        let norms = self.dims[1..=self.batch_norm_layers]
            .iter()
            .map(|d| BatchNormConfig::new(*d).init())
            .collect();

        Mlp {
            layers,
            norms,
            activation: ActivationConfig::new()
                .with_kind(self.activation.clone())
                .init(),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn mlp_maps_last_dimension() {
        let mlp: Mlp<NdArray> = MlpConfig::new(vec![5, 4, 8, 2]).init();
        let x = Tensor::<NdArray, 3>::ones([2, 7, 5]);

        assert_eq!(mlp.forward(x).dims(), [2, 7, 2]);
    }

    #[test]
    fn batch_normalized_layers_keep_shapes() {
        let mlp: Mlp<NdArray> = MlpConfig::new(vec![5, 4, 8, 2])
            .with_batch_norm_layers(2)
            .init();
        let x = Tensor::<NdArray, 3>::ones([2, 7, 5]);

        let y = mlp.forward(x);

        assert_eq!(mlp.norms.len(), 2);
        assert_eq!(y.dims(), [2, 7, 2]);
        assert!(y.into_data().value.iter().all(|v| v.is_finite()));
    }

    #[test]
    #[should_panic]
    fn output_layer_cannot_be_batch_normalized() {
        let _: Mlp<NdArray> = MlpConfig::new(vec![5, 4, 1]).with_batch_norm_layers(2).init();
    }

    #[test]
    #[should_panic]
    fn mlp_rejects_zero_width() {
        let _: Mlp<NdArray> = MlpConfig::new(vec![5, 0, 1]).init();
    }
}
