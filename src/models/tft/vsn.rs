use burn::config::Config;
use burn::module::Module;
use burn::tensor::{backend::Backend, Tensor};

use super::grn::{FlattenGrn, FlattenGrnConfig, GatedResidualNetwork, GatedResidualNetworkConfig};

/// Variable selection over stacked embeddings `[batch, seq, num_vars, d_model]`.
///
/// Every variable goes through its own GRN; a [`FlattenGrn`] over all variables yields
/// per-step selection weights and the output is the weighted mean over the variable
/// axis, `[batch, seq, d_model]`.
///
/// When `mix` is set, numeric embeddings are selected alongside the categorical ones.
/// The encoder uses it to mix in the past target; the decoder only does when future
/// numeric covariates exist.
#[derive(Module, Debug)]
pub struct VariableSelectionNetwork<B: Backend> {
    mix: bool,
    categorical_networks: Vec<GatedResidualNetwork<B>>,
    numeric_networks: Vec<GatedResidualNetwork<B>>,
    weight_network: FlattenGrn<B>,
}

impl<B: Backend> VariableSelectionNetwork<B> {
    pub fn forward(&self, categorical: Tensor<B, 4>, numeric: Option<Tensor<B, 4>>) -> Tensor<B, 3> {
        self.forward_with_weights(categorical, numeric).0
    }

    /// Also returns the selection weights `[batch, seq, num_vars]`, categorical
    /// variables first.
    pub fn forward_with_weights(
        &self,
        categorical: Tensor<B, 4>,
        numeric: Option<Tensor<B, 4>>,
    ) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let mut selected = apply_networks(&self.categorical_networks, categorical.clone());
        let mut to_be_flat = categorical;

        if let Some(numeric) = numeric {
            assert!(self.mix, "numeric variables given to a selection network built without mixing");
            selected = Tensor::cat(vec![selected, apply_networks(&self.numeric_networks, numeric.clone())], 2);
            to_be_flat = Tensor::cat(vec![to_be_flat, numeric], 2);
        }

        let [batch_size, seq_len, num_vars, d_model] = to_be_flat.dims();
        assert_eq!(
            num_vars,
            self.categorical_networks.len() + self.numeric_networks.len(),
            "selection network got an unexpected number of variables"
        );

        let flattened: Tensor<B, 3> = to_be_flat.reshape([batch_size, seq_len, num_vars * d_model]);
        let weights = self.weight_network.forward(flattened);

        let expanded: Tensor<B, 4> = weights.clone().unsqueeze_dim::<4>(3).repeat(3, d_model);
        let output = (selected * expanded).sum_dim(2) / num_vars as f32;

        (output.reshape([batch_size, seq_len, d_model]), weights)
    }
}

fn apply_networks<B: Backend>(networks: &[GatedResidualNetwork<B>], x: Tensor<B, 4>) -> Tensor<B, 4> {
    let [batch_size, seq_len, num_vars, d_model] = x.dims();
    assert_eq!(num_vars, networks.len(), "one GRN per variable is required");

    let transformed = networks
        .iter()
        .enumerate()
        .map(|(idx, grn)| {
            let var: Tensor<B, 3> = x
                .clone()
                .slice([0..batch_size, 0..seq_len, idx..idx + 1, 0..d_model])
                .reshape([batch_size, seq_len, d_model]);
            grn.forward(var)
        })
        .collect();

    Tensor::stack(transformed, 2)
}

#[derive(Config, Debug)]
pub struct VariableSelectionNetworkConfig {
    d_model: usize,
    num_categorical: usize,

    #[config(default = 0)]
    num_numeric: usize,

    #[config(default = false)]
    mix: bool,

    #[config(default = 0.0)]
    dropout: f64,
}

impl VariableSelectionNetworkConfig {
    pub fn init<B: Backend>(&self) -> VariableSelectionNetwork<B> {
        let grn = || {
            GatedResidualNetworkConfig::new(self.d_model)
                .with_dropout(self.dropout)
                .init()
        };

        let num_numeric = if self.mix { self.num_numeric } else { 0 };
        let num_vars = self.num_categorical + num_numeric;

        VariableSelectionNetwork {
            mix: self.mix,
            categorical_networks: (0..self.num_categorical).map(|_| grn()).collect(),
            numeric_networks: (0..num_numeric).map(|_| grn()).collect(),
            weight_network: FlattenGrnConfig::new(self.d_model, num_vars)
                .with_dropout(self.dropout)
                .init(),
        }
    }
}
