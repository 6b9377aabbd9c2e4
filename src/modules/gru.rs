use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::activation::sigmoid;
use burn::tensor::{backend::Backend, Tensor};

use crate::utils::split;

/// Single GRU layer with the reset gate applied to the projected hidden state.
#[derive(Module, Debug)]
pub struct GruLayer<B: Backend> {
    input_gates: Linear<B>,
    hidden_gates: Linear<B>,
    d_hidden: usize,
}

impl<B: Backend> GruLayer<B> {
    /// `[batch, seq, d_input]` from `[batch, d_hidden]` to `[batch, seq, d_hidden]`
    pub fn forward(&self, x: Tensor<B, 3>, hidden: Tensor<B, 2>) -> Tensor<B, 3> {
        let [batch, seq, _] = x.dims();
        let h = self.d_hidden;
        let input_gates = self.input_gates.forward(x);

        let mut hidden = hidden;
        let mut outputs = Vec::with_capacity(seq);
        for t in 0..seq {
            let gi = input_gates
                .clone()
                .slice([0..batch, t..t + 1, 0..3 * h])
                .squeeze::<2>(1);
            let mut gi = split(gi, &[h, h, h], 1);
            let mut gh = split(self.hidden_gates.forward(hidden.clone()), &[h, h, h], 1);

            let (input_new, hidden_new) = (gi.remove(2), gh.remove(2));
            let update = sigmoid(gi.remove(1) + gh.remove(1));
            let reset = sigmoid(gi.remove(0) + gh.remove(0));
            let candidate = (input_new + reset * hidden_new).tanh();

            hidden = candidate.clone() + update * (hidden - candidate);
            outputs.push(hidden.clone().unsqueeze_dim::<3>(1));
        }

        Tensor::cat(outputs, 1)
    }
}

// state: [num_layers, batch, d_hidden]
#[derive(Module, Debug)]
pub struct StackedGru<B: Backend> {
    layers: Vec<GruLayer<B>>,
    d_hidden: usize,
}

impl<B: Backend> StackedGru<B> {
    pub fn forward(&self, x: Tensor<B, 3>, state: Option<Tensor<B, 3>>) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let [batch_size, _, _] = x.dims();
        let state = state.unwrap_or_else(|| {
            Tensor::zeros_device([self.layers.len(), batch_size, self.d_hidden], &x.device())
        });

        let mut last = Vec::with_capacity(self.layers.len());
        let mut x = x;
        for (idx, layer) in self.layers.iter().enumerate() {
            let initial = state
                .clone()
                .slice([idx..idx + 1, 0..batch_size, 0..self.d_hidden])
                .squeeze(0);
            let hidden_states = layer.forward(x, initial);

            let [batch, seq, d_hidden] = hidden_states.dims();
            last.push(
                hidden_states
                    .clone()
                    .slice([0..batch, seq - 1..seq, 0..d_hidden])
                    .swap_dims(0, 1),
            );
            x = hidden_states;
        }

        (x, Tensor::cat(last, 0))
    }
}

#[derive(Config, Debug)]
pub struct StackedGruConfig {
    d_input: usize,
    d_hidden: usize,

    #[config(default = 1)]
    num_layers: usize,
}

impl StackedGruConfig {
    pub fn init<B: Backend>(&self) -> StackedGru<B> {
        assert!(self.num_layers > 0, "a GRU needs at least one layer");

        let layers = (0..self.num_layers)
            .map(|idx| {
                let d_input = if idx == 0 { self.d_input } else { self.d_hidden };
                GruLayer {
                    input_gates: LinearConfig::new(d_input, 3 * self.d_hidden).init(),
                    hidden_gates: LinearConfig::new(self.d_hidden, 3 * self.d_hidden).init(),
                    d_hidden: self.d_hidden,
                }
            })
            .collect();

        StackedGru {
            layers,
            d_hidden: self.d_hidden,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn values(x: Tensor<TestBackend, 3>) -> Vec<f32> {
        x.into_data().convert::<f32>().value
    }

    #[test]
    fn final_state_is_last_output_of_each_layer() {
        let gru: StackedGru<TestBackend> = StackedGruConfig::new(3, 4).with_num_layers(2).init();
        let x = Tensor::<TestBackend, 3>::ones([2, 5, 3]);

        let (output, state) = gru.forward(x, None);

        assert_eq!(output.dims(), [2, 5, 4]);
        assert_eq!(state.dims(), [2, 2, 4]);
        let top = state.slice([1..2, 0..2, 0..4]).swap_dims(0, 1);
        assert_eq!(values(output.slice([0..2, 4..5, 0..4])), values(top));
    }

    #[test]
    fn initial_state_is_carried_through_time() {
        let gru: StackedGru<TestBackend> = StackedGruConfig::new(2, 3).init();
        let x = Tensor::<TestBackend, 3>::zeros([1, 3, 2]);

        let (from_zeros, _) = gru.forward(x.clone(), None);
        let (from_ones, _) = gru.forward(x, Some(Tensor::ones([1, 1, 3])));

        let last = |y: Tensor<TestBackend, 3>| values(y.slice([0..1, 2..3, 0..3]));
        assert_ne!(last(from_zeros), last(from_ones));
    }
}
