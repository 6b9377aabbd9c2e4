use burn::config::Config;
use burn::module::Module;
use burn::nn::{Lstm, LstmConfig};
use burn::tensor::{backend::Backend, Tensor};

/// Hidden and cell state of a [`StackedLstm`], both shaped `[num_layers, batch, d_hidden]`.
#[derive(Debug, Clone)]
pub struct LstmState<B: Backend> {
    pub hidden: Tensor<B, 3>,
    pub cell: Tensor<B, 3>,
}

impl<B: Backend> LstmState<B> {
    pub fn zeros(num_layers: usize, batch_size: usize, d_hidden: usize, device: &B::Device) -> Self {
        Self {
            hidden: Tensor::zeros_device([num_layers, batch_size, d_hidden], device),
            cell: Tensor::zeros_device([num_layers, batch_size, d_hidden], device),
        }
    }

    fn layer(&self, idx: usize) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let [_, batch, d_hidden] = self.hidden.dims();
        let cell = self
            .cell
            .clone()
            .slice([idx..idx + 1, 0..batch, 0..d_hidden])
            .squeeze(0);
        let hidden = self
            .hidden
            .clone()
            .slice([idx..idx + 1, 0..batch, 0..d_hidden])
            .squeeze(0);

        (cell, hidden)
    }
}

#[derive(Module, Debug)]
pub struct StackedLstm<B: Backend> {
    layers: Vec<Lstm<B>>,
    d_hidden: usize,
}

impl<B: Backend> StackedLstm<B> {
    /// Hidden states of the last layer and the final state of each layer.
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        state: Option<LstmState<B>>,
    ) -> (Tensor<B, 3>, LstmState<B>) {
        let [batch_size, _, _] = x.dims();
        let state = state.unwrap_or_else(|| {
            LstmState::zeros(self.layers.len(), batch_size, self.d_hidden, &x.device())
        });

        let mut last_cells = Vec::with_capacity(self.layers.len());
        let mut last_hiddens = Vec::with_capacity(self.layers.len());
        let mut x = x;

        for (idx, layer) in self.layers.iter().enumerate() {
            let (cell_states, hidden_states) = layer.forward(x, Some(state.layer(idx)));

            let [batch, seq, d_hidden] = hidden_states.dims();
            last_cells.push(cell_states.slice([0..batch, seq - 1..seq, 0..d_hidden]).swap_dims(0, 1));
            last_hiddens.push(
                hidden_states
                    .clone()
                    .slice([0..batch, seq - 1..seq, 0..d_hidden])
                    .swap_dims(0, 1),
            );

            x = hidden_states;
        }

        let state = LstmState {
            hidden: Tensor::cat(last_hiddens, 0),
            cell: Tensor::cat(last_cells, 0),
        };

        (x, state)
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}

#[derive(Config, Debug)]
pub struct StackedLstmConfig {
    d_input: usize,
    d_hidden: usize,

    #[config(default = 1)]
    num_layers: usize,
}

impl StackedLstmConfig {
    pub fn init<B: Backend>(&self) -> StackedLstm<B> {
        assert!(self.num_layers > 0, "an LSTM needs at least one layer");

        let layers = (0..self.num_layers)
            .map(|idx| {
                let d_input = if idx == 0 { self.d_input } else { self.d_hidden };
                LstmConfig::new(d_input, self.d_hidden, true).init()
            })
            .collect();

        StackedLstm {
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

    #[test]
    fn stacked_lstm_returns_state_per_layer() {
        let lstm: StackedLstm<TestBackend> = StackedLstmConfig::new(3, 6).with_num_layers(2).init();
        let x = Tensor::<TestBackend, 3>::ones([4, 5, 3]);

        let (output, state) = lstm.forward(x, None);

        assert_eq!(output.dims(), [4, 5, 6]);
        assert_eq!(state.hidden.dims(), [2, 4, 6]);
        assert_eq!(state.cell.dims(), [2, 4, 6]);
    }

    #[test]
    fn final_hidden_state_matches_last_output_step() {
        let lstm: StackedLstm<TestBackend> = StackedLstmConfig::new(2, 3).init();
        let x = Tensor::<TestBackend, 3>::ones([1, 4, 2]);

        let (output, state) = lstm.forward(x, None);

        let last = output.slice([0..1, 3..4, 0..3]).into_data().convert::<f32>().value;
        let hidden = state.hidden.into_data().convert::<f32>().value;
        assert_eq!(last, hidden);
    }
}
