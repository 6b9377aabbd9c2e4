use burn::config::Config;
use burn::module::Module;
use burn::tensor::{backend::Backend, Tensor};

use crate::modules::lstm::{LstmState, StackedLstm, StackedLstmConfig};

use super::grn::{ResidualConnection, ResidualConnectionConfig};

/// LSTM over the selected past variables, gated and added back onto its input.
/// Starts from a zero state and hands its final state to the [`LstmDecoder`].
#[derive(Module, Debug)]
pub struct LstmEncoder<B: Backend> {
    lstm: StackedLstm<B>,
    gate: ResidualConnection<B>,
}

impl<B: Backend> LstmEncoder<B> {
    /// `[batch, past_steps, d_model]` in, same shape out plus the final state
    /// `[num_layers, batch, d_model]`.
    pub fn forward(&self, x: Tensor<B, 3>) -> (Tensor<B, 3>, LstmState<B>) {
        let [batch_size, _, d_model] = x.dims();
        let zeros = LstmState::zeros(self.lstm.num_layers(), batch_size, d_model, &x.device());

        let (encoded, state) = self.lstm.forward(x.clone(), Some(zeros));

        (self.gate.forward(encoded, x), state)
    }
}

/// Same post-processing as the [`LstmEncoder`], seeded with the encoder state.
#[derive(Module, Debug)]
pub struct LstmDecoder<B: Backend> {
    lstm: StackedLstm<B>,
    gate: ResidualConnection<B>,
}

impl<B: Backend> LstmDecoder<B> {
    pub fn forward(&self, x: Tensor<B, 3>, state: LstmState<B>) -> Tensor<B, 3> {
        let (decoded, _) = self.lstm.forward(x.clone(), Some(state));

        self.gate.forward(decoded, x)
    }
}

#[derive(Config, Debug)]
pub struct LstmCoderConfig {
    d_model: usize,

    #[config(default = 1)]
    num_layers: usize,

    #[config(default = 0.0)]
    dropout: f64,
}

impl LstmCoderConfig {
    fn parts<B: Backend>(&self) -> (StackedLstm<B>, ResidualConnection<B>) {
        let lstm = StackedLstmConfig::new(self.d_model, self.d_model)
            .with_num_layers(self.num_layers)
            .init();
        let gate = ResidualConnectionConfig::new(self.d_model)
            .with_dropout(self.dropout)
            .init();

        (lstm, gate)
    }

    pub fn init_encoder<B: Backend>(&self) -> LstmEncoder<B> {
        let (lstm, gate) = self.parts();
        LstmEncoder { lstm, gate }
    }

    pub fn init_decoder<B: Backend>(&self) -> LstmDecoder<B> {
        let (lstm, gate) = self.parts();
        LstmDecoder { lstm, gate }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::float_tensor;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn sequence(shape: [usize; 3], phase: f32) -> Tensor<TestBackend, 3> {
        let len = shape.iter().product();
        let values = (0..len).map(|v| (v as f32 * 0.29 + phase).sin()).collect();
        float_tensor(values, shape, &Default::default())
    }

    fn values(t: Tensor<TestBackend, 3>) -> Vec<f32> {
        t.into_data().convert::<f32>().value
    }

    #[test]
    fn encoder_returns_state_per_layer() {
        let config = LstmCoderConfig::new(6).with_num_layers(3);
        let encoder: LstmEncoder<TestBackend> = config.init_encoder();

        let (output, state) = encoder.forward(sequence([2, 9, 6], 0.0));

        assert_eq!(output.dims(), [2, 9, 6]);
        assert_eq!(state.hidden.dims(), [3, 2, 6]);
        assert_eq!(state.cell.dims(), [3, 2, 6]);
    }

    #[test]
    fn decoder_starts_from_the_encoder_state() {
        let config = LstmCoderConfig::new(4).with_num_layers(2);
        let encoder: LstmEncoder<TestBackend> = config.init_encoder();
        let decoder: LstmDecoder<TestBackend> = config.init_decoder();

        let (_, state) = encoder.forward(sequence([2, 6, 4], 0.0));
        let handed_over = LstmState {
            hidden: Tensor::from_data(state.hidden.clone().into_data()),
            cell: Tensor::from_data(state.cell.clone().into_data()),
        };
        assert_eq!(values(handed_over.hidden.clone()), values(state.hidden.clone()));
        assert_eq!(values(handed_over.cell.clone()), values(state.cell.clone()));

        let future = sequence([2, 3, 4], 1.0);
        let from_encoder = values(decoder.forward(future.clone(), state));
        let from_copy = values(decoder.forward(future.clone(), handed_over));
        let from_zeros = values(decoder.forward(future, LstmState::zeros(2, 2, 4, &Default::default())));

        assert_eq!(from_encoder, from_copy);
        assert_ne!(from_encoder, from_zeros);
    }
}
