use burn::config::Config;
use burn::module::Module;
use burn::tensor::{backend::Backend, Tensor};

use super::gru::{StackedGru, StackedGruConfig};
use super::lstm::{LstmState, StackedLstm, StackedLstmConfig};

#[derive(Config, Debug, PartialEq, Eq)]
pub enum RecurrentKind {
    Lstm,
    Gru,
}

#[derive(Debug, Clone)]
pub enum RecurrentState<B: Backend> {
    Lstm(LstmState<B>),
    Gru(Tensor<B, 3>),
}

/// LSTM or GRU stack picked by configuration. Exactly one of the two is set.
#[derive(Module, Debug)]
pub struct Recurrent<B: Backend> {
    lstm: Option<StackedLstm<B>>,
    gru: Option<StackedGru<B>>,
}

impl<B: Backend> Recurrent<B> {
    /// A state must come from a network of the same kind.
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        state: Option<RecurrentState<B>>,
    ) -> (Tensor<B, 3>, RecurrentState<B>) {
        match (&self.lstm, &self.gru) {
            (Some(lstm), _) => {
                let state = state.map(|state| match state {
                    RecurrentState::Lstm(state) => state,
                    RecurrentState::Gru(_) => panic!("GRU state handed to an LSTM"),
                });
                let (output, state) = lstm.forward(x, state);
                (output, RecurrentState::Lstm(state))
            }
            (None, Some(gru)) => {
                let state = state.map(|state| match state {
                    RecurrentState::Gru(state) => state,
                    RecurrentState::Lstm(_) => panic!("LSTM state handed to a GRU"),
                });
                let (output, state) = gru.forward(x, state);
                (output, RecurrentState::Gru(state))
            }
            (None, None) => unreachable!("recurrent network without layers"),
        }
    }

    pub fn kind(&self) -> RecurrentKind {
        if self.lstm.is_some() {
            RecurrentKind::Lstm
        } else {
            RecurrentKind::Gru
        }
    }
}

#[derive(Config, Debug)]
pub struct RecurrentConfig {
    d_input: usize,
    d_hidden: usize,

    #[config(default = 1)]
    num_layers: usize,

    #[config(default = "RecurrentKind::Lstm")]
    kind: RecurrentKind,
}

impl RecurrentConfig {
    pub fn init<B: Backend>(&self) -> Recurrent<B> {
        match self.kind {
            RecurrentKind::Lstm => Recurrent {
                lstm: Some(
                    StackedLstmConfig::new(self.d_input, self.d_hidden)
                        .with_num_layers(self.num_layers)
                        .init(),
                ),
                gru: None,
            },
            RecurrentKind::Gru => Recurrent {
                lstm: None,
                gru: Some(
                    StackedGruConfig::new(self.d_input, self.d_hidden)
                        .with_num_layers(self.num_layers)
                        .init(),
                ),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn state_follows_the_configured_kind() {
        for kind in [RecurrentKind::Lstm, RecurrentKind::Gru] {
            let rnn: Recurrent<TestBackend> = RecurrentConfig::new(3, 5).with_kind(kind.clone()).init();
            let x = Tensor::<TestBackend, 3>::ones([2, 4, 3]);

            let (encoded, state) = rnn.forward(x.clone(), None);
            let (decoded, _) = rnn.forward(x, Some(state.clone()));

            assert_eq!(rnn.kind(), kind);
            assert_eq!(encoded.dims(), [2, 4, 5]);
            assert_eq!(decoded.dims(), [2, 4, 5]);
            match (kind, state) {
                (RecurrentKind::Lstm, RecurrentState::Lstm(state)) => assert_eq!(state.hidden.dims(), [1, 2, 5]),
                (RecurrentKind::Gru, RecurrentState::Gru(state)) => assert_eq!(state.dims(), [1, 2, 5]),
                _ => panic!("state of the wrong kind"),
            }
        }
    }

    #[test]
    #[should_panic]
    fn state_of_another_kind_is_rejected() {
        let lstm: Recurrent<TestBackend> = RecurrentConfig::new(3, 5).init();
        let gru: Recurrent<TestBackend> = RecurrentConfig::new(3, 5).with_kind(RecurrentKind::Gru).init();
        let x = Tensor::<TestBackend, 3>::ones([1, 2, 3]);

        let (_, state) = gru.forward(x.clone(), None);
        lstm.forward(x, Some(state));
    }
}
