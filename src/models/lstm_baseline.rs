use burn::config::Config;
use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::tensor::{backend::Backend, Tensor};
use tracing::debug;

use crate::data::{check_channels, ForecastBatch};
use crate::error::ForecastError;
use crate::loss::ForecastLoss;
use crate::models::{learner_steps, Forecaster};
use crate::modules::lstm::{StackedLstm, StackedLstmConfig};
use crate::utils::last_steps;

/// Reference forecaster: an LSTM over the past numerics whose last hidden state is
/// projected onto the whole horizon at once. Covariates are ignored.
#[derive(Module, Debug)]
pub struct LstmBaseline<B: Backend> {
    past_steps: usize,
    future_steps: usize,
    past_channels: usize,
    out_channels: usize,
    quantiles: Vec<f32>,
    lstm: StackedLstm<B>,
    dropout: Dropout,
    output_proj: Linear<B>,
}

impl<B: Backend> LstmBaseline<B> {
    pub fn forward(&self, batch: &ForecastBatch<B>) -> Result<Tensor<B, 4>, ForecastError> {
        batch.check_window(self.past_steps, self.future_steps)?;
        batch.check_targets(self.out_channels)?;
        check_channels("x_num_past", batch.x_num_past.dims()[2], self.past_channels)?;

        let (hidden_states, _) = self.lstm.forward(batch.x_num_past.clone(), None);
        let last = self.dropout.forward(last_steps(hidden_states, 1));

        let prediction = self.output_proj.forward(last).reshape([
            batch.batch_size(),
            self.future_steps,
            self.out_channels,
            self.quantiles.len().max(1),
        ]);
        debug!(dims = ?prediction.dims(), "lstm baseline forward");

        Ok(prediction)
    }
}

impl<B: Backend> Forecaster<B> for LstmBaseline<B> {
    fn forecast(&self, batch: &ForecastBatch<B>) -> Result<Tensor<B, 4>, ForecastError> {
        self.forward(batch)
    }

    fn forecast_loss(&self) -> ForecastLoss {
        ForecastLoss::from_quantiles(&self.quantiles)
    }
}

learner_steps!(LstmBaseline);

#[derive(Config, Debug)]
pub struct LstmBaselineConfig {
    past_steps: usize,
    future_steps: usize,
    past_channels: usize,

    #[config(default = 32)]
    d_hidden: usize,

    #[config(default = 1)]
    num_layers: usize,

    #[config(default = 1)]
    out_channels: usize,

    #[config(default = "vec![]")]
    quantiles: Vec<f32>,

    #[config(default = 0.1)]
    dropout: f64,
}

impl LstmBaselineConfig {
    pub fn init<B: Backend>(&self) -> LstmBaseline<B> {
        assert!(self.past_channels > 0, "at least one past numeric channel is required");
        let loss = ForecastLoss::from_quantiles(&self.quantiles);

        LstmBaseline {
            past_steps: self.past_steps,
            future_steps: self.future_steps,
            past_channels: self.past_channels,
            out_channels: self.out_channels,
            quantiles: self.quantiles.clone(),
            lstm: StackedLstmConfig::new(self.past_channels, self.d_hidden)
                .with_num_layers(self.num_layers)
                .init(),
            dropout: DropoutConfig::new(self.dropout).init(),
            output_proj: LinearConfig::new(
                self.d_hidden,
                self.future_steps * self.out_channels * loss.multiplier(),
            )
            .init(),
        }
    }
}
