use burn::config::Config;
use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig};
use burn::tensor::{backend::Backend, Tensor};
use tracing::{debug, info};

use crate::data::{check_channels, ForecastBatch};
use crate::error::ForecastError;
use crate::loss::ForecastLoss;
use crate::models::{learner_steps, Forecaster};
use crate::modules::activation::ActivationKind;
use crate::modules::conv::{SameConv1d, SameConv1dConfig};
use crate::modules::embedding_bank::{EmbeddingBank, EmbeddingBankConfig};
use crate::modules::lstm::{StackedLstm, StackedLstmConfig};
use crate::modules::mlp::{Mlp, MlpConfig};

/// Decoder input when the batch carries no future covariates: the encoder output is
/// projected along the time axis from the past window to the horizon.
#[derive(Module, Debug)]
pub struct HorizonProjection<B: Backend> {
    time_mlp: Mlp<B>,
    dropout: Dropout,
    conv: SameConv1d<B>,
}

impl<B: Backend> HorizonProjection<B> {
    /// `[batch, past_steps, d_hidden] -> [batch, future_steps, d_hidden / 8]`
    pub fn forward(&self, encoded: Tensor<B, 3>) -> Tensor<B, 3> {
        let projected = self.time_mlp.forward(encoded.swap_dims(1, 2));
        let projected = self.dropout.forward(projected).swap_dims(1, 2);
        self.conv.forward(projected)
    }
}

/// LSTM encoder-decoder. Past numerics go through a small MLP, join the categorical
/// embeddings and pass a same-padded convolution before the encoder.
#[derive(Module, Debug)]
pub struct Rnn<B: Backend> {
    past_steps: usize,
    future_steps: usize,
    past_channels: usize,
    future_channels: usize,
    out_channels: usize,
    quantiles: Vec<f32>,
    initial_encoder: Mlp<B>,
    embeddings: EmbeddingBank<B>,
    conv_encoder: SameConv1d<B>,
    conv_dropout: Dropout,
    encoder: StackedLstm<B>,
    decoder: StackedLstm<B>,
    future_projection: Option<Mlp<B>>,
    future_dropout: Dropout,
    horizon_projection: Option<HorizonProjection<B>>,
    heads: Vec<Mlp<B>>,
}

impl<B: Backend> Rnn<B> {
    pub fn forward(&self, batch: &ForecastBatch<B>) -> Result<Tensor<B, 4>, ForecastError> {
        batch.check_window(self.past_steps, self.future_steps)?;
        batch.check_targets(self.out_channels)?;
        check_channels("x_num_past", batch.x_num_past.dims()[2], self.past_channels)?;

        let categorical = if self.embeddings.num_variables() > 0 {
            Some(batch.require_categorical("Rnn")?)
        } else {
            None
        };

        let mut past = vec![self.initial_encoder.forward(batch.x_num_past.clone())];
        if let Some((x_cat_past, _)) = categorical {
            past.extend(self.embeddings.forward("x_cat_past", x_cat_past.clone())?);
        }
        let encoder_input = self
            .conv_dropout
            .forward(self.conv_encoder.forward(Tensor::cat(past, 2)));
        let (encoded, state) = self.encoder.forward(encoder_input, None);

        let decoder_input = match (&self.future_projection, &self.horizon_projection) {
            (Some(mlp), _) => {
                let mut future = Vec::new();
                if let Some((_, x_cat_future)) = categorical {
                    future.extend(self.embeddings.forward("x_cat_future", x_cat_future.clone())?);
                }
                if self.future_channels > 0 {
                    let x_num_future = batch.require_x_num_future("Rnn")?;
                    check_channels("x_num_future", x_num_future.dims()[2], self.future_channels)?;
                    future.push(x_num_future.clone());
                }
                self.future_dropout.forward(mlp.forward(Tensor::cat(future, 2)))
            }
            (None, Some(horizon)) => horizon.forward(encoded),
            (None, None) => return Err(ForecastError::EmptyDecoderInput),
        };
        let (decoded, _) = self.decoder.forward(decoder_input, Some(state));

        let outputs: Vec<Tensor<B, 3>> = self.heads.iter().map(|head| head.forward(decoded.clone())).collect();
        let [batch_size, steps, _] = decoded.dims();
        let prediction = Tensor::cat(outputs, 2).reshape([
            batch_size,
            steps,
            self.out_channels,
            self.quantiles.len().max(1),
        ]);
        debug!(dims = ?prediction.dims(), "rnn forward");

        Ok(prediction)
    }
}

impl<B: Backend> Forecaster<B> for Rnn<B> {
    fn forecast(&self, batch: &ForecastBatch<B>) -> Result<Tensor<B, 4>, ForecastError> {
        self.forward(batch)
    }

    fn forecast_loss(&self) -> ForecastLoss {
        ForecastLoss::from_quantiles(&self.quantiles)
    }
}

learner_steps!(Rnn);

#[derive(Config, Debug)]
pub struct RnnConfig {
    past_steps: usize,
    future_steps: usize,
    past_channels: usize,

    #[config(default = 0)]
    future_channels: usize,

    #[config(default = "vec![]")]
    embs: Vec<usize>,

    /// Width of every categorical embedding.
    #[config(default = 4)]
    d_emb: usize,

    #[config(default = 32)]
    d_hidden: usize,

    #[config(default = 1)]
    num_layers: usize,

    #[config(default = 3)]
    kernel_size: usize,

    #[config(default = false)]
    sum_embs: bool,

    #[config(default = 1)]
    out_channels: usize,

    #[config(default = "vec![]")]
    quantiles: Vec<f32>,

    #[config(default = "ActivationKind::Relu")]
    activation: ActivationKind,
}

impl RnnConfig {
    pub fn init<B: Backend>(&self) -> Rnn<B> {
        assert!(
            self.d_hidden >= 8 && self.d_hidden % 8 == 0,
            "hidden size must be a positive multiple of 8, got {}",
            self.d_hidden
        );
        assert!(self.past_channels > 0, "at least one past numeric channel is required");
        let loss = ForecastLoss::from_quantiles(&self.quantiles);
        let h = self.d_hidden;

        let mlp = |dims: Vec<usize>, dropout: f64| {
            MlpConfig::new(dims)
                .with_activation(self.activation.clone())
                .with_dropout(dropout)
                .init()
        };

        let embeddings: EmbeddingBank<B> = EmbeddingBankConfig::new(self.embs.clone(), self.d_emb)
            .with_sum(self.sum_embs)
            .init();
        if self.sum_embs && !self.embs.is_empty() {
            info!("Using summed embeddings");
        } else {
            info!("Using stacked embeddings");
        }

        let d_future = self.future_channels + embeddings.width();
        let (future_projection, horizon_projection) = if d_future > 0 {
            (Some(mlp(vec![d_future, h / 4, h / 8], 0.2)), None)
        } else {
            let horizon = HorizonProjection {
                time_mlp: mlp(
                    vec![self.past_steps, self.past_steps * 2, self.future_steps],
                    0.2,
                ),
                dropout: DropoutConfig::new(0.3).init(),
                conv: SameConv1dConfig::new(h, h / 8, 3).init(),
            };
            (None, Some(horizon))
        };

        let lstm = || {
            StackedLstmConfig::new(h / 8, h)
                .with_num_layers(self.num_layers)
                .init()
        };

        Rnn {
            past_steps: self.past_steps,
            future_steps: self.future_steps,
            past_channels: self.past_channels,
            future_channels: self.future_channels,
            out_channels: self.out_channels,
            quantiles: self.quantiles.clone(),
            initial_encoder: mlp(vec![self.past_channels, 4, 8, h / 8], 0.0),
            conv_encoder: SameConv1dConfig::new(embeddings.width() + h / 8, h / 8, self.kernel_size)
                .init(),
            embeddings,
            conv_dropout: DropoutConfig::new(0.3).init(),
            encoder: lstm(),
            decoder: lstm(),
            future_projection,
            future_dropout: DropoutConfig::new(0.3).init(),
            horizon_projection,
            heads: (0..self.out_channels * loss.multiplier())
                .map(|_| mlp(vec![h, h / 2, h / 4, h / 8, 1], 0.2))
                .collect(),
        }
    }
}
