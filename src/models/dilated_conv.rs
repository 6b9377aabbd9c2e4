use burn::config::Config;
use burn::module::Module;
use burn::nn::{BatchNorm, BatchNormConfig, Dropout, DropoutConfig};
use burn::tensor::{backend::Backend, Tensor};
use tracing::{debug, info};

use crate::data::{check_channels, ForecastBatch};
use crate::error::ForecastError;
use crate::loss::{persistence_loss, ForecastLoss};
use crate::models::{learner_steps, Forecaster};
use crate::modules::activation::{Activation, ActivationConfig, ActivationKind};
use crate::modules::conv::{SameConv1d, SameConv1dConfig};
use crate::modules::embedding_bank::{EmbeddingBank, EmbeddingBankConfig};
use crate::modules::mlp::{Mlp, MlpConfig};
use crate::modules::recurrent::{Recurrent, RecurrentConfig, RecurrentKind};
use crate::utils::last_steps;

/// Parallel convolutions with dilations `1, 2, 4, ...`, one per `floor(sqrt(steps))`,
/// fused by a final convolution.
#[derive(Module, Debug)]
pub struct DilationBlock<B: Backend> {
    dilations: Vec<SameConv1d<B>>,
    conv_final: SameConv1d<B>,
    sum_layers: bool,
}

impl<B: Backend> DilationBlock<B> {
    /// `[batch, steps, d_input] -> [batch, steps, d_output]`
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let branches: Vec<Tensor<B, 3>> = self
            .dilations
            .iter()
            .map(|conv| conv.forward(x.clone()))
            .collect();

        let merged = if self.sum_layers {
            Tensor::stack::<4>(branches, 0).sum_dim(0).squeeze::<3>(0)
        } else {
            Tensor::cat(branches, 2)
        };

        self.conv_final.forward(merged)
    }

    pub fn num_branches(&self) -> usize {
        self.dilations.len()
    }
}

#[derive(Config, Debug)]
pub struct DilationBlockConfig {
    d_input: usize,
    d_output: usize,
    kernel_size: usize,
    /// Sequence length the block runs on; sets the number of branches.
    steps: usize,

    #[config(default = false)]
    sum_layers: bool,
}

impl DilationBlockConfig {
    pub fn init<B: Backend>(&self) -> DilationBlock<B> {
        let branches = ((self.steps as f64).sqrt().floor() as usize).max(1);
        let dilations = (0..branches)
            .map(|i| {
                SameConv1dConfig::new(self.d_input, self.d_output, self.kernel_size)
                    .with_dilation(1 << i)
                    .init()
            })
            .collect();
        let d_merged = if self.sum_layers {
            self.d_output
        } else {
            self.d_output * branches
        };

        DilationBlock {
            dilations,
            conv_final: SameConv1dConfig::new(d_merged, self.d_output, self.kernel_size).init(),
            sum_layers: self.sum_layers,
        }
    }
}

/// Convolutional encoder over the past window, dilation blocks, an LSTM
/// encoder-decoder and one small MLP per future step, channel and quantile.
#[derive(Module, Debug)]
pub struct DilatedConv<B: Backend> {
    past_steps: usize,
    future_steps: usize,
    past_channels: usize,
    future_channels: usize,
    out_channels: usize,
    quantiles: Vec<f32>,
    persistence_weight: f64,
    initial_conv: SameConv1d<B>,
    initial_activation: Activation,
    initial_norm: Option<BatchNorm<B, 1>>,
    initial_dropout: Dropout,
    initial_proj: SameConv1d<B>,
    embeddings: EmbeddingBank<B>,
    conv_encoder: DilationBlock<B>,
    conv_decoder: DilationBlock<B>,
    encoder: Recurrent<B>,
    decoder: Recurrent<B>,
    heads: Vec<Mlp<B>>,
}

impl<B: Backend> DilatedConv<B> {
    fn has_future(&self) -> bool {
        self.future_channels + self.embeddings.width() > 0
    }

    pub fn forward(&self, batch: &ForecastBatch<B>) -> Result<Tensor<B, 4>, ForecastError> {
        batch.check_window(self.past_steps, self.future_steps)?;
        batch.check_targets(self.out_channels)?;
        check_channels("x_num_past", batch.x_num_past.dims()[2], self.past_channels)?;

        let categorical = if self.embeddings.num_variables() > 0 {
            Some(batch.require_categorical("DilatedConv")?)
        } else {
            None
        };

        let x = self
            .initial_activation
            .forward(self.initial_conv.forward(batch.x_num_past.clone()));
        let x = match &self.initial_norm {
            Some(norm) => norm.forward(x.swap_dims(1, 2)).swap_dims(1, 2),
            None => self.initial_dropout.forward(x),
        };
        let mut past = vec![self.initial_proj.forward(x)];
        if let Some((x_cat_past, _)) = categorical {
            past.extend(self.embeddings.forward("x_cat_past", x_cat_past.clone())?);
        }
        let (encoded, state) = self
            .encoder
            .forward(self.conv_encoder.forward(Tensor::cat(past, 2)), None);

        let future = if self.has_future() {
            let mut future = Vec::new();
            if let Some((_, x_cat_future)) = categorical {
                future.extend(self.embeddings.forward("x_cat_future", x_cat_future.clone())?);
            }
            if self.future_channels > 0 {
                let x_num_future = batch.require_x_num_future("DilatedConv")?;
                check_channels("x_num_future", x_num_future.dims()[2], self.future_channels)?;
                future.push(x_num_future.clone());
            }
            Some(Tensor::cat(future, 2))
        } else {
            None
        };

        let decoder_input = match &future {
            Some(future) => self.conv_decoder.forward(future.clone()),
            None => self
                .conv_decoder
                .forward(last_steps(encoded, self.future_steps)),
        };
        let (decoded, _) = self.decoder.forward(decoder_input, Some(state));

        let features = match future {
            Some(future) => Tensor::cat(vec![future, decoded], 2),
            None => decoded,
        };
        let [batch_size, _, d_features] = features.dims();
        let per_step = self.out_channels * self.quantiles.len().max(1);

        let steps: Vec<Tensor<B, 3>> = (0..self.future_steps)
            .map(|step| {
                let x = features
                    .clone()
                    .slice([0..batch_size, step..step + 1, 0..d_features]);
                let outputs: Vec<Tensor<B, 3>> = self.heads[step * per_step..(step + 1) * per_step]
                    .iter()
                    .map(|head| head.forward(x.clone()))
                    .collect();
                Tensor::cat(outputs, 2)
            })
            .collect();

        let prediction = Tensor::cat(steps, 1).reshape([
            batch_size,
            self.future_steps,
            self.out_channels,
            self.quantiles.len().max(1),
        ]);
        debug!(dims = ?prediction.dims(), "dilated conv forward");

        Ok(prediction)
    }
}

impl<B: Backend> Forecaster<B> for DilatedConv<B> {
    fn forecast(&self, batch: &ForecastBatch<B>) -> Result<Tensor<B, 4>, ForecastError> {
        self.forward(batch)
    }

    fn forecast_loss(&self) -> ForecastLoss {
        ForecastLoss::from_quantiles(&self.quantiles)
    }

    /// Forecast loss blended with a penalty on copying the last observed value.
    fn loss(&self, prediction: Tensor<B, 4>, batch: &ForecastBatch<B>) -> Tensor<B, 1> {
        let loss = self.forecast_loss();
        let point = loss.point_forecast(prediction.clone());
        let forecast = loss.forward(prediction, batch.y.clone());
        let persistence = persistence_loss(point, batch.last_target());

        forecast * self.persistence_weight + persistence * (1.0 - self.persistence_weight)
    }
}

learner_steps!(DilatedConv);

#[derive(Config, Debug)]
pub struct DilatedConvConfig {
    past_steps: usize,
    future_steps: usize,
    past_channels: usize,

    #[config(default = 0)]
    future_channels: usize,

    #[config(default = "vec![]")]
    embs: Vec<usize>,

    #[config(default = 4)]
    d_emb: usize,

    #[config(default = 64)]
    d_hidden: usize,

    #[config(default = 1)]
    num_layers: usize,

    #[config(default = 3)]
    kernel_size: usize,

    #[config(default = "RecurrentKind::Lstm")]
    kind: RecurrentKind,

    #[config(default = false)]
    sum_emb: bool,

    #[config(default = 1)]
    out_channels: usize,

    /// Share of the forecast loss, the rest goes to the persistence penalty.
    #[config(default = 1.0)]
    persistence_weight: f64,

    #[config(default = "ActivationKind::Relu")]
    activation: ActivationKind,

    #[config(default = "vec![]")]
    quantiles: Vec<f32>,

    #[config(default = 0.1)]
    dropout: f64,

    /// Batch norm in place of dropout in the input stack and the first two head
    /// layers. Ignored with SELU.
    #[config(default = false)]
    use_bn: bool,
}

impl DilatedConvConfig {
    pub fn init<B: Backend>(&self) -> DilatedConv<B> {
        assert!(
            self.d_hidden >= 16 && self.d_hidden % 16 == 0,
            "hidden size must be a positive multiple of 16, got {}",
            self.d_hidden
        );
        assert!(self.past_channels > 0, "at least one past numeric channel is required");
        assert!(
            (0.0..=1.0).contains(&self.persistence_weight),
            "persistence weight must lie in [0, 1]"
        );
        let loss = ForecastLoss::from_quantiles(&self.quantiles);
        let h = self.d_hidden;
        let use_bn = self.use_bn && self.activation != ActivationKind::Selu;
        if self.use_bn && !use_bn {
            info!("SELU does not need batch norm, keeping dropout");
        }

        let embeddings: EmbeddingBank<B> = EmbeddingBankConfig::new(self.embs.clone(), self.d_emb)
            .with_sum(self.sum_emb)
            .init();
        if self.sum_emb && !self.embs.is_empty() {
            info!("Using summed embeddings");
        } else {
            info!("Using stacked embeddings");
        }

        let d_future = self.future_channels + embeddings.width();
        if d_future == 0 {
            assert!(
                self.past_steps >= self.future_steps,
                "without future covariates the horizon must not exceed the past window"
            );
        }

        let d_initial = (self.past_channels + h / 8) / 2;
        let d_decoder_input = if d_future == 0 { h / 2 } else { d_future };
        let block = |d_input: usize, steps: usize| {
            DilationBlockConfig::new(d_input, h / 4, self.kernel_size, steps)
                .with_sum_layers(self.sum_emb)
                .init()
        };
        let recurrent = || {
            RecurrentConfig::new(h / 4, h / 2)
                .with_num_layers(self.num_layers)
                .with_kind(self.kind.clone())
                .init()
        };
        let head = || {
            MlpConfig::new(vec![h / 2 + d_future, h / 4, h / 8, h / 16, 1])
                .with_activation(self.activation.clone())
                .with_dropout(self.dropout)
                .with_batch_norm_layers(if use_bn { 2 } else { 0 })
                .init()
        };

        DilatedConv {
            past_steps: self.past_steps,
            future_steps: self.future_steps,
            past_channels: self.past_channels,
            future_channels: self.future_channels,
            out_channels: self.out_channels,
            quantiles: self.quantiles.clone(),
            persistence_weight: self.persistence_weight,
            initial_conv: SameConv1dConfig::new(self.past_channels, d_initial.max(1), self.kernel_size)
                .init(),
            initial_activation: ActivationConfig::new()
                .with_kind(self.activation.clone())
                .init(),
            initial_norm: use_bn.then(|| BatchNormConfig::new(d_initial.max(1)).init()),
            initial_dropout: DropoutConfig::new(self.dropout).init(),
            initial_proj: SameConv1dConfig::new(d_initial.max(1), h / 8, self.kernel_size).init(),
            conv_encoder: block(embeddings.width() + h / 8, self.past_steps),
            conv_decoder: block(d_decoder_input, self.future_steps),
            embeddings,
            encoder: recurrent(),
            decoder: recurrent(),
            heads: (0..self.future_steps * self.out_channels * loss.multiplier())
                .map(|_| head())
                .collect(),
        }
    }
}
