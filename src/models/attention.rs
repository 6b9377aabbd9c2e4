use burn::config::Config;
use burn::module::Module;
use burn::nn::transformer::{
    TransformerDecoder, TransformerDecoderConfig, TransformerDecoderInput, TransformerEncoder,
    TransformerEncoderConfig, TransformerEncoderInput,
};
use burn::tensor::{backend::Backend, Tensor};
use tracing::debug;

use crate::data::{check_channels, Covariates, ForecastBatch};
use crate::error::ForecastError;
use crate::loss::ForecastLoss;
use crate::models::{learner_steps, Forecaster};
use crate::modules::conv::{SameConv1d, SameConv1dConfig};
use crate::modules::embedding_bank::{EmbeddingBank, EmbeddingBankConfig};
use crate::modules::mlp::{Mlp, MlpConfig};
use crate::utils::{float_tensor, upper_triangular_mask};

/// Sinusoidal position encoding `[batch, steps, d_model]`, positions starting at 0.
pub fn positional_encoding<B: Backend>(
    batch_size: usize,
    steps: usize,
    d_model: usize,
    device: &B::Device,
) -> Tensor<B, 3> {
    let mut pe = vec![0.0f32; steps * d_model];
    for pos in 0..steps {
        for i in 0..d_model {
            let angle = pos as f32 / 10000.0f32.powf((2 * (i / 2)) as f32 / d_model as f32);
            pe[pos * d_model + i] = if i % 2 == 0 { angle.sin() } else { angle.cos() };
        }
    }

    float_tensor::<B, 3>(pe, [1, steps, d_model], device).repeat(0, batch_size)
}

/// Encoder-decoder transformer. Numeric channels, categorical embeddings and a
/// position encoding are concatenated and brought to `d_model` by a kernel-1
/// convolution on both sides.
#[derive(Module, Debug)]
pub struct Attention<B: Backend> {
    past_steps: usize,
    future_steps: usize,
    past_channels: usize,
    future_channels: usize,
    out_channels: usize,
    d_emb: usize,
    quantiles: Vec<f32>,
    embeddings: EmbeddingBank<B>,
    encoder_input: SameConv1d<B>,
    decoder_input: SameConv1d<B>,
    encoder: TransformerEncoder<B>,
    decoder: TransformerDecoder<B>,
    heads: Vec<Mlp<B>>,
}

impl<B: Backend> Attention<B> {
    pub fn forward(&self, batch: &ForecastBatch<B>) -> Result<Tensor<B, 4>, ForecastError> {
        batch.check_window(self.past_steps, self.future_steps)?;
        batch.check_targets(self.out_channels)?;
        self.forward_window(batch)
    }

    /// Forward pass accepting a horizon shorter than the configured one, as produced
    /// while decoding step by step.
    fn forward_window(&self, batch: &ForecastBatch<B>) -> Result<Tensor<B, 4>, ForecastError> {
        check_channels("x_num_past", batch.x_num_past.dims()[2], self.past_channels)?;
        let device = batch.x_num_past.device();
        let batch_size = batch.batch_size();

        let categorical = if self.embeddings.num_variables() > 0 {
            Some(batch.require_categorical("Attention")?)
        } else {
            None
        };

        let mut past = vec![
            batch.x_num_past.clone(),
            positional_encoding(batch_size, self.past_steps, self.d_emb, &device),
        ];
        if let Some((x_cat_past, _)) = categorical {
            past.extend(self.embeddings.forward("x_cat_past", x_cat_past.clone())?);
        }
        let memory = self.encoder.forward(TransformerEncoderInput::new(
            self.encoder_input.forward(Tensor::cat(past, 2)),
        ));

        let mut future = Vec::new();
        if self.future_channels > 0 {
            let x_num_future = batch.require_x_num_future("Attention")?;
            check_channels("x_num_future", x_num_future.dims()[2], self.future_channels)?;
            future.push(x_num_future.clone());
        }
        if let Some((_, x_cat_future)) = categorical {
            future.extend(self.embeddings.forward("x_cat_future", x_cat_future.clone())?);
        }
        let horizon = match future.first() {
            Some(first) => first.dims()[1],
            None => return Err(ForecastError::EmptyDecoderInput),
        };
        future.push(positional_encoding(batch_size, horizon, self.d_emb, &device));
        let target = self.decoder_input.forward(Tensor::cat(future, 2));

        let input = TransformerDecoderInput::new(target, memory)
            .target_mask_attn(upper_triangular_mask(batch_size, horizon, horizon, &device))
            .memory_mask_attn(upper_triangular_mask(
                batch_size,
                horizon,
                self.past_steps,
                &device,
            ));
        let decoded = self.decoder.forward(input);

        let outputs: Vec<Tensor<B, 3>> = self.heads.iter().map(|head| head.forward(decoded.clone())).collect();
        let prediction = Tensor::cat(outputs, 2).reshape([
            batch_size,
            horizon,
            self.out_channels,
            self.quantiles.len().max(1),
        ]);
        debug!(dims = ?prediction.dims(), "attention forward");

        Ok(prediction)
    }

    /// Autoregressive forecast. Decoding starts from the first future step of the batch;
    /// each new step sees the categorical covariates up to itself and, when future
    /// numerics are configured, the point forecasts of the previous steps in place of
    /// the observed ones. Run it on `model.valid()` to keep the graph free of gradients.
    pub fn inference(&self, batch: &ForecastBatch<B>) -> Result<Tensor<B, 4>, ForecastError> {
        batch.check_window(self.past_steps, self.future_steps)?;
        if self.future_channels > 0 && self.future_channels != self.out_channels {
            return Err(ForecastError::ShapeMismatch {
                key: "x_num_future",
                what: "channels",
                found: self.future_channels,
                expected: self.out_channels,
            });
        }
        batch.check_targets(self.out_channels)?;

        let loss = self.forecast_loss();
        let batch_size = batch.batch_size();
        let x_num_past = batch.x_num_past.clone().detach();
        let categorical = batch
            .covariates
            .categorical()
            .map(|(past, future)| (past.clone(), future.clone()));

        let mut x_num_future = match batch.covariates.x_num_future() {
            Some(x) if self.future_channels > 0 => {
                let [_, _, channels] = x.dims();
                Some(x.clone().slice([0..batch_size, 0..1, 0..channels]).detach())
            }
            _ => None,
        };

        let mut steps = Vec::with_capacity(self.future_steps);
        for step in 0..self.future_steps {
            let (x_cat_past, x_cat_future) = match &categorical {
                Some((past, future)) => {
                    let [_, _, vars] = future.dims();
                    (
                        Some(past.clone()),
                        Some(future.clone().slice([0..batch_size, 0..step + 1, 0..vars])),
                    )
                }
                None => (None, None),
            };
            let window = ForecastBatch::new(
                x_num_past.clone(),
                batch.y.clone(),
                batch.idx_target.clone(),
                Covariates::from_parts(x_num_future.clone(), x_cat_past, x_cat_future)?,
            )?;

            let output = self.forward_window(&window)?.detach();
            let [_, horizon, channels, mul] = output.dims();
            let last = output.slice([0..batch_size, horizon - 1..horizon, 0..channels, 0..mul]);

            if step + 1 < self.future_steps {
                x_num_future = x_num_future.map(|x| {
                    Tensor::cat(vec![x, loss.point_forecast(last.clone())], 1)
                });
            }
            steps.push(last);
        }

        Ok(Tensor::cat(steps, 1))
    }
}

impl<B: Backend> Forecaster<B> for Attention<B> {
    fn forecast(&self, batch: &ForecastBatch<B>) -> Result<Tensor<B, 4>, ForecastError> {
        self.forward(batch)
    }

    fn forecast_loss(&self) -> ForecastLoss {
        ForecastLoss::from_quantiles(&self.quantiles)
    }
}

learner_steps!(Attention);

#[derive(Config, Debug)]
pub struct AttentionConfig {
    past_steps: usize,
    future_steps: usize,
    past_channels: usize,

    #[config(default = 0)]
    future_channels: usize,

    #[config(default = "vec![]")]
    embs: Vec<usize>,

    /// Width of each categorical embedding and of the position encoding.
    #[config(default = 4)]
    d_emb: usize,

    #[config(default = 32)]
    d_model: usize,

    #[config(default = 4)]
    num_heads: usize,

    #[config(default = 1)]
    num_layers_encoder: usize,

    #[config(default = 1)]
    num_layers_decoder: usize,

    #[config(default = 0.1)]
    dropout: f64,

    #[config(default = 1)]
    out_channels: usize,

    #[config(default = "vec![]")]
    quantiles: Vec<f32>,
}

impl AttentionConfig {
    pub fn init<B: Backend>(&self) -> Attention<B> {
        assert!(
            self.d_model >= 2 && self.d_model % self.num_heads == 0,
            "model width {} must be at least 2 and divisible by {} heads",
            self.d_model,
            self.num_heads
        );
        assert!(self.past_channels > 0, "at least one past numeric channel is required");
        let loss = ForecastLoss::from_quantiles(&self.quantiles);
        let d_cat = self.embs.len() * self.d_emb;

        let encoder = TransformerEncoderConfig::new(
            self.d_model,
            self.d_model,
            self.num_heads,
            self.num_layers_encoder,
        )
        .with_dropout(self.dropout)
        .with_norm_first(true)
        .init();
        let decoder = TransformerDecoderConfig::new(
            self.d_model,
            self.d_model,
            self.num_heads,
            self.num_layers_decoder,
        )
        .with_dropout(self.dropout)
        .with_norm_first(true)
        .init();

        Attention {
            past_steps: self.past_steps,
            future_steps: self.future_steps,
            past_channels: self.past_channels,
            future_channels: self.future_channels,
            out_channels: self.out_channels,
            d_emb: self.d_emb,
            quantiles: self.quantiles.clone(),
            embeddings: EmbeddingBankConfig::new(self.embs.clone(), self.d_emb).init(),
            encoder_input: SameConv1dConfig::new(d_cat + self.d_emb + self.past_channels, self.d_model, 1)
                .init(),
            decoder_input: SameConv1dConfig::new(d_cat + self.d_emb + self.future_channels, self.d_model, 1)
                .init(),
            encoder,
            decoder,
            heads: (0..self.out_channels * loss.multiplier())
                .map(|_| MlpConfig::new(vec![self.d_model, self.d_model / 2, 1]).init())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::int_tensor;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn batch(covariates: Covariates<TestBackend>) -> ForecastBatch<TestBackend> {
        let device = Default::default();
        let x_num_past =
            float_tensor::<TestBackend, 3>((0..16).map(|v| (v as f32 * 0.5).sin()).collect(), [2, 8, 1], &device);
        let y = float_tensor::<TestBackend, 3>(vec![0.0; 8], [2, 4, 1], &device);
        ForecastBatch::new(x_num_past, y, vec![0], covariates).unwrap()
    }

    fn future_numeric() -> Covariates<TestBackend> {
        let device = Default::default();
        Covariates::from_parts(
            Some(float_tensor::<TestBackend, 3>(vec![0.3; 8], [2, 4, 1], &device)),
            None,
            None,
        )
        .unwrap()
    }

    #[test]
    fn positional_encoding_starts_with_sin_cos_of_zero() {
        let pe = positional_encoding::<TestBackend>(2, 3, 4, &Default::default());

        assert_eq!(pe.dims(), [2, 3, 4]);
        let values = pe.into_data().convert::<f32>().value;
        assert_eq!(&values[0..4], &[0.0, 1.0, 0.0, 1.0]);
        assert!((values[4] - 1.0f32.sin()).abs() < 1e-6);
    }

    #[test]
    fn categorical_decoder_forecast_shape() {
        let device = Default::default();
        let model: Attention<TestBackend> = AttentionConfig::new(8, 4, 1)
            .with_embs(vec![5])
            .with_d_model(8)
            .with_num_heads(2)
            .with_quantiles(vec![0.1, 0.5, 0.9])
            .init();
        let covariates = Covariates::from_parts(
            None,
            Some(int_tensor::<TestBackend, 3>(vec![1; 16], [2, 8, 1], &device)),
            Some(int_tensor::<TestBackend, 3>(vec![4; 8], [2, 4, 1], &device)),
        )
        .unwrap();

        let prediction = model.forward(&batch(covariates)).unwrap();

        assert_eq!(prediction.dims(), [2, 4, 1, 3]);
    }

    #[test]
    fn decoder_needs_future_covariates() {
        let model: Attention<TestBackend> = AttentionConfig::new(8, 4, 1)
            .with_d_model(8)
            .with_num_heads(2)
            .init();

        let err = model.forward(&batch(Covariates::PastOnly)).unwrap_err();

        assert_eq!(err, ForecastError::EmptyDecoderInput);
    }

    #[test]
    fn inference_decodes_every_step() {
        let model: Attention<TestBackend> = AttentionConfig::new(8, 4, 1)
            .with_future_channels(1)
            .with_d_model(8)
            .with_num_heads(2)
            .with_dropout(0.0)
            .init();

        let forecast = model.inference(&batch(future_numeric())).unwrap();

        assert_eq!(forecast.dims(), [2, 4, 1, 1]);
    }

    #[test]
    fn inference_first_step_matches_single_step_forward() {
        let device = Default::default();
        let model: Attention<TestBackend> = AttentionConfig::new(8, 4, 1)
            .with_future_channels(1)
            .with_d_model(8)
            .with_num_heads(2)
            .with_dropout(0.0)
            .init();
        let batch = batch(future_numeric());

        let forecast = model.inference(&batch).unwrap();
        let first_step = ForecastBatch::new(
            batch.x_num_past.clone(),
            batch.y.clone(),
            vec![0],
            Covariates::from_parts(
                Some(float_tensor::<TestBackend, 3>(vec![0.3; 2], [2, 1, 1], &device)),
                None,
                None,
            )
            .unwrap(),
        )
        .unwrap();
        let single = model.forward_window(&first_step).unwrap();

        let expected = single.into_data().convert::<f32>().value;
        let found = forecast
            .slice([0..2, 0..1, 0..1, 0..1])
            .into_data()
            .convert::<f32>()
            .value;
        for (e, f) in expected.iter().zip(found.iter()) {
            assert!((e - f).abs() < 1e-6);
        }
    }

    #[test]
    fn inference_rejects_mismatched_feedback_channels() {
        let model: Attention<TestBackend> = AttentionConfig::new(8, 4, 1)
            .with_future_channels(1)
            .with_out_channels(2)
            .with_d_model(8)
            .with_num_heads(2)
            .init();

        let err = model.inference(&batch(future_numeric())).unwrap_err();

        assert!(matches!(err, ForecastError::ShapeMismatch { key: "x_num_future", .. }));
    }
}
