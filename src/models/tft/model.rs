use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::{backend::Backend, Tensor};
use tracing::{debug, info};

use crate::data::{check_channels, ForecastBatch};
use crate::error::ForecastError;
use crate::loss::ForecastLoss;
use crate::models::{learner_steps, Forecaster};
use crate::utils::split;

use super::attention::{InterpretableMultiHead, InterpretableMultiHeadConfig};
use super::embedding::{
    CategoricalEmbedding, CategoricalEmbeddingConfig, CategoricalInput, NumericEmbedding,
    NumericEmbeddingConfig, DERIVED_FEATURES,
};
use super::grn::{GatedResidualNetwork, GatedResidualNetworkConfig};
use super::post::{PostTransformer, PostTransformerConfig};
use super::sequence::{LstmCoderConfig, LstmDecoder, LstmEncoder};
use super::vsn::{VariableSelectionNetwork, VariableSelectionNetworkConfig};

/// Forecast together with the quantities that make it interpretable.
#[derive(Debug, Clone)]
pub struct TftOutput<B: Backend> {
    /// `[batch, future_steps, out_channels, mul]`
    pub prediction: Tensor<B, 4>,
    /// Encoder selection weights `[batch, past_steps, vars]`: categorical variables,
    /// then the derived features, then the past numeric channels.
    pub past_weights: Tensor<B, 3>,
    /// Decoder selection weights `[batch, future_steps, vars]`.
    pub future_weights: Tensor<B, 3>,
    /// Cross attention of every head, `[batch, num_heads, future_steps, past_steps]`.
    pub attention: Tensor<B, 4>,
}

#[derive(Module, Debug)]
pub struct TemporalFusion<B: Backend> {
    past_steps: usize,
    future_steps: usize,
    past_channels: usize,
    future_channels: usize,
    out_channels: usize,
    quantiles: Vec<f32>,
    categorical_embedding: CategoricalEmbedding<B>,
    past_numeric_embedding: NumericEmbedding<B>,
    future_numeric_embedding: Option<NumericEmbedding<B>>,
    encoder_selector: VariableSelectionNetwork<B>,
    decoder_selector: VariableSelectionNetwork<B>,
    encoder: LstmEncoder<B>,
    encoder_grn: GatedResidualNetwork<B>,
    decoder: LstmDecoder<B>,
    decoder_grn: GatedResidualNetwork<B>,
    attention: InterpretableMultiHead<B>,
    post_transformer: PostTransformer<B>,
    output_proj: Linear<B>,
}

impl<B: Backend> TemporalFusion<B> {
    /// `[batch, future_steps, out_channels, mul]`
    pub fn forward(&self, batch: &ForecastBatch<B>) -> Result<Tensor<B, 4>, ForecastError> {
        Ok(self.forward_interpretable(batch)?.prediction)
    }

    pub fn forward_interpretable(
        &self,
        batch: &ForecastBatch<B>,
    ) -> Result<TftOutput<B>, ForecastError> {
        batch.check_window(self.past_steps, self.future_steps)?;
        batch.check_targets(self.out_channels)?;
        check_channels("x_num_past", batch.x_num_past.dims()[2], self.past_channels)?;

        let device = batch.x_num_past.device();
        let batch_size = batch.batch_size();

        let categorical = match batch.covariates.categorical() {
            Some((past, future)) => {
                CategoricalInput::Indices(Tensor::cat(vec![past.clone(), future.clone()], 1))
            }
            None => CategoricalInput::BatchSize(batch_size),
        };
        let embedded = self.categorical_embedding.forward(categorical, &device)?;
        let mut halves = split(embedded, &[self.past_steps, self.future_steps], 1);
        let future_cat = halves.remove(1);
        let past_cat = halves.remove(0);

        let past_num = self.past_numeric_embedding.forward(batch.x_num_past.clone());
        let (past_selected, past_weights) = self
            .encoder_selector
            .forward_with_weights(past_cat, Some(past_num));

        let future_num = match &self.future_numeric_embedding {
            Some(embedding) => {
                let x_num_future = batch.require_x_num_future("TemporalFusion")?;
                check_channels("x_num_future", x_num_future.dims()[2], self.future_channels)?;
                Some(embedding.forward(x_num_future.clone()))
            }
            None => None,
        };
        let (future_selected, future_weights) = self
            .decoder_selector
            .forward_with_weights(future_cat, future_num);

        let (encoded, state) = self.encoder.forward(past_selected);
        let encoded = self.encoder_grn.forward(encoded);
        let decoded = self.decoder.forward(future_selected, state);
        let pre_attention = self.decoder_grn.forward(decoded);

        let (attended, attention) =
            self.attention
                .forward_with_weights(pre_attention.clone(), encoded.clone(), encoded);
        let post = self.post_transformer.forward(attended, pre_attention);

        let mul = self.quantiles.len().max(1);
        let prediction = self.output_proj.forward(post).reshape([
            batch_size,
            self.future_steps,
            self.out_channels,
            mul,
        ]);
        debug!(dims = ?prediction.dims(), "temporal fusion forward");

        Ok(TftOutput {
            prediction,
            past_weights,
            future_weights,
            attention,
        })
    }
}

impl<B: Backend> Forecaster<B> for TemporalFusion<B> {
    fn forecast(&self, batch: &ForecastBatch<B>) -> Result<Tensor<B, 4>, ForecastError> {
        self.forward(batch)
    }

    fn forecast_loss(&self) -> ForecastLoss {
        ForecastLoss::from_quantiles(&self.quantiles)
    }
}

learner_steps!(TemporalFusion);

#[derive(Config, Debug)]
pub struct TemporalFusionConfig {
    past_steps: usize,
    future_steps: usize,
    past_channels: usize,

    #[config(default = 0)]
    future_channels: usize,

    /// Dictionary size of each categorical variable.
    #[config(default = "vec![]")]
    embs: Vec<usize>,

    #[config(default = 32)]
    d_model: usize,

    #[config(default = 4)]
    num_heads: usize,

    #[config(default = 8)]
    head_size: usize,

    #[config(default = 1)]
    num_layers: usize,

    #[config(default = 0.1)]
    dropout: f64,

    #[config(default = 1)]
    out_channels: usize,

    #[config(default = "vec![0.1, 0.5, 0.9]")]
    quantiles: Vec<f32>,
}

impl TemporalFusionConfig {
    pub fn init<B: Backend>(&self) -> TemporalFusion<B> {
        assert!(self.past_steps > 0 && self.future_steps > 0, "window must have past and future steps");
        assert!(self.past_channels > 0, "at least one past numeric channel is required");
        assert!(self.out_channels > 0);
        let loss = ForecastLoss::from_quantiles(&self.quantiles);

        let num_categorical = self.embs.len() + DERIVED_FEATURES;
        let categorical_embedding = CategoricalEmbeddingConfig::new(
            self.past_steps + self.future_steps,
            self.future_steps,
            self.d_model,
            self.embs.clone(),
        )
        .init();

        let past_numeric_embedding =
            NumericEmbeddingConfig::new(self.past_channels, self.d_model).init();
        let future_numeric_embedding = if self.future_channels > 0 {
            Some(NumericEmbeddingConfig::new(self.future_channels, self.d_model).init())
        } else {
            None
        };

        let encoder_selector = VariableSelectionNetworkConfig::new(self.d_model, num_categorical)
            .with_num_numeric(self.past_channels)
            .with_mix(true)
            .with_dropout(self.dropout)
            .init();
        let decoder_selector = VariableSelectionNetworkConfig::new(self.d_model, num_categorical)
            .with_num_numeric(self.future_channels)
            .with_mix(self.future_channels > 0)
            .with_dropout(self.dropout)
            .init();

        let coder = LstmCoderConfig::new(self.d_model)
            .with_num_layers(self.num_layers)
            .with_dropout(self.dropout);
        let grn = || {
            GatedResidualNetworkConfig::new(self.d_model)
                .with_dropout(self.dropout)
                .init()
        };

        info!(
            categorical = self.embs.len(),
            past_channels = self.past_channels,
            future_channels = self.future_channels,
            quantiles = loss.multiplier(),
            "building temporal fusion model"
        );

        TemporalFusion {
            past_steps: self.past_steps,
            future_steps: self.future_steps,
            past_channels: self.past_channels,
            future_channels: self.future_channels,
            out_channels: self.out_channels,
            quantiles: self.quantiles.clone(),
            categorical_embedding,
            past_numeric_embedding,
            future_numeric_embedding,
            encoder_selector,
            decoder_selector,
            encoder: coder.init_encoder(),
            encoder_grn: grn(),
            decoder: coder.init_decoder(),
            decoder_grn: grn(),
            attention: InterpretableMultiHeadConfig::new(self.d_model, self.head_size, self.num_heads)
                .init(),
            post_transformer: PostTransformerConfig::new(self.d_model)
                .with_dropout(self.dropout)
                .init(),
            output_proj: LinearConfig::new(self.d_model, self.out_channels * loss.multiplier())
                .init(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Covariates;
    use crate::utils::{float_tensor, int_tensor};
    use burn::backend::NdArray;
    use burn::module::Param;

    type TestBackend = NdArray;

    fn batch(covariates: Covariates<TestBackend>) -> ForecastBatch<TestBackend> {
        batch_with_targets(covariates, vec![0])
    }

    fn batch_with_targets(covariates: Covariates<TestBackend>, idx_target: Vec<usize>) -> ForecastBatch<TestBackend> {
        let device = Default::default();
        let x_num_past =
            float_tensor::<TestBackend, 3>((0..24).map(|v| (v as f32 * 0.3).sin()).collect(), [2, 6, 2], &device);
        let targets = idx_target.len();
        let y = float_tensor::<TestBackend, 3>(
            (0..6 * targets).map(|v| v as f32 * 0.1).collect(),
            [2, 3, targets],
            &device,
        );
        ForecastBatch::new(x_num_past, y, idx_target, covariates).unwrap()
    }

    fn config() -> TemporalFusionConfig {
        TemporalFusionConfig::new(6, 3, 2)
            .with_d_model(4)
            .with_num_heads(2)
            .with_head_size(2)
            .with_dropout(0.0)
    }

    #[test]
    fn past_only_batch_uses_derived_features() {
        let model: TemporalFusion<TestBackend> = config().init();

        let output = model.forward_interpretable(&batch(Covariates::PastOnly)).unwrap();

        assert_eq!(output.prediction.dims(), [2, 3, 1, 3]);
        // three derived features plus two numeric channels
        assert_eq!(output.past_weights.dims(), [2, 6, 5]);
        assert_eq!(output.future_weights.dims(), [2, 3, 3]);
        assert_eq!(output.attention.dims(), [2, 2, 3, 6]);
    }

    #[test]
    fn missing_future_numerics_are_reported() {
        let model: TemporalFusion<TestBackend> = config().with_future_channels(1).init();

        let err = model.forward(&batch(Covariates::PastOnly)).unwrap_err();

        assert_eq!(
            err,
            ForecastError::MissingCovariate {
                key: "x_num_future",
                model: "TemporalFusion",
            }
        );
    }

    #[test]
    fn missing_categoricals_are_reported() {
        let model: TemporalFusion<TestBackend> = config().with_embs(vec![3]).init();

        let err = model.forward(&batch(Covariates::PastOnly)).unwrap_err();

        assert!(matches!(err, ForecastError::MissingCovariate { .. }));
    }

    #[test]
    fn window_mismatch_is_reported() {
        let device = Default::default();
        let model: TemporalFusion<TestBackend> = config().with_embs(vec![3]).init();
        let covariates = Covariates::from_parts(
            None,
            Some(int_tensor::<TestBackend, 3>(vec![0; 12], [2, 6, 1], &device)),
            Some(int_tensor::<TestBackend, 3>(vec![1; 4], [2, 2, 1], &device)),
        )
        .unwrap();

        let err = model.forward(&batch(covariates)).unwrap_err();

        assert_eq!(
            err,
            ForecastError::ShapeMismatch {
                key: "x_cat_future",
                what: "steps",
                found: 2,
                expected: 3,
            }
        );
    }

    #[test]
    fn point_forecast_without_quantiles() {
        let model: TemporalFusion<TestBackend> = config().with_quantiles(vec![]).with_out_channels(2).init();

        let prediction = model
            .forward(&batch_with_targets(Covariates::PastOnly, vec![0, 1]))
            .unwrap();

        assert_eq!(prediction.dims(), [2, 3, 2, 1]);
        assert_eq!(model.forecast_loss(), ForecastLoss::L1);
    }

    #[test]
    fn target_channels_must_match_outputs() {
        let model: TemporalFusion<TestBackend> = config().with_out_channels(2).init();

        let err = model.forward(&batch(Covariates::PastOnly)).unwrap_err();

        assert_eq!(
            err,
            ForecastError::ShapeMismatch {
                key: "y",
                what: "channels",
                found: 1,
                expected: 2,
            }
        );
    }

    #[test]
    fn crossing_quantiles_are_returned_unsorted() {
        let device = Default::default();
        TestBackend::seed(5);
        let mut model: TemporalFusion<TestBackend> = config().init();
        // constant output with q10 above q90
        model.output_proj = Linear {
            weight: Param::from(Tensor::zeros([4, 3])),
            bias: Some(Param::from(float_tensor::<TestBackend, 1>(vec![2.0, 1.0, 0.0], [3], &device))),
        };
        let batch = batch(Covariates::PastOnly);

        let prediction = model.forward(&batch).unwrap();
        let loss = model.loss(prediction.clone(), &batch);

        assert_eq!(prediction.dims(), [2, 3, 1, 3]);
        let values = prediction.into_data().convert::<f32>().value;
        for quantiles in values.chunks(3) {
            assert_eq!(quantiles, &[2.0, 1.0, 0.0]);
        }
        let loss = loss.into_data().convert::<f32>().value[0];
        assert!(loss.is_finite() && loss > 0.0);
    }
}
