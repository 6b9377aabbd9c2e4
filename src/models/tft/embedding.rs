use burn::config::Config;
use burn::module::Module;
use burn::nn::{Embedding, EmbeddingConfig, Linear, LinearConfig};
use burn::tensor::{backend::Backend, Int, Tensor};

use crate::error::ForecastError;
use crate::utils::int_tensor;

/// Number of positional features appended to the categorical variables.
pub const DERIVED_FEATURES: usize = 3;

/// Categorical input of a [`CategoricalEmbedding`].
pub enum CategoricalInput<B: Backend> {
    /// Integer codes `[batch, seq_len, num_vars]`.
    Indices(Tensor<B, 3, Int>),
    /// No categorical covariates: only the derived features of `batch_size` windows
    /// are embedded.
    BatchSize(usize),
}

/// Embeds every categorical variable plus three derived positional features through
/// independent lookup tables of width `d_model`, stacked on a new variable axis.
///
/// The derived features, in order: the position inside the window (`0..seq_len`),
/// the position inside the forecast horizon (0 for past steps, `1..=lag` for future
/// ones) and a past/future flag.
#[derive(Module, Debug)]
pub struct CategoricalEmbedding<B: Backend> {
    embedders: Vec<Embedding<B>>,
    seq_len: usize,
    lag: usize,
}

impl<B: Backend> CategoricalEmbedding<B> {
    pub fn num_variables(&self) -> usize {
        self.embedders.len()
    }

    /// Derived features `[batch_size, seq_len, 3]`.
    pub fn derived_features(&self, batch_size: usize, device: &B::Device) -> Tensor<B, 3, Int> {
        let past_len = self.seq_len - self.lag;
        let values: Vec<i64> = (0..batch_size)
            .flat_map(|_| {
                (0..self.seq_len).flat_map(move |t| {
                    let is_future = t >= past_len;
                    let future_pos = if is_future { t - past_len + 1 } else { 0 };
                    [t as i64, future_pos as i64, is_future as i64]
                })
            })
            .collect();

        int_tensor(values, [batch_size, self.seq_len, DERIVED_FEATURES], device)
    }

    /// Returns `[batch, seq_len, num_vars + 3, d_model]`.
    pub fn forward(
        &self,
        input: CategoricalInput<B>,
        device: &B::Device,
    ) -> Result<Tensor<B, 4>, ForecastError> {
        let expected_vars = self.embedders.len() - DERIVED_FEATURES;

        let cat_vars = match input {
            CategoricalInput::Indices(x) => {
                let [batch_size, seq_len, num_vars] = x.dims();
                if seq_len != self.seq_len {
                    return Err(ForecastError::ShapeMismatch {
                        key: "x_cat",
                        what: "steps",
                        found: seq_len,
                        expected: self.seq_len,
                    });
                }
                if num_vars != expected_vars {
                    return Err(ForecastError::ShapeMismatch {
                        key: "x_cat",
                        what: "variables",
                        found: num_vars,
                        expected: expected_vars,
                    });
                }
                Tensor::cat(vec![x, self.derived_features(batch_size, device)], 2)
            }
            CategoricalInput::BatchSize(batch_size) => {
                if expected_vars > 0 {
                    return Err(ForecastError::MissingCovariate {
                        key: "x_cat_past",
                        model: "the categorical embedding",
                    });
                }
                self.derived_features(batch_size, device)
            }
        };

        let [batch_size, seq_len, _] = cat_vars.dims();
        let embeddings = self
            .embedders
            .iter()
            .enumerate()
            .map(|(idx, emb)| {
                let codes: Tensor<B, 2, Int> = cat_vars
                    .clone()
                    .slice([0..batch_size, 0..seq_len, idx..idx + 1])
                    .reshape([batch_size, seq_len]);
                emb.forward(codes)
            })
            .collect();

        Ok(Tensor::stack(embeddings, 2))
    }
}

#[derive(Config, Debug)]
pub struct CategoricalEmbeddingConfig {
    /// Past plus future steps.
    seq_len: usize,
    /// Future steps.
    lag: usize,
    d_model: usize,
    /// Dictionary size of each categorical variable.
    cardinalities: Vec<usize>,
}

impl CategoricalEmbeddingConfig {
    pub fn init<B: Backend>(&self) -> CategoricalEmbedding<B> {
        assert!(self.lag > 0 && self.lag < self.seq_len, "lag must lie inside the window");
        assert!(self.d_model > 0);

        let embedders = self
            .cardinalities
            .iter()
            .copied()
            .chain([self.seq_len, self.lag + 1, 2])
            .map(|size| EmbeddingConfig::new(size, self.d_model).init())
            .collect();

        CategoricalEmbedding {
            embedders,
            seq_len: self.seq_len,
            lag: self.lag,
        }
    }
}

/// Bias-free projection of a scalar series to `d_model`.
#[derive(Module, Debug)]
pub struct TargetEmbedding<B: Backend> {
    projection: Linear<B>,
}

impl<B: Backend> TargetEmbedding<B> {
    /// `[batch, seq, 1] -> [batch, seq, d_model]`
    pub fn forward(&self, y: Tensor<B, 3>) -> Tensor<B, 3> {
        self.projection.forward(y)
    }
}

#[derive(Config, Debug)]
pub struct TargetEmbeddingConfig {
    d_model: usize,
}

impl TargetEmbeddingConfig {
    pub fn init<B: Backend>(&self) -> TargetEmbedding<B> {
        TargetEmbedding {
            projection: LinearConfig::new(1, self.d_model).with_bias(false).init(),
        }
    }
}

/// One [`TargetEmbedding`] per numeric channel.
#[derive(Module, Debug)]
pub struct NumericEmbedding<B: Backend> {
    projectors: Vec<TargetEmbedding<B>>,
}

impl<B: Backend> NumericEmbedding<B> {
    /// `[batch, seq, channels] -> [batch, seq, channels, d_model]`
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 4> {
        let [batch_size, seq_len, channels] = x.dims();
        assert_eq!(channels, self.projectors.len(), "unexpected number of numeric channels");

        let embeddings = self
            .projectors
            .iter()
            .enumerate()
            .map(|(idx, proj)| {
                proj.forward(
                    x.clone()
                        .slice([0..batch_size, 0..seq_len, idx..idx + 1]),
                )
            })
            .collect();

        Tensor::stack(embeddings, 2)
    }
}

#[derive(Config, Debug)]
pub struct NumericEmbeddingConfig {
    channels: usize,
    d_model: usize,
}

impl NumericEmbeddingConfig {
    pub fn init<B: Backend>(&self) -> NumericEmbedding<B> {
        assert!(self.channels > 0, "numeric embedding needs at least one channel");

        NumericEmbedding {
            projectors: (0..self.channels)
                .map(|_| TargetEmbeddingConfig::new(self.d_model).init())
                .collect(),
        }
    }
}
