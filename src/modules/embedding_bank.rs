use burn::config::Config;
use burn::module::Module;
use burn::nn::{Embedding, EmbeddingConfig};
use burn::tensor::{backend::Backend, Int, Tensor};

use crate::error::ForecastError;

/// One lookup table per categorical variable. The tables are either summed into a
/// single `d_emb` wide feature or kept side by side.
#[derive(Module, Debug)]
pub struct EmbeddingBank<B: Backend> {
    embedders: Vec<Embedding<B>>,
    sum: bool,
    d_emb: usize,
}

impl<B: Backend> EmbeddingBank<B> {
    pub fn num_variables(&self) -> usize {
        self.embedders.len()
    }

    pub fn width(&self) -> usize {
        match (self.embedders.len(), self.sum) {
            (0, _) => 0,
            (_, true) => self.d_emb,
            (n, false) => n * self.d_emb,
        }
    }

    /// One `[batch, steps, d_emb]` tensor per variable, or a single one when summing.
    pub fn forward(
        &self,
        key: &'static str,
        codes: Tensor<B, 3, Int>,
    ) -> Result<Vec<Tensor<B, 3>>, ForecastError> {
        let [batch_size, steps, num_vars] = codes.dims();
        if num_vars != self.embedders.len() {
            return Err(ForecastError::ShapeMismatch {
                key,
                what: "variables",
                found: num_vars,
                expected: self.embedders.len(),
            });
        }

        let embedded: Vec<Tensor<B, 3>> = self
            .embedders
            .iter()
            .enumerate()
            .map(|(idx, emb)| {
                let var: Tensor<B, 2, Int> = codes
                    .clone()
                    .slice([0..batch_size, 0..steps, idx..idx + 1])
                    .reshape([batch_size, steps]);
                emb.forward(var)
            })
            .collect();

        if self.sum && !embedded.is_empty() {
            let summed = embedded
                .into_iter()
                .reduce(|acc, emb| acc + emb)
                .into_iter()
                .collect();
            Ok(summed)
        } else {
            Ok(embedded)
        }
    }
}

#[derive(Config, Debug)]
pub struct EmbeddingBankConfig {
    /// Largest code of each variable. Tables get one extra entry.
    cardinalities: Vec<usize>,
    d_emb: usize,

    #[config(default = false)]
    sum: bool,
}

impl EmbeddingBankConfig {
    pub fn init<B: Backend>(&self) -> EmbeddingBank<B> {
        assert!(self.d_emb > 0, "embedding width must be positive");

        EmbeddingBank {
            embedders: self
                .cardinalities
                .iter()
                .map(|k| EmbeddingConfig::new(k + 1, self.d_emb).init())
                .collect(),
            sum: self.sum,
            d_emb: self.d_emb,
        }
    }
}
