use burn::tensor::{backend::Backend, Int, Tensor};

use crate::error::ForecastError;

/// Optional covariates of a batch, decided once when the batch is assembled.
#[derive(Clone, Debug)]
pub enum Covariates<B: Backend> {
    PastOnly,
    FutureNumeric {
        x_num_future: Tensor<B, 3>, // [N, F, C_f]
    },
    Categorical {
        x_cat_past: Tensor<B, 3, Int>,   // [N, P, V]
        x_cat_future: Tensor<B, 3, Int>, // [N, F, V]
    },
    Full {
        x_num_future: Tensor<B, 3>,
        x_cat_past: Tensor<B, 3, Int>,
        x_cat_future: Tensor<B, 3, Int>,
    },
}

impl<B: Backend> Covariates<B> {
    pub fn from_parts(
        x_num_future: Option<Tensor<B, 3>>,
        x_cat_past: Option<Tensor<B, 3, Int>>,
        x_cat_future: Option<Tensor<B, 3, Int>>,
    ) -> Result<Self, ForecastError> {
        match (x_num_future, x_cat_past, x_cat_future) {
            (None, None, None) => Ok(Covariates::PastOnly),
            (Some(x_num_future), None, None) => Ok(Covariates::FutureNumeric { x_num_future }),
            (None, Some(x_cat_past), Some(x_cat_future)) => Ok(Covariates::Categorical {
                x_cat_past,
                x_cat_future,
            }),
            (Some(x_num_future), Some(x_cat_past), Some(x_cat_future)) => Ok(Covariates::Full {
                x_num_future,
                x_cat_past,
                x_cat_future,
            }),
            _ => Err(ForecastError::InconsistentCategorical),
        }
    }

    pub fn x_num_future(&self) -> Option<&Tensor<B, 3>> {
        match self {
            Covariates::FutureNumeric { x_num_future } | Covariates::Full { x_num_future, .. } => {
                Some(x_num_future)
            }
            _ => None,
        }
    }

    /// Past and future categorical covariates, always available together.
    pub fn categorical(&self) -> Option<(&Tensor<B, 3, Int>, &Tensor<B, 3, Int>)> {
        match self {
            Covariates::Categorical {
                x_cat_past,
                x_cat_future,
            }
            | Covariates::Full {
                x_cat_past,
                x_cat_future,
                ..
            } => Some((x_cat_past, x_cat_future)),
            _ => None,
        }
    }

    pub fn has_future(&self) -> bool {
        !matches!(self, Covariates::PastOnly)
    }
}

/// One batch of forecasting windows. Past and future segments are contiguous along
/// the time axis and split at the forecast boundary.
#[derive(Clone, Debug)]
pub struct ForecastBatch<B: Backend> {
    pub x_num_past: Tensor<B, 3>, // [N, P, C_p]
    pub y: Tensor<B, 3>,          // [N, F, C_out]
    pub idx_target: Vec<usize>,   // target channels inside x_num_past
    pub covariates: Covariates<B>,
}

impl<B: Backend> ForecastBatch<B> {
    pub fn new(
        x_num_past: Tensor<B, 3>,
        y: Tensor<B, 3>,
        idx_target: Vec<usize>,
        covariates: Covariates<B>,
    ) -> Result<Self, ForecastError> {
        let [batch_size, _, channels] = x_num_past.dims();
        if let Some(index) = idx_target.iter().copied().find(|idx| *idx >= channels) {
            return Err(ForecastError::TargetIndex { index, channels });
        }
        let [y_batch, _, y_channels] = y.dims();
        if y_batch != batch_size {
            return Err(ForecastError::ShapeMismatch {
                key: "y",
                what: "rows",
                found: y_batch,
                expected: batch_size,
            });
        }
        check_channels("y", y_channels, idx_target.len())?;

        Ok(Self {
            x_num_past,
            y,
            idx_target,
            covariates,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.x_num_past.dims()[0]
    }

    pub fn past_steps(&self) -> usize {
        self.x_num_past.dims()[1]
    }

    /// Target channels of the past numeric covariates, `[N, P, C_out]`.
    pub fn target_past(&self) -> Tensor<B, 3> {
        let [batch, steps, _] = self.x_num_past.dims();
        let channels: Vec<Tensor<B, 3>> = self
            .idx_target
            .iter()
            .map(|idx| {
                self.x_num_past
                    .clone()
                    .slice([0..batch, 0..steps, *idx..*idx + 1])
            })
            .collect();

        Tensor::cat(channels, 2)
    }

    /// Last observed value of every target channel, `[N, 1, C_out]`.
    pub fn last_target(&self) -> Tensor<B, 3> {
        let target = self.target_past();
        let [batch, steps, channels] = target.dims();
        target.slice([0..batch, steps - 1..steps, 0..channels])
    }

    pub fn require_x_num_future(&self, model: &'static str) -> Result<&Tensor<B, 3>, ForecastError> {
        self.covariates
            .x_num_future()
            .ok_or(ForecastError::MissingCovariate {
                key: "x_num_future",
                model,
            })
    }

    pub fn require_categorical(
        &self,
        model: &'static str,
    ) -> Result<(&Tensor<B, 3, Int>, &Tensor<B, 3, Int>), ForecastError> {
        self.covariates
            .categorical()
            .ok_or(ForecastError::MissingCovariate {
                key: "x_cat_past",
                model,
            })
    }

    /// Checks the time length of every tensor against the configured window.
    pub fn check_window(&self, past_steps: usize, future_steps: usize) -> Result<(), ForecastError> {
        check_steps("x_num_past", self.past_steps(), past_steps)?;
        check_steps("y", self.y.dims()[1], future_steps)?;
        if let Some(x_num_future) = self.covariates.x_num_future() {
            check_steps("x_num_future", x_num_future.dims()[1], future_steps)?;
        }
        if let Some((x_cat_past, x_cat_future)) = self.covariates.categorical() {
            check_steps("x_cat_past", x_cat_past.dims()[1], past_steps)?;
            check_steps("x_cat_future", x_cat_future.dims()[1], future_steps)?;
        }
        Ok(())
    }

    /// Checks that `y` carries one channel per forecast output.
    pub fn check_targets(&self, out_channels: usize) -> Result<(), ForecastError> {
        check_channels("y", self.y.dims()[2], out_channels)
    }
}

fn check_steps(key: &'static str, found: usize, expected: usize) -> Result<(), ForecastError> {
    if found == expected {
        Ok(())
    } else {
        Err(ForecastError::ShapeMismatch {
            key,
            what: "steps",
            found,
            expected,
        })
    }
}

pub(crate) fn check_channels(key: &'static str, found: usize, expected: usize) -> Result<(), ForecastError> {
    if found == expected {
        Ok(())
    } else {
        Err(ForecastError::ShapeMismatch {
            key,
            what: "channels",
            found,
            expected,
        })
    }
}
