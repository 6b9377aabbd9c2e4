use thiserror::Error;

/// Batch contract violations detected while running a forward pass.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForecastError {
    #[error("batch has no `{key}` but {model} requires it")]
    MissingCovariate {
        key: &'static str,
        model: &'static str,
    },

    #[error("nothing to feed the decoder: batch has neither `x_num_future` nor `x_cat_future`")]
    EmptyDecoderInput,

    #[error("`x_cat_past` and `x_cat_future` must be given together")]
    InconsistentCategorical,

    #[error("`{key}` has {found} {what}, expected {expected}")]
    ShapeMismatch {
        key: &'static str,
        what: &'static str,
        found: usize,
        expected: usize,
    },

    #[error("target index {index} is out of range for {channels} past channels")]
    TargetIndex { index: usize, channels: usize },
}
