//! Multivariate time series forecasting networks built on burn.
//!
//! Five model families share one batch contract ([`data::ForecastBatch`]) and one
//! output contract (`[batch, future_steps, out_channels, quantiles_or_1]`):
//!
//! - [`models::tft::TemporalFusion`]: variable selection, LSTM encoder/decoder and
//!   interpretable multi-head attention.
//! - [`models::rnn::Rnn`]: convolution + LSTM encoder/decoder.
//! - [`models::dilated_conv::DilatedConv`]: dilated convolution blocks + LSTM or GRU
//!   with per-step output heads.
//! - [`models::attention::Attention`]: transformer encoder/decoder with autoregressive
//!   inference.
//! - [`models::lstm_baseline::LstmBaseline`]: LSTM with a linear projection to the
//!   horizon.

pub mod data;
pub mod error;
pub mod loss;
pub mod metrics;
pub mod models;
pub mod modules;
pub mod utils;

pub use error::ForecastError;
