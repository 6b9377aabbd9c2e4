use burn::tensor::{backend::Backend, Tensor};
use burn::train::RegressionOutput;

use crate::data::ForecastBatch;
use crate::error::ForecastError;
use crate::loss::ForecastLoss;

pub mod attention;
pub mod dilated_conv;
pub mod lstm_baseline;
pub mod rnn;
pub mod tft;

/// Common surface of every forecasting network.
pub trait Forecaster<B: Backend> {
    /// Forecast `[batch, future_steps, out_channels, mul]`.
    fn forecast(&self, batch: &ForecastBatch<B>) -> Result<Tensor<B, 4>, ForecastError>;

    fn forecast_loss(&self) -> ForecastLoss;

    fn loss(&self, prediction: Tensor<B, 4>, batch: &ForecastBatch<B>) -> Tensor<B, 1> {
        self.forecast_loss().forward(prediction, batch.y.clone())
    }

    /// Loss plus the point forecast and the target, both flattened to
    /// `[batch, future_steps * out_channels]`.
    fn forward_regression(&self, batch: ForecastBatch<B>) -> Result<RegressionOutput<B>, ForecastError> {
        let prediction = self.forecast(&batch)?;
        let loss = self.loss(prediction.clone(), &batch);

        let point = self.forecast_loss().point_forecast(prediction);
        let [batch_size, steps, channels] = point.dims();
        let output = point.reshape([batch_size, steps * channels]);
        let targets = batch.y.reshape([batch_size, steps * channels]);

        Ok(RegressionOutput::new(loss, output, targets))
    }
}

/// Wires a [`Forecaster`] into the burn learner. The learner has no error channel,
/// so a malformed batch aborts the step.
macro_rules! learner_steps {
    ($model:ident) => {
        impl<B: burn::tensor::backend::AutodiffBackend>
            burn::train::TrainStep<$crate::data::ForecastBatch<B>, burn::train::RegressionOutput<B>>
            for $model<B>
        {
            fn step(
                &self,
                batch: $crate::data::ForecastBatch<B>,
            ) -> burn::train::TrainOutput<burn::train::RegressionOutput<B>> {
                let item = match $crate::models::Forecaster::forward_regression(self, batch) {
                    Ok(item) => item,
                    Err(err) => panic!("training step failed: {}", err),
                };
                burn::train::TrainOutput::new(self, item.loss.backward(), item)
            }
        }

        impl<B: burn::tensor::backend::Backend>
            burn::train::ValidStep<$crate::data::ForecastBatch<B>, burn::train::RegressionOutput<B>>
            for $model<B>
        {
            fn step(&self, batch: $crate::data::ForecastBatch<B>) -> burn::train::RegressionOutput<B> {
                match $crate::models::Forecaster::forward_regression(self, batch) {
                    Ok(item) => item,
                    Err(err) => panic!("validation step failed: {}", err),
                }
            }
        }
    };
}

pub(crate) use learner_steps;
