use burn::tensor::{backend::Backend, Tensor};

/// Forecast error of one target channel at one lead time.
#[derive(Debug, Clone, PartialEq)]
pub struct LagError {
    pub channel: usize,
    /// Lead time, starting at 1 for the first future step.
    pub lag: usize,
    pub mse: f64,
    pub rmse: f64,
    /// Mean absolute percentage error, in percent. `NaN` when no pair has a finite ratio.
    pub mape: f64,
}

/// Per channel and per lag errors of a point forecast `[N, F, C]` against its
/// target `[N, F, C]`. Pairs where either side is not finite are skipped.
pub fn lag_errors<B: Backend>(prediction: Tensor<B, 3>, target: Tensor<B, 3>) -> Vec<LagError> {
    assert_eq!(prediction.dims(), target.dims(), "prediction and target shapes differ");
    let [batch, steps, channels] = prediction.dims();

    let prediction = prediction.into_data().convert::<f64>().value;
    let target = target.into_data().convert::<f64>().value;

    let mut errors = Vec::with_capacity(steps * channels);
    for channel in 0..channels {
        for step in 0..steps {
            let pairs: Vec<(f64, f64)> = (0..batch)
                .map(|n| {
                    let idx = (n * steps + step) * channels + channel;
                    (prediction[idx], target[idx])
                })
                .filter(|(p, t)| p.is_finite() && t.is_finite())
                .collect();

            let mse = mean(pairs.iter().map(|(p, t)| (p - t).powi(2)));
            let mape = mean(
                pairs
                    .iter()
                    .map(|(p, t)| 100.0 * (p - t).abs() / t)
                    .filter(|ratio| ratio.is_finite()),
            );

            errors.push(LagError {
                channel,
                lag: step + 1,
                mse,
                rmse: mse.sqrt(),
                mape,
            });
        }
    }

    errors
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::float_tensor;
    use burn::backend::NdArray;

    #[test]
    fn errors_are_reported_per_lag() {
        let device = Default::default();
        let prediction = float_tensor::<NdArray, 3>(vec![1.0, 2.0, 3.0, 6.0], [2, 2, 1], &device);
        let target = float_tensor::<NdArray, 3>(vec![2.0, 2.0, 2.0, 4.0], [2, 2, 1], &device);

        let errors = lag_errors(prediction, target);

        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].lag, 1);
        assert!((errors[0].mse - 1.0).abs() < 1e-9);
        assert!((errors[0].mape - 50.0).abs() < 1e-9);
        assert!((errors[1].mse - 2.0).abs() < 1e-9);
        assert!((errors[1].rmse - 2.0f64.sqrt()).abs() < 1e-9);
        assert!((errors[1].mape - 25.0).abs() < 1e-9);
    }

    #[test]
    fn non_finite_pairs_are_skipped() {
        let device = Default::default();
        let prediction = float_tensor::<NdArray, 3>(vec![f32::NAN, 1.0], [2, 1, 1], &device);
        let target = float_tensor::<NdArray, 3>(vec![1.0, 0.0], [2, 1, 1], &device);

        let errors = lag_errors(prediction, target);

        assert!((errors[0].mse - 1.0).abs() < 1e-9);
        // the only remaining pair divides by a zero target
        assert!(errors[0].mape.is_nan());
    }
}
