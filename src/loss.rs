use burn::tensor::{backend::Backend, Tensor};

/// Training objective, fixed at construction by the quantile list.
#[derive(Debug, Clone, PartialEq)]
pub enum ForecastLoss {
    /// Mean absolute error on a single point forecast.
    L1,
    /// Pinball loss evaluated at every quantile level.
    Quantile(Vec<f32>),
}

impl ForecastLoss {
    /// An empty list selects the L1 loss, exactly three levels select the quantile loss.
    pub fn from_quantiles(quantiles: &[f32]) -> Self {
        assert!(
            quantiles.is_empty() || quantiles.len() == 3,
            "expected either no quantiles or exactly 3, got {:?}",
            quantiles
        );
        assert!(
            quantiles.iter().all(|q| *q > 0.0 && *q < 1.0),
            "quantile levels must lie in (0, 1), got {:?}",
            quantiles
        );

        if quantiles.is_empty() {
            ForecastLoss::L1
        } else {
            ForecastLoss::Quantile(quantiles.to_vec())
        }
    }

    /// Size of the last output dimension.
    pub fn multiplier(&self) -> usize {
        match self {
            ForecastLoss::L1 => 1,
            ForecastLoss::Quantile(quantiles) => quantiles.len(),
        }
    }

    /// Output slot holding the point forecast (the median when quantiles are used).
    pub fn point_index(&self) -> usize {
        match self {
            ForecastLoss::L1 => 0,
            ForecastLoss::Quantile(quantiles) => quantiles.len() / 2,
        }
    }

    /// Point forecast `[N, F, C]` out of a model output `[N, F, C, mul]`.
    pub fn point_forecast<B: Backend>(&self, prediction: Tensor<B, 4>) -> Tensor<B, 3> {
        let [batch, steps, channels, _] = prediction.dims();
        let idx = self.point_index();
        prediction
            .slice([0..batch, 0..steps, 0..channels, idx..idx + 1])
            .squeeze(3)
    }

    pub fn forward<B: Backend>(&self, prediction: Tensor<B, 4>, target: Tensor<B, 3>) -> Tensor<B, 1> {
        match self {
            ForecastLoss::L1 => l1_loss(self.point_forecast(prediction), target),
            ForecastLoss::Quantile(quantiles) => quantile_loss(prediction, target, quantiles),
        }
    }
}

pub fn l1_loss<B: Backend, const D: usize>(prediction: Tensor<B, D>, target: Tensor<B, D>) -> Tensor<B, 1> {
    (prediction - target).abs().mean()
}

/// Pinball loss `max(q * e, (q - 1) * e)` with `e = target - prediction`, averaged over
/// every element and quantile level.
pub fn quantile_loss<B: Backend>(
    prediction: Tensor<B, 4>,
    target: Tensor<B, 3>,
    quantiles: &[f32],
) -> Tensor<B, 1> {
    let [batch, steps, channels, _] = prediction.dims();

    let losses: Vec<Tensor<B, 1>> = quantiles
        .iter()
        .enumerate()
        .map(|(idx, q)| {
            let pred: Tensor<B, 3> = prediction
                .clone()
                .slice([0..batch, 0..steps, 0..channels, idx..idx + 1])
                .squeeze(3);
            let residual = target.clone() - pred;
            let under = residual.clone().lower_elem(0.0).float();
            (residual * (under.neg() + *q)).mean()
        })
        .collect();

    Tensor::cat(losses, 0).mean()
}

/// Negative distance between the point forecast and the last observed value repeated
/// over the horizon. Minimising it pushes forecasts away from plain persistence.
pub fn persistence_loss<B: Backend>(point: Tensor<B, 3>, last_observed: Tensor<B, 3>) -> Tensor<B, 1> {
    let [_, steps, _] = point.dims();
    l1_loss(last_observed.repeat(1, steps), point).neg()
}
