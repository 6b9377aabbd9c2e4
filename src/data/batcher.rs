use std::sync::Mutex;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::InMemDataset;
use burn::tensor::backend::Backend;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::batch::{check_channels, Covariates, ForecastBatch};
use crate::error::ForecastError;
use crate::utils::{float_tensor, int_tensor};

/// One multivariate series, stored time-major (`[time][channel]`).
///
/// `future_variables` are covariates known in advance (calendar, planned values) and
/// `categorical` holds integer codes; both share the time axis of `past_variables`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TimeSeriesItem {
    pub item_id: String,
    pub past_variables: Vec<Vec<f32>>,
    #[serde(default)]
    pub future_variables: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    pub categorical: Option<Vec<Vec<i64>>>,
}

impl TimeSeriesItem {
    pub fn len(&self) -> usize {
        self.past_variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.past_variables.is_empty()
    }
}

pub fn load_from_file(filename: &str) -> Result<InMemDataset<TimeSeriesItem>, std::io::Error> {
    InMemDataset::from_json_rows(filename)
}

/// Cuts one random window of `past_steps + future_steps` out of every item.
pub struct WindowBatcher<B: Backend> {
    device: B::Device,
    past_steps: usize,
    future_steps: usize,
    idx_target: Vec<usize>,
    rng: Mutex<StdRng>,
}

impl<B: Backend> WindowBatcher<B> {
    pub fn new(
        device: B::Device,
        past_steps: usize,
        future_steps: usize,
        idx_target: Vec<usize>,
        seed: u64,
    ) -> Self {
        assert!(past_steps > 0 && future_steps > 0, "window segments must be non empty");
        assert!(!idx_target.is_empty(), "at least one target channel is required");

        Self {
            device,
            past_steps,
            future_steps,
            idx_target,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn pivots(&self, items: &[TimeSeriesItem]) -> Vec<usize> {
        let total_len = self.past_steps + self.future_steps;
        let mut rng = match self.rng.lock() {
            Ok(rng) => rng,
            Err(poisoned) => poisoned.into_inner(),
        };

        items
            .iter()
            .map(|item| {
                assert!(
                    item.len() >= total_len,
                    "series `{}` has {} steps, a window needs {}",
                    item.item_id,
                    item.len(),
                    total_len
                );
                rng.gen_range(0..=item.len() - total_len)
            })
            .collect()
    }
}

// Every series must share the channel count of the first one and hold the targets.
fn past_channels(items: &[TimeSeriesItem], idx_target: &[usize]) -> Result<usize, ForecastError> {
    let channels = items.first().map(|item| width(&item.past_variables)).unwrap_or(0);
    if let Some(index) = idx_target.iter().copied().find(|idx| *idx >= channels) {
        return Err(ForecastError::TargetIndex { index, channels });
    }
    for item in items {
        for row in &item.past_variables {
            check_channels("x_num_past", row.len(), channels)?;
        }
    }

    Ok(channels)
}

fn window_rows<T: Copy>(rows: &[Vec<T>], start: usize, len: usize) -> Vec<T> {
    rows[start..start + len]
        .iter()
        .flat_map(|row| row.iter().copied())
        .collect()
}

fn width<T>(rows: &[Vec<T>]) -> usize {
    rows.first().map(|row| row.len()).unwrap_or(0)
}

impl<B: Backend> Batcher<TimeSeriesItem, ForecastBatch<B>> for WindowBatcher<B> {
    fn batch(&self, items: Vec<TimeSeriesItem>) -> ForecastBatch<B> {
        assert!(!items.is_empty(), "cannot assemble a batch without series");
        let num_channels = past_channels(&items, &self.idx_target)
            .unwrap_or_else(|err| panic!("invalid batch: {err}"));

        let batch_size = items.len();
        let past_len = self.past_steps;
        let future_len = self.future_steps;
        let pivots = self.pivots(&items);
        let x_num_past: Vec<f32> = items
            .iter()
            .zip(pivots.iter())
            .flat_map(|(item, pivot)| window_rows(&item.past_variables, *pivot, past_len))
            .collect();

        let y: Vec<f32> = items
            .iter()
            .zip(pivots.iter())
            .flat_map(|(item, pivot)| {
                item.past_variables[pivot + past_len..pivot + past_len + future_len]
                    .iter()
                    .flat_map(|row| self.idx_target.iter().map(move |idx| row[*idx]))
            })
            .collect();

        let x_num_future = items[0].future_variables.as_ref().map(|first| {
            let channels = width(first);
            let values: Vec<f32> = items
                .iter()
                .zip(pivots.iter())
                .flat_map(|(item, pivot)| {
                    let rows = item.future_variables.as_ref().unwrap_or_else(|| {
                        panic!("series `{}` has no future variables", item.item_id)
                    });
                    window_rows(rows, pivot + past_len, future_len)
                })
                .collect();
            float_tensor::<B, 3>(values, [batch_size, future_len, channels], &self.device)
        });

        let categorical = items[0].categorical.as_ref().map(|first| {
            let channels = width(first);
            let rows_of = |item: &TimeSeriesItem| {
                item.categorical.clone().unwrap_or_else(|| {
                    panic!("series `{}` has no categorical variables", item.item_id)
                })
            };
            let past: Vec<i64> = items
                .iter()
                .zip(pivots.iter())
                .flat_map(|(item, pivot)| window_rows(&rows_of(item), *pivot, past_len))
                .collect();
            let future: Vec<i64> = items
                .iter()
                .zip(pivots.iter())
                .flat_map(|(item, pivot)| window_rows(&rows_of(item), pivot + past_len, future_len))
                .collect();

            (
                int_tensor::<B, 3>(past, [batch_size, past_len, channels], &self.device),
                int_tensor::<B, 3>(future, [batch_size, future_len, channels], &self.device),
            )
        });

        let (x_cat_past, x_cat_future) = match categorical {
            Some((past, future)) => (Some(past), Some(future)),
            None => (None, None),
        };

        debug!(
            batch_size,
            num_channels,
            has_future_numeric = x_num_future.is_some(),
            has_categorical = x_cat_past.is_some(),
            "assembled forecast batch"
        );

        let covariates = Covariates::from_parts(x_num_future, x_cat_past, x_cat_future)
            .unwrap_or_else(|err| panic!("invalid covariates: {err}"));

        ForecastBatch::new(
            float_tensor::<B, 3>(x_num_past, [batch_size, past_len, num_channels], &self.device),
            float_tensor::<B, 3>(
                y,
                [batch_size, future_len, self.idx_target.len()],
                &self.device,
            ),
            self.idx_target.clone(),
            covariates,
        )
        .unwrap_or_else(|err| panic!("invalid batch: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn item(len: usize, with_covariates: bool) -> TimeSeriesItem {
        TimeSeriesItem {
            item_id: format!("series-{len}"),
            past_variables: (0..len).map(|t| vec![t as f32, 100.0 + t as f32]).collect(),
            future_variables: with_covariates.then(|| (0..len).map(|t| vec![-(t as f32)]).collect()),
            categorical: with_covariates.then(|| (0..len).map(|t| vec![(t % 7) as i64]).collect()),
        }
    }

    #[test]
    fn batch_has_window_shapes() {
        let batcher = WindowBatcher::<TestBackend>::new(Default::default(), 6, 2, vec![1], 7);

        let batch = batcher.batch(vec![item(20, true), item(30, true)]);

        assert_eq!(batch.x_num_past.dims(), [2, 6, 2]);
        assert_eq!(batch.y.dims(), [2, 2, 1]);
        assert!(matches!(batch.covariates, Covariates::Full { .. }));
        let (cat_past, cat_future) = batch.covariates.categorical().unwrap();
        assert_eq!(cat_past.dims(), [2, 6, 1]);
        assert_eq!(cat_future.dims(), [2, 2, 1]);
    }

    #[test]
    fn target_continues_the_past_window() {
        let batcher = WindowBatcher::<TestBackend>::new(Default::default(), 4, 3, vec![0], 1);

        let batch = batcher.batch(vec![item(7, false)]);

        let past = batch.x_num_past.into_data().convert::<f32>().value;
        let y = batch.y.into_data().convert::<f32>().value;
        assert_eq!(past, vec![0.0, 100.0, 1.0, 101.0, 2.0, 102.0, 3.0, 103.0]);
        assert_eq!(y, vec![4.0, 5.0, 6.0]);
        assert!(matches!(batch.covariates, Covariates::PastOnly));
    }

    #[test]
    fn target_indices_are_checked_before_windowing() {
        let items = vec![item(10, false)];

        assert_eq!(past_channels(&items, &[1]), Ok(2));
        assert_eq!(
            past_channels(&items, &[2]),
            Err(ForecastError::TargetIndex {
                index: 2,
                channels: 2
            })
        );
    }

    #[test]
    fn ragged_series_are_reported() {
        let mut ragged = item(10, false);
        ragged.past_variables[3].push(0.0);

        assert_eq!(
            past_channels(&[item(10, false), ragged], &[0]),
            Err(ForecastError::ShapeMismatch {
                key: "x_num_past",
                what: "channels",
                found: 3,
                expected: 2,
            })
        );
    }

    #[test]
    #[should_panic(expected = "target index 5")]
    fn out_of_range_target_panics_with_context() {
        let batcher = WindowBatcher::<TestBackend>::new(Default::default(), 4, 3, vec![5], 1);
        batcher.batch(vec![item(10, false)]);
    }

    #[test]
    #[should_panic(expected = "without series")]
    fn empty_batches_are_rejected() {
        let batcher = WindowBatcher::<TestBackend>::new(Default::default(), 4, 3, vec![0], 1);
        batcher.batch(Vec::new());
    }

    #[test]
    #[should_panic]
    fn short_series_are_rejected() {
        let batcher = WindowBatcher::<TestBackend>::new(Default::default(), 4, 3, vec![0], 1);
        batcher.batch(vec![item(5, false)]);
    }
}
