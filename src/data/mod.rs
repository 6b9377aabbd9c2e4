pub mod batch;
pub mod batcher;

pub(crate) use batch::check_channels;
pub use batch::{Covariates, ForecastBatch};
pub use batcher::{load_from_file, TimeSeriesItem, WindowBatcher};
