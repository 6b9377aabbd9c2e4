pub mod attention;
pub mod embedding;
pub mod glu;
pub mod grn;
pub mod model;
pub mod post;
pub mod sequence;
pub mod vsn;

pub use model::{TemporalFusion, TemporalFusionConfig, TftOutput};
