mod error;
mod tuning;

pub use error::ConfigError;
pub use tuning::{SoftmaxOrdering, TuningConfig};
