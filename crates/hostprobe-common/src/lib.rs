pub mod context;
pub mod types;

pub use context::{CancelHandle, Context, ContextError};
pub use types::{Category, MetricName, Sample};
