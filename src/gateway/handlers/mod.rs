pub mod health;
pub mod metrics;

pub use health::{HealthReport, LoopHealth, evaluate, health_check};
pub use metrics::get_metrics;
