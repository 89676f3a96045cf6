pub mod simulation;
pub mod sinks;

pub use simulation::SimulationConfig;
pub use sinks::{DashboardConfig, ServerConfig, StoreConfig};

/// Seconds values must be positive and small enough to become a `Duration`.
pub(crate) fn is_valid_secs(value: f64) -> bool {
    value > 0.0 && std::time::Duration::try_from_secs_f64(value).is_ok()
}
