/// Check registry, check passes and report folding
pub mod health_checker;
/// Built-in checks
pub mod checks;

pub use checks::{
    AggregatorHealthCheck, DispatcherHealthCheck, ProcessHealthCheck, ServiceHealthCheck,
    ServiceStatus, ServiceStatusProvider, SystemHealthCheck,
};
pub use health_checker::{
    determine_overall_status, CheckContext, CheckerStatus, ComponentHealth, HealthCheck,
    HealthChecker, HealthCheckerConfig, HealthReport, HealthStatus,
};
