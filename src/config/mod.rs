/// Layered TOML and environment configuration
pub mod settings;

pub use settings::{
    AggregatorSettings, Config, DispatcherSettings, HealthSettings, LoggingSettings,
    ENV_LOG_LEVEL, ENV_MAX_ENTRIES, ENV_QUEUE_CAPACITY, MAX_PERIOD_SECONDS,
};
