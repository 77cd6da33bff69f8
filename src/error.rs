use thiserror::Error;

/// Errors returned by the event dispatcher
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("dispatcher is already running")]
    AlreadyRunning,

    #[error("invalid event handler: {0}")]
    InvalidHandler(String),

    #[error("event queue is full, event dropped")]
    QueueFull,

    #[error("event queue is closed")]
    QueueClosed,
}

/// Errors an event handler can report back to the dispatcher
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("event is missing required field: {0}")]
    MissingField(&'static str),

    #[error("handler failed: {0}")]
    Failed(String),
}

/// Errors returned by the health checker
#[derive(Error, Debug)]
pub enum HealthError {
    #[error("health checker is already running")]
    AlreadyRunning,

    #[error("invalid health check: {0}")]
    InvalidCheck(String),
}

/// Errors returned by the log aggregator
#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error("aggregator sweeper is already running")]
    AlreadyRunning,
}

/// Errors produced while decoding raw adapter events
#[derive(Error, Debug)]
pub enum EventError {
    #[error("failed to parse event line: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}
