/// Error types for the agent core
pub mod error;

/// Event envelope and adapter line format
pub mod events;

/// Injectable time source
pub mod clock;

/// Bounded event queue with per-type handler fan-out
pub mod dispatcher;

/// Periodic, concurrency-limited health checking
pub mod health;

/// Bounded in-memory log store
pub mod aggregator;

/// Process and host resource snapshots
pub mod monitoring;

/// Configuration management
pub mod config;

mod worker;

// Re-export commonly used types
pub use error::{AggregatorError, ConfigError, DispatchError, HandlerError, HealthError};
pub use events::{Event, EventData, EventType, Timestamp};
