/// Bounded event queue and handler fan-out
pub mod event_dispatcher;
/// Handlers for the built-in event types
pub mod handlers;

pub use event_dispatcher::{
    Dispatcher, DispatcherConfig, DispatcherStats, DispatcherStatsSource, EventHandler,
};
pub use handlers::{
    ConfigHandler, ErrorHandler, ErrorRecord, HealthHandler, HealthRecord, LogHandler,
    StatusHandler,
};
