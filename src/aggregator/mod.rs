/// Bounded in-memory log store
pub mod memory;

pub use memory::{
    AggregatorConfig, AggregatorStats, AggregatorStatsSource, LogEntry, LogLevel,
    MemoryAggregator,
};
