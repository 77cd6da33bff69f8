//! Concrete event handlers registered by the agent

use super::event_dispatcher::EventHandler;
use crate::aggregator::{LogEntry, LogLevel, MemoryAggregator};
use crate::error::HandlerError;
use crate::events::{Event, EventData, EventType, Timestamp};
use chrono::Utc;
use log::{debug, log};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type HandleFuture<'a> = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>>;

/// Number of error records kept by [`ErrorHandler`]
pub const MAX_ERROR_RECORDS: usize = 100;

fn log_level_to_facade(level: LogLevel) -> log::Level {
    match level {
        LogLevel::Debug => log::Level::Debug,
        LogLevel::Info => log::Level::Info,
        LogLevel::Warn => log::Level::Warn,
        LogLevel::Error => log::Level::Error,
    }
}

fn merge_into(target: &RwLock<EventData>, data: &EventData) {
    let mut target = target.write();
    for (key, value) in data {
        target.insert(key.clone(), value.clone());
    }
}

/// Re-emits `log` events through the logging facade
///
/// With a sink attached, each message is also stored in the aggregator.
#[derive(Debug, Default)]
pub struct LogHandler {
    sink: Option<Arc<MemoryAggregator>>,
}

impl LogHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(sink: Arc<MemoryAggregator>) -> Self {
        Self { sink: Some(sink) }
    }
}

impl EventHandler for LogHandler {
    fn handle(&self, _ctx: CancellationToken, event: Event) -> HandleFuture<'_> {
        Box::pin(async move {
            let message = event
                .data_str("message")
                .ok_or(HandlerError::MissingField("message"))?
                .to_string();
            let level = event
                .data_str("level")
                .and_then(LogLevel::parse)
                .unwrap_or(LogLevel::Info);

            log!(
                log_level_to_facade(level),
                "[{}] {}",
                event.source,
                message
            );

            if let Some(sink) = &self.sink {
                let mut metadata = event.data;
                metadata.remove("message");
                metadata.remove("level");

                let mut entry = LogEntry::new(level, message)
                    .with_source(event.source)
                    .with_metadata(metadata);
                entry.timestamp = event.timestamp;
                sink.add(entry);
            }
            Ok(())
        })
    }

    fn name(&self) -> &str {
        "log_handler"
    }

    fn supported_types(&self) -> Vec<EventType> {
        vec![EventType::Log]
    }
}

/// Keeps the merged contents of every `config` event
#[derive(Debug, Default)]
pub struct ConfigHandler {
    config: RwLock<EventData>,
}

impl ConfigHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(&self) -> EventData {
        self.config.read().clone()
    }
}

impl EventHandler for ConfigHandler {
    fn handle(&self, _ctx: CancellationToken, event: Event) -> HandleFuture<'_> {
        Box::pin(async move {
            merge_into(&self.config, &event.data);
            debug!(
                "Configuration updated: source={}, keys={}",
                event.source,
                event.data.len()
            );
            Ok(())
        })
    }

    fn name(&self) -> &str {
        "config_handler"
    }

    fn supported_types(&self) -> Vec<EventType> {
        vec![EventType::Config]
    }
}

/// One `error` event as recorded by [`ErrorHandler`]
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorRecord {
    pub timestamp: Timestamp,
    pub error: String,
    pub source: String,
    pub data: EventData,
}

/// Keeps the most recent [`MAX_ERROR_RECORDS`] error events
#[derive(Debug, Default)]
pub struct ErrorHandler {
    errors: RwLock<VecDeque<ErrorRecord>>,
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded errors, oldest first
    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.errors.read().iter().cloned().collect()
    }
}

impl EventHandler for ErrorHandler {
    fn handle(&self, _ctx: CancellationToken, event: Event) -> HandleFuture<'_> {
        Box::pin(async move {
            let record = ErrorRecord {
                timestamp: event.timestamp.unwrap_or_else(Utc::now),
                error: event
                    .data_str("error")
                    .unwrap_or("Unknown error")
                    .to_string(),
                source: event.source,
                data: event.data,
            };

            let mut errors = self.errors.write();
            if errors.len() == MAX_ERROR_RECORDS {
                errors.pop_front();
            }
            errors.push_back(record);
            Ok(())
        })
    }

    fn name(&self) -> &str {
        "error_handler"
    }

    fn supported_types(&self) -> Vec<EventType> {
        vec![EventType::Error]
    }
}

/// Keeps the merged contents of every `status` event
#[derive(Debug, Default)]
pub struct StatusHandler {
    status: RwLock<EventData>,
}

impl StatusHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> EventData {
        self.status.read().clone()
    }
}

impl EventHandler for StatusHandler {
    fn handle(&self, _ctx: CancellationToken, event: Event) -> HandleFuture<'_> {
        Box::pin(async move {
            merge_into(&self.status, &event.data);
            Ok(())
        })
    }

    fn name(&self) -> &str {
        "status_handler"
    }

    fn supported_types(&self) -> Vec<EventType> {
        vec![EventType::Status]
    }
}

/// Latest `health` event seen for one component
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthRecord {
    pub status: String,
    pub timestamp: Timestamp,
    pub data: EventData,
}

/// Tracks the last reported health of each component
#[derive(Debug, Default)]
pub struct HealthHandler {
    health: RwLock<HashMap<String, HealthRecord>>,
}

impl HealthHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn health(&self) -> HashMap<String, HealthRecord> {
        self.health.read().clone()
    }
}

impl EventHandler for HealthHandler {
    fn handle(&self, _ctx: CancellationToken, event: Event) -> HandleFuture<'_> {
        Box::pin(async move {
            let component = event.data_str("component").unwrap_or("unknown").to_string();
            let record = HealthRecord {
                status: event.data_str("status").unwrap_or("unknown").to_string(),
                timestamp: event.timestamp.unwrap_or_else(Utc::now),
                data: event.data,
            };

            debug!(
                "Component health updated: component={}, status={}",
                component, record.status
            );
            self.health.write().insert(component, record);
            Ok(())
        })
    }

    fn name(&self) -> &str {
        "health_handler"
    }

    fn supported_types(&self) -> Vec<EventType> {
        vec![EventType::Health]
    }
}
