//! Built-in health checks

use super::health_checker::{CheckContext, ComponentHealth, HealthCheck, HealthStatus};
use crate::aggregator::AggregatorStatsSource;
use crate::clock::Clock;
use crate::dispatcher::DispatcherStatsSource;
use crate::events::{EventData, Timestamp};
use crate::monitoring::{HostMemory, ProcessSnapshot};
use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type CheckFuture<'a> = Pin<Box<dyn Future<Output = ComponentHealth> + Send + 'a>>;

fn into_data(value: Value) -> EventData {
    match value {
        Value::Object(map) => map,
        _ => EventData::new(),
    }
}

/// Whole seconds between `since` and `now`, `None` if `since` is unset
fn seconds_since(now: Timestamp, since: Option<Timestamp>) -> Option<i64> {
    since.map(|since| (now - since).num_seconds())
}

/// `part / whole` as a percentage, 0 when `whole` is 0
fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

type MemorySource = Box<dyn Fn() -> Option<HostMemory> + Send + Sync>;

/// Host memory pressure
pub struct SystemHealthCheck {
    clock: Arc<dyn Clock>,
    memory: MemorySource,
}

impl SystemHealthCheck {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_memory_source(clock, HostMemory::read)
    }

    pub fn with_memory_source(
        clock: Arc<dyn Clock>,
        memory: impl Fn() -> Option<HostMemory> + Send + Sync + 'static,
    ) -> Self {
        Self {
            clock,
            memory: Box::new(memory),
        }
    }
}

impl HealthCheck for SystemHealthCheck {
    fn name(&self) -> &str {
        "system"
    }

    fn check(&self, _ctx: CheckContext) -> CheckFuture<'_> {
        Box::pin(async move {
            let now = self.clock.now();
            let snapshot = ProcessSnapshot::capture();

            let Some(memory) = (self.memory)() else {
                return ComponentHealth::new(
                    self.name(),
                    HealthStatus::Unknown,
                    "Host memory statistics unavailable",
                    now,
                )
                .with_data(into_data(json!({
                    "process_memory_bytes": snapshot.memory_usage_bytes,
                    "cpu_count": snapshot.cpu_count,
                })));
            };

            let used_percent = memory.used_percent();
            let (status, message) = if used_percent > 90.0 {
                (HealthStatus::Unhealthy, "Memory usage is critically high")
            } else if used_percent > 75.0 {
                (HealthStatus::Degraded, "Memory usage is high")
            } else {
                (HealthStatus::Healthy, "System resources are healthy")
            };

            ComponentHealth::new(self.name(), status, message, now).with_data(into_data(json!({
                "memory_usage_percent": used_percent,
                "memory_total_bytes": memory.total_bytes,
                "memory_available_bytes": memory.available_bytes,
                "process_memory_bytes": snapshot.memory_usage_bytes,
                "cpu_count": snapshot.cpu_count,
            })))
        })
    }
}

/// State of a supervised service as seen by its health check
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub running: bool,
    pub last_run: Option<Timestamp>,
    pub last_error: Option<String>,
}

/// Anything that can report the state of a supervised service
#[cfg_attr(test, mockall::automock)]
pub trait ServiceStatusProvider: Send + Sync {
    fn service_status(&self) -> ServiceStatus;
}

/// Liveness and freshness of a supervised service
pub struct ServiceHealthCheck {
    name: String,
    service: Arc<dyn ServiceStatusProvider>,
    clock: Arc<dyn Clock>,
    stale_after: chrono::Duration,
}

impl ServiceHealthCheck {
    pub fn new(
        name: impl Into<String>,
        service: Arc<dyn ServiceStatusProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            service,
            clock,
            stale_after: chrono::Duration::minutes(5),
        }
    }
}

impl HealthCheck for ServiceHealthCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, _ctx: CheckContext) -> CheckFuture<'_> {
        Box::pin(async move {
            let now = self.clock.now();
            let status = self.service.service_status();
            let last_error = status.last_error.as_deref().unwrap_or_default();
            let stale = status
                .last_run
                .map_or(true, |last_run| now - last_run > self.stale_after);

            let (health, message) = if !status.running {
                (
                    HealthStatus::Unhealthy,
                    format!("{} service is not running", self.name),
                )
            } else if !last_error.is_empty() {
                (
                    HealthStatus::Degraded,
                    format!("{} service has errors", self.name),
                )
            } else if stale {
                (
                    HealthStatus::Degraded,
                    format!("{} service hasn't run recently", self.name),
                )
            } else {
                (
                    HealthStatus::Healthy,
                    format!("{} service is healthy", self.name),
                )
            };

            ComponentHealth::new(&self.name, health, message, now).with_data(into_data(json!({
                "running": status.running,
                "last_run": status.last_run,
                "last_error": last_error,
                "seconds_since_last_run": seconds_since(now, status.last_run),
            })))
        })
    }
}

/// Error and drop rates of the event dispatcher
pub struct DispatcherHealthCheck {
    dispatcher: Arc<dyn DispatcherStatsSource>,
    clock: Arc<dyn Clock>,
}

impl DispatcherHealthCheck {
    pub fn new(dispatcher: Arc<dyn DispatcherStatsSource>, clock: Arc<dyn Clock>) -> Self {
        Self { dispatcher, clock }
    }
}

impl HealthCheck for DispatcherHealthCheck {
    fn name(&self) -> &str {
        "dispatcher"
    }

    fn check(&self, _ctx: CheckContext) -> CheckFuture<'_> {
        Box::pin(async move {
            let now = self.clock.now();
            let stats = self.dispatcher.dispatcher_stats();

            let error_rate = percent(stats.errors, stats.events_processed);
            let drop_rate = percent(
                stats.events_dropped,
                stats.events_processed + stats.events_dropped,
            );
            let idle = stats
                .last_event_time
                .map_or(true, |last| now - last > chrono::Duration::minutes(10));

            let (status, message) = if error_rate > 10.0 {
                (HealthStatus::Unhealthy, "High error rate in event processing")
            } else if error_rate > 5.0 || drop_rate > 5.0 {
                (HealthStatus::Degraded, "Elevated error or drop rate")
            } else if idle {
                (HealthStatus::Degraded, "No recent events processed")
            } else {
                (HealthStatus::Healthy, "Event dispatcher is healthy")
            };

            ComponentHealth::new(self.name(), status, message, now).with_data(into_data(json!({
                "events_processed": stats.events_processed,
                "events_dropped": stats.events_dropped,
                "errors": stats.errors,
                "error_rate": error_rate,
                "drop_rate": drop_rate,
                "last_event_time": stats.last_event_time,
                "seconds_since_last_event": seconds_since(now, stats.last_event_time),
            })))
        })
    }
}

/// Drop rate and freshness of the log aggregator
pub struct AggregatorHealthCheck {
    aggregator: Arc<dyn AggregatorStatsSource>,
    clock: Arc<dyn Clock>,
}

impl AggregatorHealthCheck {
    pub fn new(aggregator: Arc<dyn AggregatorStatsSource>, clock: Arc<dyn Clock>) -> Self {
        Self { aggregator, clock }
    }
}

impl HealthCheck for AggregatorHealthCheck {
    fn name(&self) -> &str {
        "aggregator"
    }

    fn check(&self, _ctx: CheckContext) -> CheckFuture<'_> {
        Box::pin(async move {
            let now = self.clock.now();
            let stats = self.aggregator.aggregator_stats();

            let drop_rate = percent(stats.dropped_entries, stats.total_entries);
            let stale = stats
                .newest_entry
                .map_or(true, |newest| now - newest > chrono::Duration::minutes(5));

            let (status, message) = if drop_rate > 10.0 {
                (HealthStatus::Unhealthy, "High log entry drop rate")
            } else if drop_rate > 5.0 {
                (HealthStatus::Degraded, "Elevated log entry drop rate")
            } else if stale {
                (HealthStatus::Degraded, "No recent log entries")
            } else {
                (HealthStatus::Healthy, "Log aggregator is healthy")
            };

            ComponentHealth::new(self.name(), status, message, now).with_data(into_data(json!({
                "total_entries": stats.total_entries,
                "current_entries": stats.current_entries,
                "dropped_entries": stats.dropped_entries,
                "drop_rate": drop_rate,
                "newest_entry": stats.newest_entry,
                "seconds_since_newest_entry": seconds_since(now, stats.newest_entry),
            })))
        })
    }
}

/// Reports a warm-up period after process start
pub struct ProcessHealthCheck {
    start_time: Timestamp,
    clock: Arc<dyn Clock>,
}

impl ProcessHealthCheck {
    pub fn new(start_time: Timestamp, clock: Arc<dyn Clock>) -> Self {
        Self { start_time, clock }
    }
}

impl HealthCheck for ProcessHealthCheck {
    fn name(&self) -> &str {
        "process"
    }

    fn check(&self, _ctx: CheckContext) -> CheckFuture<'_> {
        Box::pin(async move {
            let now = self.clock.now();
            let uptime = now - self.start_time;

            let (status, message) = if uptime < chrono::Duration::seconds(30) {
                (HealthStatus::Degraded, "Process recently started")
            } else {
                (HealthStatus::Healthy, "Process is running normally")
            };

            ComponentHealth::new(self.name(), status, message, now).with_data(into_data(json!({
                "uptime_seconds": uptime.num_seconds(),
                "start_time": self.start_time,
                "pid": std::process::id(),
            })))
        })
    }
}
