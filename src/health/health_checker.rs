//! Periodic health checking with bounded concurrency
//!
//! The checker owns a registry of named checks. Each pass runs every check
//! under a shared pass deadline, at most `max_concurrent_checks` at a time,
//! and folds the results into a single [`HealthReport`]. A pass that misses
//! its deadline publishes nothing: reports are complete or absent.

use crate::clock::{system_clock, Clock};
use crate::error::HealthError;
use crate::events::{EventData, Timestamp};
use crate::monitoring::ProcessSnapshot;
use crate::worker::Worker;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Shortest accepted check interval
const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Longest accepted interval or timeout
const MAX_PERIOD: Duration = Duration::from_secs(365 * 86400);

/// `timeout` from now, saturating instead of overflowing
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + MAX_PERIOD)
}

/// Health verdict, ordered by severity
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one check invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "EventData::is_empty")]
    pub data: EventData,
}

impl ComponentHealth {
    pub fn new(
        name: impl Into<String>,
        status: HealthStatus,
        message: impl Into<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            name: name.into(),
            status,
            message: message.into(),
            timestamp,
            data: EventData::new(),
        }
    }

    pub fn with_data(mut self, data: EventData) -> Self {
        self.data = data;
        self
    }
}

/// Outcome of a complete check pass
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthReport {
    pub overall_status: HealthStatus,
    pub timestamp: Timestamp,
    pub components: Vec<ComponentHealth>,
    /// Component count per status
    pub summary: BTreeMap<HealthStatus, usize>,
    pub uptime: Duration,
    #[serde(default)]
    pub data: EventData,
}

/// Fold component verdicts into one overall status
///
/// The most severe status wins. No components at all means `Unknown`;
/// components that only report `Unknown` count as `Healthy`.
pub fn determine_overall_status(components: &[ComponentHealth]) -> HealthStatus {
    match components.iter().map(|c| c.status).max() {
        None => HealthStatus::Unknown,
        Some(HealthStatus::Unknown) => HealthStatus::Healthy,
        Some(status) => status,
    }
}

/// Deadline and cancellation handed to a check
///
/// Checks should return by [`CheckContext::deadline`]. The checker drops a
/// check's future once the deadline passes, so blocking work inside a check
/// must be bounded by the check itself.
#[derive(Debug, Clone)]
pub struct CheckContext {
    deadline: Instant,
    cancel: CancellationToken,
}

impl CheckContext {
    pub fn new(deadline: Instant, cancel: CancellationToken) -> Self {
        Self { deadline, cancel }
    }

    /// Context with a fresh token and a deadline `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(deadline_after(timeout), CancellationToken::new())
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the surrounding pass is abandoned
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// Trait for health checks
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, ctx: CheckContext) -> Pin<Box<dyn Future<Output = ComponentHealth> + Send + '_>>;
}

/// Settings for [`HealthChecker`]
#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheckerConfig {
    pub check_interval: Duration,
    /// Budget for a whole pass; each check gets half of it
    pub timeout: Duration,
    pub max_concurrent_checks: usize,
}

impl Default for HealthCheckerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            max_concurrent_checks: 10,
        }
    }
}

/// Snapshot of the checker itself
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CheckerStatus {
    pub running: bool,
    pub start_time: Timestamp,
    pub check_interval: Duration,
    pub timeout: Duration,
    pub checks: usize,
    pub overall_status: Option<HealthStatus>,
    pub uptime: Option<Duration>,
}

enum PassOutcome {
    Complete(Vec<ComponentHealth>),
    TimedOut,
    Cancelled,
}

struct Shared {
    config: HealthCheckerConfig,
    clock: Arc<dyn Clock>,
    checks: RwLock<HashMap<String, Arc<dyn HealthCheck>>>,
    last_report: RwLock<Option<HealthReport>>,
    start_time: RwLock<Timestamp>,
}

/// Runs registered checks and keeps the latest report
pub struct HealthChecker {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthChecker")
            .field("config", &self.shared.config)
            .field("checks", &self.shared.checks.read().len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(HealthCheckerConfig::default())
    }
}

impl HealthChecker {
    pub fn new(config: HealthCheckerConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// The check interval is clamped to `[10ms, 1 year]`, the timeout to at
    /// most a year
    pub fn with_clock(mut config: HealthCheckerConfig, clock: Arc<dyn Clock>) -> Self {
        config.check_interval = config.check_interval.clamp(MIN_CHECK_INTERVAL, MAX_PERIOD);
        config.timeout = config.timeout.min(MAX_PERIOD);
        let start_time = clock.now();
        Self {
            shared: Arc::new(Shared {
                config,
                clock,
                checks: RwLock::new(HashMap::new()),
                last_report: RwLock::new(None),
                start_time: RwLock::new(start_time),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Add a check, replacing any check registered under the same name
    ///
    /// # Errors
    ///
    /// Returns `HealthError::InvalidCheck` if the check has an empty name.
    pub fn register_check(&self, check: Arc<dyn HealthCheck>) -> Result<(), HealthError> {
        let name = check.name().to_string();
        if name.is_empty() {
            return Err(HealthError::InvalidCheck(
                "health check name must not be empty".to_string(),
            ));
        }

        self.shared.checks.write().insert(name.clone(), check);
        info!("Health check registered: name={}", name);
        Ok(())
    }

    pub fn unregister_check(&self, name: &str) {
        if self.shared.checks.write().remove(name).is_some() {
            info!("Health check unregistered: name={}", name);
        }
    }

    /// Start periodic checking, with the first pass run immediately
    ///
    /// # Errors
    ///
    /// Returns `HealthError::AlreadyRunning` if the checker is already running.
    pub fn start(&self, parent: &CancellationToken) -> Result<(), HealthError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(HealthError::AlreadyRunning);
        }

        *self.shared.start_time.write() = self.shared.clock.now();

        let shared = Arc::clone(&self.shared);
        *worker = Some(Worker::spawn(parent, move |token| run_checks(shared, token)));

        info!(
            "Health checker starting: interval={:?}, timeout={:?}",
            self.shared.config.check_interval, self.shared.config.timeout
        );
        Ok(())
    }

    pub async fn stop(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            info!("Health checker stopping");
            worker.shutdown("health checker").await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Latest published report, `None` before the first complete pass
    pub fn get_last_report(&self) -> Option<HealthReport> {
        self.shared.last_report.read().clone()
    }

    /// Run a pass now, independently of the periodic schedule
    ///
    /// A complete pass is published and returned. A pass that times out
    /// returns an empty report with `Unknown` status and publishes nothing.
    pub async fn force_check(&self) -> HealthReport {
        let parent = self
            .worker
            .lock()
            .as_ref()
            .map(|w| w.token().clone())
            .unwrap_or_default();

        match self.shared.run_pass(&parent).await {
            PassOutcome::Complete(components) => {
                let report = self.shared.generate_report(components);
                self.shared.publish(report.clone());
                report
            }
            PassOutcome::TimedOut | PassOutcome::Cancelled => {
                self.shared.generate_report(Vec::new())
            }
        }
    }

    pub fn get_status(&self) -> CheckerStatus {
        let start_time = *self.shared.start_time.read();
        let last_report = self.shared.last_report.read();
        CheckerStatus {
            running: self.is_running(),
            start_time,
            check_interval: self.shared.config.check_interval,
            timeout: self.shared.config.timeout,
            checks: self.shared.checks.read().len(),
            overall_status: last_report.as_ref().map(|r| r.overall_status),
            uptime: last_report.as_ref().map(|r| r.uptime),
        }
    }
}

async fn run_checks(shared: Arc<Shared>, token: CancellationToken) {
    let mut ticker = interval(shared.config.check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => shared.perform_health_check(&token).await,
        }
    }

    info!("Health check loop stopped");
}

impl Shared {
    async fn perform_health_check(&self, token: &CancellationToken) {
        match self.run_pass(token).await {
            PassOutcome::Complete(components) => {
                let report = self.generate_report(components);
                info!(
                    "Health check completed: overall_status={}, components={}",
                    report.overall_status,
                    report.components.len()
                );
                self.publish(report);
            }
            PassOutcome::TimedOut => {
                warn!("Health check pass abandoned, keeping previous report");
            }
            PassOutcome::Cancelled => debug!("Health check pass cancelled"),
        }
    }

    async fn run_pass(&self, parent: &CancellationToken) -> PassOutcome {
        let checks: Vec<Arc<dyn HealthCheck>> = self.checks.read().values().cloned().collect();
        if checks.is_empty() {
            debug!("No health checks registered");
            return PassOutcome::Complete(Vec::new());
        }

        let timeout = self.config.timeout;
        let max_concurrent = self.config.max_concurrent_checks.max(1);
        if checks.len() > max_concurrent {
            warn!(
                "Too many health checks, limiting concurrent execution: total={}, max_concurrent={}",
                checks.len(),
                max_concurrent
            );
        }

        let semaphore = Arc::new(Semaphore::new(max_concurrent.min(checks.len())));
        let pass_token = parent.child_token();
        let pass_deadline = deadline_after(timeout);
        let check_timeout = timeout / 2;
        let total = checks.len();

        let mut tasks = JoinSet::new();
        for check in checks {
            let semaphore = Arc::clone(&semaphore);
            let token = pass_token.clone();
            let clock = Arc::clone(&self.clock);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                // The pass deadline already bounds this task; only the check's
                // view of its deadline is clamped to it.
                let deadline = deadline_after(check_timeout);
                let ctx = CheckContext::new(deadline.min(pass_deadline), token.child_token());

                let result = match tokio::time::timeout_at(deadline, check.check(ctx)).await {
                    Ok(result) => result,
                    Err(_) => ComponentHealth::new(
                        check.name(),
                        HealthStatus::Unhealthy,
                        "health check timed out",
                        clock.now(),
                    ),
                };
                Some(result)
            });
        }

        let collect = async {
            let mut components = Vec::with_capacity(total);
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Some(component)) => components.push(component),
                    Ok(None) => {}
                    Err(e) => error!("Health check task failed: {}", e),
                }
            }
            components
        };

        let outcome = tokio::select! {
            _ = parent.cancelled() => PassOutcome::Cancelled,
            collected = tokio::time::timeout_at(pass_deadline, collect) => match collected {
                Ok(components) => PassOutcome::Complete(components),
                Err(_) => {
                    warn!("Health check timeout: timeout={:?}, checks={}", timeout, total);
                    PassOutcome::TimedOut
                }
            },
        };

        pass_token.cancel();
        outcome
    }

    fn generate_report(&self, components: Vec<ComponentHealth>) -> HealthReport {
        let now = self.clock.now();

        let mut summary = BTreeMap::new();
        for component in &components {
            *summary.entry(component.status).or_insert(0) += 1;
        }

        let uptime = (now - *self.start_time.read())
            .to_std()
            .unwrap_or_default();

        let mut data = EventData::new();
        match serde_json::to_value(ProcessSnapshot::capture()) {
            Ok(system) => {
                data.insert("system".to_string(), system);
            }
            Err(e) => warn!("Failed to serialize process snapshot: {}", e),
        }

        HealthReport {
            overall_status: determine_overall_status(&components),
            timestamp: now,
            components,
            summary,
            uptime,
            data,
        }
    }

    fn publish(&self, report: HealthReport) {
        *self.last_report.write() = Some(report);
    }
}
