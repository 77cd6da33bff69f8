//! Event dispatcher with a bounded queue and per-type handler fan-out
//!
//! Producers call [`Dispatcher::dispatch`], which never blocks: the event is
//! either enqueued or dropped and counted. A single background worker drains
//! the queue one event at a time and runs every handler registered for the
//! event's type concurrently, joining them before taking the next event.

use crate::clock::{system_clock, Clock};
use crate::error::{DispatchError, HandlerError};
use crate::events::{Event, EventType, Timestamp};
use crate::worker::Worker;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Trait for consumers of dispatched events
///
/// A handler is registered once per type it reports from
/// [`EventHandler::supported_types`]. Each invocation receives its own copy
/// of the event and the dispatcher's cancellation token.
pub trait EventHandler: Send + Sync {
    /// Process one event
    fn handle(
        &self,
        ctx: CancellationToken,
        event: Event,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>>;

    /// Name used for unregistration and diagnostics
    fn name(&self) -> &str;

    /// Event types this handler wants to receive
    fn supported_types(&self) -> Vec<EventType>;
}

/// Dispatcher counters
///
/// An accepted event counts towards `events_processed`, a rejected one
/// towards `events_dropped`; no event is counted in both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatcherStats {
    pub events_processed: u64,
    pub events_dropped: u64,
    pub errors: u64,
    pub last_event_time: Option<Timestamp>,
    pub start_time: Timestamp,
}

/// Read-only view of dispatcher counters, consumed by health checks
pub trait DispatcherStatsSource: Send + Sync {
    fn dispatcher_stats(&self) -> DispatcherStats;
}

impl DispatcherStatsSource for DispatcherStats {
    fn dispatcher_stats(&self) -> DispatcherStats {
        self.clone()
    }
}

/// Settings for [`Dispatcher`]
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    /// Events buffered before `dispatch` starts dropping
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
        }
    }
}

type HandlerRegistry = HashMap<EventType, Vec<Arc<dyn EventHandler>>>;

/// State shared between the dispatcher handle and its worker
struct Shared {
    handlers: RwLock<HandlerRegistry>,
    stats: Mutex<DispatcherStats>,
}

/// Single point of event fan-out
pub struct Dispatcher {
    queue_capacity: usize,
    clock: Arc<dyn Clock>,
    shared: Arc<Shared>,
    sender: mpsc::Sender<Event>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Event>>>,
    worker: Mutex<Option<Worker>>,
    /// Set by `stop`, cleared by `start`
    stopped: AtomicBool,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("queue_capacity", &self.queue_capacity)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DispatcherConfig::default())
    }
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: DispatcherConfig, clock: Arc<dyn Clock>) -> Self {
        let queue_capacity = config.queue_capacity.max(1);
        let (sender, receiver) = mpsc::channel(queue_capacity);
        let start_time = clock.now();

        Self {
            queue_capacity,
            clock,
            shared: Arc::new(Shared {
                handlers: RwLock::new(HashMap::new()),
                stats: Mutex::new(DispatcherStats {
                    events_processed: 0,
                    events_dropped: 0,
                    errors: 0,
                    last_event_time: None,
                    start_time,
                }),
            }),
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            worker: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    /// Start the background worker
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::AlreadyRunning` if the worker is already running.
    pub fn start(&self, parent: &CancellationToken) -> Result<(), DispatchError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(DispatchError::AlreadyRunning);
        }

        self.shared.stats.lock().start_time = self.clock.now();
        self.stopped.store(false, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let receiver = Arc::clone(&self.receiver);
        *worker = Some(Worker::spawn(parent, move |token| {
            process_events(shared, receiver, token)
        }));

        info!(
            "Event dispatcher starting: buffer_size={}",
            self.queue_capacity
        );
        Ok(())
    }

    /// Stop the worker and wait for it to exit
    ///
    /// The event being handled when `stop` is called runs to completion;
    /// events still queued are discarded. Until the next `start`, `dispatch`
    /// rejects events with `DispatchError::QueueClosed`.
    pub async fn stop(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            self.stopped.store(true, Ordering::Release);
            info!("Event dispatcher stopping");
            worker.shutdown("event dispatcher").await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Register a handler under every type it supports
    ///
    /// Registering the same handler twice yields two invocations per event.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidHandler` if the handler has an empty
    /// name or supports no event types. The registry is left unchanged.
    pub fn register_handler(&self, handler: Arc<dyn EventHandler>) -> Result<(), DispatchError> {
        if handler.name().is_empty() {
            return Err(DispatchError::InvalidHandler(
                "handler name must not be empty".to_string(),
            ));
        }

        let supported_types = handler.supported_types();
        if supported_types.is_empty() {
            return Err(DispatchError::InvalidHandler(format!(
                "handler '{}' must support at least one event type",
                handler.name()
            )));
        }

        let mut handlers = self.shared.handlers.write();
        for event_type in &supported_types {
            handlers
                .entry(event_type.clone())
                .or_default()
                .push(Arc::clone(&handler));
        }

        info!(
            "Event handler registered: handler={}, supported_types={:?}",
            handler.name(),
            supported_types
        );
        Ok(())
    }

    /// Remove the first handler named `name` from every type bucket
    pub fn unregister_handler(&self, name: &str) {
        let mut handlers = self.shared.handlers.write();
        for (event_type, bucket) in handlers.iter_mut() {
            if let Some(position) = bucket.iter().position(|h| h.name() == name) {
                bucket.remove(position);
                info!(
                    "Event handler unregistered: handler={}, event_type={}",
                    name, event_type
                );
            }
        }
        handlers.retain(|_, bucket| !bucket.is_empty());
    }

    /// Enqueue an event without blocking
    ///
    /// Missing timestamp and id are filled in first. Events dispatched
    /// before the first `start` are buffered and handled once the worker
    /// runs.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::QueueFull` when the queue is at capacity. The
    /// event is lost and counted as dropped.
    ///
    /// Returns `DispatchError::QueueClosed` after `stop`, or once the parent
    /// token has cancelled the worker. The event is not counted.
    pub fn dispatch(&self, mut event: Event) -> Result<(), DispatchError> {
        if self.is_closed() {
            debug!(
                "Dispatcher stopped, rejecting event: type={}",
                event.event_type
            );
            return Err(DispatchError::QueueClosed);
        }

        event.fill_defaults(self.clock.now());
        let event_time = event.timestamp;

        match self.sender.try_send(event) {
            Ok(()) => {
                let mut stats = self.shared.stats.lock();
                stats.events_processed += 1;
                stats.last_event_time = event_time;
                Ok(())
            }
            Err(TrySendError::Full(event)) => {
                self.shared.stats.lock().events_dropped += 1;
                warn!(
                    "Event queue is full, dropping event: type={}, id={}",
                    event.event_type,
                    event.id.as_deref().unwrap_or_default()
                );
                Err(DispatchError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(DispatchError::QueueClosed),
        }
    }

    pub fn get_stats(&self) -> DispatcherStats {
        self.shared.stats.lock().clone()
    }

    /// Handler names per event type, in registration order
    pub fn get_registered_handlers(&self) -> HashMap<EventType, Vec<String>> {
        self.shared
            .handlers
            .read()
            .iter()
            .map(|(event_type, bucket)| {
                (
                    event_type.clone(),
                    bucket.iter().map(|h| h.name().to_string()).collect(),
                )
            })
            .collect()
    }

    /// Number of events waiting in the queue
    pub fn queue_len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    fn is_closed(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
            || self
                .worker
                .lock()
                .as_ref()
                .is_some_and(|worker| worker.token().is_cancelled())
    }
}

impl DispatcherStatsSource for Dispatcher {
    fn dispatcher_stats(&self) -> DispatcherStats {
        self.get_stats()
    }
}

async fn process_events(
    shared: Arc<Shared>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Event>>>,
    token: CancellationToken,
) {
    let mut receiver = receiver.lock().await;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            event = receiver.recv() => match event {
                Some(event) => shared.handle_event(&token, event).await,
                None => break,
            },
        }
    }

    let mut discarded = 0usize;
    while receiver.try_recv().is_ok() {
        discarded += 1;
    }
    if discarded > 0 {
        warn!("Discarded {} queued events on shutdown", discarded);
    }

    info!("Event processing loop stopped");
}

impl Shared {
    async fn handle_event(&self, token: &CancellationToken, event: Event) {
        let handlers = self
            .handlers
            .read()
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();

        let event_id = event.id.clone().unwrap_or_default();
        if handlers.is_empty() {
            debug!(
                "No handlers registered for event type: type={}, id={}",
                event.event_type, event_id
            );
            return;
        }

        debug!(
            "Processing event: type={}, id={}, source={}, handlers={}",
            event.event_type,
            event_id,
            event.source,
            handlers.len()
        );

        let mut tasks = JoinSet::new();
        for handler in handlers {
            let ctx = token.clone();
            let event = event.clone();
            tasks.spawn(async move {
                let result = handler.handle(ctx, event).await;
                (handler, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((handler, Err(e))) => {
                    self.stats.lock().errors += 1;
                    error!(
                        "Handler failed to process event: handler={}, type={}, id={}, error={}",
                        handler.name(),
                        event.event_type,
                        event_id,
                        e
                    );
                }
                Err(e) => {
                    self.stats.lock().errors += 1;
                    error!(
                        "Handler task aborted: type={}, id={}, error={}",
                        event.event_type, event_id, e
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventData;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Handler that records every event it sees
    struct RecordingHandler {
        name: String,
        types: Vec<EventType>,
        seen: Mutex<Vec<Event>>,
        fail: bool,
    }

    impl RecordingHandler {
        fn new(name: &str, types: Vec<EventType>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                types,
                seen: Mutex::new(Vec::new()),
                fail: false,
            })
        }

        fn failing(name: &str, types: Vec<EventType>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                types,
                seen: Mutex::new(Vec::new()),
                fail: true,
            })
        }

        fn count(&self) -> usize {
            self.seen.lock().len()
        }
    }

    impl EventHandler for RecordingHandler {
        fn handle(
            &self,
            _ctx: CancellationToken,
            event: Event,
        ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>> {
            Box::pin(async move {
                self.seen.lock().push(event);
                if self.fail {
                    Err(HandlerError::Failed("simulated failure".to_string()))
                } else {
                    Ok(())
                }
            })
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn supported_types(&self) -> Vec<EventType> {
            self.types.clone()
        }
    }

    /// Handler that waits on a shared barrier, so it only completes when
    /// its siblings run at the same time
    struct BarrierHandler {
        name: String,
        barrier: Arc<tokio::sync::Barrier>,
        done: Arc<AtomicUsize>,
    }

    impl EventHandler for BarrierHandler {
        fn handle(
            &self,
            _ctx: CancellationToken,
            _event: Event,
        ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>> {
            Box::pin(async move {
                self.barrier.wait().await;
                self.done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn supported_types(&self) -> Vec<EventType> {
            vec![EventType::Status]
        }
    }

    fn log_event(message: &str) -> Event {
        let data: EventData = json!({"level": "info", "message": message})
            .as_object()
            .cloned()
            .unwrap();
        Event::new(EventType::Log, data).with_source("test")
    }

    async fn wait_until(condition: impl Fn() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        condition()
    }

    #[test]
    fn test_register_and_list_handlers() {
        let dispatcher = Dispatcher::default();
        let multi = RecordingHandler::new("multi", vec![EventType::Log, EventType::Error]);
        let status = RecordingHandler::new("status", vec![EventType::Status]);

        dispatcher.register_handler(multi).unwrap();
        dispatcher.register_handler(status).unwrap();

        let registered = dispatcher.get_registered_handlers();
        assert_eq!(registered.len(), 3);
        assert_eq!(registered[&EventType::Log], vec!["multi".to_string()]);
        assert_eq!(registered[&EventType::Error], vec!["multi".to_string()]);
        assert_eq!(registered[&EventType::Status], vec!["status".to_string()]);
    }

    #[test]
    fn test_register_rejects_invalid_handlers() {
        let dispatcher = Dispatcher::default();

        let no_types = RecordingHandler::new("empty", vec![]);
        assert!(matches!(
            dispatcher.register_handler(no_types),
            Err(DispatchError::InvalidHandler(_))
        ));

        let no_name = RecordingHandler::new("", vec![EventType::Log]);
        assert!(matches!(
            dispatcher.register_handler(no_name),
            Err(DispatchError::InvalidHandler(_))
        ));

        assert!(dispatcher.get_registered_handlers().is_empty());
    }

    #[test]
    fn test_unregister_removes_first_match_per_type() {
        let dispatcher = Dispatcher::default();
        let handler = RecordingHandler::new("dup", vec![EventType::Log]);
        dispatcher.register_handler(handler.clone()).unwrap();
        dispatcher.register_handler(handler).unwrap();
        dispatcher
            .register_handler(RecordingHandler::new("other", vec![EventType::Config]))
            .unwrap();

        dispatcher.unregister_handler("dup");
        let registered = dispatcher.get_registered_handlers();
        assert_eq!(registered[&EventType::Log], vec!["dup".to_string()]);

        dispatcher.unregister_handler("dup");
        dispatcher.unregister_handler("missing");
        let registered = dispatcher.get_registered_handlers();
        assert!(!registered.contains_key(&EventType::Log));
        assert_eq!(registered[&EventType::Config], vec!["other".to_string()]);
    }

    #[tokio::test]
    async fn test_start_twice_fails_and_restart_works() {
        let dispatcher = Dispatcher::default();
        let shutdown = CancellationToken::new();

        dispatcher.start(&shutdown).unwrap();
        assert!(dispatcher.is_running());
        assert!(matches!(
            dispatcher.start(&shutdown),
            Err(DispatchError::AlreadyRunning)
        ));

        dispatcher.stop().await;
        assert!(!dispatcher.is_running());
        dispatcher.stop().await;

        dispatcher.start(&shutdown).unwrap();
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_dispatch_reaches_log_handler() {
        let dispatcher = Dispatcher::default();
        let handler = RecordingHandler::new("log_sink", vec![EventType::Log]);
        dispatcher.register_handler(handler.clone()).unwrap();

        let shutdown = CancellationToken::new();
        dispatcher.start(&shutdown).unwrap();
        dispatcher.dispatch(log_event("m1")).unwrap();

        assert!(wait_until(|| handler.count() == 1).await);
        let stats = dispatcher.get_stats();
        assert_eq!(stats.events_processed, 1);
        assert_eq!(stats.events_dropped, 0);
        assert!(stats.last_event_time.is_some());

        let seen = handler.seen.lock()[0].clone();
        assert_eq!(seen.data_str("message"), Some("m1"));
        assert!(seen.id.unwrap().starts_with("log-"));

        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_full_queue_drops_and_counts() {
        let dispatcher = Dispatcher::new(DispatcherConfig { queue_capacity: 4 });

        // Worker not started, so nothing drains the queue
        let mut rejected = 0;
        for i in 0..7 {
            if let Err(e) = dispatcher.dispatch(log_event(&format!("m{}", i))) {
                assert!(matches!(e, DispatchError::QueueFull));
                rejected += 1;
            }
        }

        assert_eq!(rejected, 3);
        let stats = dispatcher.get_stats();
        assert_eq!(stats.events_processed, 4);
        assert_eq!(stats.events_dropped, 3);
        assert_eq!(dispatcher.queue_len(), 4);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_block_siblings() {
        let dispatcher = Dispatcher::default();
        let good = RecordingHandler::new("good", vec![EventType::Error]);
        let bad = RecordingHandler::failing("bad", vec![EventType::Error]);
        dispatcher.register_handler(good.clone()).unwrap();
        dispatcher.register_handler(bad.clone()).unwrap();

        let shutdown = CancellationToken::new();
        dispatcher.start(&shutdown).unwrap();
        dispatcher
            .dispatch(Event::new(EventType::Error, EventData::new()))
            .unwrap();
        dispatcher
            .dispatch(Event::new(EventType::Error, EventData::new()))
            .unwrap();

        assert!(wait_until(|| good.count() == 2 && bad.count() == 2).await);
        assert!(wait_until(|| dispatcher.get_stats().errors == 2).await);

        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_unhandled_type_is_not_an_error() {
        let dispatcher = Dispatcher::default();
        let handler = RecordingHandler::new("log_sink", vec![EventType::Log]);
        dispatcher.register_handler(handler.clone()).unwrap();

        let shutdown = CancellationToken::new();
        dispatcher.start(&shutdown).unwrap();
        dispatcher
            .dispatch(Event::new("metrics", EventData::new()))
            .unwrap();
        dispatcher.dispatch(log_event("after")).unwrap();

        assert!(wait_until(|| handler.count() == 1).await);
        let stats = dispatcher.get_stats();
        assert_eq!(stats.events_processed, 2);
        assert_eq!(stats.events_dropped, 0);
        assert_eq!(stats.errors, 0);

        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_handlers_for_one_event_run_concurrently() {
        let dispatcher = Dispatcher::default();
        let barrier = Arc::new(tokio::sync::Barrier::new(3));
        let done = Arc::new(AtomicUsize::new(0));
        for name in ["a", "b", "c"] {
            dispatcher
                .register_handler(Arc::new(BarrierHandler {
                    name: name.to_string(),
                    barrier: Arc::clone(&barrier),
                    done: Arc::clone(&done),
                }))
                .unwrap();
        }

        let shutdown = CancellationToken::new();
        dispatcher.start(&shutdown).unwrap();
        dispatcher
            .dispatch(Event::new(EventType::Status, EventData::new()))
            .unwrap();

        assert!(wait_until(|| done.load(Ordering::SeqCst) == 3).await);
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_events_are_handled_in_enqueue_order() {
        let dispatcher = Dispatcher::default();
        let handler = RecordingHandler::new("ordered", vec![EventType::Log]);
        dispatcher.register_handler(handler.clone()).unwrap();

        for i in 0..20 {
            dispatcher.dispatch(log_event(&i.to_string())).unwrap();
        }

        let shutdown = CancellationToken::new();
        dispatcher.start(&shutdown).unwrap();
        assert!(wait_until(|| handler.count() == 20).await);

        let order: Vec<String> = handler
            .seen
            .lock()
            .iter()
            .filter_map(|e| e.data_str("message").map(str::to_string))
            .collect();
        let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        assert_eq!(order, expected);

        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn test_parent_cancellation_stops_worker_loop() {
        let dispatcher = Dispatcher::default();
        let handler = RecordingHandler::new("log_sink", vec![EventType::Log]);
        dispatcher.register_handler(handler.clone()).unwrap();

        let shutdown = CancellationToken::new();
        dispatcher.start(&shutdown).unwrap();
        shutdown.cancel();
        assert!(matches!(
            dispatcher.dispatch(log_event("cancelled")),
            Err(DispatchError::QueueClosed)
        ));
        dispatcher.stop().await;

        assert!(matches!(
            dispatcher.dispatch(log_event("late")),
            Err(DispatchError::QueueClosed)
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handler.count(), 0);
        assert_eq!(dispatcher.queue_len(), 0);
        let stats = dispatcher.get_stats();
        assert_eq!(stats.events_processed, 0);
        assert_eq!(stats.events_dropped, 0);
    }

    #[tokio::test]
    async fn test_dispatch_after_stop_is_rejected_until_restart() {
        let dispatcher = Dispatcher::default();
        let handler = RecordingHandler::new("log_sink", vec![EventType::Log]);
        dispatcher.register_handler(handler.clone()).unwrap();

        let shutdown = CancellationToken::new();
        dispatcher.start(&shutdown).unwrap();
        dispatcher.dispatch(log_event("before")).unwrap();
        assert!(wait_until(|| handler.count() == 1).await);
        dispatcher.stop().await;

        assert!(matches!(
            dispatcher.dispatch(log_event("stopped")),
            Err(DispatchError::QueueClosed)
        ));
        assert_eq!(dispatcher.get_stats().events_processed, 1);

        dispatcher.start(&shutdown).unwrap();
        dispatcher.dispatch(log_event("restarted")).unwrap();
        assert!(wait_until(|| handler.count() == 2).await);
        assert_eq!(dispatcher.get_stats().events_processed, 2);

        dispatcher.stop().await;
    }

    /// Handler that parks on the cancellation token for the event named
    /// `first`, so later events pile up in the queue
    struct BlockingHandler {
        seen: Mutex<Vec<String>>,
    }

    impl EventHandler for BlockingHandler {
        fn handle(
            &self,
            ctx: CancellationToken,
            event: Event,
        ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>> {
            Box::pin(async move {
                let message = event.data_str("message").unwrap_or_default().to_string();
                let block = message == "first";
                self.seen.lock().push(message);
                if block {
                    ctx.cancelled().await;
                }
                Ok(())
            })
        }

        fn name(&self) -> &str {
            "blocking"
        }

        fn supported_types(&self) -> Vec<EventType> {
            vec![EventType::Log]
        }
    }

    #[tokio::test]
    async fn test_stop_discards_queued_events() {
        let dispatcher = Dispatcher::default();
        let handler = Arc::new(BlockingHandler {
            seen: Mutex::new(Vec::new()),
        });
        dispatcher.register_handler(handler.clone()).unwrap();

        let shutdown = CancellationToken::new();
        dispatcher.start(&shutdown).unwrap();
        dispatcher.dispatch(log_event("first")).unwrap();
        assert!(wait_until(|| handler.seen.lock().len() == 1).await);

        for i in 1..=3 {
            dispatcher
                .dispatch(log_event(&format!("queued-{}", i)))
                .unwrap();
        }
        assert_eq!(dispatcher.queue_len(), 3);

        dispatcher.stop().await;
        assert_eq!(dispatcher.queue_len(), 0);

        dispatcher.start(&shutdown).unwrap();
        dispatcher.dispatch(log_event("after")).unwrap();
        assert!(wait_until(|| handler.seen.lock().len() == 2).await);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(
            *handler.seen.lock(),
            vec!["first".to_string(), "after".to_string()]
        );
        assert_eq!(dispatcher.queue_len(), 0);
        dispatcher.stop().await;
    }
}
