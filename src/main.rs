use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use sboxagent::aggregator::MemoryAggregator;
use sboxagent::clock::{system_clock, Clock};
use sboxagent::config::Config;
use sboxagent::dispatcher::{
    ConfigHandler, Dispatcher, ErrorHandler, HealthHandler, LogHandler, StatusHandler,
};
use sboxagent::error::ConfigError;
use sboxagent::events::{Event, RawEvent};
use sboxagent::health::{
    AggregatorHealthCheck, DispatcherHealthCheck, HealthChecker, HealthReport,
    ProcessHealthCheck, SystemHealthCheck,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

/// Command-line arguments for the sboxagent monitoring core
#[derive(Parser)]
#[command(
    name = "sboxagent",
    about = "Event dispatch, health checking and log aggregation for sboxagent",
    long_about = "Reads JSON event lines on stdin, fans them out to the built-in handlers, \
                  keeps recent log lines in memory and runs periodic health checks. \
                  Prints the final health report as JSON on exit."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable debug logging output")]
    verbose: bool,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// Missing config files are accepted here; loading falls back to defaults.
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Convert config path to string, rejecting non-UTF-8 paths
    fn config_path_str(&self) -> Result<Option<&str>, String> {
        match &self.config {
            Some(path) => match path.to_str() {
                Some(path_str) => Ok(Some(path_str)),
                None => Err(format!(
                    "Configuration file path contains invalid UTF-8 characters: {}",
                    path.display()
                )),
            },
            None => Ok(None),
        }
    }
}

/// Composition root wiring the three core components together
struct Agent {
    clock: Arc<dyn Clock>,
    aggregator: Arc<MemoryAggregator>,
    dispatcher: Arc<Dispatcher>,
    health: HealthChecker,
    shutdown: CancellationToken,
}

impl Agent {
    fn new(config: &Config) -> Result<Self> {
        let clock = system_clock();
        let aggregator = Arc::new(MemoryAggregator::with_clock(
            config.aggregator_config(),
            Arc::clone(&clock),
        ));
        let dispatcher = Arc::new(Dispatcher::with_clock(
            config.dispatcher_config(),
            Arc::clone(&clock),
        ));

        dispatcher
            .register_handler(Arc::new(LogHandler::with_sink(Arc::clone(&aggregator))))
            .context("registering log handler")?;
        dispatcher
            .register_handler(Arc::new(ConfigHandler::new()))
            .context("registering config handler")?;
        dispatcher
            .register_handler(Arc::new(ErrorHandler::new()))
            .context("registering error handler")?;
        dispatcher
            .register_handler(Arc::new(StatusHandler::new()))
            .context("registering status handler")?;
        dispatcher
            .register_handler(Arc::new(HealthHandler::new()))
            .context("registering health handler")?;

        let health = HealthChecker::with_clock(config.health_config(), Arc::clone(&clock));
        health.register_check(Arc::new(SystemHealthCheck::new(Arc::clone(&clock))))?;
        health.register_check(Arc::new(ProcessHealthCheck::new(
            clock.now(),
            Arc::clone(&clock),
        )))?;
        health.register_check(Arc::new(DispatcherHealthCheck::new(
            dispatcher.clone(),
            Arc::clone(&clock),
        )))?;
        health.register_check(Arc::new(AggregatorHealthCheck::new(
            aggregator.clone(),
            Arc::clone(&clock),
        )))?;

        Ok(Self {
            clock,
            aggregator,
            dispatcher,
            health,
            shutdown: CancellationToken::new(),
        })
    }

    /// Load configuration, falling back to defaults for unreadable or
    /// invalid files, then apply environment overrides
    fn load_config(config_path: Option<&str>) -> Result<Config, ConfigError> {
        let mut config = match config_path {
            Some(path) => {
                info!("Loading configuration from: {}", path);
                match Config::from_file(std::path::Path::new(path)) {
                    Ok(config) => config,
                    Err(ConfigError::ReadError(_)) => {
                        warn!(
                            "Configuration file '{}' not found or unreadable, using defaults",
                            path
                        );
                        Config::default()
                    }
                    Err(e) => {
                        error!("Configuration error in '{}': {}", path, e);
                        warn!("Using default configuration due to invalid config file");
                        Config::default()
                    }
                }
            }
            None => {
                info!("Using default configuration");
                Config::default()
            }
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    fn start(&self) -> Result<()> {
        self.aggregator
            .start(&self.shutdown)
            .context("starting log aggregator")?;
        self.dispatcher
            .start(&self.shutdown)
            .context("starting event dispatcher")?;
        self.health
            .start(&self.shutdown)
            .context("starting health checker")?;
        Ok(())
    }

    /// Feed JSON event lines from stdin into the dispatcher until EOF or shutdown
    async fn pump_stdin(&self) {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match RawEvent::parse_line(&line) {
                            Ok(raw) => {
                                let event = Event::from_raw(raw, "stdin", self.clock.now());
                                if let Err(e) = self.dispatcher.dispatch(event) {
                                    warn!("Event not dispatched: {}", e);
                                }
                            }
                            Err(e) => warn!("Skipping malformed event line: {}", e),
                        }
                    }
                    Ok(None) => {
                        info!("End of input reached");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read from stdin: {}", e);
                        break;
                    }
                },
            }
        }
    }

    /// Stop components in reverse start order and produce a final report
    async fn stop(&self) -> HealthReport {
        self.shutdown.cancel();
        self.health.stop().await;
        self.dispatcher.stop().await;
        self.aggregator.stop().await;

        let dispatcher = self.dispatcher.get_stats();
        let aggregator = self.aggregator.get_stats();
        info!(
            "Shutdown stats: events_processed={}, events_dropped={}, handler_errors={}, log_entries={}",
            dispatcher.events_processed,
            dispatcher.events_dropped,
            dispatcher.errors,
            aggregator.current_entries
        );

        self.health.force_check().await
    }
}

fn init_logging(verbose: bool) -> bool {
    let rust_log_set = std::env::var_os("RUST_LOG").is_some();
    let mut builder = env_logger::Builder::from_default_env();
    if !rust_log_set {
        builder.filter_level(LevelFilter::Trace);
    }
    builder.init();

    if !rust_log_set {
        log::set_max_level(if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        });
    }
    rust_log_set
}

async fn run(agent: Agent) -> Result<()> {
    agent.start()?;

    let shutdown = agent.shutdown.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        shutdown.cancel();
    })
    .context("installing SIGINT handler")?;

    info!("sboxagent is running. Reading events from stdin, press Ctrl+C to stop.");
    agent.pump_stdin().await;

    let report = agent.stop().await;
    let json = serde_json::to_string_pretty(&report).context("serializing final report")?;
    println!("{}", json);
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let rust_log_set = init_logging(cli.verbose);

    info!("Starting sboxagent");

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    let config_path = match cli.config_path_str() {
        Ok(path) => path,
        Err(e) => {
            error!("Invalid configuration path: {}", e);
            std::process::exit(1);
        }
    };

    let config = match Agent::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if !rust_log_set && !cli.verbose {
        log::set_max_level(config.log_level());
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(async {
        let agent = Agent::new(&config)?;
        run(agent).await
    });

    // stdin reads park a blocking thread that never returns on its own
    runtime.shutdown_timeout(Duration::from_millis(500));

    if let Err(e) = result {
        error!("sboxagent failed: {:#}", e);
        std::process::exit(1);
    }

    info!("sboxagent shutdown complete");
}
