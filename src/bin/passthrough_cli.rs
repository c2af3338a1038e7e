use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use oboe_passthrough::engine::{DeviceStreamFactory, StubStreamFactory};
use oboe_passthrough::{
    init_logging, AppConfig, EngineError, EngineState, ErrorCode, PassthroughEngine,
};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(
    name = "passthrough_cli",
    about = "Desktop harness for the duplex passthrough engine"
)]
struct Cli {
    /// JSON config file (defaults to the platform config)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Use the in-memory stub backend instead of real devices
    #[arg(long)]
    stub: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run live passthrough, printing stats once per interval
    Run {
        #[arg(long, default_value_t = 10)]
        seconds: u64,
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
    /// Negotiate a duplex pair, print the granted configuration and stop
    Negotiate,
    /// Print the effective configuration
    Config,
}

#[derive(Serialize)]
struct ErrorReport {
    code: i32,
    message: String,
    retryable: bool,
}

impl From<&EngineError> for ErrorReport {
    fn from(err: &EngineError) -> Self {
        Self {
            code: err.code(),
            message: err.message(),
            retryable: err.is_retryable(),
        }
    }
}

fn main() -> ExitCode {
    init_logging();
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path),
        None => AppConfig::load_platform(),
    };

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Negotiate => run_negotiate(build_engine(cli.stub, config)),
        Commands::Run {
            seconds,
            interval_ms,
        } => run_live(
            build_engine(cli.stub, config),
            Duration::from_secs(seconds),
            Duration::from_millis(interval_ms.max(10)),
        ),
    }
}

fn build_engine(stub: bool, config: AppConfig) -> PassthroughEngine {
    if stub {
        let factory: Arc<dyn DeviceStreamFactory> = Arc::new(StubStreamFactory::new());
        PassthroughEngine::new(factory, config)
    } else {
        PassthroughEngine::with_platform_defaults(config)
    }
}

fn report_start_failure(err: &EngineError) -> Result<ExitCode> {
    println!("{}", serde_json::to_string(&ErrorReport::from(err))?);
    Ok(ExitCode::from(2))
}

fn run_negotiate(engine: PassthroughEngine) -> Result<ExitCode> {
    if let Err(err) = engine.start() {
        return report_start_failure(&err);
    }
    let negotiated = engine
        .active_config()
        .context("engine running without a negotiated configuration")?;
    engine.stop();

    println!("{}", serde_json::to_string_pretty(&negotiated)?);
    Ok(ExitCode::SUCCESS)
}

fn run_live(engine: PassthroughEngine, duration: Duration, interval: Duration) -> Result<ExitCode> {
    if let Err(err) = engine.start() {
        return report_start_failure(&err);
    }
    if let Some(negotiated) = engine.active_config() {
        tracing::info!("passthrough running: {}", negotiated);
    }

    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        thread::sleep(interval.min(deadline.saturating_duration_since(Instant::now())));

        if engine.current_state() == EngineState::Faulted {
            let err = engine
                .last_error()
                .context("engine faulted without recording an error")?;
            tracing::warn!("passthrough stopped unexpectedly: {}", err);
            println!("{}", serde_json::to_string(&ErrorReport::from(&err))?);
            engine.stop();
            return Ok(ExitCode::from(3));
        }
        println!("{}", serde_json::to_string(&engine.stats())?);
    }

    engine.stop();
    println!("{}", serde_json::to_string(&engine.stats())?);
    Ok(ExitCode::SUCCESS)
}
