//! Controller emulator library: CLI/env configuration, HID gadget transport,
//! protocol engine, network control surface, and macro engine. `main.rs` is
//! a thin shim over `run()`; integration tests drive the same modules
//! directly against a fake HID transport and a real TCP listener.

pub mod config;
pub mod controller;
pub mod error;
pub mod macro_engine;
pub mod net;
pub mod protocol;
pub mod scheduler;
pub mod shared_state;
pub mod spi_rom;
pub mod transport;

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::filter::{FilterFn, LevelFilter};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use config::{Cli, Command};
use controller::ControllerState;
use macro_engine::{MacroRunner, MacroStore};
use net::NetContext;
use protocol::{InputReportFlag, ProtocolEngine, TickCounter};
use scheduler::{spawn_hid_reader, spawn_input_report_emitter, spawn_tick_counter};
use shared_state::SharedState;
use spi_rom::SpiRomStore;
use transport::{FileHidTransport, HidTransport};

const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

fn parse_level(raw: &str) -> tracing::Level {
    match raw.to_ascii_uppercase().as_str() {
        "TRACE" => tracing::Level::TRACE,
        "DEBUG" => tracing::Level::DEBUG,
        "WARN" | "WARNING" => tracing::Level::WARN,
        "ERROR" | "CRITICAL" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

/// ERROR routes to stderr; DEBUG/INFO/WARN route to stdout, mirroring the
/// reference implementation's two-handler logging split. `RUST_LOG` still
/// works for per-target overrides on top of `--log-level`'s base threshold.
fn init_logging(log_level: &str) {
    let level = parse_level(log_level);
    let base_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string().to_lowercase()))
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(base_filter())
        .with_filter(LevelFilter::ERROR);

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_filter(base_filter())
        .with_filter(FilterFn::new(|meta| meta.level() != &tracing::Level::ERROR));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(stdout_layer)
        .init();
}

/// Parse CLI/env configuration, bring up the emulator, and run until a
/// shutdown signal (or an unrecoverable network failure) is observed.
pub async fn run() -> ExitCode {
    let Command::Serve(args) = Cli::parse().command;
    init_logging(&args.log_level);

    info!(
        filepath = %args.filepath.display(),
        addr = %args.net_addr(),
        "starting controller emulator"
    );

    let spi_rom = match SpiRomStore::load(&args.spi_rom_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("failed to load SPI-ROM store: {e}");
            return ExitCode::from(1);
        }
    };

    let transport: Arc<Mutex<Box<dyn HidTransport>>> = match FileHidTransport::open(&args.filepath) {
        Ok(t) => Arc::new(Mutex::new(Box::new(t) as Box<dyn HidTransport>)),
        Err(e) => {
            error!("{e}");
            return ExitCode::from(1);
        }
    };

    let shared_state = Arc::new(SharedState::new(ControllerState::neutral()));
    let tick = Arc::new(TickCounter::default());
    let input_report_enabled = Arc::new(InputReportFlag::default());
    let engine = Arc::new(ProtocolEngine::new(tick.clone(), input_report_enabled, spi_rom));

    let shutdown = Arc::new(AtomicBool::new(false));

    let tick_thread = spawn_tick_counter(tick, shutdown.clone());
    let emitter_thread = spawn_input_report_emitter(
        engine.clone(),
        shared_state.clone(),
        transport.clone(),
        shutdown.clone(),
    );
    let reader_thread = spawn_hid_reader(engine, shared_state.clone(), transport, shutdown.clone());

    let macro_runner = Arc::new(MacroRunner::new(shared_state.clone()));
    let macro_store = Arc::new(MacroStore::new(args.macros_dir.clone()));
    let net_ctx = Arc::new(NetContext {
        shared_state,
        macro_runner: macro_runner.clone(),
        macro_store,
    });

    let net_addr = args.net_addr();
    let net_shutdown = shutdown.clone();
    let mut net_task = tokio::spawn(async move { net::serve(&net_addr, net_ctx, net_shutdown).await });

    let exit_code = tokio::select! {
        () = wait_for_shutdown_signal() => {
            info!("shutdown signal received");
            0
        }
        result = &mut net_task => {
            error!("network listener exited unexpectedly: {result:?}");
            2
        }
    };

    shutdown.store(true, Ordering::Relaxed);
    macro_runner.stop_and_wait();

    if !net_task.is_finished() {
        if tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, net_task).await.is_err() {
            warn!("network listener did not stop within the shutdown timeout");
        }
    }
    join_with_timeout("tick-counter", tick_thread).await;
    join_with_timeout("input-report-emitter", emitter_thread).await;
    join_with_timeout("hid-reader", reader_thread).await;

    info!("shutdown complete");
    ExitCode::from(exit_code)
}

/// Waits for SIGINT or SIGTERM. A second SIGINT received after the first
/// forces an immediate exit rather than waiting for graceful shutdown.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tokio::spawn(async {
        let _ = tokio::signal::ctrl_c().await;
        warn!("second interrupt received, exiting immediately");
        std::process::exit(130);
    });
}

async fn join_with_timeout(name: &str, handle: std::thread::JoinHandle<()>) {
    let joined = tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, tokio::task::spawn_blocking(move || handle.join())).await;
    match joined {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!("{name} thread panicked: {e:?}"),
        Ok(Err(e)) => error!("failed to join {name} thread: {e}"),
        Err(_) => warn!("{name} thread did not stop within the shutdown timeout"),
    }
}
