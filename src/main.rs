//! # tinit - Agent Entry Point
//!
//! ## Architecture Overview
//!
//! 1. **Load configuration**: read `runner_socket_path`, `root_dir`, and
//!    `start_cmd` from the environment.
//! 2. **Initialize logging**: structured logs to a daily-rolling file, plus a
//!    colorized summary on stderr.
//! 3. **Start the Filesystem Service**: scope operations to `root_dir` and
//!    begin watching it recursively.
//! 4. **Dial the Runner**: connect to its socket and wait for readiness.
//! 5. **Start the template**: launch `start_cmd` as the template's
//!    foreground process.
//! 6. **Announce readiness**: send `Status = "Ready"` once the template and
//!    the watchers are both up.
//! 7. **Dispatch**: run the event loop for the life of the process. The
//!    template's start command exiting is logged but does not end the
//!    agent; only the transport disconnecting (container teardown) does.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, prelude::*, Layer};

use tinit::command::CommandSupervisor;
use tinit::config::{AgentConfig, DEFAULT_LOG_FILE};
use tinit::dispatcher::Dispatcher;
use tinit::fs::Filesystem;
use tinit::logging::ColorizedFormatter;
use tinit::template::Template;
use tinit::transport::UnixSocketTransport;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AgentConfig::from_env().context("failed to load agent configuration from environment")?;

    let _log_guard = init_logging(&config)?;

    info!(version = tinit::VERSION, "starting tinit agent");

    let (fs, fs_events) = Filesystem::new(&config.root_dir).context("failed to start filesystem watcher")?;
    let (commands, cmd_events) = CommandSupervisor::new(config.root_dir.clone());
    let template = Template::new(fs, commands, config.root_dir.clone());

    let (transport, mut ready_rx, mut error_rx) = UnixSocketTransport::new(&config.runner_socket_path);

    let dial_transport = transport.clone();
    tokio::spawn(async move { dial_transport.dial_and_read().await });

    tokio::spawn(async move {
        while let Some(error) = error_rx.recv().await {
            warn!(%error, "transport error");
        }
    });

    ready_rx.recv().await.context("transport closed before connecting to the Runner")?;
    info!(socket = %config.runner_socket_path.display(), "connected to Runner");

    template.start(&config.start_cmd).await;

    transport.send_ready().await.context("failed to announce readiness to the Runner")?;
    info!("template ready");

    let dispatcher = Dispatcher::new(transport, template.clone());
    let dispatch_handle = tokio::spawn(async move { dispatcher.run(fs_events, cmd_events).await });

    tokio::spawn(async move {
        template.wait_done().await;
        info!("template start command exited, agent stays up for the Runner to inspect or restart it");
    });

    // The dispatcher loops until the transport disconnects; the process only
    // ends via container teardown, not template exit.
    let _ = dispatch_handle.await;
    Ok(())
}

/// Wire up the daily-rolling file layer and the colorized stderr layer. The
/// returned guard must be held for the life of the process: dropping it
/// stops the non-blocking file writer.
fn init_logging(config: &AgentConfig) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_path = config.log_file.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE));
    let log_dir = log_path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new(".")).to_path_buf();
    let log_filename = log_path.file_name().unwrap_or_else(|| std::ffi::OsStr::new(DEFAULT_LOG_FILE)).to_owned();

    let file_appender = tracing_appender::rolling::daily(&log_dir, &log_filename);
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let detailed_log_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_writer)
        .with_ansi(false)
        .with_filter(env_filter());

    let stderr_log_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .event_format(ColorizedFormatter)
        .with_filter(env_filter());

    tracing_subscriber::registry().with(detailed_log_layer).with(stderr_log_layer).init();

    Ok(guard)
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
}
