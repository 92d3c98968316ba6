//! `proxy-guard` process host.
//!
//! Loads settings, starts the watcher on a blocking worker thread and stays
//! resident until Ctrl-C or until the watcher terminates on its own.
//!
//! Usage: `proxy-guard [settings-file]`

use proxy_guard::prelude::*;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::task::{JoinError, JoinHandle};
use tracing_subscriber::EnvFilter;

const PROGRAM_NAME: &str = "ProxyGuard";

fn banner(target: &WatchTarget) -> String {
    format!(
        "=== {name} ===\n\
         Monitors the {entry} registry value and restores it whenever it changes.\n\
         Watched key: {hive}\\{path}\n\
         Enforced value: {desired}\n\
         {rule}",
        name = PROGRAM_NAME,
        entry = target.entry(),
        hive = target.hive(),
        path = target.path(),
        desired = target.desired(),
        rule = "=".repeat(PROGRAM_NAME.len() + 8),
    )
}

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[cfg(windows)]
fn backend(settings: &Settings) -> Result<proxy_guard::store::RegistryStore> {
    Ok(proxy_guard::store::RegistryStore::new().with_poll_interval(settings.poll_interval()))
}

#[cfg(not(windows))]
fn backend(_settings: &Settings) -> Result<proxy_guard::store::MemoryStore> {
    Err(WatchError::Unsupported(
        "the Windows registry is only available on Windows",
    ))
}

#[tokio::main]
async fn main() -> ExitCode {
    let settings_path = std::env::args_os().nth(1).map(PathBuf::from);
    let settings = match Settings::load(settings_path.as_deref()) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("{}: {}", PROGRAM_NAME, err);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&settings.log_filter);

    let backend = match backend(&settings) {
        Ok(backend) => backend,
        Err(err) => {
            tracing::error!("{}", err);
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancelToken::new();
    let builder = Supervisor::builder()
        .with_settings(&settings)
        .with_cancel(cancel.clone());
    let builder = if settings.verbose {
        builder.with_logger(TracingSink)
    } else {
        builder.with_logger(NoopSink)
    };
    let supervisor = builder.build(backend);

    if settings.verbose {
        for line in banner(supervisor.target()).lines() {
            tracing::info!("{}", line);
        }
    }

    let watcher = tokio::task::spawn_blocking(move || supervisor.run());
    if settings.verbose {
        tracing::info!("Monitoring started. Press Ctrl+C to exit.");
    }

    host(watcher, tokio::signal::ctrl_c(), &cancel).await
}

/// Stay resident until `shutdown` resolves or the watcher ends on its own.
///
/// If the shutdown signal cannot be installed the host keeps running on the
/// watcher alone.
async fn host<F>(
    mut watcher: JoinHandle<Termination>,
    shutdown: F,
    cancel: &CancelToken,
) -> ExitCode
where
    F: Future<Output = io::Result<()>>,
{
    tokio::select! {
        signal = shutdown => match signal {
            Ok(()) => {
                cancel.cancel();
                exit_code(watcher.await)
            }
            Err(err) => {
                tracing::warn!("Failed to listen for Ctrl+C: {}", err);
                exit_code(watcher.await)
            }
        },
        joined = &mut watcher => exit_code(joined),
    }
}

fn exit_code(joined: std::result::Result<Termination, JoinError>) -> ExitCode {
    match joined {
        Ok(termination) if termination.reason.is_fatal() => {
            tracing::error!("Watcher stopped: {}", termination.reason);
            ExitCode::FAILURE
        }
        Ok(termination) => {
            tracing::info!(
                notifications = termination.stats.notifications,
                writes = termination.stats.writes,
                "Program terminated"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!("Watcher task failed: {}", err);
            ExitCode::FAILURE
        }
    }
}
