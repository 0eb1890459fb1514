//! Tracing setup for the sync service.
//!
//! Every sync step logs with the ids it touches (`source_id`, `item_id`, `index_id`, `file_id`,
//! `agent_id`), so one item can be followed from upload to agent propagation. Those events go
//! to stdout and to an append-only file at `KNOWLEDGE_SYNC_LOG_FILE`, or
//! `logs/knowledge-sync.log` when that is unset. Attach polling and migration runs can log for
//! minutes, so the file layer writes through a non-blocking worker.
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const LOG_FILE_ENV: &str = "KNOWLEDGE_SYNC_LOG_FILE";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_FILE: &str = "knowledge-sync.log";

/// Install the global subscriber used by `serve` and `migrate`.
///
/// `RUST_LOG` filters both layers and defaults to `info`. Stdout omits targets; the file keeps
/// them so provider, index and agent events stay distinguishable after the fact.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false).compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    match open_log_file(&log_file_path(std::env::var(LOG_FILE_ENV).ok())) {
        Some(writer) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .compact();
            registry.with(file_layer).init();
        }
        None => registry.init(),
    }
}

/// Resolve the sync log file, preferring a non-blank override.
fn log_file_path(override_path: Option<String>) -> PathBuf {
    match override_path {
        Some(path) if !path.trim().is_empty() => PathBuf::from(path.trim()),
        _ => Path::new(DEFAULT_LOG_DIR).join(DEFAULT_LOG_FILE),
    }
}

/// Returns `None` when the parent directory or the file cannot be created; stdout still works.
fn open_log_file(path: &Path) -> Option<NonBlocking> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(err) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create log directory {}: {err}", parent.display());
        return None;
    }
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
    {
        Ok(file) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let _ = LOG_GUARD.set(guard);
            Some(non_blocking)
        }
        Err(err) => {
            eprintln!("Failed to open log file {}: {err}", path.display());
            None
        }
    }
}
