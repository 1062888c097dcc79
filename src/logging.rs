//! Tracing setup for the binary.
//!
//! Human-readable logs go to stderr; stdout is reserved for JSON output and
//! the stdio protocol. With `log-dir` configured, a daily-rolling JSON log is
//! written as well.

use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Environment variable holding a `tracing` filter directive.
pub const LOG_ENV: &str = "DECKWARDEN_LOG";
/// File name prefix for rolling log files.
pub const LOG_FILE_PREFIX: &str = "deckwarden.log";

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Number of `-v` flags
    pub verbose: u8,
    /// `-q`: errors only
    pub quiet: bool,
    /// Value of `DECKWARDEN_LOG`, if set
    pub directive: Option<String>,
    pub log_dir: Option<PathBuf>,
}

impl LogOptions {
    /// Level used when no directive is given.
    pub fn level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    /// `DECKWARDEN_LOG` wins over `-v`/`-q`; an unparsable directive falls
    /// back to the flag level.
    pub fn stderr_filter(&self) -> EnvFilter {
        self.directive
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .and_then(|d| EnvFilter::try_new(d).ok())
            .unwrap_or_else(|| EnvFilter::new(self.level()))
    }
}

/// Install the global subscriber. Keep the returned guard alive for as long
/// as the file log should be flushed.
pub fn init(options: &LogOptions) -> Result<Option<WorkerGuard>> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_filter(options.stderr_filter());

    let (file_layer, guard) = match options.log_dir.as_deref() {
        Some(dir) => {
            let (layer, guard) = file_layer(dir)?;
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Other(format!("failed to initialize logging: {}", e)))?;
    Ok(guard)
}

fn file_layer<S>(dir: &Path) -> Result<(impl tracing_subscriber::Layer<S>, WorkerGuard)>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    std::fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(writer)
        .with_filter(EnvFilter::new("deckwarden=debug"));
    Ok((layer, guard))
}
