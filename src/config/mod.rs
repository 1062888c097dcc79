//! Configuration for Deckwarden.
//!
//! ## config.kdl - User preferences
//!
//! Located at `~/.config/deckwarden/config.kdl` unless `--config` or
//! `DECKWARDEN_CONFIG` point elsewhere. Contains:
//! - `flatpak` - Sandbox runner binary
//! - `app-id` - Application id of the sandboxed vault app
//! - `timeout-ms` / `clipboard-timeout-ms` - Per-call timeouts
//! - `clipboard` - Clipboard mechanisms, in the order they are tried
//! - `password-env` - Variable name used to hand passwords to the CLI
//! - `attach-diagnostics` - Attach raw CLI output to failures
//! - `lock-on-teardown` - Lock the vault when the backend stops
//! - `log-dir` - Directory for a daily-rolling JSON log
//!
//! The file never contains secrets; the session key only ever comes from
//! `BW_SESSION` or `--session`.
//!
//! Use the [`resolver`] module for unified precedence resolution.

pub mod resolver;
pub mod schema;

pub use resolver::{
    APP_ID_ENV, CONFIG_ENV, ConfigOverrides, FLATPAK_ENV, Resolved, ResolvedConfig, TIMEOUT_ENV,
    ValueSource, default_config_path, resolve_config, resolve_config_with,
};
pub use schema::DeckwardenConfig;
