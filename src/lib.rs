//! Deckwarden - command orchestration for a sandboxed Bitwarden CLI.
//!
//! This library provides the core of the `deckwarden` tool: it runs the
//! vault CLI inside its Flatpak sandbox, classifies failures into a closed
//! error taxonomy, tracks the session phase, and copies secrets to the
//! clipboard. Every operation returns a [`envelope::ResultEnvelope`].

pub mod backend;
pub mod cli;
pub mod clipboard;
pub mod config;
pub mod envelope;
pub mod logging;
pub mod models;
pub mod process;
pub mod rpc;
pub mod session;
pub mod vault;

/// Version string for `--version` and the `ready` message.
pub const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("DW_GIT_COMMIT"),
    " ",
    env!("DW_BUILD_TIMESTAMP"),
    ")"
);


/// Library-level error type for Deckwarden operations.
///
/// Covers the ambient layer (configuration, I/O, serialization). Vault
/// operations report failures through [`envelope::ErrorCode`] instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Deckwarden operations.
pub type Result<T> = std::result::Result<T, Error>;
