//! KDL schema for config.kdl.
//!
//! ```kdl
//! flatpak "/usr/bin/flatpak"
//! app-id "com.bitwarden.desktop"
//! timeout-ms 10000
//! clipboard-timeout-ms 2000
//! clipboard "wl-copy" "xclip" "xsel"
//! password-env "BW_PASSWORD"
//! attach-diagnostics #false
//! lock-on-teardown #false
//! log-dir "/home/deck/homebrew/logs/deckwarden"
//! ```
//!
//! Every key is optional; unset keys fall through to environment variables
//! and built-in defaults (see [`super::resolver`]).

use crate::clipboard::ClipboardMechanism;
use crate::{Error, Result};
use kdl::{KdlDocument, KdlNode};
use std::path::PathBuf;

/// Accepted range for every timeout setting, in milliseconds.
pub const TIMEOUT_RANGE_MS: std::ops::RangeInclusive<u64> = 1..=600_000;

/// Values read from config.kdl. `None` means "not set in the file".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeckwardenConfig {
    /// Sandbox runner binary
    pub flatpak: Option<String>,
    /// Application id of the sandboxed vault app
    pub app_id: Option<String>,
    /// Timeout for vault CLI calls
    pub timeout_ms: Option<u64>,
    /// Timeout for each clipboard attempt
    pub clipboard_timeout_ms: Option<u64>,
    /// Clipboard mechanisms to try, in order
    pub clipboard: Option<Vec<ClipboardMechanism>>,
    /// Environment variable used to hand passwords to the CLI
    pub password_env: Option<String>,
    pub attach_diagnostics: Option<bool>,
    pub lock_on_teardown: Option<bool>,
    /// Directory for the rolling JSON log
    pub log_dir: Option<PathBuf>,
}

fn first_string(node: &KdlNode) -> Result<String> {
    node.entries()
        .first()
        .and_then(|e| e.value().as_string())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::Config(format!("{} expects a string", node.name().value()))
        })
}

fn first_integer(node: &KdlNode) -> Result<u64> {
    let value = node
        .entries()
        .first()
        .and_then(|e| e.value().as_integer())
        .ok_or_else(|| {
            Error::Config(format!("{} expects an integer", node.name().value()))
        })?;
    u64::try_from(value)
        .map_err(|_| Error::Config(format!("{} must not be negative", node.name().value())))
}

fn first_bool(node: &KdlNode) -> Result<bool> {
    node.entries()
        .first()
        .and_then(|e| e.value().as_bool())
        .ok_or_else(|| Error::Config(format!("{} expects #true or #false", node.name().value())))
}

impl DeckwardenConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate config.kdl contents.
    pub fn parse(source: &str) -> Result<Self> {
        let doc: KdlDocument = source
            .parse()
            .map_err(|e: kdl::KdlError| Error::Config(e.to_string()))?;
        let config = Self::from_kdl(&doc)?;
        config.validate().map_err(Error::Config)?;
        Ok(config)
    }

    /// Read values from a KDL document. Unknown keys are ignored with a warning.
    pub fn from_kdl(doc: &KdlDocument) -> Result<Self> {
        let mut config = Self::new();

        for node in doc.nodes() {
            match node.name().value() {
                "flatpak" => config.flatpak = Some(first_string(node)?),
                "app-id" => config.app_id = Some(first_string(node)?),
                "timeout-ms" => config.timeout_ms = Some(first_integer(node)?),
                "clipboard-timeout-ms" => config.clipboard_timeout_ms = Some(first_integer(node)?),
                "password-env" => config.password_env = Some(first_string(node)?),
                "attach-diagnostics" => config.attach_diagnostics = Some(first_bool(node)?),
                "lock-on-teardown" => config.lock_on_teardown = Some(first_bool(node)?),
                "log-dir" => config.log_dir = Some(PathBuf::from(first_string(node)?)),
                "clipboard" => {
                    let mut mechanisms = Vec::new();
                    for entry in node.entries() {
                        let name = entry.value().as_string().ok_or_else(|| {
                            Error::Config("clipboard expects mechanism names".to_string())
                        })?;
                        let mechanism = ClipboardMechanism::parse(name).ok_or_else(|| {
                            Error::Config(format!("unknown clipboard mechanism: {}", name))
                        })?;
                        if !mechanisms.contains(&mechanism) {
                            mechanisms.push(mechanism);
                        }
                    }
                    config.clipboard = Some(mechanisms);
                }
                other => tracing::warn!(key = other, "ignoring unknown config key"),
            }
        }

        Ok(config)
    }

    /// Validate the config values.
    ///
    /// Returns an error message if any value is invalid.
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (key, value) in [
            ("timeout-ms", self.timeout_ms),
            ("clipboard-timeout-ms", self.clipboard_timeout_ms),
        ] {
            if let Some(ms) = value {
                if !TIMEOUT_RANGE_MS.contains(&ms) {
                    return Err(format!(
                        "{} must be {}-{}, got {}",
                        key,
                        TIMEOUT_RANGE_MS.start(),
                        TIMEOUT_RANGE_MS.end(),
                        ms
                    ));
                }
            }
        }
        for (key, value) in [
            ("flatpak", &self.flatpak),
            ("app-id", &self.app_id),
            ("password-env", &self.password_env),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(format!("{} must not be empty", key));
            }
        }
        if let Some(name) = &self.password_env {
            if !is_env_name(name) {
                return Err(format!("password-env is not a valid variable name: {}", name));
            }
        }
        if self.clipboard.as_ref().is_some_and(Vec::is_empty) {
            return Err("clipboard must list at least one mechanism".to_string());
        }
        Ok(())
    }
}

fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
