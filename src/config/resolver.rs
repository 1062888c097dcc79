//! Precedence resolution for configuration.
//!
//! ## Config file location (highest to lowest)
//!
//! 1. `--config` flag
//! 2. `DECKWARDEN_CONFIG` environment variable
//! 3. `~/.config/deckwarden/config.kdl`
//!
//! A missing file means defaults.
//!
//! ## Value precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. Environment variables (`DECKWARDEN_FLATPAK`, `DECKWARDEN_APP_ID`,
//!    `DECKWARDEN_TIMEOUT_MS`)
//! 3. config.kdl
//! 4. Built-in defaults

use crate::backend::BackendConfig;
use crate::clipboard::{ClipboardMechanism, DEFAULT_CLIPBOARD_TIMEOUT};
use crate::config::schema::{DeckwardenConfig, TIMEOUT_RANGE_MS};
use crate::process::DEFAULT_TIMEOUT;
use crate::vault::Launcher;
use crate::vault::command::{DEFAULT_APP_ID, DEFAULT_PASSWORD_ENV, DEFAULT_RUNNER};
use crate::{Error, Result};
use serde::{Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "DECKWARDEN_CONFIG";
/// Environment variable overriding the sandbox runner.
pub const FLATPAK_ENV: &str = "DECKWARDEN_FLATPAK";
/// Environment variable overriding the application id.
pub const APP_ID_ENV: &str = "DECKWARDEN_APP_ID";
/// Environment variable overriding the vault CLI timeout.
pub const TIMEOUT_ENV: &str = "DECKWARDEN_TIMEOUT_MS";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from CLI flag
    CliFlag,
    /// Value from environment variable
    EnvVar(String),
    /// Value from config.kdl
    File,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::File => write!(f, "file"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

impl Serialize for ValueSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolved<T> {
    /// The resolved value
    pub value: T,
    /// Where the value came from
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// CLI overrides for configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Config file from `--config`
    pub config_path: Option<PathBuf>,
    /// Sandbox runner from `--flatpak`
    pub flatpak: Option<String>,
    /// Application id from `--app-id`
    pub app_id: Option<String>,
    /// Vault CLI timeout from `--timeout-ms`
    pub timeout_ms: Option<u64>,
}

/// Fully resolved configuration with source tracking.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    /// Config file consulted, whether or not it existed
    pub path: Option<Resolved<PathBuf>>,
    pub file_found: bool,
    pub flatpak: Resolved<String>,
    pub app_id: Resolved<String>,
    pub timeout_ms: Resolved<u64>,
    pub clipboard_timeout_ms: Resolved<u64>,
    pub clipboard: Resolved<Vec<ClipboardMechanism>>,
    pub password_env: Resolved<String>,
    pub attach_diagnostics: Resolved<bool>,
    pub lock_on_teardown: Resolved<bool>,
    pub log_dir: Option<Resolved<PathBuf>>,
}

impl ResolvedConfig {
    /// Backend settings, with an optional starting session key.
    pub fn backend_config(&self, session_key: Option<String>) -> BackendConfig {
        BackendConfig {
            launcher: Launcher {
                runner: self.flatpak.value.clone(),
                app_id: self.app_id.value.clone(),
                password_env: self.password_env.value.clone(),
                timeout: Duration::from_millis(self.timeout_ms.value),
            },
            clipboard: self.clipboard.value.clone(),
            clipboard_timeout: Duration::from_millis(self.clipboard_timeout_ms.value),
            attach_diagnostics: self.attach_diagnostics.value,
            lock_on_teardown: self.lock_on_teardown.value,
            session_key,
        }
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_ref().map(|r| r.value.as_path())
    }
}

/// Default config file location.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("deckwarden").join("config.kdl"))
}

/// Resolve configuration from the process environment.
pub fn resolve_config(overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    resolve_config_with(overrides, |name| std::env::var(name).ok(), default_config_path())
}

/// Resolve configuration with an injected environment lookup and default path.
pub fn resolve_config_with(
    overrides: &ConfigOverrides,
    env: impl Fn(&str) -> Option<String>,
    default_path: Option<PathBuf>,
) -> Result<ResolvedConfig> {
    let env = |name: &str| env(name).filter(|v| !v.trim().is_empty());

    let path = if let Some(ref path) = overrides.config_path {
        Some(Resolved::new(path.clone(), ValueSource::CliFlag))
    } else if let Some(path) = env(CONFIG_ENV) {
        Some(Resolved::new(
            PathBuf::from(path),
            ValueSource::EnvVar(CONFIG_ENV.to_string()),
        ))
    } else {
        default_path.map(|p| Resolved::new(p, ValueSource::Default))
    };

    let (file, file_found) = match &path {
        Some(resolved) => read_config_file(&resolved.value)?,
        None => (DeckwardenConfig::new(), false),
    };

    let flatpak = pick(
        overrides.flatpak.clone(),
        FLATPAK_ENV,
        env(FLATPAK_ENV),
        file.flatpak,
        DEFAULT_RUNNER.to_string(),
    );
    let app_id = pick(
        overrides.app_id.clone(),
        APP_ID_ENV,
        env(APP_ID_ENV),
        file.app_id,
        DEFAULT_APP_ID.to_string(),
    );
    let env_timeout = match env(TIMEOUT_ENV) {
        Some(raw) => Some(raw.trim().parse::<u64>().map_err(|_| {
            Error::Config(format!("{} must be an integer, got {:?}", TIMEOUT_ENV, raw))
        })?),
        None => None,
    };
    let timeout_ms = pick(
        overrides.timeout_ms,
        TIMEOUT_ENV,
        env_timeout,
        file.timeout_ms,
        DEFAULT_TIMEOUT.as_millis() as u64,
    );
    if !TIMEOUT_RANGE_MS.contains(&timeout_ms.value) {
        return Err(Error::Config(format!(
            "timeout-ms must be {}-{}, got {} (from {})",
            TIMEOUT_RANGE_MS.start(),
            TIMEOUT_RANGE_MS.end(),
            timeout_ms.value,
            timeout_ms.source
        )));
    }
    for resolved in [&flatpak, &app_id] {
        if resolved.value.trim().is_empty() {
            return Err(Error::Config(format!(
                "empty value from {}",
                resolved.source
            )));
        }
    }

    Ok(ResolvedConfig {
        path,
        file_found,
        flatpak,
        app_id,
        timeout_ms,
        clipboard_timeout_ms: from_file(
            file.clipboard_timeout_ms,
            DEFAULT_CLIPBOARD_TIMEOUT.as_millis() as u64,
        ),
        clipboard: from_file(file.clipboard, ClipboardMechanism::DEFAULT_ORDER.to_vec()),
        password_env: from_file(file.password_env, DEFAULT_PASSWORD_ENV.to_string()),
        attach_diagnostics: from_file(file.attach_diagnostics, false),
        lock_on_teardown: from_file(file.lock_on_teardown, false),
        log_dir: file.log_dir.map(|dir| Resolved::new(dir, ValueSource::File)),
    })
}

fn read_config_file(path: &Path) -> Result<(DeckwardenConfig, bool)> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let config = DeckwardenConfig::parse(&contents).map_err(|e| {
                let reason = match e {
                    Error::Config(reason) => reason,
                    other => other.to_string(),
                };
                Error::Config(format!("{}: {}", path.display(), reason))
            })?;
            Ok((config, true))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok((DeckwardenConfig::new(), false))
        }
        Err(e) => Err(e.into()),
    }
}

fn pick<T>(
    flag: Option<T>,
    env_name: &str,
    env_value: Option<T>,
    file_value: Option<T>,
    default: T,
) -> Resolved<T> {
    if let Some(value) = flag {
        Resolved::new(value, ValueSource::CliFlag)
    } else if let Some(value) = env_value {
        Resolved::new(value, ValueSource::EnvVar(env_name.to_string()))
    } else {
        from_file(file_value, default)
    }
}

fn from_file<T>(file_value: Option<T>, default: T) -> Resolved<T> {
    match file_value {
        Some(value) => Resolved::new(value, ValueSource::File),
        None => Resolved::new(default, ValueSource::Default),
    }
}
