//! Argument-vector construction for the vault CLI.
//!
//! Every vault call is wrapped as
//! `<runner> run --command=bw <app-id> <subcommand> <args...>`.
//! Nothing here goes through a shell, and secrets only travel through
//! [`SecretEnv`].

use super::Operation;
use crate::models::TwoFactorAttempt;
use crate::process::{Invocation, SecretEnv};
use std::time::Duration;

/// Sandbox runner used when nothing is configured.
pub const DEFAULT_RUNNER: &str = "flatpak";
/// Sandboxed application bundling the CLI.
pub const DEFAULT_APP_ID: &str = "com.bitwarden.desktop";
/// Command selected inside the sandbox.
pub const CLI_COMMAND: &str = "bw";
/// Environment variable carrying the unlocked session key.
pub const SESSION_ENV: &str = "BW_SESSION";
/// Environment variable carrying passwords for `--passwordenv`.
pub const DEFAULT_PASSWORD_ENV: &str = "BW_PASSWORD";

/// A caller-supplied positional value that cannot be passed to the CLI.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field}: {reason}")]
pub struct InvalidArgument {
    pub field: &'static str,
    pub reason: &'static str,
}

/// Reject values that would be empty or parsed as options.
pub fn validate_positional(field: &'static str, value: &str) -> Result<(), InvalidArgument> {
    if value.trim().is_empty() {
        return Err(InvalidArgument {
            field,
            reason: "must not be empty",
        });
    }
    if value.starts_with('-') {
        return Err(InvalidArgument {
            field,
            reason: "must not start with '-'",
        });
    }
    if value.contains('\0') {
        return Err(InvalidArgument {
            field,
            reason: "must not contain NUL",
        });
    }
    Ok(())
}

/// How to reach the sandboxed CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launcher {
    /// Path or name of the sandbox runner binary.
    pub runner: String,
    /// Application id of the sandboxed vault app.
    pub app_id: String,
    /// Name of the env var used for `--passwordenv`.
    pub password_env: String,
    /// Timeout applied to every call.
    pub timeout: Duration,
}

impl Default for Launcher {
    fn default() -> Self {
        Self {
            runner: DEFAULT_RUNNER.to_string(),
            app_id: DEFAULT_APP_ID.to_string(),
            password_env: DEFAULT_PASSWORD_ENV.to_string(),
            timeout: crate::process::DEFAULT_TIMEOUT,
        }
    }
}

impl Launcher {
    /// Secrets reach the CLI only when a command sets them, never through
    /// the caller's environment.
    fn invocation(&self) -> Invocation {
        Invocation::new(&self.runner)
            .env_remove(SESSION_ENV)
            .env_remove(&self.password_env)
            .timeout(self.timeout)
    }

    /// `flatpak --version`: is the sandbox runtime present?
    pub fn runner_probe(&self) -> Invocation {
        self.invocation().arg("--version")
    }

    /// `flatpak info <app-id>`: is the sandboxed app installed?
    pub fn app_probe(&self) -> Invocation {
        self.invocation().args(["info", self.app_id.as_str()])
    }

    /// Wrap a CLI command so it runs inside the sandbox.
    pub fn wrap(&self, command: VaultCommand) -> Invocation {
        debug_assert!(!self.app_id.is_empty(), "app id must be configured");
        debug_assert!(
            command.args.first().is_some_and(|a| !a.starts_with('-')),
            "vault command must start with a subcommand"
        );
        let mut invocation = self
            .invocation()
            .arg("run")
            .arg(format!("--command={}", CLI_COMMAND))
            .arg(&self.app_id)
            .args(command.args);
        invocation.env = command.env;
        invocation
    }
}

/// Builder for one vault CLI command (the part after the sandbox prefix).
#[derive(Debug, Clone)]
pub struct VaultCommand {
    operation: Operation,
    args: Vec<String>,
    env: SecretEnv,
}

impl VaultCommand {
    fn new(operation: Operation, subcommand: &str) -> Self {
        Self {
            operation,
            args: vec![subcommand.to_string()],
            env: SecretEnv::new(),
        }
    }

    fn flag(mut self, flag: &str) -> Self {
        self.args.push(flag.to_string());
        self
    }

    fn flag_with_value(mut self, flag: &str, value: &str) -> Self {
        self.args.push(flag.to_string());
        self.args.push(value.to_string());
        self
    }

    fn arg(mut self, arg: &str) -> Self {
        self.args.push(arg.to_string());
        self
    }

    fn secret(mut self, name: &str, value: &str) -> Self {
        self.env.set(name, value);
        self
    }

    /// Attach the unlocked session key, if one is held.
    pub fn with_session(self, session_key: Option<&str>) -> Self {
        match session_key {
            Some(key) => self.secret(SESSION_ENV, key),
            None => self,
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Arguments after the sandbox prefix.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn env(&self) -> &SecretEnv {
        &self.env
    }

    /// `status --raw`
    pub fn status() -> Self {
        Self::new(Operation::Status, "status").flag("--raw")
    }

    /// `login <email> --passwordenv <var> --nointeraction`
    pub fn login(email: &str, password_env: &str, password: &str) -> Result<Self, InvalidArgument> {
        validate_positional("email", email)?;
        Ok(Self::new(Operation::Login, "login")
            .arg(email)
            .flag_with_value("--passwordenv", password_env)
            .flag("--nointeraction")
            .secret(password_env, password))
    }

    /// `login <email> --passwordenv <var> --method <m> --code <c> --nointeraction`
    pub fn login_2fa(
        email: &str,
        password_env: &str,
        password: &str,
        attempt: &TwoFactorAttempt,
    ) -> Result<Self, InvalidArgument> {
        validate_positional("email", email)?;
        validate_positional("code", &attempt.code)?;
        Ok(Self::new(Operation::Login2fa, "login")
            .arg(email)
            .flag_with_value("--passwordenv", password_env)
            .flag_with_value("--method", &attempt.method.code().to_string())
            .flag_with_value("--code", attempt.code.trim())
            .flag("--nointeraction")
            .secret(password_env, password))
    }

    /// `unlock --passwordenv <var> --raw`
    pub fn unlock(password_env: &str, password: &str) -> Self {
        Self::new(Operation::Unlock, "unlock")
            .flag_with_value("--passwordenv", password_env)
            .flag("--raw")
            .secret(password_env, password)
    }

    /// `lock`
    pub fn lock() -> Self {
        Self::new(Operation::Lock, "lock")
    }

    /// `logout`
    pub fn logout() -> Self {
        Self::new(Operation::Logout, "logout")
    }

    /// `list items --raw`
    pub fn list_items() -> Self {
        Self::new(Operation::ListItems, "list")
            .arg("items")
            .flag("--raw")
    }

    /// `get item <id> --raw`
    pub fn get_item(id: &str) -> Result<Self, InvalidArgument> {
        validate_positional("item id", id)?;
        Ok(Self::new(Operation::GetItem, "get")
            .arg("item")
            .arg(id)
            .flag("--raw"))
    }

    /// `get totp <id> --raw`
    pub fn get_totp(id: &str) -> Result<Self, InvalidArgument> {
        validate_positional("item id", id)?;
        Ok(Self::new(Operation::GetTotp, "get")
            .arg("totp")
            .arg(id)
            .flag("--raw"))
    }
}
