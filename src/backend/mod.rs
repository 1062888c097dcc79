//! The backend: one logical vault session behind a single-worker queue.
//!
//! Session operations (`status`, `login`, `unlock`, ...) are queued and run
//! one at a time on the session worker. Host probes and clipboard copies run
//! on the caller's thread and never wait behind the queue.
//!
//! ```ignore
//! let backend = Backend::init(BackendConfig::default(), Arc::new(SystemRunner))?;
//! let events = backend.subscribe();
//! let envelope = backend.execute(Request::Status);
//! backend.teardown();
//! ```

mod core;
mod hub;
mod queue;

pub use self::core::{LoginOutcome, Totp};
pub use queue::Pending;

use self::core::Core;
use crate::clipboard::{ClipboardMechanism, ClipboardWriter, Copied, DEFAULT_CLIPBOARD_TIMEOUT};
use crate::envelope::{ErrorCode, Failure, Outcome, ResultEnvelope};
use crate::models::{StatusReport, VaultItem, filter_logins};
use crate::process::{CommandResult, CommandRunner, Invocation};
use crate::session::{PhaseEvent, Session};
use crate::vault::parse::{RunnerVersion, parse_runner_version};
use crate::vault::{Launcher, Operation, check};
use hub::SessionHub;
use queue::SessionQueue;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// Everything the backend needs to know about its environment.
#[derive(Clone)]
pub struct BackendConfig {
    pub launcher: Launcher,
    pub clipboard: Vec<ClipboardMechanism>,
    pub clipboard_timeout: Duration,
    /// Attach raw command output to classified failures.
    pub attach_diagnostics: bool,
    /// Lock the vault during teardown.
    pub lock_on_teardown: bool,
    /// Session key to start with, e.g. from `BW_SESSION`.
    pub session_key: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            launcher: Launcher::default(),
            clipboard: ClipboardMechanism::DEFAULT_ORDER.to_vec(),
            clipboard_timeout: DEFAULT_CLIPBOARD_TIMEOUT,
            attach_diagnostics: false,
            lock_on_teardown: false,
            session_key: None,
        }
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("launcher", &self.launcher)
            .field("clipboard", &self.clipboard)
            .field("clipboard_timeout", &self.clipboard_timeout)
            .field("attach_diagnostics", &self.attach_diagnostics)
            .field("lock_on_teardown", &self.lock_on_teardown)
            .field("session_key", &self.session_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Payload of a successful `check_bitwarden`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Installed {
    pub installed: bool,
}

/// One operation with its parameters, as received from a front end.
#[derive(Clone)]
pub enum Request {
    CheckFlatpak,
    CheckBitwarden,
    Status,
    Login {
        email: String,
        password: String,
    },
    Login2fa {
        email: String,
        password: String,
        method: u8,
        code: String,
    },
    Unlock {
        master_password: String,
    },
    Lock,
    Logout,
    ListItems {
        logins_only: bool,
    },
    GetItem {
        id: String,
    },
    GetTotp {
        id: String,
    },
    CopyToClipboard {
        text: String,
    },
}

impl Request {
    pub fn operation(&self) -> Operation {
        match self {
            Request::CheckFlatpak => Operation::CheckFlatpak,
            Request::CheckBitwarden => Operation::CheckBitwarden,
            Request::Status => Operation::Status,
            Request::Login { .. } => Operation::Login,
            Request::Login2fa { .. } => Operation::Login2fa,
            Request::Unlock { .. } => Operation::Unlock,
            Request::Lock => Operation::Lock,
            Request::Logout => Operation::Logout,
            Request::ListItems { .. } => Operation::ListItems,
            Request::GetItem { .. } => Operation::GetItem,
            Request::GetTotp { .. } => Operation::GetTotp,
            Request::CopyToClipboard { .. } => Operation::CopyToClipboard,
        }
    }
}

// Parameters carry passwords and clipboard text.
impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("operation", &self.operation())
            .finish_non_exhaustive()
    }
}

pub struct Backend {
    runner: Arc<dyn CommandRunner>,
    launcher: Launcher,
    clipboard: ClipboardWriter,
    hub: Arc<SessionHub>,
    queue: SessionQueue,
    lock_on_teardown: bool,
}

impl Backend {
    /// Start the session worker and learn the initial phase from `status`.
    pub fn init(config: BackendConfig, runner: Arc<dyn CommandRunner>) -> crate::Result<Self> {
        let backend = Self::start(config, runner)?;
        match backend.status().wait() {
            Ok(report) => tracing::info!(status = %report.status, "backend ready"),
            Err(failure) => tracing::warn!(code = %failure.code, "initial status probe failed"),
        }
        Ok(backend)
    }

    /// Start the session worker without probing. The phase stays
    /// `Unauthenticated` until the first session operation reports otherwise.
    pub fn start(config: BackendConfig, runner: Arc<dyn CommandRunner>) -> crate::Result<Self> {
        let hub = Arc::new(SessionHub::default());
        let core = Core::new(
            runner.clone(),
            config.launcher.clone(),
            config.attach_diagnostics,
            config.session_key,
            hub.clone(),
        );
        let queue = SessionQueue::start(core)?;
        let backend = Self {
            clipboard: ClipboardWriter::new(
                runner.clone(),
                config.clipboard,
                config.clipboard_timeout,
            ),
            runner,
            launcher: config.launcher,
            hub,
            queue,
            lock_on_teardown: config.lock_on_teardown,
        };
        Ok(backend)
    }

    /// Current session snapshot. Never waits behind the queue.
    pub fn session(&self) -> Session {
        self.hub.snapshot()
    }

    /// Receive a [`PhaseEvent`] after every session operation.
    pub fn subscribe(&self) -> Receiver<PhaseEvent> {
        self.hub.subscribe()
    }

    /// Is the sandbox runner available?
    pub fn check_flatpak(&self) -> Outcome<RunnerVersion> {
        check_flatpak(self.runner.as_ref(), &self.launcher)
    }

    /// Is the sandboxed vault application installed?
    pub fn check_bitwarden(&self) -> Outcome<Installed> {
        check_bitwarden(self.runner.as_ref(), &self.launcher)
    }

    pub fn copy_to_clipboard(&self, text: &str) -> Outcome<Copied> {
        self.clipboard.copy(text)
    }

    pub fn status(&self) -> Pending<StatusReport> {
        self.queue.submit(Operation::Status, |core| core.status())
    }

    pub fn login(&self, email: &str, password: &str) -> Pending<LoginOutcome> {
        let (email, password) = (email.to_string(), password.to_string());
        self.queue
            .submit(Operation::Login, move |core| core.login(&email, &password))
    }

    pub fn login_2fa(
        &self,
        email: &str,
        password: &str,
        method: u8,
        code: &str,
    ) -> Pending<LoginOutcome> {
        let (email, password, code) = (email.to_string(), password.to_string(), code.to_string());
        self.queue.submit(Operation::Login2fa, move |core| {
            core.login_2fa(&email, &password, method, &code)
        })
    }

    /// Returns the session key on success.
    pub fn unlock(&self, master_password: &str) -> Pending<String> {
        let master_password = master_password.to_string();
        self.queue
            .submit(Operation::Unlock, move |core| core.unlock(&master_password))
    }

    pub fn lock(&self) -> Pending<()> {
        self.queue.submit(Operation::Lock, |core| core.lock())
    }

    pub fn logout(&self) -> Pending<()> {
        self.queue.submit(Operation::Logout, |core| core.logout())
    }

    pub fn list_items(&self) -> Pending<Vec<VaultItem>> {
        self.queue
            .submit(Operation::ListItems, |core| core.list_items())
    }

    pub fn get_item(&self, id: &str) -> Pending<VaultItem> {
        let id = id.to_string();
        self.queue
            .submit(Operation::GetItem, move |core| core.get_item(&id))
    }

    pub fn get_totp(&self, id: &str) -> Pending<Totp> {
        let id = id.to_string();
        self.queue
            .submit(Operation::GetTotp, move |core| core.get_totp(&id))
    }

    /// Start a request. Session operations join the queue right away, so
    /// requests submitted from one thread run in submission order. Probes and
    /// clipboard copies run on whichever thread waits on the handle.
    pub fn submit(&self, request: Request) -> Pending<ResultEnvelope<Value>> {
        let operation = request.operation();
        match request {
            Request::CheckFlatpak => {
                let (runner, launcher) = (self.runner.clone(), self.launcher.clone());
                Pending::deferred(move || {
                    Ok(ResultEnvelope::from_outcome(check_flatpak(
                        runner.as_ref(),
                        &launcher,
                    )))
                })
            }
            Request::CheckBitwarden => {
                let (runner, launcher) = (self.runner.clone(), self.launcher.clone());
                Pending::deferred(move || {
                    Ok(ResultEnvelope::from_outcome(check_bitwarden(
                        runner.as_ref(),
                        &launcher,
                    )))
                })
            }
            Request::CopyToClipboard { text } => {
                let clipboard = self.clipboard.clone();
                Pending::deferred(move || Ok(ResultEnvelope::from_outcome(clipboard.copy(&text))))
            }
            Request::Status => self.enqueue(operation, |core| core.status()),
            Request::Login { email, password } => {
                self.enqueue(operation, move |core| core.login(&email, &password))
            }
            Request::Login2fa {
                email,
                password,
                method,
                code,
            } => self.enqueue(operation, move |core| {
                core.login_2fa(&email, &password, method, &code)
            }),
            Request::Unlock { master_password } => {
                self.enqueue(operation, move |core| core.unlock(&master_password))
            }
            Request::Lock => self.enqueue(operation, |core| core.lock()),
            Request::Logout => self.enqueue(operation, |core| core.logout()),
            Request::ListItems { logins_only } => self.enqueue(operation, move |core| {
                let items = core.list_items()?;
                Ok(if logins_only {
                    filter_logins(items)
                } else {
                    items
                })
            }),
            Request::GetItem { id } => self.enqueue(operation, move |core| core.get_item(&id)),
            Request::GetTotp { id } => self.enqueue(operation, move |core| core.get_totp(&id)),
        }
    }

    fn enqueue<T, F>(&self, operation: Operation, f: F) -> Pending<ResultEnvelope<Value>>
    where
        T: Serialize,
        F: FnOnce(&mut Core) -> Outcome<T> + Send + 'static,
    {
        self.queue
            .submit(operation, move |core| Ok(ResultEnvelope::from_outcome(f(core))))
    }

    /// Run a request to completion and wrap the outcome in an envelope.
    pub fn execute(&self, request: Request) -> ResultEnvelope<Value> {
        let operation = request.operation();
        let envelope = self.submit(request).envelope();
        tracing::debug!(operation = %operation, ok = envelope.is_ok(), "request finished");
        envelope
    }

    /// Drain queued work, optionally lock the vault, drop the session key
    /// and stop the worker.
    pub fn teardown(mut self) {
        if self.lock_on_teardown {
            if let Err(failure) = self.lock().wait() {
                tracing::warn!(code = %failure.code, "lock on teardown failed");
            }
        }
        match self.queue.shutdown() {
            Some(mut core) => {
                core.forget_session_key();
                tracing::info!("backend stopped");
            }
            None => tracing::warn!("session worker was already gone"),
        }
    }
}

fn probe(
    runner: &dyn CommandRunner,
    operation: Operation,
    invocation: Invocation,
) -> Outcome<CommandResult> {
    let result = runner.run(&invocation);
    match check(operation, &result) {
        Ok(()) => Ok(result),
        Err(code) => {
            tracing::warn!(operation = %operation, code = %code, "host probe failed");
            Err(Failure::new(code))
        }
    }
}

fn check_flatpak(runner: &dyn CommandRunner, launcher: &Launcher) -> Outcome<RunnerVersion> {
    probe(runner, Operation::CheckFlatpak, launcher.runner_probe())
        .map(|result| parse_runner_version(&result.stdout))
}

fn check_bitwarden(runner: &dyn CommandRunner, launcher: &Launcher) -> Outcome<Installed> {
    probe(runner, Operation::CheckBitwarden, launcher.app_probe()).map(|_| Installed { installed: true })
}

/// `UNKNOWN_ERROR` envelope for requests that never reached the backend.
pub fn rejected(message: impl Into<String>) -> ResultEnvelope<Value> {
    ResultEnvelope::from_outcome::<()>(Err(Failure::with_message(
        ErrorCode::UnknownError,
        message,
    )))
}
