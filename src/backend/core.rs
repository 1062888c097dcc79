//! Session operations. Only the session worker ever touches a [`Core`].

use super::hub::SessionHub;
use crate::envelope::{ErrorCode, Failure, Outcome};
use crate::models::{StatusReport, TwoFactorAttempt, TwoFactorMethod, VaultItem};
use crate::process::{CommandResult, CommandRunner};
use crate::session::{Phase, Session, StepOutcome};
use crate::vault::command::InvalidArgument;
use crate::vault::parse::{self, ParseError};
use crate::vault::{Launcher, Operation, VaultCommand, check, classify};
use serde::Serialize;
use std::sync::Arc;

/// Payload of `login` / `login_2fa`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoginOutcome {
    /// A session already existed, so no credentials were checked.
    pub already: bool,
}

/// Payload of `get_totp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Totp {
    pub totp: String,
}

/// The unlocked session key. Never logged, never attached to diagnostics.
#[derive(Clone)]
struct SessionKey(String);

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

pub(crate) struct Core {
    runner: Arc<dyn CommandRunner>,
    launcher: Launcher,
    session: Session,
    session_key: Option<SessionKey>,
    attach_diagnostics: bool,
    hub: Arc<SessionHub>,
}

impl Core {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        launcher: Launcher,
        attach_diagnostics: bool,
        session_key: Option<String>,
        hub: Arc<SessionHub>,
    ) -> Self {
        Self {
            runner,
            launcher,
            session: Session::new(),
            session_key: session_key.filter(|k| !k.is_empty()).map(SessionKey),
            attach_diagnostics,
            hub,
        }
    }

    pub fn publish(&self, operation: Operation) {
        self.hub.publish(&self.session, operation);
    }

    pub fn has_session_key(&self) -> bool {
        self.session_key.is_some()
    }

    pub fn forget_session_key(&mut self) {
        self.session_key = None;
    }

    fn run(&self, command: VaultCommand) -> CommandResult {
        let operation = command.operation();
        let key = if operation.is_login() {
            None
        } else {
            self.session_key.as_ref().map(|k| k.0.as_str())
        };
        let invocation = self.launcher.wrap(command.with_session(key));
        tracing::debug!(
            operation = %operation,
            argv = ?invocation.argv(),
            secrets = ?invocation.env.names().collect::<Vec<_>>(),
            "running vault command"
        );
        self.runner.run(&invocation)
    }

    /// Apply a transition. The key is only kept while the vault is unlocked.
    fn transition(&mut self, operation: Operation, outcome: StepOutcome, email: Option<&str>) {
        self.session.apply(operation, outcome, email);
        if self.session.phase() != Phase::Unlocked {
            self.session_key = None;
        }
    }

    fn failure(&self, operation: Operation, code: ErrorCode, result: CommandResult) -> Failure {
        tracing::warn!(
            operation = %operation,
            code = %code,
            exit_code = result.exit_code,
            timed_out = result.timed_out,
            "vault command failed"
        );
        if self.attach_diagnostics && operation != Operation::Unlock {
            Failure::with_output(code, result)
        } else {
            Failure::new(code)
        }
    }

    fn parse_failure(&self, operation: Operation, error: ParseError, result: CommandResult) -> Failure {
        tracing::warn!(operation = %operation, error = %error, "unexpected vault output");
        if operation == Operation::Unlock {
            Failure::with_message(ErrorCode::UnknownError, error.to_string())
        } else {
            Failure::with_output(ErrorCode::UnknownError, result)
        }
    }

    /// Run a read-only query and parse its output.
    fn query<T>(
        &mut self,
        command: VaultCommand,
        parse: impl FnOnce(&str) -> Result<T, ParseError>,
    ) -> Outcome<T> {
        let operation = command.operation();
        let result = self.run(command);
        if let Err(code) = check(operation, &result) {
            self.transition(operation, StepOutcome::Failed(code), None);
            return Err(self.failure(operation, code, result));
        }
        self.transition(operation, StepOutcome::Succeeded, None);
        parse(&result.stdout).map_err(|e| self.parse_failure(operation, e, result))
    }

    pub fn status(&mut self) -> Outcome<StatusReport> {
        let result = self.run(VaultCommand::status());
        if let Err(code) = check(Operation::Status, &result) {
            self.transition(Operation::Status, StepOutcome::Failed(code), None);
            return Err(self.failure(Operation::Status, code, result));
        }
        match parse::parse_status(&result.stdout) {
            Ok((report, phase)) => {
                self.transition(
                    Operation::Status,
                    StepOutcome::Reported(phase),
                    report.user_email.as_deref(),
                );
                Ok(report)
            }
            Err(e) => Err(self.parse_failure(Operation::Status, e, result)),
        }
    }

    /// Re-learn the phase from the CLI after a login.
    fn resync(&mut self) {
        if let Err(failure) = self.status() {
            tracing::warn!(code = %failure.code, "status resync failed");
        }
    }

    pub fn login(&mut self, email: &str, password: &str) -> Outcome<LoginOutcome> {
        let command = validate_credentials(email, password).and_then(|()| {
            VaultCommand::login(email, &self.launcher.password_env, password)
                .map_err(|e| invalid(ErrorCode::InvalidCredentials, e))
        });
        self.finish_login(Operation::Login, email, command)
    }

    pub fn login_2fa(
        &mut self,
        email: &str,
        password: &str,
        method: u8,
        code: &str,
    ) -> Outcome<LoginOutcome> {
        let command = validate_credentials(email, password)
            .and_then(|()| {
                TwoFactorMethod::try_from(method)
                    .map_err(|e| Failure::with_message(ErrorCode::Invalid2faCode, e))
            })
            .and_then(|method| {
                let attempt = TwoFactorAttempt {
                    method,
                    code: code.to_string(),
                };
                VaultCommand::login_2fa(email, &self.launcher.password_env, password, &attempt)
                    .map_err(|e| {
                        let code = if e.field == "code" {
                            ErrorCode::Invalid2faCode
                        } else {
                            ErrorCode::InvalidCredentials
                        };
                        invalid(code, e)
                    })
            });
        self.finish_login(Operation::Login2fa, email, command)
    }

    fn finish_login(
        &mut self,
        operation: Operation,
        email: &str,
        command: Outcome<VaultCommand>,
    ) -> Outcome<LoginOutcome> {
        let command = match command {
            Ok(command) => command,
            Err(failure) => {
                self.transition(operation, StepOutcome::Failed(failure.code), Some(email));
                return Err(failure);
            }
        };

        let result = self.run(command);
        if classify::is_already_logged_in(&result) {
            tracing::info!(operation = %operation, "session already exists");
            self.transition(operation, StepOutcome::Succeeded, Some(email));
            self.resync();
            return Ok(LoginOutcome { already: true });
        }
        if let Err(code) = check(operation, &result) {
            self.transition(operation, StepOutcome::Failed(code), Some(email));
            return Err(self.failure(operation, code, result));
        }

        // Some CLI versions hand back an unlocked session straight away.
        let outcome = match parse::parse_login_session(&result.stdout) {
            Some(token) => {
                self.session_key = Some(SessionKey(token));
                StepOutcome::SucceededWithToken
            }
            None => StepOutcome::Succeeded,
        };
        self.transition(operation, outcome, Some(email));
        self.resync();
        Ok(LoginOutcome { already: false })
    }

    pub fn unlock(&mut self, master_password: &str) -> Outcome<String> {
        if master_password.is_empty() {
            return Err(Failure::with_message(
                ErrorCode::InvalidCredentials,
                "master password must not be empty",
            ));
        }
        let command = VaultCommand::unlock(&self.launcher.password_env, master_password);
        let result = self.run(command);
        if let Err(code) = check(Operation::Unlock, &result) {
            self.transition(Operation::Unlock, StepOutcome::Failed(code), None);
            return Err(self.failure(Operation::Unlock, code, result));
        }
        match parse::parse_token(&result.stdout) {
            Ok(token) => {
                self.session_key = Some(SessionKey(token.clone()));
                if self.session.phase() == Phase::Locked {
                    self.transition(Operation::Unlock, StepOutcome::Succeeded, None);
                } else {
                    // The recorded phase is stale; ask the CLI while the key is held.
                    self.resync();
                }
                Ok(token)
            }
            Err(e) => Err(self.parse_failure(Operation::Unlock, e, result)),
        }
    }

    /// Idempotent: locking a locked vault succeeds without a CLI call.
    pub fn lock(&mut self) -> Outcome<()> {
        if self.session.phase() == Phase::Locked {
            self.session_key = None;
            return Ok(());
        }
        let result = self.run(VaultCommand::lock());
        match check(Operation::Lock, &result) {
            Ok(()) => {
                self.session_key = None;
                self.transition(Operation::Lock, StepOutcome::Succeeded, None);
                Ok(())
            }
            Err(ErrorCode::Locked) => {
                self.transition(Operation::Lock, StepOutcome::Failed(ErrorCode::Locked), None);
                Ok(())
            }
            Err(code) => {
                self.transition(Operation::Lock, StepOutcome::Failed(code), None);
                Err(self.failure(Operation::Lock, code, result))
            }
        }
    }

    pub fn logout(&mut self) -> Outcome<()> {
        let result = self.run(VaultCommand::logout());
        if let Err(code) = check(Operation::Logout, &result) {
            self.transition(Operation::Logout, StepOutcome::Failed(code), None);
            return Err(self.failure(Operation::Logout, code, result));
        }
        self.session_key = None;
        self.transition(Operation::Logout, StepOutcome::Succeeded, None);
        Ok(())
    }

    pub fn list_items(&mut self) -> Outcome<Vec<VaultItem>> {
        self.query(VaultCommand::list_items(), parse::parse_items)
    }

    pub fn get_item(&mut self, id: &str) -> Outcome<VaultItem> {
        let command = VaultCommand::get_item(id).map_err(|e| invalid(ErrorCode::CommandFailed, e))?;
        self.query(command, parse::parse_item)
    }

    pub fn get_totp(&mut self, id: &str) -> Outcome<Totp> {
        let command = VaultCommand::get_totp(id).map_err(|e| invalid(ErrorCode::CommandFailed, e))?;
        self.query(command, |stdout| {
            parse::parse_token(stdout).map(|totp| Totp { totp })
        })
    }
}

fn invalid(code: ErrorCode, error: InvalidArgument) -> Failure {
    Failure::with_message(code, error.to_string())
}

/// Reject credentials the CLI would refuse anyway, without spawning it.
fn validate_credentials(email: &str, password: &str) -> Outcome<()> {
    let looks_like_email = email
        .split_once('@')
        .is_some_and(|(user, domain)| !user.is_empty() && !domain.is_empty())
        && !email.contains(char::is_whitespace);
    if !looks_like_email {
        return Err(Failure::with_message(
            ErrorCode::InvalidCredentials,
            "email address is not valid",
        ));
    }
    if password.is_empty() {
        return Err(Failure::with_message(
            ErrorCode::InvalidCredentials,
            "password must not be empty",
        ));
    }
    Ok(())
}
