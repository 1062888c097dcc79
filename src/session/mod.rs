//! Authentication state machine.
//!
//! The phase only changes through [`Session::apply`], which delegates to the
//! pure [`next_phase`] transition function. The function is total: any
//! combination it does not list leaves the phase unchanged.

use crate::envelope::ErrorCode;
use crate::vault::Operation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How accessible the vault currently is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Unauthenticated,
    Locked,
    Unlocked,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Unauthenticated, Phase::Locked, Phase::Unlocked];

    /// Map the CLI's `status` field.
    pub fn from_status(status: &str) -> Option<Self> {
        match status {
            "unauthenticated" => Some(Phase::Unauthenticated),
            "locked" => Some(Phase::Locked),
            "unlocked" => Some(Phase::Unlocked),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Unauthenticated => "unauthenticated",
            Phase::Locked => "locked",
            Phase::Unlocked => "unlocked",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What an operation ended with, as far as the state machine cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The operation succeeded.
    Succeeded,
    /// A login succeeded and the CLI handed back an unlocked session key.
    SucceededWithToken,
    /// A status probe reported this phase.
    Reported(Phase),
    /// The operation failed with this code.
    Failed(ErrorCode),
}

/// The transition table.
pub fn next_phase(current: Phase, op: Operation, outcome: StepOutcome) -> Phase {
    use Operation as Op;
    use StepOutcome as Out;

    match (current, op, outcome) {
        (_, Op::Status, Out::Reported(reported)) => reported,

        (Phase::Unauthenticated, Op::Login | Op::Login2fa, Out::Succeeded) => Phase::Locked,
        (Phase::Unauthenticated, Op::Login | Op::Login2fa, Out::SucceededWithToken) => {
            Phase::Unlocked
        }

        (Phase::Locked, Op::Unlock, Out::Succeeded) => Phase::Unlocked,
        (Phase::Unlocked, Op::Lock, Out::Succeeded) => Phase::Locked,
        (_, Op::Logout, Out::Succeeded) => Phase::Unauthenticated,

        // Resync with whatever precondition the CLI says is unmet.
        (_, op, Out::Failed(ErrorCode::NotAuthenticated)) if op.needs_session() => {
            Phase::Unauthenticated
        }
        (_, op, Out::Failed(ErrorCode::Locked)) if op.needs_session() => Phase::Locked,

        (current, _, _) => current,
    }
}

/// In-memory session record. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    phase: Phase,
    user_email: Option<String>,
    /// Set while the UI is collecting a second-factor code.
    two_factor_pending: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn user_email(&self) -> Option<&str> {
        self.user_email.as_deref()
    }

    pub fn two_factor_pending(&self) -> bool {
        self.two_factor_pending
    }

    /// Apply an operation outcome. Returns `true` if anything changed.
    ///
    /// `email` is the address involved in the operation: the login email,
    /// or the one reported by a status probe.
    pub fn apply(&mut self, op: Operation, outcome: StepOutcome, email: Option<&str>) -> bool {
        let before = self.clone();
        let next = next_phase(self.phase, op, outcome);

        match (op, outcome) {
            (Operation::Status, StepOutcome::Reported(_)) => {
                self.user_email = email.map(str::to_string);
            }
            (Operation::Login | Operation::Login2fa, StepOutcome::Failed(code)) => {
                self.two_factor_pending = matches!(
                    code,
                    ErrorCode::TwoFactorRequired | ErrorCode::Invalid2faCode
                );
            }
            (Operation::Login | Operation::Login2fa, _) => {
                self.two_factor_pending = false;
                if next != Phase::Unauthenticated {
                    if let Some(email) = email {
                        self.user_email = Some(email.to_string());
                    }
                }
            }
            _ => {}
        }

        if next == Phase::Unauthenticated {
            if op == Operation::Logout || self.phase != Phase::Unauthenticated {
                self.user_email = None;
            }
        } else {
            self.two_factor_pending = false;
        }
        self.phase = next;

        let changed = *self != before;
        if changed {
            tracing::info!(
                operation = %op,
                from = %before.phase,
                to = %self.phase,
                two_factor_pending = self.two_factor_pending,
                "session updated"
            );
        }
        changed
    }

    /// Snapshot as an event for subscribers.
    pub fn event(&self, operation: Operation) -> PhaseEvent {
        PhaseEvent {
            phase: self.phase,
            user_email: self.user_email.clone(),
            two_factor_pending: self.two_factor_pending,
            operation,
            timestamp: Utc::now(),
        }
    }
}

/// Emitted after every session operation so the UI never has to infer the
/// phase from side data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseEvent {
    pub phase: Phase,
    pub user_email: Option<String>,
    pub two_factor_pending: bool,
    pub operation: Operation,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcomes() -> Vec<StepOutcome> {
        let mut all = vec![StepOutcome::Succeeded, StepOutcome::SucceededWithToken];
        all.extend(Phase::ALL.map(StepOutcome::Reported));
        all.extend(ErrorCode::ALL.map(StepOutcome::Failed));
        all
    }

    /// The explicit table, written out independently of `next_phase`.
    fn listed(current: Phase, op: Operation, outcome: StepOutcome) -> Option<Phase> {
        match (current, op, outcome) {
            (_, Operation::Status, StepOutcome::Reported(p)) => Some(p),
            (Phase::Unauthenticated, Operation::Login | Operation::Login2fa, StepOutcome::Succeeded) => {
                Some(Phase::Locked)
            }
            (
                Phase::Unauthenticated,
                Operation::Login | Operation::Login2fa,
                StepOutcome::SucceededWithToken,
            ) => Some(Phase::Unlocked),
            (Phase::Locked, Operation::Unlock, StepOutcome::Succeeded) => Some(Phase::Unlocked),
            (Phase::Unlocked, Operation::Lock, StepOutcome::Succeeded) => Some(Phase::Locked),
            (_, Operation::Logout, StepOutcome::Succeeded) => Some(Phase::Unauthenticated),
            (_, op, StepOutcome::Failed(ErrorCode::NotAuthenticated)) if op.needs_session() => {
                Some(Phase::Unauthenticated)
            }
            (_, op, StepOutcome::Failed(ErrorCode::Locked)) if op.needs_session() => {
                Some(Phase::Locked)
            }
            _ => None,
        }
    }

    #[test]
    fn test_unlisted_triples_leave_phase_unchanged() {
        for current in Phase::ALL {
            for op in Operation::ALL {
                for outcome in outcomes() {
                    let next = next_phase(current, op, outcome);
                    let expected = listed(current, op, outcome).unwrap_or(current);
                    assert_eq!(next, expected, "{:?} + {} + {:?}", current, op, outcome);
                }
            }
        }
    }

    #[test]
    fn test_status_probe_sets_phase_and_email() {
        let mut session = Session::new();
        session.apply(
            Operation::Status,
            StepOutcome::Reported(Phase::Unlocked),
            Some("a@b.com"),
        );
        assert_eq!(session.phase(), Phase::Unlocked);
        assert_eq!(session.user_email(), Some("a@b.com"));
    }

    #[test]
    fn test_two_factor_sub_flow() {
        let mut session = Session::new();
        session.apply(
            Operation::Login,
            StepOutcome::Failed(ErrorCode::TwoFactorRequired),
            Some("a@b.com"),
        );
        assert_eq!(session.phase(), Phase::Unauthenticated);
        assert!(session.two_factor_pending());

        session.apply(
            Operation::Login2fa,
            StepOutcome::Failed(ErrorCode::Invalid2faCode),
            Some("a@b.com"),
        );
        assert!(session.two_factor_pending());

        session.apply(Operation::Login2fa, StepOutcome::Succeeded, Some("a@b.com"));
        assert_eq!(session.phase(), Phase::Locked);
        assert!(!session.two_factor_pending());
        assert_eq!(session.user_email(), Some("a@b.com"));
    }

    #[test]
    fn test_other_login_failure_exits_two_factor_sub_flow() {
        let mut session = Session::new();
        session.apply(
            Operation::Login,
            StepOutcome::Failed(ErrorCode::TwoFactorRequired),
            Some("a@b.com"),
        );
        session.apply(
            Operation::Login2fa,
            StepOutcome::Failed(ErrorCode::InvalidCredentials),
            Some("a@b.com"),
        );
        assert!(!session.two_factor_pending());
        assert_eq!(session.phase(), Phase::Unauthenticated);
    }

    #[test]
    fn test_logout_clears_email() {
        let mut session = Session::new();
        session.apply(
            Operation::Status,
            StepOutcome::Reported(Phase::Locked),
            Some("a@b.com"),
        );
        assert!(session.apply(Operation::Logout, StepOutcome::Succeeded, None));
        assert_eq!(session.phase(), Phase::Unauthenticated);
        assert_eq!(session.user_email(), None);
    }

    #[test]
    fn test_locked_resync_keeps_email() {
        let mut session = Session::new();
        session.apply(
            Operation::Status,
            StepOutcome::Reported(Phase::Unlocked),
            Some("a@b.com"),
        );
        session.apply(
            Operation::ListItems,
            StepOutcome::Failed(ErrorCode::Locked),
            None,
        );
        assert_eq!(session.phase(), Phase::Locked);
        assert_eq!(session.user_email(), Some("a@b.com"));
    }

    #[test]
    fn test_apply_reports_no_change_for_unlisted_outcome() {
        let mut session = Session::new();
        assert!(!session.apply(
            Operation::GetTotp,
            StepOutcome::Failed(ErrorCode::CommandFailed),
            None
        ));
    }

    #[test]
    fn test_phase_event_serialization() {
        let session = Session::new();
        let value = serde_json::to_value(session.event(Operation::Lock)).unwrap();
        assert_eq!(value["phase"], "unauthenticated");
        assert_eq!(value["operation"], "lock");
        assert_eq!(value["twoFactorPending"], false);
        assert!(value["userEmail"].is_null());
    }
}
