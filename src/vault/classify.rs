//! Error classifier for vault CLI results.
//!
//! The CLI reports failures as free text on stderr, and the wording drifts
//! between versions. Every phrase the crate matches on lives in this module.
//! Matching is case-insensitive over stderr followed by stdout.

use super::Operation;
use crate::envelope::ErrorCode;
use crate::process::CommandResult;

/// The runner reports the sandboxed app is absent.
const APP_MISSING_MARKERS: &[&str] = &[
    "not installed",
    "no such ref",
    "nothing matches",
    "app not found",
];

/// The account requires a second factor.
const TWO_FACTOR_MARKERS: &[&str] = &[
    "two-step login",
    "two-step",
    "two step",
    "two-factor",
    "two factor",
];

/// The second-factor code was rejected. Checked before
/// [`TWO_FACTOR_MARKERS`] since these messages mention two-step login too.
const INVALID_CODE_MARKERS: &[&str] = &[
    "two-step token is invalid",
    "invalid two-step",
    "code is invalid",
    "invalid code",
    "invalid verification code",
    "token is invalid",
];

/// The CLI rejected an email or password.
const CREDENTIAL_MARKERS: &[&str] = &[
    "invalid master password",
    "username or password is incorrect",
    "email or password is incorrect",
    "invalid password",
    "invalid credentials",
    "incorrect",
];

/// No user is logged in.
const NOT_AUTHENTICATED_MARKERS: &[&str] = &[
    "you are not logged in",
    "not logged in",
    "unauthenticated",
];

/// Logged in but the vault is locked.
/// No bare "locked": it would also match "unlocked".
const LOCKED_MARKERS: &[&str] = &["vault is locked", "is locked"];

/// Login attempted while a session already exists.
const ALREADY_LOGGED_IN_MARKERS: &[&str] = &["already logged in"];

fn text_of(result: &CommandResult) -> String {
    let mut text = result.stderr.to_lowercase();
    text.push('\n');
    text.push_str(&result.stdout.to_lowercase());
    text
}

fn matches_any(text: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| text.contains(marker))
}

/// Whether a login result says a session already exists.
pub fn is_already_logged_in(result: &CommandResult) -> bool {
    !result.timed_out && matches_any(&text_of(result), ALREADY_LOGGED_IN_MARKERS)
}

/// Whether a result carries the two-factor-required phrasing.
pub fn mentions_two_factor(result: &CommandResult) -> bool {
    matches_any(&text_of(result), TWO_FACTOR_MARKERS)
}

/// Decide whether an operation succeeded.
///
/// Success means no timeout, exit code 0 and, for login attempts, no
/// two-factor prompt (some CLI versions exit 0 while asking for a code).
pub fn check(op: Operation, result: &CommandResult) -> Result<(), ErrorCode> {
    let succeeded = result.succeeded() && !(op.is_login() && mentions_two_factor(result));
    if succeeded {
        Ok(())
    } else {
        Err(classify(op, result))
    }
}

/// Map a result onto the error taxonomy. Total: always returns a code.
pub fn classify(op: Operation, result: &CommandResult) -> ErrorCode {
    let text = text_of(result);

    // 1. Capability missing.
    match op {
        Operation::CheckFlatpak => return ErrorCode::FlatpakMissing,
        Operation::CheckBitwarden => {
            return if result.launch_failed() {
                ErrorCode::FlatpakMissing
            } else {
                ErrorCode::BitwardenMissing
            };
        }
        _ => {}
    }
    if result.launch_failed() {
        return if op == Operation::CopyToClipboard {
            ErrorCode::ClipboardError
        } else {
            ErrorCode::FlatpakMissing
        };
    }
    if op.is_session_op() && !result.timed_out && matches_any(&text, APP_MISSING_MARKERS) {
        return ErrorCode::BitwardenMissing;
    }

    // 2. Timeout.
    if result.timed_out {
        return if op == Operation::CopyToClipboard {
            ErrorCode::ClipboardError
        } else {
            ErrorCode::CommandFailed
        };
    }

    // 3. Second factor.
    if op.is_login() {
        if matches_any(&text, INVALID_CODE_MARKERS) {
            return ErrorCode::Invalid2faCode;
        }
        if matches_any(&text, TWO_FACTOR_MARKERS) {
            return ErrorCode::TwoFactorRequired;
        }
    }

    // 4. Rejected credentials.
    if result.exit_code != 0
        && op.is_credential_check()
        && matches_any(&text, CREDENTIAL_MARKERS)
    {
        return ErrorCode::InvalidCredentials;
    }

    // 5. Unmet session precondition.
    if op.needs_session() {
        if matches_any(&text, NOT_AUTHENTICATED_MARKERS) {
            return ErrorCode::NotAuthenticated;
        }
        if matches_any(&text, LOCKED_MARKERS) {
            return ErrorCode::Locked;
        }
    }

    // 6. Everything else.
    if op == Operation::CopyToClipboard {
        ErrorCode::ClipboardError
    } else if result.exit_code != 0 {
        ErrorCode::CommandFailed
    } else {
        // Exit 0 that the caller still considers a failure.
        ErrorCode::UnknownError
    }
}
