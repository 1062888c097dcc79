//! The uniform `{ok, error, data}` response shape.
//!
//! Every operation exposed by the backend returns a [`ResultEnvelope`].
//! Inside the crate operations return `Result<T, Failure>`; the conversion
//! into an envelope happens once, at the boundary.

use crate::process::CommandResult;
use serde::{Deserialize, Serialize};

/// Closed set of error codes reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The sandbox runner (flatpak) is not available on the host.
    FlatpakMissing,
    /// The sandboxed vault application is not installed.
    BitwardenMissing,
    /// No user is logged in.
    NotAuthenticated,
    /// A user is logged in but the vault is locked.
    Locked,
    /// Email or password was rejected.
    InvalidCredentials,
    /// The account needs a second factor to log in.
    TwoFactorRequired,
    /// The second-factor code was rejected.
    #[serde(rename = "INVALID_2FA_CODE")]
    Invalid2faCode,
    /// The CLI failed or timed out.
    CommandFailed,
    /// No clipboard mechanism accepted the text.
    ClipboardError,
    /// Anything the classifier could not attribute.
    UnknownError,
}

impl ErrorCode {
    /// Every member of the taxonomy.
    pub const ALL: [ErrorCode; 10] = [
        ErrorCode::FlatpakMissing,
        ErrorCode::BitwardenMissing,
        ErrorCode::NotAuthenticated,
        ErrorCode::Locked,
        ErrorCode::InvalidCredentials,
        ErrorCode::TwoFactorRequired,
        ErrorCode::Invalid2faCode,
        ErrorCode::CommandFailed,
        ErrorCode::ClipboardError,
        ErrorCode::UnknownError,
    ];

    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::FlatpakMissing => "FLATPAK_MISSING",
            ErrorCode::BitwardenMissing => "BITWARDEN_MISSING",
            ErrorCode::NotAuthenticated => "NOT_AUTHENTICATED",
            ErrorCode::Locked => "LOCKED",
            ErrorCode::InvalidCredentials => "INVALID_CREDENTIALS",
            ErrorCode::TwoFactorRequired => "TWO_FACTOR_REQUIRED",
            ErrorCode::Invalid2faCode => "INVALID_2FA_CODE",
            ErrorCode::CommandFailed => "COMMAND_FAILED",
            ErrorCode::ClipboardError => "CLIPBOARD_ERROR",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// Parse the wire representation.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.as_str() == s)
    }

    /// Short human-readable explanation, used by the `-H` output mode.
    pub fn describe(&self) -> &'static str {
        match self {
            ErrorCode::FlatpakMissing => "Flatpak is not available on this system",
            ErrorCode::BitwardenMissing => "The Bitwarden Flatpak is not installed",
            ErrorCode::NotAuthenticated => "Not logged in",
            ErrorCode::Locked => "The vault is locked",
            ErrorCode::InvalidCredentials => "Email or password was rejected",
            ErrorCode::TwoFactorRequired => "Two-step login code required",
            ErrorCode::Invalid2faCode => "Two-step login code was rejected",
            ErrorCode::CommandFailed => "The vault command failed",
            ErrorCode::ClipboardError => "Could not copy to the clipboard",
            ErrorCode::UnknownError => "Unexpected error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Human text for a wire error code, falling back to the raw code for
/// values this build does not know.
pub fn describe_code(raw: &str) -> String {
    match ErrorCode::parse(raw) {
        Some(code) => code.describe().to_string(),
        None => raw.to_string(),
    }
}

/// A failed operation: the classified code plus optional diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub code: ErrorCode,
    pub diagnostics: Option<Diagnostics>,
}

/// Extra data attached to a failure for UI-level display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Diagnostics {
    /// The raw output of the external command.
    Output(CommandResult),
    /// A plain message (bad request parameters, internal faults).
    Message { message: String },
}

impl Failure {
    /// A failure with no diagnostics.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            diagnostics: None,
        }
    }

    /// A failure carrying the raw command output.
    pub fn with_output(code: ErrorCode, result: CommandResult) -> Self {
        Self {
            code,
            diagnostics: Some(Diagnostics::Output(result)),
        }
    }

    /// A failure carrying a message.
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            diagnostics: Some(Diagnostics::Message {
                message: message.into(),
            }),
        }
    }
}

impl From<ErrorCode> for Failure {
    fn from(code: ErrorCode) -> Self {
        Failure::new(code)
    }
}

/// Crate-internal operation result.
pub type Outcome<T> = std::result::Result<T, Failure>;

/// The only shape returned across the core boundary.
///
/// Fields are private so that `ok == error.is_none()` holds by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope<T> {
    ok: bool,
    error: Option<ErrorCode>,
    data: Option<T>,
}

impl<T> ResultEnvelope<T> {
    /// A successful envelope.
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            error: None,
            data: Some(data),
        }
    }

    /// A successful envelope with no payload.
    pub fn empty() -> Self {
        Self {
            ok: true,
            error: None,
            data: None,
        }
    }

    /// A failed envelope, optionally carrying diagnostic data.
    pub fn failure(code: ErrorCode, data: Option<T>) -> Self {
        Self {
            ok: false,
            error: Some(code),
            data,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.ok
    }

    pub fn error(&self) -> Option<ErrorCode> {
        self.error
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }
}

impl ResultEnvelope<serde_json::Value> {
    /// Convert a typed operation result into the wire envelope.
    ///
    /// Unit payloads serialize to `null`, which is reported as an empty
    /// success rather than `Some(Null)`.
    pub fn from_outcome<T: Serialize>(outcome: Outcome<T>) -> Self {
        match outcome {
            Ok(data) => match serde_json::to_value(data) {
                Ok(serde_json::Value::Null) => Self::empty(),
                Ok(value) => Self::success(value),
                Err(e) => Self::failure(
                    ErrorCode::UnknownError,
                    Some(serde_json::json!({ "message": e.to_string() })),
                ),
            },
            Err(failure) => {
                let data = failure
                    .diagnostics
                    .and_then(|d| serde_json::to_value(d).ok());
                Self::failure(failure.code, data)
            }
        }
    }
}
