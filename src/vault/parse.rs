//! Output parsers for successful vault CLI calls.
//!
//! Parsers are strict: output that does not have the expected shape is an
//! error, never a partially-filled value.

use super::command::SESSION_ENV;
use crate::models::{StatusReport, VaultItem};
use crate::session::Phase;
use serde::Serialize;

/// Output of a successful call did not have the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(String),
    #[error("unexpected empty output")]
    Empty,
    #[error("unknown vault status: {0}")]
    UnknownStatus(String),
}

impl From<serde_json::Error> for ParseError {
    fn from(e: serde_json::Error) -> Self {
        ParseError::Json(e.to_string())
    }
}

/// Payload of a successful `check_flatpak`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunnerVersion {
    pub version: String,
}

/// `flatpak --version` prints e.g. `Flatpak 1.14.4`.
pub fn parse_runner_version(stdout: &str) -> RunnerVersion {
    let line = stdout.lines().next().unwrap_or("").trim();
    let version = line
        .split_whitespace()
        .last()
        .unwrap_or(line)
        .to_string();
    RunnerVersion { version }
}

/// Parse `status --raw` and map the reported status onto a phase.
pub fn parse_status(stdout: &str) -> Result<(StatusReport, Phase), ParseError> {
    let report: StatusReport = serde_json::from_str(stdout.trim())?;
    let phase = Phase::from_status(&report.status)
        .ok_or_else(|| ParseError::UnknownStatus(report.status.clone()))?;
    Ok((report, phase))
}

/// Parse `list items --raw`.
pub fn parse_items(stdout: &str) -> Result<Vec<VaultItem>, ParseError> {
    Ok(serde_json::from_str(stdout.trim())?)
}

/// Parse `get item <id> --raw`.
pub fn parse_item(stdout: &str) -> Result<VaultItem, ParseError> {
    Ok(serde_json::from_str(stdout.trim())?)
}

/// Single-line, non-empty output such as a session key or TOTP code.
pub fn parse_token(stdout: &str) -> Result<String, ParseError> {
    let token = stdout.trim();
    if token.is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(token.to_string())
}

/// Some CLI versions print a session key on successful login, either bare or
/// inside the `export BW_SESSION="..."` hint. Other text is ignored.
pub fn parse_login_session(stdout: &str) -> Option<String> {
    if let Some(key) = stdout.lines().find_map(exported_session) {
        return Some(key);
    }
    let candidate = stdout.trim();
    looks_like_key(candidate).then(|| candidate.to_string())
}

/// The value in lines like `$ export BW_SESSION="..."` or
/// `> $env:BW_SESSION="..."`.
fn exported_session(line: &str) -> Option<String> {
    let (_, rest) = line.split_once(&format!("{}=", SESSION_ENV))?;
    let value = rest.trim().trim_matches(|c: char| c == '"' || c == '\'');
    looks_like_key(value).then(|| value.to_string())
}

fn looks_like_key(candidate: &str) -> bool {
    candidate.len() >= 16
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=' | '-' | '_'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemType;

    #[test]
    fn test_parse_status_unlocked() {
        let (report, phase) =
            parse_status(r#"{"status":"unlocked","userEmail":"a@b.com"}"#).unwrap();
        assert_eq!(phase, Phase::Unlocked);
        assert_eq!(report.user_email.as_deref(), Some("a@b.com"));
    }

    #[test]
    fn test_parse_status_full_payload() {
        let stdout = r#"{
            "serverUrl": "https://vault.bitwarden.com",
            "lastSync": "2024-01-15T10:30:00.000Z",
            "userEmail": "user@example.com",
            "userId": "user-123",
            "status": "locked"
        }"#;
        let (report, phase) = parse_status(stdout).unwrap();
        assert_eq!(phase, Phase::Locked);
        assert_eq!(report.server_url.as_deref(), Some("https://vault.bitwarden.com"));
        assert_eq!(report.last_sync.as_deref(), Some("2024-01-15T10:30:00.000Z"));
    }

    #[test]
    fn test_parse_status_rejects_unknown_status() {
        assert_eq!(
            parse_status(r#"{"status":"sleeping"}"#),
            Err(ParseError::UnknownStatus("sleeping".to_string()))
        );
    }

    #[test]
    fn test_parse_status_rejects_garbage() {
        assert!(matches!(parse_status("? Master password:"), Err(ParseError::Json(_))));
        assert!(matches!(parse_status(""), Err(ParseError::Json(_))));
    }

    #[test]
    fn test_parse_items_rejects_truncated_json() {
        assert!(parse_items(r#"[{"id":"a","name":"x","type":1}"#).is_err());
    }

    #[test]
    fn test_parse_items_mixed_types() {
        let items = parse_items(
            r#"[{"id":"n","name":"Note","type":2},{"id":"l","name":"Login","type":1}]"#,
        )
        .unwrap();
        assert_eq!(items[0].kind, ItemType::Note);
        assert_eq!(items[1].kind, ItemType::Login);
    }

    #[test]
    fn test_parse_token_trims_and_rejects_empty() {
        assert_eq!(parse_token("123456\n").unwrap(), "123456");
        assert_eq!(parse_token("  \n"), Err(ParseError::Empty));
    }

    #[test]
    fn test_parse_runner_version() {
        assert_eq!(parse_runner_version("Flatpak 1.14.4\n").version, "1.14.4");
    }

    #[test]
    fn test_parse_login_session() {
        assert_eq!(
            parse_login_session("mock-session-key-abc123def456\n").as_deref(),
            Some("mock-session-key-abc123def456")
        );
        assert_eq!(parse_login_session("You are logged in!"), None);
        assert_eq!(parse_login_session(""), None);
    }

    #[test]
    fn test_parse_login_session_from_export_hint() {
        let stdout = "You are logged in!\n\n\
            To unlock your vault, set your session key to the `BW_SESSION` environment variable. ex:\n\
            $ export BW_SESSION=\"Zm9vYmFyYmF6cXV4MTIzNA==\"\n\
            > $env:BW_SESSION=\"Zm9vYmFyYmF6cXV4MTIzNA==\"\n\n\
            You can also pass the session key to any command with the `--session` option. ex:\n\
            $ bw list items --session Zm9vYmFyYmF6cXV4MTIzNA==\n";
        assert_eq!(
            parse_login_session(stdout).as_deref(),
            Some("Zm9vYmFyYmF6cXV4MTIzNA==")
        );
        assert_eq!(parse_login_session("$ export BW_SESSION=\"\"\n"), None);
    }
}
