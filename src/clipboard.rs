//! Clipboard writer.
//!
//! Tries each configured clipboard tool in order and stops at the first one
//! that accepts the text. Text is handed over on stdin, never as an argument.

use crate::envelope::{ErrorCode, Failure, Outcome};
use crate::process::{CommandRunner, Invocation};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Per-attempt timeout when nothing is configured.
pub const DEFAULT_CLIPBOARD_TIMEOUT: Duration = Duration::from_millis(2_000);

/// A clipboard tool the writer knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ClipboardMechanism {
    #[serde(rename = "wl-copy")]
    WlCopy,
    #[serde(rename = "xclip")]
    Xclip,
    #[serde(rename = "xsel")]
    Xsel,
}

impl ClipboardMechanism {
    /// Default order: Wayland first, then the two X11 tools.
    pub const DEFAULT_ORDER: [ClipboardMechanism; 3] = [
        ClipboardMechanism::WlCopy,
        ClipboardMechanism::Xclip,
        ClipboardMechanism::Xsel,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ClipboardMechanism::WlCopy => "wl-copy",
            ClipboardMechanism::Xclip => "xclip",
            ClipboardMechanism::Xsel => "xsel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::DEFAULT_ORDER
            .into_iter()
            .find(|m| m.name() == s.trim())
    }

    fn args(&self) -> &'static [&'static str] {
        match self {
            ClipboardMechanism::WlCopy => &[],
            ClipboardMechanism::Xclip => &["-selection", "clipboard"],
            ClipboardMechanism::Xsel => &["--clipboard", "--input"],
        }
    }

    /// Output is discarded: these tools may fork a selection owner that
    /// keeps inherited pipes open long after the copy is done.
    pub fn invocation(&self, text: &str, timeout: Duration) -> Invocation {
        Invocation::new(self.name())
            .args(self.args().iter().copied())
            .stdin(text)
            .timeout(timeout)
            .discard_output()
    }
}

impl std::fmt::Display for ClipboardMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Payload of a successful copy: the mechanism that took the text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Copied {
    pub method: ClipboardMechanism,
}

#[derive(Clone)]
pub struct ClipboardWriter {
    runner: Arc<dyn CommandRunner>,
    mechanisms: Vec<ClipboardMechanism>,
    timeout: Duration,
}

impl ClipboardWriter {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        mechanisms: Vec<ClipboardMechanism>,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            mechanisms,
            timeout,
        }
    }

    /// Copy `text`. The first mechanism that exits 0 wins; there are no
    /// retries.
    pub fn copy(&self, text: &str) -> Outcome<Copied> {
        for mechanism in &self.mechanisms {
            let result = self.runner.run(&mechanism.invocation(text, self.timeout));
            if result.succeeded() {
                tracing::debug!(method = %mechanism, "copied to clipboard");
                return Ok(Copied { method: *mechanism });
            }
            tracing::debug!(
                method = %mechanism,
                exit_code = result.exit_code,
                timed_out = result.timed_out,
                "clipboard mechanism failed"
            );
        }
        tracing::warn!(
            tried = self.mechanisms.len(),
            "no clipboard mechanism accepted the text"
        );
        Err(Failure::new(ErrorCode::ClipboardError))
    }
}
