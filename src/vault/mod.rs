//! Protocol adapter for the sandboxed vault CLI.
//!
//! - [`command`] builds argument vectors for each logical operation
//! - [`parse`] turns CLI output into structured values
//! - [`classify`] maps failed results onto the closed error taxonomy

pub mod classify;
pub mod command;
pub mod parse;

pub use classify::{check, classify};
pub use command::{Launcher, VaultCommand};

use serde::{Deserialize, Serialize};

/// Logical operations exposed across the backend boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    CheckFlatpak,
    CheckBitwarden,
    Status,
    Login,
    #[serde(rename = "login_2fa")]
    Login2fa,
    Unlock,
    Lock,
    Logout,
    ListItems,
    GetItem,
    GetTotp,
    CopyToClipboard,
}

impl Operation {
    pub const ALL: [Operation; 12] = [
        Operation::CheckFlatpak,
        Operation::CheckBitwarden,
        Operation::Status,
        Operation::Login,
        Operation::Login2fa,
        Operation::Unlock,
        Operation::Lock,
        Operation::Logout,
        Operation::ListItems,
        Operation::GetItem,
        Operation::GetTotp,
        Operation::CopyToClipboard,
    ];

    /// RPC method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CheckFlatpak => "check_flatpak",
            Operation::CheckBitwarden => "check_bitwarden",
            Operation::Status => "status",
            Operation::Login => "login",
            Operation::Login2fa => "login_2fa",
            Operation::Unlock => "unlock",
            Operation::Lock => "lock",
            Operation::Logout => "logout",
            Operation::ListItems => "list_items",
            Operation::GetItem => "get_item",
            Operation::GetTotp => "get_totp",
            Operation::CopyToClipboard => "copy_to_clipboard",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == s)
    }

    /// Host probes that never touch session state.
    pub fn is_probe(&self) -> bool {
        matches!(self, Operation::CheckFlatpak | Operation::CheckBitwarden)
    }

    /// Operations that go through the single-slot session queue.
    pub fn is_session_op(&self) -> bool {
        !self.is_probe() && *self != Operation::CopyToClipboard
    }

    /// Login attempts, with or without a second factor.
    pub fn is_login(&self) -> bool {
        matches!(self, Operation::Login | Operation::Login2fa)
    }

    /// Operations that submit a password.
    pub fn is_credential_check(&self) -> bool {
        self.is_login() || *self == Operation::Unlock
    }

    /// Operations that need an authenticated (and possibly unlocked) session.
    pub fn needs_session(&self) -> bool {
        matches!(
            self,
            Operation::Unlock
                | Operation::Lock
                | Operation::Logout
                | Operation::ListItems
                | Operation::GetItem
                | Operation::GetTotp
        )
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
