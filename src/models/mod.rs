//! Data types parsed from the vault CLI's output.

use serde::{Deserialize, Serialize};

/// Vault item kind, serialized as the CLI's integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ItemType {
    Login,
    Note,
    Card,
    Identity,
    /// Types introduced by newer CLI versions.
    Other(u8),
}

impl From<u8> for ItemType {
    fn from(code: u8) -> Self {
        match code {
            1 => ItemType::Login,
            2 => ItemType::Note,
            3 => ItemType::Card,
            4 => ItemType::Identity,
            other => ItemType::Other(other),
        }
    }
}

impl From<ItemType> for u8 {
    fn from(kind: ItemType) -> Self {
        match kind {
            ItemType::Login => 1,
            ItemType::Note => 2,
            ItemType::Card => 3,
            ItemType::Identity => 4,
            ItemType::Other(code) => code,
        }
    }
}

/// A URI attached to a login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginUri {
    #[serde(default)]
    pub uri: Option<String>,
}

/// Login credentials of a vault item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Login {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub totp: Option<String>,
    #[serde(default)]
    pub uris: Option<Vec<LoginUri>>,
}

/// One entry of the vault, as returned by `list items` / `get item`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultItem {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ItemType,
    #[serde(default)]
    pub login: Option<Login>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub favorite: bool,
}

impl VaultItem {
    pub fn is_login(&self) -> bool {
        self.kind == ItemType::Login
    }

    /// Whether the item has a TOTP seed configured.
    pub fn has_totp(&self) -> bool {
        self.login
            .as_ref()
            .and_then(|l| l.totp.as_deref())
            .is_some_and(|t| !t.is_empty())
    }

    /// First URI of the login, if any.
    pub fn primary_uri(&self) -> Option<&str> {
        self.login
            .as_ref()?
            .uris
            .as_ref()?
            .iter()
            .find_map(|u| u.uri.as_deref())
    }
}

/// Keep only login items.
pub fn filter_logins(items: Vec<VaultItem>) -> Vec<VaultItem> {
    items.into_iter().filter(VaultItem::is_login).collect()
}

/// Parsed output of `status --raw`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: String,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<String>,
}

/// Second-factor provider accepted by `login --method`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TwoFactorMethod {
    Authenticator,
    Email,
    YubiKey,
}

impl TwoFactorMethod {
    pub fn code(&self) -> u8 {
        match self {
            TwoFactorMethod::Authenticator => 0,
            TwoFactorMethod::Email => 1,
            TwoFactorMethod::YubiKey => 3,
        }
    }
}

impl TryFrom<u8> for TwoFactorMethod {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(TwoFactorMethod::Authenticator),
            1 => Ok(TwoFactorMethod::Email),
            3 => Ok(TwoFactorMethod::YubiKey),
            other => Err(format!("unsupported two-step login method: {}", other)),
        }
    }
}

impl From<TwoFactorMethod> for u8 {
    fn from(method: TwoFactorMethod) -> Self {
        method.code()
    }
}

/// A second-factor code for one login attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct TwoFactorAttempt {
    pub method: TwoFactorMethod,
    pub code: String,
}

impl std::fmt::Debug for TwoFactorAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwoFactorAttempt")
            .field("method", &self.method)
            .field("code", &"<redacted>")
            .finish()
    }
}
