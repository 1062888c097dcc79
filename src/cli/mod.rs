//! CLI argument definitions for Deckwarden.

use crate::backend::Request;
use crate::envelope::{ResultEnvelope, describe_code};
use crate::models::VaultItem;
use crate::vault::Operation;
use crate::{Error, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::io::{BufRead, Read};
use std::path::PathBuf;

/// Deckwarden - drive the Bitwarden CLI inside its Flatpak sandbox.
///
/// Every command prints a `{ok, error, data}` envelope. Passwords and
/// clipboard text are read from stdin, never from arguments.
#[derive(Parser, Debug)]
#[command(name = "deckwarden")]
#[command(author, version = crate::VERSION, about = "Bitwarden vault access through the Flatpak sandbox", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Config file (default: $DECKWARDEN_CONFIG, then ~/.config/deckwarden/config.kdl)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// More logging on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Session key from a previous unlock
    #[arg(long, global = true, env = "BW_SESSION", hide_env_values = true)]
    pub session: Option<String>,

    /// Sandbox runner binary
    #[arg(long, global = true)]
    pub flatpak: Option<String>,

    /// Application id of the sandboxed vault app
    #[arg(long, global = true)]
    pub app_id: Option<String>,

    /// Timeout for vault CLI calls, in milliseconds
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check that flatpak is available
    CheckFlatpak,

    /// Check that the Bitwarden Flatpak is installed
    CheckBitwarden,

    /// Show the vault status
    Status,

    /// Log in (password read from stdin)
    Login {
        /// Account email
        email: String,
    },

    /// Log in with a two-step code (password read from stdin)
    #[command(name = "login-2fa")]
    Login2fa {
        /// Account email
        email: String,

        /// Two-step method: 0 authenticator, 1 email, 3 YubiKey
        #[arg(long, default_value_t = 0)]
        method: u8,

        /// Two-step code
        #[arg(long)]
        code: String,
    },

    /// Unlock the vault (master password read from stdin)
    Unlock,

    /// Lock the vault
    Lock,

    /// Log out
    Logout,

    /// List vault items
    ListItems {
        /// Only login items
        #[arg(long)]
        logins: bool,
    },

    /// Show one item
    GetItem {
        /// Item ID
        id: String,
    },

    /// Show the current TOTP code of an item
    GetTotp {
        /// Item ID
        id: String,
    },

    /// Copy stdin to the clipboard
    Copy,

    /// Serve line-delimited JSON requests on stdin/stdout
    Serve,

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show the resolved configuration and where each value came from
    Show,
}

/// What a parsed command line asks for.
#[derive(Debug)]
pub enum Action {
    Request(Request),
    Serve,
    ConfigShow,
}

impl Commands {
    /// Resolve the command, reading any secret it needs from `stdin`.
    pub fn into_action<R: BufRead>(self, stdin: &mut R) -> Result<Action> {
        let request = match self {
            Commands::CheckFlatpak => Request::CheckFlatpak,
            Commands::CheckBitwarden => Request::CheckBitwarden,
            Commands::Status => Request::Status,
            Commands::Login { email } => Request::Login {
                email,
                password: read_secret(stdin, "password")?,
            },
            Commands::Login2fa {
                email,
                method,
                code,
            } => Request::Login2fa {
                email,
                password: read_secret(stdin, "password")?,
                method,
                code,
            },
            Commands::Unlock => Request::Unlock {
                master_password: read_secret(stdin, "master password")?,
            },
            Commands::Lock => Request::Lock,
            Commands::Logout => Request::Logout,
            Commands::ListItems { logins } => Request::ListItems {
                logins_only: logins,
            },
            Commands::GetItem { id } => Request::GetItem { id },
            Commands::GetTotp { id } => Request::GetTotp { id },
            Commands::Copy => Request::CopyToClipboard {
                text: read_text(stdin)?,
            },
            Commands::Serve => return Ok(Action::Serve),
            Commands::Config {
                command: ConfigCommands::Show,
            } => return Ok(Action::ConfigShow),
        };
        Ok(Action::Request(request))
    }
}

/// First line of stdin, without its line ending.
pub fn read_secret<R: BufRead>(stdin: &mut R, what: &str) -> Result<String> {
    let mut line = String::new();
    stdin.read_line(&mut line)?;
    let secret = line.trim_end_matches(['\n', '\r']);
    if secret.is_empty() {
        return Err(Error::InvalidInput(format!("expected the {} on stdin", what)));
    }
    Ok(secret.to_string())
}

/// All of stdin, minus one trailing line ending.
pub fn read_text<R: BufRead>(stdin: &mut R) -> Result<String> {
    let mut text = String::new();
    stdin.read_to_string(&mut text)?;
    let trimmed = text
        .strip_suffix("\r\n")
        .or_else(|| text.strip_suffix('\n'))
        .unwrap_or(&text);
    Ok(trimmed.to_string())
}

/// Human-readable rendering of an envelope for `-H`.
pub fn render_human(operation: Operation, envelope: &ResultEnvelope<Value>) -> String {
    let data = envelope.data();
    if let Some(code) = envelope.error() {
        let mut text = format!("Error: {}", describe_code(code.as_str()));
        if let Some(message) = data.and_then(|d| d.get("message")).and_then(Value::as_str) {
            text.push_str(&format!(" ({})", message));
        } else if let Some(stderr) = data.and_then(|d| d.get("stderr")).and_then(Value::as_str) {
            if !stderr.trim().is_empty() {
                text.push_str(&format!("\n{}", stderr.trim_end()));
            }
        }
        return text;
    }

    let field = |name: &str| {
        data.and_then(|d| d.get(name))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    };
    match operation {
        Operation::CheckFlatpak => format!("Flatpak {}", field("version")),
        Operation::CheckBitwarden => "Bitwarden is installed".to_string(),
        Operation::Status => {
            let email = field("userEmail");
            if email.is_empty() {
                format!("Status: {}", field("status"))
            } else {
                format!("Status: {} ({})", field("status"), email)
            }
        }
        Operation::Login | Operation::Login2fa => {
            if data.and_then(|d| d.get("already")) == Some(&Value::Bool(true)) {
                "Already logged in".to_string()
            } else {
                "Logged in".to_string()
            }
        }
        Operation::Unlock => match data.and_then(Value::as_str) {
            Some(key) => format!("Vault unlocked\nexport BW_SESSION=\"{}\"", key),
            None => "Vault unlocked".to_string(),
        },
        Operation::Lock => "Vault locked".to_string(),
        Operation::Logout => "Logged out".to_string(),
        Operation::ListItems => {
            let items: Vec<VaultItem> = data
                .and_then(|d| serde_json::from_value(d.clone()).ok())
                .unwrap_or_default();
            if items.is_empty() {
                return "No items".to_string();
            }
            items
                .iter()
                .map(|item| {
                    let mut line = format!("{}  {}", item.id, item.name);
                    if let Some(user) = item.login.as_ref().and_then(|l| l.username.as_deref()) {
                        line.push_str(&format!("  <{}>", user));
                    }
                    if item.has_totp() {
                        line.push_str("  [totp]");
                    }
                    line
                })
                .collect::<Vec<_>>()
                .join("\n")
        }
        Operation::GetItem => {
            let Some(item) = data.and_then(|d| serde_json::from_value::<VaultItem>(d.clone()).ok())
            else {
                return format!("{} ({})", field("name"), field("id"));
            };
            let mut lines = vec![format!("{} ({})", item.name, item.id)];
            if let Some(user) = item.login.as_ref().and_then(|l| l.username.as_deref()) {
                lines.push(format!("Username: {}", user));
            }
            if let Some(uri) = item.primary_uri() {
                lines.push(format!("URI: {}", uri));
            }
            if item.has_totp() {
                lines.push("TOTP: configured".to_string());
            }
            lines.join("\n")
        }
        Operation::GetTotp => field("totp"),
        Operation::CopyToClipboard => format!("Copied with {}", field("method")),
    }
}
