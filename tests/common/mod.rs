//! Common test utilities for deckwarden integration tests.
//!
//! Provides `TestEnv`, which points the binary at a scripted stand-in for
//! `flatpak` so tests never touch a real vault, config file or clipboard.

#![allow(dead_code)]

use assert_cmd::Command;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
pub use tempfile::TempDir;

pub const EMAIL: &str = "user@example.com";
pub const PASSWORD: &str = "correct_password";
pub const MASTER_PASSWORD: &str = "correct_master";
pub const SESSION_KEY: &str = "mock-session-key";

/// Emulates `flatpak` and the sandboxed `bw`. The vault phase lives in
/// `$FAKE_VAULT_DIR/phase`; every call is appended to `$FAKE_VAULT_DIR/calls`
/// together with whether a session key was present.
const FAKE_FLATPAK: &str = r#"#!/bin/sh
dir="$FAKE_VAULT_DIR"
phase=$(cat "$dir/phase")
if [ -n "$BW_SESSION" ]; then
    echo "$* [session]" >> "$dir/calls"
else
    echo "$*" >> "$dir/calls"
fi

case "$1" in
    --version)
        echo "Flatpak 1.14.4"
        exit 0
        ;;
    info)
        if [ -f "$dir/no-bitwarden" ]; then
            echo "error: $2 not installed" >&2
            exit 1
        fi
        echo "Bitwarden - Password manager"
        exit 0
        ;;
    run)
        shift 3
        [ -f "$dir/slow" ] && sleep 5
        ;;
    *)
        echo "error: unknown command $1" >&2
        exit 1
        ;;
esac

not_logged_in() {
    echo "You are not logged in." >&2
    exit 1
}

require_unlocked() {
    [ "$phase" = unauthenticated ] && not_logged_in
    if [ "$phase" != unlocked ] || [ "$BW_SESSION" != "mock-session-key" ]; then
        echo "Vault is locked." >&2
        exit 1
    fi
}

case "$1" in
    status)
        if [ "$phase" = unauthenticated ]; then
            echo '{"serverUrl":null,"lastSync":null,"status":"unauthenticated"}'
        else
            echo "{\"serverUrl\":null,\"lastSync\":\"2024-01-01T00:00:00.000Z\",\"userEmail\":\"user@example.com\",\"status\":\"$phase\"}"
        fi
        ;;
    login)
        if [ "$phase" != unauthenticated ]; then
            echo "You are already logged in as user@example.com." >&2
            exit 1
        fi
        if [ "$BW_PASSWORD" != "correct_password" ]; then
            echo "Username or password is incorrect. Try again." >&2
            exit 1
        fi
        echo locked > "$dir/phase"
        echo "You are logged in!"
        ;;
    unlock)
        [ "$phase" = unauthenticated ] && not_logged_in
        if [ "$BW_PASSWORD" != "correct_master" ]; then
            echo "Invalid master password." >&2
            exit 1
        fi
        echo unlocked > "$dir/phase"
        printf 'mock-session-key'
        ;;
    lock)
        [ "$phase" = unauthenticated ] && not_logged_in
        echo locked > "$dir/phase"
        echo "Your vault is locked."
        ;;
    logout)
        [ "$phase" = unauthenticated ] && not_logged_in
        echo unauthenticated > "$dir/phase"
        echo "You have logged out."
        ;;
    list)
        require_unlocked
        echo '[{"id":"item-001","name":"GitHub","type":1,"login":{"username":"octocat","password":"hunter2","totp":"JBSWY3DPEHPK3PXP","uris":[{"uri":"https://github.com"}]}},{"id":"item-004","name":"Recovery codes","type":2,"notes":"1234"}]'
        ;;
    get)
        require_unlocked
        case "$2:$3" in
            item:item-001)
                echo '{"id":"item-001","name":"GitHub","type":1,"login":{"username":"octocat","password":"hunter2","totp":"JBSWY3DPEHPK3PXP","uris":[{"uri":"https://github.com"}]}}'
                ;;
            totp:item-001)
                echo "123456"
                ;;
            totp:item-004)
                echo "No TOTP available for this item." >&2
                exit 1
                ;;
            *)
                echo "Not found." >&2
                exit 1
                ;;
        esac
        ;;
    *)
        echo "Unknown command" >&2
        exit 1
        ;;
esac
"#;

/// Stands in for `wl-copy`: stores stdin in `$FAKE_VAULT_DIR/clipboard`.
const FAKE_WL_COPY: &str = r#"#!/bin/sh
cat > "$FAKE_VAULT_DIR/clipboard"
"#;

/// An isolated environment with a fake vault in a temporary directory.
pub struct TestEnv {
    pub dir: TempDir,
}

impl TestEnv {
    /// A fresh environment with nobody logged in.
    pub fn new() -> Self {
        let env = Self {
            dir: TempDir::new().unwrap(),
        };
        fs::create_dir(env.bin_dir()).unwrap();
        write_script(&env.flatpak_path(), FAKE_FLATPAK);
        write_script(&env.bin_dir().join("wl-copy"), FAKE_WL_COPY);
        env.set_phase("unauthenticated");
        env
    }

    /// A fresh environment in the given phase.
    pub fn in_phase(phase: &str) -> Self {
        let env = Self::new();
        env.set_phase(phase);
        env
    }

    /// Get a Command for the deckwarden binary wired to the fake vault.
    pub fn dw(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_deckwarden"));
        cmd.env("FAKE_VAULT_DIR", self.dir.path());
        cmd.env("DECKWARDEN_FLATPAK", self.flatpak_path());
        cmd.env("DECKWARDEN_CONFIG", self.config_path());
        let path = std::env::var("PATH").unwrap_or_default();
        cmd.env("PATH", format!("{}:{}", self.bin_dir().display(), path));
        for var in [
            "BW_SESSION",
            "BW_PASSWORD",
            "DECKWARDEN_LOG",
            "DECKWARDEN_APP_ID",
            "DECKWARDEN_TIMEOUT_MS",
        ] {
            cmd.env_remove(var);
        }
        cmd
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.dir.path().join("bin")
    }

    pub fn flatpak_path(&self) -> PathBuf {
        self.dir.path().join("flatpak")
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.path().join("config.kdl")
    }

    pub fn write_config(&self, contents: &str) {
        fs::write(self.config_path(), contents).unwrap();
    }

    pub fn set_phase(&self, phase: &str) {
        fs::write(self.dir.path().join("phase"), phase).unwrap();
    }

    pub fn phase(&self) -> String {
        fs::read_to_string(self.dir.path().join("phase"))
            .unwrap()
            .trim()
            .to_string()
    }

    /// Make every vault call hang for five seconds.
    pub fn make_slow(&self) {
        fs::write(self.dir.path().join("slow"), "").unwrap();
    }

    pub fn uninstall_bitwarden(&self) {
        fs::write(self.dir.path().join("no-bitwarden"), "").unwrap();
    }

    /// Recorded invocations of the fake flatpak, one per line.
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.dir.path().join("calls"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Last text copied through the fake `wl-copy`.
    pub fn clipboard(&self) -> Option<String> {
        fs::read_to_string(self.dir.path().join("clipboard")).ok()
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

fn write_script(path: &Path, contents: &str) {
    fs::write(path, contents).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// Parse the single JSON line a one-shot command prints.
pub fn envelope(output: &[u8]) -> serde_json::Value {
    serde_json::from_slice(output).unwrap()
}
