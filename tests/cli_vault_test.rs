//! Integration tests for the one-shot vault commands.
//!
//! Every test runs the real binary against the scripted `flatpak` from
//! `common`, so the full path (config, launcher, classifier, session state,
//! envelope output) is exercised.

#![cfg(unix)]

mod common;

use common::{EMAIL, MASTER_PASSWORD, PASSWORD, SESSION_KEY, TestEnv, envelope};
use predicates::prelude::*;
use std::time::{Duration, Instant};

#[test]
fn test_host_probes() {
    let env = TestEnv::new();

    let output = env.dw().arg("check-flatpak").output().unwrap();
    assert!(output.status.success());
    let result = envelope(&output.stdout);
    assert_eq!(result["ok"], true);
    assert!(result["error"].is_null());
    assert_eq!(result["data"]["version"], "1.14.4");

    let output = env.dw().arg("check-bitwarden").output().unwrap();
    assert_eq!(envelope(&output.stdout)["data"]["installed"], true);

    // Probes never start a vault call.
    assert_eq!(
        env.calls(),
        vec!["--version", "info com.bitwarden.desktop"]
    );
}

#[test]
fn test_bitwarden_missing() {
    let env = TestEnv::new();
    env.uninstall_bitwarden();
    let output = env.dw().arg("check-bitwarden").output().unwrap();
    assert!(!output.status.success());
    let result = envelope(&output.stdout);
    assert_eq!(result["ok"], false);
    assert_eq!(result["error"], "BITWARDEN_MISSING");
    assert!(result["data"].is_null());
}

#[test]
fn test_flatpak_missing() {
    let env = TestEnv::new();
    let missing = env.path().join("no-such-flatpak");
    for command in ["check-flatpak", "check-bitwarden", "status"] {
        let output = env
            .dw()
            .args([command, "--flatpak", missing.to_str().unwrap()])
            .output()
            .unwrap();
        assert!(!output.status.success());
        assert_eq!(envelope(&output.stdout)["error"], "FLATPAK_MISSING", "{}", command);
    }
}

#[test]
fn test_full_session_flow() {
    let env = TestEnv::new();

    let status = envelope(&env.dw().arg("status").output().unwrap().stdout);
    assert_eq!(status["data"]["status"], "unauthenticated");

    let login = env
        .dw()
        .args(["login", EMAIL])
        .write_stdin(format!("{}\n", PASSWORD))
        .output()
        .unwrap();
    assert!(login.status.success());
    assert_eq!(envelope(&login.stdout)["data"]["already"], false);
    assert_eq!(env.phase(), "locked");

    let unlock = env
        .dw()
        .arg("unlock")
        .write_stdin(format!("{}\n", MASTER_PASSWORD))
        .output()
        .unwrap();
    assert!(unlock.status.success());
    assert_eq!(envelope(&unlock.stdout)["data"], SESSION_KEY);
    assert_eq!(env.phase(), "unlocked");

    let items = env
        .dw()
        .args(["list-items", "--logins"])
        .env("BW_SESSION", SESSION_KEY)
        .output()
        .unwrap();
    let items = envelope(&items.stdout);
    assert_eq!(items["data"].as_array().unwrap().len(), 1);
    assert_eq!(items["data"][0]["name"], "GitHub");

    let item = env
        .dw()
        .args(["get-item", "item-001"])
        .env("BW_SESSION", SESSION_KEY)
        .output()
        .unwrap();
    let item = envelope(&item.stdout);
    assert_eq!(item["data"]["login"]["username"], "octocat");

    let totp = env
        .dw()
        .args(["get-totp", "item-001"])
        .env("BW_SESSION", SESSION_KEY)
        .output()
        .unwrap();
    assert_eq!(envelope(&totp.stdout)["data"]["totp"], "123456");

    env.dw()
        .arg("lock")
        .env("BW_SESSION", SESSION_KEY)
        .assert()
        .success();
    assert_eq!(env.phase(), "locked");

    env.dw().arg("logout").assert().success();
    assert_eq!(env.phase(), "unauthenticated");

    let calls = env.calls();
    for call in &calls {
        assert!(!call.contains(PASSWORD), "password leaked into argv: {}", call);
        assert!(!call.contains(MASTER_PASSWORD), "password leaked into argv: {}", call);
        assert!(!call.contains(SESSION_KEY), "session key leaked into argv: {}", call);
    }
    assert!(
        calls
            .iter()
            .any(|c| c.ends_with("list items --raw [session]"))
    );
    // Login and logout must not see a session key.
    assert!(
        calls
            .iter()
            .filter(|c| c.contains(" login ") || c.contains(" logout"))
            .all(|c| !c.ends_with("[session]"))
    );
}

#[test]
fn test_inherited_session_key_does_not_reach_login() {
    let env = TestEnv::new();
    env.dw()
        .args(["login", EMAIL])
        .env("BW_SESSION", "stale-key")
        .env("BW_PASSWORD", "from-the-shell")
        .write_stdin(format!("{}\n", PASSWORD))
        .assert()
        .success();
    let login = env
        .calls()
        .into_iter()
        .find(|c| c.contains(" login "))
        .unwrap();
    assert!(!login.ends_with("[session]"));
}

#[test]
fn test_wrong_password() {
    let env = TestEnv::new();
    let output = env
        .dw()
        .args(["login", EMAIL])
        .write_stdin("wrong\n")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let result = envelope(&output.stdout);
    assert_eq!(result["error"], "INVALID_CREDENTIALS");
    assert!(result["data"].is_null());
    assert_eq!(env.phase(), "unauthenticated");
}

#[test]
fn test_login_when_already_logged_in() {
    let env = TestEnv::in_phase("locked");
    let output = env
        .dw()
        .args(["login", EMAIL])
        .write_stdin(format!("{}\n", PASSWORD))
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(envelope(&output.stdout)["data"]["already"], true);
}

#[test]
fn test_missing_password_on_stdin() {
    let env = TestEnv::in_phase("locked");
    env.dw()
        .arg("unlock")
        .write_stdin("")
        .assert()
        .failure()
        .stderr(predicate::str::contains("master password"));
    assert!(env.calls().is_empty());
}

#[test]
fn test_wrong_master_password() {
    let env = TestEnv::in_phase("locked");
    let output = env
        .dw()
        .arg("unlock")
        .write_stdin("nope\n")
        .output()
        .unwrap();
    assert_eq!(envelope(&output.stdout)["error"], "INVALID_CREDENTIALS");
    assert_eq!(env.phase(), "locked");
}

#[test]
fn test_vault_access_by_phase() {
    let env = TestEnv::new();
    let output = env.dw().arg("list-items").output().unwrap();
    assert_eq!(envelope(&output.stdout)["error"], "NOT_AUTHENTICATED");

    env.set_phase("locked");
    let output = env.dw().arg("list-items").output().unwrap();
    assert_eq!(envelope(&output.stdout)["error"], "LOCKED");

    // Unlocked, but no session key to prove it.
    env.set_phase("unlocked");
    let output = env.dw().args(["get-totp", "item-001"]).output().unwrap();
    assert_eq!(envelope(&output.stdout)["error"], "LOCKED");
}

#[test]
fn test_item_without_totp() {
    let env = TestEnv::in_phase("unlocked");
    let output = env
        .dw()
        .args(["get-totp", "item-004"])
        .env("BW_SESSION", SESSION_KEY)
        .output()
        .unwrap();
    assert!(!output.status.success());
    let result = envelope(&output.stdout);
    assert_eq!(result["error"], "COMMAND_FAILED");
    assert!(result["data"].is_null());
}

#[test]
fn test_attach_diagnostics() {
    let env = TestEnv::in_phase("unlocked");
    env.write_config("attach-diagnostics #true\n");
    let output = env
        .dw()
        .args(["get-item", "item-999"])
        .env("BW_SESSION", SESSION_KEY)
        .output()
        .unwrap();
    let result = envelope(&output.stdout);
    assert_eq!(result["error"], "COMMAND_FAILED");
    assert_eq!(result["data"]["stderr"].as_str().unwrap().trim(), "Not found.");
    assert_eq!(result["data"]["exitCode"], 1);
}

#[test]
fn test_invalid_item_id_never_reaches_the_cli() {
    let env = TestEnv::in_phase("unlocked");
    let output = env
        .dw()
        .args(["get-item", "--", "--raw"])
        .env("BW_SESSION", SESSION_KEY)
        .output()
        .unwrap();
    assert_eq!(envelope(&output.stdout)["error"], "COMMAND_FAILED");
    assert!(!env.calls().iter().any(|c| c.contains("get item")));
}

#[test]
fn test_timeout_is_command_failed() {
    let env = TestEnv::in_phase("locked");
    env.make_slow();
    let started = Instant::now();
    let output = env
        .dw()
        .args(["status", "--timeout-ms", "300"])
        .output()
        .unwrap();
    assert_eq!(envelope(&output.stdout)["error"], "COMMAND_FAILED");
    // One probe at init plus the status call itself.
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[test]
fn test_copy_to_clipboard() {
    let env = TestEnv::new();
    let output = env
        .dw()
        .arg("copy")
        .write_stdin("hunter2\n")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(envelope(&output.stdout)["data"]["method"], "wl-copy");
    assert_eq!(env.clipboard().as_deref(), Some("hunter2"));
    assert!(env.calls().is_empty());
}

#[test]
fn test_copy_without_any_clipboard_tool() {
    let env = TestEnv::new();
    let empty = env.path().join("empty-path");
    std::fs::create_dir(&empty).unwrap();
    let output = env
        .dw()
        .arg("copy")
        .env("PATH", &empty)
        .write_stdin("hunter2")
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert_eq!(envelope(&output.stdout)["error"], "CLIPBOARD_ERROR");
}

#[test]
fn test_human_output() {
    let env = TestEnv::in_phase("locked");
    env.dw()
        .args(["status", "-H"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Status: locked (user@example.com)"));
    env.dw()
        .args(["list-items", "-H"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Error: The vault is locked"));
}
