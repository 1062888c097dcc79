//! Process invoker: runs an external argument vector with a hard timeout.
//!
//! The invoker never returns an error. Spawn failures, non-zero exits and
//! timeouts are all encoded in the returned [`CommandResult`] so that the
//! classifier can treat them uniformly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

/// Default timeout for vault CLI calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// How long to keep collecting output after the child has exited or been
/// killed. Bounds the call even when a grandchild holds the pipes open.
pub const OUTPUT_GRACE: Duration = Duration::from_millis(250);

/// Exit code reported when the program does not exist.
pub const EXIT_NOT_FOUND: i32 = 127;
/// Exit code reported when the program exists but cannot be executed.
pub const EXIT_NOT_EXECUTABLE: i32 = 126;
/// Exit code reported for other spawn failures and for timeouts.
pub const EXIT_ABNORMAL: i32 = -1;

/// Raw outcome of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

impl CommandResult {
    /// A completed command.
    pub fn exited(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
            timed_out: false,
        }
    }

    /// A command that never started.
    pub fn spawn_failure(program: &str, error: &std::io::Error) -> Self {
        let exit_code = match error.kind() {
            std::io::ErrorKind::NotFound => EXIT_NOT_FOUND,
            std::io::ErrorKind::PermissionDenied => EXIT_NOT_EXECUTABLE,
            _ => EXIT_ABNORMAL,
        };
        Self {
            stdout: String::new(),
            stderr: format!("failed to launch {}: {}", program, error),
            exit_code,
            timed_out: false,
        }
    }

    /// A command that was killed after exceeding its timeout.
    pub fn timeout(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code: EXIT_ABNORMAL,
            timed_out: true,
        }
    }

    /// Exit code 0 and no timeout.
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// The program could not be launched at all.
    pub fn launch_failed(&self) -> bool {
        !self.timed_out
            && (self.exit_code == EXIT_NOT_FOUND || self.exit_code == EXIT_NOT_EXECUTABLE)
    }
}

/// Environment variables holding secrets. Values never appear in `Debug`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretEnv(BTreeMap<String, String>);

impl SecretEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

impl std::fmt::Debug for SecretEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.0.keys().map(|k| (k, "<redacted>")))
            .finish()
    }
}

/// A fully-formed request to run one external program.
#[derive(Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: SecretEnv,
    /// Variables removed from the inherited environment before `env` is applied.
    pub unset: Vec<String>,
    /// Payload written to the child's stdin. Treated as secret.
    pub stdin: Option<String>,
    pub timeout: Duration,
    /// When false, stdout and stderr are discarded instead of piped.
    pub capture_output: bool,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: SecretEnv::new(),
            unset: Vec::new(),
            stdin: None,
            timeout: DEFAULT_TIMEOUT,
            capture_output: true,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn secret_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.set(name, value);
        self
    }

    pub fn env_remove(mut self, name: impl Into<String>) -> Self {
        self.unset.push(name.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn discard_output(mut self) -> Self {
        self.capture_output = false;
        self
    }

    /// The full argument vector, program first.
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("argv", &self.argv())
            .field("env", &self.env)
            .field("unset", &self.unset)
            .field("stdin", &self.stdin.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("capture_output", &self.capture_output)
            .finish()
    }
}

/// Seam between the backend and the operating system.
pub trait CommandRunner: Send + Sync {
    /// Run the invocation to completion or timeout.
    fn run(&self, invocation: &Invocation) -> CommandResult;
}

/// Runs invocations as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> CommandResult {
        let started = Instant::now();
        let result = run_child(invocation);
        tracing::debug!(
            program = %invocation.program,
            exit_code = result.exit_code,
            timed_out = result.timed_out,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "process finished"
        );
        result
    }
}

fn run_child(invocation: &Invocation) -> CommandResult {
    let output_mode = || {
        if invocation.capture_output {
            Stdio::piped()
        } else {
            Stdio::null()
        }
    };

    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(output_mode())
        .stderr(output_mode());
    for name in &invocation.unset {
        command.env_remove(name);
    }
    for (name, value) in invocation.env.iter() {
        command.env(name, value);
    }

    // Own process group so a timeout can take down anything the runner forked.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => return CommandResult::spawn_failure(&invocation.program, &e),
    };

    if let (Some(mut pipe), Some(input)) = (child.stdin.take(), invocation.stdin.clone()) {
        thread::spawn(move || {
            // A child that exits without reading closes the pipe; that is fine.
            let _ = pipe.write_all(input.as_bytes());
        });
    }

    let stdout_rx = child.stdout.take().map(drain);
    let stderr_rx = child.stderr.take().map(drain);

    let status = match child.wait_timeout(invocation.timeout) {
        Ok(Some(status)) => Some(status),
        Ok(None) => {
            terminate(&mut child);
            None
        }
        Err(e) => {
            terminate(&mut child);
            let mut result = CommandResult::spawn_failure(&invocation.program, &e);
            result.exit_code = EXIT_ABNORMAL;
            return result;
        }
    };

    let deadline = Instant::now() + OUTPUT_GRACE;
    let stdout = collect(stdout_rx, deadline);
    let stderr = collect(stderr_rx, deadline);

    match status {
        Some(status) => CommandResult::exited(exit_code_of(status), stdout, stderr),
        None => CommandResult::timeout(stdout, stderr),
    }
}

/// Read a pipe on its own thread, forwarding chunks as they arrive so that
/// partial output survives a kill.
fn drain<R: Read + Send + 'static>(mut pipe: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

fn collect(rx: Option<Receiver<Vec<u8>>>, deadline: Instant) -> String {
    let Some(rx) = rx else {
        return String::new();
    };
    let mut bytes = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(chunk) => bytes.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;
        if let Ok(pid) = i32::try_from(child.id()) {
            let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
        }
    }
    let _ = child.kill();
    // Reap so no zombie is left behind.
    let _ = child.wait();
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    EXIT_ABNORMAL
}
