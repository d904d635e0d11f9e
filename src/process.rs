// Copyright 2026 Cornell University
// released under MIT License

//! # External processes
//! Every simulator and solver invocation goes through `run_invocations`. Child
//! processes are owned by a guard that kills and reaps them on every exit path.

use log::{debug, error, info};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::errors::ExecutionError;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How the output of external tools is shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    /// Buffer everything and log it only if the command fails
    #[default]
    OnError,
    /// Log every line as soon as it arrives
    Realtime,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessOptions {
    pub display: DisplayMode,
    /// Output containing this string fails the run even if the exit code is 0
    pub error_marker: Option<String>,
    pub check_exit_code: bool,
    /// Start tools with an empty environment (plus `PATH` and `env`)
    pub clean_env: bool,
    pub env: BTreeMap<String, String>,
    /// Write a `run.sh` reproducer next to the generated files
    pub write_script: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            display: DisplayMode::OnError,
            error_marker: None,
            check_exit_code: true,
            clean_env: false,
            env: BTreeMap::new(),
            write_script: false,
        }
    }
}

/// Shared flag used to abort an in-flight run from another thread
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Resources granted to one `run`: all commands share a single deadline
#[derive(Debug, Clone)]
pub struct Budget {
    pub timeout: Duration,
    pub cancel: Option<CancelToken>,
}

impl Budget {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }
}

/// One command line of an artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Invocation {
    pub argv: Vec<String>,
    /// Neither the exit code nor the error marker is checked. Used for solvers,
    /// whose answers are judged by the backend.
    pub lenient: bool,
    /// Limit for this command alone. A lenient command that reaches it is
    /// reported as `timed_out` and the run goes on.
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            lenient: false,
            timeout: None,
        }
    }

    pub fn lenient(mut self) -> Self {
        self.lenient = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Copy-pasteable shell rendering
    pub fn display(&self) -> String {
        quote_command(&self.argv)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessOutput {
    pub command: String,
    /// `None` if the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Killed after reaching the limit of its invocation
    pub timed_out: bool,
}

/// Kills and reaps the child when dropped, unless it already exited.
/// The child leads its own process group, which is killed along with it.
struct ChildGuard {
    child: Option<Child>,
}

impl ChildGuard {
    fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        match self.child.as_mut() {
            Some(child) => {
                let status = child.try_wait()?;
                if status.is_some() {
                    self.child = None;
                }
                Ok(status)
            }
            None => Ok(None),
        }
    }

    fn terminate(&mut self) {
        if let Some(mut child) = self.child.take() {
            kill_group(&child);
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Must run before the leader is reaped, while its pid still names the group
#[cfg(unix)]
fn kill_group(child: &Child) {
    if let Ok(pid) = libc::pid_t::try_from(child.id()) {
        unsafe {
            let _ = libc::kill(-pid, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn quote_arg(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

pub fn quote_command(argv: &[String]) -> String {
    argv.iter()
        .map(|a| quote_arg(a))
        .collect::<Vec<_>>()
        .join(" ")
}

fn spawn_reader<R: Read + Send + 'static>(
    stream: R,
    realtime: bool,
    tag: &'static str,
) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut out = String::new();
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line);
                    if realtime {
                        info!("[{tag}] {}", text.trim_end());
                    }
                    out.push_str(&text);
                }
            }
        }
        out
    })
}

/// Runs a single command in `cwd` until it exits or `deadline` passes
pub fn run_invocation(
    invocation: &Invocation,
    cwd: &Path,
    options: &ProcessOptions,
    budget: &Budget,
    deadline: Instant,
) -> Result<ProcessOutput, ExecutionError> {
    let command = invocation.display();
    let (program, args) = invocation
        .argv
        .split_first()
        .ok_or_else(|| ExecutionError::Launch {
            command: command.clone(),
            reason: "empty command line".to_string(),
        })?;
    let realtime = options.display == DisplayMode::Realtime;
    if realtime {
        info!("running {command}");
    } else {
        debug!("running {command}");
    }

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if options.clean_env {
        cmd.env_clear();
        if let Ok(path) = std::env::var("PATH") {
            cmd.env("PATH", path);
        }
    }
    cmd.envs(&options.env);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let limit = invocation.timeout.map(|t| Instant::now() + t);
    let mut child = cmd.spawn().map_err(|e| ExecutionError::Launch {
        command: command.clone(),
        reason: e.to_string(),
    })?;
    let stdout = child.stdout.take().map(|s| spawn_reader(s, realtime, "stdout"));
    let stderr = child.stderr.take().map(|s| spawn_reader(s, realtime, "stderr"));
    let mut guard = ChildGuard { child: Some(child) };

    // `None` once the invocation's own limit is reached
    let status = loop {
        if let Some(status) = guard.try_wait()? {
            break Some(status);
        }
        if budget.is_cancelled() {
            guard.terminate();
            return Err(ExecutionError::Cancelled);
        }
        let now = Instant::now();
        if now >= deadline {
            guard.terminate();
            return Err(ExecutionError::Timeout {
                command,
                timeout: budget.timeout,
            });
        }
        if limit.is_some_and(|l| now >= l) {
            guard.terminate();
            break None;
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    let join = |h: Option<JoinHandle<String>>| h.and_then(|h| h.join().ok()).unwrap_or_default();
    let output = ProcessOutput {
        command,
        exit_code: status.and_then(|s| s.code()),
        stdout: join(stdout),
        stderr: join(stderr),
        timed_out: status.is_none(),
    };
    if invocation.lenient {
        if output.timed_out {
            info!("{} stopped after reaching its limit", output.command);
        }
        return Ok(output);
    }
    match status {
        Some(status) => check_output(&output, status, options)?,
        None => {
            return Err(ExecutionError::Timeout {
                command: output.command,
                timeout: invocation.timeout.unwrap_or(budget.timeout),
            })
        }
    }
    Ok(output)
}

fn check_output(
    output: &ProcessOutput,
    status: ExitStatus,
    options: &ProcessOptions,
) -> Result<(), ExecutionError> {
    let failure = if let Some(marker) = options
        .error_marker
        .as_ref()
        .filter(|m| output.stdout.contains(m.as_str()) || output.stderr.contains(m.as_str()))
    {
        Some(ExecutionError::ErrorMarker {
            command: output.command.clone(),
            marker: marker.clone(),
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
        })
    } else if options.check_exit_code && !status.success() {
        Some(ExecutionError::Crashed {
            command: output.command.clone(),
            status: status.to_string(),
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
        })
    } else {
        None
    };
    match failure {
        Some(err) => {
            if options.display == DisplayMode::OnError {
                error!("{} failed", output.command);
                for line in output.stdout.lines() {
                    error!("[stdout] {line}");
                }
                for line in output.stderr.lines() {
                    error!("[stderr] {line}");
                }
            }
            Err(err)
        }
        None => Ok(()),
    }
}

/// Runs `invocations` one after the other under a single deadline.
/// The first failing command ends the run.
pub fn run_invocations(
    invocations: &[Invocation],
    cwd: &Path,
    options: &ProcessOptions,
    budget: &Budget,
) -> Result<Vec<ProcessOutput>, ExecutionError> {
    let deadline = Instant::now() + budget.timeout;
    let mut outputs = Vec::with_capacity(invocations.len());
    for invocation in invocations {
        outputs.push(run_invocation(invocation, cwd, options, budget, deadline)?);
    }
    Ok(outputs)
}

/// Writes `run.sh`, a shell script that repeats `invocations` in `dir`
pub fn write_script(
    dir: &Path,
    invocations: &[Invocation],
    options: &ProcessOptions,
) -> std::io::Result<std::path::PathBuf> {
    let mut script = String::from("#!/bin/sh\nset -e\ncd \"$(dirname \"$0\")\"\n");
    for (key, value) in &options.env {
        script.push_str(&format!("export {key}={}\n", quote_arg(value)));
    }
    for invocation in invocations {
        let line = invocation.display();
        if invocation.lenient {
            script.push_str(&format!("{line} || true\n"));
        } else {
            script.push_str(&line);
            script.push('\n');
        }
    }
    let path = dir.join("run.sh");
    std::fs::write(&path, script)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(path)
}
