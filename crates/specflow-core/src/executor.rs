//! Action execution.
//!
//! Runs a single rule action and folds every outcome, including spawn errors,
//! non-zero exits and timeouts, into a [`DispatchResult`]. Nothing here
//! returns an error to the caller.

use crate::error::{Result, SpecflowError};
use crate::event::HookEvent;
use crate::rule::{Action, AutomationRule};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

/// Longest diagnostic carried in `DispatchResult.error`.
const MAX_DIAGNOSTIC_CHARS: usize = 2000;

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr, trailing whitespace trimmed.
    pub fn combined(&self) -> String {
        let out = self.stdout.trim_end();
        let err = self.stderr.trim_end();
        match (out.is_empty(), err.is_empty()) {
            (true, true) => String::new(),
            (false, true) => out.to_string(),
            (true, false) => err.to_string(),
            (false, false) => format!("{out}\n{err}"),
        }
    }
}

/// Runs a shell command line. A non-zero exit is a normal `Ok` outcome;
/// `Err` is reserved for spawn failures and timeouts.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: &str, cwd: Option<&Path>) -> Result<ProcessOutput>;
}

/// Receives `send_message` text and returns the agent's reply.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, message: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// ShellRunner
// ---------------------------------------------------------------------------

/// Default [`ProcessRunner`]: `sh -c` (or `cmd /C` on Windows).
#[derive(Debug, Clone)]
pub struct ShellRunner {
    timeout: Option<Duration>,
}

impl ShellRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new(Some(Duration::from_secs(60)))
    }
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.args(["/C", command]);
    cmd
}

/// The shell leads its own process group so a timeout can take down every
/// process it started, not just `sh` itself.
#[cfg(not(windows))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", command]).process_group(0);
    cmd
}

#[cfg(unix)]
async fn kill_group(pid: u32) {
    let status = Command::new("kill")
        .args(["-KILL", "--", &format!("-{pid}")])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(e) = status {
        tracing::warn!(pid, error = %e, "failed to kill process group");
    }
}

#[cfg(not(unix))]
async fn kill_group(_pid: u32) {}

/// Wait for `child` to exit, collecting its output. Returns `None` if `limit`
/// elapsed first, after killing the child's process group.
async fn wait_limited(
    child: Child,
    limit: Option<Duration>,
) -> Option<std::io::Result<std::process::Output>> {
    let pid = child.id();
    let wait = child.wait_with_output();
    let Some(limit) = limit else {
        return Some(wait.await);
    };
    match tokio::time::timeout(limit, wait).await {
        Ok(res) => Some(res),
        Err(_) => {
            if let Some(pid) = pid {
                kill_group(pid).await;
            }
            None
        }
    }
}

#[async_trait]
impl ProcessRunner for ShellRunner {
    async fn run(&self, command: &str, cwd: Option<&Path>) -> Result<ProcessOutput> {
        let mut cmd = shell_command(command);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| SpecflowError::Execution(format!("failed to spawn '{command}': {e}")))?;

        let Some(waited) = wait_limited(child, self.timeout).await else {
            let secs = self.timeout.map(|t| t.as_secs()).unwrap_or_default();
            tracing::warn!(command, timeout_secs = secs, "command timed out");
            return Err(SpecflowError::Execution(format!(
                "'{command}' timed out after {secs}s"
            )));
        };
        let output = waited
            .map_err(|e| SpecflowError::Execution(format!("wait failed for '{command}': {e}")))?;

        Ok(ProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }
}

// ---------------------------------------------------------------------------
// AgentCommandSink
// ---------------------------------------------------------------------------

/// [`MessageSink`] that pipes each message on stdin to an agent command such
/// as `claude -p` and returns its stdout.
#[derive(Debug, Clone)]
pub struct AgentCommandSink {
    command: String,
    cwd: PathBuf,
    timeout: Option<Duration>,
}

impl AgentCommandSink {
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl MessageSink for AgentCommandSink {
    async fn send(&self, message: &str) -> Result<String> {
        let mut child = shell_command(&self.command)
            .current_dir(&self.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SpecflowError::Execution(format!("failed to spawn agent '{}': {e}", self.command))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(message.as_bytes()).await?;
            // stdin dropped here so the agent sees EOF
        }

        let output = wait_limited(child, self.timeout).await.ok_or_else(|| {
            let secs = self.timeout.map(|t| t.as_secs()).unwrap_or_default();
            SpecflowError::Execution(format!("agent timed out after {secs}s"))
        })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SpecflowError::Execution(format!(
                "agent exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

// ---------------------------------------------------------------------------
// DispatchResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub rule_id: String,
    pub rule_name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl DispatchResult {
    fn succeeded(rule: &AutomationRule, output: String, duration_ms: u64) -> Self {
        Self {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            success: true,
            output: (!output.is_empty()).then_some(output),
            error: None,
            duration_ms,
        }
    }

    fn failed(
        rule: &AutomationRule,
        error: String,
        output: Option<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            success: false,
            output: output.filter(|o| !o.is_empty()),
            error: Some(truncate(&error)),
            duration_ms,
        }
    }

    /// A result for a rule that never ran (unknown or disabled).
    pub fn rejected(rule_id: &str, rule_name: &str, reason: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            rule_name: rule_name.to_string(),
            success: false,
            output: None,
            error: Some(reason.into()),
            duration_ms: 0,
        }
    }
}

fn truncate(s: &str) -> String {
    if s.chars().count() <= MAX_DIAGNOSTIC_CHARS {
        return s.to_string();
    }
    let mut cut: String = s.chars().take(MAX_DIAGNOSTIC_CHARS).collect();
    cut.push('…');
    cut
}

// ---------------------------------------------------------------------------
// Placeholders
// ---------------------------------------------------------------------------

/// Replace `{filePath}`, `{message}` and `{event}` with payload values in a
/// single pass, so substituted text is never expanded again. Missing values
/// become empty; other braces are left alone.
pub fn substitute(template: &str, event: &HookEvent) -> String {
    let values = [
        ("{filePath}", event.payload.file_path.as_deref().unwrap_or("")),
        ("{message}", event.payload.message.as_deref().unwrap_or("")),
        ("{event}", event.event_type.as_str()),
    ];
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        match values.iter().find(|(token, _)| tail.starts_with(token)) {
            Some((token, value)) => {
                out.push_str(value);
                rest = &tail[token.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

// ---------------------------------------------------------------------------
// ActionExecutor
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ActionExecutor {
    root: PathBuf,
    runner: Arc<dyn ProcessRunner>,
    sink: Option<Arc<dyn MessageSink>>,
}

impl ActionExecutor {
    /// An executor rooted at `root` using [`ShellRunner`] and no message sink.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            runner: Arc::new(ShellRunner::default()),
            sink: None,
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_message_sink(mut self, sink: Arc<dyn MessageSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn has_message_sink(&self) -> bool {
        self.sink.is_some()
    }

    fn resolve_dir(&self, working_dir: Option<&Path>) -> PathBuf {
        match working_dir {
            Some(dir) if dir.is_absolute() => dir.to_path_buf(),
            Some(dir) => self.root.join(dir),
            None => self.root.clone(),
        }
    }

    pub async fn execute(&self, rule: &AutomationRule, event: &HookEvent) -> DispatchResult {
        let start = Instant::now();
        let result = match &rule.action {
            Action::SendMessage { message } => self.send_message(rule, message, event).await,
            Action::ExecuteCommand {
                command,
                working_dir,
            } => {
                self.execute_command(rule, command, working_dir.as_deref())
                    .await
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(output) => DispatchResult::succeeded(rule, output, duration_ms),
            Err((error, output)) => DispatchResult::failed(rule, error, output, duration_ms),
        }
    }

    async fn send_message(
        &self,
        rule: &AutomationRule,
        template: &str,
        event: &HookEvent,
    ) -> std::result::Result<String, (String, Option<String>)> {
        let Some(sink) = &self.sink else {
            return Err(("no message sink configured".to_string(), None));
        };
        let text = substitute(template, event);
        tracing::debug!(rule_id = %rule.id, chars = text.len(), "sending hook message");
        sink.send(&text).await.map_err(|e| (e.to_string(), None))
    }

    async fn execute_command(
        &self,
        rule: &AutomationRule,
        command: &str,
        working_dir: Option<&Path>,
    ) -> std::result::Result<String, (String, Option<String>)> {
        let cwd = self.resolve_dir(working_dir);
        tracing::debug!(rule_id = %rule.id, command, cwd = %cwd.display(), "running hook command");
        let output = self
            .runner
            .run(command, Some(&cwd))
            .await
            .map_err(|e| (e.to_string(), None))?;
        let combined = output.combined();
        if output.success() {
            return Ok(combined);
        }
        let status = match output.exit_code {
            Some(code) => format!("exited with code {code}"),
            None => "terminated by signal".to_string(),
        };
        let error = if combined.is_empty() {
            format!("'{command}' {status}")
        } else {
            format!("'{command}' {status}: {combined}")
        };
        Err((error, Some(combined)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
