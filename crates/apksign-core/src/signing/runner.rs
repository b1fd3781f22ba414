//! Running external signing tools.
//!
//! Every tool runs with piped output, a bounded run time and secrets passed
//! through the child's environment. Captured output stays raw for
//! classification; anything headed for an error message or a log line goes
//! through [`ToolOutput::diagnostics`], which redacts it.

use std::ffi::OsString;
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::config::ToolCommand;
use crate::error::{ApksignError, Result};

/// Captured result of a finished tool run.
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    secrets: Vec<SecretString>,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Unredacted diagnostic text: stderr if present, otherwise stdout.
    ///
    /// For matching only; never surface this to the user.
    pub fn raw_diagnostics(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }

    /// Diagnostic text with secrets removed, safe for errors and logs.
    pub fn diagnostics(&self) -> String {
        let secrets: Vec<&str> = self.secrets.iter().map(|s| s.expose_secret()).collect();
        redact(self.raw_diagnostics(), &secrets)
    }

    /// Exit code, or -1 when the process was terminated by a signal.
    pub fn exit_code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }
}

impl fmt::Debug for ToolOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolOutput")
            .field("status", &self.status)
            .field("diagnostics", &self.diagnostics())
            .finish_non_exhaustive()
    }
}

/// Runs `tool` with `args`, exporting `secret_env` only to the child.
///
/// Spawn failures and timeouts surface as [`ApksignError::Tool`]; a non-zero
/// exit is returned as a normal [`ToolOutput`] for the caller to classify.
pub async fn run_tool(
    tool: &ToolCommand,
    args: &[OsString],
    secret_env: &[(&str, &str)],
    timeout_secs: u64,
) -> Result<ToolOutput> {
    let name = tool.name();

    let mut cmd = tool.command();
    cmd.args(args)
        .envs(secret_env.iter().copied())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::debug!("Running {} {}", tool, describe_args(args));

    let child = cmd.spawn().map_err(|e| ApksignError::Tool {
        tool: name.clone(),
        source: e,
    })?;

    let timeout = Duration::from_secs(timeout_secs);
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| ApksignError::Tool {
            tool: name.clone(),
            source: e,
        })?,
        Err(_) => {
            // Dropping the wait future drops the child, which kills it.
            return Err(ApksignError::Tool {
                tool: name,
                source: std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("exceeded timeout of {} seconds", timeout_secs),
                ),
            });
        }
    };

    let result = ToolOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        secrets: secret_env
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(_, v)| SecretString::from(v.to_string()))
            .collect(),
    };

    if !result.success() {
        tracing::debug!(
            "{} exited with code {}: {}",
            name,
            result.exit_code(),
            result.diagnostics()
        );
    }

    Ok(result)
}

fn describe_args(args: &[OsString]) -> String {
    args.iter()
        .map(|a| a.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Removes secret values and inline `pass:` arguments from tool output.
pub fn redact(text: &str, secrets: &[&str]) -> String {
    let mut out = text.to_string();
    for secret in secrets.iter().filter(|s| !s.is_empty()) {
        out = out.replace(secret, "***");
    }

    match regex_lite::Regex::new(r"(pass:)\S+") {
        Ok(re) => re.replace_all(&out, "${1}***").to_string(),
        Err(_) => out,
    }
}
