//! Shell command execution.
//!
//! Daemon lifecycle operations are expressed as shell scripts (they chain
//! `sudo`, `cd` and file permission fixes).  [`CommandRunner`] is the seam
//! that lets the engine run them for real or record them in tests.

use crate::error::{CoreError, CoreErrorKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;

/// Result of running a command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub ok: bool,
    pub err: Option<String>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutcome {
    pub fn success() -> Self {
        Self {
            ok: true,
            ..Default::default()
        }
    }

    pub fn failure(err: impl Into<String>) -> Self {
        Self {
            ok: false,
            err: Some(err.into()),
            ..Default::default()
        }
    }
}

/// Runs shell scripts on the host.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a script and wait for it to finish.
    async fn run(&self, script: &str) -> CommandOutcome;

    /// Start a script in the background without waiting for it.
    async fn bgexec(&self, script: &str) -> CommandOutcome;
}

/// [`CommandRunner`] backed by `sh -c`.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self {
            shell: "sh".into(),
        }
    }
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    fn spawn_detached(&self, script: &str) -> Result<tokio::process::Child, CoreError> {
        tokio::process::Command::new(&self.shell)
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                CoreError::new(CoreErrorKind::CommandFailed, "Cannot start background command")
                    .with_detail(e.to_string())
            })
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, script: &str) -> CommandOutcome {
        log::debug!("run: {}", script);
        let output = tokio::process::Command::new(&self.shell)
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .output()
            .await;

        match output {
            Ok(out) => {
                let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&out.stderr).into_owned();
                if out.status.success() {
                    CommandOutcome {
                        ok: true,
                        err: None,
                        stdout,
                        stderr,
                    }
                } else {
                    let err = if stderr.trim().is_empty() {
                        format!("command exited with {}", out.status)
                    } else {
                        stderr.trim().to_string()
                    };
                    log::warn!("command failed: {}", err);
                    CommandOutcome {
                        ok: false,
                        err: Some(err),
                        stdout,
                        stderr,
                    }
                }
            }
            Err(e) => CommandOutcome::failure(format!("cannot spawn {}: {}", self.shell, e)),
        }
    }

    async fn bgexec(&self, script: &str) -> CommandOutcome {
        log::debug!("bgexec: {}", script);
        match self.spawn_detached(script) {
            Ok(mut child) => {
                // Reap the child so it does not linger as a zombie.
                tokio::spawn(async move {
                    let _ = child.wait().await;
                });
                CommandOutcome::success()
            }
            Err(e) => {
                log::warn!("{}", e);
                CommandOutcome::failure(e.to_string())
            }
        }
    }
}

/// Quote a word for POSIX `sh`.
pub fn shell_quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=,+@%".contains(c))
    {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── quoting ──

    #[test]
    fn plain_words_are_not_quoted() {
        assert_eq!(shell_quote("/etc/openvpn/server.conf"), "/etc/openvpn/server.conf");
        assert_eq!(shell_quote("--daemon"), "--daemon");
    }

    #[test]
    fn spaces_and_quotes_are_quoted() {
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    // ── shell runner ──

    #[tokio::test]
    async fn run_captures_stdout() {
        let out = ShellRunner::new().run("echo hello").await;
        assert!(out.ok);
        assert_eq!(out.stdout.trim(), "hello");
        assert!(out.err.is_none());
    }

    #[tokio::test]
    async fn run_reports_failure() {
        let out = ShellRunner::new().run("echo boom >&2; exit 3").await;
        assert!(!out.ok);
        assert_eq!(out.err.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn missing_shell_is_reported() {
        let runner = ShellRunner::with_shell("/nonexistent/shell");
        let out = runner.bgexec("true").await;
        assert!(!out.ok);
        assert!(out.err.unwrap().contains("CommandFailed"));
    }

    #[tokio::test]
    async fn bgexec_returns_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("done");
        let script = format!("touch {}", shell_quote(&marker.to_string_lossy()));
        assert!(ShellRunner::new().bgexec(&script).await.ok);
        for _ in 0..50 {
            if marker.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(marker.exists());
    }
}
