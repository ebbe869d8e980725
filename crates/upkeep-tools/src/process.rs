//! Subprocess execution.
//!
//! Every external program runs through [`ToolCommand`]: output is captured,
//! the child is killed when the run is cancelled, and failures carry the
//! combined output for diagnostics.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use tokio::process::Command;
use tracing::debug;
use upkeep_core::RunContext;

use crate::error::{Result, ToolError};

/// Captured result of a finished program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Stdout followed by stderr. Composer writes its operation log to stderr.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }

    /// Stdout without the trailing newline.
    pub fn trimmed(&self) -> &str {
        self.stdout.trim_end_matches('\n')
    }
}

/// Builder for one program invocation.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    dir: Option<PathBuf>,
    envs: BTreeMap<String, String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            dir: None,
            envs: BTreeMap::new(),
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

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.dir = Some(dir.to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Run to completion whatever the exit status.
    pub async fn output(&self, ctx: &RunContext) -> Result<CommandOutput> {
        if ctx.is_cancelled() {
            return Err(ToolError::Cancelled);
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(&self.envs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.dir {
            command.current_dir(dir);
        }

        let start = Instant::now();
        let child = command.spawn().map_err(|source| ToolError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        // Dropping the wait future on cancellation drops the child, which kills it.
        let output = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(ToolError::Cancelled),
            output = child.wait_with_output() => output?,
        };

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(
            program = %self.program,
            args = ?self.args,
            dir = ?self.dir,
            code = ?result.code,
            duration_ms = start.elapsed().as_millis() as u64,
            "command finished"
        );
        Ok(result)
    }

    /// Run and fail unless the program exits with status 0.
    pub async fn run(&self, ctx: &RunContext) -> Result<CommandOutput> {
        let output = self.output(ctx).await?;
        if !output.success() {
            return Err(self.failed(&output));
        }
        Ok(output)
    }

    pub(crate) fn failed(&self, output: &CommandOutput) -> ToolError {
        ToolError::CommandFailed {
            program: self.program.clone(),
            code: output.code,
            output: output.combined().trim_end().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_stdout() {
        let output = ToolCommand::new("echo")
            .arg("hello")
            .run(&RunContext::new())
            .await
            .expect("echo runs");
        assert!(output.success());
        assert_eq!(output.trimmed(), "hello");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_an_error() {
        let err = ToolCommand::new("sh")
            .args(["-c", "echo broken >&2; exit 3"])
            .run(&RunContext::new())
            .await
            .unwrap_err();
        match err {
            ToolError::CommandFailed { code, output, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(output, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_env_and_dir_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let output = ToolCommand::new("sh")
            .args(["-c", "echo $SITE_NAME; pwd"])
            .env("SITE_NAME", "default")
            .current_dir(dir.path())
            .run(&RunContext::new())
            .await
            .unwrap();
        let mut lines = output.stdout.lines();
        assert_eq!(lines.next(), Some("default"));
        assert!(lines
            .next()
            .unwrap()
            .ends_with(dir.path().file_name().unwrap().to_str().unwrap()));
    }

    #[tokio::test]
    async fn test_cancellation_kills_the_child() {
        let ctx = RunContext::new();
        let cancel = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            cancel.cancel();
        });
        let err = ToolCommand::new("sleep")
            .arg("30")
            .run(&ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = ToolCommand::new("upkeep-definitely-not-installed")
            .run(&RunContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[test]
    fn test_combined_output() {
        let output = CommandOutput {
            code: Some(0),
            stdout: "out".to_string(),
            stderr: "  - Upgrading drupal/token (1.13.0 => 1.14.0)\n".to_string(),
        };
        assert_eq!(
            output.combined(),
            "out\n  - Upgrading drupal/token (1.13.0 => 1.14.0)\n"
        );
    }
}
