//! Host command execution and file writes.
//!
//! Commands are built as an argument vector and spawned directly, so values
//! taken from configuration (interface names, addresses) are never seen by a
//! shell.

use std::fmt;
use std::future::Future;
use std::path::Path;

use tokio::process::Command;

use crate::error::{Result, UsbNetError};

/// A program plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    program: String,
    args: Vec<String>,
}

impl HostCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
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

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Everything this crate needs from the operating system.
pub trait Host: Send + Sync {
    /// Run a command to completion. A non-zero exit is an error.
    fn run(&self, command: &HostCommand) -> impl Future<Output = Result<()>> + Send;

    /// Replace the contents of `path` (kernel control files included).
    fn write_file(&self, path: &Path, contents: &str) -> impl Future<Output = Result<()>> + Send;

    /// Replace `path` through a sibling `.tmp` file and a rename, so readers
    /// see either the old contents or the new ones.
    fn replace_file(&self, path: &Path, contents: &str) -> impl Future<Output = Result<()>> + Send;
}

/// The real host: spawns processes and writes files.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHost;

impl Host for SystemHost {
    async fn run(&self, command: &HostCommand) -> Result<()> {
        let output = Command::new(command.program())
            .args(command.get_args())
            .output()
            .await
            .map_err(|e| UsbNetError::CommandFailed {
                command: command.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("Operation not permitted") || stderr.contains("Permission denied") {
                return Err(UsbNetError::PermissionDenied);
            }
            let message = match output.status.code() {
                Some(code) if stderr.trim().is_empty() => format!("exit status {}", code),
                Some(_) => stderr.trim().to_string(),
                None => "terminated by signal".to_string(),
            };
            return Err(UsbNetError::CommandFailed {
                command: command.to_string(),
                message,
            });
        }

        Ok(())
    }

    async fn write_file(&self, path: &Path, contents: &str) -> Result<()> {
        tokio::fs::write(path, contents)
            .await
            .map_err(|source| UsbNetError::FileWrite {
                path: path.to_path_buf(),
                source,
            })
    }

    async fn replace_file(&self, path: &Path, contents: &str) -> Result<()> {
        let tmp = path.with_extension("tmp");
        self.write_file(&tmp, contents).await?;
        if let Err(source) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(UsbNetError::FileWrite {
                path: path.to_path_buf(),
                source,
            });
        }
        Ok(())
    }
}

/// Outcome of one best-effort step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Ok,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub action: String,
    pub status: StepStatus,
}

/// Per-step results of an operation whose steps don't abort each other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    steps: Vec<Step>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a step result and hand back whether it succeeded.
    pub fn record<T>(&mut self, action: impl Into<String>, result: &Result<T>) -> bool {
        let status = match result {
            Ok(_) => StepStatus::Ok,
            Err(e) => StepStatus::Failed(e.to_string()),
        };
        let ok = status == StepStatus::Ok;
        self.steps.push(Step {
            action: action.into(),
            status,
        });
        ok
    }

    pub fn extend(&mut self, other: Report) {
        self.steps.extend(other.steps);
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn failures(&self) -> impl Iterator<Item = &Step> {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Failed(_)))
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}
