//! Test doubles shared across modules.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Result, UsbNetError};
use crate::system::command::{Host, HostCommand};

/// Records commands and file writes instead of touching the system.
///
/// Commands whose rendered line contains one of the `fail_when` patterns
/// fail with `CommandFailed`.
#[derive(Default)]
pub struct RecordingHost {
    commands: Mutex<Vec<HostCommand>>,
    files: Mutex<HashMap<PathBuf, String>>,
    failing: Vec<String>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_when(mut self, pattern: &str) -> Self {
        self.failing.push(pattern.to_string());
        self
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    pub fn file(&self, path: &Path) -> Option<String> {
        self.files.lock().unwrap().get(path).cloned()
    }
}

impl Host for RecordingHost {
    async fn run(&self, command: &HostCommand) -> Result<()> {
        let line = command.to_string();
        self.commands.lock().unwrap().push(command.clone());

        if self.failing.iter().any(|pattern| line.contains(pattern.as_str())) {
            return Err(UsbNetError::CommandFailed {
                command: line,
                message: "exit status 1".into(),
            });
        }
        Ok(())
    }

    async fn write_file(&self, path: &Path, contents: &str) -> Result<()> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    async fn replace_file(&self, path: &Path, contents: &str) -> Result<()> {
        self.write_file(path, contents).await
    }
}
