//! Recognition through an external shell pipeline
//!
//! The configured command captures the screen and runs OCR in one go; its
//! stdout is the recognized text.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::trace;

use super::Recognizer;

pub struct CommandRecognizer {
    command: String,
}

impl CommandRecognizer {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl Recognizer for CommandRecognizer {
    async fn recognize(&self) -> Result<String> {
        // A dropped future kills the pipeline instead of leaving it running
        let output = Command::new("sh")
            .args(["-c", &self.command])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to spawn recognizer command '{}'", self.command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("Recognizer exited with {}: {}", output.status, stderr.trim());
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        trace!(bytes = text.len(), "Recognizer output");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stdout_is_text() {
        let recognizer = CommandRecognizer::new("printf 'Screen shows\\nOK now'");
        assert_eq!(recognizer.recognize().await.unwrap(), "Screen shows\nOK now");
    }

    #[tokio::test]
    async fn test_failing_command_is_error() {
        let recognizer = CommandRecognizer::new("echo boom >&2; exit 3");
        let err = recognizer.recognize().await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    /// Gone from /proc, or a zombie waiting to be reaped
    fn process_ended(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Err(_) => true,
            Ok(stat) => stat
                .rsplit_once(')')
                .is_some_and(|(_, rest)| rest.trim_start().starts_with('Z')),
        }
    }

    #[tokio::test]
    async fn test_timed_out_command_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let recognizer = CommandRecognizer::new(format!("echo $$ > '{}'; exec sleep 30", pid_file.display()));

        let result = tokio::time::timeout(Duration::from_millis(300), recognizer.recognize()).await;
        assert!(result.is_err());

        let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
        assert!(!pid.is_empty());

        let mut ended = false;
        for _ in 0..100 {
            if process_ended(&pid) {
                ended = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(ended, "recognizer process {} outlived its timeout", pid);
    }
}
