// Command source - Runs a shell command and captures its stdout
use crate::application::sample_source::SampleSource;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;

/// Commands that can hang (a wedged registry query) are cut off after this.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct CommandSource {
    command: String,
    timeout: Duration,
}

impl CommandSource {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl SampleSource for CommandSource {
    async fn fetch(&self) -> Result<String> {
        let mut command = Command::new("sh");
        command.arg("-c").arg(&self.command).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .with_context(|| format!("`{}` timed out after {:?}", self.command, self.timeout))?
            .with_context(|| format!("Failed to spawn `{}`", self.command))?;

        if !output.status.success() {
            bail!(
                "`{}` exited with {}: {}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn describe(&self) -> String {
        self.command.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_stdout() {
        let source = CommandSource::new("printf '\"Voltage\" = 12000'");
        assert_eq!(source.fetch().await.unwrap(), "\"Voltage\" = 12000");
        assert_eq!(source.describe(), "printf '\"Voltage\" = 12000'");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_an_error() {
        let source = CommandSource::new("echo nope >&2; exit 3");
        let err = source.fetch().await.unwrap_err().to_string();
        assert!(err.contains("nope"), "{err}");
    }

    #[tokio::test]
    async fn test_slow_command_times_out() {
        let source = CommandSource::new("sleep 5").with_timeout(Duration::from_millis(50));
        let err = source.fetch().await.unwrap_err().to_string();
        assert!(err.contains("timed out"), "{err}");
    }
}
