//! Display clearing
//!
//! After Stop and at shutdown the screen must not keep showing the last
//! frame. Clearing is best-effort: every configured command runs even if an
//! earlier one fails, and failures are only logged.

use crate::error::{Error, Result};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use vitrine_common::config::DisplayConfig;

/// Blanks the output device
pub trait DisplayClearer: Send + Sync {
    fn clear(&self) -> Result<()>;
}

/// Runs the configured shell commands in order
pub struct CommandDisplay {
    commands: Vec<Vec<String>>,
    timeout: Duration,
}

impl CommandDisplay {
    pub fn from_config(config: &DisplayConfig) -> Self {
        Self {
            commands: config.clear_commands.clone(),
            timeout: Duration::from_millis(config.command_timeout_ms),
        }
    }

    fn run(&self, command: &[String]) -> Result<()> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::Config("empty display command".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                if !status.success() {
                    debug!("Display command {:?} exited with {}", command, status);
                }
                return Ok(());
            }
            if Instant::now() >= deadline {
                // Reap after kill so no zombie is left behind
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Internal(format!(
                    "display command {:?} timed out after {:?}",
                    command, self.timeout
                )));
            }
            thread::sleep(Duration::from_millis(20));
        }
    }
}

impl DisplayClearer for CommandDisplay {
    fn clear(&self) -> Result<()> {
        let mut failures = 0;
        for command in &self.commands {
            if let Err(e) = self.run(command) {
                warn!("Display clear step failed: {}", e);
                failures += 1;
            }
        }
        if failures > 0 && failures == self.commands.len() {
            return Err(Error::Internal("every display clear command failed".to_string()));
        }
        Ok(())
    }
}

/// Clearer for headless runs
#[derive(Debug, Default)]
pub struct NoopDisplay;

impl DisplayClearer for NoopDisplay {
    fn clear(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn display(commands: &[&[&str]], timeout_ms: u64) -> CommandDisplay {
        CommandDisplay::from_config(&DisplayConfig {
            clear_commands: commands
                .iter()
                .map(|c| c.iter().map(|s| s.to_string()).collect())
                .collect(),
            command_timeout_ms: timeout_ms,
        })
    }

    #[test]
    fn test_failing_step_does_not_abort_the_rest() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let marker = temp_dir.path().join("cleared");
        let touch = format!("touch {}", marker.display());

        let display = display(
            &[&["/nonexistent/program"], &["sh", "-c", touch.as_str()]],
            2000,
        );
        display.clear().unwrap();
        assert!(marker.exists());
    }

    #[test]
    fn test_all_steps_failing_is_reported() {
        let display = display(&[&["/nonexistent/program"]], 2000);
        assert!(display.clear().is_err());
    }

    #[test]
    fn test_hung_command_is_killed() {
        let display = display(&[&["sleep", "30"]], 100);
        let started = Instant::now();
        assert!(display.clear().is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
