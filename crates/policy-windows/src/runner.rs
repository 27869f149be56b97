use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const MAX_CAPTURE: usize = 8 * 1024;

/// Executes one PowerShell script and returns its stdout.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run(&self, script: &str) -> Result<String>;
}

pub struct PowerShellRunner {
    program: String,
    timeout: Duration,
}

impl PowerShellRunner {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ScriptRunner for PowerShellRunner {
    async fn run(&self, script: &str) -> Result<String> {
        debug!(
            target: "policy_windows::runner",
            program = %self.program,
            script,
            "running powershell script"
        );

        let mut command = Command::new(&self.program);
        command
            .arg("-NoLogo")
            .arg("-NoProfile")
            .arg("-NonInteractive")
            .arg("-ExecutionPolicy")
            .arg("Bypass")
            .arg("-Command")
            .arg(script)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(result) => {
                result.with_context(|| format!("failed to spawn {}", self.program))?
            }
            Err(_) => {
                return Err(anyhow!(
                    "{} timed out after {}s",
                    self.program,
                    self.timeout.as_secs()
                ));
            }
        };

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }

        let stdout = truncate(String::from_utf8_lossy(&output.stdout).into_owned());
        let stderr = truncate(String::from_utf8_lossy(&output.stderr).into_owned());
        Err(anyhow!(
            "{} exited with status {}: {}{}",
            self.program,
            output.status.code().unwrap_or(-1),
            stderr.trim(),
            if stdout.trim().is_empty() {
                String::new()
            } else {
                format!("\nstdout:\n{}", stdout.trim())
            }
        ))
    }
}

fn truncate(mut text: String) -> String {
    if text.len() > MAX_CAPTURE {
        let mut cut = MAX_CAPTURE;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("\n... (truncated)");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_caps_long_output() {
        let long = "x".repeat(MAX_CAPTURE + 10);
        let cut = truncate(long);
        assert!(cut.ends_with("... (truncated)"));
        assert!(cut.len() < MAX_CAPTURE + 32);
        assert_eq!(truncate("short".into()), "short");
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let runner = PowerShellRunner::new(
            "warden-definitely-not-a-real-shell",
            Duration::from_secs(5),
        );
        let err = runner.run("Write-Output 1").await.unwrap_err();
        assert!(format!("{err:#}").contains("failed to spawn"));
    }
}
