use async_trait::async_trait;
use policy_api::PrivilegeGate;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Elevation check via `net session`, which only succeeds for administrators.
///
/// Re-runs the check on every call.
pub struct NetSessionGate {
    program: String,
    timeout: Duration,
}

impl NetSessionGate {
    pub fn new(timeout: Duration) -> Self {
        Self::with_program("net", timeout)
    }

    pub fn with_program(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

#[async_trait]
impl PrivilegeGate for NetSessionGate {
    async fn check_privileges(&self) -> bool {
        let mut command = Command::new(&self.program);
        command
            .arg("session")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout, command.status()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(err)) => {
                debug!(
                    target: "policy_windows::privilege",
                    error = %err,
                    "privilege check could not run"
                );
                false
            }
            Err(_) => {
                debug!(
                    target: "policy_windows::privilege",
                    "privilege check timed out"
                );
                false
            }
        }
    }
}
