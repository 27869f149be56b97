use policy_api::PrivilegeGate;
use tracing::warn;
use warden_common::{PolicyError, PolicyResult};

/// Gate a mutating operation on a fresh privilege check.
pub async fn verify_for_operation(gate: &dyn PrivilegeGate, operation: &str) -> PolicyResult<()> {
    if gate.check_privileges().await {
        return Ok(());
    }
    warn!(operation, "refusing operation without administrator privileges");
    Err(PolicyError::insufficient_privileges(operation))
}
