use serde::{Deserialize, Serialize};
use warden_common::{ErrorCode, PolicyError, PolicyResult};

/// Outcome of one fan-out step against a single target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetOutcome {
    pub target: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PolicyError>,
}

impl TargetOutcome {
    pub fn ok(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(target: impl Into<String>, error: PolicyError) -> Self {
        Self {
            target: target.into(),
            success: false,
            error: Some(error),
        }
    }
}

/// Per-target results of one logical action fanned out across targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateOutcome {
    pub operation: String,
    pub results: Vec<TargetOutcome>,
    pub success: bool,
    pub success_count: usize,
    pub total: usize,
}

impl AggregateOutcome {
    pub fn new(operation: impl Into<String>, results: Vec<TargetOutcome>) -> Self {
        let success_count = results.iter().filter(|r| r.success).count();
        let total = results.len();
        Self {
            operation: operation.into(),
            success: success_count == total,
            success_count,
            total,
            results,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &TargetOutcome> {
        self.results.iter().filter(|r| !r.success)
    }

    /// `Ok(self)` when every target succeeded; otherwise an error whose
    /// details carry the full per-target breakdown.
    ///
    /// The error code is the failing targets' shared code, or
    /// `OPERATION_FAILED` when they disagree.
    pub fn into_result(self) -> PolicyResult<Self> {
        if self.success {
            return Ok(self);
        }

        let mut codes = self
            .failures()
            .filter_map(|outcome| outcome.error.as_ref().map(|e| e.code));
        let first = codes.next().unwrap_or(ErrorCode::OperationFailed);
        let code = if codes.all(|c| c == first) {
            first
        } else {
            ErrorCode::OperationFailed
        };
        let failed: Vec<&str> = self.failures().map(|o| o.target.as_str()).collect();
        let message = format!(
            "{} failed on {} of {} targets ({})",
            self.operation,
            self.total - self.success_count,
            self.total,
            failed.join(", ")
        );
        let details = serde_json::to_value(&self).unwrap_or_default();
        Err(PolicyError::new(code, message)
            .with_details(details)
            .recoverable(true))
    }

    /// Recover the breakdown from an error produced by [`Self::into_result`].
    pub fn from_error(error: &PolicyError) -> Option<Self> {
        error
            .details
            .as_ref()
            .and_then(|details| serde_json::from_value(details.clone()).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(code: ErrorCode) -> PolicyError {
        PolicyError::new(code, "boom")
    }

    #[test]
    fn all_successful_targets_pass_through() {
        let outcome = AggregateOutcome::new(
            "block-all-websites",
            vec![TargetOutcome::ok("chrome"), TargetOutcome::ok("edge")],
        );
        assert!(outcome.success);
        assert_eq!(outcome.success_count, 2);
        assert!(outcome.into_result().is_ok());
    }

    #[test]
    fn shared_failure_code_is_kept() {
        let outcome = AggregateOutcome::new(
            "block-all-websites",
            vec![
                TargetOutcome::ok("chrome"),
                TargetOutcome::failed("edge", err(ErrorCode::RegistryAccessDenied)),
            ],
        );
        let error = outcome.into_result().unwrap_err();
        assert_eq!(error.code, ErrorCode::RegistryAccessDenied);
        assert!(error.recoverable);
        assert!(error.message.contains("1 of 2 targets (edge)"));

        let breakdown = AggregateOutcome::from_error(&error).unwrap();
        assert_eq!(breakdown.total, 2);
        assert!(!breakdown.results[1].success);
    }

    #[test]
    fn mixed_failure_codes_collapse_to_operation_failed() {
        let outcome = AggregateOutcome::new(
            "disable-whitelist",
            vec![
                TargetOutcome::failed("chrome", err(ErrorCode::RegistryError)),
                TargetOutcome::failed("edge", err(ErrorCode::RegistryAccessDenied)),
            ],
        );
        let error = outcome.into_result().unwrap_err();
        assert_eq!(error.code, ErrorCode::OperationFailed);
    }
}
