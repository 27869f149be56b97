//! Backend failure classification.
//!
//! Backends only report failure text, so the code is derived from the
//! message. Each controller holds its own [`Classifier`] so the heuristic
//! can be replaced with structured codes for backends that expose them.

use warden_common::{ErrorCode, PolicyError};

/// Maps backend failure text to an error code.
pub type Classifier = fn(&str) -> ErrorCode;

/// Case-insensitive substring heuristic over backend failure text.
pub fn classify_message(message: &str) -> ErrorCode {
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("access denied") || lowered.contains("access is denied") {
        ErrorCode::RegistryAccessDenied
    } else if lowered.contains("privilege") || lowered.contains("administrator") {
        ErrorCode::InsufficientPrivileges
    } else if lowered.contains("registry") || lowered.contains("item not found") {
        ErrorCode::RegistryError
    } else {
        ErrorCode::OperationFailed
    }
}

/// Wrap a backend failure into a recoverable [`PolicyError`].
pub fn backend_error(
    classify: Classifier,
    err: &anyhow::Error,
    message: impl Into<String>,
) -> PolicyError {
    let details = format!("{err:#}");
    PolicyError::new(classify(&details), message)
        .with_details(details)
        .recoverable(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_follows_substrings() {
        assert_eq!(
            classify_message("Set-ItemProperty: Access Denied"),
            ErrorCode::RegistryAccessDenied
        );
        assert_eq!(
            classify_message("Access is denied."),
            ErrorCode::RegistryAccessDenied
        );
        assert_eq!(
            classify_message("The operation requires Administrator rights"),
            ErrorCode::InsufficientPrivileges
        );
        assert_eq!(
            classify_message("A required privilege is not held by the client"),
            ErrorCode::InsufficientPrivileges
        );
        assert_eq!(
            classify_message("Requested registry access is not allowed."),
            ErrorCode::RegistryError
        );
        assert_eq!(
            classify_message("Cannot find path because it does not exist (ITEM NOT FOUND)"),
            ErrorCode::RegistryError
        );
        assert_eq!(
            classify_message("powershell.exe timed out after 60s"),
            ErrorCode::OperationFailed
        );
    }

    #[test]
    fn backend_errors_keep_the_full_chain_as_details() {
        let err = anyhow::anyhow!("Access denied").context("Google Chrome set_value failed");
        let policy_err = backend_error(classify_message, &err, "Failed to block websites");
        assert_eq!(policy_err.code, ErrorCode::RegistryAccessDenied);
        assert!(policy_err.recoverable);
        assert_eq!(
            policy_err.details,
            Some(serde_json::json!(
                "Google Chrome set_value failed: Access denied"
            ))
        );
    }

    #[test]
    fn custom_classifier_can_replace_the_heuristic() {
        fn always_registry(_: &str) -> ErrorCode {
            ErrorCode::RegistryError
        }
        let err = anyhow::anyhow!("anything");
        assert_eq!(
            backend_error(always_registry, &err, "x").code,
            ErrorCode::RegistryError
        );
    }
}
