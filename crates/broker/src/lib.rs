//! Policy orchestration for removable drives and browser URL filtering.
//!
//! Controllers fan primitive writes out to [`policy_api::PolicyBackend`]s;
//! the [`PolicyOrchestrator`] validates requests, gates them on privileges
//! and keeps the [`StateStore`] in line with what was applied.

mod aggregate;
mod browser;
mod classify;
mod drive;
mod handle;
mod orchestrator;
mod privilege;
mod service;
mod store;

pub use aggregate::{AggregateOutcome, TargetOutcome};
pub use browser::{
    BrowserPolicyController, BrowserStatus, DomainChange, DomainChangeStatus, DomainList,
    WhitelistUpdate,
};
pub use classify::{backend_error, classify_message, Classifier};
pub use drive::{DriveAccess, DrivePolicyController, DriveStatus};
pub use handle::ServiceHandle;
pub use orchestrator::{
    BrowserSettings, DomainAction, DomainSettings, DriveSettings, PolicyKind, PolicyOrchestrator,
    PolicyOutcome, PolicyRequest, PolicyStatus, ResetReport, ResetStep, ResetStepKind,
    WhitelistSettings,
};
pub use privilege::verify_for_operation;
pub use service::{
    BlockedDomains, Operation, PolicyService, PrivilegeReport, Request, Response,
};
pub use store::{JsonFileStore, MemoryStore, StateStore};
