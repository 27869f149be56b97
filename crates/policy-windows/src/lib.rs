//! Windows registry policy backend.
//!
//! Policy state lives under `HKLM:` keys. Each backend primitive is one
//! PowerShell invocation built by [`script`] and executed by a
//! [`ScriptRunner`]; elevation is checked with `net session`.

mod backend;
mod privilege;
mod runner;
pub mod script;

pub use backend::RegistryBackend;
pub use privilege::NetSessionGate;
pub use runner::{PowerShellRunner, ScriptRunner};
