//! Browser URL filtering across every configured browser target.
//!
//! Each logical action (block all, whitelist, ...) is fanned out to all
//! targets in order. A failure on one target never stops the others; the
//! per-target results come back as an [`AggregateOutcome`].

use crate::aggregate::{AggregateOutcome, TargetOutcome};
use crate::classify::{backend_error, classify_message, Classifier};
use crate::privilege::verify_for_operation;
use anyhow::{bail, Result};
use policy_api::{PolicyBackend, PolicyValue, PrivilegeGate, TargetKind};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};
use warden_common::{
    normalize_domain, parse_all, DomainEntry, ErrorCode, PolicyError, PolicyResult, Whitelist,
};

#[cfg(test)]
mod tests;

/// One browser backend plus its resolved rule containers.
struct BrowserSlot {
    backend: Arc<dyn PolicyBackend>,
    blocklist_key: String,
    allowlist_key: String,
    block_all_token: String,
}

impl BrowserSlot {
    fn new(backend: Arc<dyn PolicyBackend>) -> Result<Self> {
        let target = backend.target();
        let TargetKind::Browser {
            blocklist_key,
            allowlist_key,
            block_all_token,
        } = &target.kind
        else {
            bail!("target '{}' is not a browser policy target", target.id);
        };
        Ok(Self {
            blocklist_key: blocklist_key.clone(),
            allowlist_key: allowlist_key.clone(),
            block_all_token: block_all_token.clone(),
            backend,
        })
    }

    fn id(&self) -> &str {
        &self.backend.target().id
    }

    async fn block_all(&self) -> Result<()> {
        self.backend.ensure_key(&self.blocklist_key).await?;
        self.backend
            .set_value(
                &self.blocklist_key,
                "1",
                PolicyValue::String(self.block_all_token.clone()),
            )
            .await
    }

    async fn clear_blocklist(&self) -> Result<()> {
        self.backend.delete_key(&self.blocklist_key).await
    }

    /// Block everything, then rewrite the allowlist from scratch so stale
    /// higher-indexed entries from a longer previous list do not survive.
    async fn apply_whitelist(&self, domains: &Whitelist) -> Result<()> {
        self.block_all().await?;
        self.backend.delete_key(&self.allowlist_key).await?;
        self.backend.ensure_key(&self.allowlist_key).await?;
        for (index, domain) in domains.iter().enumerate() {
            self.backend
                .set_value(
                    &self.allowlist_key,
                    &(index + 1).to_string(),
                    PolicyValue::String(domain.as_str().to_string()),
                )
                .await?;
        }
        Ok(())
    }

    async fn clear_whitelist(&self) -> Result<()> {
        self.backend.delete_key(&self.blocklist_key).await?;
        self.backend.delete_key(&self.allowlist_key).await
    }

    /// Allowlist entries ordered by their numeric value name.
    async fn read_allowlist(&self) -> Result<Vec<String>> {
        let mut indexed: Vec<(u32, String)> = self
            .backend
            .list_values(&self.allowlist_key)
            .await?
            .into_iter()
            .filter_map(|(name, value)| {
                let index = name.parse::<u32>().ok()?;
                let domain = value.as_str()?.to_string();
                Some((index, domain))
            })
            .collect();
        indexed.sort_by_key(|(index, _)| *index);
        Ok(indexed.into_iter().map(|(_, domain)| domain).collect())
    }

    async fn status(&self) -> BrowserStatus {
        let block_all = match self.backend.list_values(&self.blocklist_key).await {
            Ok(values) => values
                .iter()
                .any(|(_, value)| value.as_str() == Some(self.block_all_token.as_str())),
            Err(err) => {
                debug!(target_id = self.id(), error = %format!("{err:#}"), "blocklist unreadable");
                false
            }
        };
        let allowlist = self.read_allowlist().await.unwrap_or_default();
        let target = self.backend.target();
        BrowserStatus {
            target: target.id.clone(),
            display_name: target.display_name.clone(),
            block_all,
            whitelist_active: block_all && !allowlist.is_empty(),
            allowlist_count: allowlist.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserStatus {
    pub target: String,
    pub display_name: String,
    pub block_all: bool,
    pub whitelist_active: bool,
    pub allowlist_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainList {
    pub domains: Vec<String>,
    pub count: usize,
}

impl From<Vec<String>> for DomainList {
    fn from(domains: Vec<String>) -> Self {
        Self {
            count: domains.len(),
            domains,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainChangeStatus {
    Added,
    AlreadyExists,
    Removed,
    NotFound,
}

/// Result of adding or removing a single whitelisted domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainChange {
    pub status: DomainChangeStatus,
    pub domain: String,
    /// The whitelist after the change.
    pub domains: Vec<String>,
}

impl DomainChange {
    /// Whether the backend was rewritten.
    pub fn changed(&self) -> bool {
        matches!(
            self.status,
            DomainChangeStatus::Added | DomainChangeStatus::Removed
        )
    }
}

/// Result of a successful whitelist rewrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhitelistUpdate {
    pub domains: Vec<String>,
    pub count: usize,
    pub outcome: AggregateOutcome,
}

pub struct BrowserPolicyController {
    gate: Arc<dyn PrivilegeGate>,
    slots: Vec<BrowserSlot>,
    domain_source: usize,
    classify: Classifier,
}

impl BrowserPolicyController {
    /// `domain_source` indexes the target whose allowlist is the canonical
    /// whitelist for reads.
    pub fn new(
        gate: Arc<dyn PrivilegeGate>,
        backends: Vec<Arc<dyn PolicyBackend>>,
        domain_source: usize,
    ) -> Result<Self> {
        if backends.is_empty() {
            bail!("at least one browser target is required");
        }
        if domain_source >= backends.len() {
            bail!(
                "domain source index {} is out of range for {} browser targets",
                domain_source,
                backends.len()
            );
        }
        let slots = backends
            .into_iter()
            .map(BrowserSlot::new)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            gate,
            slots,
            domain_source,
            classify: classify_message,
        })
    }

    pub fn with_classifier(mut self, classify: Classifier) -> Self {
        self.classify = classify;
        self
    }

    pub fn target_ids(&self) -> Vec<String> {
        self.slots.iter().map(|slot| slot.id().to_string()).collect()
    }

    fn source(&self) -> &BrowserSlot {
        &self.slots[self.domain_source]
    }

    /// Run `step` against every target in order, collecting each result.
    async fn fan_out<'s, F, Fut>(
        &'s self,
        operation: &str,
        message: &str,
        step: F,
    ) -> AggregateOutcome
    where
        F: Fn(&'s BrowserSlot) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut results = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            match step(slot).await {
                Ok(()) => results.push(TargetOutcome::ok(slot.id())),
                Err(err) => {
                    warn!(
                        operation,
                        target_id = slot.id(),
                        error = %format!("{err:#}"),
                        "target step failed"
                    );
                    results.push(TargetOutcome::failed(
                        slot.id(),
                        backend_error(self.classify, &err, format!("{message} for {}", slot.id())),
                    ));
                }
            }
        }
        let outcome = AggregateOutcome::new(operation, results);
        info!(
            operation,
            success_count = outcome.success_count,
            total = outcome.total,
            "browser policy fan-out finished"
        );
        outcome
    }

    pub async fn block_all_websites(&self) -> PolicyResult<AggregateOutcome> {
        const OP: &str = "block-all-websites";
        verify_for_operation(self.gate.as_ref(), OP).await?;
        self.fan_out(OP, "Failed to block websites", |slot| slot.block_all())
            .await
            .into_result()
    }

    pub async fn unblock_all_websites(&self) -> PolicyResult<AggregateOutcome> {
        const OP: &str = "unblock-all-websites";
        verify_for_operation(self.gate.as_ref(), OP).await?;
        self.fan_out(OP, "Failed to unblock websites", |slot| slot.clear_blocklist())
            .await
            .into_result()
    }

    /// Replace the whitelist on every target with `domains`.
    ///
    /// Every entry is validated before any backend is touched.
    pub async fn enable_whitelist<S: AsRef<str>>(
        &self,
        domains: &[S],
    ) -> PolicyResult<WhitelistUpdate> {
        const OP: &str = "enable-whitelist";
        let whitelist = validate_whitelist(domains)?;
        verify_for_operation(self.gate.as_ref(), OP).await?;
        self.write_whitelist(&whitelist).await
    }

    async fn write_whitelist(&self, whitelist: &Whitelist) -> PolicyResult<WhitelistUpdate> {
        let outcome = self
            .fan_out("enable-whitelist", "Failed to apply whitelist", |slot| {
                slot.apply_whitelist(whitelist)
            })
            .await
            .into_result()?;
        Ok(WhitelistUpdate {
            domains: whitelist.to_strings(),
            count: whitelist.len(),
            outcome,
        })
    }

    pub async fn disable_whitelist(&self) -> PolicyResult<AggregateOutcome> {
        const OP: &str = "disable-whitelist";
        verify_for_operation(self.gate.as_ref(), OP).await?;
        self.fan_out(OP, "Failed to disable whitelist", |slot| slot.clear_whitelist())
            .await
            .into_result()
    }

    /// Add one domain, rewriting every target's whitelist when it is new.
    pub async fn add_domain(&self, domain: &str) -> PolicyResult<DomainChange> {
        let entry =
            DomainEntry::parse(domain).map_err(|_| invalid_domains(vec![domain.to_string()]))?;
        verify_for_operation(self.gate.as_ref(), "add-domain").await?;

        let current = self.read_domains().await;
        if current.iter().any(|d| d == entry.as_str()) {
            debug!(domain = entry.as_str(), "domain already whitelisted");
            return Ok(DomainChange {
                status: DomainChangeStatus::AlreadyExists,
                domain: entry.to_string(),
                domains: current,
            });
        }

        let mut whitelist = parse_whitelist(current.as_slice())?;
        whitelist.insert(entry.clone());
        let update = self.write_whitelist(&whitelist).await?;
        Ok(DomainChange {
            status: DomainChangeStatus::Added,
            domain: entry.to_string(),
            domains: update.domains,
        })
    }

    /// Remove one domain; removing the last one disables the whitelist.
    pub async fn remove_domain(&self, domain: &str) -> PolicyResult<DomainChange> {
        verify_for_operation(self.gate.as_ref(), "remove-domain").await?;

        let normalized = normalize_domain(domain);
        let current = self.read_domains().await;
        if !current.iter().any(|d| *d == normalized) {
            return Ok(DomainChange {
                status: DomainChangeStatus::NotFound,
                domain: normalized,
                domains: current,
            });
        }

        let remaining: Vec<String> = current.into_iter().filter(|d| *d != normalized).collect();
        let domains = if remaining.is_empty() {
            self.fan_out("disable-whitelist", "Failed to disable whitelist", |slot| {
                slot.clear_whitelist()
            })
            .await
            .into_result()?;
            Vec::new()
        } else {
            let whitelist = validate_whitelist(remaining.as_slice())?;
            self.write_whitelist(&whitelist).await?.domains
        };
        Ok(DomainChange {
            status: DomainChangeStatus::Removed,
            domain: normalized,
            domains,
        })
    }

    /// The canonical whitelist, read from the domain source target.
    pub async fn domain_list(&self) -> DomainList {
        self.read_domains().await.into()
    }

    async fn read_domains(&self) -> Vec<String> {
        match self.source().read_allowlist().await {
            Ok(domains) => domains,
            Err(err) => {
                warn!(
                    target_id = self.source().id(),
                    error = %format!("{err:#}"),
                    "allowlist unreadable, reporting no domains"
                );
                Vec::new()
            }
        }
    }

    pub async fn browser_status(&self) -> Vec<BrowserStatus> {
        let mut statuses = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            statuses.push(slot.status().await);
        }
        statuses
    }
}

fn invalid_domains(invalid: Vec<String>) -> PolicyError {
    PolicyError::new(
        ErrorCode::InvalidDomainFormat,
        format!("Invalid domain format: {}", invalid.join(", ")),
    )
    .with_details(json!({ "invalidDomains": invalid }))
}

fn validate_whitelist<S: AsRef<str>>(domains: &[S]) -> PolicyResult<Whitelist> {
    if domains.is_empty() {
        return Err(PolicyError::invalid_settings(
            "At least one domain is required to enable the whitelist",
        ));
    }
    parse_whitelist(domains)
}

fn parse_whitelist<S: AsRef<str>>(domains: &[S]) -> PolicyResult<Whitelist> {
    let entries = parse_all(domains).map_err(invalid_domains)?;
    Ok(entries.into_iter().collect())
}
