use super::*;
use policy_api::{targets, BackendOp, MemoryBackend, StaticPrivilegeGate};

struct Fixture {
    chrome: Arc<MemoryBackend>,
    edge: Arc<MemoryBackend>,
    firefox: Arc<MemoryBackend>,
    controller: BrowserPolicyController,
}

impl Fixture {
    fn new(elevated: bool) -> Self {
        let chrome = Arc::new(MemoryBackend::new(targets::chrome()));
        let edge = Arc::new(MemoryBackend::new(targets::edge()));
        let firefox = Arc::new(MemoryBackend::new(targets::firefox()));
        let backends: Vec<Arc<dyn PolicyBackend>> =
            vec![chrome.clone(), edge.clone(), firefox.clone()];
        let controller =
            BrowserPolicyController::new(Arc::new(StaticPrivilegeGate(elevated)), backends, 0)
                .unwrap();
        Self {
            chrome,
            edge,
            firefox,
            controller,
        }
    }

    fn all(&self) -> [&Arc<MemoryBackend>; 3] {
        [&self.chrome, &self.edge, &self.firefox]
    }

    fn total_calls(&self) -> usize {
        self.all().iter().map(|b| b.call_count()).sum()
    }

    fn total_mutations(&self) -> usize {
        self.all().iter().map(|b| b.mutation_count()).sum()
    }

    fn clear_calls(&self) {
        for backend in self.all() {
            backend.clear_calls();
        }
    }
}

fn allowlist_of(backend: &MemoryBackend, key: &str) -> Vec<(String, String)> {
    let hive = backend.hive().snapshot().unwrap();
    hive.values(&backend.target().key_path(key))
        .map(|values| {
            values
                .iter()
                .map(|(name, value)| (name.clone(), value.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

#[test]
fn constructor_rejects_bad_wiring() {
    let gate: Arc<dyn PrivilegeGate> = Arc::new(StaticPrivilegeGate(true));
    assert!(BrowserPolicyController::new(gate.clone(), Vec::new(), 0).is_err());

    let chrome: Arc<dyn PolicyBackend> = Arc::new(MemoryBackend::new(targets::chrome()));
    assert!(BrowserPolicyController::new(gate.clone(), vec![chrome.clone()], 1).is_err());

    let drive: Arc<dyn PolicyBackend> =
        Arc::new(MemoryBackend::new(targets::removable_storage()));
    assert!(BrowserPolicyController::new(gate, vec![chrome, drive], 0).is_err());
}

#[tokio::test]
async fn block_all_writes_each_browsers_token() {
    let fx = Fixture::new(true);
    let outcome = fx.controller.block_all_websites().await.unwrap();
    assert_eq!(outcome.success_count, 3);

    assert_eq!(
        allowlist_of(&fx.chrome, "URLBlocklist"),
        vec![("1".to_string(), "*".to_string())]
    );
    assert_eq!(
        allowlist_of(&fx.firefox, r"WebsiteFilter\Block"),
        vec![("1".to_string(), "<all_urls>".to_string())]
    );

    fx.controller.unblock_all_websites().await.unwrap();
    for backend in fx.all() {
        assert!(!backend.has_key("URLBlocklist"));
    }
    assert!(!fx.firefox.has_key(r"WebsiteFilter\Block"));
}

#[tokio::test]
async fn one_failing_target_does_not_stop_the_others() {
    let fx = Fixture::new(true);
    fx.edge.fail_on(BackendOp::SetValue, "Access is denied");

    let err = fx.controller.block_all_websites().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::RegistryAccessDenied);

    let breakdown = AggregateOutcome::from_error(&err).unwrap();
    assert_eq!(breakdown.total, 3);
    assert_eq!(breakdown.success_count, 2);
    let failed: Vec<_> = breakdown.failures().map(|o| o.target.as_str()).collect();
    assert_eq!(failed, vec!["edge"]);

    assert!(fx.chrome.has_key("URLBlocklist"));
    assert!(fx.firefox.has_key(r"WebsiteFilter\Block"));
    assert!(fx.firefox.mutation_count() > 0);
}

#[tokio::test]
async fn invalid_domain_fails_before_any_backend_call() {
    let fx = Fixture::new(true);
    let err = fx
        .controller
        .enable_whitelist(&["example.com", "bad domain!", "also..bad"])
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidDomainFormat);
    assert!(!err.recoverable);
    assert_eq!(
        err.details,
        Some(json!({ "invalidDomains": ["bad domain!", "also..bad"] }))
    );
    assert_eq!(fx.total_calls(), 0);
}

#[tokio::test]
async fn empty_whitelist_is_rejected() {
    let fx = Fixture::new(true);
    let err = fx
        .controller
        .enable_whitelist::<&str>(&[])
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidSettings);
    assert_eq!(fx.total_calls(), 0);
}

#[tokio::test]
async fn whitelist_always_blocks_everything_else() {
    let fx = Fixture::new(true);
    let update = fx
        .controller
        .enable_whitelist(&["Example.com", "https://docs.rs/tokio", "example.com"])
        .await
        .unwrap();
    assert_eq!(update.domains, vec!["example.com", "docs.rs"]);
    assert_eq!(update.count, 2);

    for backend in [&fx.chrome, &fx.edge] {
        assert_eq!(
            allowlist_of(backend, "URLBlocklist"),
            vec![("1".to_string(), "*".to_string())]
        );
        assert_eq!(
            allowlist_of(backend, "URLAllowlist"),
            vec![
                ("1".to_string(), "example.com".to_string()),
                ("2".to_string(), "docs.rs".to_string()),
            ]
        );
    }
    assert_eq!(
        allowlist_of(&fx.firefox, r"WebsiteFilter\Exceptions").len(),
        2
    );
}

#[tokio::test]
async fn shorter_whitelist_leaves_no_stale_entries() {
    let fx = Fixture::new(true);
    fx.controller
        .enable_whitelist(&["a.com", "b.com", "c.com"])
        .await
        .unwrap();
    fx.controller.enable_whitelist(&["d.com"]).await.unwrap();

    assert_eq!(
        allowlist_of(&fx.chrome, "URLAllowlist"),
        vec![("1".to_string(), "d.com".to_string())]
    );
    assert_eq!(fx.controller.domain_list().await.domains, vec!["d.com"]);
}

#[tokio::test]
async fn adding_a_present_domain_is_idempotent() {
    let fx = Fixture::new(true);
    let first = fx.controller.add_domain("example.com").await.unwrap();
    assert_eq!(first.status, DomainChangeStatus::Added);
    assert!(first.changed());

    fx.clear_calls();
    let second = fx.controller.add_domain("EXAMPLE.com").await.unwrap();
    assert_eq!(second.status, DomainChangeStatus::AlreadyExists);
    assert!(!second.changed());
    assert_eq!(second.domains, vec!["example.com"]);
    assert_eq!(fx.total_mutations(), 0);
}

#[tokio::test]
async fn add_domain_validates_before_checking_privileges() {
    let fx = Fixture::new(false);
    let err = fx.controller.add_domain("not a domain").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidDomainFormat);

    let err = fx.controller.add_domain("example.com").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InsufficientPrivileges);
    assert_eq!(fx.total_calls(), 0);
}

#[tokio::test]
async fn add_domain_appends_to_the_existing_list() {
    let fx = Fixture::new(true);
    fx.controller.enable_whitelist(&["a.com"]).await.unwrap();
    let change = fx.controller.add_domain("b.com").await.unwrap();
    assert_eq!(change.domains, vec!["a.com", "b.com"]);
    assert_eq!(
        allowlist_of(&fx.edge, "URLAllowlist"),
        vec![
            ("1".to_string(), "a.com".to_string()),
            ("2".to_string(), "b.com".to_string()),
        ]
    );
}

#[tokio::test]
async fn removing_the_last_domain_disables_the_whitelist() {
    let fx = Fixture::new(true);
    fx.controller.add_domain("example.com").await.unwrap();

    let change = fx.controller.remove_domain("example.com").await.unwrap();
    assert_eq!(change.status, DomainChangeStatus::Removed);
    assert!(change.domains.is_empty());
    for backend in [&fx.chrome, &fx.edge] {
        assert!(!backend.has_key("URLBlocklist"));
        assert!(!backend.has_key("URLAllowlist"));
    }
    assert!(!fx.firefox.has_key(r"WebsiteFilter\Block"));
}

#[tokio::test]
async fn removing_one_of_several_rewrites_the_rest() {
    let fx = Fixture::new(true);
    fx.controller
        .enable_whitelist(&["a.com", "b.com", "c.com"])
        .await
        .unwrap();
    let change = fx.controller.remove_domain("b.com").await.unwrap();
    assert_eq!(change.domains, vec!["a.com", "c.com"]);
    assert_eq!(
        allowlist_of(&fx.chrome, "URLAllowlist"),
        vec![
            ("1".to_string(), "a.com".to_string()),
            ("2".to_string(), "c.com".to_string()),
        ]
    );
}

#[tokio::test]
async fn removing_an_absent_domain_writes_nothing() {
    let fx = Fixture::new(true);
    fx.controller.enable_whitelist(&["a.com"]).await.unwrap();
    fx.clear_calls();
    let change = fx.controller.remove_domain("zzz.com").await.unwrap();
    assert_eq!(change.status, DomainChangeStatus::NotFound);
    assert_eq!(fx.total_mutations(), 0);
}

#[tokio::test]
async fn domain_list_sorts_by_numeric_index() {
    let fx = Fixture::new(true);
    let names: Vec<String> = (1..=11).map(|i| format!("site{i}.com")).collect();
    fx.controller.enable_whitelist(names.as_slice()).await.unwrap();
    let list = fx.controller.domain_list().await;
    assert_eq!(list.count, 11);
    assert_eq!(list.domains, names);
}

#[tokio::test]
async fn domain_list_degrades_to_empty_on_read_failure() {
    let fx = Fixture::new(true);
    fx.controller.enable_whitelist(&["a.com"]).await.unwrap();
    fx.chrome.fail_on(BackendOp::ListValues, "registry unavailable");
    assert_eq!(fx.controller.domain_list().await, DomainList::from(Vec::new()));
}

#[tokio::test]
async fn unprivileged_mutations_touch_nothing() {
    let fx = Fixture::new(false);
    for result in [
        fx.controller.block_all_websites().await,
        fx.controller.unblock_all_websites().await,
        fx.controller.disable_whitelist().await,
    ] {
        assert_eq!(result.unwrap_err().code, ErrorCode::InsufficientPrivileges);
    }
    assert_eq!(
        fx.controller
            .enable_whitelist(&["a.com"])
            .await
            .unwrap_err()
            .code,
        ErrorCode::InsufficientPrivileges
    );
    assert_eq!(
        fx.controller.remove_domain("a.com").await.unwrap_err().code,
        ErrorCode::InsufficientPrivileges
    );
    assert_eq!(fx.total_calls(), 0);
}

#[tokio::test]
async fn browser_status_reports_each_target() {
    let fx = Fixture::new(true);
    fx.controller.block_all_websites().await.unwrap();
    fx.controller.enable_whitelist(&["a.com"]).await.unwrap();
    fx.controller.unblock_all_websites().await.unwrap();
    fx.controller.block_all_websites().await.unwrap();

    let statuses = fx.controller.browser_status().await;
    assert_eq!(statuses.len(), 3);
    assert!(statuses.iter().all(|s| s.block_all));
    assert!(statuses.iter().all(|s| s.whitelist_active));
    assert_eq!(statuses[2].target, "firefox");
    assert_eq!(fx.controller.target_ids(), vec!["chrome", "edge", "firefox"]);
}
