//! Shared handle that serializes access to the policy service.

use crate::orchestrator::PolicyOrchestrator;
use crate::service::{PolicyService, Request, Response};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info_span, Instrument};
use uuid::Uuid;
use warden_common::{Envelope, PolicyResult};

/// Cloneable entry point. Requests run one at a time, so two mutations
/// never interleave their backend writes or store updates.
#[derive(Clone)]
pub struct ServiceHandle {
    service: Arc<Mutex<PolicyService>>,
}

impl ServiceHandle {
    pub fn new(orchestrator: PolicyOrchestrator) -> Self {
        Self {
            service: Arc::new(Mutex::new(PolicyService::new(orchestrator))),
        }
    }

    pub async fn call(&self, request: Request) -> PolicyResult<Response> {
        let request_id = Uuid::now_v7();
        let span = info_span!("request", op = request.operation().as_str(), %request_id);
        async {
            let service = self.service.lock().await;
            let result = service.handle(request).await;
            match &result {
                Ok(_) => tracing::info!("request succeeded"),
                Err(err) => tracing::warn!(
                    code = %err.code,
                    recoverable = err.recoverable,
                    "request failed: {}",
                    err.message
                ),
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Run `request` and wrap the result for the wire.
    pub async fn dispatch(&self, request: Request) -> Envelope {
        Envelope::from_result(self.call(request).await)
    }
}
