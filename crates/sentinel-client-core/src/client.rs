//! `safe get`: obtain an identity, then fetch the secrets listing with it.

use std::sync::Arc;

use sentinel_proto::policy::IdentityPolicy;
use tracing::info;
use url::Url;

use crate::config::{SentinelConfig, DEFAULT_MAX_RESPONSE_BYTES};
use crate::context::OperationContext;
use crate::coordinator;
use crate::error::SentinelError;
use crate::fetch::{self, RequestMode, SecretsTarget};
use crate::workload::{IdentitySource, WorkloadApiSource};

/// Client for the Safe's Sentinel API.
pub struct SafeClient {
    source: Arc<dyn IdentitySource>,
    policy: IdentityPolicy,
    safe_endpoint: Url,
    max_response_bytes: usize,
}

impl SafeClient {
    pub fn new(source: Arc<dyn IdentitySource>, policy: IdentityPolicy, safe_endpoint: Url) -> Self {
        Self {
            source,
            policy,
            safe_endpoint,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }

    /// Client backed by the Workload API, as configured.
    pub fn from_config(config: &SentinelConfig) -> Self {
        let source = Arc::new(WorkloadApiSource::new(config.workload_api.clone()));
        Self::new(source, config.policy.clone(), config.safe_endpoint.clone())
            .with_max_response_bytes(config.max_response_bytes)
    }

    pub fn with_max_response_bytes(mut self, limit: usize) -> Self {
        self.max_response_bytes = limit;
        self
    }

    /// Fetch the secrets listing in `mode`, returning the raw body.
    pub async fn get_secrets(
        &self,
        ctx: &OperationContext,
        mode: RequestMode,
    ) -> Result<Vec<u8>, SentinelError> {
        let correlation_id = ctx.correlation_id();
        let target = SecretsTarget::new(&self.safe_endpoint, mode)
            .map_err(|e| SentinelError::transport(correlation_id, e))?
            .with_max_response_bytes(self.max_response_bytes);

        info!(%correlation_id, ?mode, url = %target.url(), "fetching secrets from Safe");

        let identity = coordinator::obtain(ctx, self.source.clone(), &self.policy).await?;
        fetch::fetch(ctx, identity, self.policy.peer_matcher(), &target).await
    }
}
