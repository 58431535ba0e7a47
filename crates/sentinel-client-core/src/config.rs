//! Environment configuration.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `SPIFFE_ENDPOINT_SOCKET` | `unix:///spire-agent-socket/agent.sock` |
//! | `VSECM_SAFE_ENDPOINT_URL` | `https://vsecm-safe.vsecm-system.svc.cluster.local:8443/` |
//! | `VSECM_SENTINEL_SELF_IDENTITIES` | Sentinel workload prefix |
//! | `VSECM_SENTINEL_SAFE_IDENTITIES` | Safe workload prefix |
//! | `VSECM_SENTINEL_TIMEOUT_MS` | `30000` |
//! | `VSECM_SENTINEL_MAX_RESPONSE_BYTES` | `10485760` |
//!
//! Allow-list variables are comma-separated rule lists; see
//! [`sentinel_proto::policy::AllowRule`].

use std::time::Duration;

use sentinel_proto::policy::{AllowList, IdentityPolicy};
use url::Url;

use crate::error::ConfigError;
use crate::workload::WorkloadApiAddress;

pub const ENV_WORKLOAD_SOCKET: &str = "SPIFFE_ENDPOINT_SOCKET";
pub const ENV_SAFE_ENDPOINT: &str = "VSECM_SAFE_ENDPOINT_URL";
pub const ENV_SELF_IDENTITIES: &str = "VSECM_SENTINEL_SELF_IDENTITIES";
pub const ENV_SAFE_IDENTITIES: &str = "VSECM_SENTINEL_SAFE_IDENTITIES";
pub const ENV_TIMEOUT_MS: &str = "VSECM_SENTINEL_TIMEOUT_MS";
pub const ENV_MAX_RESPONSE_BYTES: &str = "VSECM_SENTINEL_MAX_RESPONSE_BYTES";

pub const DEFAULT_WORKLOAD_SOCKET: &str = "unix:///spire-agent-socket/agent.sock";
pub const DEFAULT_SAFE_ENDPOINT: &str = "https://vsecm-safe.vsecm-system.svc.cluster.local:8443/";
pub const DEFAULT_SELF_IDENTITIES: &str =
    "spiffe://vsecm.com/workload/vsecm-sentinel/ns/vsecm-system/sa/vsecm-sentinel/n/*";
pub const DEFAULT_SAFE_IDENTITIES: &str =
    "spiffe://vsecm.com/workload/vsecm-safe/ns/vsecm-system/sa/vsecm-safe/n/*";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub workload_api: WorkloadApiAddress,
    pub safe_endpoint: Url,
    pub policy: IdentityPolicy,
    /// Deadline for the whole operation, acquisition through body read.
    pub timeout: Duration,
    pub max_response_bytes: usize,
}

impl SentinelConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load using `lookup` in place of the environment. Empty values count
    /// as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &'static str, default: &str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let workload_api =
            WorkloadApiAddress::parse(&get(ENV_WORKLOAD_SOCKET, DEFAULT_WORKLOAD_SOCKET))
                .map_err(|e| invalid(ENV_WORKLOAD_SOCKET, e))?;

        let safe_endpoint = Url::parse(&get(ENV_SAFE_ENDPOINT, DEFAULT_SAFE_ENDPOINT))
            .map_err(|e| invalid(ENV_SAFE_ENDPOINT, e))?;
        if safe_endpoint.scheme() != "https" {
            return Err(invalid(
                ENV_SAFE_ENDPOINT,
                format!("scheme must be https, got {}", safe_endpoint.scheme()),
            ));
        }

        let self_allow = AllowList::parse(&get(ENV_SELF_IDENTITIES, DEFAULT_SELF_IDENTITIES))
            .map_err(|e| invalid(ENV_SELF_IDENTITIES, e))?;
        let peer_allow = AllowList::parse(&get(ENV_SAFE_IDENTITIES, DEFAULT_SAFE_IDENTITIES))
            .map_err(|e| invalid(ENV_SAFE_IDENTITIES, e))?;

        let timeout_ms: u64 = get(ENV_TIMEOUT_MS, &DEFAULT_TIMEOUT.as_millis().to_string())
            .parse()
            .map_err(|e| invalid(ENV_TIMEOUT_MS, e))?;
        if timeout_ms == 0 {
            return Err(invalid(ENV_TIMEOUT_MS, "must be greater than zero"));
        }

        let max_response_bytes: usize =
            get(ENV_MAX_RESPONSE_BYTES, &DEFAULT_MAX_RESPONSE_BYTES.to_string())
                .parse()
                .map_err(|e| invalid(ENV_MAX_RESPONSE_BYTES, e))?;

        Ok(Self {
            workload_api,
            safe_endpoint,
            policy: IdentityPolicy::new(self_allow, peer_allow),
            timeout: Duration::from_millis(timeout_ms),
            max_response_bytes,
        })
    }
}

fn invalid(var: &'static str, reason: impl std::fmt::Display) -> ConfigError {
    ConfigError {
        var,
        reason: reason.to_string(),
    }
}
