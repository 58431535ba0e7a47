//! Identity policy: who we may be, and who we may talk to.
//!
//! Two independent allow-lists drive every trust decision:
//!
//! - the *self* list: the SPIFFE IDs this process may hold before it is
//!   allowed to authenticate to anyone (e.g. the Sentinel role);
//! - the *peer* list: the SPIFFE IDs a server must present during the mTLS
//!   handshake (e.g. the Safe role).
//!
//! A rule is either an exact SPIFFE ID or a segment-aligned path prefix
//! written as `spiffe://td/a/b/*`. There is no implicit wildcard: an empty
//! list allows nothing, and a string that is not a valid SPIFFE ID never
//! matches.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{ProtoError, Result};
use crate::identity::SpiffeId;

/// Suffix marking a prefix rule.
const PREFIX_MARKER: &str = "/*";

/// A predicate over peer (or self) identities.
///
/// Implementations must be `Send + Sync`: the TLS verifiers hold them in an
/// `Arc<dyn IdentityMatcher>` and call them from inside the handshake.
pub trait IdentityMatcher: Send + Sync {
    /// Returns `true` if `id` is acceptable.
    fn matches(&self, id: &SpiffeId) -> bool;
}

impl fmt::Debug for dyn IdentityMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn IdentityMatcher")
    }
}

/// One allow-list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowRule {
    /// Matches exactly this SPIFFE ID.
    Exact(SpiffeId),
    /// Matches any ID in the same trust domain whose path lies strictly
    /// below this ID's path (`spiffe://td/a/*` matches `spiffe://td/a/x`
    /// but neither `spiffe://td/a` nor `spiffe://td/ab`).
    Prefix(SpiffeId),
}

impl AllowRule {
    /// Parse a rule: a SPIFFE ID, optionally suffixed with `/*`.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let invalid = |reason: String| ProtoError::InvalidRule {
            input: input.to_string(),
            reason,
        };

        if let Some(base) = trimmed.strip_suffix(PREFIX_MARKER) {
            if base.contains('*') {
                return Err(invalid("'*' is only allowed as the final segment".into()));
            }
            let base = SpiffeId::parse(base).map_err(|e| invalid(e.to_string()))?;
            return Ok(Self::Prefix(base));
        }

        if trimmed.contains('*') {
            return Err(invalid("'*' is only allowed as the final segment".into()));
        }
        SpiffeId::parse(trimmed)
            .map(Self::Exact)
            .map_err(|e| invalid(e.to_string()))
    }

    /// Returns `true` if `id` satisfies this rule.
    pub fn matches(&self, id: &SpiffeId) -> bool {
        match self {
            Self::Exact(expected) => expected == id,
            Self::Prefix(base) => {
                id.trust_domain() == base.trust_domain()
                    && id
                        .path()
                        .strip_prefix(base.path())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
        }
    }
}

impl fmt::Display for AllowRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(id) => write!(f, "{id}"),
            Self::Prefix(base) => write!(f, "{base}{PREFIX_MARKER}"),
        }
    }
}

/// An ordered list of [`AllowRule`]s. An identity is allowed if any rule
/// matches it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    rules: Vec<AllowRule>,
}

impl AllowList {
    /// An allow-list that rejects everything.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(rules: Vec<AllowRule>) -> Self {
        Self { rules }
    }

    /// Parse a comma-separated list of rules. Blank entries are skipped.
    pub fn parse(input: &str) -> Result<Self> {
        let rules = input
            .split(',')
            .filter(|entry| !entry.trim().is_empty())
            .map(AllowRule::parse)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[AllowRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns `true` if the parsed `id` matches any rule.
    pub fn allows_id(&self, id: &SpiffeId) -> bool {
        self.rules.iter().any(|rule| rule.matches(id))
    }

    /// Total predicate over identity strings: anything that is not a valid
    /// SPIFFE ID is rejected.
    pub fn allows(&self, identity: &str) -> bool {
        SpiffeId::parse(identity).is_ok_and(|id| self.allows_id(&id))
    }
}

impl FromStr for AllowList {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl IdentityMatcher for AllowList {
    fn matches(&self, id: &SpiffeId) -> bool {
        self.allows_id(id)
    }
}

impl fmt::Display for AllowList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.rules.iter().map(ToString::to_string).collect();
        f.write_str(&rendered.join(","))
    }
}

/// The pair of allow-lists that govern one client.
#[derive(Debug, Clone)]
pub struct IdentityPolicy {
    self_allow: Arc<AllowList>,
    peer_allow: Arc<AllowList>,
}

impl IdentityPolicy {
    pub fn new(self_allow: AllowList, peer_allow: AllowList) -> Self {
        Self {
            self_allow: Arc::new(self_allow),
            peer_allow: Arc::new(peer_allow),
        }
    }

    /// May this process operate under `identity`?
    pub fn is_self_allowed(&self, identity: &str) -> bool {
        self.self_allow.allows(identity)
    }

    /// May this process talk to a server presenting `identity`?
    pub fn is_peer_allowed(&self, identity: &str) -> bool {
        self.peer_allow.allows(identity)
    }

    /// The peer allow-list as a matcher for the TLS verifier.
    pub fn peer_matcher(&self) -> Arc<dyn IdentityMatcher> {
        self.peer_allow.clone()
    }
}
