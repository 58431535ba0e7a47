//! SPIFFE IDs and trust domains.
//!
//! A SPIFFE ID names a workload: `spiffe://<trust-domain>/<path>`. The
//! parser follows the SPIFFE ID standard strictly: lowercase trust domain,
//! no port/userinfo/query/fragment, no empty or dot segments, no trailing
//! slash. Anything that does not parse can never satisfy an identity policy.
//!
//! Reference: <https://github.com/spiffe/spiffe/blob/main/standards/SPIFFE-ID.md>

use std::fmt;
use std::str::FromStr;

use crate::error::{ProtoError, Result};

/// URI scheme prefix shared by every SPIFFE ID.
pub const SPIFFE_SCHEME: &str = "spiffe://";

/// Maximum accepted length of a SPIFFE ID in bytes.
const MAX_SPIFFE_ID_LEN: usize = 2048;

/// Maximum accepted length of a trust domain name in bytes.
const MAX_TRUST_DOMAIN_LEN: usize = 255;

/// The namespace a SPIFFE ID is issued in, e.g. `vsecm.com`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrustDomain {
    name: String,
}

impl TrustDomain {
    /// Validate and wrap a trust domain name.
    pub fn new(name: &str) -> Result<Self> {
        let invalid = |reason| ProtoError::InvalidTrustDomain {
            input: name.to_string(),
            reason,
        };

        if name.is_empty() {
            return Err(invalid("trust domain is empty"));
        }
        if name.len() > MAX_TRUST_DOMAIN_LEN {
            return Err(invalid("trust domain is too long"));
        }
        if !name.bytes().all(is_trust_domain_char) {
            return Err(invalid(
                "trust domain may only contain lowercase letters, digits, '.', '-' and '_'",
            ));
        }

        Ok(Self {
            name: name.to_string(),
        })
    }

    /// Returns the bare trust domain name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the SPIFFE ID of the trust domain itself (`spiffe://<name>`).
    pub fn id(&self) -> SpiffeId {
        SpiffeId {
            trust_domain: self.clone(),
            path: String::new(),
        }
    }
}

impl fmt::Display for TrustDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Debug for TrustDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TrustDomain({})", self.name)
    }
}

/// A parsed, validated SPIFFE ID.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpiffeId {
    trust_domain: TrustDomain,
    /// Either empty or `/seg(/seg)*`.
    path: String,
}

impl SpiffeId {
    /// Parse a SPIFFE ID from its URI form.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason| ProtoError::InvalidSpiffeId {
            input: input.to_string(),
            reason,
        };

        if input.is_empty() {
            return Err(invalid("SPIFFE ID is empty"));
        }
        if input.len() > MAX_SPIFFE_ID_LEN {
            return Err(invalid("SPIFFE ID is longer than 2048 bytes"));
        }

        let rest = input
            .strip_prefix(SPIFFE_SCHEME)
            .ok_or_else(|| invalid("scheme must be \"spiffe://\""))?;

        let (domain, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };

        let trust_domain = TrustDomain::new(domain).map_err(|_| invalid("invalid trust domain"))?;
        validate_path(path).map_err(invalid)?;

        Ok(Self {
            trust_domain,
            path: path.to_string(),
        })
    }

    /// Build a SPIFFE ID from a trust domain and a path (`/a/b`, or empty).
    pub fn from_path(trust_domain: &TrustDomain, path: &str) -> Result<Self> {
        validate_path(path).map_err(|reason| ProtoError::InvalidSpiffeId {
            input: format!("{SPIFFE_SCHEME}{trust_domain}{path}"),
            reason,
        })?;
        Ok(Self {
            trust_domain: trust_domain.clone(),
            path: path.to_string(),
        })
    }

    /// The trust domain this ID belongs to.
    pub fn trust_domain(&self) -> &TrustDomain {
        &self.trust_domain
    }

    /// The path component, empty for a trust-domain ID.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Iterate over the path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').skip(1)
    }

    /// Returns true if this ID was issued in `trust_domain`.
    pub fn is_member_of(&self, trust_domain: &TrustDomain) -> bool {
        &self.trust_domain == trust_domain
    }
}

impl FromStr for SpiffeId {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for SpiffeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SPIFFE_SCHEME}{}{}", self.trust_domain, self.path)
    }
}

impl fmt::Debug for SpiffeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpiffeId({self})")
    }
}

fn is_trust_domain_char(b: u8) -> bool {
    matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'.' | b'-' | b'_')
}

fn is_path_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_')
}

/// Validate a SPIFFE ID path. Returns the reason on failure.
fn validate_path(path: &str) -> std::result::Result<(), &'static str> {
    if path.is_empty() {
        return Ok(());
    }

    let Some(body) = path.strip_prefix('/') else {
        return Err("path must start with '/'");
    };

    for segment in body.split('/') {
        match segment {
            "" => return Err("path contains an empty segment or trailing slash"),
            "." | ".." => return Err("path contains a dot segment"),
            s if !s.bytes().all(is_path_char) => {
                return Err("path may only contain letters, digits, '.', '-' and '_'")
            }
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_workload_id() {
        let id = SpiffeId::parse("spiffe://trust.example/ns/vsecm-system/sa/vsecm-sentinel")
            .expect("valid id should parse");
        assert_eq!(id.trust_domain().name(), "trust.example");
        assert_eq!(id.path(), "/ns/vsecm-system/sa/vsecm-sentinel");
        assert_eq!(
            id.segments().collect::<Vec<_>>(),
            vec!["ns", "vsecm-system", "sa", "vsecm-sentinel"]
        );
    }

    #[test]
    fn display_roundtrips_input() {
        let raw = "spiffe://trust.example/sentinel";
        let id: SpiffeId = raw.parse().unwrap();
        assert_eq!(id.to_string(), raw);
        assert_eq!(format!("{id:?}"), "SpiffeId(spiffe://trust.example/sentinel)");
    }

    #[test]
    fn trust_domain_only_id_is_valid() {
        let id = SpiffeId::parse("spiffe://trust.example").unwrap();
        assert_eq!(id.path(), "");
        assert_eq!(id, id.trust_domain().id());
    }

    #[test]
    fn rejects_wrong_scheme() {
        assert!(SpiffeId::parse("https://trust.example/sentinel").is_err());
        assert!(SpiffeId::parse("SPIFFE://trust.example/sentinel").is_err());
        assert!(SpiffeId::parse("trust.example/sentinel").is_err());
    }

    #[test]
    fn rejects_uppercase_trust_domain() {
        assert!(SpiffeId::parse("spiffe://Trust.Example/sentinel").is_err());
    }

    #[test]
    fn rejects_port_and_userinfo() {
        assert!(SpiffeId::parse("spiffe://trust.example:8443/sentinel").is_err());
        assert!(SpiffeId::parse("spiffe://user@trust.example/sentinel").is_err());
    }

    #[test]
    fn rejects_query_and_fragment() {
        assert!(SpiffeId::parse("spiffe://trust.example/sentinel?x=1").is_err());
        assert!(SpiffeId::parse("spiffe://trust.example/sentinel#frag").is_err());
    }

    #[test]
    fn rejects_bad_paths() {
        assert!(SpiffeId::parse("spiffe://trust.example/").is_err());
        assert!(SpiffeId::parse("spiffe://trust.example/a//b").is_err());
        assert!(SpiffeId::parse("spiffe://trust.example/a/./b").is_err());
        assert!(SpiffeId::parse("spiffe://trust.example/a/../b").is_err());
        assert!(SpiffeId::parse("spiffe://trust.example/a%20b").is_err());
    }

    #[test]
    fn rejects_empty_and_oversized() {
        assert!(SpiffeId::parse("").is_err());
        assert!(SpiffeId::parse("spiffe://").is_err());
        let long = format!("spiffe://trust.example/{}", "a".repeat(MAX_SPIFFE_ID_LEN));
        assert!(SpiffeId::parse(&long).is_err());
    }

    #[test]
    fn from_path_validates() {
        let td = TrustDomain::new("trust.example").unwrap();
        let id = SpiffeId::from_path(&td, "/safe").unwrap();
        assert_eq!(id.to_string(), "spiffe://trust.example/safe");
        assert!(SpiffeId::from_path(&td, "safe").is_err());
    }

    #[test]
    fn membership_is_exact() {
        let id = SpiffeId::parse("spiffe://trust.example/safe").unwrap();
        assert!(id.is_member_of(&TrustDomain::new("trust.example").unwrap()));
        assert!(!id.is_member_of(&TrustDomain::new("example").unwrap()));
    }
}
