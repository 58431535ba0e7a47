//! In-memory certificate authority for tests.
//!
//! Issues X.509-SVIDs the way SPIRE does: a self-signed root for the trust
//! domain and ECDSA P-256 leaves carrying a single SPIFFE URI SAN with both
//! server and client auth EKUs. Only compiled for tests or with the
//! `test-issuer` feature.
//!
//! Reference: `rcgen` crate (rustls team, MIT/Apache-2.0)

use rcgen::Ia5String;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose, SanType,
};
use rustls_pki_types::CertificateDer;
use time::{Duration, OffsetDateTime};

use crate::error::{ProtoError, Result};
use crate::identity::{BundleSet, IdentityHandle, TrustBundle, TrustDomain, X509Svid};

/// Default leaf lifetime either side of "now".
const LEAF_SKEW: Duration = Duration::hours(1);

/// A throwaway CA for one trust domain.
pub struct TestAuthority {
    trust_domain: TrustDomain,
    key: KeyPair,
    cert: Certificate,
}

impl TestAuthority {
    /// Create a fresh root CA for `trust_domain`.
    pub fn new(trust_domain: &str) -> Result<Self> {
        let trust_domain = TrustDomain::new(trust_domain)?;
        let key = KeyPair::generate().map_err(gen_err)?;

        let mut params = CertificateParams::new(Vec::<String>::new()).map_err(gen_err)?;
        params
            .distinguished_name
            .push(DnType::CommonName, format!("{trust_domain} test root"));
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::days(1);
        params.not_after = now + Duration::days(1);

        let cert = params.self_signed(&key).map_err(gen_err)?;

        Ok(Self {
            trust_domain,
            key,
            cert,
        })
    }

    pub fn trust_domain(&self) -> &TrustDomain {
        &self.trust_domain
    }

    /// DER bytes of the root certificate.
    pub fn root_der(&self) -> &[u8] {
        self.cert.der().as_ref()
    }

    /// A single-root bundle for this authority's trust domain.
    pub fn bundle(&self) -> Result<TrustBundle> {
        TrustBundle::new(
            self.trust_domain.clone(),
            vec![CertificateDer::from(self.root_der().to_vec())],
        )
    }

    /// Issue an SVID for `path` within this authority's trust domain.
    pub fn issue(&self, path: &str) -> Result<IssuedSvid> {
        self.issue_uri(&format!("spiffe://{}{path}", self.trust_domain))
    }

    /// Issue an SVID whose URI SAN is `uri`, verbatim.
    ///
    /// The URI need not belong to this authority's trust domain, which lets
    /// tests present a correctly signed certificate for a foreign identity.
    pub fn issue_uri(&self, uri: &str) -> Result<IssuedSvid> {
        let now = OffsetDateTime::now_utc();
        self.issue_with_validity(uri, now - LEAF_SKEW, now + LEAF_SKEW)
    }

    /// Issue an SVID with an explicit validity window.
    pub fn issue_with_validity(
        &self,
        uri: &str,
        not_before: OffsetDateTime,
        not_after: OffsetDateTime,
    ) -> Result<IssuedSvid> {
        let key = KeyPair::generate().map_err(gen_err)?;

        let mut params = CertificateParams::new(Vec::<String>::new()).map_err(gen_err)?;
        let san = Ia5String::try_from(uri.to_string()).map_err(gen_err)?;
        params.subject_alt_names = vec![SanType::URI(san)];
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        params.not_before = not_before;
        params.not_after = not_after;

        let cert = params
            .signed_by(&key, &self.cert, &self.key)
            .map_err(gen_err)?;

        Ok(IssuedSvid {
            leaf: cert.der().clone(),
            key_der: key.serialize_der(),
        })
    }

    /// Issue an SVID for `path` and wrap it, with this authority's bundle,
    /// in an [`IdentityHandle`].
    pub fn issue_handle(&self, path: &str) -> Result<IdentityHandle> {
        let svid = self.issue(path)?.into_svid()?;
        Ok(IdentityHandle::new(svid, BundleSet::from(self.bundle()?)))
    }
}

/// Raw output of [`TestAuthority::issue`].
pub struct IssuedSvid {
    leaf: CertificateDer<'static>,
    key_der: Vec<u8>,
}

impl IssuedSvid {
    pub fn leaf(&self) -> &[u8] {
        self.leaf.as_ref()
    }

    /// PKCS#8 DER private key.
    pub fn key_der(&self) -> &[u8] {
        &self.key_der
    }

    pub fn into_svid(self) -> Result<X509Svid> {
        X509Svid::from_parts(vec![self.leaf], self.key_der)
    }
}

fn gen_err(e: impl std::fmt::Display) -> ProtoError {
    ProtoError::CertificateGeneration(e.to_string())
}
