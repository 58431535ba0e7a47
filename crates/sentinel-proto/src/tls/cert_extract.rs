//! Extract SPIFFE identity data from X.509 DER certificates.
//!
//! An X.509-SVID carries its SPIFFE ID as the single URI subject alternative
//! name of the leaf certificate. The Workload API ships chains and bundles as
//! plain concatenated DER, so this module also splits those blobs.
//!
//! Reference: `x509-parser` crate (rusticata, MIT/Apache-2.0)

use data_encoding::HEXLOWER;
use rustls_pki_types::CertificateDer;
use sha2::{Digest, Sha256};
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::*;

use crate::error::{ProtoError, Result};
use crate::identity::SpiffeId;

/// Facts about a leaf certificate needed to accept it as an X.509-SVID.
#[derive(Debug, Clone)]
pub struct LeafInfo {
    pub spiffe_id: SpiffeId,
    pub is_ca: bool,
    pub not_before_epoch: i64,
    pub not_after_epoch: i64,
}

/// Parse a DER certificate and extract the SVID-relevant fields.
pub fn inspect_leaf(cert_der: &[u8]) -> Result<LeafInfo> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| ProtoError::CertificateParse(e.to_string()))?;

    let spiffe_id = spiffe_id_of(&cert)?;
    let validity = cert.validity();

    Ok(LeafInfo {
        spiffe_id,
        is_ca: cert.is_ca(),
        not_before_epoch: validity.not_before.timestamp(),
        not_after_epoch: validity.not_after.timestamp(),
    })
}

/// Extract the SPIFFE ID from a DER-encoded leaf certificate.
///
/// Returns an error if:
/// - The certificate cannot be parsed
/// - It has no subject alternative name extension
/// - It does not carry exactly one URI SAN
/// - The URI SAN is not a valid SPIFFE ID
pub fn extract_spiffe_id(cert_der: &[u8]) -> Result<SpiffeId> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| ProtoError::CertificateParse(e.to_string()))?;
    spiffe_id_of(&cert)
}

fn spiffe_id_of(cert: &X509Certificate<'_>) -> Result<SpiffeId> {
    let san = cert
        .subject_alternative_name()
        .map_err(|e| ProtoError::CertificateParse(format!("subjectAltName: {e}")))?
        .ok_or_else(|| ProtoError::InvalidSvid("certificate has no subjectAltName".into()))?;

    let mut uris = san.value.general_names.iter().filter_map(|name| match name {
        GeneralName::URI(uri) => Some(*uri),
        _ => None,
    });

    let uri = uris
        .next()
        .ok_or_else(|| ProtoError::InvalidSvid("certificate has no URI SAN".into()))?;
    if uris.next().is_some() {
        return Err(ProtoError::InvalidSvid(
            "certificate has more than one URI SAN".into(),
        ));
    }

    SpiffeId::parse(uri)
}

/// Split a blob of concatenated DER certificates into individual certificates.
///
/// The order of the input is preserved (for SVIDs: leaf first).
pub fn split_der_certificates(mut blob: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut certs = Vec::new();

    while !blob.is_empty() {
        let (rest, _) = X509Certificate::from_der(blob).map_err(|e| {
            ProtoError::CertificateParse(format!("certificate #{} in chain: {e}", certs.len()))
        })?;
        let consumed = blob.len() - rest.len();
        certs.push(CertificateDer::from(blob[..consumed].to_vec()));
        blob = rest;
    }

    if certs.is_empty() {
        return Err(ProtoError::CertificateParse("no certificates in input".into()));
    }

    Ok(certs)
}

/// SHA-256 fingerprint of a DER certificate, lowercase hex.
///
/// Used in diagnostics so operators can correlate a log line with a
/// specific SVID rotation without logging the certificate itself.
pub fn fingerprint(cert_der: &[u8]) -> String {
    HEXLOWER.encode(&Sha256::digest(cert_der))
}
