//! SPIFFE Workload API messages used by `FetchX509SVID`.
//!
//! Hand-derived `prost` messages matching `workload.proto` from the SPIFFE
//! Workload API; only the X.509-SVID part of the service is modelled.

use std::collections::HashMap;

/// Fully qualified gRPC path of the server-streaming X.509-SVID method.
pub const FETCH_X509_SVID_PATH: &str = "/SpiffeWorkloadAPI/FetchX509SVID";

/// Metadata header every Workload API request must carry.
pub const SECURITY_HEADER: &str = "workload.spiffe.io";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct X509SvidRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct X509SvidResponse {
    /// SVIDs for this workload; the first is the default identity.
    #[prost(message, repeated, tag = "1")]
    pub svids: Vec<X509Svid>,
    /// DER CRLs, unused here.
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub crl: Vec<Vec<u8>>,
    /// Trust domain ID → concatenated DER roots of a federated domain.
    #[prost(map = "string, bytes", tag = "3")]
    pub federated_bundles: HashMap<String, Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct X509Svid {
    #[prost(string, tag = "1")]
    pub spiffe_id: String,
    /// Concatenated DER certificates, leaf first.
    #[prost(bytes = "vec", tag = "2")]
    pub x509_svid: Vec<u8>,
    /// PKCS#8 DER private key.
    #[prost(bytes = "vec", tag = "3")]
    pub x509_svid_key: Vec<u8>,
    /// Concatenated DER roots of the SVID's own trust domain.
    #[prost(bytes = "vec", tag = "4")]
    pub bundle: Vec<u8>,
    #[prost(string, tag = "5")]
    pub hint: String,
}
