//! Transport collaborators for DNS and HTTP
//!
//! The pipeline only depends on the two traits below. Default adapters are
//! provided behind the `http-client` (reqwest) and `dns-resolver`
//! (trust-dns) features; tests and embedders can supply their own.

#[cfg(feature = "dns-resolver")]
pub mod dns;
#[cfg(feature = "http-client")]
pub mod http;

use crate::error::Result;
use async_trait::async_trait;
use indexmap::IndexMap;

#[cfg(feature = "dns-resolver")]
pub use dns::ResolverTransport;
#[cfg(feature = "http-client")]
pub use http::ReqwestTransport;

/// A fully resolved HTTP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: IndexMap<String, String>,
    pub params: IndexMap<String, String>,
    /// Form-encoded body fields
    pub data: IndexMap<String, String>,
    pub basic_auth: Option<(String, Option<String>)>,
    pub verify_tls: bool,
}

/// What an HTTP adapter hands back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub headers: IndexMap<String, String>,
    pub content: Vec<u8>,
}

/// Sends HTTP requests
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<RawResponse>;
}

/// A fully resolved DNS query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuery {
    /// Fully-qualified record name (trailing dot)
    pub name: String,
    pub record_type: String,
}

/// One resource record from a DNS answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub name: String,
    pub ttl: u32,
    pub record_type: String,
    pub rdata: String,
}

/// Outcome of a DNS query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsAnswer {
    Records(Vec<DnsRecord>),
    /// The name does not exist or has no answer of the requested type
    NxDomain,
}

/// Resolves DNS queries
#[async_trait]
pub trait DnsTransport: Send + Sync {
    async fn query(&self, query: &DnsQuery) -> Result<DnsAnswer>;
}
