//! # libweb
//!
//! Declarative DNS and HTTP retrieval with structured extraction.
//!
//! A job configuration describes one or more requests (DNS lookups or HTTP
//! fetches) and how to pull data out of the answers: JSON paths, XPath over
//! XML or HTML, or regular expressions. Running it yields a lazy stream of
//! ordered key/value [`Record`]s.
//!
//! ## Features
//!
//! - **Templates**: `{name}` placeholders filled from caller options, with
//!   reversed-label options for DNSBL lookups
//! - **Parameters**: credentials injected into headers, query or form
//!   fields, and relative timestamps such as `-1d@d`
//! - **Decoding**: zip and gzip bodies detected by content, not headers
//! - **Extraction**: JSON-path, XPath and regex engines
//! - **Failure policy**: errors either end the stream quietly or surface as
//!   its last item, chosen per run
//!
//! ## Example
//!
//! ```rust,ignore
//! use libweb::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Configuration::from_json_str(r#"{
//!         "url": "https://www.virustotal.com/vtapi/v2/ip-address/report",
//!         "params": {"ip": "{ip}"},
//!         "auth": {"name": "virustotal", "params": ["apikey"]},
//!         "jsonpath": {"country": "$.country"}
//!     }"#)?;
//!     let service = Service::with_default_transports(config, &TransportConfig::default())?;
//!
//!     let mut opts = Options::new();
//!     opts.insert("ip".into(), "8.8.8.8".into());
//!     for record in service.collect(opts, Credentials::new(), RunOptions::default()).await? {
//!         println!("{}", serde_json::to_string(&record)?);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌─────────────┐
//! │  Templates   │ ──► │  Assembler   │ ──► │  Transport  │
//! │ + Parameters │     │ (requests)   │     │ (HTTP/DNS)  │
//! └──────────────┘     └──────────────┘     └─────────────┘
//!                                                  │
//!                                                  ▼
//! ┌──────────────┐     ┌──────────────┐     ┌─────────────┐
//! │   Records    │ ◄── │  Extractor   │ ◄── │   Decoder   │
//! │  (stream)    │     │ (json/xpath/ │     │ (zip/gzip)  │
//! └──────────────┘     │    regex)    │     └─────────────┘
//!                      └──────────────┘
//! ```

pub mod config;
pub mod decode;
pub mod error;
pub mod extract;
pub mod params;
pub mod record;
pub mod request;
pub mod service;
pub mod template;
pub mod transport;

pub use config::{Configuration, RunOptions, ServiceKind, TransportConfig};
pub use error::{Result, WebError};
pub use extract::{Extraction, Extractor};
pub use params::Credentials;
pub use record::Record;
pub use request::Response;
pub use service::{RecordStream, Service};
pub use template::Options;

/// Common imports for running configurations
pub mod prelude {
    pub use crate::config::{load_credentials, Configuration, RunOptions, TransportConfig};
    pub use crate::error::{Result, WebError};
    pub use crate::params::Credentials;
    pub use crate::record::Record;
    pub use crate::service::Service;
    pub use crate::template::Options;
    pub use crate::transport::{DnsTransport, HttpTransport};
}
