//! Job configuration and runtime settings

use crate::error::{Result, WebError};
use crate::extract::json::merge_path_mappings;
use crate::extract::{
    DocumentMode, Extraction, JsonExtractor, RegexExtractor, RegexPolicy, XpathExtractor,
};
use crate::params::{Credentials, ParamContext};
use crate::request::{normalize_record_type, one_or_many, DnsQuerySpec, HttpRequestSpec, RequestSpec};
use crate::template::OptionTransform;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

/// Which request variant and extraction strategy a configuration uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Dns,
    /// DNS with reversed option labels
    Dnsbl,
    Json,
    Xpath,
    HtmlXpath,
    Regex,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Dns => "dns",
            ServiceKind::Dnsbl => "dnsbl",
            ServiceKind::Json => "json",
            ServiceKind::Xpath => "xpath",
            ServiceKind::HtmlXpath => "html_xpath",
            ServiceKind::Regex => "regex",
        }
    }

    pub fn is_dns(&self) -> bool {
        matches!(self, ServiceKind::Dns | ServiceKind::Dnsbl)
    }

    /// Kind implied by the keys of an entry without a `service` key
    fn infer(entry: &Map<String, Value>) -> Self {
        if entry.contains_key("rrname") {
            ServiceKind::Dns
        } else if entry.contains_key("xpath") {
            ServiceKind::Xpath
        } else if entry.contains_key("parse") {
            ServiceKind::Regex
        } else {
            ServiceKind::Json
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = WebError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dns" => Ok(ServiceKind::Dns),
            "dnsbl" => Ok(ServiceKind::Dnsbl),
            "json" => Ok(ServiceKind::Json),
            "xpath" => Ok(ServiceKind::Xpath),
            "html_xpath" | "htmlxpath" => Ok(ServiceKind::HtmlXpath),
            "regex" => Ok(ServiceKind::Regex),
            other => Err(WebError::Configuration(format!(
                "unknown service kind '{}'",
                other
            ))),
        }
    }
}

/// A parsed and validated job description
///
/// Every template, pattern and record type is checked here, so a
/// configuration that loads will not fail later for configuration reasons
/// other than a missing option.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub kind: ServiceKind,
    pub requests: Vec<RequestSpec>,
    /// Extraction strategy for HTTP kinds
    pub extraction: Option<Extraction>,
    /// TXT delimiter for DNS kinds
    pub split: Option<String>,
}

impl Configuration {
    /// Parse from a JSON-like value
    ///
    /// Accepted shapes: one entry mapping, a list of entry mappings, or a
    /// mapping with a `requests` list whose entries inherit the other
    /// top-level keys.
    pub fn from_value(value: Value) -> Result<Self> {
        let entries = entries(value)?;
        let kind = service_kind(&entries)?;

        let requests = entries
            .iter()
            .map(|entry| request_spec(kind, entry))
            .collect::<Result<Vec<_>>>()?;

        let (extraction, split) = if kind.is_dns() {
            let split = shared_key(&entries, "split")?
                .map(|v| as_string(v, "split"))
                .transpose()?;
            (None, split)
        } else {
            (Some(extraction(kind, &entries)?), None)
        };

        Ok(Self {
            kind,
            requests,
            extraction,
            split,
        })
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(s)
            .map_err(|e| WebError::Configuration(format!("invalid JSON configuration: {}", e)))?;
        Self::from_value(value)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let value: Value = toml::from_str(s)?;
        Self::from_value(value)
    }

    /// Load from a `.toml` or `.json` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&contents),
            _ => Self::from_json_str(&contents),
        }
    }

    /// Option preprocessing for this kind
    pub fn transform(&self) -> OptionTransform {
        match self.kind {
            ServiceKind::Dnsbl => OptionTransform::ReverseLabels,
            _ => OptionTransform::Identity,
        }
    }
}

fn entries(value: Value) -> Result<Vec<Map<String, Value>>> {
    let entries = match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map),
                other => Err(WebError::Configuration(format!(
                    "configuration entries must be mappings, found {}",
                    other
                ))),
            })
            .collect::<Result<Vec<_>>>()?,
        Value::Object(mut shared) => match shared.remove("requests") {
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(map) => {
                        let mut entry = shared.clone();
                        entry.extend(map);
                        Ok(entry)
                    }
                    other => Err(WebError::Configuration(format!(
                        "request entries must be mappings, found {}",
                        other
                    ))),
                })
                .collect::<Result<Vec<_>>>()?,
            Some(_) => {
                return Err(WebError::Configuration(
                    "'requests' must be a list of mappings".into(),
                ))
            }
            None => vec![shared],
        },
        other => {
            return Err(WebError::Configuration(format!(
                "configuration must be a mapping or a list, found {}",
                other
            )))
        }
    };

    if entries.is_empty() {
        return Err(WebError::Configuration("configuration has no entries".into()));
    }
    Ok(entries)
}

fn service_kind(entries: &[Map<String, Value>]) -> Result<ServiceKind> {
    match shared_key(entries, "service")? {
        Some(value) => as_string(value, "service")?.parse(),
        None => Ok(ServiceKind::infer(&entries[0])),
    }
}

/// Value of a key that must agree across every entry declaring it
fn shared_key<'a>(entries: &'a [Map<String, Value>], key: &str) -> Result<Option<&'a Value>> {
    let mut found: Option<&Value> = None;
    for value in entries.iter().filter_map(|entry| entry.get(key)) {
        match found {
            Some(previous) if previous != value => {
                return Err(WebError::Configuration(format!(
                    "conflicting values for '{}' across entries",
                    key
                )))
            }
            Some(_) => {}
            None => found = Some(value),
        }
    }
    Ok(found)
}

fn as_string(value: &Value, key: &str) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| WebError::Configuration(format!("'{}' must be a string", key)))
}

fn decode<T: for<'de> Deserialize<'de>>(value: Value, what: &str) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| WebError::Configuration(format!("invalid {}: {}", what, e)))
}

fn request_spec(kind: ServiceKind, entry: &Map<String, Value>) -> Result<RequestSpec> {
    if kind.is_dns() {
        if !entry.contains_key("rrname") {
            return Err(WebError::Configuration(
                "DNS entry is missing 'rrname'".into(),
            ));
        }
        let mut spec: DnsQuerySpec = decode(Value::Object(entry.clone()), "DNS query")?;
        spec.rrtype = normalize_record_type(&spec.rrtype)?;
        Ok(RequestSpec::Dns(spec))
    } else {
        if !entry.contains_key("url") {
            return Err(WebError::Configuration("HTTP entry is missing 'url'".into()));
        }
        let spec: HttpRequestSpec = decode(Value::Object(entry.clone()), "HTTP request")?;
        Ok(RequestSpec::Http(spec))
    }
}

/// A mapping or a list of mappings, merged in order
fn path_mappings(value: &Value, key: &str) -> Result<IndexMap<String, String>> {
    #[derive(Deserialize)]
    struct Mappings(
        #[serde(deserialize_with = "one_or_many")] Vec<IndexMap<String, String>>,
    );

    let Mappings(mappings) = decode(value.clone(), key)?;
    Ok(merge_path_mappings(mappings))
}

fn extraction(kind: ServiceKind, entries: &[Map<String, Value>]) -> Result<Extraction> {
    match kind {
        ServiceKind::Json => {
            let multi_json = match shared_key(entries, "multi_json")? {
                Some(value) => value.as_bool().ok_or_else(|| {
                    WebError::Configuration("'multi_json' must be a boolean".into())
                })?,
                None => false,
            };
            let engine = match shared_key(entries, "jsonpath")? {
                Some(value) => JsonExtractor::new(path_mappings(value, "jsonpath")?, multi_json)?,
                None => JsonExtractor::documents_only(multi_json),
            };
            Ok(Extraction::Json(engine))
        }
        ServiceKind::Xpath | ServiceKind::HtmlXpath => {
            let mode = if kind == ServiceKind::HtmlXpath {
                DocumentMode::Html
            } else {
                DocumentMode::Xml
            };
            let expressions = match shared_key(entries, "xpath")? {
                Some(value) => path_mappings(value, "xpath")?,
                None => IndexMap::new(),
            };
            Ok(Extraction::Xpath(XpathExtractor::new(expressions, mode)?))
        }
        ServiceKind::Regex => {
            #[derive(Deserialize)]
            struct Patterns(#[serde(deserialize_with = "one_or_many")] Vec<String>);

            let patterns = match shared_key(entries, "parse")? {
                Some(value) => {
                    let Patterns(patterns) = decode(value.clone(), "parse")?;
                    patterns
                }
                None => Vec::new(),
            };
            let policy: RegexPolicy = match shared_key(entries, "regex_policy")? {
                Some(value) => decode(value.clone(), "regex_policy")?,
                None => RegexPolicy::default(),
            };
            Ok(Extraction::Regex(RegexExtractor::new(patterns, policy)?))
        }
        ServiceKind::Dns | ServiceKind::Dnsbl => Err(WebError::Configuration(
            "DNS services have no extraction spec".into(),
        )),
    }
}

/// Parse credentials: scheme name to one secret or a list of secrets
pub fn parse_credentials(value: Value) -> Result<Credentials> {
    let raw: IndexMap<String, OneOrManySecrets> = decode(value, "credentials")?;
    Ok(raw.into_iter().map(|(k, v)| (k, v.0)).collect())
}

#[derive(Deserialize)]
struct OneOrManySecrets(#[serde(deserialize_with = "one_or_many")] Vec<String>);

/// Load credentials from a `.toml` or `.json` file
pub fn load_credentials(path: impl AsRef<Path>) -> Result<Credentials> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)?;
    let value: Value = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&contents)?,
        _ => serde_json::from_str(&contents)
            .map_err(|e| WebError::Configuration(format!("invalid credentials file: {}", e)))?,
    };
    parse_credentials(value)
}

/// Settings for the default transport adapters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Request timeout in seconds (HTTP and DNS)
    pub timeout_secs: u64,

    /// User agent for HTTP requests
    pub user_agent: String,

    /// DNS servers to query; empty uses the system configuration
    pub nameservers: Vec<IpAddr>,

    pub dns_port: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: format!("libweb/{}", env!("CARGO_PKG_VERSION")),
            nameservers: Vec::new(),
            dns_port: 53,
        }
    }
}

impl TransportConfig {
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Query these servers instead of the system resolvers
    pub fn with_nameservers(mut self, nameservers: Vec<IpAddr>) -> Self {
        self.nameservers = nameservers;
        self
    }

    pub fn with_dns_port(mut self, port: u16) -> Self {
        self.dns_port = port;
        self
    }
}

/// Per-run settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Log failures and end the sequence instead of yielding an error
    pub swallow_failures: bool,

    /// IANA zone anchoring relative times; system local zone when unset
    pub local_timezone: Option<String>,

    /// Evaluation instant; the wall clock at run start when unset
    pub now: Option<DateTime<Utc>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            swallow_failures: true,
            local_timezone: None,
            now: None,
        }
    }
}

impl RunOptions {
    pub fn with_swallow_failures(mut self, swallow: bool) -> Self {
        self.swallow_failures = swallow;
        self
    }

    pub fn with_local_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.local_timezone = Some(timezone.into());
        self
    }

    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn param_context(&self) -> Result<ParamContext> {
        ParamContext::new(
            self.now.unwrap_or_else(Utc::now),
            self.local_timezone.as_deref(),
        )
    }
}
