//! Request assembly: request specs to concrete requests to responses
//!
//! A request spec is one entry of the job configuration. The
//! [`RequestAssembler`] resolves it against the run's options, credentials
//! and clock into concrete [`HttpRequest`]s or [`DnsQuery`]s. Nothing here
//! touches the network except [`make_requests`], which issues HTTP requests
//! in order and applies the status-code policy and response decoding.

use crate::decode;
use crate::error::{Result, WebError};
use crate::params::{self, AuthRef, Credentials, ParamContext, ParamMap};
use crate::template::{OptionTransform, Options};
use crate::transport::{DnsQuery, HttpRequest, HttpTransport};
use async_stream::try_stream;
use futures::Stream;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// DNS record types accepted in `rrtype`
pub const DNS_RECORD_TYPES: &[&str] = &[
    "A", "AAAA", "ANY", "CAA", "CNAME", "HINFO", "HTTPS", "MX", "NAPTR", "NS", "NULL",
    "OPENPGPKEY", "PTR", "SOA", "SRV", "SSHFP", "SVCB", "TLSA", "TXT",
];

/// HTTP request spec
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequestSpec {
    /// URL template(s)
    #[serde(deserialize_with = "one_or_many")]
    pub url: Vec<String>,

    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default)]
    pub params: ParamMap,

    #[serde(default)]
    pub headers: ParamMap,

    /// Form body fields
    #[serde(default)]
    pub data: ParamMap,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthRef>,

    /// Sniff and decompress response bodies
    #[serde(default)]
    pub decompress: bool,

    #[serde(default, deserialize_with = "status_codes")]
    pub ignored_status_codes: BTreeSet<u16>,

    #[serde(default = "default_true", alias = "verify_tls")]
    pub verify_ssl: bool,
}

impl HttpRequestSpec {
    /// Spec for a plain GET of `url`
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: vec![url.into()],
            method: default_method(),
            params: ParamMap::new(),
            headers: ParamMap::new(),
            data: ParamMap::new(),
            auth: None,
            decompress: false,
            ignored_status_codes: BTreeSet::new(),
            verify_ssl: true,
        }
    }

    pub fn response_policy(&self) -> ResponsePolicy {
        ResponsePolicy {
            decompress: self.decompress,
            ignored_status_codes: self.ignored_status_codes.clone(),
            raise_for_status: true,
        }
    }
}

/// DNS query spec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsQuerySpec {
    /// Record name template(s)
    #[serde(deserialize_with = "one_or_many")]
    pub rrname: Vec<String>,

    #[serde(default = "default_rrtype")]
    pub rrtype: String,
}

/// Request spec variants
#[derive(Debug, Clone, PartialEq)]
pub enum RequestSpec {
    Http(HttpRequestSpec),
    Dns(DnsQuerySpec),
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_rrtype() -> String {
    "A".to_string()
}

fn default_true() -> bool {
    true
}

/// Accept either a single value or a list of values
pub(crate) fn one_or_many<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        One(T),
        Many(Vec<T>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

/// Status codes given as numbers or numeric strings
fn status_codes<'de, D>(deserializer: D) -> std::result::Result<BTreeSet<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Number(u16),
        Text(String),
    }

    let codes: Vec<Code> = one_or_many(deserializer)?;
    codes
        .into_iter()
        .map(|code| match code {
            Code::Number(n) => Ok(n),
            Code::Text(s) => s.trim().parse::<u16>().map_err(|_| {
                serde::de::Error::custom(format!("invalid HTTP status code '{}'", s))
            }),
        })
        .collect()
}

/// Resolves request specs for one run
pub struct RequestAssembler<'a> {
    opts: &'a Options,
    creds: &'a Credentials,
    ctx: ParamContext,
    transform: OptionTransform,
}

impl<'a> RequestAssembler<'a> {
    pub fn new(opts: &'a Options, creds: &'a Credentials, ctx: ParamContext) -> Self {
        Self {
            opts,
            creds,
            ctx,
            transform: OptionTransform::Identity,
        }
    }

    /// Use a different option transform (reversed labels for DNSBL)
    pub fn with_transform(mut self, transform: OptionTransform) -> Self {
        self.transform = transform;
        self
    }

    /// Concrete HTTP requests, one per URL template
    ///
    /// Auth-derived values are inserted first and explicitly configured
    /// values are applied over them, so configuration wins on collision.
    pub fn http(&self, spec: &HttpRequestSpec) -> Result<Vec<HttpRequest>> {
        let auth = spec
            .auth
            .as_ref()
            .map(|auth| params::auth::materialize(auth, self.creds))
            .unwrap_or_default();

        let resolve = |raw: &ParamMap| params::resolve_params(raw, self.opts, self.transform, &self.ctx);
        let mut headers = auth.headers;
        headers.extend(resolve(&spec.headers)?);
        let mut query = auth.params;
        query.extend(resolve(&spec.params)?);
        let mut data = auth.data;
        data.extend(resolve(&spec.data)?);

        let method = spec.method.trim().to_ascii_uppercase();
        if method.is_empty() {
            return Err(WebError::Configuration("empty HTTP method".into()));
        }

        spec.url
            .iter()
            .map(|template| {
                Ok(HttpRequest {
                    method: method.clone(),
                    url: self.transform.expand(template, self.opts)?,
                    headers: headers.clone(),
                    params: query.clone(),
                    data: data.clone(),
                    basic_auth: auth.basic.clone(),
                    verify_tls: spec.verify_ssl,
                })
            })
            .collect()
    }

    /// Concrete DNS queries, one per record name template
    pub fn dns(&self, spec: &DnsQuerySpec) -> Result<Vec<DnsQuery>> {
        let record_type = normalize_record_type(&spec.rrtype)?;
        spec.rrname
            .iter()
            .map(|template| {
                let mut name = self.transform.expand(template, self.opts)?;
                if !name.ends_with('.') {
                    name.push('.');
                }
                Ok(DnsQuery {
                    name,
                    record_type: record_type.clone(),
                })
            })
            .collect()
    }
}

/// Upper-cased record type, or a configuration error when unknown
pub fn normalize_record_type(rrtype: &str) -> Result<String> {
    let upper = rrtype.trim().to_ascii_uppercase();
    if DNS_RECORD_TYPES.contains(&upper.as_str()) {
        Ok(upper)
    } else {
        Err(WebError::Configuration(format!(
            "unknown DNS record type '{}'",
            rrtype
        )))
    }
}

/// How responses of one request spec are treated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponsePolicy {
    pub decompress: bool,
    pub ignored_status_codes: BTreeSet<u16>,
    /// Fail on error statuses that are not ignored
    pub raise_for_status: bool,
}

impl ResponsePolicy {
    /// Whether `status` is ignored; errors for failing statuses when raising
    pub fn check_status(&self, status: u16, url: &str) -> Result<bool> {
        if self.ignored_status_codes.contains(&status) {
            return Ok(true);
        }
        if self.raise_for_status && !(200..400).contains(&status) {
            return Err(WebError::HttpStatus {
                status,
                url: url.to_string(),
            });
        }
        Ok(false)
    }
}

/// A transported and decoded HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub url: String,
    pub status: u16,
    pub headers: IndexMap<String, String>,
    /// Raw body bytes as received
    pub content: Vec<u8>,
    /// Body after decompression (same as `content` when not engaged)
    pub body: Vec<u8>,
    /// Status was in the ignored set; extraction yields nothing
    pub ignored: bool,
}

impl Response {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Issue `requests` in order, yielding one response per request
///
/// Nothing is sent until the stream is polled, and each request completes
/// before the next is issued.
pub fn make_requests(
    transport: Arc<dyn HttpTransport>,
    requests: Vec<HttpRequest>,
    policy: ResponsePolicy,
) -> impl Stream<Item = Result<Response>> + Send {
    try_stream! {
        for request in requests {
            let raw = transport.send(&request).await?;
            let ignored = policy.check_status(raw.status, &request.url)?;
            if ignored {
                warn!(url = %request.url, status = raw.status, "ignoring response status");
            }

            let body = if policy.decompress && !ignored {
                decode::decode(&raw.content)?
            } else {
                raw.content.clone()
            };
            debug!(url = %request.url, status = raw.status, bytes = body.len(), "response ready");

            yield Response {
                url: request.url,
                status: raw.status,
                headers: raw.headers,
                content: raw.content,
                body,
                ignored,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RawResponse;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use futures::StreamExt;
    use std::sync::Mutex;

    fn ctx() -> ParamContext {
        let now = Utc.with_ymd_and_hms(2024, 3, 13, 19, 42, 10).unwrap();
        ParamContext::new(now, Some("UTC")).unwrap()
    }

    fn opts(pairs: &[(&str, &str)]) -> Options {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_deserialize_http_spec_defaults() {
        let spec: HttpRequestSpec =
            serde_json::from_str(r#"{"url": "https://example.com/{ip}"}"#).unwrap();
        assert_eq!(spec.url, vec!["https://example.com/{ip}"]);
        assert_eq!(spec.method, "GET");
        assert!(spec.verify_ssl);
        assert!(!spec.decompress);
        assert!(spec.ignored_status_codes.is_empty());
    }

    #[test]
    fn test_deserialize_status_codes_and_alias() {
        let spec: HttpRequestSpec = serde_json::from_str(
            r#"{"url": ["a", "b"], "ignored_status_codes": [404, "429"], "verify_tls": false}"#,
        )
        .unwrap();
        assert_eq!(spec.url.len(), 2);
        assert_eq!(spec.ignored_status_codes, BTreeSet::from([404, 429]));
        assert!(!spec.verify_ssl);

        let bad = serde_json::from_str::<HttpRequestSpec>(
            r#"{"url": "a", "ignored_status_codes": ["nope"]}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_http_expands_each_url() {
        let spec: HttpRequestSpec = serde_json::from_str(
            r#"{"url": ["https://a/{ip}", "https://b/{ip}"], "params": {"q": "{ip}"}, "method": "post"}"#,
        )
        .unwrap();
        let options = opts(&[("ip", "1.2.3.4")]);
        let creds = Credentials::new();
        let requests = RequestAssembler::new(&options, &creds, ctx()).http(&spec).unwrap();

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].url, "https://a/1.2.3.4");
        assert_eq!(requests[1].url, "https://b/1.2.3.4");
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[1].params["q"], "1.2.3.4");
    }

    #[test]
    fn test_explicit_config_wins_over_auth() {
        let spec: HttpRequestSpec = serde_json::from_str(
            r#"{
                "url": "https://api/{ip}",
                "params": {"apikey": "override", "ip": "{ip}"},
                "auth": {"name": "vt", "params": ["apikey", "extra"]}
            }"#,
        )
        .unwrap();
        let options = opts(&[("ip", "1.2.3.4")]);
        let mut creds = Credentials::new();
        creds.insert("vt".into(), vec!["secret".into(), "more".into()]);

        let request = &RequestAssembler::new(&options, &creds, ctx()).http(&spec).unwrap()[0];
        assert_eq!(request.params["apikey"], "override");
        assert_eq!(request.params["extra"], "more");
        assert_eq!(request.params["ip"], "1.2.3.4");
    }

    #[test]
    fn test_basic_auth_and_missing_credentials() {
        let spec: HttpRequestSpec =
            serde_json::from_str(r#"{"url": "https://site/", "auth": "site"}"#).unwrap();
        let options = Options::new();

        let mut creds = Credentials::new();
        creds.insert("site".into(), vec!["user".into(), "pw".into()]);
        let request = &RequestAssembler::new(&options, &creds, ctx()).http(&spec).unwrap()[0];
        assert_eq!(
            request.basic_auth,
            Some(("user".to_string(), Some("pw".to_string())))
        );

        let empty = Credentials::new();
        let request = &RequestAssembler::new(&options, &empty, ctx()).http(&spec).unwrap()[0];
        assert_eq!(request.basic_auth, None);
    }

    #[test]
    fn test_missing_option_in_url() {
        let spec = HttpRequestSpec::get("https://a/{ip}");
        let options = Options::new();
        let creds = Credentials::new();
        let err = RequestAssembler::new(&options, &creds, ctx()).http(&spec).unwrap_err();
        assert!(matches!(err, WebError::MissingOption { .. }));
    }

    #[test]
    fn test_dns_names_are_fully_qualified() {
        let spec: DnsQuerySpec =
            serde_json::from_str(r#"{"rrname": "{ip}.zen.example.org", "rrtype": "txt"}"#).unwrap();
        let options = opts(&[("ip", "1.2.3.4")]);
        let creds = Credentials::new();

        let plain = RequestAssembler::new(&options, &creds, ctx()).dns(&spec).unwrap();
        assert_eq!(plain[0].name, "1.2.3.4.zen.example.org.");
        assert_eq!(plain[0].record_type, "TXT");

        let reversed = RequestAssembler::new(&options, &creds, ctx())
            .with_transform(OptionTransform::ReverseLabels)
            .dns(&spec)
            .unwrap();
        assert_eq!(reversed[0].name, "4.3.2.1.zen.example.org.");
    }

    #[test]
    fn test_unknown_record_type() {
        let err = normalize_record_type("BOGUS").unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(normalize_record_type(" mx ").unwrap(), "MX");
    }

    #[test]
    fn test_status_policy() {
        let policy = ResponsePolicy {
            decompress: false,
            ignored_status_codes: BTreeSet::from([404]),
            raise_for_status: true,
        };
        assert!(!policy.check_status(200, "u").unwrap());
        assert!(!policy.check_status(302, "u").unwrap());
        assert!(policy.check_status(404, "u").unwrap());
        assert!(matches!(
            policy.check_status(500, "u"),
            Err(WebError::HttpStatus { status: 500, .. })
        ));

        let lenient = ResponsePolicy::default();
        assert!(!lenient.check_status(500, "u").unwrap());
    }

    struct Canned {
        statuses: Mutex<Vec<u16>>,
    }

    #[async_trait]
    impl HttpTransport for Canned {
        async fn send(&self, request: &HttpRequest) -> Result<RawResponse> {
            let status = self.statuses.lock().unwrap().remove(0);
            Ok(RawResponse {
                status,
                headers: IndexMap::new(),
                content: request.url.as_bytes().to_vec(),
            })
        }
    }

    fn get(url: &str) -> HttpRequest {
        HttpRequest {
            method: "GET".into(),
            url: url.into(),
            headers: IndexMap::new(),
            params: IndexMap::new(),
            data: IndexMap::new(),
            basic_auth: None,
            verify_tls: true,
        }
    }

    #[tokio::test]
    async fn test_make_requests_in_order_and_stops_on_error() {
        let transport = Arc::new(Canned {
            statuses: Mutex::new(vec![200, 404, 500, 200]),
        });
        let policy = ResponsePolicy {
            decompress: false,
            ignored_status_codes: BTreeSet::from([404]),
            raise_for_status: true,
        };
        let requests = vec![get("a"), get("b"), get("c"), get("d")];
        let results: Vec<_> = make_requests(transport, requests, policy).collect().await;

        assert_eq!(results.len(), 3);
        let first = results[0].as_ref().unwrap();
        assert_eq!(first.text(), "a");
        assert!(!first.ignored);
        assert!(results[1].as_ref().unwrap().ignored);
        assert!(matches!(results[2], Err(WebError::HttpStatus { status: 500, .. })));
    }
}
