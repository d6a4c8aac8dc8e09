//! HTTP adapter backed by reqwest

use super::{HttpRequest, HttpTransport, RawResponse};
use crate::config::TransportConfig;
use crate::error::{Result, WebError};
use async_trait::async_trait;
use reqwest::{Client, Method};
use std::time::Duration;
use tracing::debug;

/// HTTP transport using a pair of reqwest clients
///
/// Certificate verification is a client-level setting in reqwest, so one
/// client verifies and the other accepts invalid certificates for requests
/// configured with `verify_ssl = false`.
pub struct ReqwestTransport {
    client: Client,
    insecure: Client,
}

impl ReqwestTransport {
    /// Create a transport with the given configuration
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let build = |verify: bool| {
            Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .user_agent(&config.user_agent)
                .danger_accept_invalid_certs(!verify)
                .build()
        };

        Ok(Self {
            client: build(true)?,
            insecure: build(false)?,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<RawResponse> {
        let method = Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            WebError::Configuration(format!("invalid HTTP method '{}'", request.method))
        })?;
        let client = if request.verify_tls {
            &self.client
        } else {
            &self.insecure
        };

        let mut builder = client.request(method, &request.url);
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.data.is_empty() {
            builder = builder.form(&request.data);
        }
        if let Some((user, password)) = &request.basic_auth {
            builder = builder.basic_auth(user, password.as_ref());
        }

        debug!(method = %request.method, url = %request.url, "sending request");
        let response = builder.send().await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let content = response.bytes().await?.to_vec();
        debug!(status, bytes = content.len(), "response received");

        Ok(RawResponse {
            status,
            headers,
            content,
        })
    }
}
