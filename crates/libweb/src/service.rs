//! The service orchestrator
//!
//! A [`Service`] binds a [`Configuration`] to its transports. Each call to
//! [`Service::records`] is one run: options, credentials and
//! [`RunOptions`] are owned by the run, every request is assembled before
//! the first one is sent, and records are produced lazily as the caller
//! polls the stream.

use crate::config::{Configuration, RunOptions};
use crate::error::{Result, WebError};
use crate::extract::{dns_records, Extractor};
use crate::params::Credentials;
use crate::record::Record;
use crate::request::{make_requests, RequestAssembler, RequestSpec, Response, ResponsePolicy};
use crate::template::Options;
use crate::transport::{DnsAnswer, DnsQuery, DnsTransport, HttpRequest, HttpTransport};
use async_stream::stream;
use futures::{Stream, StreamExt, TryStreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info_span, Span};

/// Lazily produced records of one run
pub type RecordStream = Pin<Box<dyn Stream<Item = Result<Record>> + Send>>;

/// Lazily produced HTTP responses of one run
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<Response>> + Send>>;

/// A configuration bound to its transports
#[derive(Clone)]
pub struct Service {
    config: Arc<Configuration>,
    http: Option<Arc<dyn HttpTransport>>,
    dns: Option<Arc<dyn DnsTransport>>,
}

impl Service {
    /// Service without transports; add them with the `with_*` methods
    pub fn new(config: Configuration) -> Self {
        Self {
            config: Arc::new(config),
            http: None,
            dns: None,
        }
    }

    /// Service using the default adapter its configuration needs
    #[cfg(all(feature = "http-client", feature = "dns-resolver"))]
    pub fn with_default_transports(
        config: Configuration,
        transport: &crate::config::TransportConfig,
    ) -> Result<Self> {
        let service = Self::new(config);
        if service.config.kind.is_dns() {
            let dns = crate::transport::ResolverTransport::new(transport)?;
            Ok(service.with_dns_transport(Arc::new(dns)))
        } else {
            let http = crate::transport::ReqwestTransport::new(transport)?;
            Ok(service.with_http_transport(Arc::new(http)))
        }
    }

    pub fn with_http_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.http = Some(transport);
        self
    }

    pub fn with_dns_transport(mut self, transport: Arc<dyn DnsTransport>) -> Self {
        self.dns = Some(transport);
        self
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    /// Run the configuration, yielding records in configuration order
    ///
    /// Configuration errors are always yielded as the stream's last item.
    /// Any other failure is logged and ends the stream when
    /// `run.swallow_failures` is set; otherwise it is yielded as the last
    /// item. A DNS name without an answer ends that query silently.
    pub fn records(&self, opts: Options, creds: Credentials, run: RunOptions) -> RecordStream {
        let config = Arc::clone(&self.config);
        let http = self.http.clone();
        let dns = self.dns.clone();
        let span = info_span!("libweb.run", service = %config.kind);

        Box::pin(stream! {
            let _timer = RunTimer::start(span.clone());
            let steps = match plan(&config, http, dns, &opts, &creds, &run) {
                Ok(steps) => steps,
                Err(e) => {
                    error!(parent: &span, stage = "assemble", error = %e, "invalid configuration");
                    yield Err(e);
                    return;
                }
            };

            for step in steps {
                match step {
                    Step::Http { transport, requests, policy } => {
                        let extraction = match config.extraction.as_ref() {
                            Some(extraction) => extraction,
                            None => {
                                yield Err(WebError::Configuration("no extraction configured".into()));
                                return;
                            }
                        };

                        let mut responses = Box::pin(make_requests(transport, requests, policy));
                        while let Some(response) = responses.next().await {
                            let (stage, outcome) = match response {
                                Ok(response) if response.ignored => ("extract", Ok(Vec::new())),
                                Ok(response) => ("extract", extraction.extract(&response)),
                                Err(e) => ("request", Err(e)),
                            };
                            match outcome {
                                Ok(records) => {
                                    for record in records {
                                        yield Ok(record);
                                    }
                                }
                                Err(e) => {
                                    if let Some(e) = failure(&span, &run, stage, e) {
                                        yield Err(e);
                                    }
                                    return;
                                }
                            }
                        }
                    }
                    Step::Dns { transport, queries } => {
                        for query in queries {
                            match transport.query(&query).await {
                                Ok(DnsAnswer::Records(answers)) => {
                                    for record in dns_records(&answers, config.split.as_deref()) {
                                        yield Ok(record);
                                    }
                                }
                                Ok(DnsAnswer::NxDomain) => {
                                    debug!(parent: &span, name = %query.name, rrtype = %query.record_type, "no answer");
                                }
                                Err(e) => {
                                    if let Some(e) = failure(&span, &run, "query", e) {
                                        yield Err(e);
                                    }
                                    return;
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    /// Drain a run into a vector, stopping at the first yielded error
    pub async fn collect(
        &self,
        opts: Options,
        creds: Credentials,
        run: RunOptions,
    ) -> Result<Vec<Record>> {
        self.records(opts, creds, run).try_collect().await
    }

    /// Issue the HTTP requests of a run without extracting
    ///
    /// Status and decompression policies apply as in [`Service::records`];
    /// failures are always yielded.
    pub fn responses(&self, opts: Options, creds: Credentials, run: RunOptions) -> ResponseStream {
        let config = Arc::clone(&self.config);
        let http = self.http.clone();

        Box::pin(stream! {
            let steps = match plan(&config, http, None, &opts, &creds, &run) {
                Ok(steps) => steps,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            for step in steps {
                if let Step::Http { transport, requests, policy } = step {
                    let mut responses = Box::pin(make_requests(transport, requests, policy));
                    while let Some(response) = responses.next().await {
                        let failed = response.is_err();
                        yield response;
                        if failed {
                            return;
                        }
                    }
                }
            }
        })
    }
}

/// Apply the failure policy; `Some` when the error must be yielded
fn failure(span: &Span, run: &RunOptions, stage: &'static str, e: WebError) -> Option<WebError> {
    error!(parent: span, stage, error = %e, retryable = e.is_retryable(), "run failed");
    if e.is_configuration() || !run.swallow_failures {
        Some(e)
    } else {
        None
    }
}

enum Step {
    Http {
        transport: Arc<dyn HttpTransport>,
        requests: Vec<HttpRequest>,
        policy: ResponsePolicy,
    },
    Dns {
        transport: Arc<dyn DnsTransport>,
        queries: Vec<DnsQuery>,
    },
}

/// Assemble every request of the run before anything is sent
fn plan(
    config: &Configuration,
    http: Option<Arc<dyn HttpTransport>>,
    dns: Option<Arc<dyn DnsTransport>>,
    opts: &Options,
    creds: &Credentials,
    run: &RunOptions,
) -> Result<Vec<Step>> {
    let assembler =
        RequestAssembler::new(opts, creds, run.param_context()?).with_transform(config.transform());

    config
        .requests
        .iter()
        .map(|spec| match spec {
            RequestSpec::Http(spec) => {
                let transport = http.clone().ok_or_else(|| {
                    WebError::Configuration("no HTTP transport configured".into())
                })?;
                Ok(Step::Http {
                    transport,
                    requests: assembler.http(spec)?,
                    policy: spec.response_policy(),
                })
            }
            RequestSpec::Dns(spec) => {
                let transport = dns.clone().ok_or_else(|| {
                    WebError::Configuration("no DNS transport configured".into())
                })?;
                Ok(Step::Dns {
                    transport,
                    queries: assembler.dns(spec)?,
                })
            }
        })
        .collect()
}

/// Logs the run duration when the stream finishes or is dropped
struct RunTimer {
    span: Span,
    started: Instant,
}

impl RunTimer {
    fn start(span: Span) -> Self {
        debug!(parent: &span, "run started");
        Self {
            span,
            started: Instant::now(),
        }
    }
}

impl Drop for RunTimer {
    fn drop(&mut self) {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        debug!(parent: &self.span, elapsed_ms, "run finished");
    }
}
