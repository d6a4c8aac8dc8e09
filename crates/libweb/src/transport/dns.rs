//! DNS adapter backed by trust-dns

use super::{DnsAnswer, DnsQuery, DnsRecord, DnsTransport};
use crate::config::TransportConfig;
use crate::error::{Result, WebError};
use async_trait::async_trait;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};
use trust_dns_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};
use trust_dns_resolver::proto::rr::{RData, RecordType};
use trust_dns_resolver::system_conf::read_system_conf;
use trust_dns_resolver::TokioAsyncResolver;

/// DNS transport using an async trust-dns resolver
///
/// With an explicit nameserver list in [`TransportConfig`] the resolver talks
/// to exactly those servers; otherwise the system configuration is used.
pub struct ResolverTransport {
    resolver: TokioAsyncResolver,
}

impl ResolverTransport {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let resolver = if config.nameservers.is_empty() {
            let (resolver_config, system_opts) = match read_system_conf() {
                Ok(conf) => conf,
                Err(e) => {
                    warn!(error = %e, "system resolver configuration unavailable, using defaults");
                    (ResolverConfig::default(), ResolverOpts::default())
                }
            };
            TokioAsyncResolver::tokio(resolver_config, resolver_opts(system_opts, config))
        } else {
            let group =
                NameServerConfigGroup::from_ips_clear(&config.nameservers, config.dns_port, true);
            TokioAsyncResolver::tokio(
                ResolverConfig::from_parts(None, vec![], group),
                resolver_opts(ResolverOpts::default(), config),
            )
        };

        Ok(Self { resolver })
    }
}

/// Apply the transport timeout and disable search-domain expansion
fn resolver_opts(mut opts: ResolverOpts, config: &TransportConfig) -> ResolverOpts {
    opts.timeout = Duration::from_secs(config.timeout_secs);
    opts.ndots = 0;
    opts
}

#[async_trait]
impl DnsTransport for ResolverTransport {
    async fn query(&self, query: &DnsQuery) -> Result<DnsAnswer> {
        let record_type = RecordType::from_str(&query.record_type).map_err(|_| {
            WebError::Configuration(format!("unknown DNS record type '{}'", query.record_type))
        })?;

        debug!(name = %query.name, rrtype = %record_type, "resolving");
        let lookup = match self.resolver.lookup(query.name.as_str(), record_type).await {
            Ok(lookup) => lookup,
            Err(e) => return answer_for_error(e),
        };

        let records: Vec<DnsRecord> = lookup
            .record_iter()
            .filter(|record| record.record_type() == record_type)
            .filter_map(|record| {
                record.data().map(|data| DnsRecord {
                    name: record.name().to_string(),
                    ttl: record.ttl(),
                    record_type: record.record_type().to_string(),
                    rdata: render_rdata(data),
                })
            })
            .collect();

        if records.is_empty() {
            Ok(DnsAnswer::NxDomain)
        } else {
            Ok(DnsAnswer::Records(records))
        }
    }
}

fn answer_for_error(err: ResolveError) -> Result<DnsAnswer> {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => Ok(DnsAnswer::NxDomain),
        ResolveErrorKind::Timeout => Err(WebError::Transport {
            message: err.to_string(),
            retryable: true,
        }),
        _ => Err(WebError::transport(err.to_string())),
    }
}

/// Presentation text of a record's data
///
/// TXT character-strings are concatenated without quoting; every other
/// type uses the resolver's presentation format.
fn render_rdata(data: &RData) -> String {
    match data {
        RData::TXT(txt) => txt
            .txt_data()
            .iter()
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use trust_dns_resolver::proto::op::{Query, ResponseCode};
    use trust_dns_resolver::proto::rr::rdata::{A, TXT};
    use trust_dns_resolver::Name;

    #[test]
    fn test_render_txt_joins_chunks() {
        let txt = TXT::new(vec!["v=spf1 ".to_string(), "-all".to_string()]);
        assert_eq!(render_rdata(&RData::TXT(txt)), "v=spf1 -all");
    }

    #[test]
    fn test_render_a_record() {
        let a = RData::A(A(Ipv4Addr::new(127, 0, 0, 2)));
        assert_eq!(render_rdata(&a), "127.0.0.2");
    }

    #[tokio::test]
    async fn test_unknown_record_type_is_configuration_error() {
        let config = TransportConfig::default()
            .with_nameservers(vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);
        let transport = ResolverTransport::new(&config).unwrap();
        let err = transport
            .query(&DnsQuery {
                name: "example.com.".to_string(),
                record_type: "NOPE".to_string(),
            })
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_resolver_opts_follow_transport_config() {
        let mut system = ResolverOpts::default();
        system.ndots = 5;
        system.timeout = Duration::from_secs(2);

        let opts = resolver_opts(system, &TransportConfig::default().with_timeout(7));
        assert_eq!(opts.timeout, Duration::from_secs(7));
        assert_eq!(opts.ndots, 0);
    }

    #[test]
    fn test_no_records_is_nxdomain() {
        let query = Query::query(Name::from_ascii("nx.example.").unwrap(), RecordType::A);
        let err = ResolveError::from(ResolveErrorKind::NoRecordsFound {
            query: Box::new(query),
            soa: None,
            negative_ttl: None,
            response_code: ResponseCode::NXDomain,
            trusted: true,
        });
        assert_eq!(answer_for_error(err).unwrap(), DnsAnswer::NxDomain);
    }

    #[test]
    fn test_timeout_is_retryable_transport_error() {
        let err = answer_for_error(ResolveError::from(ResolveErrorKind::Timeout)).unwrap_err();
        assert!(matches!(err, WebError::Transport { retryable: true, .. }));
        assert!(err.is_retryable());

        let other = answer_for_error(ResolveError::from(ResolveErrorKind::NoConnections))
            .unwrap_err();
        assert!(matches!(other, WebError::Transport { .. }));
        assert!(!other.is_retryable());
    }
}
