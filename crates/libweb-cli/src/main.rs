//! Command-line runner for libweb job configurations
//!
//! Usage:
//!   libweb job.toml -o ip=8.8.8.8 -c credentials.json

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use libweb::prelude::*;
use std::io::Write;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{debug, info};

/// Runs a job configuration and prints one JSON object per record
#[derive(Parser, Debug)]
#[command(name = "libweb")]
#[command(about = "Declarative DNS/HTTP retrieval with structured extraction")]
#[command(version)]
struct Args {
    /// Job configuration file (.json or .toml)
    config: PathBuf,

    /// Template option as key=value; repeatable
    #[arg(short = 'o', long = "option", value_parser = parse_option)]
    options: Vec<(String, String)>,

    /// Credentials file mapping scheme names to secrets (.json or .toml)
    #[arg(short, long)]
    credentials: Option<PathBuf>,

    /// Fail on the first error instead of ending output quietly
    #[arg(long)]
    strict: bool,

    /// IANA timezone used as the anchor for relative times
    #[arg(long)]
    timezone: Option<String>,

    /// DNS server to query instead of the system resolvers; repeatable
    #[arg(long = "nameserver")]
    nameservers: Vec<IpAddr>,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_option(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Configuration::from_file(&args.config)
        .with_context(|| format!("loading configuration {}", args.config.display()))?;
    let creds = match &args.credentials {
        Some(path) => load_credentials(path)
            .with_context(|| format!("loading credentials {}", path.display()))?,
        None => Credentials::new(),
    };
    let opts: Options = args.options.into_iter().collect();

    let transport = TransportConfig::default()
        .with_timeout(args.timeout)
        .with_nameservers(args.nameservers);
    let mut run = RunOptions::default().with_swallow_failures(!args.strict);
    if let Some(timezone) = args.timezone {
        run = run.with_local_timezone(timezone);
    }

    info!(service = %config.kind, requests = config.requests.len(), "running job");
    let service = Service::with_default_transports(config, &transport)?;
    let mut records = service.records(opts, creds, run);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut count = 0usize;
    while let Some(record) = records.next().await {
        let record = record?;
        serde_json::to_writer(&mut out, &record)?;
        writeln!(out)?;
        count += 1;
    }
    debug!(count, "job finished");

    Ok(())
}
