use clap::{ArgAction, Parser};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use spf_flattener::config::{self, ConfigError, Overrides};
use spf_flattener::error::FlattenError;
use spf_flattener::flatten::{self, FlattenReport};
use spf_flattener::published;
use spf_flattener::resolver::UpstreamResolver;

#[derive(Parser)]
#[command(name = "spf-flattener")]
#[command(about = "Flattens an SPF include chain into packed TXT records", long_about = None)]
struct Args {
    /// YAML configuration file [default: spf-flattener-config.yaml]
    #[arg(short, long, env = "SPF_FLATTENER_CONFIG")]
    config: Option<PathBuf>,

    /// Upstream DNS server (host:port)
    #[arg(short, long, env = "SPF_FLATTENER_UPSTREAM")]
    upstream: Option<String>,

    /// Zone the flattened records are published under
    #[arg(short, long, env = "SPF_FLATTENER_TARGET")]
    target: Option<String>,

    /// Log more (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Flatten(#[from] FlattenError),

    #[error("failed to write records: {0}")]
    Io(#[from] io::Error),
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn print_records(report: &FlattenReport, ttl: u32) -> io::Result<()> {
    let mut out = io::stdout().lock();
    writeln!(out, "$ORIGIN {}.", report.zone)?;
    for segment in &report.segments {
        writeln!(out, "{}", segment.zone_line(ttl))?;
    }
    out.flush()
}

async fn run(args: Args) -> Result<(), AppError> {
    let overrides = Overrides {
        target_domain: args.target,
        upstream: args.upstream,
    };
    let config = config::load(args.config.as_deref(), &overrides)?;

    let resolver = UpstreamResolver::new(config.upstream_addr()?, config.timeout());
    info!(zone = %config.zone(), upstream = %resolver.upstream(), "flattening");

    let report = flatten::run(&resolver, &config).await?;
    print_records(&report, config.record_ttl)?;

    info!(
        lookups = report.lookups,
        max = report.max_lookups,
        warnings = report.warnings.len(),
        "flattened {} into {} record(s)",
        report.source,
        report.segments.len()
    );

    if config.compare_published {
        let root = format!("_spf.{}", report.zone);
        let live = published::fetch_published(&resolver, &root).await;
        let diff = published::compare(&report.addresses, &live.prefixes);

        if diff.is_empty() {
            info!(%root, records = live.records.len(), "published policy is up to date");
        } else {
            for network in &diff.missing {
                warn!(%network, "not yet published");
            }
            for network in &diff.extra {
                warn!(%network, "published but no longer authorized");
            }
        }
    }

    let stats = resolver.stats();
    info!(
        queries = stats.queries,
        failures = stats.failures,
        tcp_fallbacks = stats.tcp_fallbacks,
        avg_response_ms = stats.avg_response_ms,
        "dns statistics"
    );

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            error!("failed to start runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
