//! One complete flattening run.

use futures::future::try_join_all;
use tracing::info;

use crate::address::{NetworkAddress, Origin, parse_literal};
use crate::canonical::canonicalize;
use crate::config::Config;
use crate::error::FlattenError;
use crate::resolver::Resolve;
use crate::segment::{PolicySegment, SegmentPacker};
use crate::spf::{Flattener, Warning, normalize_domain};

/// Everything a run produced, ready for publishing.
#[derive(Debug)]
pub struct FlattenReport {
    /// Zone the segments are published under.
    pub zone: String,
    /// Domain whose policy was walked.
    pub source: String,
    pub addresses: Vec<NetworkAddress>,
    pub segments: Vec<PolicySegment>,
    pub lookups: usize,
    pub max_lookups: usize,
    pub warnings: Vec<Warning>,
}

/// Resolve the priority entries, walk the source policy, then canonicalize
/// and pack the combined address set.
///
/// Any fatal error aborts the run; nothing partial is returned.
pub async fn run<R: Resolve>(resolver: &R, config: &Config) -> Result<FlattenReport, FlattenError> {
    let zone = config.zone();
    let source = config.source_domain();
    let flattener = Flattener::new(resolver, config.max_lookups, config.concurrency_limit);

    info!(entries = config.priority_entries.len(), "resolving priority entries");
    let priority = resolve_priority_entries(&flattener, &config.priority_entries).await?;

    info!(%source, "walking source policy");
    let discovered = flattener
        .flatten(&source, &source, Origin::Discovered)
        .await?;

    let lookups = flattener.lookups();
    info!(
        priority = priority.len(),
        discovered = discovered.len(),
        lookups,
        max = config.max_lookups,
        "resolution complete"
    );

    let addresses = canonicalize(priority.into_iter().chain(discovered).collect());
    let segments = SegmentPacker::new(zone.as_str()).pack(&addresses)?;
    info!(addresses = addresses.len(), segments = segments.len(), %zone, "policy packed");

    Ok(FlattenReport {
        zone,
        source,
        addresses,
        segments,
        lookups,
        max_lookups: flattener.max_lookups(),
        warnings: flattener.into_warnings(),
    })
}

/// Resolve every priority entry concurrently; rank is the configured position.
pub async fn resolve_priority_entries<R: Resolve>(
    flattener: &Flattener<'_, R>,
    entries: &[String],
) -> Result<Vec<NetworkAddress>, FlattenError> {
    let resolved = try_join_all(
        entries
            .iter()
            .enumerate()
            .map(|(rank, entry)| resolve_priority_entry(flattener, rank, entry)),
    )
    .await?;

    Ok(resolved.into_iter().flatten().collect())
}

async fn resolve_priority_entry<R: Resolve>(
    flattener: &Flattener<'_, R>,
    rank: usize,
    entry: &str,
) -> Result<Vec<NetworkAddress>, FlattenError> {
    let entry = entry.trim();
    let origin = Origin::Priority(rank);

    match parse_literal(entry) {
        Some(network) => Ok(vec![NetworkAddress::new(network, origin)]),
        None if entry.contains(['/', ':']) => {
            Err(FlattenError::invalid(entry, "not an address or prefix"))
        }
        None => flattener.resolve_host(&normalize_domain(entry), origin).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::dns::RecordType;
    use crate::resolver::DnsError;
    use crate::resolver::mock::MockResolver;

    fn config(priority: &[&str]) -> Config {
        Config {
            target_domain: "example.com".to_string(),
            priority_entries: priority.iter().map(|e| e.to_string()).collect(),
            ..Config::default()
        }
    }

    fn rendered(report: &FlattenReport) -> Vec<String> {
        report.addresses.iter().map(|a| a.to_string()).collect()
    }

    #[tokio::test]
    async fn run_flattens_and_orders_output() {
        let resolver = MockResolver::new();
        resolver
            .txt("spf-unflat.example.com", "v=spf1 include:_spf.mailer.net a:relay.example.com ~all")
            .txt("_spf.mailer.net", "v=spf1 ip4:3.3.3.3 ip4:1.1.1.1 -all")
            .a("relay.example.com", "2.2.2.2");

        let report = run(&resolver, &config(&["10.11.12.13/24"])).await.unwrap();

        assert_eq!(
            rendered(&report),
            vec!["10.11.12.0/24", "1.1.1.1/32", "2.2.2.2/32", "3.3.3.3/32"]
        );
        assert_eq!(report.addresses[0].priority_rank(), Some(0));
        assert_eq!(report.lookups, 2);
        assert_eq!(report.source, "spf-unflat.example.com");
        assert_eq!(report.segments.len(), 1);
        assert_eq!(
            report.segments[0].text,
            "v=spf1 ip4:10.11.12.0/24 ip4:1.1.1.1/32 ip4:2.2.2.2/32 ip4:3.3.3.3/32 ~all"
        );
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn run_keeps_configured_priority_order() {
        let resolver = MockResolver::new();
        resolver
            .txt("spf-unflat.example.com", "v=spf1 ip4:192.0.2.1 ip4:198.51.100.9")
            .a("relay.example.net", "198.51.100.9")
            .aaaa("relay.example.net", "2001:db8::25");

        let report = run(
            &resolver,
            &config(&["203.0.113.7", "relay.example.net", "10.0.0.0/8"]),
        )
        .await
        .unwrap();

        assert_eq!(
            rendered(&report),
            vec![
                "203.0.113.7/32",
                "198.51.100.9/32",
                "2001:db8::25/128",
                "10.0.0.0/8",
                "192.0.2.1/32",
            ]
        );
    }

    #[tokio::test]
    async fn priority_rank_follows_position_not_completion() {
        let resolver = MockResolver::new();
        resolver
            .txt("spf-unflat.example.com", "v=spf1 ip4:10.0.0.1")
            .a("slow.example.net", "203.0.113.50")
            .delay("slow.example.net", RecordType::A, Duration::from_millis(50))
            .a("fast.example.net", "192.0.2.50");

        let report = run(&resolver, &config(&["slow.example.net", "fast.example.net"]))
            .await
            .unwrap();

        assert_eq!(
            rendered(&report),
            vec!["203.0.113.50/32", "192.0.2.50/32", "10.0.0.1/32"]
        );
        assert_eq!(report.addresses[0].priority_rank(), Some(0));
        assert_eq!(report.addresses[1].priority_rank(), Some(1));
    }

    #[tokio::test]
    async fn run_bounds_in_flight_queries() {
        let resolver = MockResolver::new();
        resolver.txt("spf-unflat.example.com", "v=spf1 ip4:10.0.0.1");
        let entries: Vec<String> = (1..=6).map(|i| format!("relay{i}.example.net")).collect();
        for (i, entry) in entries.iter().enumerate() {
            resolver
                .a(entry, &format!("192.0.2.{}", i + 1))
                .delay(entry, RecordType::A, Duration::from_millis(10))
                .delay(entry, RecordType::Aaaa, Duration::from_millis(10));
        }
        let config = Config {
            concurrency_limit: 3,
            priority_entries: entries,
            ..config(&[])
        };

        let report = run(&resolver, &config).await.unwrap();

        assert_eq!(report.addresses.len(), 7);
        assert_eq!(resolver.peak_in_flight(), 3);
    }

    #[tokio::test]
    async fn run_uses_configured_source_domain() {
        let resolver = MockResolver::new();
        resolver.txt("policy.example.org", "v=spf1 ip6:2001:db8::/48 -all");
        let config = Config {
            source_domain: Some("Policy.Example.org".to_string()),
            ..config(&[])
        };

        let report = run(&resolver, &config).await.unwrap();

        assert_eq!(rendered(&report), vec!["2001:db8::/48"]);
        assert_eq!(
            report.segments[0].text,
            "v=spf1 ip6:2001:db8::/48 ~all"
        );
    }

    #[tokio::test]
    async fn run_aborts_on_unresolvable_priority_domain() {
        let resolver = MockResolver::new();
        resolver.txt("spf-unflat.example.com", "v=spf1 ip4:192.0.2.1");

        let err = run(&resolver, &config(&["gone.example.net"])).await.unwrap_err();

        assert!(matches!(
            err,
            FlattenError::DnsResolutionFailed { ref name, source: DnsError::Nxdomain, .. }
                if name == "gone.example.net"
        ));
        assert_eq!(resolver.count("spf-unflat.example.com", RecordType::Txt), 0);
    }

    #[tokio::test]
    async fn run_rejects_malformed_priority_literal() {
        let resolver = MockResolver::new();

        let err = run(&resolver, &config(&["10.0.0.0/33"])).await.unwrap_err();

        assert!(matches!(err, FlattenError::InvalidDirectiveSyntax { .. }));
    }

    #[tokio::test]
    async fn run_reports_lookup_limit() {
        let resolver = MockResolver::new();
        resolver
            .txt("spf-unflat.example.com", "v=spf1 include:a.example include:b.example")
            .txt("a.example", "v=spf1 ip4:192.0.2.1")
            .txt("b.example", "v=spf1 ip4:192.0.2.2");
        let config = Config {
            max_lookups: 2,
            concurrency_limit: 1,
            ..config(&[])
        };

        let err = run(&resolver, &config).await.unwrap_err();

        assert!(matches!(err, FlattenError::LookupLimitExceeded { count: 2, max: 2, .. }));
    }

    #[tokio::test]
    async fn run_returns_warnings_with_report() {
        let resolver = MockResolver::new();
        resolver
            .txt("spf-unflat.example.com", "v=spf1 include:spf-unflat.example.com ptr:mx.example.com")
            .a("mx.example.com", "192.0.2.25");

        let report = run(&resolver, &config(&[])).await.unwrap();

        assert_eq!(rendered(&report), vec!["192.0.2.25/32"]);
        assert_eq!(report.warnings.len(), 2);
    }
}
