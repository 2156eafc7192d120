//! Comparison of a fresh run against the records currently published.
//!
//! The published chain is read breadth first from its root record. Lookup
//! failures are collected, never raised: the comparison is informational
//! and must not change the outcome of a run.

use std::collections::{BTreeSet, VecDeque};

use ipnet::IpNet;
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use crate::address::NetworkAddress;
use crate::dns::RecordType;
use crate::resolver::Resolve;
use crate::spf::{Mechanism, SpfRecord, normalize_domain};

/// Upper bound on records read from one published chain.
pub const MAX_PUBLISHED_RECORDS: usize = 64;

#[derive(Debug, Default)]
pub struct PublishedPolicy {
    pub prefixes: Vec<IpNet>,
    /// Names whose records were read.
    pub records: Vec<String>,
    pub problems: Vec<String>,
}

/// Prefixes on one side of the comparison only, sorted.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PublishedDiff {
    /// Generated but not published.
    pub missing: Vec<IpNet>,
    /// Published but no longer generated.
    pub extra: Vec<IpNet>,
}

impl PublishedDiff {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }
}

/// Collect the `ip4`/`ip6` prefixes reachable from `root` through includes.
pub async fn fetch_published<R: Resolve>(resolver: &R, root: &str) -> PublishedPolicy {
    let mut policy = PublishedPolicy::default();
    let mut seen = FxHashSet::default();
    let mut queue = VecDeque::from([normalize_domain(root)]);

    while let Some(name) = queue.pop_front() {
        if !seen.insert(name.clone()) {
            continue;
        }
        if seen.len() > MAX_PUBLISHED_RECORDS {
            policy.problem(format!("stopped after {MAX_PUBLISHED_RECORDS} records"));
            break;
        }

        let answers = match resolver.query(&name, RecordType::Txt).await {
            Ok(answers) => answers,
            Err(err) => {
                policy.problem(format!("TXT lookup for {name} failed: {err}"));
                continue;
            }
        };
        let Some(record) = SpfRecord::select(&answers) else {
            policy.problem(format!("{name} has no SPF record"));
            continue;
        };

        for token in record.text().split_whitespace().skip(1) {
            match Mechanism::parse(token) {
                Ok(Mechanism::Ip4(network) | Mechanism::Ip6(network)) => {
                    policy.prefixes.push(network)
                }
                Ok(Mechanism::Include(target)) => queue.push_back(target),
                Ok(_) => {}
                Err(err) => policy.problem(format!("{name}: {err}")),
            }
        }
        debug!(%name, "read published record");
        policy.records.push(name);
    }

    policy
}

impl PublishedPolicy {
    fn problem(&mut self, message: String) {
        warn!("published policy: {message}");
        self.problems.push(message);
    }
}

pub fn compare(generated: &[NetworkAddress], published: &[IpNet]) -> PublishedDiff {
    let generated: BTreeSet<IpNet> = generated.iter().map(NetworkAddress::network).collect();
    let published: BTreeSet<IpNet> = published.iter().map(IpNet::trunc).collect();

    PublishedDiff {
        missing: generated.difference(&published).copied().collect(),
        extra: published.difference(&generated).copied().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Origin;
    use crate::resolver::mock::MockResolver;

    fn net(text: &str) -> IpNet {
        text.parse().unwrap()
    }

    #[tokio::test]
    async fn fetch_published_follows_segment_chain() {
        let resolver = MockResolver::new();
        resolver
            .txt("_spf.example.com", "v=spf1 ip4:192.0.2.0/24 include:spf1.example.com")
            .txt("spf1.example.com", "v=spf1 ip6:2001:db8::/32 include:_spf.example.com ~all");

        let policy = fetch_published(&resolver, "_spf.example.com").await;

        assert_eq!(policy.prefixes, vec![net("192.0.2.0/24"), net("2001:db8::/32")]);
        assert_eq!(policy.records, vec!["_spf.example.com", "spf1.example.com"]);
        assert!(policy.problems.is_empty());
    }

    #[tokio::test]
    async fn fetch_published_collects_problems() {
        let resolver = MockResolver::new();
        resolver
            .txt("_spf.example.com", "v=spf1 ip4:192.0.2.1 ip6:bogus include:spf1.example.com")
            .txt("spf1.example.com", "not an spf record");

        let policy = fetch_published(&resolver, "_spf.example.com").await;

        assert_eq!(policy.prefixes, vec![net("192.0.2.1/32")]);
        assert_eq!(policy.problems.len(), 2);
    }

    #[tokio::test]
    async fn fetch_published_with_nothing_published() {
        let resolver = MockResolver::new();

        let policy = fetch_published(&resolver, "_spf.example.com").await;

        assert!(policy.prefixes.is_empty());
        assert!(policy.records.is_empty());
        assert_eq!(policy.problems.len(), 1);
    }

    #[test]
    fn compare_reports_both_sides_sorted() {
        let generated = vec![
            NetworkAddress::new(net("198.51.100.0/24"), Origin::Priority(0)),
            NetworkAddress::new(net("2001:db8::/32"), Origin::Discovered),
            NetworkAddress::new(net("192.0.2.1/32"), Origin::Discovered),
        ];
        let published = vec![net("192.0.2.1/32"), net("203.0.113.9/32"), net("10.0.0.0/8")];

        let diff = compare(&generated, &published);

        assert_eq!(diff.missing, vec![net("198.51.100.0/24"), net("2001:db8::/32")]);
        assert_eq!(diff.extra, vec![net("10.0.0.0/8"), net("203.0.113.9/32")]);
        assert!(!diff.is_empty());
    }

    #[test]
    fn compare_identical_sets_is_empty() {
        let generated = vec![NetworkAddress::new(net("192.0.2.0/24"), Origin::Discovered)];

        let diff = compare(&generated, &[net("192.0.2.0/24")]);

        assert!(diff.is_empty());
    }
}
