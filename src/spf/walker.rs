//! Recursive expansion of an SPF include chain.
//!
//! A [`Flattener`] walks one domain's policy, resolving every mechanism to
//! literal prefixes. Sibling mechanisms are resolved concurrently, and every
//! DNS query waits for a permit from a shared semaphore. The lookup budget
//! and visited set are shared by all branches of the walk.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, join_all, try_join_all};
use tokio::sync::Semaphore;
use tracing::{debug, trace, warn};

use super::budget::{LookupBudget, Visit};
use super::mechanism::{HostSpec, Mechanism, SpfRecord};
use super::normalize_domain;
use crate::address::{NetworkAddress, Origin};
use crate::dns::{Record, RecordType};
use crate::error::FlattenError;
use crate::resolver::{DnsError, Resolve};

/// Record types queried for a host name.
const HOST_RECORD_TYPES: [RecordType; 2] = [RecordType::A, RecordType::Aaaa];

/// A condition that truncated part of the walk without failing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// The domain was already walked in this run.
    Cycle { domain: String },
    /// The domain's policy includes itself.
    SelfInclude { domain: String },
    /// The domain publishes no `v=spf1` record.
    NoSpfRecord { domain: String },
    /// A `ptr` mechanism was replaced by the target's A/AAAA records.
    PtrApproximated { domain: String, target: String },
    HostUnresolved {
        name: String,
        record_type: RecordType,
        reason: String,
    },
    MxHostSkipped {
        domain: String,
        host: String,
        reason: String,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::Cycle { domain } => write!(f, "{domain} already visited, skipping"),
            Warning::SelfInclude { domain } => write!(f, "{domain} includes itself, skipping"),
            Warning::NoSpfRecord { domain } => write!(f, "{domain} has no SPF record"),
            Warning::PtrApproximated { domain, target } => write!(
                f,
                "ptr in {domain} approximated by the addresses of {target}"
            ),
            Warning::HostUnresolved {
                name,
                record_type,
                reason,
            } => write!(f, "{record_type} lookup for {name} failed: {reason}"),
            Warning::MxHostSkipped {
                domain,
                host,
                reason,
            } => write!(f, "skipping mail exchanger {host} of {domain}: {reason}"),
        }
    }
}

/// Expands SPF policies to literal prefixes for one run.
pub struct Flattener<'r, R> {
    resolver: &'r R,
    budget: LookupBudget,
    limiter: Semaphore,
    warnings: Mutex<Vec<Warning>>,
}

impl<'r, R: Resolve> Flattener<'r, R> {
    pub fn new(resolver: &'r R, max_lookups: usize, concurrency_limit: usize) -> Self {
        Self {
            resolver,
            budget: LookupBudget::new(max_lookups),
            limiter: Semaphore::new(concurrency_limit.max(1)),
            warnings: Mutex::new(Vec::new()),
        }
    }

    /// Chain lookups spent so far.
    pub fn lookups(&self) -> usize {
        self.budget.count()
    }

    pub fn max_lookups(&self) -> usize {
        self.budget.max_lookups()
    }

    pub fn warnings(&self) -> Vec<Warning> {
        self.lock_warnings().clone()
    }

    pub fn into_warnings(self) -> Vec<Warning> {
        self.warnings
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Walk `domain`'s policy and everything it includes.
    ///
    /// A domain already walked in this run yields nothing. Fails when the
    /// lookup budget is spent, a TXT or MX lookup fails, or a policy holds a
    /// malformed literal. `root` is the domain the walk started from.
    pub fn flatten<'a>(
        &'a self,
        domain: &'a str,
        root: &'a str,
        origin: Origin,
    ) -> BoxFuture<'a, Result<Vec<NetworkAddress>, FlattenError>> {
        async move {
            let domain = normalize_domain(domain);

            match self.budget.enter(&domain)? {
                Visit::Revisit => {
                    self.warn(Warning::Cycle { domain });
                    return Ok(Vec::new());
                }
                Visit::First { count } => {
                    debug!(%domain, root, count, max = self.budget.max_lookups(), "walking policy");
                }
            }

            let answers = self
                .query(&domain, RecordType::Txt)
                .await
                .map_err(|err| FlattenError::dns(&domain, RecordType::Txt, err))?;

            let Some(record) = SpfRecord::select(&answers) else {
                self.warn(Warning::NoSpfRecord { domain });
                return Ok(Vec::new());
            };
            trace!(%domain, policy = record.text(), "selected policy");

            let mechanisms = record.mechanisms()?;
            let resolved = try_join_all(
                mechanisms
                    .iter()
                    .map(|mechanism| self.resolve_mechanism(mechanism, &domain, root, origin)),
            )
            .await?;

            Ok(resolved.into_iter().flatten().collect())
        }
        .boxed()
    }

    async fn resolve_mechanism(
        &self,
        mechanism: &Mechanism,
        domain: &str,
        root: &str,
        origin: Origin,
    ) -> Result<Vec<NetworkAddress>, FlattenError> {
        match mechanism {
            Mechanism::Ip4(network) | Mechanism::Ip6(network) => {
                Ok(vec![NetworkAddress::new(*network, origin)])
            }
            Mechanism::Include(target) if target == domain => {
                self.warn(Warning::SelfInclude {
                    domain: domain.to_string(),
                });
                Ok(Vec::new())
            }
            Mechanism::Include(target) => self.flatten(target, root, origin).await,
            Mechanism::A(spec) => {
                let addrs = self.resolve_host(spec.target_or(domain), origin).await?;
                Ok(addrs.into_iter().map(|addr| spec.widen(addr)).collect())
            }
            Mechanism::Mx(spec) => self.resolve_mx(spec, domain, origin).await,
            Mechanism::Ptr(target) => {
                let target = target.as_deref().unwrap_or(domain);
                self.warn(Warning::PtrApproximated {
                    domain: domain.to_string(),
                    target: target.to_string(),
                });
                self.resolve_host(target, origin).await
            }
            Mechanism::Ignored(token) => {
                trace!(domain, token = token.as_str(), "term contributes no addresses");
                Ok(Vec::new())
            }
        }
    }

    /// Resolve A and AAAA records of `name` into host prefixes.
    ///
    /// For priority entries any failure, or an empty answer, is fatal. For
    /// discovered hosts a failed record type is a warning and contributes
    /// nothing.
    pub async fn resolve_host(
        &self,
        name: &str,
        origin: Origin,
    ) -> Result<Vec<NetworkAddress>, FlattenError> {
        let (addrs, failures) = self.lookup_host(name, origin).await;

        if origin.is_priority() {
            if let Some((record_type, err)) = failures.into_iter().next() {
                return Err(FlattenError::dns(name, record_type, err));
            }
            if addrs.is_empty() {
                return Err(FlattenError::dns(name, RecordType::A, DnsError::NoRecords));
            }
            return Ok(addrs);
        }

        self.warn_unresolved(name, failures);
        Ok(addrs)
    }

    async fn resolve_mx(
        &self,
        spec: &HostSpec,
        domain: &str,
        origin: Origin,
    ) -> Result<Vec<NetworkAddress>, FlattenError> {
        let target = spec.target_or(domain);
        let answers = self
            .query(target, RecordType::Mx)
            .await
            .map_err(|err| FlattenError::dns(target, RecordType::Mx, err))?;

        let hosts: Vec<String> = answers
            .into_iter()
            .filter_map(|record| match record {
                Record::Mx { exchange, .. } => Some(normalize_domain(&exchange)),
                _ => None,
            })
            .collect();
        debug!(target, hosts = hosts.len(), "resolving mail exchangers");

        let lookups = join_all(hosts.iter().map(|host| self.lookup_host(host, origin))).await;

        let mut resolved = Vec::new();
        for (host, (addrs, failures)) in hosts.iter().zip(lookups) {
            if addrs.is_empty() && failures.len() == HOST_RECORD_TYPES.len() {
                let reason = failures
                    .iter()
                    .map(|(record_type, err)| format!("{record_type}: {err}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                self.warn(Warning::MxHostSkipped {
                    domain: target.to_string(),
                    host: host.clone(),
                    reason,
                });
                continue;
            }

            self.warn_unresolved(host, failures);
            resolved.extend(addrs.into_iter().map(|addr| spec.widen(addr)));
        }

        Ok(resolved)
    }

    /// Query A and AAAA concurrently, keeping the addresses and the failures.
    ///
    /// A failed record type contributes no addresses; the other still does.
    async fn lookup_host(
        &self,
        name: &str,
        origin: Origin,
    ) -> (Vec<NetworkAddress>, Vec<(RecordType, DnsError)>) {
        let [a, aaaa] = HOST_RECORD_TYPES;
        let (v4, v6) = futures::join!(self.query(name, a), self.query(name, aaaa));

        let mut addrs = Vec::new();
        let mut failures = Vec::new();

        for (record_type, result) in [(a, v4), (aaaa, v6)] {
            match result {
                Ok(records) => addrs.extend(records.into_iter().filter_map(|record| {
                    match record {
                        Record::A(ip) => Some(NetworkAddress::host(ip.into(), origin)),
                        Record::Aaaa(ip) => Some(NetworkAddress::host(ip.into(), origin)),
                        _ => None,
                    }
                })),
                Err(err) => failures.push((record_type, err)),
            }
        }

        (addrs, failures)
    }

    async fn query(&self, name: &str, record_type: RecordType) -> Result<Vec<Record>, DnsError> {
        // Acquire only fails on a closed semaphore; this one is never closed.
        let _permit = self.limiter.acquire().await;
        self.resolver.query(name, record_type).await
    }

    fn warn_unresolved(&self, name: &str, failures: Vec<(RecordType, DnsError)>) {
        for (record_type, err) in failures {
            self.warn(Warning::HostUnresolved {
                name: name.to_string(),
                record_type,
                reason: err.to_string(),
            });
        }
    }

    fn warn(&self, warning: Warning) {
        warn!("{warning}");
        self.lock_warnings().push(warning);
    }

    fn lock_warnings(&self) -> std::sync::MutexGuard<'_, Vec<Warning>> {
        self.warnings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
