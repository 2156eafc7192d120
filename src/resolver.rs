//! DNS query facade.
//!
//! Everything above this module asks one question at a time through
//! [`Resolve`]: a name and a record type in, the decoded answers out.
//! [`UpstreamResolver`] answers those questions by talking to a recursive
//! resolver over the wire. There are no retries; a failed query is
//! reported once.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::dns::{DnsQuery, DnsResponse, Record, RecordType};
use crate::stats::{Stats, StatsSnapshot};
use crate::transport::{self, Protocol};

const RCODE_NOERROR: u8 = 0;
const RCODE_NXDOMAIN: u8 = 3;

#[derive(Debug, Error)]
pub enum DnsError {
    #[error("query timed out")]
    Timeout,

    #[error("NXDOMAIN: domain does not exist")]
    Nxdomain,

    #[error("server failure (rcode {rcode})")]
    ServerFailure { rcode: u8 },

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("malformed response: {0}")]
    Malformed(&'static str),

    #[error("invalid domain name `{0}`")]
    InvalidName(String),

    #[error("no address records")]
    NoRecords,
}

/// Resolve one name for one record type.
///
/// A name that exists but has no records of the requested type resolves to
/// an empty list, not an error.
pub trait Resolve: Send + Sync {
    fn query(
        &self,
        name: &str,
        record_type: RecordType,
    ) -> impl Future<Output = Result<Vec<Record>, DnsError>> + Send;
}

/// Sends queries to a single upstream recursive resolver.
pub struct UpstreamResolver {
    upstream: SocketAddr,
    timeout: Duration,
    stats: Stats,
}

impl UpstreamResolver {
    pub fn new(upstream: SocketAddr, timeout: Duration) -> Self {
        Self {
            upstream,
            timeout,
            stats: Stats::new(),
        }
    }

    pub fn upstream(&self) -> SocketAddr {
        self.upstream
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    async fn exchange(&self, name: &str, record_type: RecordType) -> Result<Vec<Record>, DnsError> {
        let query = DnsQuery::new(rand::random(), name, record_type);
        let bytes = query.to_bytes()?;

        let (reply, protocol) = transport::exchange(self.upstream, &bytes, self.timeout).await?;
        if protocol == Protocol::Tcp {
            self.stats.record_tcp_fallback();
        }

        let response = DnsResponse::parse(&reply)?;
        if response.id != query.id || !response.is_response() {
            return Err(DnsError::Malformed("reply does not match query"));
        }

        match response.rcode() {
            RCODE_NOERROR => response.records(record_type),
            RCODE_NXDOMAIN => Err(DnsError::Nxdomain),
            rcode => Err(DnsError::ServerFailure { rcode }),
        }
    }
}

impl Resolve for UpstreamResolver {
    async fn query(&self, name: &str, record_type: RecordType) -> Result<Vec<Record>, DnsError> {
        let start = Instant::now();
        let result = self.exchange(name, record_type).await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(records) => {
                self.stats.record_answered(elapsed_ms);
                debug!(name, %record_type, answers = records.len(), elapsed_ms, "query answered");
            }
            Err(err) => {
                self.stats.record_failed(elapsed_ms);
                debug!(name, %record_type, error = %err, elapsed_ms, "query failed");
            }
        }

        result
    }
}
