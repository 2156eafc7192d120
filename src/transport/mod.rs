//! Transports for queries to the upstream resolver.
//!
//! A query goes out over UDP first. If the reply comes back with the TC
//! bit set (common for long SPF TXT records) it is retried over TCP.
//! Each leg is bounded by the caller's timeout.

pub mod tcp;
pub mod udp;

/// Maximum size of a DNS packet (with some headroom).
pub const MAX_DNS_PACKET_SIZE: usize = 4096;

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tracing::debug;

use crate::dns::FLAG_TC;
use crate::resolver::DnsError;

/// Transport protocol identifier for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Send an encoded query to `upstream` and return the raw reply together
/// with the protocol that produced it.
pub async fn exchange(
    upstream: SocketAddr,
    query: &[u8],
    timeout: Duration,
) -> Result<(Vec<u8>, Protocol), DnsError> {
    let reply = bounded(timeout, udp::exchange(upstream, query)).await?;
    if !is_truncated(&reply) {
        return Ok((reply, Protocol::Udp));
    }

    debug!(%upstream, "truncated reply over UDP, retrying over TCP");
    let reply = bounded(timeout, tcp::exchange(upstream, query)).await?;

    Ok((reply, Protocol::Tcp))
}

async fn bounded<F>(timeout: Duration, leg: F) -> Result<Vec<u8>, DnsError>
where
    F: Future<Output = io::Result<Vec<u8>>>,
{
    match tokio::time::timeout(timeout, leg).await {
        Ok(reply) => Ok(reply?),
        Err(_) => Err(DnsError::Timeout),
    }
}

fn is_truncated(reply: &[u8]) -> bool {
    reply.len() >= 4 && u16::from_be_bytes([reply[2], reply[3]]) & FLAG_TC != 0
}
