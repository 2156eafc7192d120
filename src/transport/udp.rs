//! UDP transport for DNS queries.
//!
//! Each query gets its own ephemeral socket connected to the upstream, so
//! the kernel drops datagrams from anyone else. Replies that are too short
//! or carry a different transaction ID are ignored and we keep waiting;
//! the caller bounds the wait.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::UdpSocket;
use tracing::trace;

use super::MAX_DNS_PACKET_SIZE;
use crate::dns::HEADER_LEN;

/// Send `query` to `upstream` and wait for the matching reply.
pub async fn exchange(upstream: SocketAddr, query: &[u8]) -> io::Result<Vec<u8>> {
    let local: SocketAddr = if upstream.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };

    let socket = UdpSocket::bind(local).await?;
    socket.connect(upstream).await?;
    socket.send(query).await?;

    let mut buf = [0u8; MAX_DNS_PACKET_SIZE];

    loop {
        let len = socket.recv(&mut buf).await?;

        if len < HEADER_LEN {
            continue;
        }

        if buf.get(..2) != query.get(..2) {
            trace!(%upstream, "dropping reply with foreign transaction id");
            continue;
        }

        return Ok(buf[..len].to_vec());
    }
}
