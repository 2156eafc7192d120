//! TCP transport for DNS queries.
//!
//! Used when a UDP reply was truncated. TCP DNS messages are prefixed
//! with a 2-byte big-endian length.

use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Send `query` to `upstream` over a fresh connection and return the reply
/// without its length prefix.
pub async fn exchange(upstream: SocketAddr, query: &[u8]) -> io::Result<Vec<u8>> {
    let len = u16::try_from(query.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "query exceeds 65535 bytes"))?;

    let mut framed = Vec::with_capacity(2 + query.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(query);

    let mut stream = TcpStream::connect(upstream).await?;
    stream.write_all(&framed).await?;

    read_dns_message(&mut stream).await
}

/// Read a length-prefixed DNS message from a TCP stream.
async fn read_dns_message(stream: &mut TcpStream) -> io::Result<Vec<u8>> {
    let mut prefix = [0u8; 2];
    stream.read_exact(&mut prefix).await?;

    let msg_len = u16::from_be_bytes(prefix) as usize;
    let mut buf = vec![0u8; msg_len];
    stream.read_exact(&mut buf).await?;

    Ok(buf)
}
