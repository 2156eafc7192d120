//! Resolved network prefixes and where they came from.

use std::fmt;
use std::net::IpAddr;

use ipnet::IpNet;

/// Address family of a prefix. IPv4 sorts before IPv6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    /// The SPF directive name for this family.
    pub fn directive(self) -> &'static str {
        match self {
            Family::V4 => "ip4",
            Family::V6 => "ip6",
        }
    }

    fn of(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }
}

/// Provenance of an address.
///
/// The rank of a priority entry is its position in the configured list, so
/// output order follows the configuration no matter in which order the
/// lookups complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Discovered,
    Priority(usize),
}

impl Origin {
    pub fn is_priority(self) -> bool {
        matches!(self, Origin::Priority(_))
    }
}

/// One resolved prefix.
///
/// The network is always stored with its host bits cleared, so two values
/// describe the same prefix exactly when their networks compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkAddress {
    network: IpNet,
    origin: Origin,
}

impl NetworkAddress {
    pub fn new(network: IpNet, origin: Origin) -> Self {
        Self {
            network: network.trunc(),
            origin,
        }
    }

    /// A single host: `/32` for IPv4, `/128` for IPv6.
    pub fn host(ip: IpAddr, origin: Origin) -> Self {
        Self::new(IpNet::from(ip), origin)
    }

    pub fn network(&self) -> IpNet {
        self.network
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn is_priority(&self) -> bool {
        self.origin.is_priority()
    }

    pub fn priority_rank(&self) -> Option<usize> {
        match self.origin {
            Origin::Priority(rank) => Some(rank),
            Origin::Discovered => None,
        }
    }

    pub fn family(&self) -> Family {
        Family::of(self.network.addr())
    }

    /// The address as a 16-byte value, IPv4 mapped into IPv6 space.
    pub fn octets(&self) -> [u8; 16] {
        match self.network.addr() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
            IpAddr::V6(v6) => v6.octets(),
        }
    }

    /// Render as an SPF directive, e.g. `ip4:192.0.2.0/24`.
    pub fn spf_token(&self) -> String {
        format!("{}:{}", self.family().directive(), self.network)
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.network.fmt(f)
    }
}

/// Parse the value of an `ip4:` or `ip6:` directive.
///
/// Accepts a bare address (host prefix) or an `address/length` pair. The
/// address family must match `family`.
pub fn parse_prefix(text: &str, family: Family) -> Result<IpNet, String> {
    let network =
        parse_literal(text).ok_or_else(|| format!("`{text}` is not an address or prefix"))?;

    let found = Family::of(network.addr());
    if found != family {
        return Err(format!(
            "{} literal under {}",
            found.directive(),
            family.directive()
        ));
    }

    Ok(network)
}

/// Parse an address or CIDR prefix of either family, host bits cleared.
pub fn parse_literal(text: &str) -> Option<IpNet> {
    let network = match text.split_once('/') {
        Some((addr, len)) => {
            let addr: IpAddr = addr.parse().ok()?;
            let len: u8 = len.parse().ok()?;
            IpNet::new(addr, len).ok()?
        }
        None => IpNet::from(text.parse::<IpAddr>().ok()?),
    };

    Some(network.trunc())
}
