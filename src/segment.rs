//! Packing of the canonical address list into chained TXT records.
//!
//! Segments are filled greedily in order. Every segment but the last ends
//! with `include:` of the next one, and the last ends with `~all`. The room
//! for the forwarding include is reserved before each token is added, so a
//! segment never has to be reopened.

use std::fmt;

use tracing::debug;

use crate::address::NetworkAddress;
use crate::error::FlattenError;

/// Maximum length of one TXT character-string.
pub const MAX_RECORD_LENGTH: usize = 255;

const VERSION: &str = "v=spf1";
const TERMINAL_QUALIFIER: &str = "~all";

/// One packed policy string and its position in the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySegment {
    pub index: usize,
    pub text: String,
}

impl PolicySegment {
    /// Name of this segment relative to the zone: `_spf`, then `spf1`, `spf2`, ...
    pub fn relative_name(&self) -> String {
        relative_name(self.index)
    }

    pub fn record_name(&self, zone: &str) -> String {
        format!("{}.{zone}", self.relative_name())
    }

    /// Render as a zone file line relative to the zone origin.
    pub fn zone_line(&self, ttl: u32) -> String {
        format!("{} {ttl} IN TXT \"{}\"", self.relative_name(), self.text)
    }
}

impl fmt::Display for PolicySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn relative_name(index: usize) -> String {
    match index {
        0 => "_spf".to_string(),
        n => format!("spf{n}"),
    }
}

pub struct SegmentPacker {
    zone: String,
    max_len: usize,
}

impl SegmentPacker {
    pub fn new(zone: impl Into<String>) -> Self {
        Self::with_max_len(zone, MAX_RECORD_LENGTH)
    }

    pub fn with_max_len(zone: impl Into<String>, max_len: usize) -> Self {
        Self {
            zone: zone.into(),
            max_len,
        }
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Pack `addresses`, in order, into as few segments as the length allows.
    ///
    /// An empty list yields a single `v=spf1 ~all` segment.
    pub fn pack(&self, addresses: &[NetworkAddress]) -> Result<Vec<PolicySegment>, FlattenError> {
        let mut segments = Vec::new();
        let mut current = String::from(VERSION);

        for addr in addresses {
            let token = addr.spf_token();

            if !self.fits(&current, &token, segments.len() + 1) {
                if current == VERSION {
                    return Err(self.overflow(token));
                }

                let forward = self.forward(segments.len() + 1);
                current.push(' ');
                current.push_str(&forward);
                segments.push(PolicySegment {
                    index: segments.len(),
                    text: std::mem::replace(&mut current, String::from(VERSION)),
                });

                if !self.fits(&current, &token, segments.len() + 1) {
                    return Err(self.overflow(token));
                }
            }

            current.push(' ');
            current.push_str(&token);
        }

        current.push(' ');
        current.push_str(TERMINAL_QUALIFIER);
        segments.push(PolicySegment {
            index: segments.len(),
            text: current,
        });

        debug!(zone = %self.zone, segments = segments.len(), addresses = addresses.len(), "packed policy");
        Ok(segments)
    }

    /// Whether `token` fits in `current` with room left to forward to `next`.
    fn fits(&self, current: &str, token: &str, next: usize) -> bool {
        current.len() + 1 + token.len() + 1 + self.forward(next).len() <= self.max_len
    }

    fn forward(&self, index: usize) -> String {
        format!("include:{}.{}", relative_name(index), self.zone)
    }

    fn overflow(&self, token: String) -> FlattenError {
        let len = VERSION.len() + 1 + token.len() + 1 + self.forward(1).len();
        FlattenError::SegmentOverflow {
            token,
            len,
            max: self.max_len,
        }
    }
}
