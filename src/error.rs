//! Fatal error conditions of a flattening run.
//!
//! Anything in here aborts the whole run; nothing partial is ever
//! published. Conditions that only truncate a branch (cycles, domains
//! without a policy, unresolvable discovered hosts) are reported as
//! [`Warning`](crate::spf::Warning)s instead.

use thiserror::Error;

use crate::dns::RecordType;
use crate::resolver::DnsError;

#[derive(Debug, Error)]
pub enum FlattenError {
    /// The lookup budget was already spent when `domain` asked for another
    /// chain lookup.
    #[error("lookup limit of {max} reached at {domain} (current count: {count})")]
    LookupLimitExceeded {
        domain: String,
        count: usize,
        max: usize,
    },

    #[error("{record_type} lookup for {name} failed: {source}")]
    DnsResolutionFailed {
        name: String,
        record_type: RecordType,
        #[source]
        source: DnsError,
    },

    #[error("invalid directive `{token}`: {reason}")]
    InvalidDirectiveSyntax { token: String, reason: String },

    #[error("`{token}` cannot fit in a {max}-character record (needs {len})")]
    SegmentOverflow {
        token: String,
        len: usize,
        max: usize,
    },
}

impl FlattenError {
    pub(crate) fn invalid(token: &str, reason: impl Into<String>) -> Self {
        Self::InvalidDirectiveSyntax {
            token: token.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn dns(name: &str, record_type: RecordType, source: DnsError) -> Self {
        Self::DnsResolutionFailed {
            name: name.to_string(),
            record_type,
            source,
        }
    }
}
