//! SPF policy expansion.
//!
//! Parses SPF records into mechanisms and walks the include chain of a
//! domain down to literal prefixes, within the RFC 7208 lookup budget.

mod budget;
mod mechanism;
mod walker;

pub use budget::{LookupBudget, Visit};
pub use mechanism::{HostSpec, Mechanism, SpfRecord};
pub use walker::{Flattener, Warning};

/// Default RFC 7208 limit on DNS-querying terms.
pub const DEFAULT_MAX_LOOKUPS: usize = 10;

/// Lowercase a domain name and drop a trailing root dot.
pub fn normalize_domain(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}
