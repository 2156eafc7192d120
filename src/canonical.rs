//! Deduplication and deterministic ordering of the resolved address set.

use std::cmp::Reverse;

use rustc_hash::FxHashMap;

use crate::address::{Family, NetworkAddress};

/// Deduplicate `addresses` by prefix and sort them into publishing order.
///
/// When the same prefix appears more than once the priority entry wins, the
/// lowest rank first. Priority entries come first by rank, then discovered
/// prefixes: IPv4 before IPv6, ascending by address, then by length.
pub fn canonicalize(addresses: Vec<NetworkAddress>) -> Vec<NetworkAddress> {
    let mut unique: FxHashMap<_, NetworkAddress> = FxHashMap::default();

    for addr in addresses {
        unique
            .entry(addr.network())
            .and_modify(|kept| {
                if preference(&addr) < preference(kept) {
                    *kept = addr;
                }
            })
            .or_insert(addr);
    }

    let mut ordered: Vec<NetworkAddress> = unique.into_values().collect();
    ordered.sort_unstable_by_key(sort_key);
    ordered
}

/// Lower wins when two entries share a prefix.
fn preference(addr: &NetworkAddress) -> (bool, usize) {
    match addr.priority_rank() {
        Some(rank) => (false, rank),
        None => (true, 0),
    }
}

type SortKey = (Reverse<bool>, usize, Family, [u8; 16], u8);

fn sort_key(addr: &NetworkAddress) -> SortKey {
    (
        Reverse(addr.is_priority()),
        addr.priority_rank().unwrap_or(0),
        addr.family(),
        addr.octets(),
        addr.network().prefix_len(),
    )
}
