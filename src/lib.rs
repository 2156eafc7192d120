//! spf-flattener - Flattens SPF include chains into packed TXT records.
//!
//! The library resolves a domain's SPF policy down to literal prefixes
//! within the RFC 7208 lookup budget and packs them into chained records.

pub mod address;
pub mod canonical;
pub mod config;
pub mod dns;
pub mod error;
pub mod flatten;
pub mod published;
pub mod resolver;
pub mod segment;
pub mod spf;
pub mod stats;
pub mod transport;
