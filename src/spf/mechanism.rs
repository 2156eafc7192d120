//! SPF record selection and mechanism parsing.

use ipnet::IpNet;

use super::normalize_domain;
use crate::address::{Family, NetworkAddress, parse_prefix};
use crate::dns::Record;
use crate::error::FlattenError;

const VERSION_TAG: &str = "v=spf1";

/// The SPF policy published by one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpfRecord {
    text: String,
}

impl SpfRecord {
    /// Pick the SPF policy out of a domain's TXT answers.
    ///
    /// The fragments of each TXT record are joined before matching; the
    /// first record tagged `v=spf1` wins.
    pub fn select(answers: &[Record]) -> Option<Self> {
        answers
            .iter()
            .filter_map(|record| match record {
                Record::Txt(fragments) => Some(fragments.concat()),
                _ => None,
            })
            .find(|text| is_spf_policy(text))
            .map(|text| Self { text })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Parse every term after the version tag, left to right.
    pub fn mechanisms(&self) -> Result<Vec<Mechanism>, FlattenError> {
        self.text
            .split_whitespace()
            .skip(1)
            .map(Mechanism::parse)
            .collect()
    }
}

fn is_spf_policy(text: &str) -> bool {
    let text = text.trim_start();
    match text.get(..VERSION_TAG.len()) {
        Some(tag) if tag.eq_ignore_ascii_case(VERSION_TAG) => text[VERSION_TAG.len()..]
            .chars()
            .next()
            .is_none_or(char::is_whitespace),
        _ => false,
    }
}

/// Target and optional dual-cidr lengths of an `a` or `mx` mechanism.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostSpec {
    pub target: Option<String>,
    pub v4_len: Option<u8>,
    pub v6_len: Option<u8>,
}

impl HostSpec {
    /// The explicit target, or the domain whose policy holds the mechanism.
    pub fn target_or<'a>(&'a self, domain: &'a str) -> &'a str {
        self.target.as_deref().unwrap_or(domain)
    }

    /// Widen a resolved host address to the mechanism's cidr length, if any.
    pub fn widen(&self, addr: NetworkAddress) -> NetworkAddress {
        let len = match addr.family() {
            Family::V4 => self.v4_len,
            Family::V6 => self.v6_len,
        };

        match len.and_then(|len| IpNet::new(addr.network().addr(), len).ok()) {
            Some(network) => NetworkAddress::new(network, addr.origin()),
            None => addr,
        }
    }
}

/// One term of an SPF record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mechanism {
    Ip4(IpNet),
    Ip6(IpNet),
    Include(String),
    A(HostSpec),
    Mx(HostSpec),
    Ptr(Option<String>),
    /// Contributes no addresses: `all`, `exists`, modifiers, macro targets,
    /// directives qualified with `-`, `~` or `?`, unknown terms.
    Ignored(String),
}

impl Mechanism {
    pub fn parse(token: &str) -> Result<Self, FlattenError> {
        let body = match token.as_bytes().first() {
            Some(b'+') => &token[1..],
            Some(b'-' | b'~' | b'?') => return Ok(Mechanism::Ignored(token.to_string())),
            _ => token,
        };

        let split = body.find([':', '/', '=']).unwrap_or(body.len());
        let (name, rest) = body.split_at(split);

        // Modifiers (redirect=, exp=) and macro-expanded targets cannot be
        // resolved ahead of time.
        if rest.starts_with('=') || rest.contains('%') {
            return Ok(Mechanism::Ignored(token.to_string()));
        }

        match name.to_ascii_lowercase().as_str() {
            "ip4" => parse_ip(token, rest, Family::V4).map(Mechanism::Ip4),
            "ip6" => parse_ip(token, rest, Family::V6).map(Mechanism::Ip6),
            "include" => parse_target(token, rest).map(Mechanism::Include),
            "a" => parse_host_spec(token, rest).map(Mechanism::A),
            "mx" => parse_host_spec(token, rest).map(Mechanism::Mx),
            "ptr" if rest.is_empty() => Ok(Mechanism::Ptr(None)),
            "ptr" => parse_target(token, rest).map(|target| Mechanism::Ptr(Some(target))),
            _ => Ok(Mechanism::Ignored(token.to_string())),
        }
    }
}

fn parse_ip(token: &str, rest: &str, family: Family) -> Result<IpNet, FlattenError> {
    let value = rest
        .strip_prefix(':')
        .ok_or_else(|| FlattenError::invalid(token, "missing `:` before the address"))?;

    parse_prefix(value, family).map_err(|reason| FlattenError::invalid(token, reason))
}

fn parse_target(token: &str, rest: &str) -> Result<String, FlattenError> {
    rest.strip_prefix(':')
        .filter(|target| !target.is_empty())
        .map(normalize_domain)
        .ok_or_else(|| FlattenError::invalid(token, "missing target domain"))
}

/// Parse `[:domain][/cidr4][//cidr6]`.
fn parse_host_spec(token: &str, rest: &str) -> Result<HostSpec, FlattenError> {
    let (target, cidr) = match rest.strip_prefix(':') {
        Some(spec) => {
            let (domain, cidr) = spec.split_at(spec.find('/').unwrap_or(spec.len()));
            if domain.is_empty() {
                return Err(FlattenError::invalid(token, "missing target domain"));
            }
            (Some(normalize_domain(domain)), cidr)
        }
        None => (None, rest),
    };

    let (v4, v6) = match cidr.strip_prefix("//") {
        Some(v6) => (None, Some(v6)),
        None => match cidr.strip_prefix('/') {
            Some(lens) => match lens.split_once("//") {
                Some((v4, v6)) => (Some(v4), Some(v6)),
                None => (Some(lens), None),
            },
            None if cidr.is_empty() => (None, None),
            None => return Err(FlattenError::invalid(token, "unexpected trailing text")),
        },
    };

    Ok(HostSpec {
        target,
        v4_len: v4.map(|len| parse_len(token, len, 32)).transpose()?,
        v6_len: v6.map(|len| parse_len(token, len, 128)).transpose()?,
    })
}

fn parse_len(token: &str, text: &str, max: u8) -> Result<u8, FlattenError> {
    text.parse::<u8>()
        .ok()
        .filter(|len| *len <= max)
        .ok_or_else(|| FlattenError::invalid(token, format!("cidr length must be 0-{max}")))
}
