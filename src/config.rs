//! Run configuration.
//!
//! Loaded from a YAML file layered over built-in defaults; command line
//! overrides are merged last.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::spf::{DEFAULT_MAX_LOOKUPS, normalize_domain};

pub const DEFAULT_CONFIG_FILE: &str = "spf-flattener-config.yaml";

const DNS_PORT: u16 = 53;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config file {} not found", path.display())]
    Missing { path: PathBuf },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.to_string(),
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Zone the flattened records are published under.
    pub target_domain: String,

    /// Domain holding the unflattened policy. Defaults to
    /// `spf-unflat.<targetDomain>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_domain: Option<String>,

    /// CIDRs, addresses or domains always published first, in this order.
    pub priority_entries: Vec<String>,

    pub concurrency_limit: usize,
    pub max_lookups: usize,
    pub upstream: String,
    pub timeout_secs: u64,
    pub record_ttl: u32,
    pub compare_published: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_domain: String::new(),
            source_domain: None,
            priority_entries: Vec::new(),
            concurrency_limit: 4,
            max_lookups: DEFAULT_MAX_LOOKUPS,
            upstream: "8.8.8.8:53".to_string(),
            timeout_secs: 5,
            record_ttl: 600,
            compare_published: true,
        }
    }
}

/// Values given on the command line, which win over the file.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_domain: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,
}

/// Load and validate the configuration.
///
/// Without an explicit `path` the default file is read if present. An
/// explicit path that does not exist is an error.
pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Config, ConfigError> {
    let path = match path {
        Some(path) if !path.exists() => {
            return Err(ConfigError::Missing {
                path: path.to_path_buf(),
            });
        }
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(DEFAULT_CONFIG_FILE),
    };

    let mut config: Config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Yaml::file(&path))
        .merge(Serialized::globals(overrides))
        .extract()?;

    config.default_zero_limits();
    config.validate()?;
    Ok(config)
}

impl Config {
    /// A zero `concurrencyLimit` or `maxLookups` in the file means "use the
    /// default".
    fn default_zero_limits(&mut self) {
        let defaults = Config::default();
        if self.concurrency_limit == 0 {
            self.concurrency_limit = defaults.concurrency_limit;
        }
        if self.max_lookups == 0 {
            self.max_lookups = defaults.max_lookups;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if normalize_domain(&self.target_domain).is_empty() {
            return Err(invalid("targetDomain", "must be set"));
        }
        if matches!(&self.source_domain, Some(source) if normalize_domain(source).is_empty()) {
            return Err(invalid("sourceDomain", "must not be empty"));
        }
        if self.concurrency_limit == 0 {
            return Err(invalid("concurrencyLimit", "must be at least 1"));
        }
        if self.max_lookups == 0 {
            return Err(invalid("maxLookups", "must be at least 1"));
        }
        if self.timeout_secs == 0 {
            return Err(invalid("timeoutSecs", "must be at least 1"));
        }
        if let Some(position) = self.priority_entries.iter().position(|e| e.trim().is_empty()) {
            return Err(invalid(
                "priorityEntries",
                format!("entry {position} is empty"),
            ));
        }

        self.upstream_addr().map(|_| ())
    }

    /// The upstream resolver; the port defaults to 53.
    pub fn upstream_addr(&self) -> Result<SocketAddr, ConfigError> {
        let text = self.upstream.trim();
        text.parse::<SocketAddr>()
            .or_else(|_| text.parse::<IpAddr>().map(|ip| SocketAddr::new(ip, DNS_PORT)))
            .map_err(|_| invalid("upstream", format!("`{text}` is not an IP address")))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn zone(&self) -> String {
        normalize_domain(&self.target_domain)
    }

    pub fn source_domain(&self) -> String {
        match &self.source_domain {
            Some(source) => normalize_domain(source),
            None => format!("spf-unflat.{}", self.zone()),
        }
    }
}
