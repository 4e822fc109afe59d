//! Startup configuration
//!
//! Configuration is resolved once before serving, from:
//!
//! - a `.env` file in the working directory, if present, loaded into the
//!   process environment without overriding variables already set
//! - command-line flags, with `EGRESS_BASE` as an env fallback
//! - the `API_KEY` environment variable for the shared secret
//! - an optional YAML settings file for the less frequently changed knobs
//!
//! Deployments written against the older variable names keep working:
//! `BUNGIE_API_KEY` is read when `API_KEY` is unset, and `IPV6` when no base
//! address is given.

use clap::Parser;
use http::header::HeaderName;
use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::proxy::limiter::{ClassQuota, QuotaTable};
use crate::proxy::router::DEFAULT_API_DOMAIN;

/// Environment variable holding the shared upstream credential
pub const API_KEY_ENV: &str = "API_KEY";

/// Older name for [`API_KEY_ENV`]
pub const LEGACY_API_KEY_ENV: &str = "BUNGIE_API_KEY";

/// Older name for the base egress address
pub const LEGACY_EGRESS_BASE_ENV: &str = "IPV6";

/// Errors that stop the process before it starts serving
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("neither API_KEY nor BUNGIE_API_KEY is set")]
    MissingSecret,

    #[error("no egress base address: pass --egress-base or set EGRESS_BASE or IPV6")]
    MissingEgressBase,

    #[error("IPV6 value `{0}` is not an IP address")]
    InvalidEgressBase(String),

    #[error("API_KEY is empty or not a valid header value")]
    InvalidSecret,

    #[error("cannot read settings file {}", path.display())]
    ReadSettings {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings file {}", path.display())]
    ParseSettings {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid probe header name `{0}`")]
    InvalidProbeHeader(String),

    #[error("rate limit for {0} backend must be non-zero")]
    ZeroRateLimit(&'static str),

    #[error("{0} must be at least one second")]
    ZeroDuration(&'static str),
}

/// Command-line flags
#[derive(Debug, Clone, Parser)]
#[command(
    name = "egress-proxy",
    version,
    about = "Reverse proxy that spreads upstream calls across local egress addresses"
)]
pub struct Cli {
    /// Number of sequential egress addresses starting at the base address
    #[arg(short = 'n', long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    pub egress_count: u16,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8082)]
    pub port: u16,

    /// Log every egress address at startup
    #[arg(long)]
    pub print_addrs: bool,

    /// Log per-request dispatch details
    #[arg(short, long)]
    pub verbose: bool,

    /// First egress address; the rest follow sequentially. Falls back to
    /// `IPV6` when unset.
    #[arg(long, env = "EGRESS_BASE")]
    pub egress_base: Option<IpAddr>,

    /// Optional YAML settings file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Per-class token bucket parameters as written in the settings file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitSettings {
    pub per_second: u32,
    pub burst: u32,
}

impl LimitSettings {
    fn to_quota(self, class: &'static str) -> Result<ClassQuota, ConfigError> {
        let per_second = NonZeroU32::new(self.per_second).ok_or(ConfigError::ZeroRateLimit(class))?;
        let burst = NonZeroU32::new(self.burst).ok_or(ConfigError::ZeroRateLimit(class))?;
        Ok(ClassQuota { per_second, burst })
    }
}

impl From<ClassQuota> for LimitSettings {
    fn from(quota: ClassQuota) -> Self {
        Self {
            per_second: quota.per_second.get(),
            burst: quota.burst.get(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitSettings {
    pub stats: LimitSettings,
    pub web: LimitSettings,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            stats: ClassQuota::STATS.into(),
            web: ClassQuota::WEB.into(),
        }
    }
}

/// Settings file contents. Every field is optional.
///
/// ```yaml
/// api_domain: bungie.net
/// probe_header: x-betteruptime-probe
/// request_timeout_secs: 60
/// stats_interval_secs: 10
/// rate_limits:
///   stats: { per_second: 30, burst: 90 }
///   web: { per_second: 12, burst: 90 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub api_domain: String,
    pub probe_header: String,
    pub request_timeout_secs: u64,
    pub stats_interval_secs: u64,
    pub rate_limits: RateLimitSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_domain: DEFAULT_API_DOMAIN.to_string(),
            probe_header: "x-betteruptime-probe".to_string(),
            request_timeout_secs: 60,
            stats_interval_secs: 10,
            rate_limits: RateLimitSettings::default(),
        }
    }
}

impl Settings {
    /// Reads a settings file from disk.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadSettings {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::ParseSettings {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Environment values that feed [`Config::resolve`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvVars {
    pub api_key: Option<String>,
    pub egress_base: Option<String>,
}

impl EnvVars {
    /// Reads the variables through `lookup`, preferring current names over
    /// legacy ones.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            api_key: lookup(API_KEY_ENV).or_else(|| lookup(LEGACY_API_KEY_ENV)),
            egress_base: lookup(LEGACY_EGRESS_BASE_ENV),
        }
    }

    /// Reads the process environment.
    pub fn from_process() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Shorthand for an environment that only carries the secret.
    pub fn with_api_key(secret: impl Into<String>) -> Self {
        Self {
            api_key: Some(secret.into()),
            ..Self::default()
        }
    }
}

/// Fully resolved configuration
#[derive(Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub egress_base: IpAddr,
    pub egress_count: usize,
    pub print_addrs: bool,
    pub verbose: bool,
    pub api_key: String,
    pub api_domain: String,
    pub probe_header: HeaderName,
    pub request_timeout: Duration,
    pub stats_interval: Duration,
    pub quotas: QuotaTable,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("listen_addr", &self.listen_addr)
            .field("egress_base", &self.egress_base)
            .field("egress_count", &self.egress_count)
            .field("print_addrs", &self.print_addrs)
            .field("verbose", &self.verbose)
            .field("api_key", &"<redacted>")
            .field("api_domain", &self.api_domain)
            .field("probe_header", &self.probe_header)
            .field("request_timeout", &self.request_timeout)
            .field("stats_interval", &self.stats_interval)
            .field("quotas", &self.quotas)
            .finish()
    }
}

impl Config {
    /// Loads `.env`, then parses the process arguments and environment.
    pub fn load() -> Result<Self, ConfigError> {
        // A missing .env is fine; the variables may come from the process
        dotenvy::dotenv().ok();

        let cli = Cli::parse();
        Self::resolve(cli, EnvVars::from_process())
    }

    /// Combines parsed flags with environment values and the settings file,
    /// if any.
    pub fn resolve(cli: Cli, env: EnvVars) -> Result<Self, ConfigError> {
        let api_key = env.api_key.ok_or(ConfigError::MissingSecret)?;
        if api_key.is_empty() || http::HeaderValue::from_str(&api_key).is_err() {
            return Err(ConfigError::InvalidSecret);
        }

        let egress_base = match (cli.egress_base, env.egress_base) {
            (Some(base), _) => base,
            (None, Some(raw)) => raw
                .trim()
                .parse::<IpAddr>()
                .map_err(|_| ConfigError::InvalidEgressBase(raw))?,
            (None, None) => return Err(ConfigError::MissingEgressBase),
        };

        let settings = match &cli.config {
            Some(path) => Settings::from_file(path)?,
            None => Settings::default(),
        };

        let probe_header = HeaderName::from_bytes(settings.probe_header.as_bytes())
            .map_err(|_| ConfigError::InvalidProbeHeader(settings.probe_header.clone()))?;

        if settings.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("request_timeout_secs"));
        }
        if settings.stats_interval_secs == 0 {
            return Err(ConfigError::ZeroDuration("stats_interval_secs"));
        }

        let quotas = QuotaTable {
            stats: settings.rate_limits.stats.to_quota("stats")?,
            web: settings.rate_limits.web.to_quota("web")?,
        };

        Ok(Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), cli.port),
            egress_base,
            egress_count: usize::from(cli.egress_count),
            print_addrs: cli.print_addrs,
            verbose: cli.verbose,
            api_key,
            api_domain: settings.api_domain,
            probe_header,
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
            stats_interval: Duration::from_secs(settings.stats_interval_secs),
            quotas,
        })
    }

    /// Maximum tracing level implied by `--verbose`.
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
