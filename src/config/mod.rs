//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    collections::BTreeMap, net::IpAddr, num::NonZeroU32, path::PathBuf, str::FromStr,
    time::Duration,
};

use clap::{ArgGroup, Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::DEFAULT_TTL_SECS;
use crate::error::ConfigurationError;
use crate::guard::{COMMENTING_POLICY, POSTING_POLICY, READ_POLICY};
use crate::limiter::Policy;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "gatehouse";
const ENV_PREFIX: &str = "GATEHOUSE";
const DEFAULT_BACKEND_TIMEOUT_MS: u64 = 250;
const DEFAULT_KEY_PREFIX: &str = "gatehouse:";

/// Built-in policies: (name, max_requests, window_seconds).
const DEFAULT_POLICIES: [(&str, u64, u64); 3] = [
    (READ_POLICY, 50, 40),
    (POSTING_POLICY, 1, 10),
    (COMMENTING_POLICY, 6, 120),
];

/// Command-line arguments for the gatehouse operator tool.
#[derive(Debug, Parser)]
#[command(
    name = "gatehouse",
    version,
    about = "Inspect rate limits and invalidate cached views"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "GATEHOUSE_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the shared backend URL (e.g. redis://127.0.0.1/).
    #[arg(long = "backend-url", value_name = "URL", global = true)]
    pub backend_url: Option<String>,

    /// Override the per-call backend timeout.
    #[arg(long = "backend-timeout-ms", value_name = "MILLIS", global = true)]
    pub backend_timeout_ms: Option<u64>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Count one request against a policy and print the decision.
    Check(CheckArgs),
    /// Invalidate cached views.
    Expire(ExpireArgs),
    /// List the effective rate-limit policies.
    Policies,
}

#[derive(Debug, Args, Clone)]
#[command(group(ArgGroup::new("identity").required(true).args(["ip", "user"])))]
pub struct CheckArgs {
    /// Policy name, e.g. `read`, `posting`, `commenting`.
    #[arg(value_name = "POLICY")]
    pub policy: String,

    /// Anonymous caller address.
    #[arg(long, value_name = "ADDR")]
    pub ip: Option<IpAddr>,

    /// Authenticated user id.
    #[arg(long, value_name = "ID")]
    pub user: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct ExpireArgs {
    /// Cache keys to remove, e.g. `post:abcd front_page`.
    #[arg(value_name = "KEY", required = true)]
    pub keys: Vec<String>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub backend: BackendSettings,
    pub cache: CacheSettings,
    pub policies: BTreeMap<String, Policy>,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// `None` selects the in-process fallback.
    pub url: Option<String>,
    pub timeout: Duration,
    pub key_prefix: String,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub default_ttl: Duration,
    pub single_flight: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl LoadError {
    fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigurationError::invalid(key, reason).into()
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    backend: RawBackendSettings,
    cache: RawCacheSettings,
    policies: BTreeMap<String, RawPolicySettings>,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.backend_url.as_ref() {
            self.backend.url = Some(url.clone());
        }
        if let Some(timeout) = overrides.backend_timeout_ms {
            self.backend.timeout_ms = Some(timeout);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            backend,
            cache,
            policies,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            backend: build_backend_settings(backend)?,
            cache: build_cache_settings(cache)?,
            policies: build_policies(policies)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_backend_settings(backend: RawBackendSettings) -> Result<BackendSettings, LoadError> {
    let url = backend.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let timeout_ms = backend.timeout_ms.unwrap_or(DEFAULT_BACKEND_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(LoadError::invalid(
            "backend.timeout_ms",
            "must be greater than zero",
        ));
    }

    let key_prefix = backend
        .key_prefix
        .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string());

    Ok(BackendSettings {
        url,
        timeout: Duration::from_millis(timeout_ms),
        key_prefix,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let ttl_secs = cache.default_ttl_seconds.unwrap_or(DEFAULT_TTL_SECS);
    if ttl_secs == 0 {
        return Err(LoadError::invalid(
            "cache.default_ttl_seconds",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        default_ttl: Duration::from_secs(ttl_secs),
        single_flight: cache.single_flight.unwrap_or(false),
    })
}

/// Merge configured policies over the built-in ones.
///
/// A configured policy sharing a built-in name may set just one field; the
/// other falls back to the built-in value. New policies must set both.
fn build_policies(
    configured: BTreeMap<String, RawPolicySettings>,
) -> Result<BTreeMap<String, Policy>, LoadError> {
    let mut merged: BTreeMap<String, RawPolicySettings> = DEFAULT_POLICIES
        .iter()
        .map(|(name, max_requests, window_seconds)| {
            (
                (*name).to_string(),
                RawPolicySettings {
                    max_requests: Some(*max_requests),
                    window_seconds: Some(*window_seconds),
                },
            )
        })
        .collect();

    for (name, raw) in configured {
        let entry = merged.entry(name).or_default();
        if raw.max_requests.is_some() {
            entry.max_requests = raw.max_requests;
        }
        if raw.window_seconds.is_some() {
            entry.window_seconds = raw.window_seconds;
        }
    }

    merged
        .into_iter()
        .map(|(name, raw)| -> Result<(String, Policy), LoadError> {
            let max_key = format!("policies.{name}.max_requests");
            let window_key = format!("policies.{name}.window_seconds");

            let max_requests = raw
                .max_requests
                .ok_or_else(|| LoadError::invalid(max_key.clone(), "missing"))?;
            let window_seconds = raw
                .window_seconds
                .ok_or_else(|| LoadError::invalid(window_key.clone(), "missing"))?;

            let policy = Policy::from_non_zero(
                non_zero_u32(max_requests, max_key)?,
                non_zero_u32(window_seconds, window_key)?,
            );
            Ok((name, policy))
        })
        .collect()
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBackendSettings {
    url: Option<String>,
    timeout_ms: Option<u64>,
    key_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    default_ttl_seconds: Option<u64>,
    single_flight: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPolicySettings {
    max_requests: Option<u64>,
    window_seconds: Option<u64>,
}

fn non_zero_u32(value: u64, key: String) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key.clone(), "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
