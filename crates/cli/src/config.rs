//! Process configuration, loaded from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context as _};

/// Application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Absolute path to an explicit platform kubeconfig file. When unset, the
    /// client is inferred from the ambient environment.
    pub kubeconfig_path: Option<String>,
    /// Base address of the annotation store, e.g. `https://grafana.example.com`.
    pub grafana_addr: String,
    /// Bearer credential for the annotation store API.
    pub grafana_api_key: String,
    /// Carriers older than this are not reconciled. Zero disables the filter.
    pub release_revision_max_age: Duration,
    /// Log output format.
    pub log_format: LogFormat,
    /// Log filter directive, e.g. `info` or `controller=debug,info`.
    pub log_level: String,
    /// Watch config-map carriers.
    pub watch_config_maps: bool,
    /// Watch secret carriers.
    pub watch_secrets: bool,
    /// Address to serve `/metrics` on; unset disables the metrics sink.
    pub metrics_addr: Option<SocketAddr>,
    /// Number of reconciliation workers.
    pub workers: usize,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Human-readable text.
    Text,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            kubeconfig_path: env_string("KUBECONFIG"),
            grafana_addr: env_string("GRAFANA_ADDR")
                .context("GRAFANA_ADDR must be set")?,
            grafana_api_key: env_string("GRAFANA_API_KEY")
                .context("GRAFANA_API_KEY must be set")?,
            release_revision_max_age: parse_duration(
                "RELEASE_REVISION_MAX_AGE",
                env_string("RELEASE_REVISION_MAX_AGE").as_deref(),
                Duration::from_secs(24 * 60 * 60),
            )?,
            log_format: parse_log_format(env_string("LOG_FORMAT").as_deref())?,
            log_level: env_string("LOG_LEVEL").unwrap_or_else(|| "info".to_owned()),
            watch_config_maps: parse_bool(
                "WATCH_CONFIGMAPS",
                env_string("WATCH_CONFIGMAPS").as_deref(),
                true,
            )?,
            watch_secrets: parse_bool(
                "WATCH_SECRETS",
                env_string("WATCH_SECRETS").as_deref(),
                false,
            )?,
            metrics_addr: parse_socket_addr(
                "METRICS_ADDR",
                env_string("METRICS_ADDR").as_deref(),
            )?,
            workers: parse_workers("WORKERS", env_string("WORKERS").as_deref())?,
        })
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn parse_duration(
    name: &str,
    value: Option<&str>,
    default: Duration,
) -> anyhow::Result<Duration> {
    match value {
        None => Ok(default),
        Some(value) => humantime::parse_duration(value)
            .with_context(|| format!("{name} is not a valid duration: {value:?}")),
    }
}

fn parse_log_format(value: Option<&str>) -> anyhow::Result<LogFormat> {
    match value {
        None | Some("json") => Ok(LogFormat::Json),
        Some("text") => Ok(LogFormat::Text),
        Some(other) => bail!("LOG_FORMAT must be \"json\" or \"text\", got {other:?}"),
    }
}

fn parse_bool(name: &str, value: Option<&str>, default: bool) -> anyhow::Result<bool> {
    match value {
        None => Ok(default),
        Some("true") | Some("1") => Ok(true),
        Some("false") | Some("0") => Ok(false),
        Some(other) => bail!("{name} must be a boolean, got {other:?}"),
    }
}

fn parse_socket_addr(
    name: &str,
    value: Option<&str>,
) -> anyhow::Result<Option<SocketAddr>> {
    match value {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .with_context(|| format!("{name} is not a valid socket address: {value:?}")),
    }
}

fn parse_workers(name: &str, value: Option<&str>) -> anyhow::Result<usize> {
    match value {
        None => Ok(1),
        Some(value) => {
            let workers: usize = value
                .parse()
                .with_context(|| format!("{name} is not a valid count: {value:?}"))?;
            if workers == 0 {
                bail!("{name} must be at least 1");
            }
            Ok(workers)
        }
    }
}
