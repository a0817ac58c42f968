//! Service configuration from flags and environment.

use anyhow::{bail, Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAPPINGS_PATH: &str = "config/mappings.yaml";
pub const DEFAULT_TOPIC_PREFIX: &str = "datex/v1/es";
const DEFAULT_MQTT_PORT: u16 = 1883;

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Feed URL serving the situation publication
    #[arg(long, env = "FEED_URL")]
    pub feed_url: String,

    /// MQTT broker, `tcp://host:port`
    #[arg(long, env = "MQTT_BROKER", default_value = "tcp://localhost:1883")]
    pub mqtt_broker: String,

    #[arg(long, env = "MQTT_CLIENT_ID", default_value = "situfeed")]
    pub mqtt_client_id: String,

    #[arg(long, env = "TOPIC_PREFIX", default_value = DEFAULT_TOPIC_PREFIX)]
    pub topic_prefix: String,

    /// Seconds between feed polls
    #[arg(long, env = "POLL_INTERVAL_SECONDS", default_value_t = 60)]
    pub poll_interval_seconds: u64,

    /// Port of the /metrics and /health endpoint
    #[arg(long, env = "METRICS_PORT", default_value_t = 9090)]
    pub metrics_port: u16,

    #[arg(long, env = "MAPPINGS_PATH", default_value = DEFAULT_MAPPINGS_PATH)]
    pub mappings_path: PathBuf,

    /// Timeout for one feed request and for one bus send
    #[arg(long, env = "HTTP_TIMEOUT_SECONDS", default_value_t = 30)]
    pub http_timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broker {
    pub host: String,
    pub port: u16,
}

impl Broker {
    /// Accepts `tcp://host:port`, `mqtt://host:port` or bare `host[:port]`.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let address = trimmed
            .strip_prefix("tcp://")
            .or_else(|| trimmed.strip_prefix("mqtt://"))
            .unwrap_or(trimmed)
            .trim_end_matches('/');
        let (host, port) = match address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .with_context(|| format!("invalid MQTT broker port in `{raw}`"))?;
                (host, port)
            }
            None => (address, DEFAULT_MQTT_PORT),
        };
        if host.is_empty() {
            bail!("MQTT broker `{raw}` has no host");
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

/// Validated settings for `situfeed run`.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub feed_url: String,
    pub broker: Broker,
    pub client_id: String,
    pub topic_prefix: String,
    pub poll_interval: Duration,
    pub metrics_port: u16,
    pub mappings_path: PathBuf,
    pub timeout: Duration,
}

impl AppConfig {
    pub fn from_args(args: RunArgs) -> Result<Self> {
        if !(args.feed_url.starts_with("http://") || args.feed_url.starts_with("https://")) {
            bail!("FEED_URL must be an http(s) URL, got `{}`", args.feed_url);
        }
        if args.poll_interval_seconds == 0 {
            bail!("POLL_INTERVAL_SECONDS must be positive");
        }
        if args.http_timeout_seconds == 0 {
            bail!("HTTP_TIMEOUT_SECONDS must be positive");
        }
        let topic_prefix = validate_prefix(&args.topic_prefix)?;
        if args.mqtt_client_id.trim().is_empty() {
            bail!("MQTT_CLIENT_ID must not be empty");
        }
        Ok(Self {
            broker: Broker::parse(&args.mqtt_broker)?,
            feed_url: args.feed_url,
            client_id: args.mqtt_client_id,
            topic_prefix,
            poll_interval: Duration::from_secs(args.poll_interval_seconds),
            metrics_port: args.metrics_port,
            mappings_path: args.mappings_path,
            timeout: Duration::from_secs(args.http_timeout_seconds),
        })
    }
}

pub fn validate_prefix(raw: &str) -> Result<String> {
    let prefix = raw.trim().trim_end_matches('/');
    if prefix.is_empty() {
        bail!("TOPIC_PREFIX must not be empty");
    }
    if prefix.contains(['+', '#']) {
        bail!("TOPIC_PREFIX must not contain MQTT wildcards, got `{raw}`");
    }
    Ok(prefix.to_string())
}
