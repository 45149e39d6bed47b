use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{de, Deserialize, Deserializer};
use tracing::level_filters::LevelFilter;

use tokenart_sources::GatewayConfig;

use crate::tokens::TokenStandard;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "tokenart".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// One bridge direction between a home and a foreign chain.
///
/// Only the parts needed to list a user's tokens are configured here; the on-chain mediator
/// contracts are not the concern of this service.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Human readable label of the bridge.
    pub label: String,
    pub home_chain_id: u64,
    pub foreign_chain_id: u64,
    /// Subgraph names, relative to [`Config::graph_url`].
    pub home_721_subgraph: String,
    pub foreign_721_subgraph: String,
    pub home_1155_subgraph: String,
    pub foreign_1155_subgraph: String,
}

impl BridgeConfig {
    /// Returns the subgraph name listing tokens of `standard` on `chain_id`.
    ///
    /// The home subgraph is used when `chain_id` is the home chain, the foreign one otherwise.
    pub fn subgraph(&self, standard: TokenStandard, chain_id: u64) -> &str {
        let home = chain_id == self.home_chain_id;
        match (standard, home) {
            (TokenStandard::Eip721, true) => &self.home_721_subgraph,
            (TokenStandard::Eip721, false) => &self.foreign_721_subgraph,
            (TokenStandard::Eip1155, true) => &self.home_1155_subgraph,
            (TokenStandard::Eip1155, false) => &self.foreign_1155_subgraph,
        }
    }
}

/// The service configuration, usually loaded from a YAML file.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,

    /// Gateways used to rewrite content-addressed identifiers, in preference order.
    pub gateways: GatewayConfig,

    /// The fixed deadline of one resolution.
    ///
    /// If no candidate was confirmed to load within this time, the identifier is recorded as
    /// timed out for the rest of the session.
    #[serde(with = "humantime_serde")]
    pub resolution_timeout: Duration,

    /// The timeout for establishing a connection to a metadata or image host.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// The upper bound for a single HTTP request.
    ///
    /// Resolution does not wait for this, it only bounds requests which were abandoned after
    /// the `resolution_timeout` elapsed.
    #[serde(with = "humantime_serde")]
    pub max_download_timeout: Duration,

    /// Metadata documents larger than this many bytes are ignored.
    pub max_metadata_size: u64,

    /// Directory holding the durable per-session storage.
    ///
    /// When not set, the session cache is kept in memory for the lifetime of the process.
    pub session_dir: Option<PathBuf>,

    /// Base URL that subgraph names are appended to.
    pub graph_url: String,

    /// All known bridges by name.
    pub bridges: BTreeMap<String, BridgeConfig>,

    /// Names of the enabled bridges. If empty, all configured bridges are enabled.
    pub enabled_bridges: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
            gateways: GatewayConfig::default(),
            resolution_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(1),
            max_download_timeout: Duration::from_secs(30),
            max_metadata_size: 1024 * 1024,
            session_dir: None,
            graph_url: "https://api.thegraph.com/subgraphs/name/".into(),
            bridges: BTreeMap::new(),
            enabled_bridges: Vec::new(),
        }
    }
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }

    /// Returns the enabled bridges by name.
    pub fn enabled_bridges(&self) -> BTreeMap<&str, &BridgeConfig> {
        self.bridges
            .iter()
            .filter(|(name, _)| {
                self.enabled_bridges.is_empty()
                    || self
                        .enabled_bridges
                        .iter()
                        .any(|enabled| enabled.eq_ignore_ascii_case(name))
            })
            .map(|(name, bridge)| (name.as_str(), bridge))
            .collect()
    }

    /// Looks up an enabled bridge by name, case-insensitively.
    pub fn bridge(&self, name: &str) -> Option<&BridgeConfig> {
        self.enabled_bridges()
            .into_iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, bridge)| bridge)
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
