//! # Service Configuration
//!
//! Layered configuration for the feedhub service. Every field is optional so
//! that each layer only has to name what it changes:
//!
//! 1. built-in defaults,
//! 2. the JSON file at `--config-path` / `FEEDHUB_CONFIG_PATH`
//!    (`feedhub.conf` when unset),
//! 3. environment variables and CLI flags.
//!
//! Later layers win field by field. [`ServiceConfig::resolve`] then checks
//! the merged result and turns it into concrete settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::core::clock::{TimeSource, MAX_CLOCK_FACTOR, MIN_CLOCK_FACTOR};
use crate::model::EntityId;

/// Config file read when no path is given.
pub const DEFAULT_CONFIG_PATH: &str = "feedhub.conf";
/// Redis key used when none is configured.
pub const DEFAULT_REDIS_KEY: &str = "feedhub:cursor";

/// Where feed items come from.
#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// The live HTTP upstream.
    Live,
    /// A recorded capture file.
    Static,
}

/// Where the cursor is persisted.
#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CursorBackendKind {
    /// A local file.
    File,
    /// A Redis key.
    Redis,
    /// Nowhere; lost on restart.
    Memory,
}

/// Which clock paces the loops.
#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClockKind {
    /// Wall-clock time.
    Real,
    /// Virtual time running faster than wall-clock time.
    Accelerated,
    /// Frozen virtual time.
    Static,
}

/// Every knob of the service, each layer supplying some of them.
#[allow(missing_docs)]
#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Feed ingestion and republishing service", version)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    #[clap(long, env = "FEEDHUB_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "FEEDHUB_UPSTREAM_URL", help = "Base URL of the live upstream API.")]
    pub upstream_url: Option<String>,

    #[clap(long, env = "FEEDHUB_ARCHIVE_URL", help = "Base URL of the archive API. No archive when unset.")]
    pub archive_url: Option<String>,

    #[clap(long, env = "FEEDHUB_SOURCE", value_enum, help = "Feed source: live or static.")]
    pub source: Option<SourceKind>,

    #[clap(long, env = "FEEDHUB_STATIC_FEED_PATH", help = "Capture file replayed by the static source.")]
    pub static_feed_path: Option<PathBuf>,

    #[clap(long, env = "FEEDHUB_CURSOR_BACKEND", value_enum, help = "Cursor persistence: file, redis or memory.")]
    pub cursor_backend: Option<CursorBackendKind>,

    #[clap(long, env = "FEEDHUB_CURSOR_PATH", help = "Cursor file for the file backend.")]
    pub cursor_path: Option<PathBuf>,

    #[clap(long, env = "FEEDHUB_REDIS_URL", help = "Redis URL for the redis backend.")]
    pub redis_url: Option<String>,

    #[clap(long, env = "FEEDHUB_REDIS_KEY", help = "Redis key holding the cursor.")]
    pub redis_key: Option<String>,

    #[clap(long, env = "FEEDHUB_POLL_PERIOD_MS", help = "Milliseconds between global feed polls.")]
    pub poll_period_ms: Option<u64>,

    #[clap(long, env = "FEEDHUB_ENTITY_POLL_PERIOD_MS", help = "Milliseconds between entity snapshot polls.")]
    pub entity_poll_period_ms: Option<u64>,

    #[clap(long, env = "FEEDHUB_HTTP_TIMEOUT_MS", help = "Per-request timeout for upstream calls.")]
    pub http_timeout_ms: Option<u64>,

    #[clap(long, env = "FEEDHUB_ENTITIES", value_delimiter = ',', help = "Comma separated entity ids to poll.")]
    pub entities: Option<Vec<String>>,

    #[clap(long, env = "FEEDHUB_SUBSCRIBER_BUFFER", help = "Per-subscriber buffer size.")]
    pub subscriber_buffer: Option<usize>,

    #[clap(long, env = "FEEDHUB_GATE_PERMITS", help = "Reader capacity of each entity log gate.")]
    pub gate_permits: Option<u32>,

    #[clap(long, env = "FEEDHUB_MAX_VERSION", help = "Largest accepted entity version number.")]
    pub max_version: Option<u64>,

    #[clap(long, env = "FEEDHUB_CLOCK", value_enum, help = "Clock: real, accelerated or static.")]
    pub clock: Option<ClockKind>,

    #[clap(long, env = "FEEDHUB_CLOCK_START", help = "RFC 3339 start of virtual time.")]
    pub clock_start: Option<String>,

    #[clap(long, env = "FEEDHUB_CLOCK_FACTOR", help = "Speed-up of the accelerated clock.")]
    pub clock_factor: Option<f64>,

    #[clap(long, env = "FEEDHUB_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "FEEDHUB_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,
}

/// Failures while loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but cannot be read.
    #[error("cannot read config file {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The config file is not valid JSON for this schema.
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
    /// A setting required by the chosen options is absent.
    #[error("missing setting: {0}")]
    Missing(&'static str),
    /// A setting has an unusable value.
    #[error("invalid setting {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Resolved feed source.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSettings {
    /// Live HTTP upstream at this base URL.
    Live {
        /// Base URL.
        upstream_url: String,
    },
    /// Capture replay.
    Static {
        /// Capture file.
        path: PathBuf,
    },
}

/// Resolved cursor backend.
#[derive(Debug, Clone, PartialEq)]
pub enum CursorSettings {
    /// File backend.
    File(PathBuf),
    /// Redis backend.
    Redis {
        /// Server URL.
        url: String,
        /// Cursor key.
        key: String,
    },
    /// Memory backend.
    Memory,
}

/// Resolved clock.
#[derive(Debug, Clone, PartialEq)]
pub enum ClockSettings {
    /// Wall-clock time.
    Real,
    /// Virtual time from `start`, `factor` times faster.
    Accelerated {
        /// Virtual start.
        start: DateTime<Utc>,
        /// Speed-up factor.
        factor: f64,
    },
    /// Frozen at this instant.
    Static(DateTime<Utc>),
}

impl ClockSettings {
    /// The clock these settings describe. Accelerated time starts running
    /// at the moment of this call.
    pub fn into_time_source(self) -> TimeSource {
        match self {
            Self::Real => TimeSource::Real,
            Self::Accelerated { start, factor } => TimeSource::accelerated(start, factor),
            Self::Static(at) => TimeSource::Static(at),
        }
    }
}

/// Validated, concrete service settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    /// Feed source.
    pub source: SourceSettings,
    /// Archive base URL, if any.
    pub archive_url: Option<String>,
    /// Cursor backend.
    pub cursor: CursorSettings,
    /// Global feed cadence.
    pub poll_period: Duration,
    /// Entity snapshot cadence.
    pub entity_poll_period: Duration,
    /// Upstream request timeout.
    pub http_timeout: Duration,
    /// Entities polled from startup.
    pub entities: Vec<EntityId>,
    /// Per-subscriber buffer.
    pub subscriber_buffer: usize,
    /// Gate capacity per entity log.
    pub gate_permits: u32,
    /// Largest accepted entity version.
    pub max_version: u64,
    /// Clock.
    pub clock: ClockSettings,
    /// Log directory.
    pub log_dir: PathBuf,
    /// Log level.
    pub log_level: String,
}

impl ServiceConfig {
    /// Built-in defaults, the bottom layer.
    pub fn defaults() -> Self {
        Self {
            source: Some(SourceKind::Live),
            cursor_backend: Some(CursorBackendKind::File),
            cursor_path: Some(PathBuf::from("./state/feed.cursor")),
            redis_key: Some(DEFAULT_REDIS_KEY.to_string()),
            poll_period_ms: Some(5_000),
            entity_poll_period_ms: Some(5_000),
            http_timeout_ms: Some(10_000),
            subscriber_buffer: Some(1024),
            gate_permits: Some(64),
            max_version: Some(1 << 20),
            clock: Some(ClockKind::Real),
            clock_factor: Some(1.0),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            ..Default::default()
        }
    }

    /// Merges two configs, `other` overriding `self` wherever it is `Some`.
    pub fn merge(self, other: ServiceConfig) -> ServiceConfig {
        ServiceConfig {
            config_path: other.config_path.or(self.config_path),
            upstream_url: other.upstream_url.or(self.upstream_url),
            archive_url: other.archive_url.or(self.archive_url),
            source: other.source.or(self.source),
            static_feed_path: other.static_feed_path.or(self.static_feed_path),
            cursor_backend: other.cursor_backend.or(self.cursor_backend),
            cursor_path: other.cursor_path.or(self.cursor_path),
            redis_url: other.redis_url.or(self.redis_url),
            redis_key: other.redis_key.or(self.redis_key),
            poll_period_ms: other.poll_period_ms.or(self.poll_period_ms),
            entity_poll_period_ms: other.entity_poll_period_ms.or(self.entity_poll_period_ms),
            http_timeout_ms: other.http_timeout_ms.or(self.http_timeout_ms),
            entities: other.entities.or(self.entities),
            subscriber_buffer: other.subscriber_buffer.or(self.subscriber_buffer),
            gate_permits: other.gate_permits.or(self.gate_permits),
            max_version: other.max_version.or(self.max_version),
            clock: other.clock.or(self.clock),
            clock_start: other.clock_start.or(self.clock_start),
            clock_factor: other.clock_factor.or(self.clock_factor),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
        }
    }

    /// Reads one JSON layer from `path`. A missing file is an empty layer.
    pub fn from_file(path: &Path) -> Result<Option<ServiceConfig>, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&raw).map(Some).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses the process arguments and environment, then builds every layer.
    pub fn load() -> Result<ServiceConfig, ConfigError> {
        Self::load_with(Self::parse())
    }

    /// Builds every layer around already parsed CLI/env values.
    pub fn load_with(cli: ServiceConfig) -> Result<ServiceConfig, ConfigError> {
        let path = cli
            .config_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = Self::defaults();
        match Self::from_file(&path)? {
            Some(file) => config = config.merge(file),
            None => info!(path = %path.display(), "config file not found, using defaults and env/CLI"),
        }
        Ok(config.merge(cli))
    }

    /// Validates the merged layers.
    pub fn resolve(&self) -> Result<ResolvedConfig, ConfigError> {
        let source = match self.source.unwrap_or(SourceKind::Live) {
            SourceKind::Live => SourceSettings::Live {
                upstream_url: self.upstream_url.clone().ok_or(ConfigError::Missing("upstream_url"))?,
            },
            SourceKind::Static => SourceSettings::Static {
                path: self
                    .static_feed_path
                    .clone()
                    .ok_or(ConfigError::Missing("static_feed_path"))?,
            },
        };

        let cursor = match self.cursor_backend.unwrap_or(CursorBackendKind::File) {
            CursorBackendKind::File => {
                CursorSettings::File(self.cursor_path.clone().ok_or(ConfigError::Missing("cursor_path"))?)
            }
            CursorBackendKind::Redis => CursorSettings::Redis {
                url: self.redis_url.clone().ok_or(ConfigError::Missing("redis_url"))?,
                key: self.redis_key.clone().unwrap_or_else(|| DEFAULT_REDIS_KEY.to_string()),
            },
            CursorBackendKind::Memory => CursorSettings::Memory,
        };

        let clock = match self.clock.unwrap_or(ClockKind::Real) {
            ClockKind::Real => ClockSettings::Real,
            ClockKind::Accelerated => {
                let factor = self.clock_factor.unwrap_or(1.0);
                if !(MIN_CLOCK_FACTOR..=MAX_CLOCK_FACTOR).contains(&factor) {
                    return Err(ConfigError::Invalid {
                        field: "clock_factor",
                        reason: format!("{factor} is outside {MIN_CLOCK_FACTOR}..={MAX_CLOCK_FACTOR}"),
                    });
                }
                ClockSettings::Accelerated {
                    start: self.parse_clock_start()?.unwrap_or_else(Utc::now),
                    factor,
                }
            }
            ClockKind::Static => {
                ClockSettings::Static(self.parse_clock_start()?.ok_or(ConfigError::Missing("clock_start"))?)
            }
        };

        Ok(ResolvedConfig {
            source,
            archive_url: self.archive_url.clone().filter(|url| !url.is_empty()),
            cursor,
            poll_period: positive_millis("poll_period_ms", self.poll_period_ms, 5_000)?,
            entity_poll_period: positive_millis("entity_poll_period_ms", self.entity_poll_period_ms, 5_000)?,
            http_timeout: positive_millis("http_timeout_ms", self.http_timeout_ms, 10_000)?,
            entities: self
                .entities
                .iter()
                .flatten()
                .map(|id| id.trim())
                .filter(|id| !id.is_empty())
                .map(EntityId::new)
                .collect(),
            subscriber_buffer: at_least_one("subscriber_buffer", self.subscriber_buffer.unwrap_or(1024))?,
            gate_permits: at_least_one("gate_permits", self.gate_permits.unwrap_or(64))?,
            max_version: self.max_version.unwrap_or(1 << 20),
            clock,
            log_dir: self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: self.log_level.clone().unwrap_or_else(|| "info".to_string()),
        })
    }

    fn parse_clock_start(&self) -> Result<Option<DateTime<Utc>>, ConfigError> {
        self.clock_start
            .as_deref()
            .map(|raw| {
                DateTime::parse_from_rfc3339(raw)
                    .map(|at| at.with_timezone(&Utc))
                    .map_err(|e| ConfigError::Invalid {
                        field: "clock_start",
                        reason: e.to_string(),
                    })
            })
            .transpose()
    }
}

fn positive_millis(field: &'static str, value: Option<u64>, default: u64) -> Result<Duration, ConfigError> {
    match value.unwrap_or(default) {
        0 => Err(ConfigError::Invalid {
            field,
            reason: "must be greater than zero".to_string(),
        }),
        ms => Ok(Duration::from_millis(ms)),
    }
}

fn at_least_one<N>(field: &'static str, value: N) -> Result<N, ConfigError>
where
    N: PartialOrd + From<u8>,
{
    if value < N::from(1) {
        return Err(ConfigError::Invalid {
            field,
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn later_layers_win_field_by_field() {
        let file = ServiceConfig {
            upstream_url: Some("http://file/".into()),
            poll_period_ms: Some(1_000),
            ..Default::default()
        };
        let cli = ServiceConfig {
            poll_period_ms: Some(250),
            ..Default::default()
        };

        let merged = ServiceConfig::defaults().merge(file).merge(cli);
        assert_eq!(merged.upstream_url.as_deref(), Some("http://file/"));
        assert_eq!(merged.poll_period_ms, Some(250));
        assert_eq!(merged.log_level.as_deref(), Some("info"));
    }

    #[test]
    fn cli_flags_parse() {
        let cli = ServiceConfig::parse_from([
            "feedhub",
            "--source",
            "static",
            "--static-feed-path",
            "capture.json",
            "--entities",
            "a,b",
            "--cursor-backend",
            "memory",
        ]);
        let resolved = ServiceConfig::defaults().merge(cli).resolve().unwrap();
        assert_eq!(
            resolved.source,
            SourceSettings::Static {
                path: PathBuf::from("capture.json")
            }
        );
        assert_eq!(resolved.entities, vec![EntityId::new("a"), EntityId::new("b")]);
        assert_eq!(resolved.cursor, CursorSettings::Memory);
    }

    #[test]
    fn file_layer_is_read_and_missing_file_is_empty() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"upstreamUrl": "http://up/", "clock": "static", "clockStart": "2021-03-01T00:00:00Z"}}"#)
            .unwrap();

        let cli = ServiceConfig {
            config_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let resolved = ServiceConfig::load_with(cli).unwrap().resolve().unwrap();
        assert_eq!(
            resolved.source,
            SourceSettings::Live {
                upstream_url: "http://up/".into()
            }
        );
        assert!(matches!(resolved.clock, ClockSettings::Static(_)));

        let dir = tempfile::tempdir().unwrap();
        assert!(ServiceConfig::from_file(&dir.path().join("absent.conf")).unwrap().is_none());
    }

    #[test]
    fn broken_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            ServiceConfig::from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn resolve_reports_missing_and_invalid_settings() {
        let no_upstream = ServiceConfig::defaults();
        assert!(matches!(no_upstream.resolve(), Err(ConfigError::Missing("upstream_url"))));

        let redis_without_url = ServiceConfig {
            upstream_url: Some("http://up/".into()),
            cursor_backend: Some(CursorBackendKind::Redis),
            ..ServiceConfig::defaults()
        };
        assert!(matches!(redis_without_url.resolve(), Err(ConfigError::Missing("redis_url"))));

        let zero_period = ServiceConfig {
            upstream_url: Some("http://up/".into()),
            poll_period_ms: Some(0),
            ..ServiceConfig::defaults()
        };
        assert!(matches!(
            zero_period.resolve(),
            Err(ConfigError::Invalid {
                field: "poll_period_ms",
                ..
            })
        ));

        for factor in [-2.0, 0.0, 1e-300, 1e300, f64::NAN, f64::INFINITY] {
            let bad_factor = ServiceConfig {
                upstream_url: Some("http://up/".into()),
                clock: Some(ClockKind::Accelerated),
                clock_factor: Some(factor),
                ..ServiceConfig::defaults()
            };
            assert!(
                matches!(
                    bad_factor.resolve(),
                    Err(ConfigError::Invalid {
                        field: "clock_factor",
                        ..
                    })
                ),
                "factor {factor} was accepted"
            );
        }

        let fast = ServiceConfig {
            upstream_url: Some("http://up/".into()),
            clock: Some(ClockKind::Accelerated),
            clock_factor: Some(MAX_CLOCK_FACTOR),
            ..ServiceConfig::defaults()
        };
        assert!(fast.resolve().is_ok());
    }
}
