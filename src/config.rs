//! Environment sourced configuration.
//!
//! | Variable       | Meaning                                           | Default             |
//! |----------------|---------------------------------------------------|---------------------|
//! | `SERVICE_NAME` | logger name of the service (`DD_SERVICE` also read) | `tower-correlation` |
//! | `LOG_LEVEL`    | minimum level, or `target=level` directives        | `info`              |
//! | `LOG_SINK`     | `stdout`, `stderr` or a file path                  | `stdout`            |

use std::{
    fs::OpenOptions,
    io,
    path::PathBuf,
    str::FromStr,
    sync::Mutex,
};

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{
    filter::{ParseError, Targets},
    fmt::writer::BoxMakeWriter,
};

pub const SERVICE_NAME_VAR: &str = "SERVICE_NAME";
pub const SERVICE_NAME_FALLBACK_VAR: &str = "DD_SERVICE";
pub const LOG_LEVEL_VAR: &str = "LOG_LEVEL";
pub const LOG_SINK_VAR: &str = "LOG_SINK";

pub const DEFAULT_SERVICE_NAME: &str = "tower-correlation";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid log level directives `{value}`: {source}")]
    InvalidLogLevel {
        value: String,
        #[source]
        source: ParseError,
    },
}

/// Failures building the logging pipeline at startup.
#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot open log sink `{}`: {source}", path.display())]
    OpenSink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub service_name: String,
    pub log_level: Targets,
    pub sink: SinkTarget,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            service_name: DEFAULT_SERVICE_NAME.to_owned(),
            log_level: Targets::new().with_default(Level::INFO),
            sink: SinkTarget::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`, blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Config::default();

        let service_name = lookup(SERVICE_NAME_VAR)
            .or_else(|| lookup(SERVICE_NAME_FALLBACK_VAR))
            .unwrap_or(defaults.service_name);
        let log_level = match lookup(LOG_LEVEL_VAR) {
            Some(directives) => parse_log_level(&directives)?,
            None => defaults.log_level,
        };
        let sink = lookup(LOG_SINK_VAR)
            .map(|target| SinkTarget::from(target.as_str()))
            .unwrap_or(defaults.sink);

        Ok(Config {
            service_name,
            log_level,
            sink,
        })
    }
}

/// Parse `info` or `warn,my-service=debug` like directives.
///
/// Levels are case insensitive, `warning` and `critical` are accepted for
/// `warn` and `error`.
pub fn parse_log_level(directives: &str) -> Result<Targets, ConfigError> {
    let normalized = directives
        .split(',')
        .map(str::trim)
        .filter(|directive| !directive.is_empty())
        .map(|directive| match directive.rsplit_once('=') {
            Some((target, level)) => format!("{target}={}", normalize_level(level)),
            None => normalize_level(directive),
        })
        .collect::<Vec<_>>()
        .join(",");

    normalized
        .parse()
        .map_err(|source| ConfigError::InvalidLogLevel {
            value: directives.to_owned(),
            source,
        })
}

fn normalize_level(level: &str) -> String {
    match level.trim().to_ascii_lowercase().as_str() {
        "warning" => "warn".to_owned(),
        "critical" | "fatal" => "error".to_owned(),
        other => other.to_owned(),
    }
}

/// Where JSON records are written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SinkTarget {
    #[default]
    Stdout,
    Stderr,
    File(PathBuf),
}

impl From<&str> for SinkTarget {
    fn from(target: &str) -> Self {
        match target.trim() {
            "stdout" | "-" => SinkTarget::Stdout,
            "stderr" => SinkTarget::Stderr,
            path => SinkTarget::File(PathBuf::from(path)),
        }
    }
}

impl FromStr for SinkTarget {
    type Err = std::convert::Infallible;

    fn from_str(target: &str) -> Result<Self, Self::Err> {
        Ok(SinkTarget::from(target))
    }
}

impl SinkTarget {
    /// Open the target, files are created if needed and appended to.
    pub fn make_writer(&self) -> Result<BoxMakeWriter, InitError> {
        match self {
            SinkTarget::Stdout => Ok(BoxMakeWriter::new(io::stdout)),
            SinkTarget::Stderr => Ok(BoxMakeWriter::new(io::stderr)),
            SinkTarget::File(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| InitError::OpenSink {
                        path: path.clone(),
                        source,
                    })?;
                Ok(BoxMakeWriter::new(Mutex::new(file)))
            }
        }
    }
}
