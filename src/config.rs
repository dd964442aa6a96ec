//! Configuration for the pour client.
//!
//! Values come either from `POUR_*` environment variables or from a JSON
//! config file, falling back to defaults for anything left out.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Default collector port
const DEFAULT_PORT: u16 = 12555;

/// Default seconds between log shipments
const DEFAULT_SHIP_INTERVAL_SECS: u64 = 5;

/// Default seconds between hardware samples
const DEFAULT_HARDWARE_INTERVAL_SECS: u64 = 30;

/// Window the CPU usage sample is taken over
const DEFAULT_CPU_SAMPLE_WINDOW_SECS: u64 = 5;

/// Default HTTP request timeout in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Failed log shipments tolerated before remote logging is switched off
const DEFAULT_MAX_LOG_FAILURES: u32 = 10;

/// Hardware failures reported before the sampler stops reporting them
const DEFAULT_HARDWARE_QUIET_LIMIT: u32 = 2;

/// Bounds for the shipment interval
const MIN_SHIP_INTERVAL_SECS: u64 = 1;
const MAX_SHIP_INTERVAL_SECS: u64 = 300;

/// Shortest usable HTTP request timeout
const MIN_REQUEST_TIMEOUT_SECS: u64 = 1;

/// Configuration for the pour client.
///
/// Environment variables:
/// - `POUR_REMOTE_LOGS`: ship events to the collector (default: false)
/// - `POUR_HOST` / `POUR_PORT`: collector address (default port: 12555)
/// - `POUR_PROJECT_KEY`, `POUR_CLIENT`, `POUR_CLIENT_KEY`: static credentials
/// - `POUR_TLS`: use https (default: true)
/// - `POUR_ACCEPT_INVALID_CERTS`: skip certificate verification (default: false)
/// - `POUR_LOG_PATH`: directory holding `logs/` (default: `.`)
/// - `POUR_CONSOLE`: echo events to stdout (default: true)
/// - `POUR_REQUEST_TIMEOUT_SECS`, `POUR_SHIP_INTERVAL_SECS`,
///   `POUR_HARDWARE_INTERVAL_SECS`, `POUR_MAX_LOG_FAILURES`
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Ship events and hardware samples to the collector
    pub remote_logs: bool,

    /// Collector host name or address
    pub host: String,

    /// Collector port
    pub port: u16,

    /// Project key, sent as `X-KEY`
    pub project_key: String,

    /// Client id, sent as `X-CLIENT`
    pub client: String,

    /// Client secret, sent as `Authorization`
    pub client_key: String,

    /// Use https instead of http
    pub tls: bool,

    /// Accept invalid TLS certificates. Opt-in only.
    pub accept_invalid_certs: bool,

    /// Directory under which `logs/` is created
    pub log_path: PathBuf,

    /// Echo non-silent events to stdout
    pub console: bool,

    /// HTTP request timeout
    pub request_timeout: Duration,

    /// Time between log shipments
    pub ship_interval: Duration,

    /// Time between hardware samples
    pub hardware_interval: Duration,

    /// Window CPU usage is measured over
    pub cpu_sample_window: Duration,

    /// Failed shipments tolerated before remote logging is disabled
    pub max_log_failures: u32,

    /// Hardware failures that are reported before going quiet
    pub hardware_quiet_limit: u32,
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub key: Option<String>,
}

impl ConfigError {
    fn for_key(key: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.key {
            Some(key) => write!(f, "Configuration error for {}: {}", key, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

/// On-disk JSON layout. Only the connection fields are required to be
/// meaningful; everything else has a default.
#[derive(Debug, Deserialize)]
struct FileConfig {
    #[serde(default)]
    remote_logs: bool,
    #[serde(default)]
    project_key: String,
    #[serde(default)]
    host: String,
    #[serde(default)]
    port: i64,
    #[serde(default)]
    client: String,
    #[serde(default)]
    client_key: String,
    #[serde(default = "default_true")]
    tls: bool,
    #[serde(default)]
    accept_invalid_certs: bool,
    #[serde(default)]
    log_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set but cannot be parsed, or
    /// if the shipment interval is outside 1..=300 seconds, or if the request
    /// timeout is below 1 second.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let ship_interval_secs =
            parse_var("POUR_SHIP_INTERVAL_SECS")?.unwrap_or(DEFAULT_SHIP_INTERVAL_SECS);
        validate_ship_interval("POUR_SHIP_INTERVAL_SECS", ship_interval_secs)?;

        let request_timeout_secs =
            parse_var("POUR_REQUEST_TIMEOUT_SECS")?.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        validate_request_timeout("POUR_REQUEST_TIMEOUT_SECS", request_timeout_secs)?;

        Ok(Self {
            remote_logs: parse_bool("POUR_REMOTE_LOGS")?.unwrap_or(defaults.remote_logs),
            host: env::var("POUR_HOST").unwrap_or_default(),
            port: parse_var("POUR_PORT")?.unwrap_or(DEFAULT_PORT),
            project_key: env::var("POUR_PROJECT_KEY").unwrap_or_default(),
            client: env::var("POUR_CLIENT").unwrap_or_default(),
            client_key: env::var("POUR_CLIENT_KEY").unwrap_or_default(),
            tls: parse_bool("POUR_TLS")?.unwrap_or(defaults.tls),
            accept_invalid_certs: parse_bool("POUR_ACCEPT_INVALID_CERTS")?
                .unwrap_or(defaults.accept_invalid_certs),
            log_path: env::var("POUR_LOG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_path),
            console: parse_bool("POUR_CONSOLE")?.unwrap_or(defaults.console),
            request_timeout: Duration::from_secs(request_timeout_secs),
            ship_interval: Duration::from_secs(ship_interval_secs),
            hardware_interval: Duration::from_secs(
                parse_var("POUR_HARDWARE_INTERVAL_SECS")?
                    .unwrap_or(DEFAULT_HARDWARE_INTERVAL_SECS),
            ),
            cpu_sample_window: defaults.cpu_sample_window,
            max_log_failures: parse_var("POUR_MAX_LOG_FAILURES")?
                .unwrap_or(DEFAULT_MAX_LOG_FAILURES),
            hardware_quiet_limit: defaults.hardware_quiet_limit,
        })
    }

    /// Load configuration from a JSON file.
    ///
    /// The file carries the connection settings (`remote_logs`,
    /// `project_key`, `host`, `port`, `client`, `client_key`, `tls`) and
    /// optionally `accept_invalid_certs` and `log_path`. Timing settings
    /// keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let key = path.display().to_string();

        let contents = fs::read_to_string(path)
            .map_err(|e| ConfigError::for_key(&key, format!("cannot read file: {}", e)))?;
        Self::from_json(&contents).map_err(|e| ConfigError {
            key: Some(key),
            ..e
        })
    }

    /// Parse configuration from JSON text in the config file layout.
    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = serde_json::from_str(contents).map_err(|e| ConfigError {
            message: format!("invalid JSON: {}", e),
            key: None,
        })?;

        let port = u16::try_from(file.port).unwrap_or(0);
        let defaults = Self::default();

        Ok(Self {
            remote_logs: file.remote_logs,
            host: file.host,
            port,
            project_key: file.project_key,
            client: file.client,
            client_key: file.client_key,
            tls: file.tls,
            accept_invalid_certs: file.accept_invalid_certs,
            log_path: file.log_path.unwrap_or(defaults.log_path),
            ..defaults
        })
    }

    /// Whether every field needed to reach the collector is present.
    pub fn remote_ready(&self) -> bool {
        !self.host.is_empty()
            && self.port > 0
            && !self.project_key.is_empty()
            && !self.client.is_empty()
            && !self.client_key.is_empty()
    }

    /// `https` or `http`, depending on the TLS flag.
    pub fn scheme(&self) -> &'static str {
        if self.tls {
            "https"
        } else {
            "http"
        }
    }

    /// Collector base URL, e.g. `https://127.0.0.1:12555`.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme(), self.host, self.port)
    }
}

impl Default for Config {
    /// Local-only configuration with default timings.
    fn default() -> Self {
        Self {
            remote_logs: false,
            host: String::new(),
            port: DEFAULT_PORT,
            project_key: String::new(),
            client: String::new(),
            client_key: String::new(),
            tls: true,
            accept_invalid_certs: false,
            log_path: PathBuf::from("."),
            console: true,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            ship_interval: Duration::from_secs(DEFAULT_SHIP_INTERVAL_SECS),
            hardware_interval: Duration::from_secs(DEFAULT_HARDWARE_INTERVAL_SECS),
            cpu_sample_window: Duration::from_secs(DEFAULT_CPU_SAMPLE_WINDOW_SECS),
            max_log_failures: DEFAULT_MAX_LOG_FAILURES,
            hardware_quiet_limit: DEFAULT_HARDWARE_QUIET_LIMIT,
        }
    }
}

/// Parse an optional environment variable.
fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::for_key(name, format!("'{}' is not a valid value", value))),
        Err(_) => Ok(None),
    }
}

/// Parse an optional boolean environment variable (true/false/1/0/yes/no).
fn parse_bool(name: &str) -> Result<Option<bool>, ConfigError> {
    match env::var(name) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::for_key(
                name,
                format!("'{}' is not a valid boolean", value),
            )),
        },
        Err(_) => Ok(None),
    }
}

fn validate_ship_interval(name: &str, secs: u64) -> Result<(), ConfigError> {
    if secs < MIN_SHIP_INTERVAL_SECS {
        return Err(ConfigError::for_key(
            name,
            format!(
                "ship interval {} is below minimum ({}s)",
                secs, MIN_SHIP_INTERVAL_SECS
            ),
        ));
    }
    if secs > MAX_SHIP_INTERVAL_SECS {
        return Err(ConfigError::for_key(
            name,
            format!(
                "ship interval {} exceeds maximum ({}s)",
                secs, MAX_SHIP_INTERVAL_SECS
            ),
        ));
    }
    Ok(())
}

fn validate_request_timeout(name: &str, secs: u64) -> Result<(), ConfigError> {
    if secs < MIN_REQUEST_TIMEOUT_SECS {
        return Err(ConfigError::for_key(
            name,
            format!(
                "request timeout {} is below minimum ({}s)",
                secs, MIN_REQUEST_TIMEOUT_SECS
            ),
        ));
    }
    Ok(())
}
