//! Configuration structures for labtrace.
//!
//! Configuration is loaded from TOML files and can be overridden via CLI flags.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Broker connection configuration
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Collector configuration
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// MQTT broker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    /// Broker host name or address
    #[serde(default = "default_address")]
    pub address: String,

    /// Broker port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Client identifier (defaults to `{hostname}:{experiment}:{type}`)
    #[serde(default)]
    pub client_id: Option<String>,

    /// Optional prefix prepended to every subscription topic
    #[serde(default)]
    pub topic_root: Option<String>,

    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive_seconds")]
    pub keep_alive_seconds: u64,

    /// Time allowed for CONNACK and SUBACK in seconds
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,

    /// Start a clean session instead of resuming the broker-side one
    #[serde(default)]
    pub clean_session: bool,

    /// Largest MQTT packet accepted or sent, in bytes
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            client_id: None,
            topic_root: None,
            keep_alive_seconds: default_keep_alive_seconds(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
            clean_session: false,
            max_packet_size: default_max_packet_size(),
        }
    }
}

impl BrokerConfig {
    /// `address:port` form used in logs and errors.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Connect timeout as a duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

/// Per-experiment collector configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectorConfig {
    /// Experiment identifier
    #[serde(default)]
    pub experiment: String,

    /// Kind of trace to collect
    #[serde(default)]
    pub record_type: RecordFormat,

    /// Retention window in milliseconds
    #[serde(default = "default_retention_ms")]
    pub retention_ms: u64,

    /// Output file (defaults to a name derived from experiment and type)
    #[serde(default)]
    pub output: Option<PathBuf>,

    /// Name of the numeric timestamp field in structured records
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            experiment: String::new(),
            record_type: RecordFormat::default(),
            retention_ms: default_retention_ms(),
            output: None,
            timestamp_field: default_timestamp_field(),
        }
    }
}

impl CollectorConfig {
    /// Retention window as a duration.
    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }

    /// Output path, falling back to `experiment-{experiment}.{ext}`.
    ///
    /// The default name is kept within `MAX_FILE_NAME_LEN` bytes by
    /// shortening the experiment part.
    pub fn output_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            let extension = self.record_type.file_extension();
            let budget = MAX_FILE_NAME_LEN - DEFAULT_OUTPUT_PREFIX.len() - extension.len() - 1;
            let experiment = sanitize_file_name(&self.experiment);
            PathBuf::from(format!(
                "{}{}.{}",
                DEFAULT_OUTPUT_PREFIX,
                truncate_on_char_boundary(&experiment, budget),
                extension
            ))
        })
    }
}

/// Encoding of the records carried on an experiment's output topic.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RecordFormat {
    /// JSON documents with an embedded numeric timestamp
    #[default]
    #[serde(alias = "json")]
    Structured,
    /// pcap records with a 16-byte little-endian header
    #[serde(alias = "pcap")]
    RawCapture,
}

impl RecordFormat {
    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordFormat::Structured => "structured",
            RecordFormat::RawCapture => "raw-capture",
        }
    }

    /// Topic segment under `experiment/{id}/output/`.
    pub fn topic_segment(&self) -> &'static str {
        match self {
            RecordFormat::Structured => "structured",
            RecordFormat::RawCapture => "binary",
        }
    }

    /// Extension of the default output file.
    pub fn file_extension(&self) -> &'static str {
        match self {
            RecordFormat::Structured => "json",
            RecordFormat::RawCapture => "pcap",
        }
    }
}

impl std::fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordFormat {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "structured" | "json" => Ok(RecordFormat::Structured),
            "raw-capture" | "raw" | "pcap" => Ok(RecordFormat::RawCapture),
            other => Err(crate::Error::Config(format!(
                "Unknown record type '{}' (expected structured or raw-capture)",
                other
            ))),
        }
    }
}

/// Monitoring configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,

    /// Port for the /health and /metrics endpoints (disabled when unset)
    #[serde(default)]
    pub http_port: Option<u16>,
}

/// Log level.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text format (default)
    #[default]
    Text,
    /// JSON format
    Json,
}

/// Longest file name most filesystems accept, in bytes.
pub const MAX_FILE_NAME_LEN: usize = 255;

const DEFAULT_OUTPUT_PREFIX: &str = "experiment-";

// Default value functions
fn default_address() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    1883
}
fn default_keep_alive_seconds() -> u64 {
    30
}
fn default_connect_timeout_seconds() -> u64 {
    10
}
fn default_max_packet_size() -> usize {
    1024 * 1024
}
fn default_retention_ms() -> u64 {
    5000
}
fn default_timestamp_field() -> String {
    "timestamp".to_string()
}

/// Replace characters that are unsafe in file names.
///
/// Path separators, control characters and the Windows reserved set become
/// `_`, as do the `.`/`..` names.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '?' | '<' | '>' | ':' | '*' | '|' | '"' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// Longest prefix of `s` no longer than `max` bytes.
fn truncate_on_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.broker.address.is_empty() {
            return Err(crate::Error::Config("Broker address is required".into()));
        }

        if self.broker.port == 0 {
            return Err(crate::Error::Config("Broker port must be non-zero".into()));
        }

        if self.broker.max_packet_size == 0 {
            return Err(crate::Error::Config(
                "Maximum packet size must be non-zero".into(),
            ));
        }

        if self.collector.experiment.is_empty() {
            return Err(crate::Error::Config(
                "Experiment identifier is required".into(),
            ));
        }

        if self
            .collector
            .experiment
            .contains(|c| matches!(c, '/' | '+' | '#'))
        {
            return Err(crate::Error::Config(format!(
                "Experiment identifier '{}' must not contain '/', '+' or '#'",
                self.collector.experiment
            )));
        }

        if self.collector.retention_ms == 0 {
            return Err(crate::Error::Config(
                "Retention window must be at least 1ms".into(),
            ));
        }

        if self.collector.record_type == RecordFormat::Structured
            && self.collector.timestamp_field.is_empty()
        {
            return Err(crate::Error::Config(
                "Timestamp field name is required for structured records".into(),
            ));
        }

        if self.broker.clean_session {
            tracing::warn!("Clean session requested, messages published while offline are lost");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.collector.experiment = "exp-1".into();
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.broker.address, "localhost");
        assert_eq!(config.broker.port, 1883);
        assert!(!config.broker.clean_session);
        assert_eq!(config.broker.max_packet_size, 1024 * 1024);
        assert_eq!(config.collector.retention_ms, 5000);
        assert_eq!(config.collector.retention(), Duration::from_secs(5));
        assert_eq!(config.collector.record_type, RecordFormat::Structured);
        assert_eq!(config.collector.timestamp_field, "timestamp");
        assert!(config.monitoring.http_port.is_none());
    }

    #[test]
    fn test_config_validation() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_config_validation_empty_experiment() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_wildcard_experiment() {
        for bad in ["a/b", "a+", "#"] {
            let mut config = valid_config();
            config.collector.experiment = bad.into();
            assert!(config.validate().is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_config_validation_zero_retention() {
        let mut config = valid_config();
        config.collector.retention_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_packet_size() {
        let mut config = valid_config();
        config.broker.max_packet_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_long_experiment_output_name_fits_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = valid_config();
        config.collector.experiment = "e".repeat(300);
        assert!(config.validate().is_ok());

        let path = config.collector.output_path();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(name.len(), MAX_FILE_NAME_LEN);
        assert!(name.starts_with("experiment-eee"));
        assert!(name.ends_with(".json"));
        std::fs::File::create(dir.path().join(&path)).unwrap();
    }

    #[test]
    fn test_long_multibyte_experiment_truncates_on_char_boundary() {
        let mut config = valid_config();
        config.collector.experiment = "é".repeat(200);
        config.collector.record_type = RecordFormat::RawCapture;

        let path = config.collector.output_path();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.len() <= MAX_FILE_NAME_LEN);
        assert!(name.ends_with("é.pcap"));
    }

    #[test]
    fn test_short_experiment_output_name_unchanged() {
        let mut config = valid_config();
        config.collector.experiment = "radio:42".into();
        assert_eq!(
            config.collector.output_path(),
            PathBuf::from("experiment-radio_42.json")
        );
    }

    #[test]
    fn test_config_validation_zero_port() {
        let mut config = valid_config();
        config.broker.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml() {
        let config: Config = toml::from_str(
            r#"
            [broker]
            address = "broker.lab"
            port = 8883
            topic_root = "sensorlab"
            max_packet_size = 65536

            [collector]
            experiment = "radio-42"
            record_type = "pcap"
            retention_ms = 250

            [monitoring]
            log_format = "json"
            http_port = 9090
            "#,
        )
        .unwrap();

        assert_eq!(config.broker.endpoint(), "broker.lab:8883");
        assert_eq!(config.broker.topic_root.as_deref(), Some("sensorlab"));
        assert_eq!(config.broker.max_packet_size, 65536);
        assert_eq!(config.collector.record_type, RecordFormat::RawCapture);
        assert_eq!(config.collector.retention(), Duration::from_millis(250));
        assert_eq!(config.monitoring.log_format, LogFormat::Json);
        assert_eq!(config.monitoring.http_port, Some(9090));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_record_format_from_str() {
        assert_eq!(
            "structured".parse::<RecordFormat>().unwrap(),
            RecordFormat::Structured
        );
        assert_eq!(
            "JSON".parse::<RecordFormat>().unwrap(),
            RecordFormat::Structured
        );
        assert_eq!(
            "raw-capture".parse::<RecordFormat>().unwrap(),
            RecordFormat::RawCapture
        );
        assert_eq!(
            "pcap".parse::<RecordFormat>().unwrap(),
            RecordFormat::RawCapture
        );
        assert!("csv".parse::<RecordFormat>().is_err());
    }

    #[test]
    fn test_record_format_names() {
        assert_eq!(RecordFormat::Structured.topic_segment(), "structured");
        assert_eq!(RecordFormat::RawCapture.topic_segment(), "binary");
        assert_eq!(RecordFormat::RawCapture.to_string(), "raw-capture");
    }

    #[test]
    fn test_default_output_path() {
        let mut config = valid_config();
        assert_eq!(
            config.collector.output_path(),
            PathBuf::from("experiment-exp-1.json")
        );

        config.collector.experiment = "lab:run*1".into();
        config.collector.record_type = RecordFormat::RawCapture;
        assert_eq!(
            config.collector.output_path(),
            PathBuf::from("experiment-lab_run_1.pcap")
        );

        config.collector.output = Some(PathBuf::from("/tmp/out.pcap"));
        assert_eq!(
            config.collector.output_path(),
            PathBuf::from("/tmp/out.pcap")
        );
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("plain-name_1"), "plain-name_1");
        assert_eq!(sanitize_file_name("a\\b\"c"), "a_b_c");
        assert_eq!(sanitize_file_name(".."), "_");
        assert_eq!(sanitize_file_name(""), "_");
        assert_eq!(sanitize_file_name("tab\there"), "tab_here");
    }

    #[test]
    fn test_log_level_filter() {
        assert_eq!(LogLevel::default().as_filter(), "info");
        assert_eq!(LogLevel::Trace.as_filter(), "trace");
    }
}
