//! Agent configuration loaded from environment variables.
//!
//! Loading is all-or-nothing at startup: a missing required variable or an
//! unparseable value is a fatal error surfaced before any connection is
//! attempted. The binary's module docs carry the full variable table.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default broker TLS port.
const DEFAULT_MQTT_PORT: u16 = 8883;

/// Default client identifier presented to the broker.
const DEFAULT_CLIENT_ID: &str = "thermwatch-agent";

/// Default overheat threshold in degrees Celsius.
const DEFAULT_THRESHOLD_C: f64 = 70.0;

/// Default seconds between monitoring ticks.
const DEFAULT_SAMPLE_INTERVAL_SECS: u64 = 5;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Everything the daemon needs to start, resolved once at boot.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Broker hostname (the account's device data endpoint).
    pub endpoint: String,
    /// Broker TLS port (default `8883`).
    pub port: u16,
    /// Client identifier presented to the broker.
    pub client_id: String,
    /// Root CA bundle path.
    pub root_ca_path: PathBuf,
    /// Client certificate path.
    pub cert_path: PathBuf,
    /// Client private key path.
    pub private_key_path: PathBuf,
    /// SNS topic for cloud alert delivery; the cloud sink is disabled when
    /// absent.
    pub sns_topic_arn: Option<String>,
    /// API key for the text-generation service.
    pub openai_api_key: String,
    /// Completion model override.
    pub openai_model: Option<String>,
    /// Overheat threshold in degrees Celsius (default `70.0`).
    pub threshold_c: f64,
    /// Fixed probe id; the first detected probe is used when absent.
    pub sensor_id: Option<String>,
    /// Classifier model artifact path; threshold mode when absent.
    pub model_path: Option<PathBuf>,
    /// Pause between monitoring ticks (default 5 seconds).
    pub sample_interval: Duration,
}

impl AgentConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup. Tests inject a closure over
    /// a map instead of mutating the process environment.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let endpoint = require(&lookup, "IOT_ENDPOINT")?;
        let root_ca_path = PathBuf::from(require(&lookup, "ROOT_CA_PATH")?);
        let cert_path = PathBuf::from(require(&lookup, "CERT_PATH")?);
        let private_key_path = PathBuf::from(require(&lookup, "PRIVATE_KEY_PATH")?);
        let openai_api_key = require(&lookup, "OPENAI_API_KEY")?;

        let port: u16 = parse_or(&lookup, "MQTT_PORT", DEFAULT_MQTT_PORT)?;

        let threshold_c: f64 = parse_or(&lookup, "THRESHOLD", DEFAULT_THRESHOLD_C)?;
        if !threshold_c.is_finite() {
            return Err(ConfigError::Invalid {
                name: "THRESHOLD",
                reason: "must be a finite number".to_string(),
            });
        }

        let interval_secs: u64 =
            parse_or(&lookup, "SAMPLE_INTERVAL_SECS", DEFAULT_SAMPLE_INTERVAL_SECS)?;
        if interval_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "SAMPLE_INTERVAL_SECS",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            endpoint,
            port,
            client_id: optional(&lookup, "MQTT_CLIENT_ID")
                .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
            root_ca_path,
            cert_path,
            private_key_path,
            sns_topic_arn: optional(&lookup, "SNS_TOPIC_ARN"),
            openai_api_key,
            openai_model: optional(&lookup, "OPENAI_MODEL"),
            threshold_c,
            sensor_id: optional(&lookup, "SENSOR_ID"),
            model_path: optional(&lookup, "MODEL_PATH").map(PathBuf::from),
            sample_interval: Duration::from_secs(interval_secs),
        })
    }
}

/// A required variable; blank counts as unset.
fn require(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional(lookup, name).ok_or(ConfigError::Missing(name))
}

/// An optional variable; blank counts as unset.
fn optional(lookup: &impl Fn(&str) -> Option<String>, name: &'static str) -> Option<String> {
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// An optional variable parsed into `T`, falling back to `default` when
/// unset.
fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(lookup, name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
