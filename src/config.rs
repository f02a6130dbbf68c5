use config::builder::{ConfigBuilder, DefaultState};
use config::{Config, ConfigError, File};
use serde::{Deserialize, Deserializer};

fn deserialize_allowed_origins<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }
    match StringOrVec::deserialize(deserializer) {
        Ok(StringOrVec::String(s)) => Ok(s.split(',').map(|x| x.trim().to_string()).filter(|x| !x.is_empty()).collect()),
        Ok(StringOrVec::Vec(v)) => Ok(v),
        Err(e) => Err(e),
    }
}

/// Window size for the full dashboard.
pub const FULL_WINDOW_CAPACITY: usize = 50;
/// Window size for the constrained (mobile) dashboard.
pub const CONSTRAINED_WINDOW_CAPACITY: usize = 30;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub backend: BackendConfig,
    #[serde(default)]
    pub session: SessionConfig,
    pub vitals: VitalsConfig,
    pub thresholds: ThresholdConfig,
    pub lockdown: LockdownConfig,
    pub reconnect: ReconnectConfig,
    pub status: StatusConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub scheme: String,
    pub host: String,
    pub http_port: u16,
    pub stream_port: Option<u16>,
    pub stream_path: String,
    pub request_timeout_ms: u64,
}

impl BackendConfig {
    pub fn rest_base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.http_port)
    }

    /// WebSocket URL of the streaming endpoint. Uses `wss` when the REST
    /// side is served over TLS.
    pub fn stream_url(&self) -> String {
        let ws_scheme = if self.scheme.eq_ignore_ascii_case("https") { "wss" } else { "ws" };
        let port = self.stream_port.unwrap_or(self.http_port);
        format!("{}://{}:{}{}", ws_scheme, self.host, port, self.stream_path)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionConfig {
    pub token: Option<String>,
    pub username: Option<String>,
    pub role: Option<String>,
    pub subject: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowProfile {
    Full,
    Constrained,
}

impl WindowProfile {
    pub fn capacity(self) -> usize {
        match self {
            WindowProfile::Full => FULL_WINDOW_CAPACITY,
            WindowProfile::Constrained => CONSTRAINED_WINDOW_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VitalsConfig {
    pub window_profile: WindowProfile,
    pub notifications: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdConfig {
    pub heart_rate_high: i32,
    pub spo2_low: f32,
    pub temperature_high: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockdownConfig {
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: f64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusConfig {
    pub enabled: bool,
    pub bind_addr: String,
    #[serde(deserialize_with = "deserialize_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub log_dir: String,
    /// `daily`, `hourly`, `minutely` or `never`.
    pub rotation: String,
    /// Also log to stdout.
    pub console: bool,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::builder()?
            .add_source(File::with_name("config.toml").required(false))
            .add_source(config::Environment::with_prefix("MEDHEALTH").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Settings made of the built-in defaults only.
    pub fn defaults() -> Result<Self, ConfigError> {
        Self::builder()?.build()?.try_deserialize()
    }

    fn builder() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("backend.scheme", "http")?
            .set_default("backend.host", "localhost")?
            .set_default("backend.http_port", 8080)?
            .set_default("backend.stream_path", "/ws-vitals/websocket")?
            .set_default("backend.request_timeout_ms", 5000)?
            .set_default("vitals.window_profile", "full")?
            .set_default("vitals.notifications", "granted")?
            .set_default("thresholds.heart_rate_high", 100)?
            .set_default("thresholds.spo2_low", 95.0)?
            .set_default("thresholds.temperature_high", 37.5)?
            .set_default("lockdown.poll_interval_ms", 3000)?
            .set_default("reconnect.initial_delay_ms", 500)?
            .set_default("reconnect.max_delay_ms", 30_000)?
            .set_default("reconnect.multiplier", 2.0)?
            .set_default("reconnect.jitter", 0.2)?
            .set_default("reconnect.max_attempts", 8)?
            .set_default("status.enabled", false)?
            .set_default("status.bind_addr", "127.0.0.1:9464")?
            .set_default("status.allowed_origins", "")?
            .set_default("logging.level", "info")?
            .set_default("logging.log_dir", "./logs")?
            .set_default("logging.rotation", "daily")?
            .set_default("logging.console", true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_deserialize() {
        let settings = Settings::defaults().expect("defaults should deserialize");

        assert_eq!(settings.backend.rest_base_url(), "http://localhost:8080");
        assert_eq!(settings.backend.stream_url(), "ws://localhost:8080/ws-vitals/websocket");
        assert_eq!(settings.vitals.window_profile.capacity(), FULL_WINDOW_CAPACITY);
        assert_eq!(settings.thresholds.heart_rate_high, 100);
        assert_eq!(settings.lockdown.poll_interval_ms, 3000);
        assert!(settings.session.token.is_none());
        assert!(settings.status.allowed_origins.is_empty());
        assert_eq!(settings.logging.rotation, "daily");
        assert!(settings.logging.console);
    }

    #[test]
    fn test_stream_port_override_and_tls() {
        let backend = BackendConfig {
            scheme: "https".to_string(),
            host: "ward.local".to_string(),
            http_port: 8443,
            stream_port: Some(9443),
            stream_path: "/ws-vitals/websocket".to_string(),
            request_timeout_ms: 5000,
        };

        assert_eq!(backend.rest_base_url(), "https://ward.local:8443");
        assert_eq!(backend.stream_url(), "wss://ward.local:9443/ws-vitals/websocket");
    }

    #[test]
    fn test_constrained_profile() {
        assert_eq!(WindowProfile::Constrained.capacity(), 30);
    }
}
