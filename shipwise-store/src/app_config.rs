use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub kafka: KafkaConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub carriers: CarriersConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_request_timeout() -> u64 {
    30
}

/// No URL means the in-memory store
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RedisConfig {
    pub url: Option<String>,
}

/// Without brokers, events only go to the log
#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: Option<String>,
    #[serde(default = "default_topic")]
    pub topic: String,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: None,
            topic: default_topic(),
        }
    }
}

fn default_topic() -> String {
    "shipment-events".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CarriersConfig {
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Empty enables every known carrier
    #[serde(default)]
    pub enabled: Vec<String>,
    /// Wall-clock seconds per sandbox transit day
    #[serde(default = "default_sandbox_day")]
    pub sandbox_day_seconds: u64,
}

impl Default for CarriersConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout(),
            retry: RetryConfig::default(),
            enabled: Vec::new(),
            sandbox_day_seconds: default_sandbox_day(),
        }
    }
}

fn default_call_timeout() -> u64 {
    10_000
}

fn default_sandbox_day() -> u64 {
    86_400
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 200,
            max_backoff_ms: 2_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SweepConfig {
    pub interval_seconds: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self { interval_seconds: 900 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrackingConfig {
    pub cache_ttl_seconds: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self { cache_ttl_seconds: 300 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    pub requests: i64,
    pub window_seconds: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 100,
            window_seconds: 60,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // developer overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. SHIPWISE__DATABASE__URL=postgres://...
            .add_source(
                config::Environment::with_prefix("SHIPWISE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("carriers.enabled")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_sections_default() {
        let raw = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [server]
                port = 8080

                [auth]
                jwt_secret = "test-secret"

                [carriers]
                enabled = ["fedex"]
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let cfg: Config = raw.try_deserialize().unwrap();

        assert_eq!(cfg.server.request_timeout_seconds, 30);
        assert!(cfg.database.url.is_none());
        assert_eq!(cfg.kafka.topic, "shipment-events");
        assert_eq!(cfg.carriers.enabled, vec!["fedex".to_string()]);
        assert_eq!(cfg.carriers.retry.max_attempts, 1);
        assert_eq!(cfg.carriers.call_timeout_ms, 10_000);
        assert_eq!(cfg.tracking.cache_ttl_seconds, 300);
    }
}
