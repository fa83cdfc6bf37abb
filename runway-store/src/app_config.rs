use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    pub email: EmailConfig,
    pub push: PushConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
    /// Upper bound for a single booking transaction, including lock waits.
    #[serde(default = "default_transaction_timeout")]
    pub transaction_timeout_ms: u64,
}

fn default_max_connections() -> u32 { 10 }
fn default_acquire_timeout() -> u64 { 3 }
fn default_transaction_timeout() -> u64 { 5000 }

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    #[serde(default = "default_status_topic")]
    pub status_topic: String,
    /// Prefix of the relay consumer group; each instance appends its own id.
    #[serde(default = "default_group_id")]
    pub group_id: String,
}

fn default_status_topic() -> String { "flight.status".into() }
fn default_group_id() -> String { "runway-status-relay".into() }

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub email: ChannelConfig,
    #[serde(default)]
    pub push: ChannelConfig,
    #[serde(default = "default_idempotency_ttl")]
    pub idempotency_ttl_secs: u64,
    /// How long a claimed job stays with its worker before another
    /// instance may take it over.
    #[serde(default = "default_lease")]
    pub lease_secs: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            email: ChannelConfig::default(),
            push: ChannelConfig::default(),
            idempotency_ttl_secs: default_idempotency_ttl(),
            lease_secs: default_lease(),
        }
    }
}

fn default_idempotency_ttl() -> u64 { 86_400 }
fn default_lease() -> u64 { 60 }

#[derive(Debug, Deserialize, Clone)]
pub struct ChannelConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_initial")]
    pub backoff_initial_ms: u64,
}

impl ChannelConfig {
    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            backoff_initial_ms: default_backoff_initial(),
        }
    }
}

fn default_concurrency() -> usize { 2 }
fn default_max_attempts() -> u32 { 3 }
fn default_backoff_initial() -> u64 { 5000 }

#[derive(Debug, Deserialize, Clone)]
pub struct EmailConfig {
    pub endpoint: String,
    pub api_key: String,
    pub from: String,
}

/// OneSignal-compatible push provider.
#[derive(Debug, Deserialize, Clone)]
pub struct PushConfig {
    pub endpoint: String,
    pub app_id: String,
    pub api_key: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    pub requests: i64,
    pub window_seconds: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { requests: 100, window_seconds: 60 }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `RUNWAY_DATABASE__URL=postgres://...`
            .add_source(config::Environment::with_prefix("RUNWAY").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
