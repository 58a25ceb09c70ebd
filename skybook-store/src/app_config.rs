use rust_decimal::Decimal;
use serde::Deserialize;
use skybook_booking::{FarePolicy, SessionPolicy};
use skybook_gate::GatePaths;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub gate: GateConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    pub booking_ttl_seconds: i64,
    pub confirmed_ttl_seconds: i64,
    pub fresh_window_millis: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let policy = SessionPolicy::default();
        Self {
            booking_ttl_seconds: policy.booking_ttl_seconds,
            confirmed_ttl_seconds: policy.confirmed_ttl_seconds,
            fresh_window_millis: policy.fresh_window_millis,
        }
    }
}

impl From<&SessionConfig> for SessionPolicy {
    fn from(config: &SessionConfig) -> Self {
        SessionPolicy {
            booking_ttl_seconds: config.booking_ttl_seconds,
            confirmed_ttl_seconds: config.confirmed_ttl_seconds,
            fresh_window_millis: config.fresh_window_millis,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PricingConfig {
    pub tax_rate: Decimal,
    pub infant_fare_ratio: Decimal,
    pub currency: String,
}

impl Default for PricingConfig {
    fn default() -> Self {
        let policy = FarePolicy::default();
        Self {
            tax_rate: policy.tax_rate,
            infant_fare_ratio: policy.infant_fare_ratio,
            currency: policy.currency,
        }
    }
}

impl From<&PricingConfig> for FarePolicy {
    fn from(config: &PricingConfig) -> Self {
        FarePolicy {
            tax_rate: config.tax_rate,
            infant_fare_ratio: config.infant_fare_ratio,
            currency: config.currency.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_timeout() -> u64 {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    /// In-memory storage is used when absent
    pub url: Option<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            namespace: default_namespace(),
        }
    }
}

fn default_namespace() -> String {
    "skybook".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GateConfig {
    pub default_title: Option<String>,
}

impl From<&GateConfig> for GatePaths {
    fn from(config: &GateConfig) -> Self {
        let mut paths = GatePaths::default();
        if let Some(title) = config.default_title.clone().filter(|t| !t.is_empty()) {
            paths.default_title = title;
        }
        paths
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `SKYBOOK_SERVER__PORT=8080`
            .add_source(config::Environment::with_prefix("SKYBOOK").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    pub fn session_policy(&self) -> SessionPolicy {
        (&self.session).into()
    }

    pub fn fare_policy(&self) -> FarePolicy {
        (&self.pricing).into()
    }

    pub fn gate_paths(&self) -> GatePaths {
        (&self.gate).into()
    }
}
