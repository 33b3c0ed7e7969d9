use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub stripe: StripeConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StripeConfig {
    pub secret_key: Option<String>,
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconciliationConfig {
    /// Intents per gateway lookup. Kept small to respect the gateway's
    /// bulk limits; independent of the persistence chunk size.
    pub gateway_batch_size: usize,
    /// Payment ids fetched per database page during a sweep.
    pub db_chunk_size: usize,
    /// Pause between gateway batches, for rate limiting.
    pub inter_batch_delay_ms: u64,
    /// Bound on every single gateway call.
    pub gateway_timeout_secs: u64,
    /// Ledger retry cutoff; after this many failures an event is parked.
    pub max_retries: i32,
    /// Sweep scheduler period.
    pub sweep_interval_secs: u64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            gateway_batch_size: 20,
            db_chunk_size: 100,
            inter_batch_delay_ms: 500,
            gateway_timeout_secs: 30,
            max_retries: 5,
            sweep_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    pub from: String,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("database.max_connections", 10)?
            .set_default("stripe.enabled", false)?
            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Environment variables with BURSAR__ prefix, double underscore
            // separates levels
            .add_source(Environment::with_prefix("BURSAR").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "sqlite://bursar.db".to_string(),
                max_connections: 10,
            },
            stripe: StripeConfig::default(),
            reconciliation: ReconciliationConfig::default(),
            smtp: None,
        }
    }
}
