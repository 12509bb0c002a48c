use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::gateway::GatewayConfig;
use crate::services::{CircuitBreakerConfig, NotifierConfig, ReconcilerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("LOG_FORMAT must be 'pretty' or 'json', got '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub redis_url: String,
    pub gateway_url: String,
    pub gateway_api_key: Option<String>,
    pub regulator_webhook_url: String,
    pub gateway_timeout: Duration,
    pub circuit_breaker: CircuitBreakerConfig,
    pub user_concurrency_limit: usize,
    pub lock_prefix: String,
    pub lock_ttl: Duration,
    pub reconciler: ReconcilerConfig,
    pub notifier: NotifierConfig,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok(); // Load .env file if present

        let notifier_defaults = NotifierConfig::default();

        Ok(Config {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 5)?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            gateway_url: env::var("SETTLEMENT_GATEWAY_URL")
                .context("SETTLEMENT_GATEWAY_URL must be set")?,
            gateway_api_key: env::var("SETTLEMENT_GATEWAY_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            regulator_webhook_url: env::var("REGULATOR_WEBHOOK_URL")
                .context("REGULATOR_WEBHOOK_URL must be set")?,
            gateway_timeout: Duration::from_secs(parse_or("GATEWAY_TIMEOUT_SECS", 10)?),
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: parse_or("CIRCUIT_BREAKER_FAILURE_THRESHOLD", 5)?,
                cooldown: Duration::from_secs(parse_or("CIRCUIT_BREAKER_COOLDOWN_SECS", 30)?),
            },
            user_concurrency_limit: parse_or("USER_CONCURRENCY_LIMIT", 5)?,
            lock_prefix: env::var("LOCK_PREFIX").unwrap_or_else(|_| "lock:".to_string()),
            lock_ttl: Duration::from_secs(parse_or("LOCK_TTL_SECS", 30)?),
            reconciler: ReconcilerConfig {
                interval: Duration::from_secs(parse_or("RECONCILE_INTERVAL_SECS", 5)?),
                batch_size: parse_or("RECONCILE_BATCH_SIZE", 100)?,
                stale_after: Duration::from_secs(parse_or("RECONCILE_STALE_AFTER_SECS", 120)?),
            },
            notifier: NotifierConfig {
                timeout: Duration::from_secs(parse_or("NOTIFIER_TIMEOUT_SECS", 60)?),
                poll_interval: Duration::from_secs(parse_or("NOTIFIER_POLL_INTERVAL_SECS", 1)?),
                max_retries: parse_or("NOTIFIER_MAX_RETRIES", 5)?,
                ..notifier_defaults
            },
            log_format: env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .parse()?,
        })
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            base_url: self.gateway_url.clone(),
            webhook_url: self.regulator_webhook_url.clone(),
            api_key: self.gateway_api_key.clone(),
            timeout: self.gateway_timeout,
            circuit_breaker: self.circuit_breaker.clone(),
        }
    }
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}

/// Hides the password component of a connection URL.
pub fn mask_password(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("****"));
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}
