use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{bail, Context, Result};

/// Deployment flavour. Anything but `Production` may fall back to a default
/// tenant and a fake calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Production,
    Demo,
    Test,
}

impl AppEnv {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(AppEnv::Production),
            "demo" | "development" | "dev" => Ok(AppEnv::Demo),
            "test" => Ok(AppEnv::Test),
            other => bail!("APP_ENV must be production, demo or test, got '{other}'"),
        }
    }

    pub fn is_production(&self) -> bool {
        *self == AppEnv::Production
    }
}

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub anthropic_api_key: String,
    pub llm_model: String,
    pub llm_timeout_secs: u64,
    pub transport_send_url: String,
    pub transport_api_token: Option<String>,
    pub calendar_api_url: Option<String>,
    pub calendar_api_token: Option<String>,
    pub calendar_timeout_secs: u64,
    pub app_env: AppEnv,
    pub default_tenant_id: Option<String>,
    /// origin id → tenant id, consulted before the tenant directory.
    pub tenant_fallback_origins: HashMap<String, String>,
    pub tenant_cache_ttl_secs: u64,
    pub max_distance_km: f64,
    pub scheduling_days_ahead: u32,
    pub conversation_idle_hours: Option<i64>,
    pub history_window: usize,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let config = Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: optional_env("REDIS_URL"),
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            llm_model: optional_env("LLM_MODEL")
                .unwrap_or_else(|| crate::llm_client::DEFAULT_MODEL.to_string()),
            llm_timeout_secs: parse_env("LLM_TIMEOUT_SECS", 20)?,
            transport_send_url: require_env("TRANSPORT_SEND_URL")?,
            transport_api_token: optional_env("TRANSPORT_API_TOKEN"),
            calendar_api_url: optional_env("CALENDAR_API_URL"),
            calendar_api_token: optional_env("CALENDAR_API_TOKEN"),
            calendar_timeout_secs: parse_env("CALENDAR_TIMEOUT_SECS", 10)?,
            app_env: optional_env("APP_ENV")
                .map(|v| AppEnv::parse(&v))
                .transpose()?
                .unwrap_or(AppEnv::Production),
            default_tenant_id: optional_env("DEFAULT_TENANT_ID"),
            tenant_fallback_origins: optional_env("TENANT_FALLBACK_ORIGINS")
                .map(|v| parse_origin_table(&v))
                .transpose()?
                .unwrap_or_default(),
            tenant_cache_ttl_secs: parse_env("TENANT_CACHE_TTL_SECS", 300)?,
            max_distance_km: parse_env("MAX_DISTANCE_KM", crate::matching::DEFAULT_MAX_DISTANCE_KM)?,
            scheduling_days_ahead: parse_env("SCHEDULING_DAYS_AHEAD", 5)?,
            conversation_idle_hours: optional_env("CONVERSATION_IDLE_HOURS")
                .map(|v| v.parse::<i64>())
                .transpose()
                .context("CONVERSATION_IDLE_HOURS must be a whole number of hours")?,
            history_window: parse_env("HISTORY_WINDOW", 10)?,
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Production must be fully table-driven: no silent default tenant, no fake calendar.
    fn validate(&self) -> Result<()> {
        if !self.app_env.is_production() {
            return Ok(());
        }
        if self.calendar_api_token.is_none() {
            bail!("CALENDAR_API_TOKEN is required when APP_ENV=production");
        }
        if self.max_distance_km <= 0.0 {
            bail!("MAX_DISTANCE_KM must be positive");
        }
        Ok(())
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value '{value}'")),
        None => Ok(default),
    }
}

/// Parses `origin=tenant,origin=tenant`.
fn parse_origin_table(value: &str) -> Result<HashMap<String, String>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| -> Result<(String, String)> {
            let (origin, tenant) = pair
                .split_once('=')
                .with_context(|| format!("TENANT_FALLBACK_ORIGINS entry '{pair}' is not origin=tenant"))?;
            let (origin, tenant) = (origin.trim(), tenant.trim());
            if origin.is_empty() || tenant.is_empty() {
                bail!("TENANT_FALLBACK_ORIGINS entry '{pair}' has an empty side");
            }
            Ok((origin.to_string(), tenant.to_string()))
        })
        .collect()
}
