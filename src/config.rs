use anyhow::{Context, Result};
use std::time::Duration;

use crate::i18n::Language;
use crate::retry::RetryConfig;
use crate::scheduler::SchedulerConfig;
use crate::tasks::RetranslatePolicy;

const DEFAULT_TRANSLATION_API_URL: &str =
    "https://translation.googleapis.com/language/translate/v2";

#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub environment: String,
    pub server_host: String,
    pub server_port: u16,
    pub allowed_origins: Vec<String>,

    // Database (in-memory store when unset)
    pub database_url: Option<String>,
    pub database_max_connections: u32,

    // Auth
    pub secret_key: String,
    pub access_token_expire_minutes: i64,
    pub refresh_token_expire_days: i64,
    pub admin_api_key: Option<String>,

    // Translation provider
    pub translation_api_key: String,
    pub translation_api_url: String,
    pub translation_timeout: Duration,
    pub translation_target_language: Language,

    // Translation jobs
    pub translation_workers: usize,
    pub translation_queue_capacity: usize,
    pub translation_max_attempts: u32,
    pub retranslate_on_update: RetranslatePolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let translation_target_language = Language::from_code(
            &std::env::var("TRANSLATION_TARGET_LANGUAGE").unwrap_or_else(|_| "en".to_string()),
        )
        .context("TRANSLATION_TARGET_LANGUAGE is not a supported language")?;

        if translation_target_language.is_canonical() {
            anyhow::bail!(
                "TRANSLATION_TARGET_LANGUAGE must differ from the canonical language ({})",
                Language::canonical()
            );
        }

        let translation_timeout_secs: u64 = parse_or("TRANSLATION_TIMEOUT_SECS", 10)?;
        if translation_timeout_secs == 0 {
            anyhow::bail!("TRANSLATION_TIMEOUT_SECS must be at least 1");
        }

        Ok(Self {
            // Server
            environment: std::env::var("ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
            server_host: std::env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: parse_or("SERVER_PORT", 8000)?,
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .map(|v| parse_list(&v))
                .unwrap_or_default(),

            // Database
            database_url: optional("DATABASE_URL"),
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 5)?,

            // Auth
            secret_key: std::env::var("SECRET_KEY").context("SECRET_KEY not set")?,
            access_token_expire_minutes: parse_or("ACCESS_TOKEN_EXPIRE_MINUTES", 30)?,
            refresh_token_expire_days: parse_or("REFRESH_TOKEN_EXPIRE_DAYS", 7)?,
            admin_api_key: optional("ADMIN_API_KEY"),

            // Translation provider
            translation_api_key: std::env::var("TRANSLATION_API_KEY")
                .context("TRANSLATION_API_KEY not set")?,
            translation_api_url: std::env::var("TRANSLATION_API_URL")
                .unwrap_or_else(|_| DEFAULT_TRANSLATION_API_URL.to_string()),
            translation_timeout: Duration::from_secs(translation_timeout_secs),
            translation_target_language,

            // Translation jobs
            translation_workers: parse_or("TRANSLATION_WORKERS", 4)?,
            translation_queue_capacity: parse_or("TRANSLATION_QUEUE_CAPACITY", 1024)?,
            translation_max_attempts: parse_or("TRANSLATION_MAX_ATTEMPTS", 1)?,
            retranslate_on_update: match optional("RETRANSLATE_ON_UPDATE") {
                Some(v) => v
                    .parse::<RetranslatePolicy>()
                    .context("RETRANSLATE_ON_UPDATE must be 'always' or 'respect_auto_translate'")?,
                None => RetranslatePolicy::default(),
            },
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Address the HTTP server binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            workers: self.translation_workers,
            queue_capacity: self.translation_queue_capacity,
            source: Language::canonical(),
            target: self.translation_target_language,
            retry: RetryConfig::translation_job(self.translation_max_attempts),
        }
    }
}

/// Unset and blank values both count as absent.
fn optional(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(key) {
        Some(v) => v
            .parse()
            .with_context(|| format!("{} has invalid value '{}'", key, v)),
        None => Ok(default),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
