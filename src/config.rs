use std::env;
use std::time::Duration;

use crate::error::AppError;

const DEV_ACCESS_SECRET: &str = "dev-access-secret-change-me";
const DEV_REFRESH_SECRET: &str = "dev-refresh-secret-change-me";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn parse(raw: &str) -> Result<Self, AppError> {
        match raw.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(AppError::Internal(format!("invalid APP_ENV: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub access_token_secret: String,
    pub refresh_token_secret: String,
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_hours: i64,
    pub register_key_admin: Option<String>,
    pub secure_cookies: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub environment: Environment,
    pub event_buffer_size: usize,
    pub connection_buffer_size: usize,
    pub storage_timeout: Duration,
    pub cors_origin: String,
    pub auth: AuthConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let environment = Environment::parse(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        )?;

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        };

        let auth = AuthConfig {
            access_token_secret: secret("ACCESS_TOKEN_SECRET", DEV_ACCESS_SECRET, environment)?,
            refresh_token_secret: secret("REFRESH_TOKEN_SECRET", DEV_REFRESH_SECRET, environment)?,
            access_token_ttl_minutes: parse_or_default("ACCESS_TOKEN_TTL_MINUTES", 15)?,
            refresh_token_ttl_hours: parse_or_default("REFRESH_TOKEN_TTL_HOURS", 48)?,
            register_key_admin: env::var("REGISTER_KEY_ADMIN").ok().filter(|k| !k.is_empty()),
            secure_cookies: environment == Environment::Production,
        };

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 5000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format,
            environment,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            connection_buffer_size: parse_or_default("CONNECTION_BUFFER_SIZE", 64)?,
            storage_timeout: Duration::from_millis(parse_or_default("STORAGE_TIMEOUT_MS", 2000)?),
            cors_origin: env::var("CORS_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            auth,
        })
    }

    /// Settings used by tests and local tooling; never reads the environment.
    pub fn for_tests() -> Self {
        Self {
            http_port: 0,
            log_level: "warn".to_string(),
            log_format: LogFormat::Compact,
            environment: Environment::Test,
            event_buffer_size: 256,
            connection_buffer_size: 16,
            storage_timeout: Duration::from_millis(500),
            cors_origin: "http://localhost:3000".to_string(),
            auth: AuthConfig {
                access_token_secret: DEV_ACCESS_SECRET.to_string(),
                refresh_token_secret: DEV_REFRESH_SECRET.to_string(),
                access_token_ttl_minutes: 15,
                refresh_token_ttl_hours: 48,
                register_key_admin: Some("test-admin-key".to_string()),
                secure_cookies: false,
            },
        }
    }

    pub fn exposes_tokens(&self) -> bool {
        self.environment == Environment::Development
    }
}

fn secret(key: &str, dev_default: &str, environment: Environment) -> Result<String, AppError> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ if environment == Environment::Production => {
            Err(AppError::Internal(format!("{key} must be set in production")))
        }
        _ => Ok(dev_default.to_string()),
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
