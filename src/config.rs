//! Runtime configuration, read from the environment.
//!
//! `.env` is loaded first (`.env.test` when `CI=true`); real environment variables win.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::storage::StorageConfig;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_TEMPLATES_DIR: &str = "./templates";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_LIBREOFFICE_BIN: &str = "libreoffice";
pub const DEFAULT_PDF_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_REGION: &str = "us-east-1";

const STORAGE_VARS: [&str; 4] = [
    "ENDPOINT_URL",
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "BUCKET_NAME",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error("object storage is partially configured, missing {0}")]
    IncompleteStorage(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConverterConfig {
    pub binary: PathBuf,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub templates_dir: PathBuf,
    pub log_level: String,
    /// Empty means any origin is allowed.
    pub cors_allowed_origins: Vec<String>,
    pub http_timeout: Duration,
    pub converter: ConverterConfig,
    pub storage: Option<StorageConfig>,
}

impl AppConfig {
    /// Loads the dotenv file for the current environment, then reads the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let env_file = if std::env::var("CI").as_deref() == Ok("true") {
            ".env.test"
        } else {
            ".env"
        };
        if let Err(e) = dotenvy::from_filename(env_file) {
            if !e.not_found() {
                log::warn!("[config] failed to load {env_file}: {e}");
            }
        }
        Self::from_env()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = parse_or(&var, "PORT", DEFAULT_PORT)?;
        let pdf_timeout = parse_or(&var, "PDF_TIMEOUT_SECS", DEFAULT_PDF_TIMEOUT_SECS)?;
        let http_timeout = parse_or(&var, "HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?;

        let cors_allowed_origins = var("CORS_ALLOWED_ORIGINS")
            .map(|origins| {
                origins
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            host: var("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            templates_dir: var("TEMPLATES_DIR")
                .unwrap_or_else(|| DEFAULT_TEMPLATES_DIR.to_string())
                .into(),
            log_level: var("LOG_LEVEL").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            cors_allowed_origins,
            http_timeout: Duration::from_secs(http_timeout),
            converter: ConverterConfig {
                binary: var("LIBREOFFICE_BIN")
                    .unwrap_or_else(|| DEFAULT_LIBREOFFICE_BIN.to_string())
                    .into(),
                timeout: Duration::from_secs(pdf_timeout),
            },
            storage: storage_config(&var)?,
        })
    }
}

fn parse_or<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { name, value }),
    }
}

fn storage_config<F>(var: &F) -> Result<Option<StorageConfig>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let missing: Vec<&str> = STORAGE_VARS
        .iter()
        .copied()
        .filter(|name| var(*name).is_none())
        .collect();

    if missing.len() == STORAGE_VARS.len() {
        return Ok(None);
    }
    if !missing.is_empty() {
        return Err(ConfigError::IncompleteStorage(missing.join(", ")));
    }

    let get = |name: &str| var(name).unwrap_or_default();
    Ok(Some(StorageConfig {
        endpoint_url: get("ENDPOINT_URL"),
        region: var("REGION_NAME").unwrap_or_else(|| DEFAULT_REGION.to_string()),
        access_key_id: get("AWS_ACCESS_KEY_ID"),
        secret_access_key: get("AWS_SECRET_ACCESS_KEY"),
        bucket: get("BUCKET_NAME"),
    }))
}
