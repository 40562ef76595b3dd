use std::env;
use std::path::PathBuf;

use crate::admission::BucketLimits;
use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Database settings.
    pub database: DatabaseConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Admission controller settings.
    pub admission: AdmissionConfig,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
    /// Maximum pooled connections.
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log filter level (e.g. "info", "debug").
    pub level: String,
    /// Log output format.
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    /// Human-readable output.
    Pretty,
    /// Structured JSON output.
    Json,
}

/// Admission controller limits per operation class.
///
/// Write limits cover `insert_thought` and `invalidate`, read limits cover
/// the query-shaped tools, and `fallback` applies to operation classes the
/// controller has never seen.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Limits for write operations.
    pub write: BucketLimits,
    /// Limits for read operations.
    pub read: BucketLimits,
    /// Limits for unknown operation classes.
    pub fallback: BucketLimits,
    /// Width of the observational request-count window, in seconds.
    pub window_secs: i64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/deliberation.db".to_string()),
            ),
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let admission = AdmissionConfig {
            write: BucketLimits::new(
                env_parse("ADMISSION_WRITE_CAPACITY", 20.0),
                env_parse("ADMISSION_WRITE_REFILL_PER_SEC", 5.0),
            ),
            read: BucketLimits::new(
                env_parse("ADMISSION_READ_CAPACITY", 60.0),
                env_parse("ADMISSION_READ_REFILL_PER_SEC", 20.0),
            ),
            fallback: BucketLimits::new(
                env_parse("ADMISSION_DEFAULT_CAPACITY", 30.0),
                env_parse("ADMISSION_DEFAULT_REFILL_PER_SEC", 10.0),
            ),
            window_secs: env_parse("ADMISSION_WINDOW_SECS", 60),
        };

        admission.validate()?;

        Ok(Config {
            database,
            logging,
            admission,
        })
    }
}

impl AdmissionConfig {
    fn validate(&self) -> Result<(), AppError> {
        for (name, limits) in [
            ("write", self.write),
            ("read", self.read),
            ("default", self.fallback),
        ] {
            if limits.capacity <= 0.0 || limits.refill_per_sec <= 0.0 {
                return Err(AppError::Config {
                    message: format!(
                        "Admission {} limits must be positive (capacity {}, refill {})",
                        name, limits.capacity, limits.refill_per_sec
                    ),
                });
            }
        }
        if self.window_secs <= 0 {
            return Err(AppError::Config {
                message: format!("ADMISSION_WINDOW_SECS must be positive, got {}", self.window_secs),
            });
        }
        Ok(())
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            write: BucketLimits::new(20.0, 5.0),
            read: BucketLimits::new(60.0, 20.0),
            fallback: BucketLimits::new(30.0, 10.0),
            window_secs: 60,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
