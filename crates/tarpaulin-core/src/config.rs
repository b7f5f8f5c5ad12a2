//! Configuration module
//!
//! Environment-driven configuration shared by the ingest API and the resize
//! worker: database, blob store, message channel and pipeline settings.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::backends::{QueueBackend, StorageBackend};

const MAX_CONNECTIONS: u32 = 10;
const CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Settings common to every process
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub environment: String,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub log_format: String,
}

/// Blob store, channel and resize pipeline configuration
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub base: BaseConfig,
    pub storage_backend: StorageBackend,
    pub local_storage_path: String,
    pub queue_backend: QueueBackend,
    pub image_queue: String,
    pub dead_letter_queue: String,
    pub queue_connect_retry_ms: u64,
    /// `None` retries forever.
    pub queue_connect_max_attempts: Option<u32>,
    pub queue_lease_secs: u64,
    pub worker_max_deliveries: u32,
    pub worker_poll_interval_ms: u64,
    pub worker_stage_timeout_secs: u64,
    pub max_image_size_bytes: usize,
    pub allowed_content_types: Vec<String>,
    pub jpeg_quality: u8,
    pub media_url_prefix: String,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<PipelineConfig>);

impl Config {
    fn inner(&self) -> &PipelineConfig {
        &self.0
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = PipelineConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.inner().validate()
    }

    pub fn is_production(&self) -> bool {
        let env = self.inner().base.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn server_port(&self) -> u16 {
        self.inner().base.server_port
    }

    pub fn environment(&self) -> &str {
        &self.inner().base.environment
    }

    pub fn log_format(&self) -> &str {
        &self.inner().base.log_format
    }

    pub fn database_url(&self) -> Option<&str> {
        self.inner().base.database_url.as_deref()
    }

    pub fn db_max_connections(&self) -> u32 {
        self.inner().base.db_max_connections
    }

    pub fn db_timeout_seconds(&self) -> u64 {
        self.inner().base.db_timeout_seconds
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.inner().storage_backend
    }

    pub fn local_storage_path(&self) -> &str {
        &self.inner().local_storage_path
    }

    pub fn queue_backend(&self) -> QueueBackend {
        self.inner().queue_backend
    }

    pub fn image_queue(&self) -> &str {
        &self.inner().image_queue
    }

    pub fn dead_letter_queue(&self) -> &str {
        &self.inner().dead_letter_queue
    }

    pub fn queue_connect_retry(&self) -> Duration {
        Duration::from_millis(self.inner().queue_connect_retry_ms)
    }

    pub fn queue_connect_max_attempts(&self) -> Option<u32> {
        self.inner().queue_connect_max_attempts
    }

    pub fn queue_lease(&self) -> Duration {
        Duration::from_secs(self.inner().queue_lease_secs)
    }

    pub fn worker_max_deliveries(&self) -> u32 {
        self.inner().worker_max_deliveries
    }

    pub fn worker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.inner().worker_poll_interval_ms)
    }

    pub fn worker_stage_timeout(&self) -> Duration {
        Duration::from_secs(self.inner().worker_stage_timeout_secs)
    }

    pub fn max_image_size_bytes(&self) -> usize {
        self.inner().max_image_size_bytes
    }

    pub fn allowed_content_types(&self) -> &[String] {
        &self.inner().allowed_content_types
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.inner().jpeg_quality
    }

    pub fn media_url_prefix(&self) -> &str {
        &self.inner().media_url_prefix
    }
}

/// Read an optional numeric variable, falling back to `default` when unset or unparseable.
fn env_or<T: FromStr + ToString>(key: &str, default: T) -> T {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .unwrap_or(default)
}

fn megabytes_to_bytes(megabytes: usize) -> Result<usize, anyhow::Error> {
    megabytes
        .checked_mul(1024 * 1024)
        .ok_or_else(|| anyhow::anyhow!("MAX_IMAGE_SIZE_MB is too large: {}", megabytes))
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        const PORT: u16 = 8000;
        const QUEUE_CONNECT_RETRY_MS: u64 = 100;
        const QUEUE_LEASE_SECS: u64 = 600;
        const WORKER_MAX_DELIVERIES: u32 = 5;
        const WORKER_POLL_INTERVAL_MS: u64 = 1000;
        const WORKER_STAGE_TIMEOUT_SECS: u64 = 300;
        const MAX_IMAGE_SIZE_MB: usize = 25;
        const JPEG_QUALITY: u8 = 80;

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let base = BaseConfig {
            server_port: env::var("PORT")
                .unwrap_or_else(|_| PORT.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            environment,
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.trim().is_empty()),
            db_max_connections: env_or("DB_MAX_CONNECTIONS", MAX_CONNECTIONS),
            db_timeout_seconds: env_or("DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS),
            log_format: env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase(),
        };

        let storage_backend = match env::var("STORAGE_BACKEND") {
            Ok(s) => s.parse()?,
            Err(_) => StorageBackend::Local,
        };
        let queue_backend = match env::var("QUEUE_BACKEND") {
            Ok(s) => s.parse()?,
            Err(_) => QueueBackend::Postgres,
        };

        let allowed_content_types = env::var("ALLOWED_CONTENT_TYPES")
            .unwrap_or_else(|_| "image/jpeg,image/png".to_string())
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        let max_image_size_bytes =
            megabytes_to_bytes(env_or("MAX_IMAGE_SIZE_MB", MAX_IMAGE_SIZE_MB))?;

        Ok(PipelineConfig {
            base,
            storage_backend,
            local_storage_path: env::var("LOCAL_STORAGE_PATH")
                .unwrap_or_else(|_| "./data/blobs".to_string()),
            queue_backend,
            image_queue: env::var("IMAGE_QUEUE").unwrap_or_else(|_| "images".to_string()),
            dead_letter_queue: env::var("DEAD_LETTER_QUEUE")
                .unwrap_or_else(|_| "images.dead".to_string()),
            queue_connect_retry_ms: env_or("QUEUE_CONNECT_RETRY_MS", QUEUE_CONNECT_RETRY_MS),
            queue_connect_max_attempts: env::var("QUEUE_CONNECT_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok()),
            queue_lease_secs: env_or("QUEUE_LEASE_SECS", QUEUE_LEASE_SECS),
            worker_max_deliveries: env_or("WORKER_MAX_DELIVERIES", WORKER_MAX_DELIVERIES),
            worker_poll_interval_ms: env_or("WORKER_POLL_INTERVAL_MS", WORKER_POLL_INTERVAL_MS),
            worker_stage_timeout_secs: env_or(
                "WORKER_STAGE_TIMEOUT_SECS",
                WORKER_STAGE_TIMEOUT_SECS,
            ),
            max_image_size_bytes,
            allowed_content_types,
            jpeg_quality: env_or("JPEG_QUALITY", JPEG_QUALITY),
            media_url_prefix: env::var("MEDIA_URL_PREFIX")
                .unwrap_or_else(|_| "/media/photos".to_string()),
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.worker_max_deliveries == 0 {
            return Err(anyhow::anyhow!("WORKER_MAX_DELIVERIES must be at least 1"));
        }
        if self.max_image_size_bytes == 0 {
            return Err(anyhow::anyhow!("MAX_IMAGE_SIZE_MB must be at least 1"));
        }
        if self.worker_stage_timeout_secs == 0 {
            return Err(anyhow::anyhow!("WORKER_STAGE_TIMEOUT_SECS must be at least 1"));
        }
        // A lease that expires first hands the message to another worker mid-run.
        if self.queue_lease_secs <= self.worker_stage_timeout_secs {
            return Err(anyhow::anyhow!(
                "QUEUE_LEASE_SECS ({}) must exceed WORKER_STAGE_TIMEOUT_SECS ({})",
                self.queue_lease_secs,
                self.worker_stage_timeout_secs
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow::anyhow!(
                "JPEG_QUALITY must be between 1 and 100, got {}",
                self.jpeg_quality
            ));
        }
        if self.image_queue.trim().is_empty() || self.dead_letter_queue.trim().is_empty() {
            return Err(anyhow::anyhow!("Queue names must not be empty"));
        }
        if self.image_queue == self.dead_letter_queue {
            return Err(anyhow::anyhow!(
                "DEAD_LETTER_QUEUE must differ from IMAGE_QUEUE ({})",
                self.image_queue
            ));
        }
        let needs_db = self.storage_backend == StorageBackend::Postgres
            || self.queue_backend == QueueBackend::Postgres;
        if needs_db && self.base.database_url.is_none() {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be set when a postgres storage or queue backend is selected"
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Configuration for tests and embedded use: local storage, in-memory queue.
    pub fn for_local(storage_path: impl Into<String>) -> Self {
        Config(Box::new(PipelineConfig {
            base: BaseConfig {
                server_port: 8000,
                environment: "test".to_string(),
                database_url: None,
                db_max_connections: MAX_CONNECTIONS,
                db_timeout_seconds: CONNECTION_TIMEOUT_SECS,
                log_format: "pretty".to_string(),
            },
            storage_backend: StorageBackend::Local,
            local_storage_path: storage_path.into(),
            queue_backend: QueueBackend::Memory,
            image_queue: "images".to_string(),
            dead_letter_queue: "images.dead".to_string(),
            queue_connect_retry_ms: 100,
            queue_connect_max_attempts: None,
            queue_lease_secs: 600,
            worker_max_deliveries: 5,
            worker_poll_interval_ms: 1000,
            worker_stage_timeout_secs: 300,
            max_image_size_bytes: 25 * 1024 * 1024,
            allowed_content_types: vec!["image/jpeg".to_string(), "image/png".to_string()],
            jpeg_quality: 80,
            media_url_prefix: "/media/photos".to_string(),
        }))
    }

    /// Whether a database pool must be opened for this configuration.
    pub fn requires_database(&self) -> bool {
        self.storage_backend() == StorageBackend::Postgres
            || self.queue_backend() == QueueBackend::Postgres
    }
}
