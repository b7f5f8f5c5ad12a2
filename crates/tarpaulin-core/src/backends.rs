use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Blob store backend types
///
/// Defined in core because configuration selects it and both the API and the
/// worker build their store from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    Postgres,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(StorageBackend::Local),
            "postgres" | "pg" => Ok(StorageBackend::Postgres),
            _ => Err(anyhow::anyhow!("Invalid storage backend: {}", s)),
        }
    }
}

impl Display for StorageBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            StorageBackend::Local => write!(f, "local"),
            StorageBackend::Postgres => write!(f, "postgres"),
        }
    }
}

/// Message channel backend types
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Postgres,
    /// In-process queue; only meaningful when producer and consumer share a process.
    Memory,
}

impl FromStr for QueueBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "pg" => Ok(QueueBackend::Postgres),
            "memory" => Ok(QueueBackend::Memory),
            _ => Err(anyhow::anyhow!("Invalid queue backend: {}", s)),
        }
    }
}

impl Display for QueueBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            QueueBackend::Postgres => write!(f, "postgres"),
            QueueBackend::Memory => write!(f, "memory"),
        }
    }
}
