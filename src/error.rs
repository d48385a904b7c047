use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single HTTP call against the DTU or a power meter.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out after {0} ms")]
    Timeout(u64),
    #[error("connection failed: {0}")]
    Network(String),
    #[error("unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid JSON response: {0}")]
    Decode(String),
}

impl FetchError {
    /// Decode failures are reported separately from transport problems.
    pub fn is_decode(&self) -> bool {
        matches!(self, FetchError::Decode(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// A payload did not match the expected response schema.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("inverter response has no inverters")]
    NoInverters,
    #[error("inverter response has no AC channel \"0\"")]
    NoAcChannel,
    #[error("power meter response has no reading")]
    NoMeterReading,
    #[error("unexpected response shape: {0}")]
    Shape(#[from] serde_json::Error),
}

/// Reading or writing a local, non-authoritative file failed.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to (de)serialize {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// The authoritative settings document could not be used.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("settings file {path} is not valid: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize default settings for {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write default settings to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
