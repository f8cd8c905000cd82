use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid url for {field}: {source}")]
    Url {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid chunking config: {0}")]
    InvalidChunking(String),

    #[error("no folder mapping for remote folder {0}")]
    UnknownFolder(String),

    #[error("no folder mapping for collection {0}")]
    UnknownCollection(String),

    #[error("missing setting: {0}")]
    Missing(String),

    #[error("invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("extraction failed for {path}: {details}")]
    Extraction { path: PathBuf, details: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding service error: {0}")]
    Service(String),

    #[error("embedding response malformed: {0}")]
    Format(String),
}

impl From<reqwest::Error> for EmbedError {
    fn from(error: reqwest::Error) -> Self {
        EmbedError::Service(error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    Backend { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("vector dimension {actual} does not match collection dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("collection does not exist: {0}")]
    MissingCollection(String),

    #[error("operation not supported by {backend}: {operation}")]
    Unsupported {
        backend: String,
        operation: String,
    },
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("remote listing failed for folder {folder_id}: {details}")]
    Listing { folder_id: String, details: String },

    #[error("remote fetch failed for {name}: {details}")]
    Fetch { name: String, details: String },

    #[error("refusing to write remote file with unsafe name {0:?}")]
    UnsafeName(String),

    #[error("staging directory {path} unusable: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("collection {0} already has an ingestion run in flight")]
    CollectionBusy(String),

    #[error("failed to recreate collection {collection}: {source}")]
    Recreate {
        collection: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to promote {staging} to {collection}: {source}")]
    Promote {
        staging: String,
        collection: String,
        #[source]
        source: StoreError,
    },

    #[error("cannot read document directory {path}: {details}")]
    Directory { path: PathBuf, details: String },
}
