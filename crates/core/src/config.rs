use crate::chunking::ChunkingConfig;
use crate::embeddings::{
    DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_ENDPOINT, DEFAULT_EMBEDDING_MODEL,
    DEFAULT_EMBEDDING_TIMEOUT,
};
use crate::error::ConfigError;
use crate::models::{CollectionSpec, SimilarityMetric};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_DRIVE_ENDPOINT: &str = "https://www.googleapis.com/drive/v3";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_staging_root")]
    pub staging_root: PathBuf,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub strategy: ReseedStrategy,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub folders: Vec<FolderMapping>,
}

fn default_staging_root() -> PathBuf {
    PathBuf::from("./documents")
}

fn default_concurrency() -> usize {
    1
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReseedStrategy {
    #[default]
    Recreate,
    StagingSwap,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_embedding_endpoint(),
            model: default_embedding_model(),
            dimensions: default_dimensions(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_embedding_endpoint() -> String {
    DEFAULT_EMBEDDING_ENDPOINT.to_string()
}
fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}
fn default_dimensions() -> usize {
    DEFAULT_EMBEDDING_DIMENSIONS
}
fn default_embedding_timeout_secs() -> u64 {
    DEFAULT_EMBEDDING_TIMEOUT.as_secs()
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Astra,
    Qdrant,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub metric: SimilarityMetric,
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            endpoint: None,
            namespace: None,
            metric: SimilarityMetric::default(),
            timeout_secs: default_store_timeout_secs(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_store_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_drive_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_remote_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: default_drive_endpoint(),
            timeout_secs: default_remote_timeout_secs(),
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_drive_endpoint() -> String {
    DEFAULT_DRIVE_ENDPOINT.to_string()
}
fn default_remote_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FolderMapping {
    pub folder_id: String,
    pub local_dir: PathBuf,
    pub collection: String,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking.validate()?;

        if self.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.embedding.dimensions == 0 {
            return Err(ConfigError::Invalid(
                "embedding.dimensions must be greater than zero".to_string(),
            ));
        }
        if self.embedding.model.trim().is_empty() {
            return Err(ConfigError::Missing("embedding.model".to_string()));
        }

        parse_url("embedding.endpoint", &self.embedding.endpoint)?;
        parse_url("remote.endpoint", &self.remote.endpoint)?;

        match self.store.backend {
            StoreBackend::Memory => {}
            backend => {
                let endpoint = self
                    .store
                    .endpoint
                    .as_deref()
                    .ok_or_else(|| ConfigError::Missing("store.endpoint".to_string()))?;
                parse_url("store.endpoint", endpoint)?;
                if backend == StoreBackend::Astra && self.store.namespace.is_none() {
                    return Err(ConfigError::Missing("store.namespace".to_string()));
                }
            }
        }

        let mut folder_ids = HashSet::new();
        let mut collections = HashSet::new();
        let mut staging_dirs: Vec<(&str, PathBuf)> = Vec::new();
        for mapping in &self.folders {
            if mapping.folder_id.trim().is_empty() || mapping.collection.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "folder mappings need a folder_id and a collection".to_string(),
                ));
            }
            if !folder_ids.insert(mapping.folder_id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "folder {} is mapped twice",
                    mapping.folder_id
                )));
            }
            if !collections.insert(mapping.collection.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "collection {} is mapped twice",
                    mapping.collection
                )));
            }

            validate_local_dir(mapping)?;
            let dir = self.staging_dir(mapping);
            // Sync empties the directory, so no mapping may share or contain
            // another one's.
            if let Some((other, _)) = staging_dirs
                .iter()
                .find(|(_, other_dir)| dir.starts_with(other_dir) || other_dir.starts_with(&dir))
            {
                return Err(ConfigError::Invalid(format!(
                    "collections {other} and {} have overlapping staging directories",
                    mapping.collection
                )));
            }
            staging_dirs.push((mapping.collection.as_str(), dir));
        }

        Ok(())
    }

    pub fn mapping_for_folder(&self, folder_id: &str) -> Result<&FolderMapping, ConfigError> {
        self.folders
            .iter()
            .find(|mapping| mapping.folder_id == folder_id)
            .ok_or_else(|| ConfigError::UnknownFolder(folder_id.to_string()))
    }

    pub fn mapping_for_collection(&self, collection: &str) -> Result<&FolderMapping, ConfigError> {
        self.folders
            .iter()
            .find(|mapping| mapping.collection == collection)
            .ok_or_else(|| ConfigError::UnknownCollection(collection.to_string()))
    }

    pub fn staging_dir(&self, mapping: &FolderMapping) -> PathBuf {
        if mapping.local_dir.is_absolute() {
            mapping.local_dir.clone()
        } else {
            self.staging_root.join(&mapping.local_dir)
        }
    }

    pub fn collection_spec(&self, mapping: &FolderMapping) -> CollectionSpec {
        CollectionSpec::new(
            mapping.collection.clone(),
            self.embedding.dimensions,
            self.store.metric,
        )
    }
}

fn validate_local_dir(mapping: &FolderMapping) -> Result<(), ConfigError> {
    let components: Vec<_> = mapping.local_dir.components().collect();
    let has_name = components
        .iter()
        .any(|component| matches!(component, Component::Normal(_)));
    let escapes = components
        .iter()
        .any(|component| matches!(component, Component::ParentDir));

    if !has_name || escapes {
        return Err(ConfigError::Invalid(format!(
            "local_dir {:?} of collection {} must name a directory below staging_root",
            mapping.local_dir, mapping.collection
        )));
    }
    Ok(())
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|source| ConfigError::Url { field, source })
}
