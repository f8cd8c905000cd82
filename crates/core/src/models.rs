use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Docx,
    Text,
}

impl DocumentKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "txt" => Some(Self::Text),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    DotProduct,
    Euclidean,
}

impl SimilarityMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::DotProduct => "dot_product",
            Self::Euclidean => "euclidean",
        }
    }
}

impl fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub name: String,
    pub dimensions: usize,
    pub metric: SimilarityMetric,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>, dimensions: usize, metric: SimilarityMetric) -> Self {
        Self {
            name: name.into(),
            dimensions,
            metric,
        }
    }

    pub fn staging(&self) -> Self {
        Self {
            name: format!("{}__staging", self.name),
            ..self.clone()
        }
    }
}

/// A contiguous slice of a document's text. `offset` is the byte position of
/// the slice in the source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub offset: usize,
    pub text: String,
}

impl Chunk {
    pub fn end(&self) -> usize {
        self.offset + self.text.len()
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub vector: Vec<f32>,
    pub text: String,
    pub source: String,
    pub chunk_index: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnsupportedType,
    Extraction,
    EmbeddingService,
    EmbeddingFormat,
    Store,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub kind: FailureKind,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedChunk {
    pub path: PathBuf,
    pub chunk_index: usize,
    pub kind: FailureKind,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSummary {
    pub path: PathBuf,
    pub checksum: String,
    pub chunks: usize,
    pub inserted: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionReport {
    pub collection: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files_discovered: usize,
    pub files: Vec<FileSummary>,
    pub records_inserted: usize,
    pub skipped_files: Vec<SkippedFile>,
    pub skipped_chunks: Vec<SkippedChunk>,
}

impl IngestionReport {
    pub fn status(&self) -> RunStatus {
        if self.skipped_files.is_empty() && self.skipped_chunks.is_empty() {
            RunStatus::Complete
        } else {
            RunStatus::Partial
        }
    }

    pub fn files_processed(&self) -> usize {
        self.files.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedRemoteFile {
    pub id: String,
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub folder_id: String,
    pub staging_dir: PathBuf,
    pub written: Vec<PathBuf>,
    pub skipped: Vec<SkippedRemoteFile>,
}
