use crate::chunking::RecursiveChunker;
use crate::config::{Config, FolderMapping, ReseedStrategy};
use crate::embeddings::Embedder;
use crate::error::{ConfigError, EmbedError, ExtractError, IngestError};
use crate::extractor::extract_document;
use crate::models::{
    Chunk, CollectionSpec, DocumentKind, FailureKind, FileSummary, IngestionReport, Record,
    RunStatus, SkippedChunk, SkippedFile,
};
use crate::traits::CollectionWriter;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Lists the supported documents directly inside `folder`, sorted by path.
pub fn discover_documents(folder: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let metadata = fs::metadata(folder).map_err(|error| IngestError::Directory {
        path: folder.to_path_buf(),
        details: error.to_string(),
    })?;
    if !metadata.is_dir() {
        return Err(IngestError::Directory {
            path: folder.to_path_buf(),
            details: "not a directory".to_string(),
        });
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(folder).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                warn!(folder = %folder.display(), error = %error, "unreadable directory entry");
                continue;
            }
        };

        if entry.file_type().is_file() && DocumentKind::from_path(entry.path()).is_some() {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    Ok(files)
}

pub fn digest_file(path: &Path) -> Result<String, ExtractError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Names of collections with an ingestion run in flight. A second run on the
/// same name is refused while the first one's guard is alive.
#[derive(Debug, Clone, Default)]
pub struct CollectionLocks {
    active: Arc<Mutex<HashSet<String>>>,
}

#[derive(Debug)]
pub struct CollectionGuard {
    active: Arc<Mutex<HashSet<String>>>,
    collection: String,
}

impl CollectionLocks {
    /// Registry shared by every ingestor in this process that was not given
    /// its own.
    pub fn process() -> Self {
        static PROCESS: OnceLock<CollectionLocks> = OnceLock::new();
        PROCESS.get_or_init(CollectionLocks::default).clone()
    }

    pub fn acquire(&self, collection: &str) -> Option<CollectionGuard> {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !active.insert(collection.to_string()) {
            return None;
        }
        Some(CollectionGuard {
            active: Arc::clone(&self.active),
            collection: collection.to_string(),
        })
    }

    pub fn is_held(&self, collection: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(collection)
    }
}

impl Drop for CollectionGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.collection);
    }
}

struct ChunkFailure {
    chunk_index: usize,
    kind: FailureKind,
    reason: String,
}

fn extract_failure_kind(error: &ExtractError) -> FailureKind {
    match error {
        ExtractError::UnsupportedType(_) => FailureKind::UnsupportedType,
        ExtractError::Extraction { .. } | ExtractError::Io(_) => FailureKind::Extraction,
    }
}

fn embed_failure_kind(error: &EmbedError) -> FailureKind {
    match error {
        EmbedError::Service(_) => FailureKind::EmbeddingService,
        EmbedError::Format(_) => FailureKind::EmbeddingFormat,
    }
}

/// Reseeds one collection from its mapped staging directory:
/// recreate, enumerate, then extract → chunk → embed → insert per file.
pub struct Ingestor<E, S>
where
    E: Embedder,
    S: CollectionWriter,
{
    config: Arc<Config>,
    embedder: E,
    store: S,
    chunker: RecursiveChunker,
    locks: CollectionLocks,
}

impl<E, S> Ingestor<E, S>
where
    E: Embedder,
    S: CollectionWriter,
{
    pub fn new(config: Arc<Config>, embedder: E, store: S) -> Result<Self, ConfigError> {
        let chunker = RecursiveChunker::new(config.chunking)?;

        if embedder.dimensions() != config.embedding.dimensions {
            return Err(ConfigError::Invalid(format!(
                "embedder produces {} dimensions but collections are configured for {}",
                embedder.dimensions(),
                config.embedding.dimensions
            )));
        }

        Ok(Self {
            config,
            embedder,
            store,
            chunker,
            locks: CollectionLocks::process(),
        })
    }

    /// Replaces the process-wide run registry, e.g. to scope exclusion to a
    /// group of ingestors.
    pub fn with_locks(mut self, locks: CollectionLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn locks(&self) -> &CollectionLocks {
        &self.locks
    }

    pub async fn seed_collection(&self, collection: &str) -> Result<IngestionReport, IngestError> {
        let mapping = self.config.mapping_for_collection(collection)?.clone();
        self.run(&mapping).await
    }

    pub async fn run(&self, mapping: &FolderMapping) -> Result<IngestionReport, IngestError> {
        let _guard = self
            .locks
            .acquire(&mapping.collection)
            .ok_or_else(|| IngestError::CollectionBusy(mapping.collection.clone()))?;

        let started_at = Utc::now();
        let target = self.config.collection_spec(mapping);
        let write_spec = match self.config.strategy {
            ReseedStrategy::Recreate => target.clone(),
            ReseedStrategy::StagingSwap => target.staging(),
        };

        self.recreate(&write_spec).await?;

        let folder = self.config.staging_dir(mapping);
        let files = discover_documents(&folder)?;
        info!(
            collection = %target.name,
            folder = %folder.display(),
            files = files.len(),
            "ingestion started"
        );
        if files.is_empty() {
            warn!(folder = %folder.display(), "no supported documents found");
        }

        let mut report = IngestionReport {
            collection: target.name.clone(),
            started_at,
            finished_at: started_at,
            files_discovered: files.len(),
            files: Vec::new(),
            records_inserted: 0,
            skipped_files: Vec::new(),
            skipped_chunks: Vec::new(),
        };

        for path in files {
            self.ingest_file(&write_spec.name, &path, &mut report).await;
        }

        if write_spec.name != target.name {
            self.store
                .promote(&write_spec.name, &target.name)
                .await
                .map_err(|source| {
                    error!(staging = %write_spec.name, collection = %target.name, error = %source, "promotion failed");
                    IngestError::Promote {
                        staging: write_spec.name.clone(),
                        collection: target.name.clone(),
                        source,
                    }
                })?;
            info!(staging = %write_spec.name, collection = %target.name, "staging collection promoted");
        }

        report.finished_at = Utc::now();
        let status = report.status();
        if status == RunStatus::Partial {
            warn!(
                collection = %report.collection,
                records = report.records_inserted,
                skipped_files = report.skipped_files.len(),
                skipped_chunks = report.skipped_chunks.len(),
                "ingestion finished with skipped units"
            );
        } else {
            info!(
                collection = %report.collection,
                records = report.records_inserted,
                files = report.files_processed(),
                "ingestion finished"
            );
        }

        Ok(report)
    }

    async fn recreate(&self, spec: &CollectionSpec) -> Result<(), IngestError> {
        self.store.recreate(spec).await.map_err(|source| {
            error!(collection = %spec.name, error = %source, "failed to recreate collection");
            IngestError::Recreate {
                collection: spec.name.clone(),
                source,
            }
        })
    }

    async fn ingest_file(&self, collection: &str, path: &Path, report: &mut IngestionReport) {
        let (checksum, text) = match extract_blocking(path).await {
            Ok(extracted) => extracted,
            Err(error) => {
                warn!(path = %path.display(), error = %error, "skipping document");
                report.skipped_files.push(SkippedFile {
                    path: path.to_path_buf(),
                    kind: extract_failure_kind(&error),
                    reason: error.to_string(),
                });
                return;
            }
        };

        let source = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        let outcomes: Vec<Result<usize, ChunkFailure>> = stream::iter(self.chunker.chunks(&text))
            .map(|chunk| self.process_chunk(collection, &source, chunk))
            .buffered(self.config.concurrency)
            .collect()
            .await;

        let mut inserted = 0usize;
        for outcome in &outcomes {
            match outcome {
                Ok(chunk_index) => {
                    inserted += 1;
                    debug!(path = %path.display(), chunk_index, "chunk stored");
                }
                Err(failure) => {
                    warn!(
                        path = %path.display(),
                        chunk_index = failure.chunk_index,
                        error = %failure.reason,
                        "skipping chunk"
                    );
                    report.skipped_chunks.push(SkippedChunk {
                        path: path.to_path_buf(),
                        chunk_index: failure.chunk_index,
                        kind: failure.kind,
                        reason: failure.reason.clone(),
                    });
                }
            }
        }

        info!(
            path = %path.display(),
            chunks = outcomes.len(),
            inserted,
            "document processed"
        );
        report.records_inserted += inserted;
        report.files.push(FileSummary {
            path: path.to_path_buf(),
            checksum,
            chunks: outcomes.len(),
            inserted,
        });
    }

    async fn process_chunk(
        &self,
        collection: &str,
        source: &str,
        chunk: Chunk,
    ) -> Result<usize, ChunkFailure> {
        let chunk_index = chunk.index;
        let vector = self
            .embedder
            .embed(&chunk.text)
            .await
            .map_err(|error| ChunkFailure {
                chunk_index,
                kind: embed_failure_kind(&error),
                reason: error.to_string(),
            })?;

        let record = Record {
            vector,
            text: chunk.text,
            source: source.to_string(),
            chunk_index,
        };

        self.store
            .insert(collection, &record)
            .await
            .map_err(|error| ChunkFailure {
                chunk_index,
                kind: FailureKind::Store,
                reason: error.to_string(),
            })?;

        Ok(chunk_index)
    }
}

async fn extract_blocking(path: &Path) -> Result<(String, String), ExtractError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<(String, String), ExtractError> {
        let (_kind, text) = extract_document(&owned)?;
        let checksum = digest_file(&owned)?;
        Ok((checksum, text))
    })
    .await
    .map_err(|error| ExtractError::Extraction {
        path: path.to_path_buf(),
        details: format!("extraction task failed: {error}"),
    })?
}
