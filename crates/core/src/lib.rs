pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod stores;
pub mod sync;
pub mod traits;

pub use chunking::{reassemble, ChunkingConfig, RecursiveChunker};
pub use config::{Config, FolderMapping, ReseedStrategy, StoreBackend};
pub use embeddings::{Embedder, OllamaEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{ConfigError, EmbedError, ExtractError, IngestError, StoreError, SyncError};
pub use extractor::{extract_document, TextExtractor};
pub use ingest::{discover_documents, CollectionLocks, Ingestor};
pub use models::{
    Chunk, CollectionSpec, DocumentKind, FailureKind, IngestionReport, Record, RemoteFile,
    RunStatus, SimilarityMetric, SyncReport,
};
pub use stores::{AstraStore, MemoryStore, QdrantStore};
pub use sync::{export_format_for, FolderSync, GoogleDriveClient};
pub use traits::{CollectionWriter, RemoteFileStore};
