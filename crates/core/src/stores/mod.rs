pub mod astra;
pub mod memory;
pub mod qdrant;

pub use astra::AstraStore;
pub use memory::MemoryStore;
pub use qdrant::QdrantStore;
