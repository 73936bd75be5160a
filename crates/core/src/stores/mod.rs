pub mod document_api;
pub mod memory;
pub mod object_storage;
pub mod qdrant;

pub use document_api::DocumentApiClient;
pub use memory::{MemoryDocumentStore, MemoryVectorIndex};
pub use object_storage::{FsObjectStorage, HttpObjectStorage};
pub use qdrant::{QdrantStore, DEFAULT_COLLECTION};
