pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod model_manager;
pub mod models;
pub mod orchestrator;
pub mod query;
pub mod queue;
pub mod scoring;
pub mod strategies;
pub mod stores;
pub mod traits;

pub use chunking::{normalize_whitespace, Chunker, ChunkingConfig};
pub use embeddings::{
    CharacterNgramEmbedder, EmbedOptions, EmbeddingModel, Pooling, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{IngestError, ModelError, SearchError};
pub use extractor::{
    extract_content, ContentKind, ExtractedContent, LopdfExtractor, PageText, PdfExtractor,
};
pub use ingest::{deterministic_point_id, IngestionReport, IngestionWorker, JobHandler};
pub use model_manager::{
    HubModelLoader, LoadingStatus, ModelKey, ModelLoader, ModelManager, ModelManagerOptions,
    ModelOptions, SharedModel,
};
pub use models::{
    Chunk, Document, DocumentFilter, DocumentStatus, EmbeddingJob, EmbeddingPoint,
    IngestionOptions, Pagination, PointIdentity, PointPayload, ScoredPage, SearchHit,
    SearchParams, SearchRequest, SearchResult, SortDirection, SortField, SortSpec,
};
pub use orchestrator::{SearchCoordinator, SearchOptions};
pub use query::preprocess_query;
pub use queue::{
    Acknowledger, ChannelQueue, ConsumerOptions, ConsumerReport, Delivery, IngestionConsumer,
    JobQueue,
};
pub use strategies::StrategyKind;
pub use stores::{
    DocumentApiClient, FsObjectStorage, HttpObjectStorage, MemoryDocumentStore, MemoryVectorIndex,
    QdrantStore,
};
pub use traits::{
    DocumentCallbacks, DocumentStore, Distance, MatchMode, ObjectStorage, StoreCapabilities,
    TextQuery, TrigramThreshold, VectorIndex,
};
