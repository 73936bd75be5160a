use crate::chunking::{Chunker, ChunkingConfig};
use crate::embeddings::{EmbedOptions, Pooling};
use crate::extractor::{extract_content, ContentKind, LopdfExtractor};
use crate::model_manager::{ModelManager, ModelOptions, SharedModel};
use crate::models::{
    Chunk, DocumentStatus, EmbeddingJob, EmbeddingPoint, IngestionOptions, PointIdentity,
    PointPayload, TEXT_CHUNK_KIND,
};
use crate::traits::{DocumentCallbacks, Distance, ObjectStorage, VectorIndex};
use crate::{IngestError, ModelError};
use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};
use uuid::{Builder, Uuid};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionReport {
    pub document_id: String,
    pub chunk_count: usize,
    pub embedded: usize,
    pub skipped: usize,
    pub batches: usize,
}

/// Processes one queue message to completion.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &EmbeddingJob) -> Result<IngestionReport, IngestError>;
}

pub struct IngestionWorker<V, S, C>
where
    V: VectorIndex,
    S: ObjectStorage,
    C: DocumentCallbacks,
{
    vector: V,
    storage: S,
    callbacks: C,
    models: Arc<ModelManager>,
    options: IngestionOptions,
    model_options: ModelOptions,
    chunker: Chunker,
    collection_dimensions: OnceCell<usize>,
}

impl<V, S, C> IngestionWorker<V, S, C>
where
    V: VectorIndex + Send + Sync,
    S: ObjectStorage + Send + Sync,
    C: DocumentCallbacks + Send + Sync,
{
    pub fn new(
        vector: V,
        storage: S,
        callbacks: C,
        models: Arc<ModelManager>,
        options: IngestionOptions,
    ) -> Result<Self, IngestError> {
        if options.embed_batch_size == 0 {
            return Err(IngestError::InvalidArgument(
                "embed_batch_size must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            chunker: Chunker::new(ChunkingConfig::from(&options))?,
            vector,
            storage,
            callbacks,
            models,
            options,
            model_options: ModelOptions::default(),
            collection_dimensions: OnceCell::new(),
        })
    }

    pub fn vector_index(&self) -> &V {
        &self.vector
    }

    pub fn callbacks(&self) -> &C {
        &self.callbacks
    }

    /// Loads the embedding model and makes sure the vector collection exists
    /// with its dimension. Safe to call on every startup.
    pub async fn prepare(&self) -> Result<usize, IngestError> {
        let model = self.embedding_model().await?;
        self.ensure_collection(&model).await
    }

    pub async fn process(&self, job: &EmbeddingJob) -> Result<IngestionReport, IngestError> {
        info!(document_id = %job.document_id, "processing document");
        self.report_status(&job.document_id, DocumentStatus::Processing)
            .await;

        match self.embed_document(job).await {
            Ok(report) => {
                self.report_status(&job.document_id, DocumentStatus::Ready)
                    .await;
                info!(
                    document_id = %report.document_id,
                    chunks = report.chunk_count,
                    embedded = report.embedded,
                    skipped = report.skipped,
                    "document processed"
                );
                Ok(report)
            }
            Err(error) => {
                error!(document_id = %job.document_id, %error, "document processing failed");
                self.report_status(&job.document_id, DocumentStatus::Failed)
                    .await;
                Err(error)
            }
        }
    }

    async fn embedding_model(&self) -> Result<SharedModel, IngestError> {
        let key = &self.options.model;
        Ok(self
            .models
            .ensure_model(&key.task, &key.model, &self.model_options)
            .await?)
    }

    async fn ensure_collection(&self, model: &SharedModel) -> Result<usize, IngestError> {
        let dimensions = self
            .collection_dimensions
            .get_or_try_init(|| async {
                let dimensions = model.dimensions();
                self.vector
                    .ensure_collection(dimensions, Distance::Cosine)
                    .await?;
                Ok::<_, IngestError>(dimensions)
            })
            .await?;
        Ok(*dimensions)
    }

    async fn load_chunks(&self, job: &EmbeddingJob) -> Result<Vec<Chunk>, IngestError> {
        if let Some(chunks) = &job.chunks {
            return Ok(chunks
                .iter()
                .filter(|chunk| !chunk.text.trim().is_empty())
                .cloned()
                .map(|mut chunk| {
                    if chunk.size == 0 {
                        chunk.size = chunk.text.chars().count();
                    }
                    chunk
                })
                .collect());
        }

        let Some(path) = job
            .storage_path
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty())
        else {
            warn!(document_id = %job.document_id, "job has neither chunks nor a storage path");
            return Ok(Vec::new());
        };

        let kind = ContentKind::from_path(path);
        if kind == ContentKind::Unsupported {
            info!(
                document_id = %job.document_id,
                %path,
                "unsupported content type, nothing to embed"
            );
            return Ok(Vec::new());
        }

        let bytes = self
            .storage
            .fetch(job.bucket_name.as_deref(), path)
            .await?;
        let chunker = self.chunker.clone();
        let content = tokio::task::spawn_blocking(move || {
            extract_content(kind, &bytes, &chunker, &LopdfExtractor)
        })
        .await??;

        if !content.text.trim().is_empty() {
            if let Err(error) = self
                .callbacks
                .update_extracted_text(&job.document_id, &content.text)
                .await
            {
                warn!(document_id = %job.document_id, %error, "could not store extracted text");
            }
        }

        Ok(content.chunks)
    }

    async fn embed_document(&self, job: &EmbeddingJob) -> Result<IngestionReport, IngestError> {
        let chunks = self.load_chunks(job).await?;
        let mut report = IngestionReport {
            document_id: job.document_id.clone(),
            chunk_count: chunks.len(),
            ..IngestionReport::default()
        };

        if chunks.is_empty() {
            info!(document_id = %job.document_id, "no chunks produced, skipping vector index");
            return Ok(report);
        }

        let model = self.embedding_model().await?;
        self.ensure_collection(&model).await?;

        let options = EmbedOptions {
            pooling: Pooling::Mean,
            normalize: true,
        };
        let created_at = Utc::now();

        for (batch_number, batch) in chunks.chunks(self.options.embed_batch_size).enumerate() {
            let mut points = Vec::with_capacity(batch.len());
            let vectors = embed_batch(&model, batch, options).await?;

            for (chunk, embedded) in batch.iter().zip(vectors) {
                match embedded {
                    Ok(vector) => points.push(EmbeddingPoint {
                        id: self.point_id(&job.document_id, chunk.chunk_index),
                        vector,
                        payload: PointPayload {
                            document_id: job.document_id.clone(),
                            chunk_index: chunk.chunk_index,
                            text: chunk.text.clone(),
                            page_number: chunk.page_number,
                            size: chunk.size,
                            kind: TEXT_CHUNK_KIND.to_string(),
                            created_at,
                        },
                    }),
                    Err(error) => {
                        warn!(
                            document_id = %job.document_id,
                            chunk_index = chunk.chunk_index,
                            %error,
                            "skipping chunk that failed to embed"
                        );
                        report.skipped += 1;
                    }
                }
            }

            if points.is_empty() {
                continue;
            }

            self.vector.upsert_points(&points).await?;
            debug!(
                document_id = %job.document_id,
                batch = batch_number,
                points = points.len(),
                "upserted batch"
            );
            report.embedded += points.len();
            report.batches += 1;
        }

        Ok(report)
    }

    fn point_id(&self, document_id: &str, chunk_index: u32) -> Uuid {
        match self.options.point_ids {
            PointIdentity::Random => Uuid::new_v4(),
            PointIdentity::Deterministic => deterministic_point_id(document_id, chunk_index),
        }
    }

    async fn report_status(&self, document_id: &str, status: DocumentStatus) {
        if let Err(error) = self.callbacks.update_status(document_id, status).await {
            warn!(%document_id, %status, %error, "could not report document status");
        }
    }
}

/// Runs a batch through the model on the blocking pool; inference is CPU bound.
async fn embed_batch(
    model: &SharedModel,
    batch: &[Chunk],
    options: EmbedOptions,
) -> Result<Vec<Result<Vec<f32>, ModelError>>, IngestError> {
    let model = Arc::clone(model);
    let texts = batch
        .iter()
        .map(|chunk| chunk.text.clone())
        .collect::<Vec<_>>();

    Ok(tokio::task::spawn_blocking(move || {
        texts
            .iter()
            .map(|text| model.embed(text, options))
            .collect()
    })
    .await?)
}

pub fn deterministic_point_id(document_id: &str, chunk_index: u32) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(chunk_index.to_le_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Builder::from_random_bytes(bytes).into_uuid()
}

#[async_trait]
impl<V, S, C> JobHandler for IngestionWorker<V, S, C>
where
    V: VectorIndex + Send + Sync,
    S: ObjectStorage + Send + Sync,
    C: DocumentCallbacks + Send + Sync,
{
    async fn handle(&self, job: &EmbeddingJob) -> Result<IngestionReport, IngestError> {
        self.process(job).await
    }
}
