use chrono::{TimeZone, Utc};
use docindex_core::{
    ChannelQueue, Chunk, ConsumerOptions, ConsumerReport, Document, DocumentStatus,
    EmbeddingJob, FsObjectStorage, HubModelLoader, IngestionConsumer, IngestionOptions,
    IngestionWorker, MemoryDocumentStore, MemoryVectorIndex, ModelManager, ModelManagerOptions,
    SearchCoordinator, SearchParams, StrategyKind,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn document(id: &str, title: &str, file_name: &str) -> Document {
    Document {
        id: id.to_string(),
        user_id: "user-1".to_string(),
        title: title.to_string(),
        description: None,
        tags: vec!["ops".to_string()],
        file_name: file_name.to_string(),
        file_type: file_name.rsplit('.').next().unwrap_or_default().to_string(),
        file_size: 128,
        status: DocumentStatus::Pending,
        created_at: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        view_count: 0,
        download_count: 0,
        extracted_text: None,
    }
}

fn job(document_id: &str, storage_path: Option<&str>, chunks: Option<Vec<Chunk>>) -> EmbeddingJob {
    EmbeddingJob {
        document_id: document_id.to_string(),
        storage_path: storage_path.map(str::to_string),
        bucket_name: None,
        chunks,
    }
}

#[tokio::test]
async fn queued_jobs_are_indexed_and_searchable() -> Result<(), Box<dyn std::error::Error>> {
    let storage_root = tempfile::tempdir()?;
    let model_cache = tempfile::tempdir()?;

    std::fs::create_dir_all(storage_root.path().join("documents/users/1"))?;
    std::fs::write(
        storage_root.path().join("documents/users/1/pump.txt"),
        "Pump maintenance checklist. Inspect the seals monthly. Replace the impeller yearly.",
    )?;
    std::fs::write(storage_root.path().join("documents/users/1/photo.png"), b"\x89PNG")?;

    std::fs::create_dir_all(model_cache.path().join("Xenova/bge-m3"))?;
    std::fs::write(
        model_cache.path().join("Xenova/bge-m3/config.json"),
        r#"{"hidden_size": 32}"#,
    )?;

    let documents = MemoryDocumentStore::new(vec![
        document("doc-1", "Pump maintenance", "pump.txt"),
        document("doc-2", "Quarterly figures", "q3.txt"),
        document("doc-3", "Site photo", "photo.png"),
    ]);
    let models = Arc::new(ModelManager::new(
        Arc::new(HubModelLoader::new(model_cache.path(), "http://127.0.0.1:9")),
        ModelManagerOptions {
            max_attempts: 1,
            retry_delay: Duration::ZERO,
            fallback_models: HashMap::new(),
        },
    ));
    let worker = Arc::new(IngestionWorker::new(
        MemoryVectorIndex::new(),
        FsObjectStorage::new(storage_root.path(), "documents"),
        documents,
        models,
        IngestionOptions::default(),
    )?);
    assert_eq!(worker.prepare().await?, 32);

    let queue = Arc::new(ChannelQueue::default());
    queue.publish(job("doc-1", Some("users/1/pump.txt"), None))?;
    queue.publish(job(
        "doc-2",
        None,
        Some(vec![
            Chunk::new("Revenue grew in the third quarter.".to_string(), None, 0),
            Chunk::new("Costs stayed flat.".to_string(), None, 1),
        ]),
    ))?;
    queue.publish(job("doc-3", Some("users/1/photo.png"), None))?;
    queue.finish_input();

    let (_stop, shutdown) = watch::channel(false);
    let report = IngestionConsumer::new(Arc::clone(&queue), ConsumerOptions::default())
        .run(Arc::clone(&worker), shutdown)
        .await;
    assert_eq!(report, ConsumerReport { acked: 3, nacked: 0 });

    let points = worker.vector_index().points();
    let per_document = points.iter().fold(HashMap::new(), |mut counts, point| {
        *counts.entry(point.payload.document_id.as_str()).or_insert(0) += 1;
        counts
    });
    assert_eq!(per_document.get("doc-1"), Some(&1));
    assert_eq!(per_document.get("doc-2"), Some(&2));
    assert_eq!(per_document.get("doc-3"), None);
    assert!(points.iter().all(|point| point.vector.len() == 32));

    let store = worker.callbacks();
    let indexed = ["doc-1", "doc-2", "doc-3"]
        .into_iter()
        .filter_map(|id| store.get(id))
        .collect::<Vec<_>>();
    assert!(indexed
        .iter()
        .all(|document| document.status == DocumentStatus::Ready));
    assert!(indexed[0]
        .extracted_text
        .as_deref()
        .is_some_and(|text| text.contains("impeller")));

    let coordinator = SearchCoordinator::new(MemoryDocumentStore::new(indexed));
    let result = coordinator
        .search(&SearchParams {
            user_id: "user-1".to_string(),
            search: "impeller seals".to_string(),
            ..SearchParams::default()
        })
        .await?;

    assert_eq!(result.strategy, Some(StrategyKind::ExactFullText));
    assert_eq!(result.total, 1);
    assert_eq!(result.documents[0].document.id, "doc-1");
    Ok(())
}
