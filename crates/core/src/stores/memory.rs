use crate::models::{
    Document, DocumentFilter, DocumentStatus, EmbeddingPoint, Pagination, ScoredPage, SearchHit,
    SortDirection, SortField, SortSpec,
};
use crate::scoring::{
    best_field_similarity, pattern_score, text_rank, NATIVE_TRIGRAM_THRESHOLD,
};
use crate::traits::{
    DocumentCallbacks, DocumentStore, Distance, StoreCapabilities, TextQuery, TrigramThreshold,
    VectorIndex,
};
use crate::{IngestError, SearchError};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// In-memory document store evaluating every search operator over all documents.
pub struct MemoryDocumentStore {
    documents: RwLock<Vec<Document>>,
    capabilities: StoreCapabilities,
}

impl MemoryDocumentStore {
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            documents: RwLock::new(documents),
            capabilities: StoreCapabilities::default(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: StoreCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn insert(&self, document: Document) {
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        documents.retain(|existing| existing.id != document.id);
        documents.push(document);
    }

    pub fn get(&self, document_id: &str) -> Option<Document> {
        self.read()
            .iter()
            .find(|document| document.id == document_id)
            .cloned()
    }

    pub fn record_view(&self, document_id: &str) -> bool {
        self.modify(document_id, |document| document.view_count += 1)
    }

    pub fn record_download(&self, document_id: &str) -> bool {
        self.modify(document_id, |document| document.download_count += 1)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Document>> {
        self.documents.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn modify(&self, document_id: &str, change: impl FnOnce(&mut Document)) -> bool {
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        match documents.iter_mut().find(|document| document.id == document_id) {
            Some(document) => {
                change(document);
                true
            }
            None => false,
        }
    }

    fn scored(
        &self,
        filter: &DocumentFilter,
        pagination: Pagination,
        score: impl Fn(&Document) -> Option<f64>,
    ) -> ScoredPage {
        let mut hits = self
            .read()
            .iter()
            .filter(|document| filter.matches(document))
            .filter_map(|document| {
                score(document).map(|value| SearchHit {
                    document: document.clone(),
                    score: Some(value),
                })
            })
            .collect::<Vec<_>>();

        hits.sort_by(|left, right| {
            right
                .score
                .unwrap_or_default()
                .total_cmp(&left.score.unwrap_or_default())
                .then_with(|| right.document.created_at.cmp(&left.document.created_at))
        });

        paginate(hits, pagination)
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

fn paginate(hits: Vec<SearchHit>, pagination: Pagination) -> ScoredPage {
    let total = hits.len() as u64;
    ScoredPage {
        hits: pagination.slice(hits),
        total,
    }
}

fn compare_by(field: SortField, left: &Document, right: &Document) -> Ordering {
    match field {
        SortField::Date | SortField::Relevance => left.created_at.cmp(&right.created_at),
        SortField::Title => left.title.to_lowercase().cmp(&right.title.to_lowercase()),
        SortField::Size => left.file_size.cmp(&right.file_size),
        SortField::Views => left.view_count.cmp(&right.view_count),
        SortField::Downloads => left.download_count.cmp(&right.download_count),
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn capabilities(&self) -> StoreCapabilities {
        self.capabilities
    }

    async fn full_text_search(
        &self,
        filter: &DocumentFilter,
        query: &TextQuery,
        pagination: Pagination,
    ) -> Result<ScoredPage, SearchError> {
        if !self.capabilities.full_text {
            return Err(SearchError::Request(
                "full-text search is not enabled on this store".to_string(),
            ));
        }
        Ok(self.scored(filter, pagination, |document| text_rank(document, query)))
    }

    async fn trigram_search(
        &self,
        filter: &DocumentFilter,
        query: &str,
        threshold: TrigramThreshold,
        pagination: Pagination,
    ) -> Result<ScoredPage, SearchError> {
        if !self.capabilities.trigram {
            return Err(SearchError::Request(
                "trigram search is not enabled on this store".to_string(),
            ));
        }

        Ok(self.scored(filter, pagination, |document| {
            let similarity = best_field_similarity(document, query);
            let matched = match threshold {
                TrigramThreshold::Native => similarity >= NATIVE_TRIGRAM_THRESHOLD,
                TrigramThreshold::Above(minimum) => similarity > minimum,
            };
            matched.then_some(similarity)
        }))
    }

    async fn pattern_search(
        &self,
        filter: &DocumentFilter,
        terms: &[String],
        pagination: Pagination,
    ) -> Result<ScoredPage, SearchError> {
        Ok(self.scored(filter, pagination, |document| {
            pattern_score(document, terms)
        }))
    }

    async fn list_documents(
        &self,
        filter: &DocumentFilter,
        sort: SortSpec,
        pagination: Pagination,
    ) -> Result<ScoredPage, SearchError> {
        let mut documents = self
            .read()
            .iter()
            .filter(|document| filter.matches(document))
            .cloned()
            .collect::<Vec<_>>();

        documents.sort_by(|left, right| {
            let ordering = compare_by(sort.field, left, right);
            match sort.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        });

        Ok(paginate(
            documents.into_iter().map(SearchHit::unscored).collect(),
            pagination,
        ))
    }
}

#[async_trait]
impl DocumentCallbacks for MemoryDocumentStore {
    async fn update_status(
        &self,
        document_id: &str,
        status: DocumentStatus,
    ) -> Result<(), IngestError> {
        if self.modify(document_id, |document| document.status = status) {
            Ok(())
        } else {
            Err(IngestError::Callback(format!("unknown document {document_id}")))
        }
    }

    async fn update_extracted_text(
        &self,
        document_id: &str,
        extracted_text: &str,
    ) -> Result<(), IngestError> {
        let text = extracted_text.to_string();
        if self.modify(document_id, |document| document.extracted_text = Some(text)) {
            Ok(())
        } else {
            Err(IngestError::Callback(format!("unknown document {document_id}")))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CollectionShape {
    dimensions: usize,
    distance: Distance,
}

/// Vector index kept in memory; points are keyed by id so upserts overwrite.
#[derive(Default)]
pub struct MemoryVectorIndex {
    shape: RwLock<Option<CollectionShape>>,
    points: RwLock<HashMap<uuid::Uuid, EmbeddingPoint>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> Vec<EmbeddingPoint> {
        let mut points = self
            .points
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect::<Vec<_>>();
        points.sort_by(|left, right| {
            left.payload
                .document_id
                .cmp(&right.payload.document_id)
                .then(left.payload.chunk_index.cmp(&right.payload.chunk_index))
        });
        points
    }

    pub fn len(&self) -> usize {
        self.points
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn ensure_collection(
        &self,
        dimensions: usize,
        distance: Distance,
    ) -> Result<(), SearchError> {
        let requested = CollectionShape {
            dimensions,
            distance,
        };
        let mut shape = self.shape.write().unwrap_or_else(PoisonError::into_inner);
        match *shape {
            None => {
                *shape = Some(requested);
                Ok(())
            }
            Some(existing) if existing == requested => Ok(()),
            Some(existing) => Err(SearchError::BackendResponse {
                backend: "memory".to_string(),
                details: format!(
                    "collection has {}-dim vectors, expected {dimensions}",
                    existing.dimensions
                ),
            }),
        }
    }

    async fn upsert_points(&self, points: &[EmbeddingPoint]) -> Result<(), SearchError> {
        let shape = *self.shape.read().unwrap_or_else(PoisonError::into_inner);
        let Some(shape) = shape else {
            return Err(SearchError::Request(
                "collection must exist before upserting".to_string(),
            ));
        };

        if let Some(point) = points
            .iter()
            .find(|point| point.vector.len() != shape.dimensions)
        {
            return Err(SearchError::Request(format!(
                "embedding dimension {} != {}",
                point.vector.len(),
                shape.dimensions
            )));
        }

        let mut stored = self.points.write().unwrap_or_else(PoisonError::into_inner);
        for point in points {
            stored.insert(point.id, point.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PointPayload, TEXT_CHUNK_KIND};
    use chrono::{Duration, TimeZone, Utc};

    fn document(id: &str, title: &str, age_days: i64) -> Document {
        Document {
            id: id.to_string(),
            user_id: "user-1".to_string(),
            title: title.to_string(),
            description: None,
            tags: Vec::new(),
            file_name: format!("{id}.pdf"),
            file_type: "pdf".to_string(),
            file_size: age_days as u64 * 100,
            status: DocumentStatus::Ready,
            created_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
                - Duration::days(age_days),
            view_count: 0,
            download_count: 0,
            extracted_text: None,
        }
    }

    fn page() -> Pagination {
        Pagination::new(1, 10, 100)
    }

    fn terms(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[tokio::test]
    async fn equal_scores_break_ties_by_recency() -> Result<(), SearchError> {
        let store = MemoryDocumentStore::new(vec![
            document("old", "Budget", 10),
            document("new", "Budget", 1),
        ]);

        let page = store
            .pattern_search(&DocumentFilter::for_user("user-1"), &terms(&["budget"]), page())
            .await?;
        assert_eq!(page.total, 2);
        assert_eq!(page.hits[0].document.id, "new");
        Ok(())
    }

    #[tokio::test]
    async fn searches_never_cross_owners() -> Result<(), SearchError> {
        let mut foreign = document("foreign", "Budget", 1);
        foreign.user_id = "user-2".to_string();
        let store = MemoryDocumentStore::new(vec![foreign, document("mine", "Budget", 2)]);

        let page = store
            .full_text_search(
                &DocumentFilter::for_user("user-1"),
                &TextQuery::all(&terms(&["budget"])),
                page(),
            )
            .await?;
        assert_eq!(page.total, 1);
        assert_eq!(page.hits[0].document.id, "mine");
        Ok(())
    }

    #[tokio::test]
    async fn trigram_thresholds_differ() -> Result<(), SearchError> {
        let store = MemoryDocumentStore::new(vec![document("a", "quarterly financial report", 1)]);
        let filter = DocumentFilter::for_user("user-1");

        let native = store
            .trigram_search(&filter, "quartr", TrigramThreshold::Native, page())
            .await?;
        let relaxed = store
            .trigram_search(&filter, "quartr", TrigramThreshold::Above(0.1), page())
            .await?;
        assert_eq!(native.total, 0);
        assert_eq!(relaxed.total, 1);
        assert!(relaxed.hits[0].score.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn listing_sorts_by_requested_column() -> Result<(), SearchError> {
        let store = MemoryDocumentStore::new(vec![
            document("b", "Beta", 2),
            document("a", "alpha", 3),
            document("c", "Gamma", 1),
        ]);
        let filter = DocumentFilter::for_user("user-1");

        let by_title = store
            .list_documents(
                &filter,
                SortSpec {
                    field: SortField::Title,
                    direction: SortDirection::Asc,
                },
                page(),
            )
            .await?;
        let titles = by_title
            .hits
            .iter()
            .map(|hit| hit.document.title.as_str())
            .collect::<Vec<_>>();
        assert_eq!(titles, vec!["alpha", "Beta", "Gamma"]);
        assert!(by_title.hits.iter().all(|hit| hit.score.is_none()));

        let newest = store
            .list_documents(&filter, SortSpec::default(), Pagination::new(1, 2, 100))
            .await?;
        assert_eq!(newest.total, 3);
        assert_eq!(newest.hits.len(), 2);
        assert_eq!(newest.hits[0].document.id, "c");
        Ok(())
    }

    #[tokio::test]
    async fn disabled_capabilities_fail_loudly() {
        let store = MemoryDocumentStore::default().with_capabilities(StoreCapabilities {
            full_text: false,
            trigram: false,
        });
        let filter = DocumentFilter::for_user("user-1");
        assert!(store
            .full_text_search(&filter, &TextQuery::all(&terms(&["x"])), page())
            .await
            .is_err());
        assert!(store
            .trigram_search(&filter, "abc", TrigramThreshold::Native, page())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn callbacks_update_documents() -> Result<(), IngestError> {
        let store = MemoryDocumentStore::new(vec![document("a", "Alpha", 1)]);
        store.update_status("a", DocumentStatus::Processing).await?;
        store.update_extracted_text("a", "body").await?;
        assert!(store.record_view("a"));
        assert!(store.record_download("a"));

        let stored = store.get("a").expect("document exists");
        assert_eq!(stored.status, DocumentStatus::Processing);
        assert_eq!(stored.extracted_text.as_deref(), Some("body"));
        assert_eq!((stored.view_count, stored.download_count), (1, 1));

        assert!(store.update_status("missing", DocumentStatus::Ready).await.is_err());
        Ok(())
    }

    fn point(id: u128, dims: usize) -> EmbeddingPoint {
        EmbeddingPoint {
            id: uuid::Uuid::from_u128(id),
            vector: vec![0.0; dims],
            payload: PointPayload {
                document_id: "doc".to_string(),
                chunk_index: id as u32,
                text: "text".to_string(),
                page_number: None,
                size: 4,
                kind: TEXT_CHUNK_KIND.to_string(),
                created_at: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn vector_index_checks_shape_and_overwrites_by_id() -> Result<(), SearchError> {
        let index = MemoryVectorIndex::new();
        assert!(index.upsert_points(&[point(1, 4)]).await.is_err());

        index.ensure_collection(4, Distance::Cosine).await?;
        index.ensure_collection(4, Distance::Cosine).await?;
        assert!(index.ensure_collection(8, Distance::Cosine).await.is_err());

        index.upsert_points(&[point(1, 4), point(2, 4)]).await?;
        index.upsert_points(&[point(1, 4)]).await?;
        assert_eq!(index.len(), 2);
        assert!(index.upsert_points(&[point(3, 3)]).await.is_err());
        Ok(())
    }
}
