use crate::model_manager::ModelKey;
use crate::query::preprocess_query;
use crate::strategies::StrategyKind;
use crate::SearchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::formats::CommaSeparator;
use serde_with::{serde_as, skip_serializing_none, StringWithSeparator};
use std::fmt;
use uuid::Uuid;

pub const DEFAULT_PAGE_LIMIT: u32 = 20;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    #[default]
    Pending,
    Processing,
    Ready,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "ready" => Some(Self::Ready),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Stored comma-delimited so stores can filter tags with substring predicates.
    #[serde_as(as = "StringWithSeparator::<CommaSeparator, String>")]
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub file_type: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub view_count: u64,
    #[serde(default)]
    pub download_count: u64,
    #[serde(default)]
    pub extracted_text: Option<String>,
}

impl Document {
    pub fn tag_string(&self) -> String {
        self.tags.join(",")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub text: String,
    #[serde(default)]
    pub page_number: Option<u32>,
    #[serde(default)]
    pub size: usize,
    #[serde(default, alias = "index")]
    pub chunk_index: u32,
}

impl Chunk {
    pub fn new(text: String, page_number: Option<u32>, chunk_index: u32) -> Self {
        Self {
            size: text.chars().count(),
            text,
            page_number,
            chunk_index,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PointPayload {
    pub document_id: String,
    pub chunk_index: u32,
    pub text: String,
    pub page_number: Option<u32>,
    pub size: usize,
    #[serde(rename = "type")]
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

pub const TEXT_CHUNK_KIND: &str = "text_chunk";

/// Message delivered on the `document.text.embedding` queue.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingJob {
    pub document_id: String,
    #[serde(default)]
    pub storage_path: Option<String>,
    #[serde(default)]
    pub bucket_name: Option<String>,
    #[serde(default)]
    pub chunks: Option<Vec<Chunk>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PointIdentity {
    /// Fresh UUID per chunk per attempt; redelivery produces duplicate points.
    #[default]
    Random,
    /// UUID derived from document id and chunk index; re-ingestion overwrites.
    Deterministic,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_max_chars: usize,
    pub embed_batch_size: usize,
    pub point_ids: PointIdentity,
    pub model: ModelKey,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: 1_000,
            embed_batch_size: 8,
            point_ids: PointIdentity::Random,
            model: ModelKey::new("feature-extraction", "Xenova/bge-m3"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DocumentFilter {
    pub user_id: String,
    pub file_type: Option<String>,
    pub status: Option<DocumentStatus>,
    pub tags: Vec<String>,
}

impl DocumentFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn matches(&self, document: &Document) -> bool {
        if document.user_id != self.user_id {
            return false;
        }
        if let Some(file_type) = &self.file_type {
            if !document.file_type.eq_ignore_ascii_case(file_type) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if document.status != status {
                return false;
            }
        }
        let tags = document.tag_string().to_lowercase();
        self.tags
            .iter()
            .all(|tag| tags.contains(&tag.to_lowercase()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    Date,
    Title,
    Size,
    Views,
    Downloads,
    Relevance,
}

impl SortField {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "title" => Self::Title,
            "size" => Self::Size,
            "views" => Self::Views,
            "downloads" => Self::Downloads,
            "relevance" => Self::Relevance,
            _ => Self::Date,
        }
    }

    /// Column a SQL-backed store orders by.
    pub fn column(self) -> &'static str {
        match self {
            Self::Date | Self::Relevance => "created_at",
            Self::Title => "title",
            Self::Size => "file_size",
            Self::Views => "view_count",
            Self::Downloads => "download_count",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("asc") {
            Self::Asc
        } else {
            Self::Desc
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortSpec {
    pub field: SortField,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    pub fn new(page: u32, limit: u32, max_limit: u32) -> Self {
        let limit = if limit == 0 { DEFAULT_PAGE_LIMIT } else { limit };
        Self {
            page: page.max(1),
            limit: limit.min(max_limit.max(1)),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize) * self.limit as usize
    }

    pub fn total_pages(&self, total: u64) -> u32 {
        total.div_ceil(u64::from(self.limit.max(1))) as u32
    }

    pub fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset())
            .take(self.limit as usize)
            .collect()
    }
}

/// Search request as received from the API layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub user_id: String,
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub sort_by: String,
    #[serde(default)]
    pub sort_dir: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub filter: DocumentFilter,
    pub clean_query: String,
    pub tokens: Vec<String>,
    pub pagination: Pagination,
    pub sort: SortSpec,
}

impl SearchRequest {
    pub fn from_params(params: &SearchParams, max_limit: u32) -> Result<Self, SearchError> {
        if params.user_id.trim().is_empty() {
            return Err(SearchError::Request(
                "a user id is required to scope the search".to_string(),
            ));
        }

        let status = match params.status.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(DocumentStatus::parse(raw).ok_or_else(|| {
                SearchError::Request(format!("unknown document status filter: {raw}"))
            })?),
        };

        let (clean_query, tokens) = preprocess_query(&params.search);

        Ok(Self {
            filter: DocumentFilter {
                user_id: params.user_id.clone(),
                file_type: params
                    .file_type
                    .as_ref()
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty()),
                status,
                tags: params
                    .tags
                    .iter()
                    .map(|tag| tag.trim().to_string())
                    .filter(|tag| !tag.is_empty())
                    .collect(),
            },
            clean_query,
            tokens,
            pagination: Pagination::new(params.page, params.limit, max_limit),
            sort: SortSpec {
                field: SortField::parse(&params.sort_by),
                direction: SortDirection::parse(&params.sort_dir),
            },
        })
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    #[serde(flatten)]
    pub document: Document,
    pub score: Option<f64>,
}

impl SearchHit {
    pub fn unscored(document: Document) -> Self {
        Self {
            document,
            score: None,
        }
    }
}

/// One page of store matches plus the unpaginated match count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoredPage {
    pub hits: Vec<SearchHit>,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub documents: Vec<SearchHit>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub strategy: Option<StrategyKind>,
}

impl SearchResult {
    pub fn from_page(
        page: ScoredPage,
        pagination: Pagination,
        strategy: Option<StrategyKind>,
    ) -> Self {
        let mut documents = page.hits;
        documents.truncate(pagination.limit as usize);
        Self {
            documents,
            total: page.total,
            page: pagination.page,
            limit: pagination.limit,
            total_pages: pagination.total_pages(page.total),
            strategy,
        }
    }

    pub fn empty(pagination: Pagination, strategy: Option<StrategyKind>) -> Self {
        Self::from_page(ScoredPage::default(), pagination, strategy)
    }
}
