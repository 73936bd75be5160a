use crate::models::{
    DocumentFilter, DocumentStatus, EmbeddingPoint, Pagination, ScoredPage, SortSpec,
};
use crate::{IngestError, SearchError};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distance {
    Cosine,
    Dot,
    Euclid,
}

impl Distance {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cosine => "Cosine",
            Self::Dot => "Dot",
            Self::Euclid => "Euclid",
        }
    }
}

#[async_trait]
pub trait VectorIndex {
    /// Creates the collection when absent; fails when it exists with another shape.
    async fn ensure_collection(
        &self,
        dimensions: usize,
        distance: Distance,
    ) -> Result<(), SearchError>;

    async fn upsert_points(&self, points: &[EmbeddingPoint]) -> Result<(), SearchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCapabilities {
    pub full_text: bool,
    pub trigram: bool,
}

impl Default for StoreCapabilities {
    fn default() -> Self {
        Self {
            full_text: true,
            trigram: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Every term must be an indexed lexeme.
    All,
    /// Any term may match as a lexeme prefix.
    AnyPrefix,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextQuery {
    pub terms: Vec<String>,
    pub mode: MatchMode,
}

impl TextQuery {
    pub fn all(terms: &[String]) -> Self {
        Self {
            terms: terms.to_vec(),
            mode: MatchMode::All,
        }
    }

    pub fn any_prefix(terms: &[String]) -> Self {
        Self {
            terms: terms.to_vec(),
            mode: MatchMode::AnyPrefix,
        }
    }

    /// Boolean expression in the `to_tsquery` dialect, for SQL-backed stores.
    pub fn expression(&self) -> String {
        let sanitized = self
            .terms
            .iter()
            .map(|term| term.replace(['\'', '\\', ':', '&', '|', '!', '(', ')'], ""))
            .filter(|term| !term.is_empty());

        match self.mode {
            MatchMode::All => sanitized.collect::<Vec<_>>().join(" & "),
            MatchMode::AnyPrefix => sanitized
                .map(|term| format!("{term}:*"))
                .collect::<Vec<_>>()
                .join(" | "),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrigramThreshold {
    /// The store's own similarity operator and default threshold.
    Native,
    /// Greatest per-field similarity must exceed the value.
    Above(f64),
}

/// Read side of the external document store, scoped by [`DocumentFilter`].
///
/// Scored results are ordered by score descending, then newest first.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::default()
    }

    async fn full_text_search(
        &self,
        filter: &DocumentFilter,
        query: &TextQuery,
        pagination: Pagination,
    ) -> Result<ScoredPage, SearchError>;

    async fn trigram_search(
        &self,
        filter: &DocumentFilter,
        query: &str,
        threshold: TrigramThreshold,
        pagination: Pagination,
    ) -> Result<ScoredPage, SearchError>;

    /// Every term must be a substring of the title, description, tags or file name.
    async fn pattern_search(
        &self,
        filter: &DocumentFilter,
        terms: &[String],
        pagination: Pagination,
    ) -> Result<ScoredPage, SearchError>;

    async fn list_documents(
        &self,
        filter: &DocumentFilter,
        sort: SortSpec,
        pagination: Pagination,
    ) -> Result<ScoredPage, SearchError>;
}

/// Write-back channel from ingestion to the document store.
#[async_trait]
pub trait DocumentCallbacks {
    async fn update_status(
        &self,
        document_id: &str,
        status: DocumentStatus,
    ) -> Result<(), IngestError>;

    async fn update_extracted_text(
        &self,
        document_id: &str,
        extracted_text: &str,
    ) -> Result<(), IngestError>;
}

#[async_trait]
pub trait ObjectStorage {
    async fn fetch(&self, bucket: Option<&str>, path: &str) -> Result<Vec<u8>, IngestError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn exact_query_joins_terms_with_and() {
        let query = TextQuery::all(&terms(&["invoice", "2024"]));
        assert_eq!(query.expression(), "invoice & 2024");
    }

    #[test]
    fn prefix_query_joins_terms_with_or() {
        let query = TextQuery::any_prefix(&terms(&["inv", "don't"]));
        assert_eq!(query.expression(), "inv:* | dont:*");
    }
}
