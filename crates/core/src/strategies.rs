use crate::models::{ScoredPage, SearchRequest};
use crate::traits::{DocumentStore, StoreCapabilities, TextQuery, TrigramThreshold};
use crate::SearchError;
use serde::{Deserialize, Serialize};
use tracing::debug;

const MIN_QUERY_CHARS: usize = 3;
const MIN_PATTERN_TERM_CHARS: usize = 2;

/// Matching techniques in cascade order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    ExactFullText,
    Fuzzy,
    Trigram,
    Pattern,
}

impl StrategyKind {
    pub const CASCADE: [StrategyKind; 4] = [
        StrategyKind::ExactFullText,
        StrategyKind::Fuzzy,
        StrategyKind::Trigram,
        StrategyKind::Pattern,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ExactFullText => "exact_full_text",
            Self::Fuzzy => "fuzzy",
            Self::Trigram => "trigram",
            Self::Pattern => "pattern",
        }
    }

    pub fn can_handle(self, request: &SearchRequest, capabilities: StoreCapabilities) -> bool {
        let has_tokens = !request.tokens.is_empty();
        let long_enough = request.clean_query.chars().count() >= MIN_QUERY_CHARS;

        match self {
            Self::ExactFullText => capabilities.full_text && has_tokens && long_enough,
            Self::Fuzzy => capabilities.full_text && has_tokens,
            Self::Trigram => capabilities.trigram && long_enough,
            Self::Pattern => has_tokens,
        }
    }

    /// Conjunctive exact lexemes for the exact strategy, OR of prefixes otherwise.
    fn text_query(self, request: &SearchRequest) -> TextQuery {
        match self {
            Self::ExactFullText => TextQuery::all(&request.tokens),
            _ => TextQuery::any_prefix(&request.tokens),
        }
    }

    pub async fn search(
        self,
        store: &dyn DocumentStore,
        request: &SearchRequest,
        trigram_fallback_threshold: f64,
    ) -> Result<ScoredPage, SearchError> {
        let filter = &request.filter;
        let pagination = request.pagination;

        match self {
            Self::ExactFullText | Self::Fuzzy => {
                let query = self.text_query(request);
                debug!(
                    strategy = self.name(),
                    expression = %query.expression(),
                    "full-text query"
                );
                store.full_text_search(filter, &query, pagination).await
            }
            Self::Trigram => {
                let native = store
                    .trigram_search(
                        filter,
                        &request.clean_query,
                        TrigramThreshold::Native,
                        pagination,
                    )
                    .await?;
                if native.total > 0 {
                    return Ok(native);
                }

                debug!(
                    threshold = trigram_fallback_threshold,
                    "native trigram operator found nothing, retrying with explicit threshold"
                );
                store
                    .trigram_search(
                        filter,
                        &request.clean_query,
                        TrigramThreshold::Above(trigram_fallback_threshold),
                        pagination,
                    )
                    .await
            }
            Self::Pattern => {
                let terms = request
                    .tokens
                    .iter()
                    .filter(|token| token.chars().count() >= MIN_PATTERN_TERM_CHARS)
                    .cloned()
                    .collect::<Vec<_>>();
                if terms.is_empty() {
                    return Ok(ScoredPage::default());
                }
                store.pattern_search(filter, &terms, pagination).await
            }
        }
    }
}
