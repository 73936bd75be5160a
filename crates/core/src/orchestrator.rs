use crate::models::{
    ScoredPage, SearchParams, SearchRequest, SearchResult, SortDirection, SortField, SortSpec,
};
use crate::strategies::StrategyKind;
use crate::traits::DocumentStore;
use crate::SearchError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Upper bound for each store call; `None` waits indefinitely.
    pub strategy_timeout: Option<Duration>,
    /// Report a failing strategy as an empty result instead of an error.
    pub swallow_strategy_errors: bool,
    pub trigram_fallback_threshold: f64,
    pub max_limit: u32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            strategy_timeout: Some(Duration::from_secs(10)),
            swallow_strategy_errors: false,
            trigram_fallback_threshold: 0.1,
            max_limit: 100,
        }
    }
}

/// Answers search requests with the first applicable strategy, or a plain
/// listing when the query has no usable text.
///
/// Dropping the returned future cancels the store call in flight.
pub struct SearchCoordinator<S>
where
    S: DocumentStore,
{
    store: S,
    options: SearchOptions,
}

impl<S> SearchCoordinator<S>
where
    S: DocumentStore,
{
    pub fn new(store: S) -> Self {
        Self::with_options(store, SearchOptions::default())
    }

    pub fn with_options(store: S, options: SearchOptions) -> Self {
        Self { store, options }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn search(&self, params: &SearchParams) -> Result<SearchResult, SearchError> {
        let request = SearchRequest::from_params(params, self.options.max_limit)?;

        if request.clean_query.is_empty() {
            return self.list(&request).await;
        }

        self.cascade(&request).await
    }

    /// Runs the first strategy that can handle the request; an empty result
    /// ends the cascade rather than falling through to the next strategy.
    pub async fn cascade(&self, request: &SearchRequest) -> Result<SearchResult, SearchError> {
        let capabilities = self.store.capabilities();

        let Some(kind) = StrategyKind::CASCADE
            .into_iter()
            .find(|kind| kind.can_handle(request, capabilities))
        else {
            debug!(query = %request.clean_query, "no strategy can handle the query");
            return Ok(SearchResult::empty(request.pagination, None));
        };

        debug!(strategy = kind.name(), query = %request.clean_query, "running search strategy");
        let outcome = self
            .bounded(
                kind.name(),
                kind.search(
                    &self.store,
                    request,
                    self.options.trigram_fallback_threshold,
                ),
            )
            .await;

        match outcome {
            Ok(page) => {
                info!(strategy = kind.name(), total = page.total, "search completed");
                Ok(SearchResult::from_page(page, request.pagination, Some(kind)))
            }
            Err(error) if self.options.swallow_strategy_errors => {
                warn!(
                    strategy = kind.name(),
                    %error,
                    "search strategy failed, reporting no matches"
                );
                Ok(SearchResult::empty(request.pagination, Some(kind)))
            }
            Err(error) => Err(SearchError::Strategy {
                strategy: kind.name().to_string(),
                source: Box::new(error),
            }),
        }
    }

    pub async fn list(&self, request: &SearchRequest) -> Result<SearchResult, SearchError> {
        let sort = if request.sort.field == SortField::Relevance {
            SortSpec {
                field: SortField::Date,
                direction: SortDirection::Desc,
            }
        } else {
            request.sort
        };

        let page = self
            .bounded(
                "listing",
                self.store
                    .list_documents(&request.filter, sort, request.pagination),
            )
            .await?;

        debug!(total = page.total, sort = sort.field.column(), "listing completed");
        Ok(SearchResult::from_page(page, request.pagination, None))
    }

    async fn bounded<F>(&self, operation: &str, call: F) -> Result<ScoredPage, SearchError>
    where
        F: Future<Output = Result<ScoredPage, SearchError>>,
    {
        match self.options.strategy_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| SearchError::Timeout {
                    operation: operation.to_string(),
                    millis: limit.as_millis(),
                })?,
            None => call.await,
        }
    }
}
