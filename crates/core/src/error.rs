use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("object storage error for {path}: {details}")]
    Storage { path: String, details: String },

    #[error("document callback failed: {0}")]
    Callback(String),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("vector index error: {0}")]
    Index(#[from] SearchError),

    #[error("blocking task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("search request failed: {0}")]
    Request(String),

    #[error("store call for {operation} timed out after {millis}ms")]
    Timeout { operation: String, millis: u128 },

    #[error("strategy {strategy} failed: {source}")]
    Strategy {
        strategy: String,
        #[source]
        source: Box<SearchError>,
    },
}

/// Errors are cloned to every caller waiting on the same in-flight load, so
/// causes are carried as rendered strings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("model {model} is not in the local cache at {path}: {reason}")]
    LocalCache {
        model: String,
        path: String,
        reason: String,
    },

    #[error("fetching model {model} from {url} failed: {reason}")]
    Remote {
        model: String,
        url: String,
        reason: String,
    },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error(
        "could not load model {model} for task {task}; fallback {} also failed: {reason}",
        .fallback.as_deref().unwrap_or("<none configured>")
    )]
    Exhausted {
        task: String,
        model: String,
        fallback: Option<String>,
        reason: String,
    },

    #[error("load of {model} for task {task} was abandoned before completing")]
    Abandoned { task: String, model: String },
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
