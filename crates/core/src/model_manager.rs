use crate::embeddings::{CharacterNgramEmbedder, EmbeddingModel};
use crate::error::ModelError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub type SharedModel = Arc<dyn EmbeddingModel>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    pub task: String,
    pub model: String,
}

impl ModelKey {
    pub fn new(task: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.task, self.model)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelOptions {
    pub revision: String,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            revision: "main".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingStatus {
    NotLoaded,
    Loading,
    Loaded,
}

#[derive(Debug, Clone)]
pub struct ModelManagerOptions {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Default model per task, tried once every attempt on the requested model failed.
    pub fallback_models: HashMap<String, String>,
}

impl Default for ModelManagerOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
            fallback_models: HashMap::from([(
                "feature-extraction".to_string(),
                "Xenova/all-MiniLM-L6-v2".to_string(),
            )]),
        }
    }
}

#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load_local(
        &self,
        key: &ModelKey,
        options: &ModelOptions,
    ) -> Result<SharedModel, ModelError>;

    async fn fetch_remote(
        &self,
        key: &ModelKey,
        options: &ModelOptions,
    ) -> Result<SharedModel, ModelError>;
}

type LoadOutcome = Option<Result<SharedModel, ModelError>>;

enum CacheEntry {
    Loading(watch::Receiver<LoadOutcome>),
    Loaded(SharedModel),
}

type Entries = Arc<Mutex<HashMap<ModelKey, CacheEntry>>>;

/// Per-process cache of embedding models keyed by `(task, model)`.
///
/// At most one load runs per key; concurrent callers subscribe to the
/// in-flight load and receive the same handle or the same error.
pub struct ModelManager {
    loader: Arc<dyn ModelLoader>,
    options: ModelManagerOptions,
    entries: Entries,
}

impl ModelManager {
    pub fn new(loader: Arc<dyn ModelLoader>, options: ModelManagerOptions) -> Self {
        Self {
            loader,
            options,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn ensure_model(
        &self,
        task: &str,
        model: &str,
        options: &ModelOptions,
    ) -> Result<SharedModel, ModelError> {
        let key = ModelKey::new(task, model);

        let mut receiver = {
            let mut entries = lock(&self.entries);
            match entries.get(&key) {
                Some(CacheEntry::Loaded(handle)) => return Ok(Arc::clone(handle)),
                Some(CacheEntry::Loading(receiver)) => {
                    debug!(%key, "joining in-flight model load");
                    receiver.clone()
                }
                None => {
                    let (sender, receiver) = watch::channel(None);
                    entries.insert(key.clone(), CacheEntry::Loading(receiver.clone()));
                    self.spawn_load(key.clone(), options.clone(), sender, receiver.clone());
                    receiver
                }
            }
        };

        let outcome = match receiver.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };

        outcome.unwrap_or_else(|| {
            forget_if_current(&self.entries, &key, &receiver);
            Err(ModelError::Abandoned {
                task: key.task.clone(),
                model: key.model.clone(),
            })
        })
    }

    pub fn has_model(&self, task: &str, model: &str) -> bool {
        matches!(
            lock(&self.entries).get(&ModelKey::new(task, model)),
            Some(CacheEntry::Loaded(_))
        )
    }

    pub fn loading_status(&self, task: &str, model: &str) -> LoadingStatus {
        match lock(&self.entries).get(&ModelKey::new(task, model)) {
            None => LoadingStatus::NotLoaded,
            Some(CacheEntry::Loading(_)) => LoadingStatus::Loading,
            Some(CacheEntry::Loaded(_)) => LoadingStatus::Loaded,
        }
    }

    /// Drops the cached handle; an in-flight load still completes for its waiters
    /// but is not cached.
    pub fn clear_model(&self, task: &str, model: &str) -> bool {
        lock(&self.entries)
            .remove(&ModelKey::new(task, model))
            .is_some()
    }

    pub fn clear_all_models(&self) {
        lock(&self.entries).clear();
    }

    fn spawn_load(
        &self,
        key: ModelKey,
        options: ModelOptions,
        sender: watch::Sender<LoadOutcome>,
        receiver: watch::Receiver<LoadOutcome>,
    ) {
        let loader = Arc::clone(&self.loader);
        let settings = self.options.clone();
        let entries = Arc::clone(&self.entries);

        tokio::spawn(async move {
            let result = load_with_fallback(loader.as_ref(), &key, &options, &settings).await;

            {
                let mut entries = lock(&entries);
                let still_current = matches!(
                    entries.get(&key),
                    Some(CacheEntry::Loading(current)) if current.same_channel(&receiver)
                );
                if still_current {
                    match &result {
                        Ok(handle) => {
                            entries.insert(key.clone(), CacheEntry::Loaded(Arc::clone(handle)));
                        }
                        Err(_) => {
                            entries.remove(&key);
                        }
                    }
                }
            }

            let _ = sender.send(Some(result));
        });
    }
}

fn lock(entries: &Entries) -> MutexGuard<'_, HashMap<ModelKey, CacheEntry>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

fn forget_if_current(entries: &Entries, key: &ModelKey, receiver: &watch::Receiver<LoadOutcome>) {
    let mut entries = lock(entries);
    let current = matches!(
        entries.get(key),
        Some(CacheEntry::Loading(existing)) if existing.same_channel(receiver)
    );
    if current {
        entries.remove(key);
    }
}

async fn load_once(
    loader: &dyn ModelLoader,
    key: &ModelKey,
    options: &ModelOptions,
) -> Result<SharedModel, ModelError> {
    match loader.load_local(key, options).await {
        Ok(handle) => Ok(handle),
        Err(local) => {
            debug!(%key, error = %local, "model not in local cache, fetching");
            loader.fetch_remote(key, options).await
        }
    }
}

async fn load_with_fallback(
    loader: &dyn ModelLoader,
    key: &ModelKey,
    options: &ModelOptions,
    settings: &ModelManagerOptions,
) -> Result<SharedModel, ModelError> {
    let max_attempts = settings.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        info!(task = %key.task, model = %key.model, attempt, max_attempts, "loading model");
        match load_once(loader, key, options).await {
            Ok(handle) => {
                info!(task = %key.task, model = %key.model, attempt, "model loaded");
                return Ok(handle);
            }
            Err(error) => {
                warn!(
                    task = %key.task,
                    model = %key.model,
                    attempt,
                    max_attempts,
                    %error,
                    "model load attempt failed"
                );
                last_error = error.to_string();
            }
        }

        if attempt < max_attempts {
            tokio::time::sleep(settings.retry_delay).await;
        }
    }

    let Some(fallback) = settings.fallback_models.get(&key.task) else {
        error!(task = %key.task, model = %key.model, "no fallback model configured");
        return Err(ModelError::Exhausted {
            task: key.task.clone(),
            model: key.model.clone(),
            fallback: None,
            reason: last_error,
        });
    };

    warn!(task = %key.task, model = %key.model, %fallback, "falling back to default model");
    let fallback_key = ModelKey::new(key.task.clone(), fallback.clone());
    load_once(loader, &fallback_key, options)
        .await
        .map_err(|error| {
            error!(
                task = %key.task,
                model = %key.model,
                %fallback,
                %error,
                "fallback model failed"
            );
            ModelError::Exhausted {
                task: key.task.clone(),
                model: key.model.clone(),
                fallback: Some(fallback.clone()),
                reason: format!("{last_error}; fallback: {error}"),
            }
        })
}

#[derive(Debug, Deserialize)]
struct ModelManifest {
    #[serde(alias = "hidden_size")]
    dimensions: usize,
}

/// Resolves models from `{cache_dir}/{model}/config.json`, fetching the
/// manifest from a Hugging Face compatible hub when it is missing.
pub struct HubModelLoader {
    cache_dir: PathBuf,
    hub_url: String,
    client: Client,
}

impl HubModelLoader {
    pub fn new(cache_dir: impl Into<PathBuf>, hub_url: impl Into<String>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            hub_url: hub_url.into(),
            client: Client::new(),
        }
    }

    fn manifest_path(&self, model: &str) -> PathBuf {
        model
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != "..")
            .fold(self.cache_dir.clone(), |path, segment| path.join(segment))
            .join("config.json")
    }

    fn manifest_url(&self, model: &str, revision: &str) -> String {
        format!(
            "{}/{}/resolve/{}/config.json",
            self.hub_url.trim_end_matches('/'),
            model,
            revision
        )
    }
}

fn build_model(model: &str, bytes: &[u8]) -> Result<SharedModel, String> {
    let manifest: ModelManifest =
        serde_json::from_slice(bytes).map_err(|error| error.to_string())?;
    if manifest.dimensions == 0 {
        return Err("manifest declares zero dimensions".to_string());
    }
    Ok(Arc::new(CharacterNgramEmbedder::new(
        model,
        manifest.dimensions,
    )))
}

#[async_trait]
impl ModelLoader for HubModelLoader {
    async fn load_local(
        &self,
        key: &ModelKey,
        _options: &ModelOptions,
    ) -> Result<SharedModel, ModelError> {
        let path = self.manifest_path(&key.model);
        let local_error = |reason: String| ModelError::LocalCache {
            model: key.model.clone(),
            path: path.display().to_string(),
            reason,
        };

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|error| local_error(error.to_string()))?;
        build_model(&key.model, &bytes).map_err(local_error)
    }

    async fn fetch_remote(
        &self,
        key: &ModelKey,
        options: &ModelOptions,
    ) -> Result<SharedModel, ModelError> {
        let url = self.manifest_url(&key.model, &options.revision);
        let remote_error = |reason: String| ModelError::Remote {
            model: key.model.clone(),
            url: url.clone(),
            reason,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|error| remote_error(error.to_string()))?;
        if !response.status().is_success() {
            return Err(remote_error(response.status().to_string()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|error| remote_error(error.to_string()))?;
        let handle = build_model(&key.model, &bytes).map_err(&remote_error)?;

        let path = self.manifest_path(&key.model);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| remote_error(format!("persisting manifest: {error}")))?;
        }
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|error| remote_error(format!("persisting manifest: {error}")))?;

        Ok(handle)
    }
}
