use crate::store::ConfigStore;
use facefind_core::{default_model_dir, ModelAssets};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Config Store key holding the active [`ProviderConfig`].
pub const PROVIDER_CONFIG_KEY: &str = "facefind_ai_config";

pub const DEFAULT_LOCAL_CHUNK_SIZE: usize = 5;
pub const DEFAULT_REMOTE_BATCH_SIZE: usize = 50;
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Which matching strategy a search uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// On-device descriptor comparison.
    #[default]
    #[serde(alias = "browser")]
    Local,
    /// Remote matching API.
    #[serde(alias = "api")]
    Remote,
}

/// Provider selection as stored in the Config Store.
///
/// Also accepts the older field names (`apiUrl`, `apiKey`) and provider
/// names (`browser`, `api`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default, alias = "apiUrl", skip_serializing_if = "Option::is_none")]
    pub remote_endpoint: Option<String>,
    #[serde(default, alias = "apiKey", skip_serializing_if = "Option::is_none")]
    pub remote_key: Option<String>,
}

impl ProviderConfig {
    pub fn local() -> Self {
        Self::default()
    }

    pub fn remote(endpoint: impl Into<String>, key: Option<String>) -> Self {
        Self {
            provider: ProviderKind::Remote,
            remote_endpoint: Some(endpoint.into()),
            remote_key: key,
        }
    }

    /// Parse a stored setting. String values are JSON text and decoded once more.
    pub fn from_setting(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        match value {
            serde_json::Value::String(text) => serde_json::from_str(&text),
            other => serde_json::from_value(other),
        }
    }

    /// Non-empty remote endpoint, if configured.
    pub fn endpoint(&self) -> Option<&str> {
        self.remote_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }

    /// The provider a search will actually use: remote requires an endpoint.
    pub fn effective_provider(&self) -> ProviderKind {
        match (self.provider, self.endpoint()) {
            (ProviderKind::Remote, Some(_)) => ProviderKind::Remote,
            _ => ProviderKind::Local,
        }
    }
}

/// Loads and caches the [`ProviderConfig`] from the Config Store.
///
/// The cached value lives for the process; only [`reload`](Self::reload)
/// refreshes it (e.g. after settings are saved). Fetch failures never fail a
/// search: the previous value, or the local default, stays in effect.
pub struct ConfigResolver {
    store: Arc<dyn ConfigStore>,
    cached: RwLock<Option<ProviderConfig>>,
}

impl ConfigResolver {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self {
            store,
            cached: RwLock::new(None),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.cached.read().map(|c| c.is_some()).unwrap_or(false)
    }

    /// Last loaded configuration, or the local default.
    pub fn current(&self) -> ProviderConfig {
        self.cached
            .read()
            .ok()
            .and_then(|c| c.clone())
            .unwrap_or_default()
    }

    /// Load once; later calls return the cached value without touching the store.
    pub async fn load(&self) -> ProviderConfig {
        if let Some(config) = self.cached.read().ok().and_then(|c| c.clone()) {
            return config;
        }
        self.reload().await
    }

    /// Fetch from the store unconditionally.
    pub async fn reload(&self) -> ProviderConfig {
        match self.store.get_setting(PROVIDER_CONFIG_KEY).await {
            Ok(Some(value)) => match ProviderConfig::from_setting(value) {
                Ok(config) => {
                    tracing::info!(
                        provider = ?config.effective_provider(),
                        endpoint = config.endpoint().unwrap_or(""),
                        "provider configuration loaded"
                    );
                    self.store_cached(config.clone());
                    config
                }
                Err(e) => {
                    tracing::warn!(error = %e, "malformed provider configuration, keeping previous");
                    self.current()
                }
            },
            Ok(None) => {
                tracing::debug!("no provider configuration stored, using local default");
                let config = self.current();
                self.store_cached(config.clone());
                config
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to load provider configuration, keeping previous");
                self.current()
            }
        }
    }

    fn store_cached(&self, config: ProviderConfig) {
        if let Ok(mut cached) = self.cached.write() {
            *cached = Some(config);
        }
    }
}

/// Engine settings, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Where to download missing model files from, if anywhere.
    pub model_base_url: Option<String>,
    /// Path to the SQLite gallery/settings database.
    pub db_path: PathBuf,
    /// Euclidean distance threshold for a local match. `None` uses the
    /// embedder's own calibration.
    pub match_threshold: Option<f32>,
    /// Candidates evaluated concurrently per local chunk.
    pub local_chunk_size: usize,
    /// Gallery entries per remote request.
    pub remote_batch_size: usize,
    /// Deadline for each remote request.
    pub remote_timeout: Duration,
    /// Whether the caller is served over a secure transport.
    pub secure_context: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            model_base_url: None,
            db_path: default_data_dir().join("facefind.db"),
            match_threshold: None,
            local_chunk_size: DEFAULT_LOCAL_CHUNK_SIZE,
            remote_batch_size: DEFAULT_REMOTE_BATCH_SIZE,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            secure_context: false,
        }
    }
}

impl EngineSettings {
    /// Load from `FACEFIND_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            model_dir: std::env::var("FACEFIND_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_dir),
            model_base_url: std::env::var("FACEFIND_MODEL_BASE_URL")
                .ok()
                .filter(|v| !v.is_empty()),
            db_path: std::env::var("FACEFIND_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            match_threshold: std::env::var("FACEFIND_MATCH_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .or(defaults.match_threshold),
            local_chunk_size: env_parse("FACEFIND_LOCAL_CHUNK_SIZE", defaults.local_chunk_size).max(1),
            remote_batch_size: env_parse("FACEFIND_REMOTE_BATCH_SIZE", defaults.remote_batch_size).max(1),
            remote_timeout: Duration::from_millis(env_parse(
                "FACEFIND_REMOTE_TIMEOUT_MS",
                defaults.remote_timeout.as_millis() as u64,
            )),
            secure_context: std::env::var("FACEFIND_SECURE_CONTEXT")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.secure_context),
        }
    }

    pub fn model_assets(&self) -> ModelAssets {
        let assets = ModelAssets::new(&self.model_dir);
        match &self.model_base_url {
            Some(url) => assets.with_base_url(url),
            None => assets,
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facefind")
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store that counts reads and can be switched into a failing state.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        reads: AtomicUsize,
        failing: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl ConfigStore for FlakyStore {
        async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable);
            }
            self.inner.get_setting(key).await
        }
    }

    #[test]
    fn test_parse_canonical_and_legacy_names() {
        let canonical = ProviderConfig::from_setting(json!({
            "provider": "remote", "remoteEndpoint": "https://api", "remoteKey": "k"
        }))
        .unwrap();
        assert_eq!(canonical, ProviderConfig::remote("https://api", Some("k".into())));

        let legacy = ProviderConfig::from_setting(json!({
            "provider": "api", "apiUrl": "https://api", "apiKey": "k"
        }))
        .unwrap();
        assert_eq!(legacy, canonical);

        let browser = ProviderConfig::from_setting(json!({"provider": "browser"})).unwrap();
        assert_eq!(browser, ProviderConfig::local());
    }

    #[test]
    fn test_parse_json_encoded_string() {
        let value = json!("{\"provider\":\"api\",\"apiUrl\":\"https://api\"}");
        let config = ProviderConfig::from_setting(value).unwrap();
        assert_eq!(config.effective_provider(), ProviderKind::Remote);
        assert_eq!(config.remote_key, None);
    }

    #[test]
    fn test_remote_without_endpoint_is_local() {
        let config = ProviderConfig {
            provider: ProviderKind::Remote,
            remote_endpoint: Some("  ".into()),
            remote_key: None,
        };
        assert_eq!(config.effective_provider(), ProviderKind::Local);
    }

    #[tokio::test]
    async fn test_current_defaults_to_local_before_load() {
        let resolver = ConfigResolver::new(Arc::new(MemoryStore::new()));
        assert!(!resolver.is_loaded());
        assert_eq!(resolver.current(), ProviderConfig::local());
    }

    #[tokio::test]
    async fn test_load_is_cached() {
        let store = Arc::new(FlakyStore::default());
        store.inner.set_setting(PROVIDER_CONFIG_KEY, json!({"provider": "api", "apiUrl": "https://x"}));
        let resolver = ConfigResolver::new(store.clone());

        let first = resolver.load().await;
        let second = resolver.load().await;
        assert_eq!(first, second);
        assert_eq!(first.effective_provider(), ProviderKind::Remote);
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_setting_caches_default() {
        let store = Arc::new(FlakyStore::default());
        let resolver = ConfigResolver::new(store.clone());
        assert_eq!(resolver.load().await, ProviderConfig::local());
        assert!(resolver.is_loaded());
        resolver.load().await;
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_default_and_retries() {
        let store = Arc::new(FlakyStore::default());
        store.failing.store(true, Ordering::SeqCst);
        let resolver = ConfigResolver::new(store.clone());

        assert_eq!(resolver.load().await, ProviderConfig::local());
        assert!(!resolver.is_loaded());

        store.failing.store(false, Ordering::SeqCst);
        store.inner.set_setting(PROVIDER_CONFIG_KEY, json!({"provider": "remote", "remoteEndpoint": "https://y"}));
        assert_eq!(resolver.load().await.endpoint(), Some("https://y"));
    }

    #[tokio::test]
    async fn test_reload_failure_keeps_previous() {
        let store = Arc::new(FlakyStore::default());
        store.inner.set_setting(PROVIDER_CONFIG_KEY, json!({"provider": "remote", "remoteEndpoint": "https://y"}));
        let resolver = ConfigResolver::new(store.clone());
        resolver.load().await;

        store.failing.store(true, Ordering::SeqCst);
        let config = resolver.reload().await;
        assert_eq!(config.endpoint(), Some("https://y"));
    }

    #[tokio::test]
    async fn test_malformed_setting_keeps_previous() {
        let store = Arc::new(FlakyStore::default());
        store.inner.set_setting(PROVIDER_CONFIG_KEY, json!({"provider": 42}));
        let resolver = ConfigResolver::new(store);
        assert_eq!(resolver.load().await, ProviderConfig::local());
        assert!(!resolver.is_loaded());
    }

    #[test]
    fn test_settings_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.match_threshold, None);
        assert_eq!(settings.local_chunk_size, 5);
        assert_eq!(settings.remote_batch_size, 50);
        assert_eq!(settings.remote_timeout, Duration::from_secs(30));
        assert!(!settings.secure_context);
        assert!(settings.model_assets().dir().ends_with("facefind/models"));
    }
}
