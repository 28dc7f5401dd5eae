use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "Labscribe";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Minimum cosine similarity for an embedding match to be accepted outright.
pub const DEFAULT_THRESHOLD: f32 = 0.75;
/// Candidates kept per fragment and shown to the arbiter.
pub const DEFAULT_TOP_N: usize = 5;
pub const EMBEDDING_DIM: usize = crate::pipeline::matching::embedder::EMBEDDING_DIM;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_ARBITER_MODEL: &str = "medgemma:4b";
/// Never above `DEFAULT_ARBITER_TIMEOUT`: a request the arbiter stopped
/// waiting for must not keep a blocking thread busy.
pub const DEFAULT_OLLAMA_TIMEOUT_SECS: u64 = 20;

pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
pub const DEFAULT_ARBITER_TIMEOUT: Duration = Duration::from_secs(DEFAULT_OLLAMA_TIMEOUT_SECS);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_CATALOG_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_TRANSCRIPT_CHARS: usize = 20_000;

/// Default tracing filter when RUST_LOG is not set.
pub fn default_log_filter() -> &'static str {
    "labscribe=info"
}

/// Application data directory, ~/Labscribe/ on all platforms.
/// Falls back to the working directory when no home is known.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// SQLite test catalog
pub fn catalog_db_path() -> PathBuf {
    app_data_dir().join("tests.db")
}

/// JSON test catalog with precomputed embeddings
pub fn catalog_json_path() -> PathBuf {
    app_data_dir().join("tests_with_embeddings.json")
}

/// Get the models directory (for ONNX embeddings, etc.)
pub fn models_dir() -> PathBuf {
    app_data_dir().join("models")
}

/// Get the embedding model directory (all-MiniLM-L6-v2)
pub fn embedding_model_dir() -> PathBuf {
    models_dir().join("all-MiniLM-L6-v2")
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid configuration: {0}")]
pub struct ConfigError(pub String);

/// Tunables of the matching engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default similarity threshold, overridable per request.
    pub threshold: f32,
    pub top_n: usize,
    /// Fragments resolved at the same time within one request.
    pub max_concurrency: usize,
    pub arbiter_timeout: Duration,
    /// Upper bound for a whole `match_stream` call.
    pub request_timeout: Duration,
    pub catalog_ttl: Duration,
    pub max_transcript_chars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            top_n: DEFAULT_TOP_N,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            arbiter_timeout: DEFAULT_ARBITER_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            catalog_ttl: DEFAULT_CATALOG_TTL,
            max_transcript_chars: DEFAULT_MAX_TRANSCRIPT_CHARS,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `LABSCRIBE_*` environment variables.
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(v) = parse_var::<f32>(&lookup, "LABSCRIBE_THRESHOLD") {
            if valid_threshold(v) {
                config.threshold = v;
            } else {
                tracing::warn!(value = v, "LABSCRIBE_THRESHOLD out of (0, 1], ignored");
            }
        }
        if let Some(v) = parse_var::<usize>(&lookup, "LABSCRIBE_TOP_N") {
            config.top_n = v.max(1);
        }
        if let Some(v) = parse_var::<usize>(&lookup, "LABSCRIBE_MAX_CONCURRENCY") {
            config.max_concurrency = v.max(1);
        }
        if let Some(v) = parse_var::<u64>(&lookup, "LABSCRIBE_ARBITER_TIMEOUT_SECS") {
            config.arbiter_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<u64>(&lookup, "LABSCRIBE_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<u64>(&lookup, "LABSCRIBE_CATALOG_TTL_SECS") {
            config.catalog_ttl = Duration::from_secs(v);
        }

        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !valid_threshold(self.threshold) {
            return Err(ConfigError(format!(
                "threshold {} must lie in (0, 1]",
                self.threshold
            )));
        }
        if self.top_n == 0 {
            return Err(ConfigError("top_n must be at least 1".into()));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError("max_concurrency must be at least 1".into()));
        }
        if self.max_transcript_chars == 0 {
            return Err(ConfigError("max_transcript_chars must be at least 1".into()));
        }
        Ok(())
    }
}

/// Connection settings for the Ollama reasoning service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OllamaSettings {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            model: DEFAULT_ARBITER_MODEL.to_string(),
            timeout_secs: DEFAULT_OLLAMA_TIMEOUT_SECS,
        }
    }
}

impl OllamaSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();
        if let Some(url) = lookup("LABSCRIBE_OLLAMA_URL").filter(|v| !v.trim().is_empty()) {
            settings.base_url = url.trim().to_string();
        }
        if let Some(model) = lookup("LABSCRIBE_OLLAMA_MODEL").filter(|v| !v.trim().is_empty()) {
            settings.model = model.trim().to_string();
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "LABSCRIBE_OLLAMA_TIMEOUT_SECS") {
            settings.timeout_secs = secs.max(1);
        }
        settings
    }

    /// Clamp the HTTP timeout to the arbiter's wait, whole seconds, at least 1.
    pub fn bounded_by(mut self, limit: Duration) -> Self {
        let limit_secs = limit.as_secs().max(1);
        if self.timeout_secs > limit_secs {
            tracing::debug!(
                requested = self.timeout_secs,
                limit = limit_secs,
                "Ollama timeout clamped to arbiter timeout"
            );
            self.timeout_secs = limit_secs;
        }
        self
    }
}

pub fn valid_threshold(threshold: f32) -> bool {
    threshold > 0.0 && threshold <= 1.0
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn app_data_dir_ends_with_app_name() {
        assert!(app_data_dir().ends_with("Labscribe"));
    }

    #[test]
    fn catalog_paths_under_app_data() {
        let app = app_data_dir();
        assert!(catalog_db_path().starts_with(&app));
        assert!(catalog_json_path().ends_with("tests_with_embeddings.json"));
        assert!(embedding_model_dir().starts_with(models_dir()));
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, "0.1.0");
    }

    #[test]
    fn default_engine_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.threshold, 0.75);
        assert_eq!(config.top_n, 5);
    }

    #[test]
    fn env_overrides_apply() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("LABSCRIBE_THRESHOLD", "0.8"),
            ("LABSCRIBE_TOP_N", "3"),
            ("LABSCRIBE_ARBITER_TIMEOUT_SECS", "5"),
            ("LABSCRIBE_CATALOG_TTL_SECS", "0"),
        ]));
        assert_eq!(config.threshold, 0.8);
        assert_eq!(config.top_n, 3);
        assert_eq!(config.arbiter_timeout, Duration::from_secs(5));
        assert_eq!(config.catalog_ttl, Duration::ZERO);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("LABSCRIBE_THRESHOLD", "1.5"),
            ("LABSCRIBE_MAX_CONCURRENCY", "many"),
        ]));
        assert_eq!(config.threshold, DEFAULT_THRESHOLD);
        assert_eq!(config.max_concurrency, DEFAULT_MAX_CONCURRENCY);
    }

    #[test]
    fn validate_rejects_bad_threshold() {
        for threshold in [0.0, -0.2, 1.01, f32::NAN] {
            let config = EngineConfig {
                threshold,
                ..EngineConfig::default()
            };
            assert!(config.validate().is_err(), "accepted {threshold}");
        }
    }

    #[test]
    fn ollama_settings_from_env() {
        let settings = OllamaSettings::from_lookup(lookup(&[
            ("LABSCRIBE_OLLAMA_URL", "http://gpu-box:11434"),
            ("LABSCRIBE_OLLAMA_MODEL", "  "),
        ]));
        assert_eq!(settings.base_url, "http://gpu-box:11434");
        assert_eq!(settings.model, DEFAULT_ARBITER_MODEL);
    }

    #[test]
    fn default_ollama_timeout_fits_arbiter_timeout() {
        let settings = OllamaSettings::default();
        assert!(Duration::from_secs(settings.timeout_secs) <= DEFAULT_ARBITER_TIMEOUT);
    }

    #[test]
    fn ollama_timeout_is_bounded_by_arbiter_timeout() {
        let settings = OllamaSettings::from_lookup(lookup(&[("LABSCRIBE_OLLAMA_TIMEOUT_SECS", "90")]));
        assert_eq!(settings.timeout_secs, 90);
        assert_eq!(settings.clone().bounded_by(Duration::from_secs(20)).timeout_secs, 20);
        assert_eq!(settings.bounded_by(Duration::from_millis(300)).timeout_secs, 1);

        let short = OllamaSettings {
            timeout_secs: 5,
            ..OllamaSettings::default()
        };
        assert_eq!(short.bounded_by(Duration::from_secs(20)).timeout_secs, 5);
    }
}
