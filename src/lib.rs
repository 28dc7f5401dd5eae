pub mod catalog;
pub mod config;
pub mod db;
pub mod models;
pub mod pipeline;

use std::sync::Arc;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use catalog::{CatalogCache, CatalogProvider, JsonFileCatalog, SqliteCatalog};
use config::{ConfigError, EngineConfig, OllamaSettings};
use pipeline::matching::{
    ArbiterError, EmbeddingEncoder, FallbackArbiter, HashingEncoder, KeywordPolicy, MatchEngine,
    OllamaReasoner,
};

#[derive(Error, Debug)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Reasoning service setup failed: {0}")]
    Arbiter(#[from] ArbiterError),
}

/// Install the global fmt subscriber. RUST_LOG wins over the default filter.
/// Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();
}

/// Engine wired from the environment and the default data directory.
///
/// Catalog: the SQLite database when present, the JSON export otherwise,
/// behind a freshness cache. Encoder: the ONNX model when built with
/// `onnx-embeddings` and installed, the hashing encoder otherwise. Catalog
/// vectors from a different encoder are ignored, leaving those tests to the
/// arbiter. The Ollama timeout is clamped to the arbiter timeout.
pub fn build_engine() -> Result<MatchEngine, SetupError> {
    let config = EngineConfig::from_env();
    config.validate()?;

    let source: Arc<dyn CatalogProvider> = if config::catalog_db_path().exists() {
        Arc::new(SqliteCatalog::new(config::catalog_db_path()))
    } else {
        Arc::new(JsonFileCatalog::new(config::catalog_json_path()))
    };
    let catalog = Arc::new(CatalogCache::new(source, config.catalog_ttl));

    let settings = OllamaSettings::from_env().bounded_by(config.arbiter_timeout);
    let reasoner = Arc::new(OllamaReasoner::from_settings(&settings)?);
    let arbiter = FallbackArbiter::new(reasoner, config.arbiter_timeout);

    let encoder = default_encoder();
    tracing::info!(
        version = config::APP_VERSION,
        model = %settings.model,
        encoder = encoder.model_id(),
        threshold = config.threshold,
        "Labscribe engine configured"
    );

    Ok(MatchEngine::new(
        catalog,
        encoder,
        arbiter,
        Arc::new(KeywordPolicy::default()),
        config,
    ))
}

#[cfg(feature = "onnx-embeddings")]
fn default_encoder() -> Arc<dyn EmbeddingEncoder> {
    match pipeline::matching::OnnxEncoder::load(&config::embedding_model_dir()) {
        Ok(encoder) => Arc::new(encoder),
        Err(e) => {
            tracing::warn!(error = %e, "ONNX encoder unavailable, using hashing encoder");
            Arc::new(HashingEncoder::new())
        }
    }
}

#[cfg(not(feature = "onnx-embeddings"))]
fn default_encoder() -> Arc<dyn EmbeddingEncoder> {
    Arc::new(HashingEncoder::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }

    #[test]
    fn default_encoder_matches_embedding_dim() {
        assert_eq!(default_encoder().dimension(), config::EMBEDDING_DIM);
    }

    #[cfg(not(feature = "onnx-embeddings"))]
    #[test]
    fn default_encoder_does_not_claim_minilm_vectors() {
        assert_ne!(default_encoder().model_id(), pipeline::matching::MINILM_MODEL_ID);
    }

    #[test]
    fn build_engine_uses_default_config() {
        let engine = build_engine().unwrap();
        assert!(engine.config().validate().is_ok());
    }
}
