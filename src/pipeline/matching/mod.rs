//! Transcript-to-test matching.
//!
//! Chunker -> negation/symptom/intent filters -> embedding matcher ->
//! fallback arbiter -> session aggregator. [`engine::MatchEngine`] wires the
//! stages together; every stage is usable on its own.

pub mod aggregator;
pub mod arbiter;
pub mod chunker;
pub mod embedder;
pub mod engine;
pub mod filters;
pub mod lexicon;
pub mod matcher;
pub mod normalize;
pub mod ollama;
pub mod policy;
pub mod prompt;
pub mod types;

pub use aggregator::{SessionState, Transition};
pub use arbiter::{
    ArbiterDecision, ArbiterError, FallbackArbiter, ReasoningService, ScriptedReasoner,
    ScriptedReply,
};
pub use chunker::{Chunker, TranscriptChunker};
pub use embedder::{embed_catalog, EmbeddingEncoder, EncoderError, HashingEncoder, MINILM_MODEL_ID};
pub use engine::{EngineStatus, MatchEngine};
pub use lexicon::TestLexicon;
pub use matcher::{EmbeddingMatcher, MatchReport};
pub use ollama::OllamaReasoner;
pub use policy::{KeywordPolicy, KeywordSet};
pub use types::{
    ChunkOutcome, DetectedTest, Fragment, MatchCandidate, MatchMethod, MatchResult, SkipReason,
};

#[cfg(feature = "onnx-embeddings")]
pub use embedder::OnnxEncoder;

use thiserror::Error;

use crate::catalog::CatalogError;

/// Failures that abort a whole match call. Stage-local failures (encoder,
/// arbiter) are absorbed into the trace instead.
#[derive(Error, Debug)]
pub enum MatchingError {
    #[error("Threshold {0} must lie in (0, 1]")]
    InvalidThreshold(f32),

    #[error("Transcript is empty")]
    EmptyTranscript,

    #[error("Transcript has {len} characters, limit is {max}")]
    TranscriptTooLong { len: usize, max: usize },

    #[error("Test catalog unavailable: {0}")]
    CatalogUnavailable(#[from] CatalogError),

    #[error("Test catalog is empty")]
    EmptyCatalog,

    #[error("Fragment task failed: {0}")]
    TaskFailed(String),
}
