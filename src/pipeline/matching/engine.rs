//! Request-level orchestration of the matching pipeline.
//!
//! Fragments are resolved concurrently, bounded by a semaphore. Outcomes are
//! put back in fragment order before the session state sees them, so removal
//! and upgrade semantics do not depend on scheduling.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use super::aggregator::SessionState;
use super::arbiter::{ArbiterDecision, FallbackArbiter};
use super::chunker::{Chunker, TranscriptChunker};
use super::embedder::EmbeddingEncoder;
use super::filters::{has_order_intent, is_negated, is_symptom_description};
use super::lexicon::TestLexicon;
use super::matcher::{EmbeddingMatcher, MatchReport};
use super::normalize::normalize;
use super::policy::KeywordPolicy;
use super::types::{ChunkOutcome, Fragment, MatchCandidate, MatchMethod, MatchResult, SkipReason};
use super::MatchingError;
use crate::catalog::CatalogProvider;
use crate::config::{valid_threshold, EngineConfig};
use crate::models::MedicalTest;

/// Snapshot of what the engine would match against right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub tests_loaded: usize,
    pub embedded_tests: usize,
    pub encoder_dimension: usize,
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Stream,
    Single,
}

pub struct MatchEngine {
    catalog: Arc<dyn CatalogProvider>,
    chunker: TranscriptChunker,
    policy: Arc<KeywordPolicy>,
    matcher: EmbeddingMatcher,
    arbiter: FallbackArbiter,
    config: EngineConfig,
}

impl MatchEngine {
    pub fn new(
        catalog: Arc<dyn CatalogProvider>,
        encoder: Arc<dyn EmbeddingEncoder>,
        arbiter: FallbackArbiter,
        policy: Arc<KeywordPolicy>,
        config: EngineConfig,
    ) -> Self {
        Self {
            catalog,
            chunker: TranscriptChunker::new(Arc::clone(&policy)),
            matcher: EmbeddingMatcher::new(encoder, config.top_n),
            policy,
            arbiter,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Match a full transcript, chunked into fragments.
    pub async fn match_stream(
        &self,
        transcript: &str,
        threshold: Option<f32>,
    ) -> Result<MatchResult, MatchingError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("match_stream", %request_id);
        self.run(request_id, transcript, threshold, Mode::Stream)
            .instrument(span)
            .await
    }

    /// Match one piece of text as a single fragment, without chunking.
    pub async fn match_fragment(
        &self,
        text: &str,
        threshold: Option<f32>,
    ) -> Result<MatchResult, MatchingError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("match_fragment", %request_id);
        self.run(request_id, text, threshold, Mode::Single)
            .instrument(span)
            .await
    }

    /// `embedded_tests` counts only tests whose vectors this engine's encoder
    /// can compare against.
    pub async fn status(&self) -> Result<EngineStatus, MatchingError> {
        let tests = self.load_catalog().await?;
        Ok(EngineStatus {
            tests_loaded: tests.len(),
            embedded_tests: tests.iter().filter(|t| t.has_embeddings()).count(),
            encoder_dimension: self.matcher.dimension(),
        })
    }

    async fn run(
        &self,
        request_id: Uuid,
        transcript: &str,
        threshold: Option<f32>,
        mode: Mode,
    ) -> Result<MatchResult, MatchingError> {
        let threshold = self.resolve_threshold(threshold)?;
        self.check_transcript(transcript)?;
        let deadline = Instant::now() + self.config.request_timeout;

        let tests = self.load_catalog().await?;
        let lexicon = Arc::new(TestLexicon::from_tests(&tests));

        let fragments = match mode {
            Mode::Stream => self.chunker.chunk(transcript),
            Mode::Single => single_fragment(&self.policy, transcript).into_iter().collect(),
        };

        tracing::info!(
            fragments = fragments.len(),
            tests = tests.len(),
            threshold,
            "Matching transcript"
        );
        tracing::debug!(transcript, "Transcript text");

        let resolver = FragmentResolver {
            policy: Arc::clone(&self.policy),
            lexicon,
            tests,
            matcher: self.matcher.clone(),
            arbiter: self.arbiter.clone(),
            threshold,
            deadline,
        };
        let trace = self.resolve_all(resolver, fragments).await?;

        let mut state = SessionState::new();
        for outcome in &trace {
            for transition in state.apply(outcome) {
                tracing::debug!(index = outcome.index, ?transition, "Session updated");
            }
        }

        let result = MatchResult {
            request_id,
            processed_at: Utc::now(),
            transcript: transcript.to_string(),
            threshold,
            detected_tests: state.detected_tests(),
            removed_tests: state.removed_tests(),
            trace,
        };

        tracing::info!(
            detected = result.detected_tests.len(),
            removed = result.removed_tests.len(),
            skipped = result
                .trace
                .iter()
                .filter(|o| o.method == MatchMethod::Skipped)
                .count(),
            "Transcript matched"
        );

        Ok(result)
    }

    fn resolve_threshold(&self, requested: Option<f32>) -> Result<f32, MatchingError> {
        let threshold = requested.unwrap_or(self.config.threshold);
        if !valid_threshold(threshold) {
            return Err(MatchingError::InvalidThreshold(threshold));
        }
        Ok(threshold)
    }

    fn check_transcript(&self, transcript: &str) -> Result<(), MatchingError> {
        if transcript.trim().is_empty() {
            return Err(MatchingError::EmptyTranscript);
        }
        let len = transcript.chars().count();
        if len > self.config.max_transcript_chars {
            return Err(MatchingError::TranscriptTooLong {
                len,
                max: self.config.max_transcript_chars,
            });
        }
        Ok(())
    }

    async fn load_catalog(&self) -> Result<Arc<[MedicalTest]>, MatchingError> {
        let catalog = Arc::clone(&self.catalog);
        let tests = tokio::task::spawn_blocking(move || catalog.list_tests())
            .await
            .map_err(|e| MatchingError::TaskFailed(format!("catalog load: {e}")))??;

        if tests.is_empty() {
            return Err(MatchingError::EmptyCatalog);
        }
        Ok(self.align_embeddings(tests))
    }

    /// Tests embedded by another encoder, or at another dimension, are served
    /// without vectors: they stay reachable through the lexicon and arbiter.
    fn align_embeddings(&self, tests: Arc<[MedicalTest]>) -> Arc<[MedicalTest]> {
        let foreign = tests
            .iter()
            .filter(|t| t.has_embeddings() && !self.matcher.can_compare(t))
            .count();
        if foreign == 0 {
            return tests;
        }

        tracing::warn!(
            encoder = self.matcher.model_id(),
            foreign,
            "Catalog vectors come from another encoder, those tests are arbiter-only"
        );
        tests
            .iter()
            .map(|t| {
                if t.has_embeddings() && !self.matcher.can_compare(t) {
                    t.clone().without_embeddings()
                } else {
                    t.clone()
                }
            })
            .collect()
    }

    async fn resolve_all(
        &self,
        resolver: FragmentResolver,
        fragments: Vec<Fragment>,
    ) -> Result<Vec<ChunkOutcome>, MatchingError> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let total = fragments.len();

        for fragment in fragments {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| MatchingError::TaskFailed(e.to_string()))?;
            let resolver = resolver.clone();
            let span = tracing::debug_span!("fragment", index = fragment.index);
            tasks.spawn(
                async move {
                    let _permit = permit;
                    resolver.resolve(fragment).await
                }
                .instrument(span),
            );
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            outcomes.push(joined.map_err(|e| MatchingError::TaskFailed(e.to_string()))?);
        }
        outcomes.sort_by_key(|o| o.index);
        Ok(outcomes)
    }
}

fn single_fragment(policy: &KeywordPolicy, text: &str) -> Option<Fragment> {
    let normalized = normalize(text);
    if normalized.is_empty() {
        return None;
    }
    let mut fragment = Fragment::new(0, &normalized);
    fragment.action = policy.action_keyword(&normalized).map(str::to_string);
    Some(fragment)
}

// ═══════════════════════════════════════════════════════════
// FragmentResolver — one fragment to one ChunkOutcome
// ═══════════════════════════════════════════════════════════

/// Everything a fragment task needs, cheap to clone into each task.
#[derive(Clone)]
struct FragmentResolver {
    policy: Arc<KeywordPolicy>,
    lexicon: Arc<TestLexicon>,
    tests: Arc<[MedicalTest]>,
    matcher: EmbeddingMatcher,
    arbiter: FallbackArbiter,
    threshold: f32,
    deadline: Instant,
}

impl FragmentResolver {
    async fn resolve(&self, fragment: Fragment) -> ChunkOutcome {
        if is_negated(&self.policy, &fragment) {
            return self.resolve_removals(&fragment).await;
        }
        if is_symptom_description(&self.policy, &fragment) {
            tracing::debug!("Symptom description, skipped");
            return ChunkOutcome::skipped(&fragment, SkipReason::Symptom);
        }
        if !has_order_intent(&self.policy, &fragment, &self.lexicon) {
            tracing::debug!("No order intent, skipped");
            return ChunkOutcome::skipped(&fragment, SkipReason::NoIntent);
        }

        match self.embed(&fragment).await {
            Ok(report) if report.is_conclusive() => {
                tracing::debug!(accepted = report.accepted.len(), "Embedding match");
                ChunkOutcome::embedding(&fragment, report.accepted)
            }
            Ok(report) => {
                let context = self.arbiter_context(report.candidates, &fragment.text);
                self.arbitrate(&fragment, context, None).await
            }
            Err(detail) => {
                tracing::warn!(error = %detail, "Fragment encoding failed, using lexical context");
                let mut context = self.lexicon.mentions(&fragment.text);
                context.truncate(self.matcher.top_n());
                if context.is_empty() {
                    return ChunkOutcome::skipped(&fragment, SkipReason::EncoderFailure)
                        .with_detail(detail);
                }
                self.arbitrate(&fragment, context, Some(detail)).await
            }
        }
    }

    /// Resolve which tests a negated fragment refers to. Literal mentions
    /// win; otherwise accepted embedding matches are used. Nothing is detected.
    async fn resolve_removals(&self, fragment: &Fragment) -> ChunkOutcome {
        let mut names: Vec<String> = self
            .lexicon
            .mentions(&fragment.text)
            .into_iter()
            .map(|c| c.test_name)
            .collect();

        if names.is_empty() {
            match self.embed(fragment).await {
                Ok(report) => names = report.accepted.into_iter().map(|c| c.test_name).collect(),
                Err(detail) => {
                    tracing::warn!(error = %detail, "Could not resolve negated fragment");
                    return ChunkOutcome::negated(fragment, Vec::new()).with_detail(detail);
                }
            }
        }

        tracing::debug!(removals = names.len(), "Negated fragment");
        ChunkOutcome::negated(fragment, names)
    }

    /// Rank the catalog against the fragment's test wording; action and
    /// negation keywords are left out of the encoded text.
    async fn embed(&self, fragment: &Fragment) -> Result<MatchReport, String> {
        let matcher = self.matcher.clone();
        let tests = Arc::clone(&self.tests);
        let text = self.policy.strip_actions(&fragment.text);
        let threshold = self.threshold;

        match tokio::task::spawn_blocking(move || matcher.match_fragment(&text, &tests, threshold)).await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => Err(format!("encoder: {e}")),
            Err(e) => Err(format!("encoder task failed: {e}")),
        }
    }

    /// Embedding top-N plus literally mentioned tests that vector search
    /// cannot see, at most top-N in total. Literal mentions take the places
    /// of the lowest-ranked embedding candidates.
    fn arbiter_context(&self, candidates: Vec<MatchCandidate>, text: &str) -> Vec<MatchCandidate> {
        let top_n = self.matcher.top_n();
        let literal = self.lexicon.mentions_without_embeddings(text);
        let room = top_n.saturating_sub(literal.len());

        let mut context: Vec<MatchCandidate> = candidates.into_iter().take(room).collect();
        context.extend(literal);
        context.truncate(top_n);
        context
    }

    async fn arbitrate(
        &self,
        fragment: &Fragment,
        context: Vec<MatchCandidate>,
        prior: Option<String>,
    ) -> ChunkOutcome {
        match self
            .arbiter
            .arbitrate(&fragment.text, &context, Some(self.deadline))
            .await
        {
            ArbiterDecision::Selected(pick) => {
                tracing::debug!(test_id = %pick.test_id, "Arbiter selection");
                let outcome = ChunkOutcome::llm(fragment, pick, context);
                match prior {
                    Some(detail) => outcome.with_detail(detail),
                    None => outcome,
                }
            }
            ArbiterDecision::Rejected { detail } => {
                tracing::debug!("Arbiter rejected all candidates");
                let mut outcome =
                    ChunkOutcome::skipped(fragment, SkipReason::LlmRejected).with_candidates(context);
                outcome.detail = match (prior, detail) {
                    (Some(p), Some(d)) => Some(format!("{p}; {d}")),
                    (p, d) => p.or(d),
                };
                outcome
            }
        }
    }
}
