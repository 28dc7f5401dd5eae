//! Fallback arbiter: asks an external reasoning service to pick among the
//! top candidates when no similarity score clears the threshold.
//!
//! Fails closed. Errors, timeouts, malformed replies and selections outside
//! the candidate list all resolve to a rejection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use super::types::MatchCandidate;

#[derive(Error, Debug)]
pub enum ArbiterError {
    #[error("Reasoning service is not reachable at {0}")]
    Connection(String),

    #[error("HTTP client error: {0}")]
    Http(String),

    #[error("Reasoning service returned error (status {status}): {body}")]
    Status { status: u16, body: String },

    #[error("Malformed arbiter reply: {0}")]
    MalformedResponse(String),

    #[error("Arbiter timed out after {0:?}")]
    Timeout(Duration),
}

/// Candidate as presented to the reasoning service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateContext {
    pub test_id: String,
    pub name: String,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbiterRequest {
    pub fragment: String,
    pub candidates: Vec<CandidateContext>,
}

/// Raw answer of a reasoning service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArbiterVerdict {
    /// A candidate id (or name) chosen by the service.
    Selected(String),
    NoneOfThese,
}

/// External decision maker used for inconclusive fragments.
///
/// Calls are blocking; the arbiter runs them on the blocking pool.
pub trait ReasoningService: Send + Sync {
    fn select(&self, request: &ArbiterRequest) -> Result<ArbiterVerdict, ArbiterError>;
}

/// What the pipeline does with an arbitrated fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum ArbiterDecision {
    Selected(MatchCandidate),
    Rejected { detail: Option<String> },
}

#[derive(Clone)]
pub struct FallbackArbiter {
    service: Arc<dyn ReasoningService>,
    timeout: Duration,
}

impl FallbackArbiter {
    pub fn new(service: Arc<dyn ReasoningService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Ask the service to choose among `candidates`.
    ///
    /// Waits at most until the earlier of the per-call timeout and `deadline`.
    pub async fn arbitrate(
        &self,
        fragment: &str,
        candidates: &[MatchCandidate],
        deadline: Option<Instant>,
    ) -> ArbiterDecision {
        if candidates.is_empty() {
            return ArbiterDecision::Rejected {
                detail: Some("no candidates to arbitrate".into()),
            };
        }

        let request = ArbiterRequest {
            fragment: fragment.to_string(),
            candidates: candidates
                .iter()
                .map(|c| CandidateContext {
                    test_id: c.test_id.clone(),
                    name: c.test_name.clone(),
                    category: c.category.clone(),
                })
                .collect(),
        };

        let started = Instant::now();
        let call_deadline = {
            let own = started + self.timeout;
            deadline.map_or(own, |d| d.min(own))
        };

        let service = Arc::clone(&self.service);
        let call = tokio::task::spawn_blocking(move || service.select(&request));

        let verdict = match tokio::time::timeout_at(call_deadline, call).await {
            Ok(Ok(Ok(verdict))) => verdict,
            Ok(Ok(Err(e))) => {
                tracing::warn!(error = %e, "Arbiter call failed, rejecting fragment");
                return rejected(e.to_string());
            }
            Ok(Err(join_error)) => {
                tracing::warn!(error = %join_error, "Arbiter task aborted, rejecting fragment");
                return rejected(format!("arbiter task failed: {join_error}"));
            }
            Err(_) => {
                let e = ArbiterError::Timeout(call_deadline.saturating_duration_since(started));
                tracing::warn!(error = %e, "Arbiter deadline reached, rejecting fragment");
                return rejected(e.to_string());
            }
        };

        match verdict {
            ArbiterVerdict::NoneOfThese => ArbiterDecision::Rejected { detail: None },
            ArbiterVerdict::Selected(selection) => match find_candidate(candidates, &selection) {
                Some(candidate) => ArbiterDecision::Selected(candidate.clone()),
                None => {
                    tracing::warn!(
                        selection = %selection,
                        "Arbiter selected a test outside the candidate list"
                    );
                    rejected(format!("selection '{selection}' is not a candidate"))
                }
            },
        }
    }
}

fn rejected(detail: String) -> ArbiterDecision {
    ArbiterDecision::Rejected {
        detail: Some(detail),
    }
}

fn find_candidate<'a>(candidates: &'a [MatchCandidate], selection: &str) -> Option<&'a MatchCandidate> {
    candidates
        .iter()
        .find(|c| c.test_id == selection)
        .or_else(|| {
            candidates
                .iter()
                .find(|c| c.test_name.eq_ignore_ascii_case(selection) || c.test_id.eq_ignore_ascii_case(selection))
        })
}

// ═══════════════════════════════════════════════════════════
// ScriptedReasoner — deterministic stand-in for tests and demos
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Always pick this id or name.
    Select(String),
    /// Pick the first candidate offered.
    FirstCandidate,
    NoneOfThese,
    Fail(String),
    Malformed,
}

/// Reasoning service returning a fixed reply, optionally after a delay.
pub struct ScriptedReasoner {
    reply: ScriptedReply,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedReasoner {
    pub fn new(reply: ScriptedReply) -> Self {
        Self {
            reply,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ReasoningService for ScriptedReasoner {
    fn select(&self, request: &ArbiterRequest) -> Result<ArbiterVerdict, ArbiterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        match &self.reply {
            ScriptedReply::Select(id) => Ok(ArbiterVerdict::Selected(id.clone())),
            ScriptedReply::FirstCandidate => Ok(request
                .candidates
                .first()
                .map(|c| ArbiterVerdict::Selected(c.test_id.clone()))
                .unwrap_or(ArbiterVerdict::NoneOfThese)),
            ScriptedReply::NoneOfThese => Ok(ArbiterVerdict::NoneOfThese),
            ScriptedReply::Fail(message) => Err(ArbiterError::Http(message.clone())),
            ScriptedReply::Malformed => Err(ArbiterError::MalformedResponse("scripted".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<MatchCandidate> {
        ["rbs", "fbs", "hba1c"]
            .iter()
            .enumerate()
            .map(|(i, id)| MatchCandidate {
                test_id: id.to_string(),
                test_name: id.to_uppercase(),
                category: "Biochemistry".into(),
                score: 0.6 - i as f32 * 0.1,
                matched_synonym: id.to_string(),
            })
            .collect()
    }

    fn arbiter(reply: ScriptedReply) -> (FallbackArbiter, Arc<ScriptedReasoner>) {
        let service = Arc::new(ScriptedReasoner::new(reply));
        let arbiter = FallbackArbiter::new(service.clone(), Duration::from_secs(2));
        (arbiter, service)
    }

    #[tokio::test]
    async fn selection_by_id_is_accepted() {
        let (arbiter, _) = arbiter(ScriptedReply::Select("fbs".into()));
        let decision = arbiter.arbitrate("check fasting sugar", &candidates(), None).await;
        match decision {
            ArbiterDecision::Selected(c) => assert_eq!(c.test_id, "fbs"),
            other => panic!("expected selection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn selection_by_name_is_case_insensitive() {
        let (arbiter, _) = arbiter(ScriptedReply::Select("Hba1C".into()));
        let decision = arbiter.arbitrate("check a1c", &candidates(), None).await;
        assert!(matches!(decision, ArbiterDecision::Selected(c) if c.test_id == "hba1c"));
    }

    #[tokio::test]
    async fn selection_outside_candidates_fails_closed() {
        let (arbiter, _) = arbiter(ScriptedReply::Select("lipid-profile".into()));
        let decision = arbiter.arbitrate("check lipids", &candidates(), None).await;
        assert!(matches!(decision, ArbiterDecision::Rejected { detail: Some(_) }));
    }

    #[tokio::test]
    async fn none_of_these_is_a_plain_rejection() {
        let (arbiter, _) = arbiter(ScriptedReply::NoneOfThese);
        let decision = arbiter.arbitrate("check something", &candidates(), None).await;
        assert_eq!(decision, ArbiterDecision::Rejected { detail: None });
    }

    #[tokio::test]
    async fn service_error_fails_closed() {
        let (arbiter, _) = arbiter(ScriptedReply::Fail("connection reset".into()));
        let decision = arbiter.arbitrate("check sugar", &candidates(), None).await;
        match decision {
            ArbiterDecision::Rejected { detail: Some(d) } => assert!(d.contains("connection reset")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_reply_fails_closed() {
        let (arbiter, _) = arbiter(ScriptedReply::Malformed);
        let decision = arbiter.arbitrate("check sugar", &candidates(), None).await;
        assert!(matches!(decision, ArbiterDecision::Rejected { .. }));
    }

    #[tokio::test]
    async fn slow_service_times_out() {
        let service = Arc::new(
            ScriptedReasoner::new(ScriptedReply::FirstCandidate).with_delay(Duration::from_millis(500)),
        );
        let arbiter = FallbackArbiter::new(service, Duration::from_millis(50));
        let decision = arbiter.arbitrate("check sugar", &candidates(), None).await;
        match decision {
            ArbiterDecision::Rejected { detail: Some(d) } => assert!(d.contains("timed out")),
            other => panic!("expected timeout rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn request_deadline_shortens_call() {
        let service = Arc::new(
            ScriptedReasoner::new(ScriptedReply::FirstCandidate).with_delay(Duration::from_millis(500)),
        );
        let arbiter = FallbackArbiter::new(service, Duration::from_secs(30));
        let deadline = Instant::now() + Duration::from_millis(50);
        let started = std::time::Instant::now();
        let decision = arbiter.arbitrate("check sugar", &candidates(), Some(deadline)).await;
        assert!(started.elapsed() < Duration::from_millis(450));
        match decision {
            ArbiterDecision::Rejected { detail: Some(d) } => {
                assert!(d.contains("timed out"), "{d}");
                assert!(d.contains("ms"), "reports the wait actually allowed: {d}");
                assert!(!d.contains("30s"), "{d}");
            }
            other => panic!("expected timeout rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_candidate_list_skips_the_service() {
        let (arbiter, service) = arbiter(ScriptedReply::FirstCandidate);
        let decision = arbiter.arbitrate("do that", &[], None).await;
        assert!(matches!(decision, ArbiterDecision::Rejected { .. }));
        assert_eq!(service.calls(), 0);
    }
}
