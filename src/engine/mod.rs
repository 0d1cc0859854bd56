//! Deliberation engine.
//!
//! Orchestrates rounds: fans prompts out to participants in parallel,
//! collects responses in input order, threads prior rounds into follow-up
//! prompts, stops early on convergence or impasse, aggregates votes, and
//! persists the outcome into the decision graph (best-effort).

pub mod convergence;
pub mod prompts;
pub mod tracker;
pub mod types;
pub mod voting;

pub use convergence::{ConvergenceCheck, ConvergenceDetector};
pub use tracker::SessionTokenTracker;
pub use types::*;

use crate::adapters::{AdapterError, ModelAdapter};
use crate::config::Config;
use crate::graph::DecisionGraph;
use crate::similarity::SimilarityBackend;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A participant is dropped from later rounds after this many consecutive
/// fully-failed rounds.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

pub struct DeliberationEngine {
    config: Config,
    adapters: BTreeMap<String, Arc<dyn ModelAdapter>>,
    backend: Arc<dyn SimilarityBackend>,
    graph: Option<Arc<DecisionGraph>>,
}

impl DeliberationEngine {
    pub fn new(
        config: Config,
        adapters: BTreeMap<String, Arc<dyn ModelAdapter>>,
        backend: Arc<dyn SimilarityBackend>,
        graph: Option<Arc<DecisionGraph>>,
    ) -> Self {
        Self {
            config,
            adapters,
            backend,
            graph,
        }
    }

    /// Run one deliberation to completion (or cancellation).
    pub async fn deliberate(
        &self,
        request: DeliberationRequest,
        cancel: CancellationToken,
    ) -> Result<DeliberationResult, EngineError> {
        let question = request.question.trim().to_string();
        if question.is_empty() {
            return Err(EngineError::InvalidRequest(
                "question must not be empty".to_string(),
            ));
        }

        // Resolve adapters up front; a missing adapter is a config fault
        let mut active: Vec<(Participant, Arc<dyn ModelAdapter>)> = Vec::new();
        for participant in &request.participants {
            let adapter = self
                .adapters
                .get(&participant.cli)
                .ok_or_else(|| EngineError::UnknownAdapter(participant.cli.clone()))?;
            active.push((participant.clone(), Arc::clone(adapter)));
        }
        if active.len() < 2 {
            return Err(EngineError::NotEnoughParticipants(active.len()));
        }

        let total_rounds = match request.mode {
            Mode::Quick => 1,
            Mode::Conference => request.rounds.clamp(1, self.config.defaults.max_rounds),
        };

        // Graph context is best-effort and only feeds round 1
        let graph_context = match &self.graph {
            Some(graph) => {
                let ctx = graph.get_context_for_deliberation(&question).await;
                (!ctx.is_empty()).then_some(ctx)
            }
            None => None,
        };
        let round_one_context = merge_context(request.context.as_deref(), graph_context.as_deref());

        let mut detector = ConvergenceDetector::new(
            Arc::clone(&self.backend),
            self.config.deliberation.convergence_detection.clone(),
        );
        let mut token_tracker = SessionTokenTracker::new();
        let mut rounds: Vec<Vec<RoundResponse>> = Vec::new();
        let mut failures: HashMap<String, u32> = HashMap::new();
        let mut scores_by_round: Vec<RoundScores> = Vec::new();
        let mut last_check: Option<ConvergenceCheck> = None;
        let mut break_status: Option<ConvergenceStatus> = None;
        let mut status = DeliberationStatus::Complete;

        for round_num in 1..=total_rounds {
            let responses = self
                .run_round(
                    &question,
                    &active,
                    &rounds,
                    round_num,
                    round_one_context.as_deref(),
                    &cancel,
                    &mut token_tracker,
                    &mut failures,
                )
                .await;
            let round_cancelled = cancel.is_cancelled();
            rounds.push(responses);

            if round_cancelled {
                tracing::info!("Deliberation cancelled at round {round_num}");
                status = DeliberationStatus::Partial;
                break;
            }

            // Drop participants that failed too many rounds in a row
            active.retain(|(p, _)| {
                let identity = p.identity();
                let dropped =
                    failures.get(&identity).copied().unwrap_or(0) >= MAX_CONSECUTIVE_FAILURES;
                if dropped {
                    tracing::warn!(
                        "Dropping participant {identity} after {MAX_CONSECUTIVE_FAILURES} failed rounds"
                    );
                }
                !dropped
            });
            if active.len() < 2 {
                tracing::warn!("Fewer than 2 live participants remain; ending deliberation");
                status = DeliberationStatus::Partial;
                break;
            }

            if round_num >= 2 {
                let (current, previous) = (&rounds[rounds.len() - 1], &rounds[rounds.len() - 2]);
                if let Some(check) = detector.check(current, previous, round_num) {
                    scores_by_round.push(RoundScores {
                        round: round_num,
                        min_similarity: check.min_similarity,
                        avg_similarity: check.avg_similarity,
                        status: check.status,
                    });
                    let check_status = check.status;
                    last_check = Some(check);
                    if matches!(
                        check_status,
                        ConvergenceStatus::Converged | ConvergenceStatus::Impasse
                    ) {
                        break_status = Some(check_status);
                        break;
                    }
                }
            }
        }

        let rounds_completed = rounds.len() as u32;
        let final_round = rounds.last().cloned().unwrap_or_default();
        let full_debate: Vec<RoundResponse> = rounds.into_iter().flatten().collect();

        let convergence_info =
            build_convergence_info(break_status, last_check, scores_by_round, rounds_completed, total_rounds);

        let voting_result = voting::aggregate_votes(&final_round);
        let summary = voting::build_summary(&final_round, voting_result.as_ref());
        let token_stats = (!token_tracker.is_empty()).then(|| token_tracker.stats());

        let mut result = DeliberationResult {
            status,
            mode: request.mode,
            rounds_completed,
            participants: request.participants.iter().map(|p| p.identity()).collect(),
            summary,
            transcript_path: None,
            full_debate,
            voting_result,
            convergence_info,
            graph_context_summary: graph_context,
            token_stats,
        };

        // Storage is best-effort: a graph failure never fails the caller
        if let Some(graph) = &self.graph {
            match graph.store_deliberation(&question, &result).await {
                Ok(decision_id) => {
                    tracing::info!("Deliberation stored as decision {decision_id}");
                }
                Err(e) => {
                    tracing::warn!("Failed to store deliberation in graph: {e}");
                    result.graph_context_summary = None;
                }
            }
        }

        Ok(result)
    }

    /// Fan one round out to every active participant and gather responses
    /// in input order, replacing failures with error sentinels.
    #[allow(clippy::too_many_arguments)]
    async fn run_round(
        &self,
        question: &str,
        active: &[(Participant, Arc<dyn ModelAdapter>)],
        prior_rounds: &[Vec<RoundResponse>],
        round_num: u32,
        round_one_context: Option<&str>,
        cancel: &CancellationToken,
        token_tracker: &mut SessionTokenTracker,
        failures: &mut HashMap<String, u32>,
    ) -> Vec<RoundResponse> {
        let timeout_per_round = self.config.defaults.timeout_per_round;

        let mut handles = Vec::with_capacity(active.len());
        for (participant, adapter) in active {
            let prompt = if round_num == 1 {
                prompts::round_one(question, participant.stance)
            } else {
                prompts::followup(question, prior_rounds, round_num)
            };
            let context = if round_num == 1 {
                round_one_context.map(str::to_string)
            } else {
                None
            };
            let adapter = Arc::clone(adapter);
            let model = participant.model.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                let invoke = async {
                    let fut =
                        adapter.invoke_with_metadata(&prompt, &model, context.as_deref(), true);
                    match timeout_per_round {
                        Some(seconds) => {
                            match tokio::time::timeout(Duration::from_secs(seconds), fut).await {
                                Ok(result) => result,
                                Err(_) => Err(AdapterError::Timeout { seconds }),
                            }
                        }
                        None => fut.await,
                    }
                };
                tokio::select! {
                    _ = cancel.cancelled() => Err(AdapterError::Cancelled),
                    result = invoke => result,
                }
            }));
        }

        // Deterministic ordering: collect by input index, not completion
        let mut responses = Vec::with_capacity(active.len());
        for ((participant, _), handle) in active.iter().zip(handles) {
            let identity = participant.identity();
            let outcome = handle.await.unwrap_or_else(|e| {
                Err(AdapterError::Invocation(format!("task join error: {e}")))
            });

            match outcome {
                Ok((text, usage)) => {
                    token_tracker.record(&identity, round_num, usage.clone());
                    failures.insert(identity.clone(), 0);
                    let vote = voting::parse_vote(&text);
                    responses.push(RoundResponse {
                        round: round_num,
                        participant: identity,
                        stance: participant.stance,
                        response: text,
                        timestamp: Utc::now(),
                        vote,
                        token_usage: Some(usage),
                    });
                }
                Err(e) => {
                    if !matches!(e, AdapterError::Cancelled) {
                        tracing::warn!("Participant {identity} failed round {round_num}: {e}");
                        *failures.entry(identity.clone()).or_insert(0) += 1;
                    }
                    responses.push(RoundResponse {
                        round: round_num,
                        participant: identity,
                        stance: participant.stance,
                        response: format!("[ERROR: {e}]"),
                        timestamp: Utc::now(),
                        vote: None,
                        token_usage: None,
                    });
                }
            }
        }

        responses
    }
}

fn merge_context(user: Option<&str>, graph: Option<&str>) -> Option<String> {
    match (user, graph) {
        (Some(u), Some(g)) => Some(format!("{u}\n\n{g}")),
        (Some(u), None) => Some(u.to_string()),
        (None, Some(g)) => Some(g.to_string()),
        (None, None) => None,
    }
}

fn build_convergence_info(
    break_status: Option<ConvergenceStatus>,
    last_check: Option<ConvergenceCheck>,
    scores_by_round: Vec<RoundScores>,
    rounds_completed: u32,
    total_rounds: u32,
) -> Option<ConvergenceInfo> {
    let check = last_check?;
    let detected = matches!(break_status, Some(ConvergenceStatus::Converged));
    let status = match break_status {
        Some(status) => status,
        None if rounds_completed >= total_rounds => ConvergenceStatus::MaxRounds,
        None => check.status,
    };
    Some(ConvergenceInfo {
        detected,
        detection_round: detected.then_some(rounds_completed),
        final_similarity: check.min_similarity,
        status,
        per_participant_similarity: check.per_participant,
        scores_by_round,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{Result as AdapterResult, TokenUsage};
    use crate::config::{Config, ConvergenceConfig};
    use crate::similarity::JaccardBackend;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Test adapter replaying a fixed script of responses per model; the
    /// last entry repeats once the script is exhausted.
    struct ScriptedAdapter {
        name: String,
        scripts: Mutex<HashMap<String, (usize, Vec<String>)>>,
    }

    impl ScriptedAdapter {
        fn new(name: &str, scripts: &[(&str, &[&str])]) -> Self {
            let scripts = scripts
                .iter()
                .map(|(model, lines)| {
                    (
                        model.to_string(),
                        (0usize, lines.iter().map(|s| s.to_string()).collect()),
                    )
                })
                .collect();
            Self {
                name: name.to_string(),
                scripts: Mutex::new(scripts),
            }
        }
    }

    #[async_trait]
    impl ModelAdapter for ScriptedAdapter {
        fn name(&self) -> &str {
            &self.name
        }
        fn adapter_type(&self) -> &'static str {
            "cli"
        }
        async fn invoke(
            &self,
            _prompt: &str,
            model: &str,
            _context: Option<&str>,
            _is_deliberation: bool,
        ) -> AdapterResult<String> {
            let mut scripts = self.scripts.lock().expect("scripts lock");
            let (cursor, lines) = scripts
                .get_mut(model)
                .ok_or_else(|| AdapterError::Invocation(format!("no script for {model}")))?;
            let line = lines
                .get(*cursor)
                .or_else(|| lines.last())
                .cloned()
                .unwrap_or_default();
            *cursor += 1;
            Ok(line)
        }
    }

    /// Adapter that fails every invocation.
    struct FailingAdapter;

    #[async_trait]
    impl ModelAdapter for FailingAdapter {
        fn name(&self) -> &str {
            "failing"
        }
        fn adapter_type(&self) -> &'static str {
            "cli"
        }
        async fn invoke(
            &self,
            _prompt: &str,
            _model: &str,
            _context: Option<&str>,
            _is_deliberation: bool,
        ) -> AdapterResult<String> {
            Err(AdapterError::Invocation("simulated outage".to_string()))
        }
    }

    /// HTTP-flavoured adapter returning exact usage metadata.
    struct ExactUsageAdapter;

    #[async_trait]
    impl ModelAdapter for ExactUsageAdapter {
        fn name(&self) -> &str {
            "api"
        }
        fn adapter_type(&self) -> &'static str {
            "http"
        }
        async fn invoke(
            &self,
            _prompt: &str,
            _model: &str,
            _context: Option<&str>,
            _is_deliberation: bool,
        ) -> AdapterResult<String> {
            Ok("measured answer\nVOTE: yes\nCONFIDENCE: 0.9\nRATIONALE: sure".to_string())
        }
        async fn invoke_with_metadata(
            &self,
            prompt: &str,
            model: &str,
            context: Option<&str>,
            is_deliberation: bool,
        ) -> AdapterResult<(String, TokenUsage)> {
            let text = self.invoke(prompt, model, context, is_deliberation).await?;
            Ok((text, TokenUsage::exact(40, 12, 0, "http", model)))
        }
    }

    fn convergence_config() -> ConvergenceConfig {
        ConvergenceConfig {
            enabled: true,
            semantic_similarity_threshold: 0.85,
            divergence_threshold: 0.40,
            min_rounds_before_check: 1,
            consecutive_stable_rounds: 2,
        }
    }

    fn engine_config() -> Config {
        let mut config = Config::default();
        config.deliberation.convergence_detection = convergence_config();
        config
    }

    fn engine_with(adapters: BTreeMap<String, Arc<dyn ModelAdapter>>) -> DeliberationEngine {
        DeliberationEngine::new(
            engine_config(),
            adapters,
            Arc::new(JaccardBackend::new()),
            None,
        )
    }

    fn participants(pairs: &[(&str, &str)]) -> Vec<Participant> {
        pairs
            .iter()
            .map(|(cli, model)| Participant {
                cli: cli.to_string(),
                model: model.to_string(),
                stance: Stance::Neutral,
            })
            .collect()
    }

    fn request(mode: Mode, rounds: u32, parts: Vec<Participant>) -> DeliberationRequest {
        DeliberationRequest {
            question: "Should we use TypeScript?".to_string(),
            participants: parts,
            rounds,
            mode,
            context: None,
        }
    }

    #[tokio::test]
    async fn test_quick_mode_forces_single_round() {
        let mut adapters: BTreeMap<String, Arc<dyn ModelAdapter>> = BTreeMap::new();
        adapters.insert(
            "claude".to_string(),
            Arc::new(ScriptedAdapter::new(
                "claude",
                &[("sonnet", &["answer one"])],
            )),
        );
        adapters.insert(
            "codex".to_string(),
            Arc::new(ScriptedAdapter::new("codex", &[("gpt-4", &["answer two"])])),
        );
        let engine = engine_with(adapters);

        let result = engine
            .deliberate(
                request(
                    Mode::Quick,
                    5,
                    participants(&[("claude", "sonnet"), ("codex", "gpt-4")]),
                ),
                CancellationToken::new(),
            )
            .await
            .expect("deliberate");

        assert_eq!(result.status, DeliberationStatus::Complete);
        assert_eq!(result.rounds_completed, 1);
        assert_eq!(result.full_debate.len(), 2);
        assert!(result.convergence_info.is_none());
        assert!(result.full_debate.iter().all(|r| r.round == 1));
    }

    #[tokio::test]
    async fn test_early_convergence_stops_before_round_bound() {
        // Both participants repeat overlapping positions every round:
        // first stable check at round 2, confirmed at round 3
        let mut adapters: BTreeMap<String, Arc<dyn ModelAdapter>> = BTreeMap::new();
        adapters.insert(
            "claude".to_string(),
            Arc::new(ScriptedAdapter::new(
                "claude",
                &[("sonnet", &["adopt typescript for the frontend team"])],
            )),
        );
        adapters.insert(
            "codex".to_string(),
            Arc::new(ScriptedAdapter::new(
                "codex",
                &[("gpt-4", &["adopt typescript for the backend team"])],
            )),
        );
        let engine = engine_with(adapters);

        let result = engine
            .deliberate(
                request(
                    Mode::Conference,
                    5,
                    participants(&[("claude", "sonnet"), ("codex", "gpt-4")]),
                ),
                CancellationToken::new(),
            )
            .await
            .expect("deliberate");

        assert_eq!(result.status, DeliberationStatus::Complete);
        assert_eq!(result.rounds_completed, 3);
        assert!(result.rounds_completed < 5);
        let info = result.convergence_info.expect("convergence info");
        assert!(info.detected);
        assert_eq!(info.status, ConvergenceStatus::Converged);
        assert_eq!(info.detection_round, Some(result.rounds_completed));
        for score in info.per_participant_similarity.values() {
            assert!(*score >= 0.85);
        }
    }

    #[tokio::test]
    async fn test_frozen_disagreement_stops_as_impasse() {
        // Fixed pro/con positions with no shared vocabulary
        let mut adapters: BTreeMap<String, Arc<dyn ModelAdapter>> = BTreeMap::new();
        adapters.insert(
            "claude".to_string(),
            Arc::new(ScriptedAdapter::new(
                "claude",
                &[("sonnet", &["strict compilation prevents regressions"])],
            )),
        );
        adapters.insert(
            "codex".to_string(),
            Arc::new(ScriptedAdapter::new(
                "codex",
                &[("gpt-4", &["migration churn stalls every deadline"])],
            )),
        );
        let engine = engine_with(adapters);

        let result = engine
            .deliberate(
                request(
                    Mode::Conference,
                    5,
                    participants(&[("claude", "sonnet"), ("codex", "gpt-4")]),
                ),
                CancellationToken::new(),
            )
            .await
            .expect("deliberate");

        assert_eq!(result.status, DeliberationStatus::Complete);
        assert!(result.rounds_completed < 5);
        let info = result.convergence_info.expect("convergence info");
        assert_eq!(info.status, ConvergenceStatus::Impasse);
        assert!(!info.detected);
    }

    #[tokio::test]
    async fn test_adapter_failure_is_isolated() {
        let mut adapters: BTreeMap<String, Arc<dyn ModelAdapter>> = BTreeMap::new();
        adapters.insert(
            "claude".to_string(),
            Arc::new(ScriptedAdapter::new(
                "claude",
                &[("sonnet", &["position alpha beta gamma"])],
            )),
        );
        adapters.insert(
            "codex".to_string(),
            Arc::new(ScriptedAdapter::new(
                "codex",
                &[("gpt-4", &["position alpha beta delta"])],
            )),
        );
        adapters.insert("broken".to_string(), Arc::new(FailingAdapter));
        let engine = engine_with(adapters);

        let result = engine
            .deliberate(
                request(
                    Mode::Conference,
                    2,
                    participants(&[
                        ("claude", "sonnet"),
                        ("codex", "gpt-4"),
                        ("broken", "whatever"),
                    ]),
                ),
                CancellationToken::new(),
            )
            .await
            .expect("deliberate");

        assert_eq!(result.status, DeliberationStatus::Complete);
        assert_eq!(result.rounds_completed, 2);
        let broken: Vec<_> = result
            .full_debate
            .iter()
            .filter(|r| r.participant == "whatever@broken")
            .collect();
        assert_eq!(broken.len(), 2);
        assert!(broken.iter().all(|r| r.is_error() && r.vote.is_none()));
        let healthy: Vec<_> = result
            .full_debate
            .iter()
            .filter(|r| r.participant == "sonnet@claude")
            .collect();
        assert!(healthy.iter().all(|r| !r.is_error()));
    }

    #[tokio::test]
    async fn test_responses_keep_input_order() {
        let mut adapters: BTreeMap<String, Arc<dyn ModelAdapter>> = BTreeMap::new();
        adapters.insert(
            "one".to_string(),
            Arc::new(ScriptedAdapter::new("one", &[("m1", &["first answer"])])),
        );
        adapters.insert(
            "two".to_string(),
            Arc::new(ScriptedAdapter::new("two", &[("m2", &["second answer"])])),
        );
        adapters.insert(
            "three".to_string(),
            Arc::new(ScriptedAdapter::new("three", &[("m3", &["third answer"])])),
        );
        let engine = engine_with(adapters);

        let result = engine
            .deliberate(
                request(
                    Mode::Quick,
                    1,
                    participants(&[("one", "m1"), ("two", "m2"), ("three", "m3")]),
                ),
                CancellationToken::new(),
            )
            .await
            .expect("deliberate");

        let order: Vec<&str> = result
            .full_debate
            .iter()
            .map(|r| r.participant.as_str())
            .collect();
        assert_eq!(order, vec!["m1@one", "m2@two", "m3@three"]);
    }

    #[tokio::test]
    async fn test_single_participant_is_rejected() {
        let mut adapters: BTreeMap<String, Arc<dyn ModelAdapter>> = BTreeMap::new();
        adapters.insert(
            "claude".to_string(),
            Arc::new(ScriptedAdapter::new("claude", &[("sonnet", &["a"])])),
        );
        let engine = engine_with(adapters);

        let err = engine
            .deliberate(
                request(Mode::Quick, 1, participants(&[("claude", "sonnet")])),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotEnoughParticipants(1)));
    }

    #[tokio::test]
    async fn test_unknown_adapter_is_rejected() {
        let engine = engine_with(BTreeMap::new());
        let err = engine
            .deliberate(
                request(
                    Mode::Quick,
                    1,
                    participants(&[("ghost", "m"), ("phantom", "m")]),
                ),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownAdapter(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn test_empty_question_is_rejected() {
        let mut adapters: BTreeMap<String, Arc<dyn ModelAdapter>> = BTreeMap::new();
        adapters.insert(
            "claude".to_string(),
            Arc::new(ScriptedAdapter::new("claude", &[("sonnet", &["a"])])),
        );
        let engine = engine_with(adapters);
        let mut req = request(
            Mode::Quick,
            1,
            participants(&[("claude", "sonnet"), ("claude", "haiku")]),
        );
        req.question = "   ".to_string();
        // haiku has no script, but validation fails before any invocation
        let err = engine
            .deliberate(req, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_votes_flow_into_result() {
        let mut adapters: BTreeMap<String, Arc<dyn ModelAdapter>> = BTreeMap::new();
        adapters.insert(
            "claude".to_string(),
            Arc::new(ScriptedAdapter::new(
                "claude",
                &[(
                    "sonnet",
                    &["I support this.\nVOTE: yes\nCONFIDENCE: 0.9\nRATIONALE: types"],
                )],
            )),
        );
        adapters.insert(
            "codex".to_string(),
            Arc::new(ScriptedAdapter::new(
                "codex",
                &[(
                    "gpt-4",
                    &["I do not.\nVOTE: no\nCONFIDENCE: 0.4\nRATIONALE: churn"],
                )],
            )),
        );
        let engine = engine_with(adapters);

        let result = engine
            .deliberate(
                request(
                    Mode::Quick,
                    1,
                    participants(&[("claude", "sonnet"), ("codex", "gpt-4")]),
                ),
                CancellationToken::new(),
            )
            .await
            .expect("deliberate");

        let voting = result.voting_result.expect("votes present");
        assert_eq!(voting.winner, "yes");
        assert_eq!(voting.total_votes, 2);
        assert!(result.summary.consensus.contains("'yes'"));
        assert_eq!(
            result.full_debate[0].vote.as_ref().expect("vote").option,
            "yes"
        );
    }

    #[tokio::test]
    async fn test_token_accuracy_split_between_adapter_kinds() {
        let mut adapters: BTreeMap<String, Arc<dyn ModelAdapter>> = BTreeMap::new();
        adapters.insert(
            "cli-tool".to_string(),
            Arc::new(ScriptedAdapter::new(
                "cli-tool",
                &[("local-model", &["estimated-count answer"])],
            )),
        );
        adapters.insert("api".to_string(), Arc::new(ExactUsageAdapter));
        let engine = engine_with(adapters);

        let result = engine
            .deliberate(
                request(
                    Mode::Quick,
                    1,
                    participants(&[("cli-tool", "local-model"), ("api", "gpt-4o")]),
                ),
                CancellationToken::new(),
            )
            .await
            .expect("deliberate");

        let cli_usage = result.full_debate[0]
            .token_usage
            .as_ref()
            .expect("cli usage");
        assert_eq!(
            cli_usage.accuracy,
            crate::adapters::TokenAccuracy::Estimated
        );
        let http_usage = result.full_debate[1]
            .token_usage
            .as_ref()
            .expect("http usage");
        assert_eq!(http_usage.accuracy, crate::adapters::TokenAccuracy::Exact);
        assert_eq!(http_usage.total, 52);

        let stats = result.token_stats.expect("stats");
        assert_eq!(stats.exact_tokens, 52);
        assert!(stats.estimated_tokens > 0);
        assert_eq!(stats.by_participant.len(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_yields_partial_result() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut adapters: BTreeMap<String, Arc<dyn ModelAdapter>> = BTreeMap::new();
        adapters.insert(
            "claude".to_string(),
            Arc::new(ScriptedAdapter::new("claude", &[("sonnet", &["a"])])),
        );
        adapters.insert(
            "codex".to_string(),
            Arc::new(ScriptedAdapter::new("codex", &[("gpt-4", &["b"])])),
        );
        let engine = engine_with(adapters);

        let result = engine
            .deliberate(
                request(
                    Mode::Conference,
                    3,
                    participants(&[("claude", "sonnet"), ("codex", "gpt-4")]),
                ),
                cancel,
            )
            .await
            .expect("deliberate");

        assert_eq!(result.status, DeliberationStatus::Partial);
        assert!(result.rounds_completed <= 1);
    }

    #[tokio::test]
    async fn test_max_rounds_status_when_no_early_stop() {
        // Responses drift within the refining band every round
        let mut adapters: BTreeMap<String, Arc<dyn ModelAdapter>> = BTreeMap::new();
        adapters.insert(
            "claude".to_string(),
            Arc::new(ScriptedAdapter::new(
                "claude",
                &[(
                    "sonnet",
                    &[
                        "alpha beta gamma delta epsilon",
                        "alpha beta gamma delta zeta",
                        "alpha beta gamma eta zeta",
                    ],
                )],
            )),
        );
        adapters.insert(
            "codex".to_string(),
            Arc::new(ScriptedAdapter::new(
                "codex",
                &[(
                    "gpt-4",
                    &[
                        "alpha beta gamma delta omicron",
                        "alpha beta gamma delta sigma",
                        "alpha beta gamma tau sigma",
                    ],
                )],
            )),
        );
        let engine = engine_with(adapters);

        let result = engine
            .deliberate(
                request(
                    Mode::Conference,
                    3,
                    participants(&[("claude", "sonnet"), ("codex", "gpt-4")]),
                ),
                CancellationToken::new(),
            )
            .await
            .expect("deliberate");

        assert_eq!(result.status, DeliberationStatus::Complete);
        assert_eq!(result.rounds_completed, 3);
        let info = result.convergence_info.expect("info");
        assert_eq!(info.status, ConvergenceStatus::MaxRounds);
        assert!(!info.detected);
    }

    #[tokio::test]
    async fn test_graph_context_flows_into_second_deliberation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend: Arc<dyn SimilarityBackend> = Arc::new(JaccardBackend::new());
        let graph = Arc::new(
            crate::graph::DecisionGraph::open(
                crate::config::DecisionGraphConfig::default(),
                &dir.path().join("graph.db"),
                Arc::clone(&backend),
            )
            .await
            .expect("open graph"),
        );

        let mut adapters: BTreeMap<String, Arc<dyn ModelAdapter>> = BTreeMap::new();
        adapters.insert(
            "claude".to_string(),
            Arc::new(ScriptedAdapter::new(
                "claude",
                &[(
                    "sonnet",
                    &["Use it.\nVOTE: yes\nCONFIDENCE: 0.9\nRATIONALE: types"],
                )],
            )),
        );
        adapters.insert(
            "codex".to_string(),
            Arc::new(ScriptedAdapter::new(
                "codex",
                &[(
                    "gpt-4",
                    &["Agreed.\nVOTE: yes\nCONFIDENCE: 0.7\nRATIONALE: safety"],
                )],
            )),
        );
        let engine = DeliberationEngine::new(
            engine_config(),
            adapters,
            Arc::clone(&backend),
            Some(Arc::clone(&graph)),
        );

        // First run: empty graph, no context to inject
        let first = engine
            .deliberate(
                request(
                    Mode::Quick,
                    1,
                    participants(&[("claude", "sonnet"), ("codex", "gpt-4")]),
                ),
                CancellationToken::new(),
            )
            .await
            .expect("first deliberation");
        assert!(first.graph_context_summary.is_none());

        // Second run on the same question: the stored decision comes back
        let second = engine
            .deliberate(
                request(
                    Mode::Quick,
                    1,
                    participants(&[("claude", "sonnet"), ("codex", "gpt-4")]),
                ),
                CancellationToken::new(),
            )
            .await
            .expect("second deliberation");
        let context = second.graph_context_summary.expect("context injected");
        assert!(context.contains("Should we use TypeScript?"));

        let metrics = graph.metrics().await.expect("metrics");
        assert_eq!(metrics.decision_count, 2);
    }

    #[tokio::test]
    async fn test_followup_rounds_receive_prior_responses() {
        // The scripted adapter ignores prompts, so verify threading via
        // the prompts module against engine-produced rounds instead
        let first_round = vec![RoundResponse {
            round: 1,
            participant: "sonnet@claude".to_string(),
            stance: Stance::Neutral,
            response: "round one position".to_string(),
            timestamp: Utc::now(),
            vote: None,
            token_usage: None,
        }];
        let prompt = prompts::followup("q", &[first_round], 2);
        assert!(prompt.contains("PREVIOUS RESPONSES"));
        assert!(prompt.contains("round one position"));
    }
}
