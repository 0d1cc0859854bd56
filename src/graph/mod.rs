//! Decision graph memory.
//!
//! Persistent store of past deliberations with an asynchronous
//! similarity-indexing worker, a two-tier cache, and a budget-aware tiered
//! context retriever. This module's facade is the only graph surface the
//! engine and control plane touch.

pub mod cache;
pub mod models;
pub mod retriever;
pub mod store;
pub mod worker;

pub use cache::{CacheStats, SimilarityCache};
pub use models::*;
pub use retriever::{ContextRetriever, RetrievalMetrics, TierDistribution};
pub use store::{GraphError, GraphStore, SolutionTotalsDelta};
pub use worker::{Job, SimilarityWorker};

use crate::config::DecisionGraphConfig;
use crate::engine::types::DeliberationResult;
use crate::similarity::SimilarityBackend;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Scores below this are noise: never stored as edges, never injected.
pub(crate) const NOISE_FLOOR: f64 = 0.40;

/// Bumped when the embedding model changes so stale vectors cannot be
/// served from cache keys.
pub(crate) const EMBEDDING_VERSION: u32 = 1;

const FINAL_POSITION_MAX_CHARS: usize = 500;
const MEASUREMENT_QUESTION_CHARS: usize = 80;

/// Stable 16-hex-char hash identifying a question for cache keys and
/// de-duplication.
pub fn question_hash(question: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(question.trim().to_lowercase().as_bytes());
    hasher.update(format!("|v{EMBEDDING_VERSION}").as_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}

/// Facade wiring storage, caches, worker, and retriever together.
pub struct DecisionGraph {
    store: Arc<GraphStore>,
    cache: Arc<SimilarityCache>,
    worker: SimilarityWorker,
    retriever: ContextRetriever,
    config: DecisionGraphConfig,
}

impl DecisionGraph {
    pub async fn open(
        config: DecisionGraphConfig,
        db_path: &Path,
        backend: Arc<dyn SimilarityBackend>,
    ) -> Result<Self, GraphError> {
        let store = Arc::new(GraphStore::open(db_path).await?);
        let cache = Arc::new(SimilarityCache::new());
        let worker = SimilarityWorker::spawn(
            Arc::clone(&store),
            Arc::clone(&backend),
            Arc::clone(&cache),
        );
        let retriever = ContextRetriever::new(
            Arc::clone(&store),
            backend,
            Arc::clone(&cache),
            config.clone(),
        );
        Ok(Self {
            store,
            cache,
            worker,
            retriever,
            config,
        })
    }

    /// Persist a completed deliberation: node + stances atomically, then
    /// enqueue similarity indexing and bump per-solution token totals.
    /// Queued work is excluded from the latency budget of this call.
    pub async fn store_deliberation(
        &self,
        question: &str,
        result: &DeliberationResult,
    ) -> Result<Uuid, GraphError> {
        let node = DecisionNode {
            id: Uuid::new_v4(),
            question: question.to_string(),
            timestamp: Utc::now(),
            consensus: result.summary.consensus.clone(),
            winning_option: result.voting_result.as_ref().map(|v| v.winner.clone()),
            convergence_status: result
                .convergence_info
                .as_ref()
                .map(|c| c.status.as_str().to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            participants: result.participants.clone(),
            transcript_path: result.transcript_path.clone(),
            metadata: None,
        };

        let last_round = result.rounds_completed;
        let stances: Vec<ParticipantStance> = result
            .full_debate
            .iter()
            .filter(|r| r.round == last_round)
            .map(|r| ParticipantStance {
                decision_id: node.id,
                participant: r.participant.clone(),
                vote_option: r.vote.as_ref().map(|v| v.option.clone()),
                confidence: r.vote.as_ref().map(|v| v.confidence),
                rationale: r.vote.as_ref().map(|v| v.rationale.clone()),
                final_position: truncate(&r.response, FINAL_POSITION_MAX_CHARS),
            })
            .collect();

        self.store.save_decision(&node, &stances).await?;
        self.cache.invalidate_queries();

        if self.config.compute_similarities {
            self.worker.enqueue(
                Job::ComputeSimilarities {
                    decision_id: node.id,
                },
                0,
            );
        }

        if let (Some(voting), Some(stats)) = (&result.voting_result, &result.token_stats) {
            let delta = SolutionTotalsDelta {
                solution: voting.winner.clone(),
                total_tokens: stats.total_tokens as i64,
                exact_tokens: stats.exact_tokens as i64,
                estimated_tokens: stats.estimated_tokens as i64,
                total_cost_usd: stats.total_cost_usd,
                cost_lower_bound: stats.cost_lower_bound,
                cost_upper_bound: stats.cost_upper_bound,
            };
            if let Err(e) = self.store.increment_solution_totals(&delta).await {
                tracing::warn!("Failed to increment solution totals: {e}");
            }
        }

        self.log_growth().await;
        Ok(node.id)
    }

    /// Tiered context for a question, with the structured measurement line.
    /// Best-effort: failures inside the retriever yield an empty string.
    pub async fn get_context_for_deliberation(&self, question: &str) -> String {
        let (context, metrics) = self.retriever.retrieve_context(question).await;

        tracing::info!(
            target: "measurement",
            "MEASUREMENT: question='{}', scored_results={}, tier_distribution={{strong:{},moderate:{},brief:{}}}, tokens_used={}/{}, db_size={}",
            truncate(question, MEASUREMENT_QUESTION_CHARS),
            metrics.scored_results,
            metrics.tier_distribution.strong,
            metrics.tier_distribution.moderate,
            metrics.tier_distribution.brief,
            metrics.tokens_used,
            metrics.tokens_budget,
            metrics.db_size,
        );

        context
    }

    /// Scored past decisions for the query surface.
    pub async fn query_decisions(
        &self,
        query: &str,
        limit: usize,
        threshold: Option<f64>,
    ) -> Result<Vec<ScoredDecision>, GraphError> {
        self.retriever
            .score_candidates(query, threshold.unwrap_or(NOISE_FLOOR), limit)
            .await
    }

    pub async fn metrics(&self) -> Result<GraphMetrics, GraphError> {
        self.store.metrics().await
    }

    pub async fn health_check(&self) -> bool {
        self.store.count_decisions().await.is_ok()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub async fn solution_totals(
        &self,
        solution: &str,
    ) -> Result<Option<SolutionTokenTotals>, GraphError> {
        self.store.get_solution_totals(solution).await
    }

    /// Periodic growth monitoring: stats every 100 decisions, trend every
    /// 500, soft-archive warning at 5000.
    async fn log_growth(&self) {
        let Ok(total) = self.store.count_decisions().await else {
            return;
        };
        if total > 0 && total % 100 == 0
            && let Ok(metrics) = self.store.metrics().await
        {
            tracing::info!(
                "Decision graph: {} decisions, {} stances, {} edges",
                metrics.decision_count,
                metrics.stance_count,
                metrics.edge_count,
            );
        }
        if total > 0 && total % 500 == 0
            && let Ok(metrics) = self.store.metrics().await
        {
            tracing::info!(
                "Decision graph growth: {} of {} decisions stored in the last 7 days",
                metrics.decisions_last_7_days,
                metrics.decision_count,
            );
        }
        if total == 5000 {
            tracing::warn!(
                "Decision graph has reached 5000 decisions — consider archiving older entries"
            );
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", cut.trim_end())
}
