//! Budget-aware tiered context retriever.
//!
//! Scores the recent-decision window against a question, keeps an
//! adaptive top-k above the noise floor, tiers results by score, and
//! renders them as markdown until the token budget would be exceeded.
//! Retrieval is best-effort: every failure degrades to empty context.

use super::cache::{ScoredId, SimilarityCache, query_key};
use super::models::{DecisionNode, ScoredDecision};
use super::store::{GraphError, GraphStore};
use super::{NOISE_FLOOR, question_hash};
use crate::config::DecisionGraphConfig;
use crate::similarity::{SimilarityBackend, cosine_similarity};
use serde::Serialize;
use std::sync::Arc;

const CONTEXT_HEADER: &str = "## Relevant past decisions\n\n";

/// Tier counts for one retrieval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierDistribution {
    pub strong: usize,
    pub moderate: usize,
    pub brief: usize,
}

/// Observability record for one retrieval.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalMetrics {
    pub scored_results: usize,
    pub tier_distribution: TierDistribution,
    pub tokens_used: usize,
    pub tokens_budget: usize,
    pub db_size: i64,
    pub candidate_count: usize,
}

impl RetrievalMetrics {
    fn empty(budget: usize) -> Self {
        Self {
            scored_results: 0,
            tier_distribution: TierDistribution::default(),
            tokens_used: 0,
            tokens_budget: budget,
            db_size: 0,
            candidate_count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Strong,
    Moderate,
    Brief,
}

pub struct ContextRetriever {
    store: Arc<GraphStore>,
    backend: Arc<dyn SimilarityBackend>,
    cache: Arc<SimilarityCache>,
    config: DecisionGraphConfig,
}

impl ContextRetriever {
    pub fn new(
        store: Arc<GraphStore>,
        backend: Arc<dyn SimilarityBackend>,
        cache: Arc<SimilarityCache>,
        config: DecisionGraphConfig,
    ) -> Self {
        Self {
            store,
            backend,
            cache,
            config,
        }
    }

    /// Retrieve tiered context for a question. Never fails — errors are
    /// logged and downgraded to empty context so the deliberation proceeds.
    pub async fn retrieve_context(&self, question: &str) -> (String, RetrievalMetrics) {
        match self.try_retrieve(question).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Context retrieval failed, proceeding without context: {e}");
                (
                    String::new(),
                    RetrievalMetrics::empty(self.config.context_token_budget),
                )
            }
        }
    }

    async fn try_retrieve(
        &self,
        question: &str,
    ) -> Result<(String, RetrievalMetrics), GraphError> {
        let budget = self.config.context_token_budget;
        let db_size = self.store.count_decisions().await?;
        if db_size == 0 {
            return Ok((String::new(), RetrievalMetrics::empty(budget)));
        }

        let candidate_count = (db_size as usize).min(self.config.query_window);
        let qhash = question_hash(question);
        let key = query_key(&qhash, NOISE_FLOOR, None);

        let retained: Vec<ScoredId> = match self.cache.get_query(&key) {
            Some(cached) => cached,
            None => {
                let candidates = self
                    .store
                    .get_all_decisions(Some(self.config.query_window as i64), None)
                    .await?;
                let mut scored = self.score_against(question, &qhash, &candidates);
                scored.retain(|s| s.score >= NOISE_FLOOR);
                scored.sort_by(|a, b| {
                    b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal)
                });
                scored.truncate(self.adaptive_k(db_size));
                self.cache.put_query(key, scored.clone());
                scored
            }
        };

        let mut retained = retained;
        retained.truncate(self.adaptive_k(db_size));

        if retained.is_empty() {
            let mut metrics = RetrievalMetrics::empty(budget);
            metrics.db_size = db_size;
            metrics.candidate_count = candidate_count;
            return Ok((String::new(), metrics));
        }

        // Render in descending score order until the budget would be blown
        let mut rendered = String::from(CONTEXT_HEADER);
        let mut tokens_used = estimate_tokens(CONTEXT_HEADER);
        let mut distribution = TierDistribution::default();
        let mut appended = 0usize;

        for scored in &retained {
            let Some(node) = self.store.get_decision_node(scored.id).await? else {
                continue;
            };
            let tier = self.tier_for(scored.score);
            let entry = match tier {
                Tier::Strong => self.format_strong(&node).await?,
                Tier::Moderate => format_moderate(&node),
                Tier::Brief => format_brief(&node),
            };

            let entry_tokens = estimate_tokens(&entry);
            if tokens_used + entry_tokens > budget {
                tracing::debug!(
                    "Context budget reached after {appended} entries ({tokens_used}/{budget} tokens)"
                );
                break;
            }

            rendered.push_str(&entry);
            tokens_used += entry_tokens;
            appended += 1;
            match tier {
                Tier::Strong => distribution.strong += 1,
                Tier::Moderate => distribution.moderate += 1,
                Tier::Brief => distribution.brief += 1,
            }
        }

        let metrics = RetrievalMetrics {
            scored_results: retained.len(),
            tier_distribution: distribution,
            tokens_used: if appended == 0 { 0 } else { tokens_used },
            tokens_budget: budget,
            db_size,
            candidate_count,
        };

        if appended == 0 {
            return Ok((String::new(), metrics));
        }
        Ok((rendered, metrics))
    }

    /// Scored decisions for the query surface: threshold is advisory,
    /// limit caps the result count. Serves from L1 when possible.
    pub async fn score_candidates(
        &self,
        query: &str,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<ScoredDecision>, GraphError> {
        let qhash = question_hash(query);
        let key = query_key(&qhash, threshold, Some(limit));

        let scored: Vec<ScoredId> = match self.cache.get_query(&key) {
            Some(cached) => cached,
            None => {
                let candidates = self
                    .store
                    .get_all_decisions(Some(self.config.query_window as i64), None)
                    .await?;
                let mut scored = self.score_against(query, &qhash, &candidates);
                scored.retain(|s| s.score >= threshold);
                scored.sort_by(|a, b| {
                    b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal)
                });
                scored.truncate(limit);
                self.cache.put_query(key, scored.clone());
                scored
            }
        };

        let mut results = Vec::with_capacity(scored.len());
        for entry in scored {
            if let Some(node) = self.store.get_decision_node(entry.id).await? {
                results.push(ScoredDecision {
                    node,
                    score: entry.score,
                });
            }
        }
        Ok(results)
    }

    /// Score the question against every candidate, reusing L2 embeddings
    /// when the backend vectorises text.
    fn score_against(
        &self,
        question: &str,
        qhash: &str,
        candidates: &[DecisionNode],
    ) -> Vec<ScoredId> {
        let query_vec = self.cached_embedding(qhash, question);

        candidates
            .iter()
            .map(|candidate| {
                let score = match &query_vec {
                    Some(qv) => {
                        let chash = question_hash(&candidate.question);
                        match self.cached_embedding(&chash, &candidate.question) {
                            Some(cv) => cosine_similarity(qv, &cv),
                            None => self
                                .backend
                                .compute_similarity(question, &candidate.question),
                        }
                    }
                    None => self
                        .backend
                        .compute_similarity(question, &candidate.question),
                };
                ScoredId {
                    id: candidate.id,
                    score,
                }
            })
            .collect()
    }

    fn cached_embedding(&self, hash: &str, text: &str) -> Option<Vec<f32>> {
        if let Some(vector) = self.cache.get_embedding(hash) {
            return Some(vector);
        }
        let vector = self.backend.embed(text)?;
        self.cache.put_embedding(hash, vector.clone());
        Some(vector)
    }

    /// k shrinks as the graph grows: 5 under 100 decisions, 3 under 1000,
    /// 2 beyond, optionally capped by config.
    fn adaptive_k(&self, db_size: i64) -> usize {
        let k = if db_size < 100 {
            5
        } else if db_size < 1000 {
            3
        } else {
            2
        };
        match self.config.max_context_decisions {
            Some(cap) => k.min(cap),
            None => k,
        }
    }

    fn tier_for(&self, score: f64) -> Tier {
        let boundaries = self.config.tier_boundaries;
        if score >= boundaries.strong {
            Tier::Strong
        } else if score >= boundaries.moderate {
            Tier::Moderate
        } else {
            Tier::Brief
        }
    }

    /// Full block: question, status, consensus, winner, per-participant votes.
    async fn format_strong(&self, node: &DecisionNode) -> Result<String, GraphError> {
        let mut out = format!(
            "### {}\n- Status: {}\n- Consensus: {}\n- Winning option: {}\n",
            node.question,
            node.convergence_status,
            node.consensus,
            node.winning_option.as_deref().unwrap_or("none"),
        );

        let stances = self.store.get_stances(node.id).await?;
        if !stances.is_empty() {
            out.push_str("- Votes:\n");
            for stance in stances {
                out.push_str(&format!(
                    "  - {}: {} (confidence {:.2}) — {}\n",
                    stance.participant,
                    stance.vote_option.as_deref().unwrap_or("(no vote)"),
                    stance.confidence.unwrap_or(0.0),
                    truncate(stance.rationale.as_deref().unwrap_or(""), 140),
                ));
            }
        }
        out.push('\n');
        Ok(out)
    }
}

fn format_moderate(node: &DecisionNode) -> String {
    format!(
        "- **{}** → {}\n",
        truncate(&node.question, 160),
        truncate(&node.consensus, 240),
    )
}

fn format_brief(node: &DecisionNode) -> String {
    format!(
        "- {} → {}\n",
        truncate(&node.question, 80),
        truncate(&node.consensus, 80),
    )
}

/// Intentionally simple: rendered length over four.
fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", cut.trim_end())
}
