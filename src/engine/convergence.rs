//! Convergence detection over consecutive rounds.
//!
//! Two signals feed the classifier:
//!
//! - **stability** — each participant's current response scored against
//!   their own previous-round response (the reported per-participant
//!   similarity). High stability means positions have stopped moving.
//! - **agreement** — the minimum pairwise similarity between distinct
//!   participants within the current round. Stable positions that remain
//!   mutually distant are a locked disagreement, not a consensus.
//!
//! Stable + agreeing rounds count toward `Converged`; stable-but-distant
//! or swinging rounds count toward `Impasse`. The engine stops on either.

use super::types::{ConvergenceStatus, RoundResponse};
use crate::config::ConvergenceConfig;
use crate::similarity::SimilarityBackend;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Outcome of one convergence check.
#[derive(Debug, Clone)]
pub struct ConvergenceCheck {
    /// True once stable agreement held for the configured round count.
    pub converged: bool,
    pub status: ConvergenceStatus,
    /// Minimum self-similarity across paired participants.
    pub min_similarity: f64,
    /// Mean self-similarity across paired participants.
    pub avg_similarity: f64,
    /// Minimum similarity between distinct participants this round.
    /// 1.0 when fewer than two participants are comparable.
    pub cross_min_similarity: f64,
    pub per_participant: BTreeMap<String, f64>,
    pub consecutive_stable_rounds: u32,
}

pub struct ConvergenceDetector {
    backend: Arc<dyn SimilarityBackend>,
    config: ConvergenceConfig,
    consecutive_stable: u32,
    consecutive_divergent: u32,
}

impl ConvergenceDetector {
    pub fn new(backend: Arc<dyn SimilarityBackend>, config: ConvergenceConfig) -> Self {
        Self {
            backend,
            config,
            consecutive_stable: 0,
            consecutive_divergent: 0,
        }
    }

    /// Check round `round_num` against the previous round. Returns None when
    /// detection is disabled, the round is too early, or no participant
    /// appears in both rounds with a usable response.
    pub fn check(
        &mut self,
        current: &[RoundResponse],
        previous: &[RoundResponse],
        round_num: u32,
    ) -> Option<ConvergenceCheck> {
        if !self.config.enabled {
            return None;
        }
        if round_num <= self.config.min_rounds_before_check {
            return None;
        }

        // Stability: pair by identity; error sentinels carry no position
        let mut per_participant = BTreeMap::new();
        for cur in current.iter().filter(|r| !r.is_error()) {
            let Some(prev) = previous
                .iter()
                .find(|p| p.participant == cur.participant && !p.is_error())
            else {
                continue;
            };
            let score = self
                .backend
                .compute_similarity(&prev.response, &cur.response);
            per_participant.insert(cur.participant.clone(), score);
        }

        if per_participant.is_empty() {
            return None;
        }

        let min_similarity = per_participant
            .values()
            .copied()
            .fold(f64::INFINITY, f64::min);
        let avg_similarity =
            per_participant.values().sum::<f64>() / per_participant.len() as f64;

        // Agreement: pairwise across distinct participants this round
        let comparable: Vec<&RoundResponse> =
            current.iter().filter(|r| !r.is_error()).collect();
        let mut cross_min_similarity = 1.0f64;
        for (i, a) in comparable.iter().enumerate() {
            for b in comparable.iter().skip(i + 1) {
                let score = self.backend.compute_similarity(&a.response, &b.response);
                cross_min_similarity = cross_min_similarity.min(score);
            }
        }

        let required = self.config.consecutive_stable_rounds;
        let stable = min_similarity >= self.config.semantic_similarity_threshold;
        let disagreeing = cross_min_similarity < self.config.divergence_threshold;
        let swinging = min_similarity < self.config.divergence_threshold;

        let status = if stable && !disagreeing {
            self.consecutive_stable += 1;
            self.consecutive_divergent = 0;
            if self.consecutive_stable >= required {
                ConvergenceStatus::Converged
            } else {
                ConvergenceStatus::Refining
            }
        } else if (stable && disagreeing) || swinging {
            self.consecutive_divergent += 1;
            self.consecutive_stable = 0;
            if self.consecutive_divergent >= required {
                ConvergenceStatus::Impasse
            } else {
                ConvergenceStatus::Diverging
            }
        } else {
            self.consecutive_stable = 0;
            self.consecutive_divergent = 0;
            ConvergenceStatus::Refining
        };

        tracing::debug!(
            "Convergence check round {}: self_min={:.3} avg={:.3} cross_min={:.3} status={} stable={}",
            round_num,
            min_similarity,
            avg_similarity,
            cross_min_similarity,
            status.as_str(),
            self.consecutive_stable,
        );

        Some(ConvergenceCheck {
            converged: status == ConvergenceStatus::Converged,
            status,
            min_similarity,
            avg_similarity,
            cross_min_similarity,
            per_participant,
            consecutive_stable_rounds: self.consecutive_stable,
        })
    }
}
