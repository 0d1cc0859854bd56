//! Per-deliberation token tracking.

use super::types::SessionTokenStats;
use crate::adapters::{TokenAccuracy, TokenUsage};
use std::collections::BTreeMap;

/// Accumulates token usage per participant per round for one deliberation.
/// Totals feed the result's `token_stats` and the graph's per-solution
/// token totals.
#[derive(Debug, Default)]
pub struct SessionTokenTracker {
    records: Vec<UsageRecord>,
}

#[derive(Debug)]
struct UsageRecord {
    participant: String,
    #[allow(dead_code)]
    round: u32,
    usage: TokenUsage,
}

impl SessionTokenTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, participant: &str, round: u32, usage: TokenUsage) {
        self.records.push(UsageRecord {
            participant: participant.to_string(),
            round,
            usage,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Aggregate totals. Exact usage carries its reported cost; estimated
    /// usage carries an 80/20-split estimate plus an input-rate/output-rate
    /// cost spread.
    pub fn stats(&self) -> SessionTokenStats {
        let mut stats = SessionTokenStats::default();
        let pricing = crate::pricing::pricing();

        for record in &self.records {
            let usage = &record.usage;
            stats.total_tokens += usage.total;
            *stats
                .by_participant
                .entry(record.participant.clone())
                .or_insert(0) += usage.total;

            match usage.accuracy {
                TokenAccuracy::Exact => {
                    stats.exact_tokens += usage.total;
                    let cost = usage.cost_usd.unwrap_or(0.0);
                    stats.total_cost_usd += cost;
                    stats.cost_lower_bound += cost;
                    stats.cost_upper_bound += cost;
                }
                TokenAccuracy::Estimated => {
                    stats.estimated_tokens += usage.total;
                    if let Some(cost) = pricing.estimate_cost(&usage.model, usage.total) {
                        stats.total_cost_usd += cost;
                    }
                    if let Some((lower, upper)) =
                        pricing.estimate_cost_bounds(&usage.model, usage.total)
                    {
                        stats.cost_lower_bound += lower;
                        stats.cost_upper_bound += upper;
                    }
                }
                TokenAccuracy::Unavailable => {}
            }
        }

        stats
    }
}
