//! Decision graph data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A completed deliberation persisted into the graph. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionNode {
    pub id: Uuid,
    pub question: String,
    pub timestamp: DateTime<Utc>,
    pub consensus: String,
    pub winning_option: Option<String>,
    /// Final convergence status string ("converged", "impasse", ...)
    pub convergence_status: String,
    pub participants: Vec<String>,
    pub transcript_path: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// One participant's final position within a decision. Owned by its node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantStance {
    pub decision_id: Uuid,
    pub participant: String,
    pub vote_option: Option<String>,
    pub confidence: Option<f64>,
    pub rationale: Option<String>,
    /// Truncated last-round response text
    pub final_position: String,
}

/// A similarity edge between two decisions. References both nodes, owns
/// neither; stored directed, normalised at retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionSimilarity {
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub similarity_score: f64,
    pub computed_at: DateTime<Utc>,
}

/// Cumulative token totals per winning solution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionTokenTotals {
    pub solution: String,
    pub total_tokens: i64,
    pub exact_tokens: i64,
    pub estimated_tokens: i64,
    pub total_cost_usd: f64,
    pub cost_lower_bound: f64,
    pub cost_upper_bound: f64,
    pub deliberation_count: i64,
    pub last_updated: DateTime<Utc>,
}

/// Observability counts for the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphMetrics {
    pub decision_count: i64,
    pub stance_count: i64,
    pub edge_count: i64,
    pub decisions_last_7_days: i64,
}

/// A decision with its similarity score against a query.
#[derive(Debug, Clone)]
pub struct ScoredDecision {
    pub node: DecisionNode,
    pub score: f64,
}
