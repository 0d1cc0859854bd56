//! Deliberation domain types.
//!
//! Mode, stance, and status strings are parsed once at the boundary;
//! interior code switches on the tags.

use crate::adapters::TokenUsage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Engine-level failures. Anything here refuses the deliberation outright;
/// per-participant adapter errors never surface as EngineError.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("At least 2 valid participants are required, got {0}")]
    NotEnoughParticipants(usize),

    #[error("Unknown adapter '{0}' — not present in configuration")]
    UnknownAdapter(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Debate stance seeding a participant's prompt. Does not constrain the
/// participant's eventual vote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    #[default]
    Neutral,
    For,
    Against,
}

impl Stance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stance::Neutral => "neutral",
            Stance::For => "for",
            Stance::Against => "against",
        }
    }

    /// Prompt seeding for non-neutral stances.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Stance::Neutral => None,
            Stance::For => Some(
                "You are inclined to argue FOR the proposal. \
                 Present the strongest supporting case, but change your \
                 position if the arguments against it prove stronger.",
            ),
            Stance::Against => Some(
                "You are inclined to argue AGAINST the proposal. \
                 Present the strongest opposing case, but change your \
                 position if the arguments for it prove stronger.",
            ),
        }
    }
}

/// Deliberation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Exactly one round, regardless of the requested round count.
    Quick,
    /// Up to the requested rounds, stopping early on convergence/impasse.
    Conference,
}

impl Mode {
    pub fn parse(s: &str) -> Option<Mode> {
        match s {
            "quick" => Some(Mode::Quick),
            "conference" => Some(Mode::Conference),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Quick => "quick",
            Mode::Conference => "conference",
        }
    }
}

/// One configured debate participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    /// Adapter name (the `cli` half of `model@cli`)
    pub cli: String,
    /// Model identifier passed to the adapter
    pub model: String,
    #[serde(default)]
    pub stance: Stance,
}

impl Participant {
    /// Identity used for matching across rounds: `model@cli`.
    pub fn identity(&self) -> String {
        format!("{}@{}", self.model, self.cli)
    }
}

/// A parsed vote block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub option: String,
    /// Clamped to [0, 1] at parse time
    pub confidence: f64,
    pub rationale: String,
}

/// One participant's response in one round. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundResponse {
    /// 1-based round number
    pub round: u32,
    /// `model@cli`
    pub participant: String,
    pub stance: Stance,
    pub response: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vote: Option<Vote>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}

impl RoundResponse {
    /// Whether this response is an adapter-failure sentinel.
    pub fn is_error(&self) -> bool {
        self.response.starts_with("[ERROR:")
    }
}

/// Convergence classification for a round or a whole deliberation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceStatus {
    Converged,
    Refining,
    Diverging,
    Impasse,
    MaxRounds,
}

impl ConvergenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConvergenceStatus::Converged => "converged",
            ConvergenceStatus::Refining => "refining",
            ConvergenceStatus::Diverging => "diverging",
            ConvergenceStatus::Impasse => "impasse",
            ConvergenceStatus::MaxRounds => "max_rounds",
        }
    }
}

/// Per-round similarity record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundScores {
    pub round: u32,
    pub min_similarity: f64,
    pub avg_similarity: f64,
    pub status: ConvergenceStatus,
}

/// Summary of the convergence trajectory of a deliberation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceInfo {
    pub detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection_round: Option<u32>,
    pub final_similarity: f64,
    pub status: ConvergenceStatus,
    pub per_participant_similarity: BTreeMap<String, f64>,
    pub scores_by_round: Vec<RoundScores>,
}

/// Confidence-weighted tally for one option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionTally {
    /// Sum of confidences
    pub weight: f64,
    /// Raw vote count
    pub count: u32,
}

/// Aggregated voting outcome over the final round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingResult {
    pub winner: String,
    pub tally: BTreeMap<String, OptionTally>,
    pub total_votes: u32,
}

/// Deterministic textual summary of the deliberation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub consensus: String,
    pub key_agreements: Vec<String>,
    pub key_disagreements: Vec<String>,
    pub final_recommendation: String,
}

/// Definitive outcome of a deliberation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliberationStatus {
    Complete,
    Partial,
    Failed,
}

/// Aggregate token accounting for one deliberation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionTokenStats {
    pub total_tokens: u64,
    pub exact_tokens: u64,
    pub estimated_tokens: u64,
    pub total_cost_usd: f64,
    pub cost_lower_bound: f64,
    pub cost_upper_bound: f64,
    pub by_participant: BTreeMap<String, u64>,
}

/// The full outcome of one deliberation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliberationResult {
    pub status: DeliberationStatus,
    pub mode: Mode,
    pub rounds_completed: u32,
    /// Participant identities (`model@cli`), input order
    pub participants: Vec<String>,
    pub summary: Summary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<String>,
    /// Strictly ascending by round, within a round by participant index
    pub full_debate: Vec<RoundResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voting_result: Option<VotingResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub convergence_info: Option<ConvergenceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_context_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_stats: Option<SessionTokenStats>,
}

/// Input to the deliberation engine, already validated at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliberationRequest {
    pub question: String,
    pub participants: Vec<Participant>,
    pub rounds: u32,
    pub mode: Mode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_identity() {
        let p = Participant {
            cli: "claude".to_string(),
            model: "sonnet-4".to_string(),
            stance: Stance::Neutral,
        };
        assert_eq!(p.identity(), "sonnet-4@claude");
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(Mode::parse("quick"), Some(Mode::Quick));
        assert_eq!(Mode::parse("conference"), Some(Mode::Conference));
        assert_eq!(Mode::parse("marathon"), None);
    }

    #[test]
    fn test_stance_serde_tags() {
        let json = serde_json::to_string(&Stance::For).expect("serialize");
        assert_eq!(json, "\"for\"");
        let parsed: Stance = serde_json::from_str("\"against\"").expect("deserialize");
        assert_eq!(parsed, Stance::Against);
    }

    #[test]
    fn test_stance_hints() {
        assert!(Stance::Neutral.hint().is_none());
        assert!(Stance::For.hint().expect("hint").contains("FOR"));
        assert!(Stance::Against.hint().expect("hint").contains("AGAINST"));
    }

    #[test]
    fn test_error_sentinel_detection() {
        let response = RoundResponse {
            round: 1,
            participant: "m@c".to_string(),
            stance: Stance::Neutral,
            response: "[ERROR: Invocation failed: boom]".to_string(),
            timestamp: Utc::now(),
            vote: None,
            token_usage: None,
        };
        assert!(response.is_error());
    }

    #[test]
    fn test_convergence_status_strings() {
        assert_eq!(ConvergenceStatus::MaxRounds.as_str(), "max_rounds");
        let json = serde_json::to_string(&ConvergenceStatus::Impasse).expect("serialize");
        assert_eq!(json, "\"impasse\"");
    }
}
