//! SQLite persistence for the decision graph.
//!
//! Single file, WAL mode, one writer per file assumed (operator
//! responsibility). All writes go through the DB's own transactions — no
//! application-level locking.

use super::models::{
    DecisionNode, DecisionSimilarity, GraphMetrics, ParticipantStance, SolutionTokenTotals,
};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Storage failures. Fatal only to the operation at hand — callers treat
/// graph persistence as best-effort.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Invalid decision: {0}")]
    Invalid(String),
}

/// Untyped increment applied to one solution's token totals.
#[derive(Debug, Clone)]
pub struct SolutionTotalsDelta {
    pub solution: String,
    pub total_tokens: i64,
    pub exact_tokens: i64,
    pub estimated_tokens: i64,
    pub total_cost_usd: f64,
    pub cost_lower_bound: f64,
    pub cost_upper_bound: f64,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS decision_nodes (
    id TEXT PRIMARY KEY,
    question TEXT NOT NULL,
    question_hash TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    consensus TEXT NOT NULL,
    winning_option TEXT,
    convergence_status TEXT NOT NULL,
    participants_json TEXT NOT NULL,
    transcript_path TEXT,
    metadata_json TEXT
);
CREATE INDEX IF NOT EXISTS idx_decisions_timestamp
    ON decision_nodes(timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_decisions_question_hash
    ON decision_nodes(question_hash);

CREATE TABLE IF NOT EXISTS participant_stances (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    decision_id TEXT NOT NULL REFERENCES decision_nodes(id) ON DELETE CASCADE,
    participant TEXT NOT NULL,
    vote_option TEXT,
    confidence REAL,
    rationale TEXT,
    final_position TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_stances_decision
    ON participant_stances(decision_id);

CREATE TABLE IF NOT EXISTS decision_similarities (
    source_id TEXT NOT NULL,
    target_id TEXT NOT NULL,
    similarity_score REAL NOT NULL,
    computed_at TEXT NOT NULL,
    PRIMARY KEY (source_id, target_id)
);
CREATE INDEX IF NOT EXISTS idx_similarities_source
    ON decision_similarities(source_id);
CREATE INDEX IF NOT EXISTS idx_similarities_score
    ON decision_similarities(similarity_score DESC);

CREATE TABLE IF NOT EXISTS solution_token_totals (
    solution TEXT PRIMARY KEY,
    total_tokens INTEGER NOT NULL DEFAULT 0,
    exact_tokens INTEGER NOT NULL DEFAULT 0,
    estimated_tokens INTEGER NOT NULL DEFAULT 0,
    total_cost_usd REAL NOT NULL DEFAULT 0,
    cost_lower_bound REAL NOT NULL DEFAULT 0,
    cost_upper_bound REAL NOT NULL DEFAULT 0,
    deliberation_count INTEGER NOT NULL DEFAULT 0,
    last_updated TEXT NOT NULL
);
";

/// Graph storage over a single SQLite file.
pub struct GraphStore {
    pool: SqlitePool,
}

impl GraphStore {
    /// Open (creating if missing) the graph database at `path` in WAL mode.
    pub async fn open(path: &Path) -> Result<Self, GraphError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&pool).await?;
        }

        tracing::info!("Decision graph store ready at {}", path.display());
        Ok(Self { pool })
    }

    /// Persist a node with its stances in one transaction: all or nothing.
    pub async fn save_decision(
        &self,
        node: &DecisionNode,
        stances: &[ParticipantStance],
    ) -> Result<(), GraphError> {
        if node.question.trim().is_empty() {
            return Err(GraphError::Invalid("question must not be empty".into()));
        }
        if node.participants.len() < 2 {
            return Err(GraphError::Invalid(format!(
                "decision requires at least 2 participants, got {}",
                node.participants.len()
            )));
        }

        let participants_json = serde_json::to_string(&node.participants)?;
        let metadata_json = node
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO decision_nodes
             (id, question, question_hash, timestamp, consensus, winning_option,
              convergence_status, participants_json, transcript_path, metadata_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(node.id.to_string())
        .bind(&node.question)
        .bind(super::question_hash(&node.question))
        .bind(format_ts(&node.timestamp))
        .bind(&node.consensus)
        .bind(&node.winning_option)
        .bind(&node.convergence_status)
        .bind(&participants_json)
        .bind(&node.transcript_path)
        .bind(&metadata_json)
        .execute(&mut *tx)
        .await?;

        for stance in stances {
            sqlx::query(
                "INSERT INTO participant_stances
                 (decision_id, participant, vote_option, confidence, rationale, final_position)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(stance.decision_id.to_string())
            .bind(&stance.participant)
            .bind(&stance.vote_option)
            .bind(stance.confidence)
            .bind(&stance.rationale)
            .bind(&stance.final_position)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_decision_node(&self, id: Uuid) -> Result<Option<DecisionNode>, GraphError> {
        let row = sqlx::query("SELECT * FROM decision_nodes WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| node_from_row(&r)).transpose()
    }

    /// Recent decisions, newest first.
    pub async fn get_all_decisions(
        &self,
        limit: Option<i64>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<DecisionNode>, GraphError> {
        let rows = sqlx::query(
            "SELECT * FROM decision_nodes
             WHERE (?1 IS NULL OR timestamp >= ?1)
             ORDER BY timestamp DESC
             LIMIT ?2",
        )
        .bind(since.as_ref().map(format_ts))
        .bind(limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(node_from_row).collect()
    }

    pub async fn count_decisions(&self) -> Result<i64, GraphError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM decision_nodes")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    pub async fn get_stances(
        &self,
        decision_id: Uuid,
    ) -> Result<Vec<ParticipantStance>, GraphError> {
        let rows = sqlx::query(
            "SELECT * FROM participant_stances WHERE decision_id = ?1 ORDER BY id",
        )
        .bind(decision_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(stance_from_row).collect()
    }

    /// Upsert a similarity edge keyed on (source, target).
    pub async fn save_similarity(&self, edge: &DecisionSimilarity) -> Result<(), GraphError> {
        if edge.source_id == edge.target_id {
            return Err(GraphError::Invalid("self-edge is not allowed".into()));
        }
        sqlx::query(
            "INSERT INTO decision_similarities
             (source_id, target_id, similarity_score, computed_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(source_id, target_id)
             DO UPDATE SET similarity_score = ?3, computed_at = ?4",
        )
        .bind(edge.source_id.to_string())
        .bind(edge.target_id.to_string())
        .bind(edge.similarity_score)
        .bind(format_ts(&edge.computed_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Edges touching `source_id` with score >= `min_score`, strongest
    /// first, normalised so the returned `source_id` is the query id.
    pub async fn get_similar_decisions(
        &self,
        source_id: Uuid,
        min_score: f64,
        limit: i64,
    ) -> Result<Vec<DecisionSimilarity>, GraphError> {
        let rows = sqlx::query(
            "SELECT * FROM decision_similarities
             WHERE (source_id = ?1 OR target_id = ?1) AND similarity_score >= ?2
             ORDER BY similarity_score DESC
             LIMIT ?3",
        )
        .bind(source_id.to_string())
        .bind(min_score)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let mut edge = edge_from_row(row)?;
                if edge.source_id != source_id {
                    std::mem::swap(&mut edge.source_id, &mut edge.target_id);
                }
                Ok(edge)
            })
            .collect()
    }

    /// Atomically add `delta` to a solution's totals. Every call bumps
    /// `deliberation_count` by one.
    pub async fn increment_solution_totals(
        &self,
        delta: &SolutionTotalsDelta,
    ) -> Result<(), GraphError> {
        sqlx::query(
            "INSERT INTO solution_token_totals
             (solution, total_tokens, exact_tokens, estimated_tokens, total_cost_usd,
              cost_lower_bound, cost_upper_bound, deliberation_count, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8)
             ON CONFLICT(solution) DO UPDATE SET
               total_tokens = total_tokens + ?2,
               exact_tokens = exact_tokens + ?3,
               estimated_tokens = estimated_tokens + ?4,
               total_cost_usd = total_cost_usd + ?5,
               cost_lower_bound = cost_lower_bound + ?6,
               cost_upper_bound = cost_upper_bound + ?7,
               deliberation_count = deliberation_count + 1,
               last_updated = ?8",
        )
        .bind(&delta.solution)
        .bind(delta.total_tokens)
        .bind(delta.exact_tokens)
        .bind(delta.estimated_tokens)
        .bind(delta.total_cost_usd)
        .bind(delta.cost_lower_bound)
        .bind(delta.cost_upper_bound)
        .bind(format_ts(&Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_solution_totals(
        &self,
        solution: &str,
    ) -> Result<Option<SolutionTokenTotals>, GraphError> {
        let row = sqlx::query("SELECT * FROM solution_token_totals WHERE solution = ?1")
            .bind(solution)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| totals_from_row(&r)).transpose()
    }

    pub async fn metrics(&self) -> Result<GraphMetrics, GraphError> {
        let week_ago = Utc::now() - chrono::Duration::days(7);
        let row = sqlx::query(
            "SELECT
               (SELECT COUNT(*) FROM decision_nodes) AS decisions,
               (SELECT COUNT(*) FROM participant_stances) AS stances,
               (SELECT COUNT(*) FROM decision_similarities) AS edges,
               (SELECT COUNT(*) FROM decision_nodes WHERE timestamp >= ?1) AS recent",
        )
        .bind(format_ts(&week_ago))
        .fetch_one(&self.pool)
        .await?;

        Ok(GraphMetrics {
            decision_count: row.try_get("decisions")?,
            stance_count: row.try_get("stances")?,
            edge_count: row.try_get("edges")?,
            decisions_last_7_days: row.try_get("recent")?,
        })
    }
}

/// Fixed-width UTC timestamps so lexicographic order matches chronology.
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, GraphError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| GraphError::Invalid(format!("bad timestamp '{raw}': {e}")))
}

fn parse_id(raw: &str) -> Result<Uuid, GraphError> {
    Uuid::parse_str(raw).map_err(|e| GraphError::Invalid(format!("bad uuid '{raw}': {e}")))
}

fn node_from_row(row: &SqliteRow) -> Result<DecisionNode, GraphError> {
    let id: String = row.try_get("id")?;
    let timestamp: String = row.try_get("timestamp")?;
    let participants_json: String = row.try_get("participants_json")?;
    let metadata_json: Option<String> = row.try_get("metadata_json")?;

    Ok(DecisionNode {
        id: parse_id(&id)?,
        question: row.try_get("question")?,
        timestamp: parse_ts(&timestamp)?,
        consensus: row.try_get("consensus")?,
        winning_option: row.try_get("winning_option")?,
        convergence_status: row.try_get("convergence_status")?,
        participants: serde_json::from_str(&participants_json)?,
        transcript_path: row.try_get("transcript_path")?,
        metadata: metadata_json
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?,
    })
}

fn stance_from_row(row: &SqliteRow) -> Result<ParticipantStance, GraphError> {
    let decision_id: String = row.try_get("decision_id")?;
    Ok(ParticipantStance {
        decision_id: parse_id(&decision_id)?,
        participant: row.try_get("participant")?,
        vote_option: row.try_get("vote_option")?,
        confidence: row.try_get("confidence")?,
        rationale: row.try_get("rationale")?,
        final_position: row.try_get("final_position")?,
    })
}

fn edge_from_row(row: &SqliteRow) -> Result<DecisionSimilarity, GraphError> {
    let source: String = row.try_get("source_id")?;
    let target: String = row.try_get("target_id")?;
    let computed_at: String = row.try_get("computed_at")?;
    Ok(DecisionSimilarity {
        source_id: parse_id(&source)?,
        target_id: parse_id(&target)?,
        similarity_score: row.try_get("similarity_score")?,
        computed_at: parse_ts(&computed_at)?,
    })
}

fn totals_from_row(row: &SqliteRow) -> Result<SolutionTokenTotals, GraphError> {
    let last_updated: String = row.try_get("last_updated")?;
    Ok(SolutionTokenTotals {
        solution: row.try_get("solution")?,
        total_tokens: row.try_get("total_tokens")?,
        exact_tokens: row.try_get("exact_tokens")?,
        estimated_tokens: row.try_get("estimated_tokens")?,
        total_cost_usd: row.try_get("total_cost_usd")?,
        cost_lower_bound: row.try_get("cost_lower_bound")?,
        cost_upper_bound: row.try_get("cost_upper_bound")?,
        deliberation_count: row.try_get("deliberation_count")?,
        last_updated: parse_ts(&last_updated)?,
    })
}
