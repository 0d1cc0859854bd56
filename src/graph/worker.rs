//! Background similarity worker.
//!
//! A single long-running task drains an in-memory queue and computes
//! similarity edges for freshly stored decisions, off the hot path.
//! Enqueue returns immediately. Failed jobs are logged and dropped — the
//! retriever never depends on edges existing, so jobs are regenerable.

use super::NOISE_FLOOR;
use super::cache::SimilarityCache;
use super::models::DecisionSimilarity;
use super::store::GraphStore;
use crate::similarity::SimilarityBackend;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Most recent decisions scored against a new node.
const RECENT_WINDOW: i64 = 100;
/// Strongest edges kept per source node.
const MAX_EDGES_PER_SOURCE: usize = 50;
/// Per-job processing bound.
const JOB_DEADLINE: Duration = Duration::from_secs(10);

/// Work items the runner understands.
#[derive(Debug, Clone)]
pub enum Job {
    ComputeSimilarities { decision_id: Uuid },
}

#[derive(Debug)]
struct QueuedJob {
    id: u64,
    job: Job,
    delay: Duration,
}

/// Handle for enqueueing background work.
pub struct SimilarityWorker {
    tx: mpsc::UnboundedSender<QueuedJob>,
    next_id: AtomicU64,
}

impl SimilarityWorker {
    /// Spawn the runner task and return the enqueue handle.
    pub fn spawn(
        store: Arc<GraphStore>,
        backend: Arc<dyn SimilarityBackend>,
        cache: Arc<SimilarityCache>,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedJob>();

        tokio::spawn(async move {
            while let Some(queued) = rx.recv().await {
                if !queued.delay.is_zero() {
                    tokio::time::sleep(queued.delay).await;
                }
                let result = tokio::time::timeout(
                    JOB_DEADLINE,
                    process(&store, backend.as_ref(), &cache, &queued.job),
                )
                .await;
                match result {
                    Ok(Ok(edges)) => {
                        tracing::debug!("Job {} done: {} edges written", queued.id, edges);
                    }
                    Ok(Err(e)) => {
                        tracing::warn!("Job {} failed, dropping: {}", queued.id, e);
                    }
                    Err(_) => {
                        tracing::warn!(
                            "Job {} exceeded {:?} deadline, dropping",
                            queued.id,
                            JOB_DEADLINE
                        );
                    }
                }
            }
        });

        Self {
            tx,
            next_id: AtomicU64::new(1),
        }
    }

    /// Append a job; returns its id in microseconds, never blocks.
    pub fn enqueue(&self, job: Job, delay_seconds: u64) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let queued = QueuedJob {
            id,
            job,
            delay: Duration::from_secs(delay_seconds),
        };
        if self.tx.send(queued).is_err() {
            tracing::warn!("Similarity worker gone; job {id} dropped");
        }
        id
    }
}

async fn process(
    store: &GraphStore,
    backend: &dyn SimilarityBackend,
    cache: &SimilarityCache,
    job: &Job,
) -> Result<usize, super::store::GraphError> {
    match job {
        Job::ComputeSimilarities { decision_id } => {
            let Some(node) = store.get_decision_node(*decision_id).await? else {
                tracing::warn!("Similarity job for unknown decision {decision_id}");
                return Ok(0);
            };

            let candidates = store.get_all_decisions(Some(RECENT_WINDOW), None).await?;
            let mut scored: Vec<(Uuid, f64)> = candidates
                .iter()
                .filter(|c| c.id != node.id)
                .map(|c| {
                    (
                        c.id,
                        backend.compute_similarity(&node.question, &c.question),
                    )
                })
                .filter(|(_, score)| *score >= NOISE_FLOOR)
                .collect();

            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(MAX_EDGES_PER_SOURCE);

            let written = scored.len();
            for (target_id, similarity_score) in scored {
                store
                    .save_similarity(&DecisionSimilarity {
                        source_id: node.id,
                        target_id,
                        similarity_score,
                        computed_at: Utc::now(),
                    })
                    .await?;
            }

            // New edges can change query results
            cache.invalidate_queries();
            Ok(written)
        }
    }
}
