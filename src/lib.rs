//! AI Counsel - Multi-Model Deliberation Engine
//!
//! Coordinates heterogeneous AI model back-ends through multi-round
//! structured debates: fans prompts out in parallel, detects when
//! positions stabilise, aggregates confidence-weighted votes, and
//! persists outcomes into a graph-structured memory that feeds relevant
//! past decisions back into future deliberations.
//!
//! ## Features
//!
//! - **Adapter layer:** CLI subprocesses (activity-based timeouts) and
//!   HTTP chat APIs (retry with backoff, exact token accounting) behind
//!   one async trait
//! - **Convergence detection:** pluggable similarity backends decide when
//!   a debate has converged or locked into an impasse
//! - **Decision graph:** SQLite-backed memory with async similarity
//!   indexing, a two-tier cache, and budget-aware context injection
//! - **Control plane:** `deliberate` and `query_decisions` verbs over
//!   JSON-RPC
//!
//! ## Quick Start
//!
//! ```bash
//! # Serve the control plane with the default config
//! ai-counsel
//!
//! # Point at a specific config and database
//! ai-counsel --config counsel.yaml --db ./decisions.db
//! ```

pub mod adapters;
pub mod config;
pub mod engine;
pub mod graph;
pub mod pricing;
pub mod server;
pub mod similarity;

// Re-export commonly used types
pub use config::Config;
pub use engine::DeliberationEngine;
pub use engine::types::{DeliberationRequest, DeliberationResult};
pub use graph::DecisionGraph;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
