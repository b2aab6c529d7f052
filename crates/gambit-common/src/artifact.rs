//! Artifacts produced by the training pipeline.
//!
//! Gambit only reads these, except for cached counters on [`Network`].

use serde::{Deserialize, Serialize};

use crate::{NetworkId, TrainingRunId};

/// A training run, owned by the training pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRun {
    /// The run's ID.
    pub id: TrainingRunId,
    /// Free-text description.
    pub description: String,
    /// Whether work should be handed out for the run.
    pub active: bool,
    /// The network currently considered best.
    pub best_network_id: NetworkId,
}

/// Network weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    /// The network's ID.
    pub id: NetworkId,
    /// The run that produced the network.
    pub training_run_id: TrainingRunId,
    /// Sequence number within the run.
    pub network_number: u32,
    /// Content hash of the weights.
    pub sha: String,
    /// Storage path.
    pub path: String,
    /// Size of the weights file.
    #[serde(default)]
    pub size_bytes: u64,
    /// Residual layers.
    pub layers: u32,
    /// Filters per layer.
    pub filters: u32,
    /// Cached number of games played with this network.
    #[serde(default)]
    pub games_played: u64,
    /// Elo rating.
    #[serde(default)]
    pub elo: f64,
    /// Whether the rating is fixed.
    #[serde(default)]
    pub anchor: bool,
    /// Whether the rating was computed.
    #[serde(default)]
    pub elo_set: bool,
}

/// An opening book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    /// Content hash, also the key of the book.
    pub sha256: String,
    /// Retrieval URL.
    pub url: String,
    /// Size of the file.
    pub size_bytes: u64,
    /// File format, e.g. `pgn`.
    pub format: String,
}
