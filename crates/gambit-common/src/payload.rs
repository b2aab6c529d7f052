//! Messages exchanged with clients.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    identity::ClientInfo,
    task::{BuildSpec, GameOutcome, Pentanomial, TimeControl},
    MatchGameId,
};

/// The declared type of a [`ResourceSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    /// Network weights.
    Network,
    /// Opening book.
    Book,
}

/// A content-addressed reference to an artifact the client fetches itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Content hash.
    pub sha256: String,
    /// Retrieval URL.
    pub url: String,
    /// Size of the artifact.
    pub size_bytes: u64,
    /// Declared type.
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    /// Format, e.g. `pgn` for books.
    pub format: String,
}

/// Engine arguments and options.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineParams {
    /// Command line arguments.
    pub args: Vec<String>,
    /// UCI options.
    pub uci_options: BTreeMap<String, String>,
}

/// A fully resolved engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfiguration {
    /// Where to build the engine from, the client's own build if unset.
    pub build: Option<BuildSpec>,
    /// The network weights.
    pub network: ResourceSpec,
    /// Arguments and options.
    pub params: EngineParams,
}

/// A request for work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Bearer token.
    pub token: String,
    /// Information about the client.
    #[serde(default)]
    pub client_info: ClientInfo,
}

/// The work handed out to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    /// Identifier used for progress reports.
    pub task_id: String,
    /// The work itself.
    pub task: TaskPayload,
}

/// Kind-specific work description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPayload {
    /// Self-play.
    Training(TrainingPayload),
    /// A single game of candidate versus best network.
    Match(MatchPayload),
    /// Games for a sequential test.
    Sprt(SprtPayload),
    /// Games for parameter tuning.
    Tuning(TuningPayload),
}

/// Self-play work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingPayload {
    /// The engine to play with.
    pub engine: EngineConfiguration,
    /// Openings.
    pub opening_book: ResourceSpec,
    /// Search budget.
    pub nodes_per_move: u32,
}

/// A match game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchPayload {
    /// The current best network.
    pub baseline: EngineConfiguration,
    /// The network under test.
    pub candidate: EngineConfiguration,
    /// Openings.
    pub opening_book: ResourceSpec,
    /// Whether the candidate plays the other color.
    pub flip: bool,
    /// The game slot.
    pub game_id: MatchGameId,
}

/// Games for a sequential test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SprtPayload {
    /// The reference engine.
    pub baseline: EngineConfiguration,
    /// The engine under test.
    pub candidate: EngineConfiguration,
    /// Openings.
    pub opening_book: ResourceSpec,
    /// Time control.
    pub time_control: TimeControl,
}

/// Games for parameter tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningPayload {
    /// The engine being tuned.
    pub engine: EngineConfiguration,
    /// Openings.
    pub opening_book: ResourceSpec,
    /// Parameter sets that still need games.
    pub param_sets: Vec<TuningParamSet>,
}

/// A parameter set to play games with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningParamSet {
    /// The set's ID, reported back with results.
    pub id: u32,
    /// UCI options.
    pub parameters: BTreeMap<String, String>,
    /// Games still needed.
    pub games_remaining: u32,
}

/// A heartbeat, possibly carrying results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressReport {
    /// Bearer token.
    pub token: String,
    /// The identifier from [`TaskResponse`].
    pub task_id: String,
    /// Kind-specific progress.
    pub progress: Progress,
}

/// Kind-specific progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Progress {
    /// Self-play progress.
    Training(TrainingProgress),
    /// Match progress.
    Match(MatchProgress),
    /// Sequential test progress.
    Sprt(SprtProgress),
    /// Tuning progress.
    Tuning(TuningProgress),
}

impl Progress {
    /// The engine version of an attached upload, if any.
    #[must_use]
    pub fn engine_version(&self) -> Option<&str> {
        match self {
            Progress::Training(p) => p.game.as_ref().map(|g| g.engine_version.as_str()),
            Progress::Match(p) => p.game.as_ref().map(|g| g.engine_version.as_str()),
            Progress::Sprt(p) => p.engine_version.as_deref(),
            Progress::Tuning(p) => p.engine_version.as_deref(),
        }
    }

    /// Whether the report carries results.
    #[must_use]
    pub fn has_upload(&self) -> bool {
        match self {
            Progress::Training(p) => p.game.is_some(),
            Progress::Match(p) => p.game.is_some(),
            Progress::Sprt(p) => p.results.pairs() > 0,
            Progress::Tuning(p) => p.results.is_some(),
        }
    }
}

/// Self-play progress.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct TrainingProgress {
    /// A finished game.
    #[serde(default)]
    pub game: Option<TrainingGameUpload>,
}

/// A finished self-play game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingGameUpload {
    /// Content hash of the network that played the game.
    pub network_sha: String,
    /// Engine version that played the game.
    pub engine_version: String,
    /// Game record.
    #[serde(default)]
    pub pgn: Option<String>,
    /// Location of the uploaded training data.
    #[serde(default)]
    pub training_data_url: Option<String>,
}

/// Match progress.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MatchProgress {
    /// The finished game.
    #[serde(default)]
    pub game: Option<MatchGameUpload>,
}

/// A finished match game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchGameUpload {
    /// Result from the candidate's perspective.
    pub outcome: GameOutcome,
    /// Engine version that played the game.
    pub engine_version: String,
    /// Game record.
    #[serde(default)]
    pub pgn: Option<String>,
}

/// Sequential test progress.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SprtProgress {
    /// Game pairs finished since the last report.
    #[serde(default)]
    pub results: Pentanomial,
    /// Engine version that played the games.
    #[serde(default)]
    pub engine_version: Option<String>,
    /// Game records.
    #[serde(default)]
    pub pgn: Option<String>,
}

/// Tuning progress.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct TuningProgress {
    /// Results for one parameter set since the last report.
    #[serde(default)]
    pub results: Option<TuningResults>,
    /// Engine version that played the games.
    #[serde(default)]
    pub engine_version: Option<String>,
    /// Game records.
    #[serde(default)]
    pub pgn: Option<String>,
}

/// Results for one parameter set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TuningResults {
    /// The parameter set.
    pub param_set_id: u32,
    /// Wins.
    pub wins: u32,
    /// Losses.
    pub losses: u32,
    /// Draws.
    pub draws: u32,
}

/// Whether the client should keep working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressStatus {
    /// Keep working.
    Active,
    /// Stop.
    Cancelled,
}

/// Reply to a [`ProgressReport`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProgressResponse {
    /// Whether the client should keep working.
    pub status: ProgressStatus,
}

/// Exchange of legacy credentials for a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrateCredentialsRequest {
    /// Legacy login name.
    #[serde(default)]
    pub username: String,
    /// Legacy password.
    #[serde(default)]
    pub password: String,
}

/// Request for a token without credentials.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AnonymousTokenRequest {}

/// A freshly issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    /// Bearer token.
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_wire_format() {
        let report: ProgressReport = serde_json::from_value(serde_json::json!({
            "token": "lc0-abc",
            "task_id": "20240101T000000.000000001",
            "progress": {
                "match": {
                    "game": { "outcome": "win", "engine_version": "0.31.0" }
                }
            }
        }))
        .unwrap();

        assert!(report.progress.has_upload());
        assert_eq!(report.progress.engine_version(), Some("0.31.0"));
    }

    #[test]
    fn empty_heartbeat_has_no_upload() {
        let progress: Progress =
            serde_json::from_value(serde_json::json!({ "sprt": {} })).unwrap();
        assert!(!progress.has_upload());
        assert_eq!(progress.engine_version(), None);
    }
}
