//! Backend store required by the tracker.
//!
//! Every mutation is a single atomic operation of the store,
//! concurrent reports must never lose tally updates. Uploaded
//! records are saved before the tallies they carry are added,
//! a failed save leaves the tallies untouched.

use async_trait::async_trait;
use gambit_common::{
    assignment::TaskAssignment,
    payload::TuningResults,
    task::{EloInterval, GameOutcome, MatchTask, Pentanomial, SprtTask, Task, TaskKind, TuneTask},
    AssignmentId, MatchGameId, TaskId, TokenId, UnixNanos,
};

/// A store interface for the tracker.
#[async_trait]
pub trait TrackerStore: Send + Sync {
    /// An error type returned by operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Look up an assignment by the identifier returned to the client.
    async fn assignment(&self, external_id: &str) -> Result<Option<TaskAssignment>, Self::Error>;

    /// Update the heartbeat of an assignment.
    async fn touch_assignment(&self, id: AssignmentId, now: UnixNanos) -> Result<(), Self::Error>;

    /// Return a task.
    async fn task(&self, id: TaskId) -> Result<Option<Task>, Self::Error>;

    /// Store the result of a match game slot and add it to the
    /// match tally.
    ///
    /// Returns `None` without changes if the slot already has a result.
    async fn record_match_game(
        &self,
        match_game_id: MatchGameId,
        result: MatchGameResult,
    ) -> Result<Option<MatchTask>, Self::Error>;

    /// Add game pair results to an SPRT task.
    ///
    /// Returns the updated task, or `None` without changes if the
    /// task is already finished.
    async fn add_sprt_results(
        &self,
        task_id: TaskId,
        delta: &Pentanomial,
        now: UnixNanos,
    ) -> Result<Option<SprtTask>, Self::Error>;

    /// Store the most recent LLR and Elo estimate of an SPRT task.
    async fn update_sprt_estimate(
        &self,
        task_id: TaskId,
        llr: f64,
        elo: EloInterval,
    ) -> Result<(), Self::Error>;

    /// Add results to a parameter set of a tuning task.
    ///
    /// Returns the updated task, or `None` without changes if the
    /// task is already finished.
    async fn record_tune_results(
        &self,
        task_id: TaskId,
        results: TuningResults,
        now: UnixNanos,
    ) -> Result<Option<TuneTask>, Self::Error>;

    /// Persist an uploaded game record.
    async fn save_game_record(&self, record: NewGameRecord) -> Result<(), Self::Error>;

    /// Whether a network has the given hash.
    async fn network_exists(&self, sha: &str) -> Result<bool, Self::Error>;

    /// Increment the cached game counter of a network.
    ///
    /// Returns `false` if no network has the given hash.
    async fn increment_network_games(&self, sha: &str) -> Result<bool, Self::Error>;

    /// Move a task to DONE and store the completion details.
    ///
    /// Returns `true` only for the call that performed the transition,
    /// calls for finished tasks change nothing.
    async fn complete_task(
        &self,
        task_id: TaskId,
        completion: Completion,
        now: UnixNanos,
    ) -> Result<bool, Self::Error>;

    /// Mark an assignment as done.
    async fn complete_assignment(&self, id: AssignmentId, now: UnixNanos)
        -> Result<(), Self::Error>;

    /// Cancel a task and all of its active assignments.
    ///
    /// Returns `false` if the task was already finished.
    async fn cancel_task(&self, task_id: TaskId, now: UnixNanos) -> Result<bool, Self::Error>;

    /// Cancel every active assignment whose last heartbeat is older
    /// than `cutoff`, and return active tasks left without an active
    /// assignment to PENDING.
    ///
    /// Returns the cancelled assignments.
    async fn reap_stale_assignments(
        &self,
        cutoff: UnixNanos,
        now: UnixNanos,
    ) -> Result<Vec<TaskAssignment>, Self::Error>;
}

/// The result of a single match game.
#[derive(Debug, Clone)]
pub struct MatchGameResult {
    /// Result from the candidate's perspective.
    pub outcome: GameOutcome,
    /// Game record.
    pub pgn: Option<String>,
    /// Engine version that played the game.
    pub engine_version: String,
    /// Report time.
    pub reported_at: UnixNanos,
}

/// An uploaded game record.
#[derive(Debug, Clone)]
pub struct NewGameRecord {
    /// The task the game was played for.
    pub task_id: TaskId,
    /// Kind of the task.
    pub kind: TaskKind,
    /// The assignment the game was played for.
    pub assignment_id: AssignmentId,
    /// The uploading token.
    pub token_id: TokenId,
    /// Engine version that played the game.
    pub engine_version: Option<String>,
    /// Game record.
    pub pgn: Option<String>,
    /// Location of training data.
    pub training_data_url: Option<String>,
    /// The network of training games.
    pub network_sha: Option<String>,
    /// Upload time.
    pub created_at: UnixNanos,
}

/// Details stored when a task completes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Completion {
    /// A match reached its game cap.
    Match {
        /// Whether the candidate passed.
        passed: bool,
        /// Elo estimate of the candidate.
        elo: EloInterval,
    },
    /// An SPRT reached a verdict.
    Sprt {
        /// Whether the alternative hypothesis was accepted.
        passed: bool,
    },
    /// Every parameter set of a tuning task played its games.
    Tune,
}
