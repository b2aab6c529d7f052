//! Backend store required by the scheduler.

use async_trait::async_trait;
use gambit_common::{
    artifact::{Book, Network, TrainingRun},
    assignment::{MatchGame, NewAssignment, TaskAssignment},
    task::{MatchTask, Task, TaskKind, TrainingTask},
    NetworkId, TaskId, TrainingRunId, UnixNanos, UserId,
};

/// A store interface for the scheduler.
#[async_trait]
pub trait SchedulerStore: Send + Sync {
    /// An error type returned by operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Return the active training run with the lowest ID.
    async fn active_training_run(&self) -> Result<Option<TrainingRun>, Self::Error>;

    /// Return the oldest unfinished training task of a run.
    async fn training_task(
        &self,
        run_id: TrainingRunId,
    ) -> Result<Option<(TaskId, TrainingTask)>, Self::Error>;

    /// Return the oldest unfinished match of a training task that
    /// accepts the given slice and has an ID greater than `after`.
    async fn next_match(
        &self,
        training_task_id: TaskId,
        slice: u8,
        after: Option<TaskId>,
    ) -> Result<Option<(TaskId, MatchTask)>, Self::Error>;

    /// Return the oldest unfinished task of the given evaluation
    /// kind with an ID greater than `after`.
    async fn next_evaluation_task(
        &self,
        kind: TaskKind,
        after: Option<TaskId>,
    ) -> Result<Option<Task>, Self::Error>;

    /// Return a network.
    async fn network(&self, id: NetworkId) -> Result<Option<Network>, Self::Error>;

    /// Return a book by its content hash.
    async fn book(&self, sha256: &str) -> Result<Option<Book>, Self::Error>;

    /// Cancel a match that was superseded by a newer best network.
    ///
    /// Returns `false` if the match was already finished.
    async fn supersede_match(&self, task_id: TaskId, now: UnixNanos) -> Result<bool, Self::Error>;

    /// Create a new game slot for a match.
    ///
    /// The slot's ID and its derived flip must be assigned
    /// atomically, concurrent calls never return the same slot.
    ///
    /// Slots still being played are unreported slots without a
    /// cancelled assignment. Returns `None` if the reported games
    /// and the slots still being played already cover the game cap.
    async fn create_match_game(
        &self,
        match_task_id: TaskId,
        user_id: Option<UserId>,
    ) -> Result<Option<MatchGame>, Self::Error>;

    /// Persist an assignment and mark its task as active
    /// if it was pending.
    ///
    /// At most one active assignment may exist for a match game slot.
    async fn insert_assignment(
        &self,
        assignment: NewAssignment,
    ) -> Result<TaskAssignment, Self::Error>;
}
