//! Gambit in-memory store that does not persist anything.
//!
//! All state lives behind a single lock, so every store operation
//! is atomic with respect to every other one.

#![warn(clippy::pedantic, missing_docs)]
#![allow(clippy::manual_let_else, clippy::module_name_repetitions)]

use std::{collections::VecDeque, sync::Arc};

use ahash::AHashMap;
use gambit_common::{
    artifact::{Book, Network, TrainingRun},
    assignment::{AssignmentStatus, MatchGame, TaskAssignment},
    identity::{AuthToken, LegacyUser},
    task::{Task, TaskDetails, TaskKind, TaskStatus},
    AssignmentId, MatchGameId, NetworkId, TaskId, TokenId, TrainingRunId, UnixNanos,
};
use gambit_tracker::store::NewGameRecord;
use indexmap::IndexMap;
use parking_lot::Mutex;
use thiserror::Error;

mod identity;
mod scheduler;
mod tracker;

/// Store options.
#[derive(Debug)]
pub struct MemoryStoreOptions {
    /// Number of uploaded game records kept, older ones are dropped.
    pub game_record_capacity: usize,
}

impl Default for MemoryStoreOptions {
    fn default() -> Self {
        Self {
            game_record_capacity: 65536,
        }
    }
}

/// An in-memory store for Gambit.
#[derive(Debug, Clone)]
#[must_use]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Creates a new [`MemoryStore`].
    pub fn new() -> Self {
        Self::new_with_options(MemoryStoreOptions::default())
    }

    /// Creates a new [`MemoryStore`] with the given options.
    #[allow(clippy::needless_pass_by_value)]
    pub fn new_with_options(options: MemoryStoreOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                game_record_capacity: options.game_record_capacity,
                state: Mutex::default(),
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct Inner {
    game_record_capacity: usize,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    last_task_id: u64,
    last_match_game_id: u64,
    last_assignment_id: u64,
    last_token_id: u64,

    training_runs: IndexMap<TrainingRunId, TrainingRun>,
    networks: IndexMap<NetworkId, Network>,
    books: IndexMap<String, Book>,
    tasks: IndexMap<TaskId, Task>,
    match_games: IndexMap<MatchGameId, MatchGame>,
    assignments: IndexMap<AssignmentId, TaskAssignment>,
    assignments_by_external_id: AHashMap<String, AssignmentId>,
    tokens: IndexMap<TokenId, AuthToken>,
    tokens_by_value: AHashMap<String, TokenId>,
    legacy_users: AHashMap<String, LegacyUser>,
    game_records: VecDeque<NewGameRecord>,
}

impl State {
    fn task_mut(&mut self, task_id: TaskId) -> Result<&mut Task, Error> {
        self.tasks
            .get_mut(&task_id)
            .ok_or(Error::TaskNotFound(task_id))
    }

    fn cancel_task(&mut self, task_id: TaskId, now: UnixNanos) -> Result<bool, Error> {
        if !self.task_mut(task_id)?.transition(TaskStatus::Cancelled, now) {
            return Ok(false);
        }

        for assignment in self
            .assignments
            .values_mut()
            .filter(|a| a.task_id == task_id && a.is_active())
        {
            assignment.status = AssignmentStatus::Cancelled;
            assignment.cancelled_at = Some(now);
        }

        Ok(true)
    }

    fn has_active_assignment(&self, task_id: TaskId) -> bool {
        self.assignments
            .values()
            .any(|a| a.task_id == task_id && a.is_active())
    }
}

impl MemoryStore {
    /// Add or replace a training run.
    pub fn add_training_run(&self, run: TrainingRun) {
        self.inner.state.lock().training_runs.insert(run.id, run);
    }

    /// Change the best network of a training run.
    ///
    /// # Errors
    ///
    /// Fails if the run does not exist.
    pub fn set_best_network(
        &self,
        run_id: TrainingRunId,
        network_id: NetworkId,
    ) -> Result<(), Error> {
        let mut state = self.inner.state.lock();
        let run = state
            .training_runs
            .get_mut(&run_id)
            .ok_or(Error::TrainingRunNotFound(run_id))?;
        run.best_network_id = network_id;
        Ok(())
    }

    /// Add or replace a network.
    pub fn add_network(&self, network: Network) {
        self.inner.state.lock().networks.insert(network.id, network);
    }

    /// Return a network.
    #[must_use]
    pub fn get_network(&self, id: NetworkId) -> Option<Network> {
        self.inner.state.lock().networks.get(&id).cloned()
    }

    /// Add or replace a book.
    pub fn add_book(&self, book: Book) {
        self.inner
            .state
            .lock()
            .books
            .insert(book.sha256.clone(), book);
    }

    /// Add a user of the legacy credential store.
    pub fn add_legacy_user(&self, user: LegacyUser) {
        self.inner
            .state
            .lock()
            .legacy_users
            .insert(user.username.clone(), user);
    }

    /// Add a new pending task and return its ID.
    pub fn add_task(&self, description: impl Into<String>, details: TaskDetails) -> TaskId {
        let mut state = self.inner.state.lock();
        state.last_task_id += 1;
        let id = TaskId(state.last_task_id);
        let now = UnixNanos::now();
        state.tasks.insert(
            id,
            Task {
                id,
                created_at: now,
                updated_at: now,
                status: TaskStatus::Pending,
                description: description.into(),
                details,
            },
        );
        tracing::debug!(task_id = %id, "task added");
        id
    }

    /// Return a task.
    #[must_use]
    pub fn get_task(&self, id: TaskId) -> Option<Task> {
        self.inner.state.lock().tasks.get(&id).cloned()
    }

    /// Return the game slots of a match.
    #[must_use]
    pub fn match_games(&self, match_task_id: TaskId) -> Vec<MatchGame> {
        self.inner
            .state
            .lock()
            .match_games
            .values()
            .filter(|game| game.match_task_id == match_task_id)
            .cloned()
            .collect()
    }

    /// Return the assignments of a task.
    #[must_use]
    pub fn assignments(&self, task_id: TaskId) -> Vec<TaskAssignment> {
        self.inner
            .state
            .lock()
            .assignments
            .values()
            .filter(|a| a.task_id == task_id)
            .cloned()
            .collect()
    }

    /// Overwrite the heartbeat of an assignment.
    ///
    /// # Errors
    ///
    /// Fails if the assignment does not exist.
    pub fn set_last_heartbeat(&self, external_id: &str, at: UnixNanos) -> Result<(), Error> {
        let mut state = self.inner.state.lock();
        let id = *state
            .assignments_by_external_id
            .get(external_id)
            .ok_or_else(|| Error::AssignmentNotFound(external_id.to_string()))?;
        if let Some(assignment) = state.assignments.get_mut(&id) {
            assignment.last_heartbeat_at = at;
        }
        Ok(())
    }

    /// Return the stored game records, oldest first.
    #[must_use]
    pub fn game_records(&self) -> Vec<NewGameRecord> {
        self.inner
            .state
            .lock()
            .game_records
            .iter()
            .cloned()
            .collect()
    }

    /// Return a token by its value.
    #[must_use]
    pub fn get_token(&self, token: &str) -> Option<AuthToken> {
        let state = self.inner.state.lock();
        state
            .tokens_by_value
            .get(token)
            .and_then(|id| state.tokens.get(id))
            .cloned()
    }
}

/// Errors returned by the memory store.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested task was not found.
    #[error("task was not found with id `{0}`")]
    TaskNotFound(TaskId),
    /// The task has a different kind.
    #[error("task `{0}` is not a {1} task")]
    WrongKind(TaskId, TaskKind),
    /// The requested training run was not found.
    #[error("training run was not found with id `{0}`")]
    TrainingRunNotFound(TrainingRunId),
    /// The requested match game was not found.
    #[error("match game was not found with id `{0}`")]
    MatchGameNotFound(MatchGameId),
    /// The requested assignment was not found.
    #[error("assignment was not found with id `{0}`")]
    AssignmentNotFound(String),
    /// The requested token was not found.
    #[error("token was not found with id `{0}`")]
    TokenNotFound(TokenId),
    /// The external assignment ID is already taken.
    #[error("assignment id `{0}` is already in use")]
    DuplicateAssignment(String),
    /// The match game slot is already assigned.
    #[error("match game `{0}` already has an active assignment")]
    MatchGameTaken(MatchGameId),
    /// The token value is already taken.
    #[error("token already exists")]
    DuplicateToken,
    /// The parameter set does not belong to the task.
    #[error("parameter set `{1}` was not found in task `{0}`")]
    ParamSetNotFound(TaskId, u32),
}
