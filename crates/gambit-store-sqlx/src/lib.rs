//! SQLx-based backend for Gambit that persists all state in a supported SQL database.

#![warn(clippy::pedantic, missing_docs)]
#![allow(
    clippy::too_many_lines,
    clippy::needless_raw_string_hashes,
    clippy::module_name_repetitions
)]

use gambit_common::{
    status::UnexpectedValueError, task::TaskKind, AssignmentId, MatchGameId, TaskId, TokenId,
};
use sqlx::{Database, Pool};
use thiserror::Error;

#[cfg(feature = "postgres")]
pub mod postgres;

/// Store options.
#[derive(Debug, Clone)]
pub struct DbStoreOptions {
    /// Apply pending migrations when the store is created.
    pub migrate: bool,
}

impl Default for DbStoreOptions {
    fn default() -> Self {
        Self { migrate: true }
    }
}

/// A store backed by a database pool.
#[derive(Debug)]
pub struct DbStore<Db>
where
    Db: Database,
{
    options: DbStoreOptions,
    db: Pool<Db>,
}

impl<Db> Clone for DbStore<Db>
where
    Db: Database,
{
    fn clone(&self) -> Self {
        Self {
            options: self.options.clone(),
            db: self.db.clone(),
        }
    }
}

/// Errors returned by the database store.
#[derive(Debug, Error)]
pub enum Error {
    /// The database returned an error.
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    /// A stored value could not be interpreted.
    #[error(transparent)]
    UnexpectedValue(#[from] UnexpectedValueError),
    /// The requested task was not found.
    #[error("task was not found with id `{0}`")]
    TaskNotFound(TaskId),
    /// The task has a different kind.
    #[error("task `{0}` is not a {1} task")]
    WrongKind(TaskId, TaskKind),
    /// The requested match game was not found.
    #[error("match game was not found with id `{0}`")]
    MatchGameNotFound(MatchGameId),
    /// The requested assignment was not found.
    #[error("assignment was not found with id `{0}`")]
    AssignmentNotFound(AssignmentId),
    /// The requested token was not found.
    #[error("token was not found with id `{0}`")]
    TokenNotFound(TokenId),
    /// The parameter set does not belong to the task.
    #[error("parameter set `{1}` was not found in task `{0}`")]
    ParamSetNotFound(TaskId, u32),
}
