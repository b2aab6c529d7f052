//! Liveness and lifecycle tracking for Gambit.
//!
//! Clients prove they are alive with progress reports that may
//! carry results. The [`Tracker`] accumulates results, adjudicates
//! matches and sequential tests, and tells clients whether to keep
//! working. The [`Reaper`] cancels assignments of clients that
//! stopped reporting.

#![warn(clippy::pedantic, missing_docs)]
#![allow(clippy::module_name_repetitions)]

use gambit_common::{
    status::Code,
    task::TaskKind,
    version::Version,
    TaskId,
};

mod reaper;
pub mod store;
mod tracker;

pub use reaper::{Reaper, ReaperOptions};
pub use tracker::Tracker;

use store::Completion;

/// Tracker options.
#[derive(Debug, Clone)]
pub struct TrackerOptions {
    /// Uploads from clients below this version are rejected.
    pub min_client_version: Option<Version>,
    /// Uploads played by engines below this version are rejected.
    pub min_engine_version: Option<Version>,
    /// A candidate passes a match if its Elo estimate is at least this.
    pub pass_threshold_elo: f64,
    /// Type I error rate of SPRT tasks without their own.
    pub sprt_alpha: f64,
    /// Type II error rate of SPRT tasks without their own.
    pub sprt_beta: f64,
    /// SPRT and tuning results must carry game records.
    pub require_game_records: bool,
    /// Capacity of the event channel.
    pub event_capacity: usize,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            min_client_version: None,
            min_engine_version: None,
            pass_threshold_elo: 0.0,
            sprt_alpha: 0.05,
            sprt_beta: 0.05,
            require_game_records: false,
            event_capacity: 1024,
        }
    }
}

/// An event emitted by the tracker.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    /// A task moved to DONE, emitted exactly once per task.
    TaskCompleted {
        /// The task.
        task_id: TaskId,
        /// Kind of the task.
        kind: TaskKind,
        /// Completion details.
        completion: Completion,
    },
    /// A task was cancelled by an operator.
    TaskCancelled(TaskId),
}

/// Tracker errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No task is known under the identifier, or it belongs
    /// to another caller.
    #[error("task not found")]
    UnknownTask,
    /// The progress does not match the kind of the assigned task.
    #[error("expected {expected} progress, got {got}")]
    KindMismatch {
        /// Kind of the assigned task.
        expected: TaskKind,
        /// Kind of the progress.
        got: TaskKind,
    },
    /// The client version is missing or unparseable.
    #[error("invalid client version `{0}`")]
    InvalidClientVersion(String),
    /// The client is too old to upload results.
    #[error("client version {version} is below the minimum {minimum}")]
    ClientVersionTooOld {
        /// Reported version.
        version: Version,
        /// Required version.
        minimum: Version,
    },
    /// The engine version is missing or unparseable.
    #[error("invalid engine version `{0}`")]
    InvalidEngineVersion(String),
    /// The engine is too old to upload results.
    #[error("engine version {version} is below the minimum {minimum}")]
    EngineVersionTooOld {
        /// Reported version.
        version: Version,
        /// Required version.
        minimum: Version,
    },
    /// Results were uploaded without game records.
    #[error("game records are required")]
    MissingGameRecord,
    /// The uploaded game was played with an unknown network.
    #[error("unknown network {0}")]
    UnknownNetwork(String),
    /// The parameter set does not belong to the task.
    #[error("unknown parameter set {0}")]
    UnknownParamSet(u32),
    /// Stored state violates an invariant.
    #[error("invariant violated: {0}")]
    Invariant(&'static str),
    /// SPRT evaluation failed.
    #[error(transparent)]
    Sprt(#[from] gambit_sprt::Error),
    /// A store error ocurred.
    #[error("store error: {0:?}")]
    Store(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// The client-visible category of the error.
    #[must_use]
    pub fn code(&self) -> Code {
        match self {
            Error::UnknownTask => Code::NotFound,
            Error::KindMismatch { .. }
            | Error::InvalidClientVersion(_)
            | Error::ClientVersionTooOld { .. }
            | Error::InvalidEngineVersion(_)
            | Error::EngineVersionTooOld { .. }
            | Error::MissingGameRecord
            | Error::UnknownNetwork(_)
            | Error::UnknownParamSet(_) => Code::InvalidArgument,
            Error::Invariant(_) => Code::FailedPrecondition,
            Error::Sprt(error) => error.code(),
            Error::Store(_) => Code::Internal,
        }
    }
}

fn store_error<E: std::error::Error + Send + Sync + 'static>(error: E) -> Error {
    Error::Store(Box::new(error))
}
