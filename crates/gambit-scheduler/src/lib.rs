//! Assignment scheduler for Gambit.
//!
//! The scheduler answers "what should I work on next?" for a
//! validated caller, records the assignment and returns a payload
//! with every artifact resolved to a [`ResourceSpec`](gambit_common::payload::ResourceSpec).

#![warn(clippy::pedantic, missing_docs)]
#![allow(clippy::module_name_repetitions)]

use gambit_common::{status::Code, NetworkId, TrainingRunId};

mod scheduler;
pub mod store;
pub mod task_id;

pub use scheduler::{slice_for, Scheduler, NETWORK_FORMAT};

/// Scheduler options.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Base URL of network files, the URL of a network is `{base}/{sha}`.
    pub network_location: String,
    /// Search budget of training games without their own.
    pub nodes_per_move: u32,
    /// Hand out SPRT and tuning tasks.
    pub assign_evaluation_tasks: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            network_location: String::new(),
            nodes_per_move: 8000,
            assign_evaluation_tasks: true,
        }
    }
}

/// Scheduler errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No training run is active.
    #[error("no active training run")]
    NoActiveRun,
    /// The active run has no unfinished training task.
    #[error("training run {0} has no open training task")]
    NoTrainingTask(TrainingRunId),
    /// A network referenced by the run is missing.
    #[error("network {0} not found")]
    MissingNetwork(NetworkId),
    /// A book referenced by the run is missing.
    #[error("book {0} not found")]
    MissingBook(String),
    /// A store error ocurred.
    #[error("store error: {0:?}")]
    Store(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// The client-visible category of the error.
    #[must_use]
    pub fn code(&self) -> Code {
        match self {
            Error::NoActiveRun | Error::NoTrainingTask(_) => Code::Unavailable,
            Error::MissingNetwork(_) | Error::MissingBook(_) | Error::Store(_) => Code::Internal,
        }
    }
}
