//! Gambit task orchestration server.
//!
//! Volunteer clients authenticate with a bearer token, ask for work,
//! and report progress until they are told to stop. This crate wires
//! the components together behind [`TaskService`] and [`AuthService`].
#![warn(clippy::pedantic, missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub use gambit_common as common;
pub use gambit_common::status::Code;
pub use gambit_identity::{IdentityValidator, TokenIssuer};
pub use gambit_scheduler::{Scheduler, SchedulerOptions};
pub use gambit_sprt as sprt;
#[cfg(feature = "store-memory")]
pub use gambit_store_memory::{MemoryStore, MemoryStoreOptions};
#[cfg(feature = "store-sqlx-postgres")]
pub use gambit_store_sqlx::{DbStore, DbStoreOptions};
pub use gambit_tracker::{Reaper, ReaperOptions, Tracker, TrackerEvent, TrackerOptions};

pub mod config;
mod service;
mod status;

/// Store interfaces of the components.
pub mod store {
    pub use gambit_identity::store::IdentityStore;
    pub use gambit_scheduler::store::SchedulerStore;
    pub use gambit_tracker::store::{Completion, MatchGameResult, NewGameRecord, TrackerStore};
}

pub use service::{AuthService, GambitStore, TaskService};
pub use status::Status;
