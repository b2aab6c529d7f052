//! Bindings between tasks and the clients executing them.

use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    status::UnexpectedValueError,
    task::{GameOutcome, TaskKind},
    AssignmentId, MatchGameId, TaskId, TokenId, UnixNanos, UserId,
};

/// Status of a single assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    /// The client is expected to work on the task.
    Active,
    /// The client should stop.
    Cancelled,
    /// The client finished its work.
    Done,
}

impl AssignmentStatus {
    /// Return a string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Active => "active",
            AssignmentStatus::Cancelled => "cancelled",
            AssignmentStatus::Done => "done",
        }
    }
}

impl Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssignmentStatus {
    type Err = UnexpectedValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "active" => AssignmentStatus::Active,
            "cancelled" => AssignmentStatus::Cancelled,
            "done" => AssignmentStatus::Done,
            _ => Err(UnexpectedValueError(s.to_string()))?,
        })
    }
}

/// A task handed out to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignment {
    /// Internal ID.
    pub id: AssignmentId,
    /// The identifier returned to the client.
    pub external_id: String,
    /// The assigned task.
    pub task_id: TaskId,
    /// Kind of the assigned task.
    pub kind: TaskKind,
    /// The game slot for match assignments.
    pub match_game_id: Option<MatchGameId>,
    /// The token of the client.
    pub token_id: TokenId,
    /// Assignment time.
    pub assigned_at: UnixNanos,
    /// Time of the last progress report.
    pub last_heartbeat_at: UnixNanos,
    /// Status.
    pub status: AssignmentStatus,
    /// Cancellation time.
    pub cancelled_at: Option<UnixNanos>,
    /// Completion time.
    pub completed_at: Option<UnixNanos>,
}

impl TaskAssignment {
    /// Whether the assignment is still running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == AssignmentStatus::Active
    }

    /// Whether the last heartbeat happened before the cutoff.
    #[must_use]
    pub fn is_stale(&self, cutoff: UnixNanos) -> bool {
        self.is_active() && self.last_heartbeat_at < cutoff
    }
}

/// Input for creating a [`TaskAssignment`].
#[derive(Debug, Clone)]
pub struct NewAssignment {
    /// The identifier returned to the client.
    pub external_id: String,
    /// The assigned task.
    pub task_id: TaskId,
    /// Kind of the assigned task.
    pub kind: TaskKind,
    /// The game slot for match assignments.
    pub match_game_id: Option<MatchGameId>,
    /// The token of the client.
    pub token_id: TokenId,
    /// Assignment time, also the initial heartbeat.
    pub assigned_at: UnixNanos,
}

/// A single game slot of a match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchGame {
    /// The slot's ID.
    pub id: MatchGameId,
    /// The match task.
    pub match_task_id: TaskId,
    /// The owning legacy user, if the token has one.
    pub user_id: Option<UserId>,
    /// Whether a result was reported.
    pub done: bool,
    /// Whether the candidate plays the other color.
    pub flip: bool,
    /// The reported result.
    pub result: Option<GameOutcome>,
    /// Game record.
    pub pgn: Option<String>,
    /// Engine version that played the game.
    pub engine_version: Option<String>,
}

impl MatchGame {
    /// The color assignment derived from the slot's ID, odd IDs are flipped.
    #[must_use]
    pub fn flip_for(id: MatchGameId) -> bool {
        id.0 % 2 == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flip_follows_parity() {
        for id in 0..1000 {
            assert_eq!(MatchGame::flip_for(MatchGameId(id)), id & 1 == 1);
        }
    }

    #[test]
    fn only_active_assignments_go_stale() {
        let mut assignment = TaskAssignment {
            id: AssignmentId(1),
            external_id: "x".into(),
            task_id: TaskId(1),
            kind: TaskKind::Training,
            match_game_id: None,
            token_id: TokenId(1),
            assigned_at: UnixNanos(10),
            last_heartbeat_at: UnixNanos(10),
            status: AssignmentStatus::Active,
            cancelled_at: None,
            completed_at: None,
        };
        assert!(assignment.is_stale(UnixNanos(11)));
        assert!(!assignment.is_stale(UnixNanos(10)));
        assignment.status = AssignmentStatus::Cancelled;
        assert!(!assignment.is_stale(UnixNanos(11)));
    }
}
