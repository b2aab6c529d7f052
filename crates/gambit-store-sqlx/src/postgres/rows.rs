use gambit_common::{
    artifact::{Book, Network, TrainingRun},
    assignment::TaskAssignment,
    identity::{AuthToken, LegacyUser},
    task::{Task, TaskDetails},
    AssignmentId, MatchGameId, NetworkId, TaskId, TokenId, TrainingRunId, UnixNanos, UserId,
};
use sqlx::{
    postgres::PgRow,
    types::{time::OffsetDateTime, Json},
    Row,
};

use crate::Error;

pub(super) fn db_id(id: u64) -> i64 {
    id as i64
}

fn timestamp(row: &PgRow, column: &str) -> Result<UnixNanos, sqlx::Error> {
    Ok(row.try_get::<OffsetDateTime, _>(column)?.into())
}

fn optional_timestamp(row: &PgRow, column: &str) -> Result<Option<UnixNanos>, sqlx::Error> {
    Ok(row
        .try_get::<Option<OffsetDateTime>, _>(column)?
        .map(Into::into))
}

pub(super) fn task_from_row(row: &PgRow) -> Result<Task, Error> {
    Ok(Task {
        id: TaskId(row.try_get::<i64, _>("id")? as u64),
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
        status: row.try_get::<&str, _>("status")?.parse()?,
        description: row.try_get("description")?,
        details: row.try_get::<Json<TaskDetails>, _>("details")?.0,
    })
}

pub(super) fn training_run_from_row(row: &PgRow) -> Result<TrainingRun, Error> {
    Ok(TrainingRun {
        id: TrainingRunId(row.try_get::<i64, _>("id")? as u64),
        description: row.try_get("description")?,
        active: row.try_get("active")?,
        best_network_id: NetworkId(row.try_get::<i64, _>("best_network_id")? as u64),
    })
}

pub(super) fn network_from_row(row: &PgRow) -> Result<Network, Error> {
    Ok(Network {
        id: NetworkId(row.try_get::<i64, _>("id")? as u64),
        training_run_id: TrainingRunId(row.try_get::<i64, _>("training_run_id")? as u64),
        network_number: row.try_get::<i32, _>("network_number")? as u32,
        sha: row.try_get("sha")?,
        path: row.try_get("path")?,
        size_bytes: row.try_get::<i64, _>("size_bytes")? as u64,
        layers: row.try_get::<i32, _>("layers")? as u32,
        filters: row.try_get::<i32, _>("filters")? as u32,
        games_played: row.try_get::<i64, _>("games_played")? as u64,
        elo: row.try_get("elo")?,
        anchor: row.try_get("anchor")?,
        elo_set: row.try_get("elo_set")?,
    })
}

pub(super) fn book_from_row(row: &PgRow) -> Result<Book, Error> {
    Ok(Book {
        sha256: row.try_get("sha256")?,
        url: row.try_get("url")?,
        size_bytes: row.try_get::<i64, _>("size_bytes")? as u64,
        format: row.try_get("format")?,
    })
}

pub(super) fn token_from_row(row: &PgRow) -> Result<AuthToken, Error> {
    Ok(AuthToken {
        id: TokenId(row.try_get::<i64, _>("id")? as u64),
        user_id: row
            .try_get::<Option<i64>, _>("user_id")?
            .map(|id| UserId(id as u64)),
        token: row.try_get("token")?,
        created_at: timestamp(row, "created_at")?,
        last_used_at: optional_timestamp(row, "last_used_at")?,
        issued_reason: row.try_get::<&str, _>("issued_reason")?.parse()?,
        client_version: row.try_get("client_version")?,
        client_host: row.try_get("client_host")?,
        gpu_type: row.try_get("gpu_type")?,
        gpu_id: row.try_get("gpu_id")?,
    })
}

pub(super) fn legacy_user_from_row(row: &PgRow) -> Result<LegacyUser, Error> {
    Ok(LegacyUser {
        id: UserId(row.try_get::<i64, _>("id")? as u64),
        username: row.try_get("username")?,
        password: row.try_get("password")?,
    })
}

pub(super) fn assignment_from_row(row: &PgRow) -> Result<TaskAssignment, Error> {
    Ok(TaskAssignment {
        id: AssignmentId(row.try_get::<i64, _>("id")? as u64),
        external_id: row.try_get("external_id")?,
        task_id: TaskId(row.try_get::<i64, _>("task_id")? as u64),
        kind: row.try_get::<&str, _>("kind")?.parse()?,
        match_game_id: row
            .try_get::<Option<i64>, _>("match_game_id")?
            .map(|id| MatchGameId(id as u64)),
        token_id: TokenId(row.try_get::<i64, _>("token_id")? as u64),
        assigned_at: timestamp(row, "assigned_at")?,
        last_heartbeat_at: timestamp(row, "last_heartbeat_at")?,
        status: row.try_get::<&str, _>("status")?.parse()?,
        cancelled_at: optional_timestamp(row, "cancelled_at")?,
        completed_at: optional_timestamp(row, "completed_at")?,
    })
}
