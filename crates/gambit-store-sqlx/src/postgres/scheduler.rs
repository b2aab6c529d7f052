use async_trait::async_trait;
use gambit_common::{
    artifact::{Book, Network, TrainingRun},
    assignment::{AssignmentStatus, MatchGame, NewAssignment, TaskAssignment},
    task::{MatchTask, Task, TaskDetails, TaskKind, TaskStatus, TrainingTask},
    MatchGameId, NetworkId, TaskId, TrainingRunId, UnixNanos, UserId,
};
use gambit_scheduler::store::SchedulerStore;
use sqlx::{
    query,
    types::{time::OffsetDateTime, Json},
    Postgres, Row,
};

use super::rows::{
    assignment_from_row, book_from_row, db_id, network_from_row, task_from_row,
    training_run_from_row,
};
use crate::{DbStore, Error};

#[async_trait]
impl SchedulerStore for DbStore<Postgres> {
    type Error = Error;

    #[tracing::instrument(level = "debug", skip_all)]
    async fn active_training_run(&self) -> Result<Option<TrainingRun>, Self::Error> {
        query(
            r#"--sql
            SELECT * FROM "gambit"."training_runs"
            WHERE "active"
            ORDER BY "id"
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.db)
        .await?
        .as_ref()
        .map(training_run_from_row)
        .transpose()
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn training_task(
        &self,
        run_id: TrainingRunId,
    ) -> Result<Option<(TaskId, TrainingTask)>, Self::Error> {
        let Some(row) = query(
            r#"--sql
            SELECT "id", "details" FROM "gambit"."tasks"
            WHERE
                "kind" = 'training'
                AND "status" IN ('pending', 'active')
                AND ("details"->>'training_run_id')::BIGINT = $1
            ORDER BY "id"
            LIMIT 1
            "#,
        )
        .bind(db_id(run_id.0))
        .fetch_optional(&self.db)
        .await?
        else {
            return Ok(None);
        };

        let id = TaskId(row.try_get::<i64, _>("id")? as u64);
        match row.try_get::<Json<TaskDetails>, _>("details")?.0 {
            TaskDetails::Training(training) => Ok(Some((id, training))),
            _ => Err(Error::WrongKind(id, TaskKind::Training)),
        }
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn next_match(
        &self,
        training_task_id: TaskId,
        slice: u8,
        after: Option<TaskId>,
    ) -> Result<Option<(TaskId, MatchTask)>, Self::Error> {
        let Some(row) = query(
            r#"--sql
            SELECT "id", "details" FROM "gambit"."tasks"
            WHERE
                "kind" = 'match'
                AND "status" IN ('pending', 'active')
                AND ("details"->>'training_task_id')::BIGINT = $1
                AND NOT COALESCE(("details"->>'done')::BOOLEAN, FALSE)
                AND COALESCE(("details"->>'target_slice')::INTEGER, 0) IN (0, $2)
                AND ($3::BIGINT IS NULL OR "id" > $3)
            ORDER BY "id"
            LIMIT 1
            "#,
        )
        .bind(db_id(training_task_id.0))
        .bind(i32::from(slice))
        .bind(after.map(|id| db_id(id.0)))
        .fetch_optional(&self.db)
        .await?
        else {
            return Ok(None);
        };

        let id = TaskId(row.try_get::<i64, _>("id")? as u64);
        match row.try_get::<Json<TaskDetails>, _>("details")?.0 {
            TaskDetails::Match(m) => Ok(Some((id, m))),
            _ => Err(Error::WrongKind(id, TaskKind::Match)),
        }
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn next_evaluation_task(
        &self,
        kind: TaskKind,
        after: Option<TaskId>,
    ) -> Result<Option<Task>, Self::Error> {
        query(
            r#"--sql
            SELECT * FROM "gambit"."tasks"
            WHERE
                "kind" = $1
                AND "status" IN ('pending', 'active')
                AND ($2::BIGINT IS NULL OR "id" > $2)
            ORDER BY "id"
            LIMIT 1
            "#,
        )
        .bind(kind.as_str())
        .bind(after.map(|id| db_id(id.0)))
        .fetch_optional(&self.db)
        .await?
        .as_ref()
        .map(task_from_row)
        .transpose()
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn network(&self, id: NetworkId) -> Result<Option<Network>, Self::Error> {
        query(
            r#"--sql
            SELECT * FROM "gambit"."networks"
            WHERE "id" = $1
            "#,
        )
        .bind(db_id(id.0))
        .fetch_optional(&self.db)
        .await?
        .as_ref()
        .map(network_from_row)
        .transpose()
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn book(&self, sha256: &str) -> Result<Option<Book>, Self::Error> {
        query(
            r#"--sql
            SELECT * FROM "gambit"."books"
            WHERE "sha256" = $1
            "#,
        )
        .bind(sha256)
        .fetch_optional(&self.db)
        .await?
        .as_ref()
        .map(book_from_row)
        .transpose()
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn supersede_match(&self, task_id: TaskId, now: UnixNanos) -> Result<bool, Self::Error> {
        self.cancel_task_with_assignments(task_id, now).await
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn create_match_game(
        &self,
        match_task_id: TaskId,
        user_id: Option<UserId>,
    ) -> Result<Option<MatchGame>, Self::Error> {
        let mut tx = self.db.begin().await?;

        // Concurrent slot creation for the match waits on the task row.
        let task = super::lock_task(&mut tx, match_task_id).await?;
        let TaskDetails::Match(m) = &task.details else {
            return Err(Error::WrongKind(match_task_id, TaskKind::Match));
        };

        let in_flight: i64 = query(
            r#"--sql
            SELECT COUNT(*) FROM "gambit"."match_games" AS "g"
            WHERE
                "g"."match_task_id" = $1
                AND NOT "g"."done"
                AND NOT EXISTS (
                    SELECT 1 FROM "gambit"."task_assignments" AS "a"
                    WHERE "a"."match_game_id" = "g"."id" AND "a"."status" <> 'active'
                )
            "#,
        )
        .bind(db_id(match_task_id.0))
        .fetch_one(&mut *tx)
        .await?
        .try_get(0)?;

        if !m.has_room_for(u32::try_from(in_flight).unwrap_or(u32::MAX)) {
            return Ok(None);
        }

        // The color is derived from the ID in the same statement
        // that allocates it.
        let row = query(
            r#"--sql
            WITH "next" AS (
                SELECT nextval(pg_get_serial_sequence('"gambit"."match_games"', 'id')) AS "id"
            )
            INSERT INTO "gambit"."match_games" ("id", "match_task_id", "user_id", "flip")
            SELECT "id", $1, $2, "id" % 2 = 1 FROM "next"
            RETURNING "id", "flip"
            "#,
        )
        .bind(db_id(match_task_id.0))
        .bind(user_id.map(|id| db_id(id.0)))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(MatchGame {
            id: MatchGameId(row.try_get::<i64, _>("id")? as u64),
            match_task_id,
            user_id,
            done: false,
            flip: row.try_get("flip")?,
            result: None,
            pgn: None,
            engine_version: None,
        }))
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn insert_assignment(
        &self,
        assignment: NewAssignment,
    ) -> Result<TaskAssignment, Self::Error> {
        let mut tx = self.db.begin().await?;

        let mut task = super::lock_task(&mut tx, assignment.task_id).await?;

        // Unique indexes reject taken external IDs and match game slots.
        let row = query(
            r#"--sql
            INSERT INTO "gambit"."task_assignments" (
                "external_id",
                "task_id",
                "kind",
                "match_game_id",
                "token_id",
                "assigned_at",
                "last_heartbeat_at",
                "status"
            ) VALUES ($1, $2, $3, $4, $5, $6, $6, $7)
            RETURNING *
            "#,
        )
        .bind(&assignment.external_id)
        .bind(db_id(assignment.task_id.0))
        .bind(assignment.kind.as_str())
        .bind(assignment.match_game_id.map(|id| db_id(id.0)))
        .bind(db_id(assignment.token_id.0))
        .bind(OffsetDateTime::from(assignment.assigned_at))
        .bind(AssignmentStatus::Active.as_str())
        .fetch_one(&mut *tx)
        .await?;

        if task.status == TaskStatus::Pending
            && task.transition(TaskStatus::Active, assignment.assigned_at)
        {
            super::save_task(&mut tx, &task).await?;
        }

        tx.commit().await?;

        assignment_from_row(&row)
    }
}
