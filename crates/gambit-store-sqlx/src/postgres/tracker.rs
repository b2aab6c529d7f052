use async_trait::async_trait;
use gambit_common::{
    assignment::TaskAssignment,
    payload::TuningResults,
    task::{
        EloInterval, MatchTask, Pentanomial, SprtTask, Task, TaskDetails, TaskKind, TaskStatus,
        TuneTask,
    },
    AssignmentId, MatchGameId, TaskId, UnixNanos,
};
use gambit_tracker::store::{Completion, MatchGameResult, NewGameRecord, TrackerStore};
use sqlx::{query, types::time::OffsetDateTime, Postgres, Row};

use super::{
    lock_task,
    rows::{assignment_from_row, db_id, task_from_row},
    save_task,
};
use crate::{DbStore, Error};

#[async_trait]
impl TrackerStore for DbStore<Postgres> {
    type Error = Error;

    #[tracing::instrument(level = "debug", skip_all)]
    async fn assignment(&self, external_id: &str) -> Result<Option<TaskAssignment>, Self::Error> {
        query(
            r#"--sql
            SELECT * FROM "gambit"."task_assignments"
            WHERE "external_id" = $1
            "#,
        )
        .bind(external_id)
        .fetch_optional(&self.db)
        .await?
        .as_ref()
        .map(assignment_from_row)
        .transpose()
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn touch_assignment(&self, id: AssignmentId, now: UnixNanos) -> Result<(), Self::Error> {
        query(
            r#"--sql
            UPDATE "gambit"."task_assignments"
            SET "last_heartbeat_at" = GREATEST("last_heartbeat_at", $2)
            WHERE "id" = $1
            "#,
        )
        .bind(db_id(id.0))
        .bind(OffsetDateTime::from(now))
        .execute(&self.db)
        .await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn task(&self, id: TaskId) -> Result<Option<Task>, Self::Error> {
        query(
            r#"--sql
            SELECT * FROM "gambit"."tasks"
            WHERE "id" = $1
            "#,
        )
        .bind(db_id(id.0))
        .fetch_optional(&self.db)
        .await?
        .as_ref()
        .map(task_from_row)
        .transpose()
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn record_match_game(
        &self,
        match_game_id: MatchGameId,
        result: MatchGameResult,
    ) -> Result<Option<MatchTask>, Self::Error> {
        let mut tx = self.db.begin().await?;

        let game = query(
            r#"--sql
            SELECT "match_task_id", "done" FROM "gambit"."match_games"
            WHERE "id" = $1
            FOR UPDATE
            "#,
        )
        .bind(db_id(match_game_id.0))
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(Error::MatchGameNotFound(match_game_id))?;

        if game.try_get::<bool, _>("done")? {
            return Ok(None);
        }

        let task_id = TaskId(game.try_get::<i64, _>("match_task_id")? as u64);
        let mut task = lock_task(&mut tx, task_id).await?;

        let TaskDetails::Match(m) = &mut task.details else {
            return Err(Error::WrongKind(task_id, TaskKind::Match));
        };
        m.record(result.outcome);
        let m = m.clone();
        task.updated_at = result.reported_at;

        query(
            r#"--sql
            UPDATE "gambit"."match_games"
            SET
                "done" = TRUE,
                "result" = $2,
                "pgn" = $3,
                "engine_version" = $4
            WHERE "id" = $1
            "#,
        )
        .bind(db_id(match_game_id.0))
        .bind(result.outcome.as_i16())
        .bind(&result.pgn)
        .bind(&result.engine_version)
        .execute(&mut *tx)
        .await?;

        save_task(&mut tx, &task).await?;
        tx.commit().await?;

        Ok(Some(m))
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn add_sprt_results(
        &self,
        task_id: TaskId,
        delta: &Pentanomial,
        now: UnixNanos,
    ) -> Result<Option<SprtTask>, Self::Error> {
        let mut tx = self.db.begin().await?;
        let mut task = lock_task(&mut tx, task_id).await?;

        if task.status.is_finished() {
            return Ok(None);
        }

        let TaskDetails::Sprt(sprt) = &mut task.details else {
            return Err(Error::WrongKind(task_id, TaskKind::Sprt));
        };
        sprt.results.add(delta);
        let sprt = sprt.clone();
        task.updated_at = now;

        save_task(&mut tx, &task).await?;
        tx.commit().await?;

        Ok(Some(sprt))
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn update_sprt_estimate(
        &self,
        task_id: TaskId,
        llr: f64,
        elo: EloInterval,
    ) -> Result<(), Self::Error> {
        let mut tx = self.db.begin().await?;
        let mut task = lock_task(&mut tx, task_id).await?;

        let TaskDetails::Sprt(sprt) = &mut task.details else {
            return Err(Error::WrongKind(task_id, TaskKind::Sprt));
        };
        sprt.llr = Some(llr);
        sprt.elo = Some(elo);

        save_task(&mut tx, &task).await?;
        tx.commit().await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn record_tune_results(
        &self,
        task_id: TaskId,
        results: TuningResults,
        now: UnixNanos,
    ) -> Result<Option<TuneTask>, Self::Error> {
        let mut tx = self.db.begin().await?;
        let mut task = lock_task(&mut tx, task_id).await?;

        if task.status.is_finished() {
            return Ok(None);
        }

        let TaskDetails::Tune(tune) = &mut task.details else {
            return Err(Error::WrongKind(task_id, TaskKind::Tune));
        };
        tune.record(
            results.param_set_id,
            results.wins,
            results.losses,
            results.draws,
        )
        .map_err(|error| Error::ParamSetNotFound(task_id, error.0))?;
        let tune = tune.clone();
        task.updated_at = now;

        save_task(&mut tx, &task).await?;
        tx.commit().await?;

        Ok(Some(tune))
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn save_game_record(&self, record: NewGameRecord) -> Result<(), Self::Error> {
        query(
            r#"--sql
            INSERT INTO "gambit"."game_records" (
                "task_id",
                "kind",
                "assignment_id",
                "token_id",
                "engine_version",
                "pgn",
                "training_data_url",
                "network_sha",
                "created_at"
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(db_id(record.task_id.0))
        .bind(record.kind.as_str())
        .bind(db_id(record.assignment_id.0))
        .bind(db_id(record.token_id.0))
        .bind(record.engine_version)
        .bind(record.pgn)
        .bind(record.training_data_url)
        .bind(record.network_sha)
        .bind(OffsetDateTime::from(record.created_at))
        .execute(&self.db)
        .await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn network_exists(&self, sha: &str) -> Result<bool, Self::Error> {
        Ok(query(
            r#"--sql
            SELECT EXISTS (
                SELECT 1 FROM "gambit"."networks"
                WHERE "sha" = $1
            )
            "#,
        )
        .bind(sha)
        .fetch_one(&self.db)
        .await?
        .try_get(0)?)
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn increment_network_games(&self, sha: &str) -> Result<bool, Self::Error> {
        Ok(query(
            r#"--sql
            UPDATE "gambit"."networks"
            SET "games_played" = "games_played" + 1
            WHERE "sha" = $1
            "#,
        )
        .bind(sha)
        .execute(&self.db)
        .await?
        .rows_affected()
            > 0)
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn complete_task(
        &self,
        task_id: TaskId,
        completion: Completion,
        now: UnixNanos,
    ) -> Result<bool, Self::Error> {
        let mut tx = self.db.begin().await?;
        let mut task = lock_task(&mut tx, task_id).await?;

        if !task.transition(TaskStatus::Done, now) {
            return Ok(false);
        }

        match (&mut task.details, completion) {
            (TaskDetails::Match(m), Completion::Match { passed, elo }) => {
                m.done = true;
                m.passed = passed;
                m.elo = Some(elo);
            }
            (TaskDetails::Sprt(sprt), Completion::Sprt { passed }) => {
                sprt.passed = Some(passed);
            }
            _ => {}
        }

        save_task(&mut tx, &task).await?;

        query(
            r#"--sql
            UPDATE "gambit"."task_assignments"
            SET
                "status" = 'done',
                "completed_at" = $2
            WHERE "task_id" = $1 AND "status" = 'active'
            "#,
        )
        .bind(db_id(task_id.0))
        .bind(OffsetDateTime::from(now))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn complete_assignment(
        &self,
        id: AssignmentId,
        now: UnixNanos,
    ) -> Result<(), Self::Error> {
        let result = query(
            r#"--sql
            UPDATE "gambit"."task_assignments"
            SET
                "status" = CASE WHEN "status" = 'active' THEN 'done' ELSE "status" END,
                "completed_at" = CASE WHEN "status" = 'active' THEN $2 ELSE "completed_at" END
            WHERE "id" = $1
            "#,
        )
        .bind(db_id(id.0))
        .bind(OffsetDateTime::from(now))
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::AssignmentNotFound(id));
        }

        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn cancel_task(&self, task_id: TaskId, now: UnixNanos) -> Result<bool, Self::Error> {
        self.cancel_task_with_assignments(task_id, now).await
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn reap_stale_assignments(
        &self,
        cutoff: UnixNanos,
        now: UnixNanos,
    ) -> Result<Vec<TaskAssignment>, Self::Error> {
        let mut tx = self.db.begin().await?;

        let reaped = query(
            r#"--sql
            UPDATE "gambit"."task_assignments"
            SET
                "status" = 'cancelled',
                "cancelled_at" = $2
            WHERE
                "status" = 'active'
                AND "last_heartbeat_at" < $1
            RETURNING *
            "#,
        )
        .bind(OffsetDateTime::from(cutoff))
        .bind(OffsetDateTime::from(now))
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(assignment_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        let task_ids = reaped
            .iter()
            .map(|assignment| db_id(assignment.task_id.0))
            .collect::<Vec<_>>();

        query(
            r#"--sql
            UPDATE "gambit"."tasks" AS "t"
            SET
                "status" = 'pending',
                "updated_at" = $2
            WHERE
                "t"."id" = ANY($1)
                AND "t"."status" = 'active'
                AND NOT EXISTS (
                    SELECT 1 FROM "gambit"."task_assignments" AS "a"
                    WHERE "a"."task_id" = "t"."id" AND "a"."status" = 'active'
                )
            "#,
        )
        .bind(&task_ids)
        .bind(OffsetDateTime::from(now))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(reaped)
    }
}
