//! Postgres backend implementation.
#![allow(
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_possible_truncation
)]

use gambit_common::{
    artifact::{Book, Network, TrainingRun},
    identity::LegacyUser,
    task::{Task, TaskDetails, TaskStatus},
    NetworkId, TaskId, TrainingRunId, UnixNanos,
};
use sqlx::{
    query,
    types::{time::OffsetDateTime, Json},
    Executor, PgConnection, PgPool, Postgres, Row,
};

use self::rows::{db_id, task_from_row};
use super::DbStore;
use crate::{DbStoreOptions, Error};

mod identity;
mod migrations;
mod rows;
mod scheduler;
mod tracker;

impl DbStore<Postgres> {
    /// Create a new store backed by the given pool.
    ///
    /// # Errors
    ///
    /// Errors are returned if migrations fail to apply
    /// or in case any other database error occurs.
    pub async fn new(db: PgPool) -> eyre::Result<Self> {
        Self::new_with_options(db, DbStoreOptions::default()).await
    }

    /// Create a new store backed by the given pool and options.
    ///
    /// # Errors
    ///
    /// Errors are returned if migrations fail to apply
    /// or in case any other database error occurs.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn new_with_options(db: PgPool, options: DbStoreOptions) -> eyre::Result<Self> {
        let this = Self { db, options };
        if this.options.migrate {
            this.migrate().await?;
        }
        Ok(this)
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn migrate(&self) -> eyre::Result<()> {
        // The migrations table lives in the schema,
        // so the schema has to exist beforehand.
        self.db
            .execute(
                r#"--sql
                CREATE SCHEMA IF NOT EXISTS "gambit";
                "#,
            )
            .await?;

        let mut migrator = sqlx_migrate::Migrator::connect_with_pool(&self.db).await?;
        migrator.add_migrations(migrations::migrations());
        migrator.set_migrations_table(r#""gambit"."migrations""#);
        migrator.migrate_all().await?;
        Ok(())
    }

    /// Add or replace a training run.
    ///
    /// # Errors
    ///
    /// Fails if the database fails.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn add_training_run(&self, run: &TrainingRun) -> Result<(), Error> {
        query(
            r#"--sql
            INSERT INTO "gambit"."training_runs" (
                "id",
                "description",
                "active",
                "best_network_id"
            ) VALUES ($1, $2, $3, $4)
            ON CONFLICT ("id") DO UPDATE SET
                "description" = EXCLUDED."description",
                "active" = EXCLUDED."active",
                "best_network_id" = EXCLUDED."best_network_id"
            "#,
        )
        .bind(db_id(run.id.0))
        .bind(&run.description)
        .bind(run.active)
        .bind(db_id(run.best_network_id.0))
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Change the best network of a training run.
    ///
    /// # Errors
    ///
    /// Fails if the database fails.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn set_best_network(
        &self,
        run_id: TrainingRunId,
        network_id: NetworkId,
    ) -> Result<(), Error> {
        query(
            r#"--sql
            UPDATE "gambit"."training_runs"
            SET "best_network_id" = $2
            WHERE "id" = $1
            "#,
        )
        .bind(db_id(run_id.0))
        .bind(db_id(network_id.0))
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Add or replace a network.
    ///
    /// # Errors
    ///
    /// Fails if the database fails.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn add_network(&self, network: &Network) -> Result<(), Error> {
        query(
            r#"--sql
            INSERT INTO "gambit"."networks" (
                "id",
                "training_run_id",
                "network_number",
                "sha",
                "path",
                "size_bytes",
                "layers",
                "filters",
                "games_played",
                "elo",
                "anchor",
                "elo_set"
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT ("id") DO UPDATE SET
                "training_run_id" = EXCLUDED."training_run_id",
                "network_number" = EXCLUDED."network_number",
                "sha" = EXCLUDED."sha",
                "path" = EXCLUDED."path",
                "size_bytes" = EXCLUDED."size_bytes",
                "layers" = EXCLUDED."layers",
                "filters" = EXCLUDED."filters",
                "games_played" = EXCLUDED."games_played",
                "elo" = EXCLUDED."elo",
                "anchor" = EXCLUDED."anchor",
                "elo_set" = EXCLUDED."elo_set"
            "#,
        )
        .bind(db_id(network.id.0))
        .bind(db_id(network.training_run_id.0))
        .bind(network.network_number as i32)
        .bind(&network.sha)
        .bind(&network.path)
        .bind(network.size_bytes as i64)
        .bind(network.layers as i32)
        .bind(network.filters as i32)
        .bind(network.games_played as i64)
        .bind(network.elo)
        .bind(network.anchor)
        .bind(network.elo_set)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Add or replace a book.
    ///
    /// # Errors
    ///
    /// Fails if the database fails.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn add_book(&self, book: &Book) -> Result<(), Error> {
        query(
            r#"--sql
            INSERT INTO "gambit"."books" ("sha256", "url", "size_bytes", "format")
            VALUES ($1, $2, $3, $4)
            ON CONFLICT ("sha256") DO UPDATE SET
                "url" = EXCLUDED."url",
                "size_bytes" = EXCLUDED."size_bytes",
                "format" = EXCLUDED."format"
            "#,
        )
        .bind(&book.sha256)
        .bind(&book.url)
        .bind(book.size_bytes as i64)
        .bind(&book.format)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Add a user of the legacy credential store.
    ///
    /// # Errors
    ///
    /// Fails if the database fails.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn add_legacy_user(&self, user: &LegacyUser) -> Result<(), Error> {
        query(
            r#"--sql
            INSERT INTO "gambit"."users" ("id", "username", "password")
            VALUES ($1, $2, $3)
            ON CONFLICT ("id") DO UPDATE SET
                "username" = EXCLUDED."username",
                "password" = EXCLUDED."password"
            "#,
        )
        .bind(db_id(user.id.0))
        .bind(&user.username)
        .bind(&user.password)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Add a new pending task and return its ID.
    ///
    /// # Errors
    ///
    /// Fails if the database fails.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn add_task(&self, description: &str, details: &TaskDetails) -> Result<TaskId, Error> {
        let id: i64 = query(
            r#"--sql
            INSERT INTO "gambit"."tasks" (
                "kind",
                "status",
                "description",
                "details",
                "created_at",
                "updated_at"
            ) VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING "id"
            "#,
        )
        .bind(details.kind().as_str())
        .bind(TaskStatus::Pending.as_str())
        .bind(description)
        .bind(Json(details))
        .bind(OffsetDateTime::from(UnixNanos::now()))
        .fetch_one(&self.db)
        .await?
        .try_get(0)?;

        let id = TaskId(id as u64);
        tracing::debug!(task_id = %id, "task added");
        Ok(id)
    }

    /// Return a task.
    ///
    /// # Errors
    ///
    /// Fails if the database fails.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn get_task(&self, id: TaskId) -> Result<Option<Task>, Error> {
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

    /// Cancel a task and its active assignments in one transaction.
    async fn cancel_task_with_assignments(
        &self,
        task_id: TaskId,
        now: UnixNanos,
    ) -> Result<bool, Error> {
        let mut tx = self.db.begin().await?;

        let mut task = lock_task(&mut tx, task_id).await?;
        if !task.transition(TaskStatus::Cancelled, now) {
            return Ok(false);
        }
        save_task(&mut tx, &task).await?;

        query(
            r#"--sql
            UPDATE "gambit"."task_assignments"
            SET
                "status" = 'cancelled',
                "cancelled_at" = $2
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
}

/// Load a task and lock its row until the end of the transaction.
async fn lock_task(conn: &mut PgConnection, task_id: TaskId) -> Result<Task, Error> {
    let row = query(
        r#"--sql
        SELECT * FROM "gambit"."tasks"
        WHERE "id" = $1
        FOR UPDATE
        "#,
    )
    .bind(db_id(task_id.0))
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(Error::TaskNotFound(task_id))?;

    task_from_row(&row)
}

async fn save_task(conn: &mut PgConnection, task: &Task) -> Result<(), Error> {
    query(
        r#"--sql
        UPDATE "gambit"."tasks"
        SET
            "status" = $2,
            "details" = $3,
            "updated_at" = $4
        WHERE "id" = $1
        "#,
    )
    .bind(db_id(task.id.0))
    .bind(task.status.as_str())
    .bind(Json(&task.details))
    .bind(OffsetDateTime::from(task.updated_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}
