use async_trait::async_trait;
use gambit_common::{
    identity::{AuthToken, ClientInfo, LegacyUser, NewAuthToken},
    TokenId, UnixNanos,
};
use gambit_identity::store::IdentityStore;
use sqlx::{query, types::time::OffsetDateTime, Postgres, Row};

use super::rows::{db_id, legacy_user_from_row, token_from_row};
use crate::{DbStore, Error};

#[async_trait]
impl IdentityStore for DbStore<Postgres> {
    type Error = Error;

    #[tracing::instrument(level = "debug", skip_all)]
    async fn token(&self, token: &str) -> Result<Option<AuthToken>, Self::Error> {
        query(
            r#"--sql
            SELECT * FROM "gambit"."auth_tokens"
            WHERE "token" = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.db)
        .await?
        .as_ref()
        .map(token_from_row)
        .transpose()
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn token_exists(&self, token: &str) -> Result<bool, Self::Error> {
        Ok(query(
            r#"--sql
            SELECT EXISTS (
                SELECT 1 FROM "gambit"."auth_tokens"
                WHERE "token" = $1
            )
            "#,
        )
        .bind(token)
        .fetch_one(&self.db)
        .await?
        .try_get(0)?)
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn touch_token(
        &self,
        token_id: TokenId,
        used_at: UnixNanos,
        client: Option<&ClientInfo>,
    ) -> Result<(), Self::Error> {
        let result = match client {
            Some(client) => {
                query(
                    r#"--sql
                    UPDATE "gambit"."auth_tokens"
                    SET
                        "last_used_at" = $2,
                        "client_version" = $3,
                        "client_host" = $4,
                        "gpu_type" = $5,
                        "gpu_id" = $6
                    WHERE "id" = $1
                    "#,
                )
                .bind(db_id(token_id.0))
                .bind(OffsetDateTime::from(used_at))
                .bind(&client.version)
                .bind(&client.hostname)
                .bind(&client.gpu_type)
                .bind(client.gpu_id)
                .execute(&self.db)
                .await?
            }
            None => {
                query(
                    r#"--sql
                    UPDATE "gambit"."auth_tokens"
                    SET "last_used_at" = $2
                    WHERE "id" = $1
                    "#,
                )
                .bind(db_id(token_id.0))
                .bind(OffsetDateTime::from(used_at))
                .execute(&self.db)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(Error::TokenNotFound(token_id));
        }

        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn insert_token(&self, token: NewAuthToken) -> Result<AuthToken, Self::Error> {
        let row = query(
            r#"--sql
            INSERT INTO "gambit"."auth_tokens" (
                "user_id",
                "token",
                "created_at",
                "issued_reason"
            ) VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(token.user_id.map(|id| db_id(id.0)))
        .bind(&token.token)
        .bind(OffsetDateTime::from(token.created_at))
        .bind(token.issued_reason.as_str())
        .fetch_one(&self.db)
        .await?;

        token_from_row(&row)
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn legacy_user(&self, username: &str) -> Result<Option<LegacyUser>, Self::Error> {
        query(
            r#"--sql
            SELECT * FROM "gambit"."users"
            WHERE "username" = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await?
        .as_ref()
        .map(legacy_user_from_row)
        .transpose()
    }
}
