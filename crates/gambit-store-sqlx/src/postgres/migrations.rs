pub use sqlx_migrate::prelude::*;
#[allow(dead_code)]
#[allow(clippy::all, clippy::pedantic)]
/// Created at 20240601120000.
pub mod _1_initial_schema_migrate {}
#[allow(dead_code)]
#[allow(clippy::all, clippy::pedantic)]
/// Created at 20240601120000.
pub mod _1_initial_schema_revert {}
/// All the migrations.
pub fn migrations() -> impl IntoIterator<Item = Migration<sqlx::Postgres>> {
    [
        sqlx_migrate::Migration::new(
                "initial_schema",
                |ctx| std::boxed::Box::pin(async move {
                    use sqlx::Executor;
                    let ctx: &mut sqlx_migrate::prelude::MigrationContext<
                        sqlx::Postgres,
                    > = ctx;
                    ctx.tx()
                        .execute(
                            include_str!(
                                "/root/crate/crates/gambit-store-sqlx/migrations/postgres/20240601120000_initial_schema.migrate.sql"
                            ),
                        )
                        .await?;
                    Ok(())
                }),
            )
            .reversible(|ctx| std::boxed::Box::pin(async move {
                use sqlx::Executor;
                let ctx: &mut sqlx_migrate::prelude::MigrationContext<sqlx::Postgres> = ctx;
                ctx.tx()
                    .execute(
                        include_str!(
                            "/root/crate/crates/gambit-store-sqlx/migrations/postgres/20240601120000_initial_schema.revert.sql"
                        ),
                    )
                    .await?;
                Ok(())
            })),
    ]
}
