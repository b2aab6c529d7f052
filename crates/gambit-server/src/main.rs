//! Gambit server binary.
#![warn(clippy::pedantic)]

use std::path::PathBuf;

use clap::Parser;
use gambit::{
    config::{ServerConfig, DEFAULT_CONFIG_PATH},
    AuthService, DbStore, GambitStore, MemoryStore, Reaper, TaskService,
};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

mod routes;

#[derive(Debug, Parser)]
#[command(version, about = "Hands out training and evaluation work to volunteer clients.")]
struct Cli {
    /// Path of the JSON configuration file.
    #[arg(long, env = "GAMBIT_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Database connection URL, overrides the configured one.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
    /// Keep all state in memory instead of the database.
    #[arg(long)]
    in_memory: bool,
}

impl Cli {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(url) = self.database_url.as_ref().filter(|url| !url.is_empty()) {
            config.database.url.clone_from(url);
        }
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::load(&cli.config)?;
    cli.apply(&mut config);
    tracing::info!(path = %cli.config.display(), "configuration loaded");

    if cli.in_memory {
        tracing::warn!("using the in-memory store, nothing will be persisted");
        return serve(MemoryStore::new(), &config).await;
    }

    let db = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    let store = DbStore::new(db).await?;

    serve(store, &config).await
}

async fn serve<S>(store: S, config: &ServerConfig) -> eyre::Result<()>
where
    S: GambitStore,
{
    let tasks = TaskService::new(
        store.clone(),
        config.scheduler_options(),
        config.tracker_options(),
    );
    let auth = AuthService::new(store.clone());

    let reaper = tokio::spawn(Reaper::new(store, config.reaper_options()).run());

    let listener = TcpListener::bind(&config.web_server.address).await?;
    tracing::info!(address = %listener.local_addr()?, "listening");

    axum::serve(listener, routes::router(tasks, auth))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reaper.abort();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn database_url_overrides_the_config() {
        let mut config = ServerConfig::default();
        Cli::try_parse_from(["gambit-server", "--database-url", "postgres://db/override"])
            .unwrap()
            .apply(&mut config);
        assert_eq!(config.database.url, "postgres://db/override");

        let mut config = ServerConfig::default();
        let default_url = config.database.url.clone();
        Cli::try_parse_from(["gambit-server", "--database-url", ""])
            .unwrap()
            .apply(&mut config);
        assert_eq!(config.database.url, default_url);
    }
}
