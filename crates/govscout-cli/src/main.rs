use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use govscout_client::GovWinClient;
use govscout_ingest::{maybe_build_scheduler, IngestConfig, IngestPipeline};
use govscout_store::{DocumentStore, PgStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "govscout")]
#[command(about = "GovScout opportunity dashboard command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one ingest pass against the configured search terms.
    Ingest,
    /// Serve the dashboard.
    Serve,
    /// Run the ingest scheduler until interrupted.
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Ingest) {
        Commands::Ingest => {
            let summary = govscout_ingest::run_ingest_once_from_env().await?;
            println!(
                "ingest complete: run_id={} terms={} attempted={} upserted={} failures={}",
                summary.run_id,
                summary.terms_processed,
                summary.records_attempted,
                summary.records_upserted,
                summary.store_failures
            );
        }
        Commands::Serve => {
            govscout_web::serve_from_env().await?;
        }
        Commands::Schedule => {
            let config = IngestConfig::from_env();
            let store = PgStore::connect(&config.database_url)
                .await
                .context("connecting to document store")?;
            store.ensure_schema().await.context("ensuring store schema")?;
            let client = GovWinClient::connect(config.client.clone())
                .await
                .context("acquiring GovWin token")?;
            let store: Arc<dyn DocumentStore> = Arc::new(store);
            let pipeline = Arc::new(IngestPipeline::new(config, client, store));

            match maybe_build_scheduler(pipeline).await? {
                Some(sched) => {
                    sched.start().await.context("starting scheduler")?;
                    info!("scheduler running; press ctrl-c to stop");
                    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
                }
                None => {
                    eprintln!("scheduler disabled; set INGEST_SCHEDULER_ENABLED=true");
                }
            }
        }
    }

    Ok(())
}
