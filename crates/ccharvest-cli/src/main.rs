use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ccharvest_archive::{discover_boards, CdxClient, RecordDecoder};
use ccharvest_core::AtsProvider;
use ccharvest_fetch::{FetchGovernor, GovernorConfig};
use ccharvest_pipeline::{
    load_weights, maybe_build_scheduler, run_harvest, ArchiveCaptureSource, HarvestConfig,
    Harvester, PgStore,
};

#[derive(Debug, Parser)]
#[command(name = "ccharvest")]
#[command(about = "Company facts mined from public web archive captures")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Harvest seed (and optionally discovered) domains once.
    Harvest {
        /// Seed list file; overrides CCH_SEED_PATH.
        #[arg(long)]
        seeds: Option<PathBuf>,
    },
    /// Scan the archive index for ATS job boards and print the company
    /// domains they resolve to, without harvesting or persisting.
    Discover,
    /// Create the database schema.
    Migrate,
    /// Run harvests on the configured cron expression until interrupted.
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Harvest { seeds: None }) {
        Commands::Harvest { seeds } => {
            let mut config = HarvestConfig::from_env();
            if let Some(seeds) = seeds {
                config.seed_path = seeds;
            }
            let summary = run_harvest(config).await?;
            println!(
                "harvest complete: run_id={} attempted={} succeeded={} failed={} skipped={} new_facts={}",
                summary.run_id,
                summary.attempted,
                summary.succeeded,
                summary.failed,
                summary.skipped_low_score,
                summary.persisted_facts
            );
            for record in &summary.records {
                println!(
                    "  {:.2}  {}  {}",
                    record.score,
                    record.canonical_domain,
                    record.name.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::Discover => {
            let config = HarvestConfig::from_env();
            let weights = load_weights(config.weights_path.as_deref())?;
            let governor = Arc::new(FetchGovernor::new(GovernorConfig {
                user_agent: Some(config.user_agent.clone()),
                ..GovernorConfig::default()
            })?);
            let cdx = CdxClient::new(Arc::clone(&governor));
            let decoder = RecordDecoder::new(governor);
            let source = Arc::new(ArchiveCaptureSource::new(cdx.clone(), decoder));

            let crawl_ids: Vec<String> = cdx
                .list_crawls()
                .await?
                .into_iter()
                .take(config.crawl_count.max(1))
                .collect();
            let boards =
                discover_boards(&cdx, &crawl_ids, &AtsProvider::ALL, config.per_provider_cap)
                    .await;
            println!("discovered {} boards", boards.len());

            let harvester = Harvester::new(source, weights, config);
            let domains = harvester.resolve_boards(boards, &crawl_ids).await;
            println!("resolved {} company domains", domains.len());
            for domain in domains {
                println!("  {domain}");
            }
        }
        Commands::Migrate => {
            let config = HarvestConfig::from_env();
            let store = PgStore::connect(&config.database_url).await?;
            store.migrate().await?;
            println!("schema is up to date");
        }
        Commands::Schedule => {
            let config = HarvestConfig::from_env();
            let Some(scheduler) = maybe_build_scheduler(&config).await? else {
                anyhow::bail!("CCH_HARVEST_CRON is not set");
            };
            info!("scheduler running, ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
            drop(scheduler);
        }
    }

    Ok(())
}
