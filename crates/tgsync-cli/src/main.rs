use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use tgsync_storage::{notify_best_effort, ApiClient, HttpClientConfig, NoticeKind};
use tgsync_sync::{build_notifier, RunSummary, SyncConfig, SyncPipeline};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tgsync")]
#[command(about = "Sync Tatenpo Guide client and order exports into kintone")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Import the order export of yesterday's and today's month.
    ImportOrders {
        /// Run as if today were this date (YYYY-MM-DD).
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Import client exports (the configured target list unless --file is given).
    ImportClients {
        #[arg(long = "file")]
        files: Vec<PathBuf>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete every record of the client app.
    PurgeClients {
        #[arg(long)]
        yes: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Run the order import on TGSYNC_ORDER_CRON until interrupted.
    Schedule,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Self::ImportOrders { .. } => "import-orders",
            Self::ImportClients { .. } => "import-clients",
            Self::PurgeClients { .. } => "purge-clients",
            Self::Schedule => "schedule",
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!(
        "{} import complete: run_id={} scopes={} failed={} log={}",
        summary.kind.label(),
        summary.run_id,
        summary.scopes.len(),
        summary.failed(),
        summary.log_path
    );
    for scope in &summary.scopes {
        match (&scope.outcome, &scope.error) {
            (Some(outcome), _) => println!(
                "  {}: rows={} add={} update={} submitted={}",
                scope.label,
                outcome.rows,
                outcome.stats.to_add,
                outcome.stats.to_update,
                outcome.submitted
            ),
            (None, Some(err)) => println!("  {}: {}", scope.label, err),
            (None, None) => println!("  {}: no result", scope.label),
        }
    }
}

async fn run(command: Commands, config: SyncConfig) -> Result<()> {
    match command {
        Commands::ImportOrders { date, dry_run } => {
            let pipeline = SyncPipeline::new(config)?.with_dry_run(dry_run);
            let today = date.unwrap_or_else(|| Local::now().date_naive());
            let summary = pipeline.run_order_import(today).await?;
            print_summary(&summary);
        }
        Commands::ImportClients { files, dry_run } => {
            let pipeline = SyncPipeline::new(config)?.with_dry_run(dry_run);
            let files = (!files.is_empty()).then_some(files);
            let summary = pipeline.run_client_import(files).await?;
            print_summary(&summary);
        }
        Commands::PurgeClients { yes, dry_run } => {
            if !yes && !dry_run {
                bail!("purge-clients deletes every client record; pass --yes to confirm");
            }
            let pipeline = SyncPipeline::new(config)?.with_dry_run(dry_run);
            let summary = pipeline.purge_clients().await?;
            println!(
                "purge complete: app={} found={} deleted={} dry_run={}",
                summary.app, summary.found, summary.deleted, summary.dry_run
            );
        }
        Commands::Schedule => {
            let mut config = config;
            config.scheduler_enabled = true;
            let cron = config.order_cron.clone();
            let pipeline = Arc::new(SyncPipeline::new(config)?);
            let Some(mut sched) = pipeline.maybe_build_scheduler().await? else {
                bail!("scheduler could not be built");
            };
            sched.start().await.context("starting scheduler")?;
            info!(%cron, "scheduler running; press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("waiting for Ctrl-C")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
    }
    Ok(())
}

/// Reports a failure that escaped every scope boundary.
async fn notify_last_resort(config: &SyncConfig, command: &str, err: &anyhow::Error) {
    let http = match ApiClient::new(HttpClientConfig {
        timeout: Duration::from_secs(config.http_timeout_secs),
        ..Default::default()
    }) {
        Ok(http) => http,
        Err(build_err) => {
            error!(error = %build_err, "no http client for failure notification");
            return;
        }
    };
    let notifier = build_notifier(config, http);
    let message = format!("tgsync {command} の実行中にエラーが発生しました[hr]{err:#}");
    notify_best_effort(notifier.as_ref(), NoticeKind::Failure, &message).await;
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::ImportOrders {
        date: None,
        dry_run: false,
    });
    let name = command.name();
    let config = SyncConfig::from_env();

    if let Err(err) = run(command, config.clone()).await {
        error!(command = name, error = %format!("{err:#}"), "command failed");
        notify_last_resort(&config, name, &err).await;
        return Err(err);
    }
    Ok(())
}
