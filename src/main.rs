use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use desk_relay::config;
use desk_relay::db::{self, SqliteTicketLog};
use desk_relay::desk::DeskClient;
use desk_relay::jobs::{JobContext, JobRegistry, VerificationTasks};
use desk_relay::server::{self, AppState};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override `server.bind` from the config
    #[arg(long)]
    bind: Option<String>,

    /// Print a sample config file and exit
    #[arg(long)]
    print_example: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if args.print_example {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(Some(args.config.as_path()))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/relay.db", cfg.app.resolved_data_dir()));
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let desk = DeskClient::from_config(&cfg.desk)?;
    let verifications = VerificationTasks::new();
    let jobs = JobContext {
        desk: Arc::new(desk),
        ticket_log: Arc::new(SqliteTicketLog::new(pool.clone())),
        profiles: Arc::new(cfg.profile_store()),
        registry: JobRegistry::new(),
        verifications: verifications.clone(),
        verify_delay: cfg.app.verify_delay(),
    };
    if cfg.profiles.is_empty() {
        warn!("no profiles configured; every bulk job will be rejected");
    }

    let bind = args.bind.unwrap_or_else(|| cfg.server.bind.clone());
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;

    info!(profiles = cfg.profiles.len(), "starting desk relay");
    server::serve(listener, AppState { jobs }, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(?err, "failed to listen for ctrl-c");
        }
        info!("shutdown requested");
    })
    .await?;

    verifications.shutdown(cfg.app.shutdown_grace()).await;
    pool.close().await;
    info!("bye");
    Ok(())
}
