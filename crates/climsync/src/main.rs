use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use climsync::api::{self, AppState};
use climsync_bucket::BucketGateway;
use climsync_core::notify::SyncTriggerClient;
use climsync_core::{ProcessRunner, SyncConfig, SyncResponse, SyncService};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Climsoft dataset sync service", long_about = None)]
struct Cli {
    /// Optional TOML config file; environment variables override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP trigger server
    Serve,
    /// Run one sync for a station and print the outcome as JSON
    Sync(StationArgs),
    /// Ask a running server to sync a station; failures are logged, never fatal
    Notify(NotifyArgs),
}

#[derive(Args, Debug)]
struct StationArgs {
    #[arg(long)]
    region: String,
    #[arg(long)]
    station: String,
}

#[derive(Args, Debug)]
struct NotifyArgs {
    /// Base URL of the climsync server, e.g. http://localhost:8000
    #[arg(long)]
    url: String,
    #[command(flatten)]
    station: StationArgs,
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve => {
            let config = load_config(cli.config.as_deref())?;
            let (service, gateway) = build_service(&config).await?;

            let reachable = api::probe_buckets(&gateway).await;
            if reachable == 0 {
                warn!("no configured bucket is reachable; requests will fail until the store is up");
            }

            let app = api::router(AppState::new(service, gateway));
            let listener = TcpListener::bind(&config.bind)
                .await
                .with_context(|| format!("failed to bind {}", config.bind))?;
            info!("listening on {}", listener.local_addr()?);
            axum::serve(listener, app).await?;
            Ok(())
        }
        Command::Sync(args) => {
            let config = load_config(cli.config.as_deref())?;
            let (service, _) = build_service(&config).await?;
            let outcome = service
                .sync(&args.region, &args.station)
                .await
                .with_context(|| format!("sync failed for {}/{}", args.region, args.station))?;
            println!(
                "{}",
                serde_json::to_string_pretty(&SyncResponse::from(&outcome))?
            );
            Ok(())
        }
        Command::Notify(args) => {
            let client = SyncTriggerClient::new(&args.url, Duration::from_secs(args.timeout_secs))
                .context("failed to build http client")?;
            if let Some(response) = client
                .notify_best_effort(&args.station.region, &args.station.station)
                .await
            {
                println!("{}", serde_json::to_string_pretty(&response)?);
            }
            Ok(())
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<SyncConfig> {
    SyncConfig::load(path).context("failed to load configuration")
}

async fn build_service(config: &SyncConfig) -> Result<(SyncService, BucketGateway)> {
    let store = config
        .connect_store()
        .await
        .context("failed to connect to object store")?;
    let gateway = BucketGateway::new(store, config.allowed_buckets.iter().cloned());
    let runner = Arc::new(ProcessRunner::new(&config.transform.interpreter));
    let service = SyncService::new(&gateway, config, runner)
        .context("failed to initialise sync service")?;
    Ok((service, gateway))
}
