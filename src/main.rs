use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use wapi_inbox::db::{self, ChatRepo, ClientRepo, InstanceRepo, MediaRepo, MessageRepo, SenderRepo};
use wapi_inbox::{
    Config, GatewayClient, LocalStorage, MediaResolver, MediaSweeper, Pipeline, RetryPolicy,
    SweepLimits,
};

/// inboxd - W-API inbox daemon
#[derive(Parser)]
#[command(name = "inboxd", version, about)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, env = "INBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the webhook/API server (the default)
    Serve,
    /// Provision tenants and gateway instances
    #[command(subcommand)]
    Provision(Provision),
    /// Run one maintenance sweep over the media references
    #[command(subcommand)]
    Sweep(Sweep),
}

#[derive(Subcommand)]
enum Provision {
    /// Register a client (tenant)
    Client {
        /// Display name
        name: String,
    },
    /// Register a gateway instance for a client
    Instance {
        /// Instance id issued by the gateway
        id: String,
        /// Owning client id
        #[arg(long)]
        client: String,
        /// Gateway bearer token
        #[arg(long)]
        token: String,
    },
}

#[derive(Subcommand)]
enum Sweep {
    /// Retry pending and failed downloads below the retry cap
    Reprocess,
    /// Re-verify files recorded as successfully downloaded
    Integrity,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,wapi_inbox=info",
        1 => "info,wapi_inbox=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let pool = db::init(config.db_path())?;

    match cli.command {
        None | Some(Command::Serve) => serve(&config, pool).await,
        Some(Command::Provision(cmd)) => provision(cmd, &pool),
        Some(Command::Sweep(cmd)) => sweep(cmd, &config, pool).await,
    }
}

async fn serve(config: &Config, pool: db::DbPool) -> anyhow::Result<()> {
    let pipeline = Arc::new(build_pipeline(config, &pool)?);
    let state = Arc::new(wapi_inbox::api::ApiState::new(pool, pipeline));

    tracing::info!(
        port = config.server.port,
        data_dir = %config.data_dir.display(),
        gateway = %config.gateway.base_url,
        "starting inbox daemon"
    );

    wapi_inbox::api::serve(state, config.server.port).await?;
    Ok(())
}

fn provision(cmd: Provision, pool: &db::DbPool) -> anyhow::Result<()> {
    match cmd {
        Provision::Client { name } => {
            let client = ClientRepo::new(pool.clone()).create(&name)?;
            println!("client {} ({})", client.id, client.name);
        }
        Provision::Instance { id, client, token } => {
            let instance = InstanceRepo::new(pool.clone()).create(&id, &client, &token)?;
            println!("instance {} for client {}", instance.id, instance.client_id);
        }
    }
    Ok(())
}

async fn sweep(cmd: Sweep, config: &Config, pool: db::DbPool) -> anyhow::Result<()> {
    let resolver = Arc::new(build_resolver(config, &pool)?);
    let sweeper = MediaSweeper::new(
        MediaRepo::new(pool.clone()),
        InstanceRepo::new(pool),
        resolver,
    );
    let limits = SweepLimits {
        max_retries: config.media.sweep_max_retries,
        batch_size: config.media.sweep_batch_size,
    };

    let report = match cmd {
        Sweep::Reprocess => sweeper.reprocess(limits).await?,
        Sweep::Integrity => sweeper.verify_integrity(limits)?,
    };
    println!("{report:?}");
    Ok(())
}

fn build_pipeline(config: &Config, pool: &db::DbPool) -> anyhow::Result<Pipeline> {
    let resolver = Arc::new(build_resolver(config, pool)?);

    Ok(Pipeline::new(
        InstanceRepo::new(pool.clone()),
        wapi_inbox::Materializer::new(
            ChatRepo::new(pool.clone()),
            SenderRepo::new(pool.clone()),
            MessageRepo::new(pool.clone()),
        ),
        MediaRepo::new(pool.clone()),
        resolver,
    ))
}

fn build_resolver(config: &Config, pool: &db::DbPool) -> anyhow::Result<MediaResolver> {
    let gateway = GatewayClient::new(&config.gateway.base_url, Some(config.gateway.timeout))?;
    let storage = Arc::new(LocalStorage::new(config.data_dir.clone()));

    Ok(MediaResolver::new(
        Arc::new(gateway),
        storage,
        MediaRepo::new(pool.clone()),
        RetryPolicy {
            max_attempts: config.media.max_attempts,
            base_delay: config.media.retry_base_delay,
        },
    ))
}
