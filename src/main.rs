use std::{net::SocketAddr, path::PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use kubecast::{
    app::App,
    config::Config,
    logger::{init_tracing, LogConfig},
    notifier::targets_from_config,
    router::table::RouteTable,
    webhook,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const DEFAULT_CONFIG: &str = "kubecast.yaml";

#[derive(Parser, Debug)]
#[command(
    name = "kubecast",
    about = "Routes Kubernetes and plugin events to chat channels and sinks",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the router and the webhook server
    Run(RunArgs),

    /// Print the configuration JSON-Schema
    Schema,

    /// Load a configuration and print its route table
    Check(CheckArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(long, env = "KUBECAST_CONFIG", default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Log level override (e.g. error, warn, info, debug, trace)
    #[arg(long, env = "KUBECAST_LOG_LEVEL")]
    log_level: Option<String>,

    /// Listen address of the webhook server
    #[arg(long, env = "KUBECAST_WEBHOOK_ADDR")]
    webhook_addr: Option<SocketAddr>,
}

#[derive(Args, Debug)]
struct CheckArgs {
    #[arg(long, env = "KUBECAST_CONFIG", default_value = DEFAULT_CONFIG)]
    config: PathBuf,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Schema => {
            println!("{}", Config::schema_json()?);
            Ok(())
        }
        Commands::Check(args) => check(args),
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let mut config = Config::from_file(&args.config)?;
    if let Some(level) = args.log_level {
        config.settings.log_level = level;
    }
    let addr = match args.webhook_addr {
        Some(addr) => addr,
        None => config
            .settings
            .webhook_addr
            .parse()
            .with_context(|| format!("invalid webhook address `{}`", config.settings.webhook_addr))?,
    };

    let _log_guard = init_tracing(&LogConfig {
        level: config.settings.log_level.clone(),
        file: config.settings.log_file.clone(),
        json: config.settings.json_logs,
    })?;
    info!(
        config = %args.config.display(),
        sources = config.sources.len(),
        "loaded configuration, kubecast starting up"
    );

    let cancel = CancellationToken::new();
    let app = match App::bootstrap(&config, vec![], cancel.clone()).await {
        Ok(app) => app,
        Err(err) => {
            error!("Failed to bootstrap kubecast: {:#}", err);
            return Err(err);
        }
    };

    let mut server = tokio::spawn(webhook::serve(app.bridge.clone(), addr, cancel.clone()));
    let server_exit = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                error!(error = %err, "cannot listen for shutdown signal");
            }
            info!("shutdown requested");
            None
        }
        res = &mut server => Some(res),
    };

    app.shutdown().await;
    cancel.cancel();
    match server_exit {
        Some(res) => res??,
        None => server.await??,
    }
    Ok(())
}

fn check(args: CheckArgs) -> anyhow::Result<()> {
    let config = Config::from_file(&args.config)?;
    let table = RouteTable::build(&config, 1)?;
    let targets = targets_from_config(&config)?;

    for (key, routes) in table.buckets() {
        println!("{:<40} {:<8} {}", key.resource_type, key.kind.to_string(), routes.len());
    }
    println!(
        "{} routes in {} buckets, {} notifiers",
        table.len(),
        table.buckets().len(),
        targets.len()
    );
    Ok(())
}
