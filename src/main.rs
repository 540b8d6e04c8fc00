use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cluster_cli::cluster::{Cluster, RunOptions};
use cluster_cli::config::Config;
use cluster_cli::consul::{client::ClientConfig, ConsulClient};

mod commands;

#[derive(Parser)]
#[command(
    name = "cluster",
    version,
    about = "Command line utility to administrate cluster",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Consul API URL
    #[arg(short, long, global = true)]
    consul: Option<String>,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Answer yes to every confirmation
    #[arg(short = 'y', long, global = true)]
    assume_yes: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List consul health checks per nodes/service
    Checks {
        /// Display all checks (any states)
        #[arg(short, long)]
        all: bool,
    },

    /// List cluster nodes
    Nodes,

    /// Deploy or re-deploy a service
    Deploy {
        /// The repo name, or whole URL for a new service
        /// (ssh://git@git.example.com:22/project-slug/repo-name)
        repo: String,

        /// The branch to deploy
        branch: String,

        /// Node where to deploy the master (required for new service)
        #[arg(long, value_name = "NODE")]
        master: Option<String>,

        /// Slave node
        #[arg(long, value_name = "NODE")]
        slave: Option<String>,

        /// Return once the event is fired instead of waiting for the deployment
        #[arg(long)]
        no_wait: bool,

        /// Time in seconds to let the deployment happen before failing
        #[arg(short, long, value_name = "SECONDS")]
        timeout: Option<u64>,
    },

    /// Restore docker volume data of a source service onto a target service.
    /// Target data is lost; prod/production targets are forbidden.
    Migrate {
        /// The source repo where to get data from
        source_repo: String,

        /// The source branch where to get data from
        source_branch: String,

        /// The target branch where data will be restored
        target_branch: String,

        /// The target repo, if different from the source repo
        #[arg(long)]
        target_repo: Option<String>,

        /// Return once the event is fired instead of waiting for the migration
        #[arg(long)]
        no_wait: bool,

        /// Time in seconds to let the migration happen before failing
        #[arg(short, long, value_name = "SECONDS")]
        timeout: Option<u64>,

        /// Do not redeploy the target service after restoring data
        #[arg(short, long)]
        no_update: bool,
    },

    /// Move every master hosted on a node to another node
    MoveMastersFrom {
        /// Node to free from masters
        node: String,

        /// Node receiving masters of services without slave
        #[arg(long, value_name = "NODE")]
        master: Option<String>,

        /// Return once the events are fired instead of waiting for each deployment
        #[arg(long)]
        no_wait: bool,

        /// Time in seconds to let each deployment happen before failing
        #[arg(short, long, value_name = "SECONDS")]
        timeout: Option<u64>,
    },

    /// List services whose master runs on a node
    Inspect {
        /// Node to inspect
        node: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    if let Some(url) = &cli.consul {
        config.consul.url = url.clone();
    }
    if let Some(format) = &cli.log_format {
        config.logging.format = format.clone();
    }
    config.validate()?;

    setup_tracing(&config, cli.verbose);
    tracing::debug!(consul = %config.consul.url, "cluster starting");

    let consul = ConsulClient::new(ClientConfig::from(&config.consul))
        .context("Failed to create Consul client")?;
    let cluster = Cluster::from_config(consul, &config);

    let options = |no_wait: bool, timeout: Option<u64>| {
        let timeout = timeout.map_or_else(|| config.default_timeout(), Duration::from_secs);
        let mut options = RunOptions::new(timeout);
        if no_wait {
            options = options.no_wait();
        }
        if cli.assume_yes {
            options = options.assume_yes();
        }
        options
    };

    match cli.command {
        Commands::Checks { all } => commands::checks(&cluster, all).await?,

        Commands::Nodes => commands::nodes(&cluster).await?,

        Commands::Deploy {
            repo,
            branch,
            master,
            slave,
            no_wait,
            timeout,
        } => {
            tracing::info!(
                repo = %repo,
                branch = %branch,
                master = ?master,
                slave = ?slave,
                "Starting deploy command"
            );
            let request = commands::deploy::request(repo, branch, master, slave);
            commands::deploy(&cluster, &request, &options(no_wait, timeout)).await?;
        }

        Commands::Migrate {
            source_repo,
            source_branch,
            target_branch,
            target_repo,
            no_wait,
            timeout,
            no_update,
        } => {
            tracing::info!(
                source_repo = %source_repo,
                source_branch = %source_branch,
                target_branch = %target_branch,
                target_repo = ?target_repo,
                no_update = %no_update,
                "Starting migrate command"
            );
            let request = commands::migrate::request(
                source_repo,
                source_branch,
                target_branch,
                target_repo,
                no_update,
            );
            commands::migrate(&cluster, &request, &options(no_wait, timeout)).await?;
        }

        Commands::MoveMastersFrom {
            node,
            master,
            no_wait,
            timeout,
        } => {
            tracing::info!(node = %node, master = ?master, "Starting move-masters-from command");
            commands::move_masters_from(
                &cluster,
                &node,
                master.as_deref(),
                &options(no_wait, timeout),
            )
            .await?;
        }

        Commands::Inspect { node } => commands::inspect(&cluster, &node).await?,
    }

    Ok(())
}

fn setup_tracing(config: &Config, verbose: bool) {
    let level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("cluster_cli={level},cluster={level},warn"))
    });

    match config.logging.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
