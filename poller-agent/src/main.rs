//! Poller agent binary
//!
//! Connects to the Postgres store, registers the built-in handlers and
//! polls until interrupted. Settings come from AGENT_* environment
//! variables; command line flags take precedence.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use poller_agent::{AgentPoller, AgentPollerConfig, handler_fn};
use poller_store::PgStore;

#[derive(Parser)]
#[command(name = "poller-agent")]
#[command(about = "Claims and runs external tasks for workflow steps", long_about = None)]
struct Cli {
    /// Store connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Task list to claim from
    #[arg(long)]
    task_list: Option<String>,

    /// Service name recorded on the server record
    #[arg(long)]
    service_name: Option<String>,

    /// Poll interval in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Maximum number of tasks processed at once
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Skip creating tables and indexes on startup
    #[arg(long)]
    skip_migrations: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "poller_agent=info,poller_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.apply_to(AgentPollerConfig::from_env()))?;

    info!(
        "Loaded configuration: service={}, task_list={}",
        config.service_name, config.task_list
    );

    let store = PgStore::new(&config.database_url).context("Failed to create store")?;
    if !cli.skip_migrations {
        store
            .run_migrations()
            .await
            .context("Failed to run migrations")?;
        info!("Migrations applied");
    }

    let poller = Arc::new(AgentPoller::new(config, Arc::new(store)));
    poller.register("Echo", handler_fn(|params| Ok(params)));

    info!("Registered handlers: {}", poller.registry().names().join(", "));

    let mut runner = tokio::spawn({
        let poller = Arc::clone(&poller);
        async move { poller.start().await }
    });

    let result = tokio::select! {
        result = &mut runner => result,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
            poller.stop().await;
            runner.await
        }
    };

    if let Err(e) = result.context("Poller task panicked")? {
        error!("Poller error: {}", e);
        return Err(e.into());
    }

    Ok(())
}

impl Cli {
    fn apply_to(&self, mut config: AgentPollerConfig) -> AgentPollerConfig {
        if let Some(url) = &self.database_url {
            config.database_url = url.clone();
        }
        if let Some(task_list) = &self.task_list {
            config.task_list = task_list.clone();
        }
        if let Some(service_name) = &self.service_name {
            config.service_name = service_name.clone();
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(max) = self.max_concurrent {
            config.max_concurrent = max;
        }
        config
    }
}

fn load_config(config: AgentPollerConfig) -> Result<AgentPollerConfig> {
    config.validate().context("Invalid configuration")?;
    Ok(config)
}
