//! wavequeue CLI: serve the queue over HTTP or validate a config file.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use wavequeue::{QueueManagerBuilder, QueueMetrics, ServerConfig};

#[derive(Parser)]
#[command(name = "wavequeue", about = "Bounded work queue with live event streaming")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server
    Serve {
        /// TOML config file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Address to listen on (overrides config and WAVEQUEUE_BIND)
        #[arg(long)]
        bind: Option<String>,
        /// Queue capacity
        #[arg(long)]
        capacity: Option<usize>,
        /// Consumer idle poll interval in milliseconds
        #[arg(long)]
        poll_ms: Option<u64>,
    },
    /// Load and validate a config file, then print the effective settings
    CheckConfig {
        /// TOML config file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match cli.command {
        Command::Serve {
            config,
            bind,
            capacity,
            poll_ms,
        } => {
            let mut settings = load_config(config.as_ref())?;
            if let Some(bind) = bind {
                settings.bind = bind;
            }
            if let Some(capacity) = capacity {
                settings.queue = settings.queue.with_capacity(capacity);
            }
            if let Some(ms) = poll_ms {
                settings.queue = settings.queue.with_poll_interval(Duration::from_millis(ms));
            }
            cmd_serve(settings).await
        }
        Command::CheckConfig { config } => {
            let settings = load_config(config.as_ref())?;
            settings.queue.validate()?;
            println!("{}", toml::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<ServerConfig> {
    let mut settings = match path {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    settings.apply_env();
    Ok(settings)
}

async fn cmd_serve(settings: ServerConfig) -> anyhow::Result<()> {
    let manager = QueueManagerBuilder::new(settings.queue.clone())
        .with_metrics(QueueMetrics::local())
        .build()?;
    manager.start().await?;

    #[cfg(feature = "monitoring")]
    let _monitor = wavequeue::QueueMonitor::new(manager.clone()).start();

    tracing::info!(
        capacity = settings.queue.capacity,
        poll_ms = settings.queue.consume_poll.as_millis() as u64,
        "queue ready"
    );

    wavequeue::server::serve(manager, &settings.bind).await
}
