//! CLI for situfeed.
//!
//! `run` is the long-lived relay service: it polls the situation feed, tracks
//! what was already published and pushes new, updated and deleted records to
//! MQTT. `preview` and `check-mappings` are offline helpers for working on the
//! mapping file.

mod config;
mod feed;
mod http;
mod mqtt;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use config::{AppConfig, RunArgs, DEFAULT_MAPPINGS_PATH, DEFAULT_TOPIC_PREFIX};
use situfeed_core::{BusClient, BusError};
use situfeed_mapping::RecordTransformer;
use situfeed_relay::{Metrics, Relay, TopicPublisher};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Worker threads of the async runtime
    #[arg(long, env = "WORKER_THREADS", default_value_t = 4, global = true)]
    worker_threads: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Relay the feed to MQTT until interrupted
    Run(RunArgs),
    /// Fetch once and print `topic<TAB>payload` for every record
    Preview {
        /// Feed URL or local XML file
        source: String,

        #[arg(long, env = "MAPPINGS_PATH", default_value = DEFAULT_MAPPINGS_PATH)]
        mappings: PathBuf,

        #[arg(long, env = "TOPIC_PREFIX", default_value = DEFAULT_TOPIC_PREFIX)]
        topic_prefix: String,

        #[arg(long, env = "HTTP_TIMEOUT_SECONDS", default_value_t = 30)]
        http_timeout_seconds: u64,
    },
    /// Validate a mapping file and report how many type rules it yields
    CheckMappings {
        #[arg(long, env = "MAPPINGS_PATH", default_value = DEFAULT_MAPPINGS_PATH)]
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckMappings { path } => check_mappings(&path),
        Commands::Preview {
            source,
            mappings,
            topic_prefix,
            http_timeout_seconds,
        } => {
            let prefix = config::validate_prefix(&topic_prefix)?;
            let timeout = Duration::from_secs(http_timeout_seconds.max(1));
            runtime(cli.worker_threads)?.block_on(preview(&source, &mappings, prefix, timeout))
        }
        Commands::Run(args) => {
            let config = AppConfig::from_args(args)?;
            runtime(cli.worker_threads)?.block_on(run(config))
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn runtime(worker_threads: usize) -> Result<tokio::runtime::Runtime> {
    if worker_threads == 0 {
        anyhow::bail!("WORKER_THREADS must be at least 1");
    }
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

fn load_transformer(path: &Path) -> Result<RecordTransformer> {
    RecordTransformer::from_path(path)
        .with_context(|| format!("failed to load mapping file {}", path.display()))
}

fn check_mappings(path: &Path) -> Result<()> {
    let transformer = load_transformer(path)?;
    println!("{}: {} type rules", path.display(), transformer.rule_count());
    Ok(())
}

/// Prints instead of publishing.
struct StdoutBus;

#[async_trait]
impl BusClient for StdoutBus {
    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{topic}\t{}", String::from_utf8_lossy(&payload))
            .map_err(|e| BusError::Send(e.to_string()))
    }
}

async fn preview(source: &str, mappings: &Path, prefix: String, timeout: Duration) -> Result<()> {
    let transformer = Arc::new(load_transformer(mappings)?);
    let publisher = TopicPublisher::new(prefix, transformer, Arc::new(StdoutBus));
    let publication = feed::source_for(source, timeout)?
        .fetch()
        .await
        .with_context(|| format!("failed to fetch {source}"))?;

    let mut failed = 0;
    for record in publication.into_records() {
        if let Err(err) = publisher.publish(&record).await {
            failed += 1;
            warn!(id = %record.id, error = %err, "record skipped");
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} record(s) could not be transformed");
    }
    Ok(())
}

async fn run(config: AppConfig) -> Result<()> {
    let transformer = Arc::new(load_transformer(&config.mappings_path)?);
    info!(
        rules = transformer.rule_count(),
        path = %config.mappings_path.display(),
        "mapping rules loaded"
    );

    let metrics = Arc::new(Metrics::default());
    let listener = http::bind(config.metrics_port).await?;
    let (stop_server, server_stopped) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(http::serve(listener, Arc::clone(&metrics), async {
        let _ = server_stopped.await;
    }));

    let bus = Arc::new(mqtt::MqttBus::connect(&config.broker, &config.client_id));
    let publisher = TopicPublisher::new(config.topic_prefix.clone(), transformer, Arc::clone(&bus))
        .with_send_timeout(config.timeout);
    let source = feed::HttpFeedSource::new(config.feed_url.clone(), config.timeout)?;
    let relay = Relay::new(source, publisher, metrics);

    info!(
        feed = %config.feed_url,
        broker = %format!("{}:{}", config.broker.host, config.broker.port),
        prefix = %config.topic_prefix,
        interval_secs = config.poll_interval.as_secs(),
        "relay started"
    );
    relay.run(config.poll_interval, shutdown_signal()).await;

    bus.disconnect().await;
    let _ = stop_server.send(());
    match server.await {
        Ok(result) => result?,
        Err(err) => warn!(error = %err, "metrics server task failed"),
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
