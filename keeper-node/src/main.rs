use std::sync::Arc;

use anyhow::bail;
use anyhow::Context;
use clap::Parser;
use keeper_node::config::Config;
use keeper_node::health;
use keeper_node::health::LastRound;
use keeper_node::logging::install_panic_hook;
use keeper_node::logging::setup_logging;
use keeper_node::metrics::Metrics;
use keeper_node::round::error_type;
use keeper_node::round::run_round;
use keeper_registry::AlloyChainClient;
use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::span;
use tracing::warn;
use tracing::Level;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Clone, Debug)]
struct Cli {
    /// Path to the configuration file.
    #[clap(short, long)]
    config: Option<String>,

    /// If set, output logs in JSON format.
    #[clap(short, long, action)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.json);
    install_panic_hook();

    if let Err(err) = run(cli).await {
        error!("Node exited due to an error: {:?}", err);
        return Err(err);
    }

    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let version = env!("CARGO_PKG_VERSION");
    info!("Starting keeper node. version: {}", version);

    let config = Config::load(cli.config)?;
    config.validate()?;
    debug!("Loaded configuration: {:?}", config);

    let span = span!(
        Level::INFO,
        "Starting node",
        "registry" = config.registry.address.as_str(),
        "version" = version,
    );
    let _guard = span.enter();

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.prometheus.port))
        .install()
        .context("setting up Prometheus")?;

    let client = AlloyChainClient::connect(&config.rpc.url()?)
        .await
        .context("connecting to the chain node")?;
    let registry = config.registry.build(Arc::new(client))?;

    let last_round = LastRound::starting_now();
    tokio::spawn(health::serve(
        config.node.health_port,
        config.node.liveness_check_interval,
        last_round.clone(),
    ));

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received interrupt, shutting down"),
            Err(err) => warn!("Failed to listen for interrupts. err: {}", err),
        }
        signal.cancel();
    });

    let metrics = Metrics::new();
    let mut ticker = registry
        .client()
        .head_ticker_with_cancellation(shutdown.clone());

    loop {
        let head = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            head = ticker.recv() => head,
        };
        let Some(mut head) = head else {
            bail!("head ticker stopped");
        };

        // Rounds only ever run against the freshest head.
        while let Ok(newer) = ticker.try_recv() {
            head = newer;
        }

        match run_round(&registry, &shutdown, &metrics, head).await {
            Ok(_) => last_round.mark(),
            Err(err) => {
                let error_type = error_type(&err);
                metrics.increment_round_errors(error_type);
                if error_type != "cancelled" {
                    error!("Round failed. block: {} err: {:?}", head, err);
                }
            },
        }
    }

    info!("Keeper node stopped");

    Ok(())
}
