use std::sync::Arc;

use anyhow::*;
use clap::Parser;
use keeper_messages::decode_report;
use keeper_messages::UpkeepObservation;
use keeper_node::config::Config;
use keeper_node::logging::install_panic_hook;
use keeper_node::round::check_observation;
use keeper_registry::AlloyChainClient;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Clone, Debug)]
/// Check the upkeeps of an observation JSON file and print the resulting report,
/// or decode a report.
struct Cli {
    #[clap(short, long)]
    /// The config file.
    config: Option<String>,

    #[clap(long, conflicts_with = "input")]
    /// Decode this hex encoded report instead of checking anything.
    decode: Option<String>,

    #[clap(required_unless_present = "decode")]
    /// The observation, as `{"1": "<block>", "2": ["<id>", ...]}`.
    input: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    install_panic_hook();

    let subscriber = tracing_subscriber::fmt()
        .pretty()
        .compact()
        .with_level(true)
        .with_file(false)
        .with_line_number(false)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Setting up logging failed");

    let cli = Cli::parse();

    if let Some(report) = cli.decode {
        let raw = hex::decode(report.trim().trim_start_matches("0x"))
            .context("report is not valid hex")?;
        let results = decode_report(&raw).context("decoding report")?;
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    let input = cli.input.context("an observation file is required")?;
    let observation = std::fs::read(&input)
        .with_context(|| format!("failed to open `{}`", input))
        .and_then(|content| {
            UpkeepObservation::from_json(&content).context("failed to parse observation")
        })?;

    let config = Config::load(cli.config)?;
    config.validate()?;

    let client = AlloyChainClient::connect(&config.rpc.url()?)
        .await
        .context("connecting to the chain node")?;
    let registry = config.registry.build(Arc::new(client))?;

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.cancel();
        }
    });

    let (eligible, report) = check_observation(&registry, &cancel, &observation)
        .await
        .context("check failed")?;

    info!(
        "Checked observation. block: {} upkeeps: {} eligible: {}",
        observation.block_key(),
        observation.upkeep_identifiers().len(),
        eligible.len(),
    );
    println!("0x{}", hex::encode(report));

    Ok(())
}
