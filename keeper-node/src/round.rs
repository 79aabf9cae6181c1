//! One eligibility round: discover, check, report.
use std::time::Instant;

use anyhow::Context;
use keeper_messages::encode_report;
use keeper_messages::BlockKey;
use keeper_messages::ReportError;
use keeper_messages::UpkeepObservation;
use keeper_messages::UpkeepResult;
use keeper_registry::ChainClient;
use keeper_registry::Registry;
use keeper_registry::RegistryError;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;

use crate::metrics::Metrics;

#[derive(Debug)]
pub struct RoundOutcome {
    pub observation: UpkeepObservation,
    pub eligible: Vec<UpkeepResult>,
    pub report: Vec<u8>,
}

/// Checks the upkeeps of `observation` at its block and packs the eligible ones
/// into a report.
pub async fn check_observation<C: ChainClient>(
    registry: &Registry<C>,
    cancel: &CancellationToken,
    observation: &UpkeepObservation,
) -> anyhow::Result<(Vec<UpkeepResult>, Vec<u8>)> {
    let keys = observation.upkeep_keys();
    let results = registry
        .check_upkeep(cancel, &keys)
        .await
        .context("checking upkeeps")?;

    let eligible = results
        .into_iter()
        .filter(UpkeepResult::is_eligible)
        .collect::<Vec<_>>();
    let report = encode_report(&eligible).context("encoding report")?;

    Ok((eligible, report))
}

/// Runs a full round against the head `head`.
#[tracing::instrument(skip(registry, cancel, metrics), err(Debug))]
pub async fn run_round<C: ChainClient>(
    registry: &Registry<C>,
    cancel: &CancellationToken,
    metrics: &Metrics,
    head: BlockKey,
) -> anyhow::Result<RoundOutcome> {
    let started = Instant::now();

    let ids = registry
        .get_active_upkeep_ids()
        .await
        .context("fetching active upkeeps")?;
    let observation = UpkeepObservation::new(head, ids).context("building observation")?;

    let (eligible, report) = check_observation(registry, cancel, &observation).await?;

    let json = observation.to_json().context("serializing observation")?;
    info!(
        "Round complete. block: {} checked: {} eligible: {} report_size: {}",
        head,
        observation.upkeep_identifiers().len(),
        eligible.len(),
        report.len(),
    );
    debug!("Observation: {}", String::from_utf8_lossy(&json));
    debug!("Report: 0x{}", hex::encode(&report));

    metrics.increment_rounds();
    metrics.increment_upkeeps_checked(observation.upkeep_identifiers().len());
    metrics.increment_upkeeps_eligible(eligible.len());
    metrics.observe_report_size(report.len());
    metrics.observe_round_duration(started.elapsed().as_secs_f64());

    Ok(RoundOutcome {
        observation,
        eligible,
        report,
    })
}

/// Metric label for a failed round.
pub fn error_type(err: &anyhow::Error) -> &'static str {
    for cause in err.chain() {
        if let Some(err) = cause.downcast_ref::<RegistryError>() {
            return match err {
                RegistryError::ContextCancelled => "cancelled",
                RegistryError::CheckFailed(_) => "check",
                RegistryError::RegistryCallFailure(_) => "registry_call",
                _ => "registry",
            };
        }
        if cause.downcast_ref::<ReportError>().is_some() {
            return "report";
        }
    }
    "other"
}
