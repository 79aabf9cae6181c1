//! Binary report codec.
//!
//! A report is the ABI encoding of the parameter list
//! `(uint256 fastGasWei, uint256 linkNative, uint256[] upkeepIds, PerformDataWrapper[] wrappedPerformDatas)`,
//! the shape the registry `transmit` function expects.
use alloy::sol_types::SolValue;
use alloy_primitives::U256;
use thiserror::Error;
use tracing::debug;

use crate::keys::UpkeepKey;
use crate::result::UpkeepResult;
use crate::result::UpkeepState;

alloy::sol! {
    /// A perform payload together with the block it was checked at.
    #[derive(Debug, PartialEq, Eq)]
    struct PerformDataWrapper {
        uint32 checkBlockNumber;
        bytes32 checkBlockhash;
        bytes performData;
    }
}

type ReportParams = (U256, U256, Vec<U256>, Vec<PerformDataWrapper>);

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("failed to unpack report: {0}")]
    Abi(#[from] alloy::sol_types::Error),

    #[error("upkeep ids and perform data length mismatch: {ids} ids, {perform_datas} perform data")]
    LengthMismatch { ids: usize, perform_datas: usize },
}

/// Packs the results into a single report.
///
/// An empty input yields an empty report. The price pair of the whole report is
/// taken from the result with the highest check block, the first one on ties.
pub fn encode_report(results: &[UpkeepResult]) -> Result<Vec<u8>, ReportError> {
    let Some(first) = results.first() else {
        return Ok(Vec::new());
    };

    // TODO: confirm with the registry owners whether a per-report price pair taken
    // from the latest check is intended, or whether all results are expected to
    // share one block.
    let representative = results.iter().fold(first, |best, result| {
        if result.check_block_number > best.check_block_number {
            result
        } else {
            best
        }
    });

    let ids = results
        .iter()
        .map(|result| result.key.upkeep_id().as_u256())
        .collect::<Vec<_>>();

    let wrapped = results
        .iter()
        .map(|result| PerformDataWrapper {
            checkBlockNumber: result.check_block_number,
            checkBlockhash: result.check_block_hash,
            performData: result.perform_data.clone(),
        })
        .collect::<Vec<_>>();

    let params: ReportParams = (
        representative.fast_gas_wei,
        representative.link_native,
        ids,
        wrapped,
    );
    let report = params.abi_encode_params();

    debug!(
        "Encoded report. upkeeps: {} size: {} check_block: {}",
        results.len(),
        report.len(),
        representative.check_block_number,
    );

    Ok(report)
}

/// Reconstructs the results packed in a report.
///
/// Every decoded result is [`UpkeepState::Eligible`] and carries the report wide
/// price pair.
pub fn decode_report(raw: &[u8]) -> Result<Vec<UpkeepResult>, ReportError> {
    let (fast_gas_wei, link_native, ids, wrapped) =
        <ReportParams as SolValue>::abi_decode_params(raw, true)?;

    if ids.len() != wrapped.len() {
        return Err(ReportError::LengthMismatch {
            ids: ids.len(),
            perform_datas: wrapped.len(),
        });
    }

    let results = ids
        .into_iter()
        .zip(wrapped)
        .map(|(id, wrapper)| {
            let key = UpkeepKey::new(u64::from(wrapper.checkBlockNumber), id);
            let mut result = UpkeepResult::new(key, UpkeepState::Eligible);
            result.perform_data = wrapper.performData;
            result.fast_gas_wei = fast_gas_wei;
            result.link_native = link_native;
            result.check_block_number = wrapper.checkBlockNumber;
            result.check_block_hash = wrapper.checkBlockhash;
            result
        })
        .collect();

    Ok(results)
}
