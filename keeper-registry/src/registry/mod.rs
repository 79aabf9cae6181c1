//! Keeper registry reads: active upkeep discovery and the two phase eligibility
//! check.
use std::fmt::Display;

use alloy::sol_types::SolCall;
use alloy::sol_types::SolValue;
use alloy_primitives::Address;
use alloy_primitives::U256;
use keeper_messages::PerformDataWrapper;
use keeper_messages::UpkeepFailureReason;
use keeper_messages::UpkeepIdentifier;
use keeper_messages::UpkeepKey;
use keeper_messages::UpkeepResult;
use keeper_messages::UpkeepState;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::client::BatchChainClient;
use crate::client::BatchElem;
use crate::client::BlockTag;
use crate::client::ChainClient;
use crate::client::EthCall;
use crate::error::CallError;
use crate::error::RegistryError;

pub mod abi;

use abi::IKeeperRegistry;

/// Maximum page size when listing active upkeeps.
pub const ACTIVE_UPKEEP_ID_BATCH_SIZE: u64 = 10_000;

/// A checked upkeep together with the block its calls are pinned to.
struct Checked {
    result: UpkeepResult,
    block: u64,
}

pub struct Registry<C> {
    address: Address,
    client: BatchChainClient<C>,
}

impl<C: ChainClient> Registry<C> {
    pub fn new(
        address: Address,
        client: BatchChainClient<C>,
    ) -> Result<Self, RegistryError> {
        if address.is_zero() {
            return Err(RegistryError::InitializationFailure(
                "registry address is the zero address".to_string(),
            ));
        }
        if client.batch_size() == 0 {
            return Err(RegistryError::InitializationFailure(
                "batch size must be positive".to_string(),
            ));
        }

        Ok(Self { address, client })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn client(&self) -> &BatchChainClient<C> {
        &self.client
    }

    /// Calls `call` on the registry at the latest block.
    async fn call<T: SolCall>(
        &self,
        call: &T,
    ) -> Result<T::Return, RegistryError> {
        let mut batch = [BatchElem::new(EthCall {
            to: self.address,
            data: call.abi_encode().into(),
            block: BlockTag::Latest,
        })];
        self.client
            .batch_call_context(&mut batch)
            .await
            .map_err(|err| call_failure(T::SIGNATURE, err))?;

        let [elem] = batch;
        let output = elem
            .into_result()
            .map_err(|err| call_failure(T::SIGNATURE, err))?;

        T::abi_decode_returns(&output, true).map_err(|err| call_failure(T::SIGNATURE, err))
    }

    /// Lists the ids of every active upkeep, paging through the registry.
    pub async fn get_active_upkeep_ids(&self) -> Result<Vec<UpkeepIdentifier>, RegistryError> {
        let state = self.call(&IKeeperRegistry::getStateCall {}).await?;
        let total = state.state.numUpkeeps;

        let mut ids = Vec::new();
        while U256::from(ids.len()) < total {
            let start = U256::from(ids.len());
            let max_count = (total - start).min(U256::from(ACTIVE_UPKEEP_ID_BATCH_SIZE));

            let page = self
                .call(&IKeeperRegistry::getActiveUpkeepIDsCall {
                    startIndex: start,
                    maxCount: max_count,
                })
                .await?
                ._0;

            if page.is_empty() {
                warn!(
                    "Registry returned an empty page of active upkeeps. start: {} expected_total: {}",
                    start, total,
                );
                break;
            }

            ids.extend(page.into_iter().map(UpkeepIdentifier::from));
        }

        info!("Fetched active upkeeps. count: {}", ids.len());

        Ok(ids)
    }

    /// Checks every key at its own block and simulates the eligible ones.
    ///
    /// Keys whose check reverts are left out of the output. Any other call failure
    /// fails the whole invocation. Firing `cancel` abandons the in-flight calls.
    pub async fn check_upkeep(
        &self,
        cancel: &CancellationToken,
        keys: &[UpkeepKey],
    ) -> Result<Vec<UpkeepResult>, RegistryError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RegistryError::ContextCancelled),
            results = self.check_and_simulate(keys) => results,
        }
    }

    async fn check_and_simulate(
        &self,
        keys: &[UpkeepKey],
    ) -> Result<Vec<UpkeepResult>, RegistryError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let blocks = self.resolve_blocks(keys).await?;
        let checked = self.check(keys, &blocks).await?;
        let results = self.simulate(checked).await?;

        debug!(
            "Checked upkeeps. keys: {} results: {} eligible: {}",
            keys.len(),
            results.len(),
            results.iter().filter(|result| result.is_eligible()).count(),
        );

        Ok(results)
    }

    /// Block `0` stands for the latest block, which is read once.
    async fn resolve_blocks(
        &self,
        keys: &[UpkeepKey],
    ) -> Result<Vec<u64>, RegistryError> {
        let latest = if keys.iter().any(|key| key.block_key().number() == 0) {
            self.client
                .header_by_number(None)
                .await
                .map_err(|err| call_failure("eth_getBlockByNumber", err))?
                .number
        } else {
            0
        };

        Ok(keys
            .iter()
            .map(|key| {
                match key.block_key().number() {
                    0 => latest,
                    number => number,
                }
            })
            .collect())
    }

    async fn check(
        &self,
        keys: &[UpkeepKey],
        blocks: &[u64],
    ) -> Result<Vec<Checked>, RegistryError> {
        let mut batch = keys
            .iter()
            .zip(blocks)
            .map(|(key, block)| {
                let call = IKeeperRegistry::checkUpkeepCall {
                    id: key.upkeep_id().as_u256(),
                };
                BatchElem::new(EthCall {
                    to: self.address,
                    data: SolCall::abi_encode(&call).into(),
                    block: BlockTag::Number(*block),
                })
            })
            .collect::<Vec<_>>();

        self.client.batch_call_context(&mut batch).await?;

        let mut checked = Vec::with_capacity(keys.len());
        let mut errors = Vec::new();
        for ((key, block), elem) in keys.iter().zip(blocks).zip(batch) {
            match elem.into_result() {
                Ok(output) => {
                    match check_result(*key, &output) {
                        Ok(result) => {
                            checked.push(Checked {
                                result,
                                block: *block,
                            })
                        },
                        Err(err) => errors.push(err),
                    }
                },
                Err(CallError::Reverted(reason)) => {
                    debug!("Upkeep check reverted, skipping. key: {} reason: {}", key, reason);
                },
                Err(err) => errors.push(err),
            }
        }

        if !errors.is_empty() {
            return Err(RegistryError::CheckFailed(errors.into()));
        }

        Ok(checked)
    }

    async fn simulate(
        &self,
        checked: Vec<Checked>,
    ) -> Result<Vec<UpkeepResult>, RegistryError> {
        let eligible = checked
            .iter()
            .enumerate()
            .filter(|(_, checked)| checked.result.is_eligible())
            .map(|(i, _)| i)
            .collect::<Vec<_>>();

        let mut results = checked
            .into_iter()
            .map(|checked| (checked.result, checked.block))
            .collect::<Vec<_>>();

        if eligible.is_empty() {
            return Ok(results.into_iter().map(|(result, _)| result).collect());
        }

        let mut batch = eligible
            .iter()
            .map(|i| {
                let (result, block) = &results[*i];
                let call = IKeeperRegistry::simulatePerformUpkeepCall {
                    id: result.key.upkeep_id().as_u256(),
                    performData: result.perform_data.clone(),
                };
                BatchElem::new(EthCall {
                    to: self.address,
                    data: SolCall::abi_encode(&call).into(),
                    block: BlockTag::Number(*block),
                })
            })
            .collect::<Vec<_>>();

        self.client.batch_call_context(&mut batch).await?;

        let mut errors = Vec::new();
        for (i, elem) in eligible.into_iter().zip(batch) {
            let (result, _) = &mut results[i];
            match elem.into_result() {
                Ok(output) => {
                    match IKeeperRegistry::simulatePerformUpkeepCall::abi_decode_returns(&output, true) {
                        Ok(returned) if !returned.success => {
                            debug!("Simulated perform failed. key: {}", result.key);
                            result.state = UpkeepState::NotEligible;
                        },
                        Ok(_) => {},
                        Err(err) => errors.push(decode_failure(&result.key, err)),
                    }
                },
                Err(CallError::Reverted(reason)) => {
                    debug!("Simulated perform reverted. key: {} reason: {}", result.key, reason);
                    result.state = UpkeepState::NotEligible;
                },
                Err(err) => errors.push(err),
            }
        }

        if !errors.is_empty() {
            return Err(RegistryError::CheckFailed(errors.into()));
        }

        Ok(results.into_iter().map(|(result, _)| result).collect())
    }
}

fn call_failure(
    signature: &str,
    err: impl Display,
) -> RegistryError {
    RegistryError::RegistryCallFailure(format!("{signature}: {err}"))
}

fn decode_failure(
    key: &UpkeepKey,
    err: impl Display,
) -> CallError {
    CallError::Other(format!("undecodable return data for {key}: {err}"))
}

fn check_result(
    key: UpkeepKey,
    output: &[u8],
) -> Result<UpkeepResult, CallError> {
    let returned = IKeeperRegistry::checkUpkeepCall::abi_decode_returns(output, true)
        .map_err(|err| decode_failure(&key, err))?;

    let state = if returned.upkeepNeeded {
        UpkeepState::Eligible
    } else {
        UpkeepState::NotEligible
    };

    let mut result = UpkeepResult::new(key, state);
    result.failure_reason = UpkeepFailureReason::from(returned.upkeepFailureReason);
    result.gas_used = returned.gasUsed;
    result.fast_gas_wei = returned.fastGasWei;
    result.link_native = returned.linkNative;

    if returned.upkeepNeeded {
        let wrapper = <PerformDataWrapper as SolValue>::abi_decode(&returned.performData, true)
            .map_err(|err| decode_failure(&key, err))?;
        result.check_block_number = wrapper.checkBlockNumber;
        result.check_block_hash = wrapper.checkBlockhash;
        result.perform_data = wrapper.performData;
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use alloy_primitives::Bytes;

    use super::*;
    use crate::test_utils::CheckBehavior;
    use crate::test_utils::MockChainClient;
    use crate::test_utils::SimulateBehavior;
    use crate::test_utils::REGISTRY_ADDRESS;

    fn registry(
        mock: &Arc<MockChainClient>,
        batch_size: usize,
    ) -> Registry<MockChainClient> {
        Registry::new(
            REGISTRY_ADDRESS,
            BatchChainClient::new(Arc::clone(mock), batch_size),
        )
        .unwrap()
    }

    fn needed(check_block: u32) -> CheckBehavior {
        CheckBehavior::Needed {
            check_block,
            perform_data: Bytes::from_static(b"perform"),
        }
    }

    #[test]
    fn test_rejects_zero_address() {
        let client = BatchChainClient::new(Arc::new(MockChainClient::default()), 10);
        assert!(matches!(
            Registry::new(Address::ZERO, client),
            Err(RegistryError::InitializationFailure(_))
        ));

        let client = BatchChainClient::new(Arc::new(MockChainClient::default()), 0);
        assert!(matches!(
            Registry::new(REGISTRY_ADDRESS, client),
            Err(RegistryError::InitializationFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_active_upkeep_pagination() {
        let mock = Arc::new(MockChainClient::default());
        mock.set_active_upkeeps(25_000);

        let ids = registry(&mock, 100).get_active_upkeep_ids().await.unwrap();

        assert_eq!(ids.len(), 25_000);
        assert_eq!(ids[0], UpkeepIdentifier::from(1u64));
        assert_eq!(ids[24_999], UpkeepIdentifier::from(25_000u64));
        assert_eq!(
            mock.page_requests(),
            vec![
                (U256::from(0), U256::from(10_000)),
                (U256::from(10_000), U256::from(10_000)),
                (U256::from(20_000), U256::from(5_000)),
            ]
        );
    }

    #[tokio::test]
    async fn test_active_upkeeps_stop_on_empty_page() {
        let mock = Arc::new(MockChainClient::default());
        mock.set_active_upkeeps(5);
        mock.set_reported_upkeeps(12);

        let ids = registry(&mock, 100).get_active_upkeep_ids().await.unwrap();

        assert_eq!(ids.len(), 5);
        assert_eq!(mock.page_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_state_failure() {
        let mock = Arc::new(MockChainClient::default());
        mock.fail_state();

        assert!(matches!(
            registry(&mock, 100).get_active_upkeep_ids().await,
            Err(RegistryError::RegistryCallFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_check_upkeep() {
        let mock = Arc::new(MockChainClient::default());
        mock.set_check(1, needed(40));
        mock.set_check(2, CheckBehavior::NotNeeded);
        mock.set_check(3, CheckBehavior::Reverted);
        mock.set_check(4, needed(41));
        mock.set_simulation(4, SimulateBehavior::Failure);

        let keys = [
            UpkeepKey::new(50u64, 1u64),
            UpkeepKey::new(51u64, 2u64),
            UpkeepKey::new(52u64, 3u64),
            UpkeepKey::new(53u64, 4u64),
        ];
        let results = registry(&mock, 2)
            .check_upkeep(&CancellationToken::new(), &keys)
            .await
            .unwrap();

        // The reverted key is dropped, order is kept.
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].key, keys[0]);
        assert_eq!(results[1].key, keys[1]);
        assert_eq!(results[2].key, keys[3]);

        assert_eq!(results[0].state, UpkeepState::Eligible);
        assert_eq!(results[0].perform_data, Bytes::from_static(b"perform"));
        assert_eq!(results[0].check_block_number, 40);
        // Each call is pinned to its key's block.
        assert_eq!(results[0].fast_gas_wei, U256::from(50));

        assert_eq!(results[1].state, UpkeepState::NotEligible);
        assert_eq!(results[1].failure_reason, UpkeepFailureReason::UpkeepNotNeeded);
        assert!(results[1].perform_data.is_empty());

        // Failed simulation downgrades.
        assert_eq!(results[2].state, UpkeepState::NotEligible);

        let simulated = mock
            .calls()
            .into_iter()
            .filter(|call| call.data.starts_with(&IKeeperRegistry::simulatePerformUpkeepCall::SELECTOR))
            .map(|call| call.block)
            .collect::<Vec<_>>();
        assert_eq!(simulated, vec![BlockTag::Number(50), BlockTag::Number(53)]);
    }

    #[tokio::test]
    async fn test_reverted_simulation_downgrades() {
        let mock = Arc::new(MockChainClient::default());
        mock.set_check(9, needed(10));
        mock.set_simulation(9, SimulateBehavior::Reverted);

        let results = registry(&mock, 10)
            .check_upkeep(&CancellationToken::new(), &[UpkeepKey::new(11u64, 9u64)])
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].state, UpkeepState::NotEligible);
    }

    #[tokio::test]
    async fn test_only_reverted_checks() {
        let mock = Arc::new(MockChainClient::default());
        mock.set_check(1, CheckBehavior::Reverted);
        mock.set_check(2, needed(5));

        let results = registry(&mock, 10)
            .check_upkeep(
                &CancellationToken::new(),
                &[UpkeepKey::new(5u64, 1u64), UpkeepKey::new(5u64, 2u64)],
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, UpkeepKey::new(5u64, 2u64));
        assert!(results[0].is_eligible());
    }

    #[tokio::test]
    async fn test_check_failures_are_combined() {
        let mock = Arc::new(MockChainClient::default());
        mock.set_check(1, CheckBehavior::Failed);
        mock.set_check(2, needed(5));
        mock.set_check(3, CheckBehavior::Failed);

        let keys = [
            UpkeepKey::new(5u64, 1u64),
            UpkeepKey::new(5u64, 2u64),
            UpkeepKey::new(5u64, 3u64),
        ];
        let err = registry(&mock, 10)
            .check_upkeep(&CancellationToken::new(), &keys)
            .await
            .unwrap_err();

        match err {
            RegistryError::CheckFailed(errors) => assert_eq!(errors.errors().len(), 2),
            other => panic!("unexpected error {other:?}"),
        }
        // No simulation after a failed check phase.
        assert!(mock
            .calls()
            .iter()
            .all(|call| !call.data.starts_with(&IKeeperRegistry::simulatePerformUpkeepCall::SELECTOR)));
    }

    #[tokio::test]
    async fn test_simulation_failure_is_fatal() {
        let mock = Arc::new(MockChainClient::default());
        mock.set_check(1, needed(5));
        mock.set_simulation(1, SimulateBehavior::Failed);

        assert!(matches!(
            registry(&mock, 10)
                .check_upkeep(&CancellationToken::new(), &[UpkeepKey::new(5u64, 1u64)])
                .await,
            Err(RegistryError::CheckFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_latest_block_resolved_once() {
        let mock = Arc::new(MockChainClient::default());
        mock.set_latest(Some(77));
        mock.set_check(1, needed(70));
        mock.set_check(2, needed(71));

        let keys = [
            UpkeepKey::new(0u64, 1u64),
            UpkeepKey::new(0u64, 2u64),
            UpkeepKey::new(60u64, 3u64),
        ];
        let results = registry(&mock, 10)
            .check_upkeep(&CancellationToken::new(), &keys)
            .await
            .unwrap();

        assert_eq!(mock.latest_requests(), 1);
        assert_eq!(results[0].fast_gas_wei, U256::from(77));
        assert_eq!(results[1].fast_gas_wei, U256::from(77));
        assert_eq!(results[2].fast_gas_wei, U256::from(60));
    }

    #[tokio::test]
    async fn test_missing_latest_header() {
        let mock = Arc::new(MockChainClient::default());
        mock.set_latest(None);
        mock.set_check(1, needed(5));

        let err = registry(&mock, 10)
            .check_upkeep(&CancellationToken::new(), &[UpkeepKey::new(0u64, 1u64)])
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::RegistryCallFailure(_)));
        assert!(mock.batch_sizes().is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_check_output_is_combined() {
        let mock = Arc::new(MockChainClient::default());
        mock.set_check(1, CheckBehavior::Malformed);
        mock.set_check(2, CheckBehavior::Failed);
        mock.set_check(3, needed(5));

        let keys = [
            UpkeepKey::new(5u64, 1u64),
            UpkeepKey::new(5u64, 2u64),
            UpkeepKey::new(5u64, 3u64),
        ];
        let err = registry(&mock, 10)
            .check_upkeep(&CancellationToken::new(), &keys)
            .await
            .unwrap_err();

        match err {
            RegistryError::CheckFailed(errors) => {
                assert_eq!(errors.errors().len(), 2);
                assert!(matches!(&errors.errors()[0], CallError::Other(msg) if msg.contains("5|1")));
            },
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_undecodable_simulation_output_is_combined() {
        let mock = Arc::new(MockChainClient::default());
        mock.set_check(1, needed(5));
        mock.set_check(2, needed(5));
        mock.set_simulation(1, SimulateBehavior::Malformed);
        mock.set_simulation(2, SimulateBehavior::Failed);

        let err = registry(&mock, 10)
            .check_upkeep(
                &CancellationToken::new(),
                &[UpkeepKey::new(5u64, 1u64), UpkeepKey::new(5u64, 2u64)],
            )
            .await
            .unwrap_err();

        match err {
            RegistryError::CheckFailed(errors) => assert_eq!(errors.errors().len(), 2),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_keys() {
        let mock = Arc::new(MockChainClient::default());

        let results = registry(&mock, 10)
            .check_upkeep(&CancellationToken::new(), &[])
            .await
            .unwrap();

        assert!(results.is_empty());
        assert!(mock.batch_sizes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation() {
        let mock = Arc::new(MockChainClient::default());
        mock.set_delay(Duration::from_secs(10));
        mock.set_check(1, needed(5));

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = registry(&mock, 10)
            .check_upkeep(&cancel, &[UpkeepKey::new(5u64, 1u64)])
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::ContextCancelled));
    }

    #[tokio::test]
    async fn test_already_cancelled() {
        let mock = Arc::new(MockChainClient::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(
            registry(&mock, 10)
                .check_upkeep(&cancel, &[UpkeepKey::new(5u64, 1u64)])
                .await,
            Err(RegistryError::ContextCancelled)
        ));
        assert!(mock.batch_sizes().is_empty());
    }
}
