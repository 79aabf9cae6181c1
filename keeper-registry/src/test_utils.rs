//! In-memory chain client answering registry calls from scripted behaviour.
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::time::Duration;

use alloy::sol_types::SolCall;
use alloy::sol_types::SolValue;
use alloy_primitives::address;
use alloy_primitives::Address;
use alloy_primitives::Bytes;
use alloy_primitives::B256;
use alloy_primitives::U256;
use async_trait::async_trait;
use futures_util::stream;
use futures_util::StreamExt;
use keeper_messages::PerformDataWrapper;

use crate::client::BatchElem;
use crate::client::BlockTag;
use crate::client::ChainClient;
use crate::client::EthCall;
use crate::client::HeadStream;
use crate::client::Header;
use crate::error::CallError;
use crate::error::ClientError;
use crate::registry::abi::IKeeperRegistry;

pub const REGISTRY_ADDRESS: Address = address!("02777053d6764996e594c3e88af1d58d5363a2e6");

/// Scripted answer to `checkUpkeep`.
#[derive(Clone, Debug)]
pub enum CheckBehavior {
    Needed {
        check_block: u32,
        perform_data: Bytes,
    },
    NotNeeded,
    Reverted,
    Failed,
    /// Answers with return data that does not decode.
    Malformed,
}

/// Scripted answer to `simulatePerformUpkeep`.
#[derive(Clone, Debug)]
pub enum SimulateBehavior {
    Success,
    Failure,
    Reverted,
    Failed,
    Malformed,
}

struct MockState {
    active_upkeeps: u64,
    reported_upkeeps: Option<u64>,
    state_fails: bool,
    checks: HashMap<U256, CheckBehavior>,
    simulations: HashMap<U256, SimulateBehavior>,
    failing_calldata: Vec<Bytes>,
    latest: Option<u64>,
    delay: Option<Duration>,
    subscriptions: VecDeque<Option<Vec<u64>>>,
    batch_sizes: Vec<usize>,
    page_requests: Vec<(U256, U256)>,
    calls: Vec<EthCall>,
    latest_requests: usize,
    subscription_count: usize,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            active_upkeeps: 0,
            reported_upkeeps: None,
            state_fails: false,
            checks: HashMap::new(),
            simulations: HashMap::new(),
            failing_calldata: Vec::new(),
            latest: Some(100),
            delay: None,
            subscriptions: VecDeque::new(),
            batch_sizes: Vec::new(),
            page_requests: Vec::new(),
            calls: Vec::new(),
            latest_requests: 0,
            subscription_count: 0,
        }
    }
}

/// Answers `eth_call`s by decoding the registry calldata. Calls with an unknown
/// selector are echoed back.
///
/// `checkUpkeep` reports the block the call was pinned to as `fastGasWei`.
#[derive(Default)]
pub struct MockChainClient {
    state: Mutex<MockState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

fn header(number: u64) -> Header {
    Header {
        number,
        hash: B256::from(U256::from(number)),
    }
}

fn block_number(tag: BlockTag) -> u64 {
    match tag {
        BlockTag::Latest => 0,
        BlockTag::Number(number) => number,
    }
}

impl MockChainClient {
    pub fn set_active_upkeeps(
        &self,
        count: u64,
    ) {
        self.state.lock().unwrap().active_upkeeps = count;
    }

    /// Makes `getState` report `count` upkeeps regardless of how many exist.
    pub fn set_reported_upkeeps(
        &self,
        count: u64,
    ) {
        self.state.lock().unwrap().reported_upkeeps = Some(count);
    }

    pub fn fail_state(&self) {
        self.state.lock().unwrap().state_fails = true;
    }

    pub fn set_check(
        &self,
        id: u64,
        behavior: CheckBehavior,
    ) {
        self.state.lock().unwrap().checks.insert(U256::from(id), behavior);
    }

    pub fn set_simulation(
        &self,
        id: u64,
        behavior: SimulateBehavior,
    ) {
        self.state
            .lock()
            .unwrap()
            .simulations
            .insert(U256::from(id), behavior);
    }

    /// Fails every batch that carries one of these calldata payloads.
    pub fn fail_batches_containing(
        &self,
        calldata: &[Bytes],
    ) {
        self.state
            .lock()
            .unwrap()
            .failing_calldata
            .extend_from_slice(calldata);
    }

    pub fn set_latest(
        &self,
        latest: Option<u64>,
    ) {
        self.state.lock().unwrap().latest = latest;
    }

    pub fn set_delay(
        &self,
        delay: Duration,
    ) {
        self.state.lock().unwrap().delay = Some(delay);
    }

    /// Queues a subscription delivering `heads` and then ending.
    pub fn push_subscription(
        &self,
        heads: Vec<u64>,
    ) {
        self.state.lock().unwrap().subscriptions.push_back(Some(heads));
    }

    /// Queues a refused subscription attempt.
    pub fn push_subscription_failure(&self) {
        self.state.lock().unwrap().subscriptions.push_back(None);
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.state.lock().unwrap().batch_sizes.clone()
    }

    pub fn page_requests(&self) -> Vec<(U256, U256)> {
        self.state.lock().unwrap().page_requests.clone()
    }

    pub fn calls(&self) -> Vec<EthCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn latest_requests(&self) -> usize {
        self.state.lock().unwrap().latest_requests
    }

    pub fn subscription_count(&self) -> usize {
        self.state.lock().unwrap().subscription_count
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn answer(
        state: &mut MockState,
        call: &EthCall,
    ) -> Result<Bytes, CallError> {
        let data = &call.data;
        let Some(selector) = data.get(..4) else {
            return Ok(data.clone());
        };

        let output = if selector == IKeeperRegistry::getStateCall::SELECTOR {
            if state.state_fails {
                return Err(CallError::Other("state unavailable".to_string()));
            }
            let registry_state = IKeeperRegistry::State {
                numUpkeeps: U256::from(state.reported_upkeeps.unwrap_or(state.active_upkeeps)),
                ..Default::default()
            };
            IKeeperRegistry::getStateCall::abi_encode_returns(&(
                registry_state,
                IKeeperRegistry::OnchainConfig::default(),
                Vec::<Address>::new(),
                Vec::<Address>::new(),
                1u8,
            ))
        } else if selector == IKeeperRegistry::getActiveUpkeepIDsCall::SELECTOR {
            let request = IKeeperRegistry::getActiveUpkeepIDsCall::abi_decode(data, true)
                .map_err(|err| CallError::Other(err.to_string()))?;
            state.page_requests.push((request.startIndex, request.maxCount));

            let start = request.startIndex.to::<u64>();
            let end = (start + request.maxCount.to::<u64>()).min(state.active_upkeeps);
            let ids = (start..end).map(|i| U256::from(i + 1)).collect::<Vec<_>>();
            IKeeperRegistry::getActiveUpkeepIDsCall::abi_encode_returns(&(ids,))
        } else if selector == IKeeperRegistry::checkUpkeepCall::SELECTOR {
            let request = IKeeperRegistry::checkUpkeepCall::abi_decode(data, true)
                .map_err(|err| CallError::Other(err.to_string()))?;
            let pinned = U256::from(block_number(call.block));

            match state.checks.get(&request.id).cloned().unwrap_or(CheckBehavior::NotNeeded) {
                CheckBehavior::Needed {
                    check_block,
                    perform_data,
                } => {
                    let wrapper = PerformDataWrapper {
                        checkBlockNumber: check_block,
                        checkBlockhash: header(u64::from(check_block)).hash,
                        performData: perform_data,
                    };
                    IKeeperRegistry::checkUpkeepCall::abi_encode_returns(&(
                        true,
                        Bytes::from(wrapper.abi_encode()),
                        0u8,
                        U256::from(50_000),
                        pinned,
                        U256::from(7),
                    ))
                },
                CheckBehavior::NotNeeded => {
                    IKeeperRegistry::checkUpkeepCall::abi_encode_returns(&(
                        false,
                        Bytes::new(),
                        4u8,
                        U256::from(21_000),
                        pinned,
                        U256::from(7),
                    ))
                },
                CheckBehavior::Reverted => {
                    return Err(CallError::Reverted("execution reverted".to_string()))
                },
                CheckBehavior::Failed => return Err(CallError::Other("header not found".to_string())),
                CheckBehavior::Malformed => return Ok(Bytes::from_static(&[0x01])),
            }
        } else if selector == IKeeperRegistry::simulatePerformUpkeepCall::SELECTOR {
            let request = IKeeperRegistry::simulatePerformUpkeepCall::abi_decode(data, true)
                .map_err(|err| CallError::Other(err.to_string()))?;

            match state
                .simulations
                .get(&request.id)
                .cloned()
                .unwrap_or(SimulateBehavior::Success)
            {
                SimulateBehavior::Success => {
                    IKeeperRegistry::simulatePerformUpkeepCall::abi_encode_returns(&(
                        true,
                        U256::from(80_000),
                    ))
                },
                SimulateBehavior::Failure => {
                    IKeeperRegistry::simulatePerformUpkeepCall::abi_encode_returns(&(
                        false,
                        U256::from(80_000),
                    ))
                },
                SimulateBehavior::Reverted => {
                    return Err(CallError::Reverted("execution reverted".to_string()))
                },
                SimulateBehavior::Failed => return Err(CallError::Transport("connection reset".to_string())),
                SimulateBehavior::Malformed => return Ok(Bytes::from_static(&[0x01])),
            }
        } else {
            return Ok(data.clone());
        };

        Ok(Bytes::from(output))
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn batch_call(
        &self,
        batch: &mut [BatchElem],
    ) -> Result<(), ClientError> {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let delay = {
            let mut state = self.state.lock().unwrap();
            state.batch_sizes.push(batch.len());
            state.delay
        };

        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }

        let result = {
            let mut state = self.state.lock().unwrap();
            if batch
                .iter()
                .any(|elem| state.failing_calldata.contains(&elem.call.data))
            {
                Err(ClientError::Transport("batch rejected".to_string()))
            } else {
                for elem in batch.iter_mut() {
                    state.calls.push(elem.call.clone());
                    elem.outcome = Some(Self::answer(&mut state, &elem.call));
                }
                Ok(())
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn header_by_number(
        &self,
        number: Option<u64>,
    ) -> Result<Option<Header>, ClientError> {
        let mut state = self.state.lock().unwrap();
        match number {
            Some(number) => Ok(Some(header(number))),
            None => {
                state.latest_requests += 1;
                Ok(state.latest.map(header))
            },
        }
    }

    async fn subscribe_new_heads(&self) -> Result<HeadStream, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.subscription_count += 1;

        match state.subscriptions.pop_front() {
            Some(Some(heads)) => {
                Ok(stream::iter(heads.into_iter().map(|number| Ok(header(number)))).boxed())
            },
            Some(None) => Err(ClientError::Subscription("subscription refused".to_string())),
            None => Ok(stream::pending().boxed()),
        }
    }
}
