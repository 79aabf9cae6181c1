//! Chain access.
//!
//! [`ChainClient`] is the seam to the node's RPC connection: single-shot
//! primitives only. [`BatchChainClient`] builds the batching, concurrency and
//! head-tracking behaviour on top of it.
use alloy_primitives::Address;
use alloy_primitives::Bytes;
use alloy_primitives::B256;
use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::CallError;
use crate::error::ClientError;

mod batch;
mod head_ticker;
mod rpc;

pub use batch::BatchChainClient;
pub use head_ticker::HeadTicker;
pub use head_ticker::HEAD_TICKER_CAPACITY;
pub use rpc::AlloyChainClient;

/// The block an `eth_call` is evaluated at.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BlockTag {
    Latest,
    Number(u64),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EthCall {
    pub to: Address,
    pub data: Bytes,
    pub block: BlockTag,
}

/// One element of a batched request. The chain client fills `outcome` in place.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchElem {
    pub call: EthCall,
    pub outcome: Option<Result<Bytes, CallError>>,
}

impl BatchElem {
    #[must_use]
    pub fn new(call: EthCall) -> Self {
        Self {
            call,
            outcome: None,
        }
    }

    /// Consumes the element, returning its outcome. An element the chain client
    /// never answered is an error.
    pub fn into_result(self) -> Result<Bytes, CallError> {
        self.outcome
            .unwrap_or_else(|| Err(CallError::Other("no result for batch element".to_string())))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub number: u64,
    pub hash: B256,
}

pub type HeadStream = BoxStream<'static, Result<Header, ClientError>>;

/// Single-shot chain primitives. Implementations must be usable from several
/// tasks at once.
#[async_trait]
pub trait ChainClient: Send + Sync + 'static {
    /// Sends all elements as one batched request, writing each element's outcome
    /// in place. An error is returned only when the batch as a whole failed.
    async fn batch_call(
        &self,
        batch: &mut [BatchElem],
    ) -> Result<(), ClientError>;

    /// Fetches a header by number, the latest one for `None`. `Ok(None)` when the
    /// node knows no such block.
    async fn header_by_number(
        &self,
        number: Option<u64>,
    ) -> Result<Option<Header>, ClientError>;

    /// Subscribes to new heads. The stream ends, or yields an error, when the
    /// subscription is lost.
    async fn subscribe_new_heads(&self) -> Result<HeadStream, ClientError>;
}
