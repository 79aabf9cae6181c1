use alloy::providers::Provider;
use alloy::providers::RootProvider;
use alloy::rpc::client::ClientBuilder;
use alloy::rpc::client::RpcClient;
use alloy::rpc::types::BlockNumberOrTag;
use alloy::rpc::types::TransactionRequest;
use alloy::transports::ws::WsConnect;
use alloy::transports::RpcError;
use alloy::transports::TransportError;
use alloy_primitives::Bytes;
use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::info;
use url::Url;

use super::BatchElem;
use super::BlockTag;
use super::ChainClient;
use super::HeadStream;
use super::Header;
use crate::error::CallError;
use crate::error::ClientError;

/// JSON-RPC code geth uses for reverted calls.
const EXECUTION_REVERTED_CODE: i64 = 3;

/// [`ChainClient`] backed by an alloy RPC client, over websocket or HTTP.
///
/// Head subscriptions need a websocket endpoint.
pub struct AlloyChainClient {
    client: RpcClient,
    provider: RootProvider,
}

impl AlloyChainClient {
    pub async fn connect(url: &Url) -> Result<Self, ClientError> {
        let client = match url.scheme() {
            "ws" | "wss" => {
                ClientBuilder::default()
                    .ws(WsConnect::new(url.as_str()))
                    .await
                    .map_err(|err| ClientError::Transport(err.to_string()))?
            },
            _ => ClientBuilder::default().http(url.clone()),
        };
        let provider = RootProvider::new(client.clone());

        info!("Connected to chain node. scheme: {}", url.scheme());

        Ok(Self { client, provider })
    }
}

impl From<BlockTag> for BlockNumberOrTag {
    fn from(tag: BlockTag) -> Self {
        match tag {
            BlockTag::Latest => BlockNumberOrTag::Latest,
            BlockTag::Number(number) => BlockNumberOrTag::Number(number),
        }
    }
}

fn classify_call_error(err: TransportError) -> CallError {
    match err {
        RpcError::ErrorResp(payload)
            if payload.code == EXECUTION_REVERTED_CODE || payload.message.contains("revert") =>
        {
            CallError::Reverted(payload.message.to_string())
        },
        RpcError::Transport(kind) => CallError::Transport(kind.to_string()),
        other => CallError::Other(other.to_string()),
    }
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    async fn batch_call(
        &self,
        batch: &mut [BatchElem],
    ) -> Result<(), ClientError> {
        let mut request = self.client.new_batch();
        let mut waiters = Vec::with_capacity(batch.len());

        for elem in batch.iter() {
            let tx = TransactionRequest::default()
                .to(elem.call.to)
                .input(elem.call.data.clone().into());
            let params = (tx, BlockNumberOrTag::from(elem.call.block));
            let waiter = request
                .add_call::<_, Bytes>("eth_call", &params)
                .map_err(|err| ClientError::Transport(err.to_string()))?;
            waiters.push(waiter);
        }

        request
            .send()
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))?;

        for (elem, waiter) in batch.iter_mut().zip(waiters) {
            elem.outcome = Some(waiter.await.map_err(classify_call_error));
        }

        Ok(())
    }

    async fn header_by_number(
        &self,
        number: Option<u64>,
    ) -> Result<Option<Header>, ClientError> {
        let tag = number.map_or(BlockNumberOrTag::Latest, BlockNumberOrTag::Number);

        let header = self
            .client
            .request::<_, Option<alloy::rpc::types::Header>>("eth_getBlockByNumber", (tag, false))
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))?;

        Ok(header.map(|header| {
            Header {
                number: header.inner.number,
                hash: header.hash,
            }
        }))
    }

    async fn subscribe_new_heads(&self) -> Result<HeadStream, ClientError> {
        let subscription = self
            .provider
            .subscribe_blocks()
            .await
            .map_err(|err| ClientError::Subscription(err.to_string()))?;

        let stream = subscription.into_stream().map(|header| {
            Ok(Header {
                number: header.inner.number,
                hash: header.hash,
            })
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use alloy::rpc::json_rpc::ErrorPayload;
    use alloy::transports::TransportErrorKind;

    use super::*;

    fn error_response(
        code: i64,
        message: &'static str,
    ) -> TransportError {
        RpcError::ErrorResp(ErrorPayload {
            code,
            message: message.into(),
            data: None,
        })
    }

    #[test]
    fn test_classify_call_error() {
        assert_eq!(
            classify_call_error(error_response(3, "execution reverted")),
            CallError::Reverted("execution reverted".to_string())
        );
        assert_eq!(
            classify_call_error(error_response(-32000, "execution reverted: paused")),
            CallError::Reverted("execution reverted: paused".to_string())
        );
        assert!(matches!(
            classify_call_error(error_response(-32000, "header not found")),
            CallError::Other(_)
        ));
        assert!(matches!(
            classify_call_error(TransportErrorKind::backend_gone()),
            CallError::Transport(_)
        ));
    }

    #[test]
    fn test_block_tag_conversion() {
        assert_eq!(BlockNumberOrTag::from(BlockTag::Latest), BlockNumberOrTag::Latest);
        assert_eq!(
            BlockNumberOrTag::from(BlockTag::Number(12)),
            BlockNumberOrTag::Number(12)
        );
    }
}
