use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::BatchElem;
use super::ChainClient;
use super::HeadTicker;
use super::Header;
use crate::error::ClientError;
use crate::error::MultiError;

/// Wraps a [`ChainClient`], splitting large batches into bounded sub-batches that
/// are sent concurrently.
pub struct BatchChainClient<C> {
    client: Arc<C>,
    batch_size: usize,
    limiter: Option<Arc<Semaphore>>,
}

impl<C> Clone for BatchChainClient<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            batch_size: self.batch_size,
            limiter: self.limiter.clone(),
        }
    }
}

impl<C: ChainClient> BatchChainClient<C> {
    /// `batch_size` is the maximum number of elements per RPC request, and must
    /// not be zero.
    pub fn new(
        client: Arc<C>,
        batch_size: usize,
    ) -> Self {
        Self {
            client,
            batch_size,
            limiter: None,
        }
    }

    /// Caps the number of sub-batches in flight at any time.
    #[must_use]
    pub fn with_max_concurrent_batches(
        mut self,
        max: usize,
    ) -> Self {
        self.limiter = Some(Arc::new(Semaphore::new(max.max(1))));
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn inner(&self) -> &Arc<C> {
        &self.client
    }

    /// Fetches a header by number, the latest one for `None`.
    pub async fn header_by_number(
        &self,
        number: Option<u64>,
    ) -> Result<Header, ClientError> {
        self.client
            .header_by_number(number)
            .await?
            .ok_or(ClientError::NotFound)
    }

    /// Sends `elems` in contiguous chunks of at most `batch_size` elements, one task
    /// per chunk, and writes every outcome back at its original position.
    ///
    /// The errors of all failed chunks are returned combined. Nothing is retried.
    pub async fn batch_call_context(
        &self,
        elems: &mut [BatchElem],
    ) -> Result<(), ClientError> {
        if elems.is_empty() {
            return Ok(());
        }

        let batch_size = self.batch_size.max(1);
        let mut tasks = JoinSet::new();

        for (index, chunk) in elems.chunks(batch_size).enumerate() {
            let client = Arc::clone(&self.client);
            let limiter = self.limiter.clone();
            let mut chunk = chunk.to_vec();

            tasks.spawn(async move {
                let _permit = match limiter {
                    Some(limiter) => {
                        match limiter.acquire_owned().await {
                            Ok(permit) => Some(permit),
                            Err(err) => {
                                return (index, chunk, Err(ClientError::TaskFailed(err.to_string())))
                            },
                        }
                    },
                    None => None,
                };

                let result = client.batch_call(&mut chunk).await;
                (index, chunk, result)
            });
        }

        debug!(
            "Dispatched batch. elements: {} chunks: {} batch_size: {}",
            elems.len(),
            tasks.len(),
            batch_size,
        );

        let mut errors = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, chunk, result)) => {
                    let offset = index * batch_size;
                    for (slot, elem) in elems[offset..].iter_mut().zip(chunk) {
                        *slot = elem;
                    }
                    if let Err(err) = result {
                        errors.push(err);
                    }
                },
                Err(err) => errors.push(ClientError::TaskFailed(err.to_string())),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ClientError::Batch(MultiError::from(errors)))
        }
    }

    /// Starts following new heads. See [`HeadTicker`].
    pub fn head_ticker(&self) -> HeadTicker {
        HeadTicker::spawn(Arc::clone(&self.client), CancellationToken::new())
    }

    /// Like [`Self::head_ticker`], additionally stopped when `cancel` fires.
    pub fn head_ticker_with_cancellation(
        &self,
        cancel: CancellationToken,
    ) -> HeadTicker {
        HeadTicker::spawn(Arc::clone(&self.client), cancel)
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::Address;
    use alloy_primitives::Bytes;

    use super::*;
    use crate::client::BlockTag;
    use crate::client::EthCall;
    use crate::test_utils::MockChainClient;

    fn elems(count: usize) -> Vec<BatchElem> {
        (0..count)
            .map(|i| {
                BatchElem::new(EthCall {
                    to: Address::ZERO,
                    data: Bytes::from(vec![0xee, i as u8]),
                    block: BlockTag::Number(i as u64),
                })
            })
            .collect()
    }

    #[tokio::test]
    async fn test_batch_splitting() {
        let mock = Arc::new(MockChainClient::default());
        let client = BatchChainClient::new(Arc::clone(&mock), 10);

        let mut batch = elems(25);
        client.batch_call_context(&mut batch).await.unwrap();

        let mut sizes = mock.batch_sizes();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![5, 10, 10]);

        // Same outcome as a single batch, element by element.
        let single = BatchChainClient::new(Arc::new(MockChainClient::default()), 100);
        let mut expected = elems(25);
        single.batch_call_context(&mut expected).await.unwrap();

        assert_eq!(batch, expected);
        for (i, elem) in batch.into_iter().enumerate() {
            assert_eq!(elem.into_result().unwrap(), Bytes::from(vec![0xee, i as u8]));
        }
    }

    #[tokio::test]
    async fn test_chunk_errors_are_combined() {
        let mock = Arc::new(MockChainClient::default());
        mock.fail_batches_containing(&[Bytes::from(vec![0xee, 3]), Bytes::from(vec![0xee, 13])]);
        let client = BatchChainClient::new(Arc::clone(&mock), 5);

        let mut batch = elems(15);
        let err = client.batch_call_context(&mut batch).await.unwrap_err();

        match err {
            ClientError::Batch(errors) => assert_eq!(errors.errors().len(), 2),
            other => panic!("unexpected error {other:?}"),
        }
        // Chunks that went through still have their results.
        assert!(batch[5].outcome.is_some());
        assert!(batch[0].outcome.is_none());
    }

    #[tokio::test]
    async fn test_bounded_concurrency() {
        let mock = Arc::new(MockChainClient::default());
        let client = BatchChainClient::new(Arc::clone(&mock), 2).with_max_concurrent_batches(1);

        let mut batch = elems(9);
        client.batch_call_context(&mut batch).await.unwrap();

        assert_eq!(mock.batch_sizes().len(), 5);
        assert_eq!(mock.max_in_flight(), 1);
        assert!(batch.iter().all(|elem| elem.outcome.is_some()));
    }

    #[tokio::test]
    async fn test_header_not_found() {
        let mock = Arc::new(MockChainClient::default());
        mock.set_latest(None);
        let client = BatchChainClient::new(mock, 10);

        assert!(matches!(
            client.header_by_number(None).await,
            Err(ClientError::NotFound)
        ));
    }
}
