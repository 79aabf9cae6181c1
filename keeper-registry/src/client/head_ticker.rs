use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use keeper_messages::BlockKey;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::ChainClient;

/// Heads buffered for a slow consumer before new ones are dropped.
pub const HEAD_TICKER_CAPACITY: usize = 1000;

const RESUBSCRIBE_BASE_DELAY_MS: u64 = 100;
const RESUBSCRIBE_MAX_DELAY_MS: u64 = 30_000;

/// Follows the chain head, delivering the number of every new block.
///
/// The subscription is re-established with exponential backoff whenever it
/// fails. Dropping the ticker stops the background task.
pub struct HeadTicker {
    heads: mpsc::Receiver<BlockKey>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl HeadTicker {
    pub(crate) fn spawn<C: ChainClient>(
        client: Arc<C>,
        cancel: CancellationToken,
    ) -> Self {
        let (sender, heads) = mpsc::channel(HEAD_TICKER_CAPACITY);
        let task = tokio::spawn(follow_heads(client, sender, cancel.clone()));

        Self {
            heads,
            cancel,
            task,
        }
    }

    /// Waits for the next head. `None` once the ticker stopped.
    pub async fn recv(&mut self) -> Option<BlockKey> {
        self.heads.recv().await
    }

    pub fn try_recv(&mut self) -> Result<BlockKey, TryRecvError> {
        self.heads.try_recv()
    }

    pub fn is_alive(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for HeadTicker {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// Delay before the `failures`-th consecutive resubscription attempt.
fn resubscribe_backoff(failures: u32) -> Duration {
    let exp = failures.saturating_sub(1).min(16);
    let delay = RESUBSCRIBE_BASE_DELAY_MS.saturating_mul(1u64 << exp);
    Duration::from_millis(delay.min(RESUBSCRIBE_MAX_DELAY_MS))
}

/// Waits out the backoff. Returns false if cancelled meanwhile.
async fn backoff(
    failures: u32,
    cancel: &CancellationToken,
) -> bool {
    let delay = resubscribe_backoff(failures);
    debug!("Resubscribing to new heads. failures: {} delay: {:?}", failures, delay);

    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

async fn follow_heads<C: ChainClient>(
    client: Arc<C>,
    sender: mpsc::Sender<BlockKey>,
    cancel: CancellationToken,
) {
    let mut failures = 0u32;

    loop {
        let subscribed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            subscribed = client.subscribe_new_heads() => subscribed,
        };

        let mut stream = match subscribed {
            Ok(stream) => {
                info!("Subscribed to new heads");
                stream
            },
            Err(err) => {
                failures += 1;
                warn!("Failed to subscribe to new heads. err: {} failures: {}", err, failures);
                if !backoff(failures, &cancel).await {
                    return;
                }
                continue;
            },
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(header)) => {
                    failures = 0;
                    match sender.try_send(BlockKey::new(header.number)) {
                        Ok(()) => {},
                        Err(TrySendError::Full(head)) => {
                            warn!("Head channel full, dropping head. block: {}", head);
                        },
                        Err(TrySendError::Closed(_)) => {
                            debug!("Head receiver dropped, stopping");
                            return;
                        },
                    }
                },
                Some(Err(err)) => {
                    warn!("Head subscription failed. err: {}", err);
                    break;
                },
                None => {
                    warn!("Head subscription ended");
                    break;
                },
            }
        }

        failures += 1;
        if !backoff(failures, &cancel).await {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::BatchChainClient;
    use crate::test_utils::MockChainClient;

    #[test]
    fn test_resubscribe_backoff() {
        assert_eq!(resubscribe_backoff(1), Duration::from_millis(100));
        assert_eq!(resubscribe_backoff(2), Duration::from_millis(200));
        assert_eq!(resubscribe_backoff(5), Duration::from_millis(1600));
        assert_eq!(resubscribe_backoff(9), Duration::from_millis(25_600));
        assert_eq!(resubscribe_backoff(10), Duration::from_secs(30));
        assert_eq!(resubscribe_backoff(u32::MAX), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribes_after_stream_ends() {
        let mock = Arc::new(MockChainClient::default());
        mock.push_subscription(vec![1, 2]);
        mock.push_subscription_failure();
        mock.push_subscription(vec![3]);

        let client = BatchChainClient::new(Arc::clone(&mock), 10);
        let mut ticker = client.head_ticker();

        assert_eq!(ticker.recv().await, Some(BlockKey::new(1)));
        assert_eq!(ticker.recv().await, Some(BlockKey::new(2)));
        assert_eq!(ticker.recv().await, Some(BlockKey::new(3)));
        assert_eq!(mock.subscription_count(), 3);
        assert!(ticker.is_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_cancellation() {
        let mock = Arc::new(MockChainClient::default());
        mock.push_subscription(vec![7]);

        let cancel = CancellationToken::new();
        let client = BatchChainClient::new(mock, 10);
        let mut ticker = client.head_ticker_with_cancellation(cancel.clone());

        assert_eq!(ticker.recv().await, Some(BlockKey::new(7)));

        cancel.cancel();
        assert_eq!(ticker.recv().await, None);
    }
}
