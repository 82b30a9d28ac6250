//! Single active swap per session
//!
//! Starting a swap while another is running cancels the older run first, so
//! notifications and history updates from it stop before the new one begins.

use super::executor::{SwapExecutor, SwapNotification, SwapReport};
use crate::error::{EngineError, EngineResult};
use crate::route::RouteQuote;

use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

struct ActiveSwap {
    swap_id: Uuid,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<EngineResult<SwapReport>>,
}

pub struct SwapSession {
    executor: Arc<SwapExecutor>,
    active: Mutex<Option<ActiveSwap>>,
}

impl SwapSession {
    pub fn new(executor: Arc<SwapExecutor>) -> Self {
        Self {
            executor,
            active: Mutex::new(None),
        }
    }

    pub fn executor(&self) -> &Arc<SwapExecutor> {
        &self.executor
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SwapNotification> {
        self.executor.subscribe()
    }

    /// Start executing `quote`, cancelling any swap already in flight.
    ///
    /// Quotes failing preflight are rejected here and leave the running swap alone.
    pub async fn start(&self, quote: RouteQuote) -> EngineResult<Uuid> {
        self.executor.preflight(&quote)?;

        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            Self::stop(previous).await;
        }

        let swap_id = quote.id;
        let (cancel, cancel_rx) = watch::channel(false);
        let executor = self.executor.clone();
        let handle = tokio::spawn(async move {
            let result = executor.execute(quote, cancel_rx).await;
            if let Err(e) = &result {
                error!("Swap {} aborted: {}", swap_id, e);
            }
            result
        });

        *active = Some(ActiveSwap {
            swap_id,
            cancel,
            handle,
        });
        info!("Swap {} started", swap_id);
        Ok(swap_id)
    }

    /// Cancel the running swap, returning its id
    pub async fn cancel(&self) -> Option<Uuid> {
        let previous = self.active.lock().await.take()?;
        let swap_id = previous.swap_id;
        Self::stop(previous).await;
        Some(swap_id)
    }

    /// Id of the swap still running, if any
    pub async fn active_swap(&self) -> Option<Uuid> {
        self.active
            .lock()
            .await
            .as_ref()
            .filter(|a| !a.handle.is_finished())
            .map(|a| a.swap_id)
    }

    /// Wait for the current swap to finish and take its report
    pub async fn wait(&self) -> Option<EngineResult<SwapReport>> {
        let active = self.active.lock().await.take()?;
        Some(match active.handle.await {
            Ok(result) => result,
            Err(e) => Err(EngineError::Internal(format!("swap task failed: {}", e))),
        })
    }

    async fn stop(swap: ActiveSwap) {
        if swap.handle.is_finished() {
            return;
        }
        info!("Cancelling swap {}", swap.swap_id);
        let _ = swap.cancel.send(true);
        if let Err(e) = swap.handle.await {
            error!("Swap {} task failed while cancelling: {}", swap.swap_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{HistoryStore, MemoryStore};
    use crate::swap::machine::SwapState;
    use crate::test_support::*;
    use crate::transport::SwapTransport;
    use std::time::Duration;

    async fn session(transport: Arc<dyn SwapTransport>) -> SwapSession {
        let history = HistoryStore::load(Arc::new(MemoryStore::new()), 50)
            .await
            .unwrap();
        let executor = SwapExecutor::new(
            transport,
            Arc::new(registry()),
            Arc::new(history),
            engine_config(),
        );
        SwapSession::new(Arc::new(executor))
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_swap_cancels_previous() {
        let transport = Arc::new(FakeTransport::new());
        transport.set_head(SOURCE_CHAIN, 12);
        transport.set_head(DEST_CHAIN, 100);
        let bridged = cross_chain_quote();
        transport.queue_send(Ok(tx(30)));
        transport.add_receipt(receipt_with(
            tx(30),
            10,
            vec![swap_log(SOURCE_CELL, bridged.hops[0].expected_amount_out, 10)],
        ));
        let second_quote = single_chain_quote();
        transport.add_receipt(receipt_with(
            tx_hash_for(SOURCE_CHAIN),
            11,
            vec![swap_log(USER, second_quote.hops[0].expected_amount_out, 11)],
        ));

        let session = session(transport.clone()).await;
        let first = session.start(bridged).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(session.active_swap().await, Some(first));

        let second = session.start(second_quote).await.unwrap();
        assert_ne!(first, second);

        let report = session.wait().await.unwrap().unwrap();
        assert_eq!(transport.sent().len(), 2);
        assert_eq!(report.swap_id, second);
        assert_eq!(report.state, SwapState::Success);
        assert!(session.active_swap().await.is_none());

        let first_record = session
            .executor()
            .history()
            .get_swap_history(tx(30))
            .await
            .unwrap();
        assert_eq!(first_record.status, SwapState::Routing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_reports_swap_id() {
        let transport = Arc::new(FakeTransport::new());
        transport.set_head(SOURCE_CHAIN, 12);
        let session = session(transport.clone()).await;

        // Receipt never appears, so the swap keeps waiting
        let id = session.start(single_chain_quote()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(session.cancel().await, Some(id));
        assert_eq!(session.cancel().await, None);
        let record = session
            .executor()
            .history()
            .get_swap_history(tx_hash_for(SOURCE_CHAIN))
            .await
            .unwrap();
        assert_eq!(record.status, SwapState::Submitted);
    }

    #[tokio::test]
    async fn test_rejected_quote_keeps_running_swap() {
        let transport = Arc::new(FakeTransport::new());
        let session = session(transport.clone()).await;

        let mut expired = single_chain_quote();
        expired.expires_at = chrono::Utc::now() - chrono::Duration::seconds(5);
        assert!(matches!(
            session.start(expired).await,
            Err(EngineError::QuoteExpired { .. })
        ));
        assert!(transport.sent().is_empty());
        assert!(session.active_swap().await.is_none());
    }
}
