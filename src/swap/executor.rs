//! Swap executor
//!
//! Drives one quote from the wallet request to a terminal state:
//!
//! 1. Validate the route and its expiry, then ask the wallet to send.
//! 2. Record history and wait for the source receipt at confirmation depth.
//! 3. Correlate the receipt's logs with the route's hops.
//! 4. For cross-chain routes, poll every touched chain until the route settles,
//!    rolls back, fails, or a hop wait times out.

use crate::chain::{is_confirmed, Chain, ChainPoller, ChainRegistry, Observation, WatchFilter};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::{EventCorrelator, Verdict};
use crate::retry::{retry_transient, Backoff, RetryErrorDetails};
use crate::route::RouteQuote;
use crate::state::HistoryStore;
use crate::swap::machine::{
    EventPayload, FailureDetail, FailureKind, SwapEvent, SwapMachine, SwapState,
};
use crate::transport::SwapTransport;

use ethers::types::{TransactionReceipt, H256, U64};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

const OBSERVATION_CAPACITY: usize = 64;

/// Published for every event appended to a swap
#[derive(Debug, Clone, Serialize)]
pub struct SwapNotification {
    pub swap_id: Uuid,
    /// Machine state after the event
    pub state: SwapState,
    pub event: SwapEvent,
}

/// Final account of a run
#[derive(Debug, Clone, Serialize)]
pub struct SwapReport {
    pub swap_id: Uuid,
    pub state: SwapState,
    pub tx_hash: Option<H256>,
    pub events: Vec<SwapEvent>,
    pub failure: Option<FailureDetail>,
    /// Run was stopped before reaching a terminal state
    pub cancelled: bool,
}

pub struct SwapExecutor {
    transport: Arc<dyn SwapTransport>,
    registry: Arc<ChainRegistry>,
    history: Arc<HistoryStore>,
    config: EngineConfig,
    retry_details: RetryErrorDetails,
    notifier: broadcast::Sender<SwapNotification>,
}

impl SwapExecutor {
    pub fn new(
        transport: Arc<dyn SwapTransport>,
        registry: Arc<ChainRegistry>,
        history: Arc<HistoryStore>,
        config: EngineConfig,
    ) -> Self {
        let (notifier, _) = broadcast::channel(config.notification_capacity.max(1));
        Self {
            transport,
            registry,
            history,
            config,
            retry_details: RetryErrorDetails::default(),
            notifier,
        }
    }

    /// Replace the transient error registry
    pub fn with_retry_details(mut self, retry_details: RetryErrorDetails) -> Self {
        self.retry_details = retry_details;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SwapNotification> {
        self.notifier.subscribe()
    }

    pub fn registry(&self) -> &Arc<ChainRegistry> {
        &self.registry
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    /// Checks made before the wallet is contacted
    pub fn preflight(&self, quote: &RouteQuote) -> EngineResult<()> {
        quote.validate()?;
        for chain_id in quote.chains_touched() {
            self.registry.require_chain(chain_id)?;
        }
        quote.ensure_fresh()
    }

    /// Execute a quote until it is terminal or `cancel` flips to true.
    ///
    /// Rejected quotes return an error without contacting the wallet. Chain
    /// and wallet failures end the swap in `Failed` and are reported, not
    /// returned; only storage and internal errors are returned as errors.
    pub async fn execute(
        &self,
        quote: RouteQuote,
        mut cancel: watch::Receiver<bool>,
    ) -> EngineResult<SwapReport> {
        self.preflight(&quote)?;

        let mut run = SwapRun::new(self, quote)?;
        info!(
            "Executing swap {} from chain {} to chain {} ({} hops)",
            run.machine.swap_id(),
            run.quote.source_chain_id,
            run.quote.destination_chain_id,
            run.quote.hops.len()
        );

        let outcome = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => None,
            result = run.drive() => Some(result),
        };
        run.stop_pollers();

        match outcome {
            Some(Ok(())) => Ok(run.report(false)),
            Some(Err(e)) => Err(e),
            None => {
                info!(
                    "Swap {} cancelled in state {}",
                    run.machine.swap_id(),
                    run.machine.state()
                );
                Ok(run.report(true))
            }
        }
    }
}

/// Resolves once cancellation is requested. A dropped sender never cancels.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// State of a single execution
struct SwapRun<'a> {
    executor: &'a SwapExecutor,
    source: Arc<Chain>,
    quote: RouteQuote,
    machine: SwapMachine,
    correlator: EventCorrelator,
    pollers: Vec<JoinHandle<()>>,
    started: Instant,
}

impl<'a> SwapRun<'a> {
    fn new(executor: &'a SwapExecutor, quote: RouteQuote) -> EngineResult<Self> {
        let source = executor.registry.require_chain(quote.source_chain_id)?;
        Ok(Self {
            executor,
            source,
            machine: SwapMachine::new(quote.id, quote.source_chain_id),
            correlator: EventCorrelator::new(&quote, &executor.registry),
            quote,
            pollers: Vec::new(),
            started: Instant::now(),
        })
    }

    async fn drive(&mut self) -> EngineResult<()> {
        let source_id = self.source.chain_id;
        self.transition(SwapState::Pending, None).await?;

        let tx_hash = match self
            .executor
            .transport
            .send_transaction(source_id, &self.quote.transaction)
            .await
        {
            Ok(tx_hash) => tx_hash,
            Err(e) => {
                let error = EngineError::Transport(e);
                return self.fail(FailureDetail::from_error(&error)).await;
            }
        };

        self.executor
            .history
            .add_swap_history(&self.quote, tx_hash)
            .await?;
        if self.machine.submitted(tx_hash)? {
            self.after_change().await?;
        }
        crate::metrics::record_swap_submitted(source_id);
        info!("Swap {} submitted as {:?}", self.machine.swap_id(), tx_hash);

        let heads = match self.snapshot_heads().await {
            Ok(heads) => heads,
            Err(e) => return self.fail(FailureDetail::from_error(&e)).await,
        };

        let receipt = match self.wait_for_source_receipt(tx_hash).await {
            Ok(receipt) => receipt,
            Err(e) => return self.fail(FailureDetail::from_error(&e)).await,
        };

        if receipt.status == Some(U64::zero()) {
            return self
                .fail(FailureDetail::new(
                    FailureKind::Reverted,
                    format!(
                        "source transaction {:?} reverted in block {:?}",
                        tx_hash, receipt.block_number
                    ),
                ))
                .await;
        }

        let events = self.correlator.ingest(source_id, &receipt);
        self.record_events(events).await?;

        let verdict = self.correlator.verdict();
        let pending_failure = match verdict {
            Verdict::RolledBack(payload) => {
                return self.transition(SwapState::RolledBack, Some(payload)).await
            }
            Verdict::Settled => return self.transition(SwapState::Success, None).await,
            Verdict::HopFailed(failure) if self.quote.is_single_chain() => {
                return self.fail(failure).await
            }
            Verdict::InProgress { .. } if self.quote.is_single_chain() => {
                return self
                    .fail(FailureDetail::new(
                        FailureKind::Protocol,
                        format!("no qualifying swap output in receipt {:?}", tx_hash),
                    ))
                    .await
            }
            Verdict::HopFailed(failure) => Some(failure),
            Verdict::InProgress { .. } => None,
        };

        self.transition(SwapState::Routing, None).await?;

        let source_block = receipt
            .block_number
            .map(|b| b.as_u64())
            .unwrap_or_default();
        let observations = self.spawn_pollers(source_block, &heads)?;
        self.monitor(observations, pending_failure).await
    }

    /// Wait on poller observations until the route is decided
    async fn monitor(
        &mut self,
        mut observations: mpsc::Receiver<Observation>,
        pending_failure: Option<FailureDetail>,
    ) -> EngineResult<()> {
        let swap_id = self.machine.swap_id();
        let rollback_window = self.source.hop_timeout(&self.executor.config);
        let mut hop_timeout = self.current_hop_timeout();
        let mut hop_deadline = Instant::now() + hop_timeout;
        let mut failure_deadline =
            pending_failure.map(|failure| (Instant::now() + rollback_window, failure));

        loop {
            // A failed hop waits out the rollback window instead of the hop timeout
            let wake = match &failure_deadline {
                Some((deadline, _)) => *deadline,
                None => hop_deadline,
            };

            tokio::select! {
                observation = observations.recv() => match observation {
                    Some(Observation::Receipt { swap_id: id, chain_id, receipt }) if id == swap_id => {
                        let before = self.correlator.next_hop();
                        let events = self.correlator.ingest(chain_id, &receipt);
                        self.record_events(events).await?;

                        match self.correlator.verdict() {
                            Verdict::RolledBack(payload) => {
                                return self.transition(SwapState::RolledBack, Some(payload)).await;
                            }
                            Verdict::Settled => {
                                return self.transition(SwapState::Success, None).await;
                            }
                            Verdict::HopFailed(failure) => {
                                if failure_deadline.is_none() {
                                    debug!(
                                        "Swap {} hop failed, waiting {:?} for a rollback",
                                        swap_id, rollback_window
                                    );
                                    failure_deadline = Some((Instant::now() + rollback_window, failure));
                                }
                            }
                            Verdict::InProgress { next_hop } => {
                                if next_hop > before {
                                    hop_timeout = self.current_hop_timeout();
                                    hop_deadline = Instant::now() + hop_timeout;
                                    debug!("Swap {} advanced to hop {}", swap_id, next_hop);
                                }
                            }
                        }
                    }
                    Some(Observation::Receipt { swap_id: id, .. }) => {
                        debug!("Dropping observation for stale swap {}", id);
                    }
                    Some(Observation::Failed { chain_id, failure, .. }) => {
                        warn!("Poller for chain {} failed during swap {}", chain_id, swap_id);
                        return self.fail(failure).await;
                    }
                    None => {
                        return self
                            .fail(FailureDetail::new(
                                FailureKind::Transport,
                                "all chain pollers stopped",
                            ))
                            .await;
                    }
                },
                _ = tokio::time::sleep_until(wake) => {
                    let failure = match failure_deadline.take() {
                        Some((_, failure)) => FailureDetail::new(
                            FailureKind::Timeout,
                            format!(
                                "{} (no rollback observed within {:?})",
                                failure.detail, rollback_window
                            ),
                        ),
                        None => FailureDetail::new(
                            FailureKind::Timeout,
                            format!(
                                "hop {} not confirmed within {:?}",
                                self.correlator.next_hop(),
                                hop_timeout
                            ),
                        ),
                    };
                    return self.fail(failure).await;
                }
            }
        }
    }

    /// Receipt of the wallet's transaction, once at confirmation depth
    async fn wait_for_source_receipt(&self, tx_hash: H256) -> EngineResult<TransactionReceipt> {
        let chain = self.source.clone();
        let timeout = chain.hop_timeout(&self.executor.config);
        let backoff = Backoff::for_chain(&chain, &self.executor.config);
        let transport = &self.executor.transport;
        let details = &self.executor.retry_details;

        let wait = async {
            let receipt = retry_transient(details, &backoff, "source receipt", || {
                transport.get_receipt(chain.chain_id, tx_hash)
            })
            .await?;

            let block = receipt
                .block_number
                .map(|b| b.as_u64())
                .ok_or_else(|| {
                    EngineError::Internal(format!("receipt {:?} has no block number", tx_hash))
                })?;

            loop {
                let head = retry_transient(details, &backoff, "block number", || {
                    transport.block_number(chain.chain_id)
                })
                .await?;
                if is_confirmed(block, head, chain.confirmation_blocks) {
                    break;
                }
                debug!(
                    "Receipt {:?} in block {} awaiting confirmation (head {})",
                    tx_hash, block, head
                );
                tokio::time::sleep(chain.block_time()).await;
            }

            Ok::<_, EngineError>(receipt)
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| EngineError::Timeout {
                operation: format!(
                    "confirmation of {:?} on chain {} after {:?}",
                    tx_hash, chain.chain_id, timeout
                ),
            })?
    }

    /// Current heads of the non-source chains, taken right after submission
    async fn snapshot_heads(&self) -> EngineResult<HashMap<u64, u64>> {
        let mut heads = HashMap::new();
        for chain_id in self.quote.chains_touched() {
            if chain_id == self.source.chain_id {
                continue;
            }
            let chain = self.executor.registry.require_chain(chain_id)?;
            let backoff = Backoff::for_chain(&chain, &self.executor.config);
            let head = retry_transient(&self.executor.retry_details, &backoff, "block number", || {
                self.executor.transport.block_number(chain_id)
            })
            .await?;
            heads.insert(chain_id, head);
        }
        Ok(heads)
    }

    fn spawn_pollers(
        &mut self,
        source_block: u64,
        heads: &HashMap<u64, u64>,
    ) -> EngineResult<mpsc::Receiver<Observation>> {
        let (tx, rx) = mpsc::channel(OBSERVATION_CAPACITY);

        for chain_id in self.quote.chains_touched() {
            let chain = self.executor.registry.require_chain(chain_id)?;
            let from_block = if chain_id == self.source.chain_id {
                source_block
            } else {
                *heads.get(&chain_id).ok_or_else(|| {
                    EngineError::Internal(format!("no starting block for chain {}", chain_id))
                })?
            };

            let poller = ChainPoller::new(
                self.machine.swap_id(),
                chain.clone(),
                self.executor.transport.clone(),
                WatchFilter::for_route(&chain, &self.quote),
                from_block,
                Backoff::for_chain(&chain, &self.executor.config),
                self.executor.retry_details.clone(),
                tx.clone(),
            );
            self.pollers.push(poller.spawn());
        }

        Ok(rx)
    }

    fn current_hop_timeout(&self) -> Duration {
        let chain = self
            .correlator
            .current_hop()
            .and_then(|hop| self.executor.registry.get_chain(hop.landing_chain_id()))
            .unwrap_or_else(|| self.source.clone());
        chain.hop_timeout(&self.executor.config)
    }

    async fn transition(
        &mut self,
        next: SwapState,
        payload: Option<EventPayload>,
    ) -> EngineResult<()> {
        if self.machine.transition(next, payload)? {
            self.after_change().await?;
        }
        Ok(())
    }

    async fn fail(&mut self, failure: FailureDetail) -> EngineResult<()> {
        warn!("Swap {} failed: {}", self.machine.swap_id(), failure);
        if self.machine.fail(failure)? {
            self.after_change().await?;
        }
        Ok(())
    }

    async fn record_events(&mut self, events: Vec<SwapEvent>) -> EngineResult<()> {
        let mut changed = false;
        for event in events {
            if self.machine.record(event.clone()) {
                self.publish(event);
                changed = true;
            }
        }
        if changed {
            self.sync_history().await?;
        }
        Ok(())
    }

    /// Publish the newest event and persist; terminal states also stop pollers
    async fn after_change(&mut self) -> EngineResult<()> {
        if let Some(event) = self.machine.events().last().cloned() {
            self.publish(event);
        }
        self.sync_history().await?;

        let state = self.machine.state();
        if state.is_terminal() {
            self.stop_pollers();
            crate::metrics::record_swap_finished(
                self.source.chain_id,
                state.as_str(),
                self.started.elapsed(),
            );
            info!(
                "Swap {} finished as {} after {:?}",
                self.machine.swap_id(),
                state,
                self.started.elapsed()
            );
        }
        Ok(())
    }

    fn publish(&self, event: SwapEvent) {
        let _ = self.executor.notifier.send(SwapNotification {
            swap_id: self.machine.swap_id(),
            state: self.machine.state(),
            event,
        });
    }

    async fn sync_history(&self) -> EngineResult<()> {
        let Some(tx_hash) = self.machine.tx_hash() else {
            return Ok(());
        };

        let mut record = self
            .executor
            .history
            .get_swap_history(tx_hash)
            .await
            .ok_or_else(|| EngineError::HistoryNotFound {
                tx_hash: format!("{:?}", tx_hash),
            })?;
        record.events = self.machine.events().to_vec();
        record.status = self.machine.state();
        record.error = self.machine.failure().map(|f| f.detail.clone());

        self.executor
            .history
            .update_swap_history_status(&record)
            .await?;
        Ok(())
    }

    fn stop_pollers(&mut self) {
        for handle in self.pollers.drain(..) {
            handle.abort();
        }
    }

    fn report(&self, cancelled: bool) -> SwapReport {
        SwapReport {
            swap_id: self.machine.swap_id(),
            state: self.machine.state(),
            tx_hash: self.machine.tx_hash(),
            events: self.machine.events().to_vec(),
            failure: self.machine.failure().cloned(),
            cancelled,
        }
    }
}

impl Drop for SwapRun<'_> {
    fn drop(&mut self) {
        self.stop_pollers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProviderError, TransportError};
    use crate::state::MemoryStore;
    use crate::swap::machine::SwapStatus;
    use crate::test_support::*;
    use crate::transport::MockSwapTransport;
    use chrono::Utc;
    use ethers::types::U256;

    async fn executor_with(transport: Arc<dyn SwapTransport>, config: EngineConfig) -> SwapExecutor {
        let history = HistoryStore::load(Arc::new(MemoryStore::new()), 50)
            .await
            .unwrap();
        SwapExecutor::new(transport, Arc::new(registry()), Arc::new(history), config)
    }

    async fn executor(transport: Arc<dyn SwapTransport>) -> SwapExecutor {
        executor_with(transport, engine_config()).await
    }

    /// Receiver whose sender is already gone, so it never cancels
    fn no_cancel() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    fn statuses(report: &SwapReport) -> Vec<SwapStatus> {
        report.events.iter().map(|e| e.status).collect()
    }

    /// Source receipt whose swap hands the output to the source cell
    fn bridged_source(transport: &FakeTransport, quote: &RouteQuote) {
        transport.set_head(SOURCE_CHAIN, 12);
        transport.add_receipt(receipt_with(
            tx_hash_for(SOURCE_CHAIN),
            10,
            vec![swap_log(SOURCE_CELL, quote.hops[0].expected_amount_out, 10)],
        ));
    }

    /// Run the swap in the background and move the destination head after `delay`
    async fn run_with_dest_head(
        executor: SwapExecutor,
        quote: RouteQuote,
        transport: Arc<FakeTransport>,
        delay: Duration,
        head: u64,
    ) -> (Arc<SwapExecutor>, SwapReport) {
        let executor = Arc::new(executor);
        let handle = tokio::spawn({
            let executor = executor.clone();
            async move { executor.execute(quote, no_cancel()).await }
        });

        tokio::time::sleep(delay).await;
        transport.set_head(DEST_CHAIN, head);

        let report = handle.await.unwrap().unwrap();
        (executor, report)
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_chain_swap_succeeds() {
        let quote = single_chain_quote();
        let transport = Arc::new(FakeTransport::new());
        let hash = tx_hash_for(SOURCE_CHAIN);
        transport.set_head(SOURCE_CHAIN, 12);
        transport.add_receipt(receipt_with(
            hash,
            10,
            vec![swap_log(USER, quote.hops[0].expected_amount_out, 10)],
        ));

        let executor = executor(transport.clone()).await;
        let mut notifications = executor.subscribe();
        let report = executor.execute(quote.clone(), no_cancel()).await.unwrap();

        assert_eq!(report.state, SwapState::Success);
        assert!(!report.cancelled);
        assert_eq!(report.tx_hash, Some(hash));
        assert_eq!(
            statuses(&report),
            vec![
                SwapStatus::Pending,
                SwapStatus::Submitted,
                SwapStatus::Success,
                SwapStatus::Success
            ]
        );
        assert_eq!(transport.sent().len(), 1);

        let record = executor.history().get_swap_history(hash).await.unwrap();
        assert_eq!(record.status, SwapState::Success);
        assert_eq!(record.events, report.events);

        let first = notifications.recv().await.unwrap();
        assert_eq!(first.swap_id, quote.id);
        assert_eq!(first.state, SwapState::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cross_chain_swap_settles_on_destination() {
        let quote = cross_chain_quote();
        let transport = Arc::new(FakeTransport::new());
        bridged_source(&transport, &quote);
        transport.set_head(DEST_CHAIN, 500);
        transport.add_chain_receipt(
            DEST_CHAIN,
            receipt_with(
                tx(20),
                502,
                vec![withdrawn_log(DEST_ICTT, USER, quote.hops[1].expected_amount_out, 502)],
            ),
        );

        let executor = executor(transport.clone()).await;
        let (_, report) =
            run_with_dest_head(executor, quote, transport, Duration::from_secs(5), 510).await;

        assert_eq!(report.state, SwapState::Success);
        assert!(statuses(&report).contains(&SwapStatus::Routing));
        let last_hop = report
            .events
            .iter()
            .rev()
            .find(|e| e.hop_index == Some(1))
            .unwrap();
        assert_eq!(last_hop.chain_id, DEST_CHAIN);
        assert_eq!(last_hop.tx_hash, Some(tx(20)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_destination_rollback_wins() {
        let quote = cross_chain_quote();
        let transport = Arc::new(FakeTransport::new());
        bridged_source(&transport, &quote);
        transport.set_head(DEST_CHAIN, 600);
        transport.add_chain_receipt(
            DEST_CHAIN,
            receipt_with(
                tx(21),
                601,
                vec![
                    cell_swap_failed_log(DEST_CELL, 601),
                    rollback_log(USER, token_address(2), U256::from(990u64), 601),
                ],
            ),
        );

        let executor = executor(transport.clone()).await;
        let (executor, report) =
            run_with_dest_head(executor, quote, transport, Duration::from_secs(3), 610).await;

        assert_eq!(report.state, SwapState::RolledBack);
        match &report.events.last().unwrap().payload {
            Some(EventPayload::Rollback { amount, chain_id, .. }) => {
                assert_eq!(*amount, U256::from(990u64));
                assert_eq!(*chain_id, DEST_CHAIN);
            }
            other => panic!("unexpected payload {:?}", other),
        }
        let record = executor
            .history()
            .get_swap_history(tx_hash_for(SOURCE_CHAIN))
            .await
            .unwrap();
        assert_eq!(record.status, SwapState::RolledBack);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hop_failure_without_rollback_fails_after_window() {
        let quote = cross_chain_quote();
        let transport = Arc::new(FakeTransport::new());
        bridged_source(&transport, &quote);
        transport.set_head(DEST_CHAIN, 700);
        transport.add_chain_receipt(
            DEST_CHAIN,
            receipt_with(tx(22), 701, vec![call_failed_log(DEST_ICTT, DEST_CELL, 701)]),
        );

        let executor = executor(transport.clone()).await;
        let (_, report) =
            run_with_dest_head(executor, quote, transport, Duration::from_secs(3), 710).await;

        assert_eq!(report.state, SwapState::Failed);
        let failure = report.failure.clone().unwrap();
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert!(failure.detail.contains("reverted"));
        assert!(failure.detail.contains("no rollback observed"));
        assert!(statuses(&report).contains(&SwapStatus::Error));
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_dust_withdrawal_does_not_settle() {
        let quote = cross_chain_quote();
        let transport = Arc::new(FakeTransport::new());
        bridged_source(&transport, &quote);
        transport.set_head(DEST_CHAIN, 800);
        transport.add_chain_receipt(
            DEST_CHAIN,
            receipt_with(
                tx(23),
                801,
                vec![withdrawn_log(DEST_ICTT, DEST_CELL, U256::one(), 801)],
            ),
        );

        let executor = executor(transport.clone()).await;
        let (_, report) =
            run_with_dest_head(executor, quote, transport, Duration::from_secs(3), 810).await;

        assert_eq!(report.state, SwapState::Failed);
        let failure = report.failure.clone().unwrap();
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert!(failure.detail.contains("hop 1"));
        assert!(!report.events.iter().any(|e| e.hop_index == Some(1)
            && e.status == SwapStatus::Success));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_destination_times_out() {
        let quote = cross_chain_quote();
        let transport = Arc::new(FakeTransport::new());
        bridged_source(&transport, &quote);
        transport.set_head(DEST_CHAIN, 900);

        let executor = executor(transport.clone()).await;
        let report = executor.execute(quote, no_cancel()).await.unwrap();

        assert_eq!(report.state, SwapState::Failed);
        let failure = report.failure.clone().unwrap();
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert!(failure.detail.contains("hop 1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wallet_rejection_fails_without_history() {
        let quote = single_chain_quote();
        let transport = Arc::new(FakeTransport::new().with_send(Err(
            TransportError::UserRejected("User denied transaction signature".to_string()),
        )));

        let executor = executor(transport.clone()).await;
        let report = executor.execute(quote, no_cancel()).await.unwrap();

        assert_eq!(report.state, SwapState::Failed);
        assert_eq!(report.tx_hash, None);
        assert_eq!(report.failure.clone().unwrap().kind, FailureKind::UserRejected);
        assert_eq!(statuses(&report), vec![SwapStatus::Pending, SwapStatus::Error]);
        assert!(executor.history().list().await.is_empty());
        assert_eq!(transport.receipt_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unfinalized_receipt_error_is_retried() {
        let quote = single_chain_quote();
        let transport = Arc::new(FakeTransport::new());
        transport.set_head(SOURCE_CHAIN, 12);
        transport.fail_next_receipt(TransportError::Provider(ProviderError::new(
            "InvalidInputRpcError",
            "cannot query unfinalized data",
        )));
        transport.add_receipt(receipt_with(
            tx_hash_for(SOURCE_CHAIN),
            10,
            vec![swap_log(USER, quote.hops[0].expected_amount_out, 10)],
        ));

        let executor = executor(transport.clone()).await;
        let report = executor.execute(quote, no_cancel()).await.unwrap();

        assert_eq!(report.state, SwapState::Success);
        assert_eq!(transport.receipt_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_invalid_input_is_terminal() {
        let quote = single_chain_quote();
        let transport = Arc::new(FakeTransport::new());
        transport.set_head(SOURCE_CHAIN, 12);
        transport.fail_next_receipt(TransportError::Provider(ProviderError::new(
            "InvalidInputRpcError",
            "invalid argument 0: hex string has length 62",
        )));

        let executor = executor(transport.clone()).await;
        let report = executor.execute(quote, no_cancel()).await.unwrap();

        assert_eq!(report.state, SwapState::Failed);
        let failure = report.failure.clone().unwrap();
        assert_eq!(failure.kind, FailureKind::Transport);
        assert!(failure.detail.contains("hex string has length 62"));
        assert_eq!(transport.receipt_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receipt_retries_exhausted() {
        let quote = single_chain_quote();
        let transport = Arc::new(FakeTransport::new());
        transport.set_head(SOURCE_CHAIN, 12);

        let executor = executor(transport.clone()).await;
        let report = executor.execute(quote, no_cancel()).await.unwrap();

        assert_eq!(report.state, SwapState::Failed);
        assert_eq!(report.failure.clone().unwrap().kind, FailureKind::RetriesExhausted);
        assert_eq!(transport.receipt_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_receipt_times_out() {
        let quote = single_chain_quote();
        let transport = Arc::new(FakeTransport::new());
        transport.set_head(SOURCE_CHAIN, 12);

        let config = EngineConfig {
            max_retries: 1_000,
            ..engine_config()
        };
        let executor = executor_with(transport.clone(), config).await;
        let report = executor.execute(quote, no_cancel()).await.unwrap();

        assert_eq!(report.state, SwapState::Failed);
        assert_eq!(report.failure.clone().unwrap().kind, FailureKind::Timeout);
        let record = executor
            .history()
            .get_swap_history(tx_hash_for(SOURCE_CHAIN))
            .await
            .unwrap();
        assert_eq!(record.status, SwapState::Failed);
        assert!(record.error.unwrap().contains("confirmation"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reverted_source_transaction() {
        let quote = single_chain_quote();
        let transport = Arc::new(FakeTransport::new());
        transport.set_head(SOURCE_CHAIN, 12);
        let mut receipt = receipt_with(tx_hash_for(SOURCE_CHAIN), 10, vec![]);
        receipt.status = Some(U64::zero());
        transport.add_receipt(receipt);

        let executor = executor(transport.clone()).await;
        let report = executor.execute(quote, no_cancel()).await.unwrap();

        assert_eq!(report.state, SwapState::Failed);
        assert_eq!(report.failure.clone().unwrap().kind, FailureKind::Reverted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_chain_without_output_fails() {
        let quote = single_chain_quote();
        let transport = Arc::new(FakeTransport::new());
        transport.set_head(SOURCE_CHAIN, 12);
        transport.add_receipt(receipt_with(tx_hash_for(SOURCE_CHAIN), 10, vec![]));

        let executor = executor(transport.clone()).await;
        let report = executor.execute(quote, no_cancel()).await.unwrap();

        assert_eq!(report.state, SwapState::Failed);
        assert_eq!(report.failure.clone().unwrap().kind, FailureKind::Protocol);
    }

    #[tokio::test]
    async fn test_expired_quote_never_reaches_wallet() {
        let mut quote = single_chain_quote();
        quote.expires_at = Utc::now() - chrono::Duration::seconds(1);

        let mut mock = MockSwapTransport::new();
        mock.expect_send_transaction().never();
        mock.expect_get_receipt().never();

        let executor = executor(Arc::new(mock)).await;
        let result = executor.execute(quote, no_cancel()).await;

        assert!(matches!(result, Err(EngineError::QuoteExpired { .. })));
        assert!(executor.history().list().await.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_chain_rejected() {
        let mut quote = single_chain_quote();
        quote.source_chain_id = 999;
        quote.destination_chain_id = 999;
        quote.token_in.chain_id = 999;
        quote.token_out.chain_id = 999;
        for hop in &mut quote.hops {
            hop.chain_id = 999;
            hop.token_in.chain_id = 999;
            hop.token_out.chain_id = 999;
        }

        let mut mock = MockSwapTransport::new();
        mock.expect_send_transaction().never();

        let executor = executor(Arc::new(mock)).await;
        assert!(matches!(
            executor.execute(quote, no_cancel()).await,
            Err(EngineError::ChainNotFound { chain_id: 999 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_run_without_terminal_state() {
        let quote = cross_chain_quote();
        let transport = Arc::new(FakeTransport::new());
        bridged_source(&transport, &quote);
        transport.set_head(DEST_CHAIN, 800);

        let executor = Arc::new(executor(transport.clone()).await);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn({
            let executor = executor.clone();
            async move { executor.execute(quote, cancel_rx).await }
        });

        tokio::time::sleep(Duration::from_secs(10)).await;
        cancel_tx.send(true).unwrap();

        let report = handle.await.unwrap().unwrap();
        assert!(report.cancelled);
        assert_eq!(report.state, SwapState::Routing);
        let record = executor
            .history()
            .get_swap_history(tx_hash_for(SOURCE_CHAIN))
            .await
            .unwrap();
        assert_eq!(record.status, SwapState::Routing);
    }
}
