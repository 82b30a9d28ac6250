//! Append-only swap history keyed by source transaction hash

use super::store::{load_json, save_json, KeyValueStore, StorageKey};
use crate::error::{EngineError, EngineResult};
use crate::route::RouteQuote;
use crate::swap::machine::{SwapEvent, SwapState};

use chrono::{DateTime, Utc};
use ethers::types::H256;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Record of one submitted swap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapHistory {
    pub tx_hash: H256,
    pub quote: RouteQuote,
    pub events: Vec<SwapEvent>,
    pub status: SwapState,
    /// Raw failure detail, kept verbatim
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SwapHistory {
    pub fn new(quote: RouteQuote, tx_hash: H256) -> Self {
        let now = Utc::now();
        Self {
            tx_hash,
            quote,
            events: Vec::new(),
            status: SwapState::Submitted,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Outcome of a status update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryUpdate {
    Applied,
    Unchanged,
}

/// Persistent swap history, newest entries last in memory
pub struct HistoryStore {
    store: Arc<dyn KeyValueStore>,
    entries: RwLock<Vec<SwapHistory>>,
    retention: usize,
}

impl HistoryStore {
    /// Load existing history from the store
    pub async fn load(store: Arc<dyn KeyValueStore>, retention: usize) -> EngineResult<Self> {
        let entries: Vec<SwapHistory> = load_json(store.as_ref(), StorageKey::SwapData)
            .await?
            .unwrap_or_default();
        info!("Loaded {} swap history records", entries.len());

        Ok(Self {
            store,
            entries: RwLock::new(entries),
            retention: retention.max(1),
        })
    }

    /// Create the record for a submitted swap. Repeated adds return the existing record.
    pub async fn add_swap_history(
        &self,
        route: &RouteQuote,
        tx_hash: H256,
    ) -> EngineResult<SwapHistory> {
        let mut entries = self.entries.write().await;

        if let Some(existing) = entries.iter().find(|h| h.tx_hash == tx_hash) {
            debug!("History for {:?} already exists", tx_hash);
            return Ok(existing.clone());
        }

        let record = SwapHistory::new(route.clone(), tx_hash);
        entries.push(record.clone());
        Self::enforce_retention(&mut entries, self.retention);
        self.persist(&entries).await?;

        info!("Recorded swap {} as {:?}", route.id, tx_hash);
        Ok(record)
    }

    /// Replace events, status and error of an existing record.
    ///
    /// Events may only be appended. A terminal record is never changed, so a
    /// repeated terminal update is a no-op.
    pub async fn update_swap_history_status(
        &self,
        history: &SwapHistory,
    ) -> EngineResult<HistoryUpdate> {
        let mut entries = self.entries.write().await;

        let existing = entries
            .iter_mut()
            .find(|h| h.tx_hash == history.tx_hash)
            .ok_or_else(|| EngineError::HistoryNotFound {
                tx_hash: format!("{:?}", history.tx_hash),
            })?;

        if existing.is_terminal() {
            if existing.status != history.status {
                warn!(
                    "Ignoring {} update for {:?}: already {}",
                    history.status, history.tx_hash, existing.status
                );
            }
            return Ok(HistoryUpdate::Unchanged);
        }

        if !history.events.starts_with(&existing.events) {
            return Err(EngineError::Internal(format!(
                "history events for {:?} may only be appended",
                history.tx_hash
            )));
        }

        if existing.events == history.events
            && existing.status == history.status
            && existing.error == history.error
        {
            return Ok(HistoryUpdate::Unchanged);
        }

        existing.events = history.events.clone();
        existing.status = history.status;
        existing.error = history.error.clone();
        existing.updated_at = Utc::now();
        debug!("History {:?} is now {}", history.tx_hash, history.status);

        self.persist(&entries).await?;
        Ok(HistoryUpdate::Applied)
    }

    pub async fn get_swap_history(&self, tx_hash: H256) -> Option<SwapHistory> {
        self.entries
            .read()
            .await
            .iter()
            .find(|h| h.tx_hash == tx_hash)
            .cloned()
    }

    /// All records, newest first
    pub async fn list(&self) -> Vec<SwapHistory> {
        self.entries.read().await.iter().rev().cloned().collect()
    }

    fn enforce_retention(entries: &mut Vec<SwapHistory>, retention: usize) {
        while entries.len() > retention {
            match entries.iter().position(SwapHistory::is_terminal) {
                Some(oldest_terminal) => {
                    entries.remove(oldest_terminal);
                }
                None => break,
            }
        }
    }

    async fn persist(&self, entries: &[SwapHistory]) -> EngineResult<()> {
        save_json(self.store.as_ref(), StorageKey::SwapData, entries).await
    }
}
