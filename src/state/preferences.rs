//! User preferences: slippage, favourite tokens and the last swap selection

use super::store::{load_json, save_json, KeyValueStore, StorageKey};
use crate::config::PreferencesConfig;
use crate::error::{EngineError, EngineResult};
use crate::route::Token;

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    pub slippage_bps: u32,
}

/// Token pair and amount last chosen for a swap
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapSelection {
    pub token_in: Option<Token>,
    pub token_out: Option<Token>,
    pub amount_in: Option<U256>,
}

pub struct PreferencesStore {
    store: Arc<dyn KeyValueStore>,
    bounds: PreferencesConfig,
}

impl PreferencesStore {
    pub fn new(store: Arc<dyn KeyValueStore>, bounds: PreferencesConfig) -> Self {
        Self { store, bounds }
    }

    pub async fn preferences(&self) -> EngineResult<Preferences> {
        Ok(load_json(self.store.as_ref(), StorageKey::Preferences)
            .await?
            .unwrap_or(Preferences {
                slippage_bps: self.bounds.default_slippage_bps,
            }))
    }

    /// Set slippage tolerance, rejecting values outside the configured bounds
    pub async fn set_slippage(&self, slippage_bps: u32) -> EngineResult<Preferences> {
        if slippage_bps < self.bounds.min_slippage_bps || slippage_bps > self.bounds.max_slippage_bps
        {
            return Err(EngineError::InvalidPreference(format!(
                "slippage {} bps is outside [{}, {}]",
                slippage_bps, self.bounds.min_slippage_bps, self.bounds.max_slippage_bps
            )));
        }

        let mut prefs = self.preferences().await?;
        prefs.slippage_bps = slippage_bps;
        save_json(self.store.as_ref(), StorageKey::Preferences, &prefs).await?;
        debug!("Slippage set to {} bps", slippage_bps);
        Ok(prefs)
    }

    pub async fn favourite_tokens(&self) -> EngineResult<Vec<Token>> {
        Ok(load_json(self.store.as_ref(), StorageKey::FavouriteTokens)
            .await?
            .unwrap_or_default())
    }

    /// Add a favourite; adding the same token twice keeps one entry
    pub async fn add_favourite(&self, token: Token) -> EngineResult<Vec<Token>> {
        let mut tokens = self.favourite_tokens().await?;
        if !tokens.iter().any(|t| t.same_as(&token)) {
            tokens.push(token);
            save_json(self.store.as_ref(), StorageKey::FavouriteTokens, &tokens).await?;
        }
        Ok(tokens)
    }

    pub async fn remove_favourite(&self, chain_id: u64, address: Address) -> EngineResult<Vec<Token>> {
        let mut tokens = self.favourite_tokens().await?;
        let before = tokens.len();
        tokens.retain(|t| !(t.chain_id == chain_id && t.address == address));
        if tokens.len() != before {
            save_json(self.store.as_ref(), StorageKey::FavouriteTokens, &tokens).await?;
        }
        Ok(tokens)
    }

    pub async fn swap_selection(&self) -> EngineResult<SwapSelection> {
        Ok(load_json(self.store.as_ref(), StorageKey::SwapSelection)
            .await?
            .unwrap_or_default())
    }

    pub async fn set_swap_selection(&self, selection: &SwapSelection) -> EngineResult<()> {
        save_json(self.store.as_ref(), StorageKey::SwapSelection, selection).await
    }
}
