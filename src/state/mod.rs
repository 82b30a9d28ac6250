//! Local state persistence
//!
//! Handles:
//! - Key-value storage (SQLite or in-memory)
//! - Swap history records
//! - User preferences and the last swap selection

pub mod history;
pub mod preferences;
pub mod store;

pub use history::{HistoryStore, HistoryUpdate, SwapHistory};
pub use preferences::{Preferences, PreferencesStore, SwapSelection};
pub use store::{open_store, KeyValueStore, MemoryStore, SqliteStore, StorageKey};
