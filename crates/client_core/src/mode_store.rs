//! Persisted remote/simulated mode flag.

use std::{collections::HashMap, sync::Arc};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::domain::ModeState;
use tokio::sync::RwLock;
use tracing::{info, warn};
use url::Url;

/// Storage key holding `"true"` / `"false"`.
pub const SIMULATED_FLAG_KEY: &str = "use_simulated_backend";
/// Query parameter that forces simulated mode for the current page only.
pub const OVERRIDE_QUERY_KEY: &str = "mock";

#[async_trait]
pub trait FlagStorage: Send + Sync {
    async fn read_flag(&self, key: &str) -> Result<Option<String>>;
    async fn write_flag(&self, key: &str, value: &str) -> Result<()>;
}

#[async_trait]
impl FlagStorage for storage::Storage {
    async fn read_flag(&self, key: &str) -> Result<Option<String>> {
        self.get_setting(key).await
    }

    async fn write_flag(&self, key: &str, value: &str) -> Result<()> {
        self.set_setting(key, value).await
    }
}

#[derive(Default)]
pub struct MemoryFlagStorage {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryFlagStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(key: &str, value: &str) -> Self {
        Self {
            values: RwLock::new(HashMap::from([(key.to_string(), value.to_string())])),
        }
    }
}

#[async_trait]
impl FlagStorage for MemoryFlagStorage {
    async fn read_flag(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn write_flag(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Stand-in used when no settings database could be opened.
pub struct UnavailableFlagStorage;

#[async_trait]
impl FlagStorage for UnavailableFlagStorage {
    async fn read_flag(&self, key: &str) -> Result<Option<String>> {
        Err(anyhow!("settings storage unavailable while reading {key}"))
    }

    async fn write_flag(&self, key: &str, _value: &str) -> Result<()> {
        Err(anyhow!("settings storage unavailable while writing {key}"))
    }
}

/// One-shot activation signal consulted on every read and never persisted.
pub trait OverrideSignal: Send + Sync {
    fn is_active(&self) -> bool;
}

pub struct NoOverride;

impl OverrideSignal for NoOverride {
    fn is_active(&self) -> bool {
        false
    }
}

pub struct StaticOverride(pub bool);

impl OverrideSignal for StaticOverride {
    fn is_active(&self) -> bool {
        self.0
    }
}

/// Active when the page URL carries `mock=true`.
pub struct QueryOverride {
    active: bool,
}

impl QueryOverride {
    pub fn from_query(query: &str) -> Self {
        let query = query.trim_start_matches('?');
        let active = url::form_urlencoded::parse(query.as_bytes())
            .any(|(key, value)| key == OVERRIDE_QUERY_KEY && value == "true");
        Self { active }
    }

    pub fn from_url(url: &Url) -> Self {
        Self::from_query(url.query().unwrap_or_default())
    }
}

impl OverrideSignal for QueryOverride {
    fn is_active(&self) -> bool {
        self.active
    }
}

pub struct ModeStore {
    storage: Arc<dyn FlagStorage>,
    override_signal: Arc<dyn OverrideSignal>,
}

impl ModeStore {
    pub fn new(storage: Arc<dyn FlagStorage>) -> Self {
        Self::with_override(storage, Arc::new(NoOverride))
    }

    pub fn with_override(
        storage: Arc<dyn FlagStorage>,
        override_signal: Arc<dyn OverrideSignal>,
    ) -> Self {
        Self {
            storage,
            override_signal,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryFlagStorage::new()))
    }

    pub async fn is_simulated(&self) -> bool {
        self.override_signal.is_active() || self.persisted_simulated().await
    }

    /// The stored flag alone, ignoring the override. Read failures mean remote.
    pub async fn persisted_simulated(&self) -> bool {
        match self.storage.read_flag(SIMULATED_FLAG_KEY).await {
            Ok(value) => value.as_deref() == Some("true"),
            Err(error) => {
                warn!(%error, "mode: flag unreadable, assuming remote mode");
                false
            }
        }
    }

    pub fn override_active(&self) -> bool {
        self.override_signal.is_active()
    }

    pub async fn mode(&self) -> ModeState {
        ModeState::from_simulated(self.is_simulated().await)
    }

    pub async fn set_simulated(&self, simulated: bool) {
        let value = if simulated { "true" } else { "false" };
        match self.storage.write_flag(SIMULATED_FLAG_KEY, value).await {
            Ok(()) => info!(simulated, "mode: flag persisted"),
            Err(error) => warn!(%error, simulated, "mode: flag write dropped"),
        }
    }

    /// Persists simulated mode unless it is already stored. Returns whether
    /// this call performed the transition.
    pub async fn downgrade(&self) -> bool {
        if self.persisted_simulated().await {
            return false;
        }
        self.set_simulated(true).await;
        true
    }
}

#[cfg(test)]
#[path = "tests/mode_store_tests.rs"]
mod tests;
