//! Process-local name service.
//!
//! Registrations live only as long as the process. Useful for tests and for
//! a client and server sharing one process.

use super::{check_scheme, select_address, NameService, RandomSelection, SelectionStrategy};
use crate::config::NameServiceConfig;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;
use url::Url;

pub struct MemoryNameService {
    records: RwLock<HashMap<String, Vec<Url>>>,
    strategy: Arc<dyn SelectionStrategy>,
}

impl MemoryNameService {
    pub fn new() -> Self {
        Self::with_strategy(Arc::new(RandomSelection))
    }

    pub fn with_strategy(strategy: Arc<dyn SelectionStrategy>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            strategy,
        }
    }
}

impl Default for MemoryNameService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NameService for MemoryNameService {
    fn supported_schemes(&self) -> &[&'static str] {
        &[NameServiceConfig::MEMORY_SCHEME]
    }

    async fn connect(&self, uri: &Url) -> Result<()> {
        check_scheme(self, uri)?;
        debug!("Using in-process name service");
        Ok(())
    }

    async fn register_service(&self, name: &str, address: &Url) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let addresses = records.entry(name.to_string()).or_default();
        if !addresses.contains(address) {
            addresses.push(address.clone());
        }
        Ok(())
    }

    async fn lookup_all(&self, name: &str) -> Result<Vec<Url>> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn lookup_service(&self, name: &str) -> Result<Url> {
        let candidates = self.lookup_all(name).await?;
        select_address(self.strategy.as_ref(), name, &candidates)
    }

    async fn unregister_service(&self, name: &str, address: &Url) -> Result<bool> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let Some(addresses) = records.get_mut(name) else {
            return Ok(false);
        };
        let before = addresses.len();
        addresses.retain(|a| a != address);
        let removed = addresses.len() < before;
        if addresses.is_empty() {
            records.remove(name);
        }
        Ok(removed)
    }

    async fn close(&self) {}
}
