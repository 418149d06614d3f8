//! Capability marketplace.
//!
//! Catalog of capabilities and responsibilities keyed by name, plus an index of which resource
//! definitions advertise each capability.

use crate::definitions::{CapabilityDefinition, MonitoringType, ResponsibilityDefinition};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// A catalog entry: a plain capability or a responsibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CatalogEntry {
    /// A plain capability.
    Capability(CapabilityDefinition),
    /// A capability with a monitoring facet.
    Responsibility(ResponsibilityDefinition),
}

impl CatalogEntry {
    /// Catalog key.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.capability().name
    }

    /// The capability part of the entry.
    #[must_use]
    pub fn capability(&self) -> &CapabilityDefinition {
        match self {
            Self::Capability(capability) => capability,
            Self::Responsibility(responsibility) => &responsibility.capability,
        }
    }

    /// Monitoring mode, for responsibilities.
    #[must_use]
    pub fn monitoring_type(&self) -> Option<MonitoringType> {
        match self {
            Self::Capability(_) => None,
            Self::Responsibility(responsibility) => Some(responsibility.monitoring_type),
        }
    }
}

impl From<CapabilityDefinition> for CatalogEntry {
    fn from(capability: CapabilityDefinition) -> Self {
        Self::Capability(capability)
    }
}

impl From<ResponsibilityDefinition> for CatalogEntry {
    fn from(responsibility: ResponsibilityDefinition) -> Self {
        Self::Responsibility(responsibility)
    }
}

/// Marketplace statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketplaceInfo {
    /// Catalog entries, responsibilities included.
    pub total_capabilities: usize,
    /// Entries that are responsibilities.
    pub total_responsibilities: usize,
    /// Resource definitions advertising at least one capability.
    pub total_providers: usize,
    /// Whether resolutions are cached.
    pub cache_enabled: bool,
    /// Resolutions served from the cache.
    pub cache_hits: u64,
    /// Resolutions that went to the catalog.
    pub cache_misses: u64,
}

/// Capability catalog and provider index.
pub struct CapabilityResolver {
    catalog: Arc<RwLock<HashMap<String, CatalogEntry>>>,
    /// resource definition -> advertised capabilities
    providers: Arc<RwLock<BTreeMap<String, Vec<String>>>>,
    cache: Option<RwLock<HashMap<String, CatalogEntry>>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl fmt::Debug for CapabilityResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityResolver")
            .field("capability_count", &self.catalog.try_read().map(|c| c.len()).unwrap_or(0))
            .field("cache_enabled", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

impl CapabilityResolver {
    /// Creates an empty marketplace without a resolution cache.
    #[must_use]
    pub fn new() -> Self {
        Self::with_cache(false)
    }

    /// Creates an empty marketplace, optionally caching resolutions by name.
    #[must_use]
    pub fn with_cache(enabled: bool) -> Self {
        Self {
            catalog: Arc::new(RwLock::new(HashMap::new())),
            providers: Arc::new(RwLock::new(BTreeMap::new())),
            cache: enabled.then(|| RwLock::new(HashMap::new())),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    /// Adds a capability or responsibility. Re-registering a name overwrites the earlier entry.
    ///
    /// Empty names and descriptions are accepted.
    ///
    /// # Returns
    /// Returns `true` if the name was not registered before.
    pub async fn register(&self, entry: impl Into<CatalogEntry>) -> bool {
        let entry = entry.into();
        let name = entry.name().to_string();
        debug!(capability = %name, responsibility = entry.monitoring_type().is_some(), "Registering capability");

        let replaced = self.catalog.write().await.insert(name.clone(), entry);
        if let Some(cache) = &self.cache {
            cache.write().await.remove(&name);
        }
        if replaced.is_some() {
            debug!(capability = %name, "Capability re-registered, previous entry overwritten");
        }
        replaced.is_none()
    }

    /// Looks a capability up by name.
    pub async fn resolve(&self, name: &str) -> Option<CatalogEntry> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.read().await.get(name) {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Some(hit.clone());
            }
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }

        let entry = self.catalog.read().await.get(name).cloned();
        if let (Some(cache), Some(found)) = (&self.cache, &entry) {
            cache.write().await.insert(name.to_string(), found.clone());
        }
        entry
    }

    /// Returns `true` if the name is in the catalog.
    pub async fn is_known(&self, name: &str) -> bool {
        self.catalog.read().await.contains_key(name)
    }

    /// Returns `true` if nothing is registered.
    pub async fn is_empty(&self) -> bool {
        self.catalog.read().await.is_empty()
    }

    /// Replaces the whole provider index.
    ///
    /// Resources with an empty capability list are left out, so a definition that stops
    /// advertising drops out of every lookup.
    ///
    /// # Arguments
    /// * `index` - Resource definition name mapped to the capabilities it advertises
    pub async fn replace_providers(&self, index: impl IntoIterator<Item = (String, Vec<String>)>) {
        let index: BTreeMap<String, Vec<String>> =
            index.into_iter().filter(|(_, caps)| !caps.is_empty()).collect();
        debug!(providers = index.len(), "Rebuilt capability provider index");
        *self.providers.write().await = index;
    }

    /// Resource definitions advertising `capability`, sorted by name.
    pub async fn get_providers_for(&self, capability: &str) -> Vec<String> {
        self.providers
            .read()
            .await
            .iter()
            .filter(|(_, caps)| caps.iter().any(|c| c == capability))
            .map(|(resource, _)| resource.clone())
            .collect()
    }

    /// All catalog entries, sorted by name.
    pub async fn list_capabilities(&self) -> Vec<CatalogEntry> {
        let mut entries: Vec<CatalogEntry> = self.catalog.read().await.values().cloned().collect();
        entries.sort_by(|a, b| a.name().cmp(b.name()));
        entries
    }

    /// Responsibilities with the given monitoring mode, sorted by name.
    pub async fn responsibilities_by_monitoring(
        &self,
        monitoring_type: MonitoringType,
    ) -> Vec<ResponsibilityDefinition> {
        let mut found: Vec<ResponsibilityDefinition> = self
            .catalog
            .read()
            .await
            .values()
            .filter_map(|entry| match entry {
                CatalogEntry::Responsibility(r) if r.monitoring_type == monitoring_type => {
                    Some(r.clone())
                }
                _ => None,
            })
            .collect();
        found.sort_by(|a, b| a.capability.name.cmp(&b.capability.name));
        found
    }

    /// Returns marketplace statistics.
    pub async fn get_marketplace_info(&self) -> MarketplaceInfo {
        let catalog = self.catalog.read().await;
        MarketplaceInfo {
            total_capabilities: catalog.len(),
            total_responsibilities: catalog.values().filter(|e| e.monitoring_type().is_some()).count(),
            total_providers: self.providers.read().await.len(),
            cache_enabled: self.cache.is_some(),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for CapabilityResolver {
    fn default() -> Self {
        Self::new()
    }
}
