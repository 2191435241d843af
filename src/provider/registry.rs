// # Provider Registry
//
// Process-wide registry of pool providers. Discovery is declarative; pools
// are only instantiated later, on demand. Selection picks the highest
// priority available provider per kind with a lexicographic name
// tie-break, caches the choice, and recomputes it only on `reload`.

use crate::error::{OjpError, Result};
use crate::provider::descriptor::{ProviderDescriptor, ProviderKind};
use crate::provider::PoolProvider;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// A provider known only through its descriptor file. Never available in
/// this process; it exists so operators can see what was declared.
struct DeclaredProvider {
    descriptor: ProviderDescriptor,
}

#[async_trait::async_trait]
impl PoolProvider for DeclaredProvider {
    fn descriptor(&self) -> ProviderDescriptor {
        self.descriptor.clone()
    }

    fn is_available(&self) -> bool {
        false
    }
}

pub struct ProviderRegistry {
    providers: RwLock<Vec<Arc<dyn PoolProvider>>>,
    /// Name → reason. Demotion lasts for the process lifetime.
    demoted: DashMap<String, String>,
    selected: RwLock<HashMap<ProviderKind, Arc<dyn PoolProvider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(Vec::new()),
            demoted: DashMap::new(),
            selected: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with the embedded providers registered.
    pub fn with_embedded() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(crate::provider::standard::PooledConnectionProvider));
        registry.register(Arc::new(crate::provider::standard::DirectConnectionProvider));
        registry.register(Arc::new(crate::provider::xa::XaSessionProvider));
        registry
    }

    pub fn register(&self, provider: Arc<dyn PoolProvider>) {
        let descriptor = provider.descriptor();
        let mut providers = self.providers.write();
        if providers
            .iter()
            .any(|p| p.descriptor().name == descriptor.name)
        {
            tracing::warn!(provider = %descriptor.name, "provider already registered, ignoring duplicate");
            return;
        }
        tracing::info!(provider = %descriptor.name, kind = %descriptor.kind, priority = descriptor.priority, "registered pool provider");
        providers.push(provider);
    }

    /// Remove a provider by name (tests and administrative reload).
    pub fn deregister(&self, name: &str) {
        self.providers.write().retain(|p| p.descriptor().name != name);
    }

    /// Merge descriptor files (`*.provider`) found in the extension
    /// directory into the registry. Pools are never created here.
    pub fn discover(&self, libs_path: Option<&Path>) {
        let Some(dir) = libs_path else { return };
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = %dir.display(), error = %e, "cannot scan extension directory");
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("provider") {
                continue;
            }
            match ProviderDescriptor::from_file(&path) {
                Ok(descriptor) => {
                    self.register(Arc::new(DeclaredProvider { descriptor }));
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping malformed provider descriptor");
                }
            }
        }
    }

    /// Select the provider for a kind: highest priority among available,
    /// non-demoted providers; ties break on lexicographic name.
    pub fn select(&self, kind: ProviderKind) -> Result<Arc<dyn PoolProvider>> {
        let providers = self.providers.read();
        let mut candidates: Vec<_> = providers
            .iter()
            .filter(|p| {
                let d = p.descriptor();
                d.kind == kind && !self.demoted.contains_key(&d.name) && p.is_available()
            })
            .cloned()
            .collect();
        candidates.sort_by(|a, b| {
            let da = a.descriptor();
            let db = b.descriptor();
            db.priority.cmp(&da.priority).then(da.name.cmp(&db.name))
        });
        candidates
            .into_iter()
            .next()
            .ok_or_else(|| OjpError::NoProviderAvailable(kind.to_string()))
    }

    /// Cached result of `select`, recomputed only on `reload`.
    pub fn provider_for(&self, kind: ProviderKind) -> Result<Arc<dyn PoolProvider>> {
        if let Some(cached) = self.selected.read().get(&kind) {
            return Ok(Arc::clone(cached));
        }
        let chosen = self.select(kind)?;
        self.selected.write().insert(kind, Arc::clone(&chosen));
        Ok(chosen)
    }

    /// Drop the cached selections; the next `provider_for` re-selects.
    pub fn reload(&self) {
        self.selected.write().clear();
    }

    /// Demote a broken provider for the rest of the process lifetime and
    /// drop any cached selection of it.
    pub fn demote(&self, name: &str, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(provider = name, reason = %reason, "demoting pool provider");
        self.demoted.insert(name.to_string(), reason);
        self.selected
            .write()
            .retain(|_, p| p.descriptor().name != name);
    }

    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        self.providers.read().iter().map(|p| p.descriptor()).collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_embedded()
    }
}
