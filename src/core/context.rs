use std::sync::Arc;

use crate::config::Settings;
use crate::core::engine::RuleEngine;
use crate::core::registry::Registries;
use crate::db::Store;
use crate::error::BlockdResult;
use crate::notify::Notifier;
use crate::search::SearchBackend;

/// Shared handle holding the registries, store access and rule
/// configuration. Assembled once at startup and passed by reference to
/// every component; its lifetime is the process lifetime.
pub struct Context {
    pub settings: Settings,
    pub store: Store,
    pub registries: Registries,
    pub engine: RuleEngine,
}

impl Context {
    /// Assemble a context from already-built parts.
    pub fn assemble(
        settings: Settings,
        store: Store,
        registries: Registries,
        engine: RuleEngine,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            store,
            registries,
            engine,
        })
    }

    pub async fn initialize(
        settings: Settings,
        backend: Arc<dyn SearchBackend>,
    ) -> BlockdResult<Arc<Self>> {
        let (store, fresh) = Store::connect(&settings.database_url).await?;
        let notifier = settings
            .pubsub
            .as_ref()
            .map(Notifier::new)
            .transpose()?;
        let registries = Registries::load(store.clone(), notifier, fresh).await?;
        let engine = RuleEngine::new(backend, settings.index_pattern.clone(), settings.top_hits);

        Ok(Arc::new(Self {
            settings,
            store,
            registries,
            engine,
        }))
    }
}
