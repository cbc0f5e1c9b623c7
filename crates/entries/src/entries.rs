// Archivo: entries.rs
// Propósito: `ConfigEntries`, la fachada que reúne el almacén de entradas,
// el manager de flujos de configuración y el de flujos de opciones.
use crate::entry::{ConfigEntry, EntryUpdate};
use crate::errors::{EntryError, Result};
use crate::flows::{remove_entry, ConfigFlowFactory, ConfigFlowHooks, Removed};
use crate::options::{OptionsFlowFactory, OptionsFlowHooks, OptionsHandlers};
use crate::store::{EntryLifecycle, EntryStore};
use flow::{source, FlowContext, FlowManager, FlowManagerConfig, FlowResponse, HandlerRegistry, JsonMap, NoTargets,
           UniqueId};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Entradas de configuración y los flujos que las crean y modifican.
#[derive(Clone)]
pub struct ConfigEntries {
    store: EntryStore,
    flow: FlowManager,
    options: FlowManager,
    options_handlers: OptionsHandlers,
}

impl ConfigEntries {
    pub fn new(handlers: HandlerRegistry,
               options: OptionsHandlers,
               lifecycle: Arc<dyn EntryLifecycle>,
               config: FlowManagerConfig)
               -> Self {
        let store = EntryStore::new(lifecycle);
        let options_handlers = options;
        let options = FlowManager::new(Arc::new(OptionsFlowFactory::new(store.clone(), options_handlers.clone())),
                                       Arc::new(OptionsFlowHooks::new(store.clone())),
                                       Arc::new(NoTargets),
                                       config.clone());
        let flow = FlowManager::new(Arc::new(ConfigFlowFactory::new(handlers)),
                                    Arc::new(ConfigFlowHooks::new(store.clone(), options.clone())),
                                    Arc::new(store.clone()),
                                    config);
        Self { store,
               flow,
               options,
               options_handlers }
    }

    /// Manager de flujos de configuración (clave: dominio).
    pub fn flow(&self) -> &FlowManager {
        &self.flow
    }

    /// Manager de flujos de opciones (clave: entry id).
    pub fn options(&self) -> &FlowManager {
        &self.options
    }

    /// Si el dominio de la entrada ofrece flujo de opciones.
    pub fn supports_options(&self, entry_id: &str) -> bool {
        self.store
            .get(entry_id)
            .is_some_and(|e| self.options_handlers.supports(&e.domain))
    }

    pub fn store(&self) -> &EntryStore {
        &self.store
    }

    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.store.get(entry_id)
    }

    pub fn entries(&self, domain: Option<&str>) -> Vec<ConfigEntry> {
        self.store.entries(domain)
    }

    pub fn domains(&self, include_ignore: bool) -> Vec<String> {
        self.store.domains(include_ignore)
    }

    /// Da de alta una entrada creada fuera de un flujo y la levanta.
    pub async fn add(&self, entry: ConfigEntry) -> Result<ConfigEntry> {
        self.store.add(entry).await
    }

    pub async fn remove(&self, entry_id: &str) -> Result<Removed> {
        remove_entry(&self.store, &self.flow, &self.options, entry_id).await
    }

    /// Devuelve si algo cambió.
    pub fn update_entry(&self, entry_id: &str, update: EntryUpdate) -> Result<bool> {
        self.store.update_entry(entry_id, update)
    }

    pub async fn reload(&self, entry_id: &str) -> Result<bool> {
        self.store.reload(entry_id).await
    }

    /// Arranca un flujo `reauth` para la entrada. Sin `data` el flujo recibe
    /// los datos actuales de la entrada. Devuelve `None` si ya hay uno en
    /// curso para ella.
    pub async fn start_reauth(&self, entry_id: &str, data: Option<JsonMap>) -> Result<Option<FlowResponse>> {
        let entry = self.store
                        .get(entry_id)
                        .ok_or_else(|| EntryError::UnknownEntry(entry_id.to_string()))?;
        let mut context = FlowContext::with_source(source::REAUTH).entry_id(entry_id);
        context.title_placeholders = BTreeMap::from([("name".to_string(), entry.title.clone())]);
        context.unique_id = entry.unique_id.clone().map(UniqueId::Id);

        let running = self.flow
                          .progress_by_handler(&entry.domain, true)
                          .iter()
                          .any(|f| f.context.source() == Some(source::REAUTH) && f.context.entry_id == context.entry_id);
        if running {
            log::debug!("Ya hay un reauth en curso para {}", entry_id);
            return Ok(None);
        }
        let response = self.flow.init(&entry.domain, context, Some(data.unwrap_or(entry.data))).await?;
        Ok(Some(response))
    }

    /// Cancela los primeros pasos en curso de ambos managers.
    pub async fn shutdown(&self) {
        self.flow.shutdown().await;
        self.options.shutdown().await;
    }
}
