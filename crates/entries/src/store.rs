// Archivo: store.rs
// Propósito: almacén en memoria de entradas de configuración y su ciclo de
// vida (levantar, descargar, recargar).
//
// También implementa `TargetRepository` para que el motor de flujos
// deduplique descubrimientos contra las entradas ya configuradas.
use crate::entry::{ConfigEntry, EntryState, EntryUpdate};
use crate::errors::{EntryError, Result, SetupFailure};
use async_trait::async_trait;
use flow::{BoxError, FlowError, JsonMap, PersistedTarget, TargetRepository};
use indexmap::{IndexMap, IndexSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Lo que hace la integración al levantar o descargar una entrada.
#[async_trait]
pub trait EntryLifecycle: Send + Sync {
    async fn setup(&self, entry: &ConfigEntry) -> std::result::Result<(), SetupFailure>;

    async fn unload(&self, entry: &ConfigEntry) -> std::result::Result<(), BoxError>;
}

/// Ciclo de vida vacío: todo levanta y descarga sin más.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLifecycle;

#[async_trait]
impl EntryLifecycle for NoopLifecycle {
    async fn setup(&self, _entry: &ConfigEntry) -> std::result::Result<(), SetupFailure> {
        Ok(())
    }

    async fn unload(&self, _entry: &ConfigEntry) -> std::result::Result<(), BoxError> {
        Ok(())
    }
}

struct StoreInner {
    entries: Mutex<IndexMap<String, ConfigEntry>>,
    lifecycle: Arc<dyn EntryLifecycle>,
}

/// Entradas por entry id, en orden de alta. Clonarlo comparte el almacén.
///
/// El mutex nunca se mantiene durante una llamada al ciclo de vida: se
/// clona la entrada, se espera y luego se escribe el estado.
#[derive(Clone)]
pub struct EntryStore {
    inner: Arc<StoreInner>,
}

impl EntryStore {
    pub fn new(lifecycle: Arc<dyn EntryLifecycle>) -> Self {
        Self { inner: Arc::new(StoreInner { entries: Mutex::new(IndexMap::new()),
                                            lifecycle }) }
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<String, ConfigEntry>> {
        self.inner.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.lock().get(entry_id).cloned()
    }

    /// Entradas de `domain`, o todas con `None`.
    pub fn entries(&self, domain: Option<&str>) -> Vec<ConfigEntry> {
        self.lock()
            .values()
            .filter(|e| domain.map_or(true, |d| e.domain == d))
            .cloned()
            .collect()
    }

    /// Dominios con alguna entrada; sin `include_ignore` no cuentan las
    /// entradas ignoradas.
    pub fn domains(&self, include_ignore: bool) -> Vec<String> {
        let domains: IndexSet<String> = self.lock()
                                            .values()
                                            .filter(|e| include_ignore || !e.is_ignored())
                                            .map(|e| e.domain.clone())
                                            .collect();
        domains.into_iter().collect()
    }

    pub fn update_entry(&self, entry_id: &str, update: EntryUpdate) -> Result<bool> {
        let mut entries = self.lock();
        let entry = entries.get_mut(entry_id)
                           .ok_or_else(|| EntryError::UnknownEntry(entry_id.to_string()))?;
        Ok(update.apply(entry))
    }

    fn set_state(&self, entry_id: &str, state: EntryState) {
        if let Some(entry) = self.lock().get_mut(entry_id) {
            entry.state = state;
        }
    }

    /// Da de alta la entrada y la levanta, salvo que sea ignorada.
    pub async fn add(&self, entry: ConfigEntry) -> Result<ConfigEntry> {
        let entry_id = entry.entry_id.clone();
        log::info!("Alta de la entrada {} ({}) para {}", entry.title, entry_id, entry.domain);
        self.lock().insert(entry_id.clone(), entry);
        self.setup(&entry_id).await?;
        self.get(&entry_id).ok_or(EntryError::UnknownEntry(entry_id))
    }

    /// Quita la entrada del almacén sin tocar su ciclo de vida.
    pub(crate) fn take(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.lock().shift_remove(entry_id)
    }

    /// Levanta una entrada `NotLoaded`. Devuelve si quedó `Loaded`.
    pub async fn setup(&self, entry_id: &str) -> Result<bool> {
        let entry = self.get(entry_id).ok_or_else(|| EntryError::UnknownEntry(entry_id.to_string()))?;
        if entry.state != EntryState::NotLoaded {
            return Err(EntryError::OperationNotAllowed(entry_id.to_string()));
        }
        if entry.is_ignored() {
            return Ok(false);
        }
        let state = match self.inner.lifecycle.setup(&entry).await {
            Ok(()) => EntryState::Loaded,
            Err(SetupFailure::NotReady(reason)) => {
                log::warn!("La entrada {} de {} no está lista: {}", entry.title, entry.domain, reason);
                EntryState::SetupRetry
            }
            Err(SetupFailure::Failed(err)) => {
                log::error!("Error al levantar la entrada {} de {}: {}", entry.title, entry.domain, err);
                EntryState::SetupError
            }
        };
        self.set_state(entry_id, state);
        Ok(state == EntryState::Loaded)
    }

    /// Descarga una entrada recuperable. Devuelve si la descarga fue limpia.
    pub async fn unload(&self, entry_id: &str) -> Result<bool> {
        let entry = self.get(entry_id).ok_or_else(|| EntryError::UnknownEntry(entry_id.to_string()))?;
        if !entry.state.recoverable() {
            return Err(EntryError::OperationNotAllowed(entry_id.to_string()));
        }
        if entry.state != EntryState::Loaded {
            self.set_state(entry_id, EntryState::NotLoaded);
            return Ok(true);
        }
        match self.inner.lifecycle.unload(&entry).await {
            Ok(()) => {
                self.set_state(entry_id, EntryState::NotLoaded);
                Ok(true)
            }
            Err(err) => {
                log::error!("Error al descargar la entrada {} de {}: {}", entry.title, entry.domain, err);
                self.set_state(entry_id, EntryState::FailedUnload);
                Ok(false)
            }
        }
    }

    /// Descarga y vuelve a levantar. Devuelve si quedó `Loaded`.
    pub async fn reload(&self, entry_id: &str) -> Result<bool> {
        if !self.unload(entry_id).await? {
            return Ok(false);
        }
        self.setup(entry_id).await
    }
}

impl TargetRepository for EntryStore {
    fn targets(&self, handler: &str) -> flow::Result<Vec<PersistedTarget>> {
        Ok(self.entries(Some(handler)).iter().map(ConfigEntry::to_target).collect())
    }

    fn update_target_data(&self, target_id: &str, updates: &JsonMap) -> flow::Result<bool> {
        let mut entries = self.lock();
        let entry = entries.get_mut(target_id)
                           .ok_or_else(|| FlowError::Storage(format!("entrada desconocida: {}", target_id)))?;
        let mut merged = entry.data.clone();
        merged.extend(updates.iter().map(|(k, v)| (k.clone(), v.clone())));
        let update = EntryUpdate { data: Some(merged),
                                   ..EntryUpdate::default() };
        Ok(update.apply(entry))
    }

    fn schedule_reload(&self, target_id: &str) -> flow::Result<()> {
        let rt = tokio::runtime::Handle::try_current().map_err(|e| FlowError::Storage(e.to_string()))?;
        let store = self.clone();
        let entry_id = target_id.to_string();
        rt.spawn(async move {
              if let Err(err) = store.reload(&entry_id).await {
                  log::error!("Error al recargar la entrada {}: {}", entry_id, err);
              }
          });
        Ok(())
    }
}
