// Archivo: stubs.rs
// Propósito: implementaciones en memoria para pruebas y wiring rápido.
//
// Incluye un repositorio de destinos en memoria (`InMemoryTargetRepository`)
// y hooks que guardan lo que reciben (`RecordingHooks`). No son durables y se
// usan para demos o pruebas locales.
use crate::errors::{FlowError, Result};
use crate::hooks::FlowHooks;
use crate::manager::FlowManager;
use crate::registry::FlowRecord;
use crate::repository::{PersistedTarget, TargetRepository};
use crate::result::FlowResult;
use crate::schema::JsonMap;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::{Mutex, MutexGuard};

/// Repositorio de destinos en memoria.
///
/// `schedule_reload` solo anota el id: las pruebas inspeccionan `reloads()`.
#[derive(Debug, Default)]
pub struct InMemoryTargetRepository {
    targets: Mutex<Vec<PersistedTarget>>,
    reloads: Mutex<Vec<String>>,
}

impl InMemoryTargetRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_targets(&self) -> MutexGuard<'_, Vec<PersistedTarget>> {
        self.targets.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, target: PersistedTarget) {
        self.lock_targets().push(target);
    }

    pub fn get(&self, target_id: &str) -> Option<PersistedTarget> {
        self.lock_targets().iter().find(|t| t.target_id == target_id).cloned()
    }

    /// Ids agendados para recarga, en orden.
    pub fn reloads(&self) -> Vec<String> {
        self.reloads.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl TargetRepository for InMemoryTargetRepository {
    fn targets(&self, handler: &str) -> Result<Vec<PersistedTarget>> {
        Ok(self.lock_targets().iter().filter(|t| t.handler == handler).cloned().collect())
    }

    fn update_target_data(&self, target_id: &str, updates: &JsonMap) -> Result<bool> {
        let mut targets = self.lock_targets();
        let target = targets.iter_mut()
                            .find(|t| t.target_id == target_id)
                            .ok_or_else(|| FlowError::Storage(format!("destino desconocido: {}", target_id)))?;
        let mut merged = target.data.clone();
        merged.extend(updates.iter().map(|(k, v)| (k.clone(), v.clone())));
        if merged == target.data {
            return Ok(false);
        }
        target.data = merged;
        Ok(true)
    }

    fn schedule_reload(&self, target_id: &str) -> Result<()> {
        self.reloads.lock().unwrap_or_else(|e| e.into_inner()).push(target_id.to_string());
        Ok(())
    }
}

/// Hooks que guardan cada resultado recibido por `finish_flow` y cada
/// `post_init`. Con `retry_with` el siguiente `CreateEntry` se devuelve como
/// formulario para reintentar.
#[derive(Debug, Default)]
pub struct RecordingHooks {
    finished: Mutex<Vec<FlowResult>>,
    post_inits: Mutex<Vec<FlowRecord>>,
    retry_form: Mutex<Option<FlowResult>>,
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// El próximo `finish_flow` devuelve `form` en lugar del resultado.
    pub fn retry_with(self, form: FlowResult) -> Self {
        *self.retry_form.lock().unwrap_or_else(|e| e.into_inner()) = Some(form);
        self
    }

    pub fn finished(&self) -> Vec<FlowResult> {
        self.finished.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn post_inits(&self) -> Vec<FlowRecord> {
        self.post_inits.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl FlowHooks for RecordingHooks {
    async fn finish_flow(&self, _manager: &FlowManager, _flow: &FlowRecord, result: FlowResult) -> Result<FlowResult> {
        self.finished.lock().unwrap_or_else(|e| e.into_inner()).push(result.clone());
        if let Some(form) = self.retry_form.lock().unwrap_or_else(|e| e.into_inner()).take() {
            return Ok(form);
        }
        let result = match result {
            FlowResult::CreateEntry(mut entry) => {
                entry.result = Some(JsonValue::Bool(true));
                FlowResult::CreateEntry(entry)
            }
            other => other,
        };
        Ok(result)
    }

    async fn post_init(&self, _manager: &FlowManager, flow: &FlowRecord, _result: &FlowResult) {
        self.post_inits.lock().unwrap_or_else(|e| e.into_inner()).push(flow.clone());
    }
}
