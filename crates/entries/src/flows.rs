// Archivo: flows.rs
// Propósito: conecta el motor de flujos con las entradas de configuración.
// `ConfigFlowFactory` arranca cada flujo en el paso que nombra su fuente y
// `ConfigFlowHooks` convierte cada `CreateEntry` en una entrada guardada.
use crate::entry::{ConfigEntry, EntryState};
use crate::errors::{EntryError, Result};
use crate::store::EntryStore;
use async_trait::async_trait;
use flow::{source, CreatedFlow, FlowContext, FlowError, FlowEvent, FlowFactory, FlowHooks, FlowManager, FlowRecord,
           FlowResult, HandlerRegistry, JsonMap, UniqueId};
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Fábrica de flujos de configuración sobre un `HandlerRegistry`.
///
/// La fuente del contexto es obligatoria: es el paso de entrada. Todo flujo
/// de configuración acepta `ignore` y `unignore`.
#[derive(Clone)]
pub struct ConfigFlowFactory {
    handlers: HandlerRegistry,
}

impl ConfigFlowFactory {
    pub fn new(handlers: HandlerRegistry) -> Self {
        Self { handlers }
    }
}

#[async_trait]
impl FlowFactory for ConfigFlowFactory {
    async fn create_flow(&self, handler: &str, context: &FlowContext, data: Option<&JsonMap>) -> flow::Result<CreatedFlow> {
        let source = context.source()
                            .ok_or_else(|| FlowError::InvalidContext("falta la fuente del flujo".into()))?;
        let created = self.handlers.create_flow(handler, context, data).await?;
        Ok(created.with_init_step(source).with_discovery_defaults())
    }
}

/// Hooks de los flujos de configuración.
pub struct ConfigFlowHooks {
    store: EntryStore,
    options: FlowManager,
}

impl ConfigFlowHooks {
    pub fn new(store: EntryStore, options: FlowManager) -> Self {
        Self { store, options }
    }
}

#[async_trait]
impl FlowHooks for ConfigFlowHooks {
    /// Guarda la entrada creada. Una entrada previa con la misma clave única
    /// se descarga antes y se elimina después de levantar la nueva.
    async fn finish_flow(&self, manager: &FlowManager, flow: &FlowRecord, result: FlowResult) -> flow::Result<FlowResult> {
        let FlowResult::CreateEntry(mut created) = result else {
            return Ok(result);
        };

        let aborted = manager.abort_flows_for_unique_id(&flow.handler, flow.unique_id(), Some(flow.flow_id));
        if aborted > 0 {
            log::debug!("{} flujos de {} abortados por la nueva entrada", aborted, flow.handler);
        }

        // el centinela nunca se guarda
        let unique_id = match flow.unique_id() {
            Some(UniqueId::Id(id)) => Some(id.clone()),
            _ => None,
        };
        let existing = unique_id.as_ref().and_then(|uid| {
                                              self.store
                                                  .entries(Some(&flow.handler))
                                                  .into_iter()
                                                  .find(|e| e.unique_id.as_ref() == Some(uid))
                                          });
        if let Some(existing) = existing.as_ref().filter(|e| e.state.recoverable()) {
            self.store.unload(&existing.entry_id).await?;
        }

        let mut entry = ConfigEntry::new(&flow.handler,
                                         &created.title,
                                         created.data.clone(),
                                         flow.context.source().unwrap_or(source::USER))
                        .with_options(created.options.clone())
                        .with_version(created.version);
        entry.unique_id = unique_id;
        let entry = self.store.add(entry).await?;

        if let Some(existing) = existing {
            remove_entry(&self.store, manager, &self.options, &existing.entry_id).await?;
        }

        created.result = Some(JsonValue::String(entry.entry_id));
        Ok(created.into())
    }

    /// Avisa a los oyentes de los flujos de descubrimiento nuevos.
    async fn post_init(&self, manager: &FlowManager, flow: &FlowRecord, _result: &FlowResult) {
        let Some(src) = flow.context.source().filter(|s| source::is_discovery(s)) else {
            return;
        };
        log::info!("Descubrimiento de {} vía {}: flujo {}", flow.handler, src, flow.flow_id);
        manager.events().publish(FlowEvent::Discovered { handler: flow.handler.clone(),
                                                         flow_id: flow.flow_id,
                                                         source: src.to_string() });
    }
}

/// Resultado de eliminar una entrada.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Removed {
    /// La descarga falló: hace falta reiniciar para liberar la integración.
    pub require_restart: bool,
}

/// Descarga y elimina la entrada, aborta los flujos que la referencian y,
/// si estaba ignorada, arranca en segundo plano el flujo `unignore`.
pub(crate) async fn remove_entry(store: &EntryStore,
                                 flows: &FlowManager,
                                 options: &FlowManager,
                                 entry_id: &str)
                                 -> Result<Removed> {
    let entry = store.get(entry_id).ok_or_else(|| EntryError::UnknownEntry(entry_id.to_string()))?;
    let unload_ok = if entry.state.recoverable() {
        store.unload(entry_id).await?
    } else {
        entry.state != EntryState::FailedUnload
    };
    store.take(entry_id);
    log::info!("Baja de la entrada {} ({}) de {}", entry.title, entry_id, entry.domain);

    let doomed: Vec<Uuid> = flows.progress_by_handler(&entry.domain, true)
                                 .into_iter()
                                 .filter(|f| f.context.entry_id.as_deref() == Some(entry_id))
                                 .map(|f| f.flow_id)
                                 .chain(options.progress_by_handler(entry_id, true).into_iter().map(|f| f.flow_id))
                                 .collect();
    for flow_id in doomed {
        // el flujo pudo terminar mientras tanto
        if flows.abort(flow_id).is_err() && options.abort(flow_id).is_err() {
            log::debug!("El flujo {} ya no estaba en curso", flow_id);
        }
    }

    if entry.is_ignored() {
        let mut data = JsonMap::new();
        if let Some(uid) = entry.unique_id {
            data.insert("unique_id".into(), JsonValue::String(uid));
        }
        let flows = flows.clone();
        let domain = entry.domain;
        tokio::spawn(async move {
            if let Err(err) = flows.init(&domain, FlowContext::with_source(source::UNIGNORE), Some(data)).await {
                log::warn!("No se pudo redescubrir {} tras quitar el ignorado: {}", domain, err);
            }
        });
    }

    Ok(Removed { require_restart: !unload_ok })
}
