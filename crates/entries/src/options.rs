// Archivo: options.rs
// Propósito: flujos de opciones. Corren en un segundo `FlowManager` cuya
// clave de handler es el entry id; al terminar reemplazan las opciones de la
// entrada.
use crate::entry::{ConfigEntry, EntryUpdate};
use crate::store::EntryStore;
use async_trait::async_trait;
use dashmap::DashMap;
use flow::{CreatedFlow, ErasedFlow, FlowContext, FlowError, FlowFactory, FlowHandler, FlowHooks, FlowManager, FlowRecord,
           FlowResult, JsonMap, RoutedFlow, StepRouter};
use serde_json::Value as JsonValue;
use std::sync::Arc;

type OptionsCtor = Arc<dyn Fn(&ConfigEntry) -> Box<dyn ErasedFlow> + Send + Sync>;

/// Constructores de flujos de opciones por dominio. Cada uno recibe la
/// entrada que va a modificar.
#[derive(Clone, Default)]
pub struct OptionsHandlers {
    ctors: Arc<DashMap<String, OptionsCtor>>,
}

impl OptionsHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H, F>(&self, domain: impl Into<String>, ctor: F) -> &Self
        where H: FlowHandler,
              F: Fn(&ConfigEntry) -> H + Send + Sync + 'static
    {
        let router = Arc::new(StepRouter::<H>::build());
        let ctor: OptionsCtor = Arc::new(move |entry: &ConfigEntry| RoutedFlow::new(ctor(entry), router.clone()).boxed());
        self.ctors.insert(domain.into(), ctor);
        self
    }

    /// Si el dominio ofrece flujo de opciones.
    pub fn supports(&self, domain: &str) -> bool {
        self.ctors.contains_key(domain)
    }

    fn build(&self, entry: &ConfigEntry) -> Option<Box<dyn ErasedFlow>> {
        let ctor = self.ctors.get(&entry.domain).map(|e| e.value().clone())?;
        Some(ctor(entry))
    }
}

/// Fábrica de flujos de opciones: la clave es el entry id.
#[derive(Clone)]
pub struct OptionsFlowFactory {
    store: EntryStore,
    handlers: OptionsHandlers,
}

impl OptionsFlowFactory {
    pub fn new(store: EntryStore, handlers: OptionsHandlers) -> Self {
        Self { store, handlers }
    }
}

#[async_trait]
impl FlowFactory for OptionsFlowFactory {
    async fn create_flow(&self, entry_id: &str, _context: &FlowContext, _data: Option<&JsonMap>) -> flow::Result<CreatedFlow> {
        let entry = self.store
                        .get(entry_id)
                        .ok_or_else(|| FlowError::UnknownHandler(entry_id.to_string()))?;
        let flow = self.handlers
                       .build(&entry)
                       .ok_or_else(|| FlowError::UnknownHandler(entry.domain.clone()))?;
        Ok(CreatedFlow::new(flow))
    }
}

/// Al terminar, los datos del `CreateEntry` pasan a ser las opciones de la
/// entrada.
pub struct OptionsFlowHooks {
    store: EntryStore,
}

impl OptionsFlowHooks {
    pub fn new(store: EntryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl FlowHooks for OptionsFlowHooks {
    async fn finish_flow(&self, _manager: &FlowManager, flow: &FlowRecord, result: FlowResult) -> flow::Result<FlowResult> {
        let FlowResult::CreateEntry(mut created) = result else {
            return Ok(result);
        };
        let update = EntryUpdate { options: Some(created.data.clone()),
                                   ..EntryUpdate::default() };
        if self.store.update_entry(&flow.handler, update)? {
            log::debug!("Opciones de la entrada {} actualizadas", flow.handler);
        }
        created.result = Some(JsonValue::Bool(true));
        Ok(created.into())
    }
}
